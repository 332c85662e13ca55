//! In-memory stand-in for a remote host
//!
//! Sessions share one [`FakeRemote`]: a tiny filesystem, an `ls -laL`
//! renderer, canned command replies and open/close counters.

use super::{CommandOutput, ConnectionProfile, RemoteSession, SessionConnector};
use crate::error::{AppError, AppResult};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::io::{self, Cursor, Read, Write};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

pub(crate) fn profile_for(host: &str) -> ConnectionProfile {
    ConnectionProfile::new(
        host,
        None,
        "tester",
        super::SecretMaterial::Password("secret".into()),
    )
}

#[derive(Default)]
pub(crate) struct FakeRemote {
    files: Mutex<BTreeMap<String, Vec<u8>>>,
    broken: Mutex<BTreeMap<String, Vec<u8>>>,
    dirs: Mutex<BTreeSet<String>>,
    canned: Mutex<Vec<(String, CommandOutput)>>,
    refuse: AtomicBool,
    attempts: AtomicUsize,
    opened: AtomicUsize,
    closed: AtomicUsize,
}

struct FakeConnector {
    remote: Arc<FakeRemote>,
}

struct FakeSession {
    remote: Arc<FakeRemote>,
    host: String,
    closed: bool,
}

impl FakeRemote {
    pub(crate) fn new() -> Arc<Self> {
        let remote = Self::default();
        remote.dirs.lock().insert("/".to_string());
        Arc::new(remote)
    }

    pub(crate) fn connector(self: &Arc<Self>) -> Arc<dyn SessionConnector> {
        Arc::new(FakeConnector {
            remote: Arc::clone(self),
        })
    }

    pub(crate) fn refuse_connections(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    pub(crate) fn add_dir(&self, path: &str) {
        self.dirs.lock().insert(path.to_string());
    }

    pub(crate) fn put_file(&self, path: &str, contents: &[u8]) {
        self.files.lock().insert(path.to_string(), contents.to_vec());
    }

    /// A file whose reads fail after yielding `prefix`
    pub(crate) fn put_broken_file(&self, path: &str, prefix: &[u8]) {
        self.broken.lock().insert(path.to_string(), prefix.to_vec());
    }

    pub(crate) fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.files.lock().get(path).cloned()
    }

    /// Reply to any command starting with `prefix`
    pub(crate) fn respond(&self, prefix: &str, stdout: &str, exit_status: i32) {
        self.canned.lock().push((
            prefix.to_string(),
            CommandOutput {
                stdout: stdout.to_string(),
                stderr: if exit_status == 0 {
                    String::new()
                } else {
                    format!("{}: command failed", prefix)
                },
                exit_status,
            },
        ));
    }

    pub(crate) fn connect_attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub(crate) fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub(crate) fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    fn render_listing(&self, dir: &str) -> Option<String> {
        let dir = normalize(dir);
        let dirs = self.dirs.lock();
        if !dirs.contains(&dir) {
            return None;
        }
        let files = self.files.lock();

        let mut lines = vec![
            format!("total {}", files.len() * 4),
            "drwxr-xr-x  2 tester tester     4096 Jan  1 00:00 .".to_string(),
            "drwxr-xr-x  3 root   root       4096 Jan  1 00:00 ..".to_string(),
        ];
        for sub in dirs.iter().filter(|d| d.as_str() != "/" && parent(d) == dir) {
            lines.push(format!(
                "drwxr-xr-x  2 tester tester     4096 Mar 14 09:26 {}",
                base_name(sub)
            ));
        }
        for (path, contents) in files.iter().filter(|(p, _)| parent(p) == dir) {
            lines.push(format!(
                "-rw-r--r--  1 tester tester {:>8} Mar 14 09:26 {}",
                contents.len(),
                base_name(path)
            ));
        }
        Some(lines.join("\n") + "\n")
    }
}

impl SessionConnector for FakeConnector {
    fn connect(&self, profile: &ConnectionProfile) -> AppResult<Box<dyn RemoteSession>> {
        self.remote.attempts.fetch_add(1, Ordering::SeqCst);
        if self.remote.refuse.load(Ordering::SeqCst) {
            return Err(AppError::Connection(format!(
                "TCP connect to {}:{} failed: Connection refused",
                profile.host, profile.port
            )));
        }
        self.remote.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeSession {
            remote: Arc::clone(&self.remote),
            host: profile.host.clone(),
            closed: false,
        }))
    }
}

impl RemoteSession for FakeSession {
    fn exec(&mut self, command: &str) -> AppResult<CommandOutput> {
        if let Some((_, output)) = self
            .remote
            .canned
            .lock()
            .iter()
            .find(|(prefix, _)| command.starts_with(prefix.as_str()))
        {
            return Ok(output.clone());
        }

        if let Some(quoted) = command.strip_prefix("ls -laL ") {
            let dir = unquote(quoted);
            return Ok(match self.remote.render_listing(&dir) {
                Some(stdout) => CommandOutput {
                    stdout,
                    stderr: String::new(),
                    exit_status: 0,
                },
                None => CommandOutput {
                    stdout: String::new(),
                    stderr: format!("ls: cannot access '{}': No such file or directory", dir),
                    exit_status: 2,
                },
            });
        }

        if command == "false" || command.starts_with("exit ") {
            return Ok(CommandOutput {
                stdout: String::new(),
                stderr: "failed".to_string(),
                exit_status: 1,
            });
        }

        Ok(CommandOutput {
            stdout: format!("{}:{}\n", self.host, command),
            stderr: String::new(),
            exit_status: 0,
        })
    }

    fn open_read(&mut self, path: &str) -> AppResult<Box<dyn Read + '_>> {
        if let Some(prefix) = self.remote.broken.lock().get(path).cloned() {
            return Ok(Box::new(Cursor::new(prefix).chain(BrokenReader)));
        }
        match self.remote.file(path) {
            Some(contents) => Ok(Box::new(Cursor::new(contents))),
            None => Err(AppError::transfer(path, "Failed to open file: no such file")),
        }
    }

    fn open_write(&mut self, path: &str) -> AppResult<Box<dyn Write + '_>> {
        if !self.remote.dirs.lock().contains(&parent(path)) {
            return Err(AppError::transfer(path, "Failed to create file: no such file"));
        }
        Ok(Box::new(FakeWriter {
            remote: Arc::clone(&self.remote),
            path: path.to_string(),
            buffer: Vec::new(),
        }))
    }

    fn close(&mut self) -> AppResult<()> {
        assert!(!self.closed, "session closed twice");
        self.closed = true;
        self.remote.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Commits the written bytes when dropped
struct FakeWriter {
    remote: Arc<FakeRemote>,
    path: String,
    buffer: Vec<u8>,
}

impl Write for FakeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for FakeWriter {
    fn drop(&mut self) {
        let contents = std::mem::take(&mut self.buffer);
        self.remote.files.lock().insert(self.path.clone(), contents);
    }
}

struct BrokenReader;

impl Read for BrokenReader {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Err(io::Error::new(io::ErrorKind::BrokenPipe, "connection reset mid-transfer"))
    }
}

fn normalize(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

fn parent(path: &str) -> String {
    match path.rsplit_once('/') {
        Some(("", _)) | None => "/".to_string(),
        Some((parent, _)) => parent.to_string(),
    }
}

fn base_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn unquote(arg: &str) -> String {
    arg.trim()
        .trim_start_matches('\'')
        .trim_end_matches('\'')
        .replace("'\\''", "'")
}
