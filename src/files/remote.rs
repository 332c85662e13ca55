use super::listing::parse_listing;
use super::{sort_entries, ByteSource, DirectoryEntry, FileStream, CHUNK_SIZE};
use crate::error::{AppError, AppResult};
use crate::exec::CommandExecutor;
use crate::ssh::{ConnectionProfile, SessionManager};
use crate::target::OperationTarget;
use std::io::{Read, Write};
use std::sync::Arc;
use tokio::sync::oneshot;

/// Quote for a POSIX shell: `it's` becomes `'it'\''s'`.
pub fn shell_quote(arg: &str) -> String {
    format!("'{}'", arg.replace('\'', "'\\''"))
}

/// Join a remote directory and a child name with `/`.
pub fn join(dir: &str, name: &str) -> String {
    if dir.ends_with('/') {
        format!("{}{}", dir, name)
    } else {
        format!("{}/{}", dir, name)
    }
}

/// List `dir` with `ls -laL`, following symlinks the same way a local stat
/// does. A dangling link makes `ls` exit non-zero, which fails the listing.
pub async fn list(executor: &CommandExecutor, dir: &str) -> AppResult<Vec<DirectoryEntry>> {
    let command = format!("ls -laL {}", shell_quote(dir));
    let output = executor
        .run(OperationTarget::Remote, &command)
        .await
        .map_err(|e| match e {
            AppError::Execution(message) => AppError::transfer(dir, message),
            other => other,
        })?;

    let mut entries = parse_listing(&output.stdout);
    for entry in &mut entries {
        entry.path = join(dir, &entry.name);
    }
    sort_entries(&mut entries);
    Ok(entries)
}

/// Stream a remote file over SFTP.
///
/// The session lives as long as the transfer: it closes on EOF, on a read
/// error, or once the consumer drops the stream.
pub async fn read(
    sessions: Arc<SessionManager>,
    profile: ConnectionProfile,
    path: &str,
) -> AppResult<FileStream> {
    let (tx, mut stream) = FileStream::channel();
    let (opened_tx, opened_rx) = oneshot::channel::<()>();
    let chunk_tx = tx.clone();
    let remote_path = path.to_string();

    tokio::spawn(async move {
        let result = sessions
            .with_session_using(profile, move |session| {
                let mut file = session.open_read(&remote_path)?;
                let _ = opened_tx.send(());

                let mut buf = vec![0u8; CHUNK_SIZE];
                loop {
                    let n = file
                        .read(&mut buf)
                        .map_err(|e| AppError::transfer(&remote_path, format!("Failed to read file: {}", e)))?;
                    if n == 0 {
                        return Ok(());
                    }
                    if chunk_tx.blocking_send(Ok(buf[..n].to_vec())).is_err() {
                        tracing::debug!("Reader of {} went away, stopping transfer", remote_path);
                        return Ok(());
                    }
                }
            })
            .await;

        if let Err(e) = result {
            let _ = tx.send(Err(e)).await;
        }
    });

    // A dropped signal means the session or the open failed; the cause is
    // the first item on the stream.
    if opened_rx.await.is_err() {
        return Err(match stream.rx.recv().await {
            Some(Err(e)) => e,
            _ => AppError::transfer(path, "Transfer ended before the file was opened"),
        });
    }
    Ok(stream)
}

pub async fn write(
    sessions: &SessionManager,
    profile: ConnectionProfile,
    path: &str,
    mut source: ByteSource,
) -> AppResult<u64> {
    let remote_path = path.to_string();
    sessions
        .with_session_using(profile, move |session| {
            let mut file = session.open_write(&remote_path)?;
            let written = std::io::copy(&mut source, &mut file)
                .map_err(|e| AppError::transfer(&remote_path, format!("Failed to write file: {}", e)))?;
            file.flush()
                .map_err(|e| AppError::transfer(&remote_path, format!("Failed to flush file: {}", e)))?;
            Ok(written)
        })
        .await
}
