//! Filesystem access on the local host or over SFTP
//!
//! Both targets produce the same [`DirectoryEntry`] shape and the same sort
//! order, so callers never branch on where the data came from.

pub mod listing;
pub mod local;
pub mod remote;

use crate::config::FileSettings;
use crate::error::{AppError, AppResult};
use crate::exec::CommandExecutor;
use crate::ssh::SessionManager;
use crate::target::OperationTarget;
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

pub use listing::parse_listing;

/// Transfer chunk size for streamed reads
pub const CHUNK_SIZE: usize = 32 * 1024;

/// Chunks buffered between a transfer task and the consumer
const STREAM_DEPTH: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Folder,
    File,
}

/// One child of a listed directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    /// Always `None` for folders
    pub size: Option<u64>,
    pub modified: DateTime<Utc>,
    pub path: String,
}

/// Folders first, then case-insensitive name
pub(crate) fn sort_entries(entries: &mut [DirectoryEntry]) {
    entries.sort_by(|a, b| match (a.kind, b.kind) {
        (EntryKind::Folder, EntryKind::File) => std::cmp::Ordering::Less,
        (EntryKind::File, EntryKind::Folder) => std::cmp::Ordering::Greater,
        _ => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
    });
}

/// Chunked file contents produced by a background transfer.
///
/// Dropping the stream stops the transfer at the next chunk.
pub struct FileStream {
    rx: mpsc::Receiver<AppResult<Vec<u8>>>,
}

impl FileStream {
    fn channel() -> (mpsc::Sender<AppResult<Vec<u8>>>, Self) {
        let (tx, rx) = mpsc::channel(STREAM_DEPTH);
        (tx, Self { rx })
    }

    /// Collect the remaining chunks.
    pub async fn read_to_end(mut self) -> AppResult<Vec<u8>> {
        let mut contents = Vec::new();
        while let Some(chunk) = self.rx.recv().await {
            contents.extend_from_slice(&chunk?);
        }
        Ok(contents)
    }

    /// Copy the remaining chunks into `writer`, returning the byte count.
    pub async fn copy_to<W>(mut self, writer: &mut W) -> AppResult<u64>
    where
        W: AsyncWrite + Unpin,
    {
        let mut written = 0u64;
        while let Some(chunk) = self.rx.recv().await {
            let chunk = chunk?;
            writer.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        writer.flush().await?;
        Ok(written)
    }
}

impl Stream for FileStream {
    type Item = AppResult<Vec<u8>>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

/// Blocking byte source for writes, such as a staged upload file
pub type ByteSource = Box<dyn Read + Send>;

pub struct FilesystemAdapter {
    sessions: Arc<SessionManager>,
    executor: CommandExecutor,
    settings: FileSettings,
}

impl FilesystemAdapter {
    pub fn new(sessions: Arc<SessionManager>, executor: CommandExecutor, settings: FileSettings) -> Self {
        Self {
            sessions,
            executor,
            settings,
        }
    }

    /// List the direct children of `path`; an empty path means the configured root.
    pub async fn list(&self, target: OperationTarget, path: &str) -> AppResult<Vec<DirectoryEntry>> {
        let path = self.resolve(path);
        match target {
            OperationTarget::Local => {
                local::list(Path::new(&path), self.settings.skip_unreadable_entries).await
            }
            OperationTarget::Remote => remote::list(&self.executor, &path).await,
        }
    }

    pub async fn read_file(&self, target: OperationTarget, path: &str) -> AppResult<FileStream> {
        match target {
            OperationTarget::Local => local::read(Path::new(path)).await,
            OperationTarget::Remote => {
                let profile = self.sessions.profile()?;
                remote::read(Arc::clone(&self.sessions), profile, path).await
            }
        }
    }

    /// Write everything from `source` to `path`, returning the byte count.
    pub async fn write_file(
        &self,
        target: OperationTarget,
        path: &str,
        source: ByteSource,
    ) -> AppResult<u64> {
        match target {
            OperationTarget::Local => local::write(PathBuf::from(path), source).await,
            OperationTarget::Remote => {
                let profile = self.sessions.profile()?;
                remote::write(&self.sessions, profile, path, source).await
            }
        }
    }

    /// Move a staged upload into `dest_dir` (default: the configured root)
    /// under its original file name. Returns the final path and byte count.
    pub async fn upload(
        &self,
        target: OperationTarget,
        dest_dir: Option<&str>,
        file_name: &str,
        staged: &Path,
    ) -> AppResult<(String, u64)> {
        let name = Path::new(file_name)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| AppError::Config(format!("Invalid upload file name: {}", file_name)))?;
        let dest_dir = self.resolve(dest_dir.unwrap_or_default());

        let destination = match target {
            OperationTarget::Local => Path::new(&dest_dir).join(&name).display().to_string(),
            OperationTarget::Remote => remote::join(&dest_dir, &name),
        };

        let source = std::fs::File::open(staged)
            .map_err(|e| AppError::file_io(staged.display().to_string(), e))?;
        let written = self.write_file(target, &destination, Box::new(source)).await?;
        tracing::info!("Uploaded {} ({} bytes)", destination, written);
        Ok((destination, written))
    }

    fn resolve(&self, path: &str) -> String {
        if path.is_empty() {
            self.settings.root.display().to_string()
        } else {
            path.to_string()
        }
    }
}
