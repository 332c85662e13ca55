use super::{sort_entries, ByteSource, DirectoryEntry, EntryKind, FileStream, CHUNK_SIZE};
use crate::error::{AppError, AppResult};
use chrono::{DateTime, Utc};
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;

fn io_error(path: &Path, e: std::io::Error) -> AppError {
    AppError::file_io(path.display().to_string(), e)
}

/// Direct children of `dir`, stat'ed through symlinks.
///
/// One unreadable entry fails the whole listing unless `skip_unreadable`.
pub async fn list(dir: &Path, skip_unreadable: bool) -> AppResult<Vec<DirectoryEntry>> {
    let dir = tokio::fs::canonicalize(dir)
        .await
        .map_err(|e| io_error(dir, e))?;
    let mut reader = tokio::fs::read_dir(&dir)
        .await
        .map_err(|e| io_error(&dir, e))?;

    let mut entries = Vec::new();
    while let Some(child) = reader.next_entry().await.map_err(|e| io_error(&dir, e))? {
        let path = child.path();
        match tokio::fs::metadata(&path).await {
            Ok(metadata) => entries.push(to_entry(&path, &metadata)),
            Err(e) if skip_unreadable => {
                tracing::warn!("Skipping unreadable entry {}: {}", path.display(), e);
            }
            Err(e) => return Err(io_error(&path, e)),
        }
    }

    sort_entries(&mut entries);
    Ok(entries)
}

fn to_entry(path: &Path, metadata: &Metadata) -> DirectoryEntry {
    let kind = if metadata.is_dir() {
        EntryKind::Folder
    } else {
        EntryKind::File
    };
    DirectoryEntry {
        name: path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        kind,
        size: match kind {
            EntryKind::Folder => None,
            EntryKind::File => Some(metadata.len()),
        },
        modified: metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now()),
        path: path.display().to_string(),
    }
}

/// Open `path` and stream it in the background.
pub async fn read(path: &Path) -> AppResult<FileStream> {
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| io_error(path, e))?;
    let (tx, stream) = FileStream::channel();
    let path = path.to_path_buf();

    tokio::spawn(async move {
        let mut buf = vec![0u8; CHUNK_SIZE];
        loop {
            match file.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    if tx.send(Ok(buf[..n].to_vec())).await.is_err() {
                        tracing::debug!("Reader of {} went away", path.display());
                        break;
                    }
                }
                Err(e) => {
                    let _ = tx.send(Err(io_error(&path, e))).await;
                    break;
                }
            }
        }
    });

    Ok(stream)
}

/// Create (or truncate) `path` and copy `source` into it.
pub async fn write(path: PathBuf, mut source: ByteSource) -> AppResult<u64> {
    tokio::task::spawn_blocking(move || {
        let mut file = std::fs::File::create(&path).map_err(|e| io_error(&path, e))?;
        std::io::copy(&mut source, &mut file).map_err(|e| io_error(&path, e))
    })
    .await?
}
