//! Atomic file write helpers.
//!
//! Uses a temp file + rename pattern: the bytes are written and synced to a
//! scratch file first and then renamed over the target, so readers observe
//! either the previous file or the complete new one.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

/// Extension used for scratch files.
pub const TEMP_EXTENSION: &str = "tmp";

/// Write `bytes` to `path` atomically.
///
/// The scratch file is created in `scratch_dir` when given (it must be on
/// the same filesystem as `path`), otherwise next to the target. Parent
/// directories of `path` are created as needed.
pub async fn atomic_write(
    path: &Path,
    bytes: &[u8],
    scratch_dir: Option<&Path>,
) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let temp_path = scratch_path(path, scratch_dir);
    if let Some(dir) = scratch_dir {
        fs::create_dir_all(dir).await?;
    }

    let write_result = async {
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&temp_path, path).await
    }
    .await;

    if let Err(err) = write_result {
        if let Err(e) = fs::remove_file(&temp_path).await {
            if e.kind() != ErrorKind::NotFound {
                warn!(path = %temp_path.display(), "Failed to remove scratch file: {e}");
            }
        }
        return Err(err);
    }

    Ok(())
}

fn scratch_path(target: &Path, scratch_dir: Option<&Path>) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());
    let file_name = format!(".{name}.{}.{TEMP_EXTENSION}", Uuid::new_v4().simple());

    match scratch_dir {
        Some(dir) => dir.join(file_name),
        None => target
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(file_name),
    }
}

/// Remove a file, treating "already absent" as success.
///
/// Returns `true` if a file was removed.
pub async fn remove_if_exists(path: &Path) -> std::io::Result<bool> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Delete orphaned scratch files left behind by interrupted writes.
///
/// Returns the number of files removed.
pub async fn clean_scratch_dir(dir: &Path) -> std::io::Result<usize> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };

    let mut removed = 0;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == TEMP_EXTENSION)
            && entry.file_type().await?.is_file()
        {
            fs::remove_file(&path).await?;
            debug!(path = %path.display(), "Removed orphaned scratch file");
            removed += 1;
        }
    }

    Ok(removed)
}
