// governance-types-rs/src/fs.rs
// Crash-safe file replacement shared by the apply engine and state stores.

use std::io;
use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// Write `contents` to `path` via a sibling temp file and a rename, so a
/// reader (or a crash) sees either the old file or the complete new one.
pub async fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await?;
        }
    }

    let tmp = temp_sibling(path);
    let result = match write_durable(&tmp, contents).await {
        Ok(()) => fs::rename(&tmp, path).await,
        Err(err) => Err(err),
    };
    if result.is_err() {
        let _ = fs::remove_file(&tmp).await;
    }
    result
}

/// The temp file's bytes must reach the disk before it is renamed over the
/// target.
async fn write_durable(path: &Path, contents: &[u8]) -> io::Result<()> {
    let mut file = fs::File::create(path).await?;
    file.write_all(contents).await?;
    file.sync_all().await
}

fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());
    path.with_file_name(format!(".{}.{}.tmp", name, Uuid::new_v4().simple()))
}
