//! Storage of original uploaded images.
//!
//! Every image is written into the upload directory under a
//! timestamp-prefixed name: `{unix_millis}-{sanitised original name}`.
//! This naming rule is a contract — the record store keeps the stored name
//! in `receipts.image_path`, and export/listing resolve images by it — so
//! both the prefix format and the collision handling below must stay stable.

use chrono::Utc;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Reduce a client-supplied file name to a safe single path component.
///
/// Strips any directory part (clients may send full paths) and falls back to
/// `upload` for names that normalise to nothing.
pub fn sanitize_file_name(original: &str) -> String {
    let name = Path::new(original)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    if name.is_empty() || name == "." || name == ".." {
        "upload".to_string()
    } else {
        name
    }
}

/// Store one uploaded image and return the name it was stored under.
///
/// The name is `{upload timestamp in ms}-{sanitised original name}`; when a
/// batch uploads two same-named files within the same millisecond, a
/// `-{n}` counter is inserted so nothing is overwritten.
pub async fn store_upload(dir: &Path, original_name: &str, bytes: &[u8]) -> io::Result<String> {
    tokio::fs::create_dir_all(dir).await?;

    let clean = sanitize_file_name(original_name);
    let millis = Utc::now().timestamp_millis();

    let mut stored = format!("{millis}-{clean}");
    let mut attempt = 0u32;
    while tokio::fs::try_exists(dir.join(&stored)).await? {
        attempt += 1;
        stored = format!("{millis}-{attempt}-{clean}");
    }

    tokio::fs::write(dir.join(&stored), bytes).await?;
    debug!("stored upload '{original_name}' as '{stored}'");
    Ok(stored)
}

/// Resolve a stored name back to its full path in the upload directory.
pub fn upload_path(dir: &Path, stored_name: &str) -> PathBuf {
    dir.join(stored_name)
}

/// List stored image names, newest first.
///
/// The timestamp prefix makes reverse-lexicographic order the upload order.
pub async fn list_uploads(dir: &Path) -> io::Result<Vec<String>> {
    let mut names = Vec::new();
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(names),
        Err(e) => return Err(e),
    };
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort_by(|a, b| b.cmp(a));
    Ok(names)
}
