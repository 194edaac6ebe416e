use std::io::{self, Write};
use std::path::{Path, PathBuf};

use uuid::Uuid;

/// Readable part of a key file stem, before the digest.
const KEY_STEM_MAX: usize = 64;

/// Map an arbitrary key (often a source path) to a single safe file stem.
pub fn sanitize_key(key: &str) -> String {
    let cleaned: String = key
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches('.');
    if cleaned.is_empty() {
        "_".to_string()
    } else {
        cleaned.to_string()
    }
}

/// File stem unique per key: the sanitized key followed by a v5 digest of the raw key.
/// `a b.txt` and `a_b.txt` sanitize alike but never share a stem.
pub fn key_file_stem(key: &str) -> String {
    let readable = sanitize_key(key);
    // Sanitized keys are ASCII, so any byte index is a char boundary.
    let readable = &readable[..readable.len().min(KEY_STEM_MAX)];
    let digest = Uuid::new_v5(&Uuid::NAMESPACE_URL, key.as_bytes()).simple();
    format!("{readable}-{digest}")
}

/// Write via a temp file in the target directory, then rename over the target.
/// Readers see either the old or the new content, never a partial file.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Blocking `write_atomic` moved off the async runtime.
pub async fn write_atomic_async(path: PathBuf, bytes: Vec<u8>) -> io::Result<()> {
    tokio::task::spawn_blocking(move || write_atomic(&path, &bytes))
        .await
        .map_err(io::Error::other)?
}

/// Read a file, mapping "not found" to `None`.
pub async fn read_optional(path: &Path) -> io::Result<Option<Vec<u8>>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}
