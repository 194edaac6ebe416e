use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::LedgerError;
use crate::pipeline::fs_helpers::{key_file_stem, read_optional, write_atomic_async};

/// Raw byte storage behind the ledger. The ledger owns the record format.
#[async_trait]
pub trait LedgerBackend: Send + Sync {
    /// `None` when nothing was ever written for `key`.
    async fn read_record(&self, key: &str) -> Result<Option<Vec<u8>>, LedgerError>;

    /// Replace whatever is stored under `key`.
    async fn write_record(&self, key: &str, bytes: &[u8]) -> Result<(), LedgerError>;
}

/// One JSON file per key under a root directory, written atomically.
/// File names carry a digest of the raw key, so distinct keys never share a file.
pub struct FsLedgerBackend {
    root: PathBuf,
}

impl FsLedgerBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn record_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.json", key_file_stem(key)))
    }
}

#[async_trait]
impl LedgerBackend for FsLedgerBackend {
    async fn read_record(&self, key: &str) -> Result<Option<Vec<u8>>, LedgerError> {
        Ok(read_optional(&self.record_path(key)).await?)
    }

    async fn write_record(&self, key: &str, bytes: &[u8]) -> Result<(), LedgerError> {
        write_atomic_async(self.record_path(key), bytes.to_vec()).await?;
        Ok(())
    }
}

/// In-process backend for tests and dry runs. Can be switched offline to
/// simulate an unreachable store.
#[derive(Default)]
pub struct MemoryLedgerBackend {
    records: Mutex<HashMap<String, Vec<u8>>>,
    offline: AtomicBool,
}

impl MemoryLedgerBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Store raw bytes, bypassing the ledger (for seeding corrupt records).
    pub async fn insert_raw(&self, key: &str, bytes: &[u8]) {
        self.records.lock().await.insert(key.to_string(), bytes.to_vec());
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    fn check_online(&self) -> Result<(), LedgerError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(LedgerError::Unavailable("memory backend offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerBackend for MemoryLedgerBackend {
    async fn read_record(&self, key: &str) -> Result<Option<Vec<u8>>, LedgerError> {
        self.check_online()?;
        Ok(self.records.lock().await.get(key).cloned())
    }

    async fn write_record(&self, key: &str, bytes: &[u8]) -> Result<(), LedgerError> {
        self.check_online()?;
        self.records
            .lock()
            .await
            .insert(key.to_string(), bytes.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fs_backend_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FsLedgerBackend::new(dir.path());
        assert!(backend.read_record("docs/a.pdf").await.unwrap().is_none());

        backend.write_record("docs/a.pdf", b"{}").await.unwrap();
        assert_eq!(
            backend.read_record("docs/a.pdf").await.unwrap().unwrap(),
            b"{}"
        );
        let name = backend.record_path("docs/a.pdf");
        let name = name.file_name().unwrap().to_string_lossy();
        assert!(name.starts_with("docs_a.pdf-") && name.ends_with(".json"), "{name}");
    }

    #[tokio::test]
    async fn fs_backend_keeps_similar_keys_apart() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FsLedgerBackend::new(dir.path());
        backend.write_record("reports/study 1.txt", b"a").await.unwrap();
        backend.write_record("reports_study_1.txt", b"b").await.unwrap();

        assert_eq!(backend.read_record("reports/study 1.txt").await.unwrap().unwrap(), b"a");
        assert_eq!(backend.read_record("reports_study_1.txt").await.unwrap().unwrap(), b"b");
        assert!(backend.read_record("reports/study_1.txt").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn fs_backend_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FsLedgerBackend::new(dir.path().join("ledger"));
        backend.write_record("k", b"one").await.unwrap();
        backend.write_record("k", b"two").await.unwrap();
        assert_eq!(backend.read_record("k").await.unwrap().unwrap(), b"two");
    }

    #[tokio::test]
    async fn memory_backend_offline() {
        let backend = MemoryLedgerBackend::new();
        backend.write_record("k", b"v").await.unwrap();
        assert_eq!(backend.len().await, 1);

        backend.set_offline(true);
        assert!(matches!(
            backend.read_record("k").await,
            Err(LedgerError::Unavailable(_))
        ));
        assert!(backend.write_record("k", b"w").await.is_err());
    }

    #[test]
    fn backend_is_object_safe() {
        fn _assert(_: &dyn LedgerBackend) {}
    }
}
