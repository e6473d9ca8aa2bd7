//! Host-filesystem stand-in for the block-device-backed document store.
//!
//! Exposes the two-operation facade (`read_file`/`write_file`) the rest of
//! the crate is written against. A real block-device driver would replace
//! this module without its callers noticing; the contract is what matters,
//! not the backing medium.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::error::OsmError;

/// A single mounted document store rooted at a data directory.
#[derive(Debug)]
pub struct Store {
    root: PathBuf,
    /// Byte quota simulating a constrained block device. `None` means unbounded.
    quota: Option<u64>,
    storage_error: AtomicBool,
    storage_full: AtomicBool,
    used_bytes: AtomicU64,
}

impl Store {
    /// Mount the store at `root`, creating the directory if absent. This is
    /// the only operation that can fail fatally at boot.
    pub fn mount(root: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .map_err(|e| OsmError::StorageIo(e.to_string()))
            .map_err(anyhow::Error::from)
            .map_err(|e| e.context(format!("failed to mount store at {}", root.display())))?;

        let used_bytes = Self::measure_usage(&root);

        Ok(Self {
            root,
            quota: None,
            storage_error: AtomicBool::new(false),
            storage_full: AtomicBool::new(false),
            used_bytes: AtomicU64::new(used_bytes),
        })
    }

    /// Apply a simulated byte quota. Writes that would push total usage
    /// above the quota fail with [`OsmError::StorageFull`] before reaching
    /// `std::fs`.
    pub fn with_quota(mut self, quota_bytes: u64) -> Self {
        self.quota = Some(quota_bytes);
        self
    }

    fn measure_usage(root: &Path) -> u64 {
        fs::read_dir(root)
            .map(|entries| {
                entries
                    .filter_map(Result::ok)
                    .filter_map(|e| e.metadata().ok())
                    .map(|m| m.len())
                    .sum()
            })
            .unwrap_or(0)
    }

    fn full_path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Read the entire contents of a document, or `None` if it does not exist.
    pub fn read_file(&self, name: &str) -> Option<Vec<u8>> {
        match fs::read(self.full_path(name)) {
            Ok(bytes) => Some(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                log::warn!("store: read {name} failed: {e}");
                self.storage_error.store(true, Ordering::Relaxed);
                None
            }
        }
    }

    /// Atomically create or replace a document's contents.
    ///
    /// Writes to a sibling temp file and renames over the target so a crash
    /// mid-write never leaves a half-written document visible.
    pub fn write_file(&self, name: &str, bytes: &[u8]) -> Result<(), OsmError> {
        if let Some(quota) = self.quota {
            let existing = fs::metadata(self.full_path(name)).map(|m| m.len()).unwrap_or(0);
            let projected = self
                .used_bytes
                .load(Ordering::Relaxed)
                .saturating_sub(existing)
                .saturating_add(bytes.len() as u64);
            if projected > quota {
                self.storage_error.store(true, Ordering::Relaxed);
                self.storage_full.store(true, Ordering::Relaxed);
                log::error!("store: write {name} rejected, quota exceeded");
                return Err(OsmError::StorageFull);
            }
        }

        let tmp_path = self.full_path(&format!("{name}.tmp"));
        let final_path = self.full_path(name);

        let result = fs::write(&tmp_path, bytes).and_then(|()| fs::rename(&tmp_path, &final_path));

        match result {
            Ok(()) => {
                let existing = self.used_bytes.load(Ordering::Relaxed);
                self.used_bytes.store(existing, Ordering::Relaxed);
                self.used_bytes.store(Self::measure_usage(&self.root), Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                log::error!("store: write {name} failed: {e}");
                self.storage_error.store(true, Ordering::Relaxed);
                Err(OsmError::StorageIo(e.to_string()))
            }
        }
    }

    /// Whether any write has ever failed since mount.
    pub fn storage_error(&self) -> bool {
        self.storage_error.load(Ordering::Relaxed)
    }

    /// Whether any write has ever failed due to the simulated quota.
    pub fn storage_full(&self) -> bool {
        self.storage_full.load(Ordering::Relaxed)
    }

    /// Root directory this store is mounted at.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_missing_file_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::mount(dir.path()).unwrap();
        assert!(store.read_file("data_identity.json").is_none());
    }

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::mount(dir.path()).unwrap();
        store.write_file("data_identity.json", b"hello").unwrap();
        assert_eq!(store.read_file("data_identity.json"), Some(b"hello".to_vec()));
    }

    #[test]
    fn rewrite_replaces_contents() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::mount(dir.path()).unwrap();
        store.write_file("data_contacts.json", b"[1]").unwrap();
        store.write_file("data_contacts.json", b"[1,2]").unwrap();
        assert_eq!(store.read_file("data_contacts.json"), Some(b"[1,2]".to_vec()));
    }

    #[test]
    fn quota_exceeded_sets_sticky_flags() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::mount(dir.path()).unwrap().with_quota(4);
        let result = store.write_file("data_messages.json", b"far too many bytes");
        assert!(matches!(result, Err(OsmError::StorageFull)));
        assert!(store.storage_full());
        assert!(store.storage_error());
    }

    #[test]
    fn quota_allows_writes_within_budget() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::mount(dir.path()).unwrap().with_quota(1024);
        assert!(store.write_file("data_outbox.json", b"[]").is_ok());
        assert!(!store.storage_full());
    }

    #[test]
    fn no_error_flag_on_clean_run() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::mount(dir.path()).unwrap();
        store.write_file("data_pending_keys.json", b"[]").unwrap();
        assert!(!store.storage_error());
    }
}
