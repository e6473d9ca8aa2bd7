//! The triage queue of unassigned peer public keys.
//!
//! A bounded FIFO, unique by `pubkey_b64`. On overflow the incoming key is
//! rejected — the oldest entry is never evicted (see design note in the
//! App Core on this policy choice).

use serde::{Deserialize, Serialize};

use crate::error::OsmError;
use crate::store::Store;

/// Upper bound on the number of pending keys held at once.
pub const MAX_PENDING_KEYS: usize = 8;
const DOC_NAME: &str = "data_pending_keys.json";

/// A peer public key awaiting user triage.
///
/// Field names match the on-disk/wire shape (`pubkey`, `received`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingKey {
    #[serde(default, rename = "pubkey")]
    pub pubkey_b64: String,
    #[serde(default, rename = "received")]
    pub received_at: i64,
}

/// The in-memory pending-key queue.
#[derive(Debug, Default)]
pub struct PendingKeys {
    entries: Vec<PendingKey>,
}

impl PendingKeys {
    #[must_use]
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Load from the store, or start empty if no document exists.
    pub fn load(store: &Store) -> Result<Self, OsmError> {
        let Some(bytes) = store.read_file(DOC_NAME) else {
            return Ok(Self::new());
        };
        let text = String::from_utf8_lossy(&bytes);
        let entries: Vec<PendingKey> =
            serde_json::from_str(&text).map_err(|e| OsmError::Malformed(e.to_string()))?;
        Ok(Self { entries })
    }

    /// Persist the full queue.
    pub fn save(&self, store: &Store) -> Result<(), OsmError> {
        let json = serde_json::to_string(&self.entries).map_err(|e| OsmError::Malformed(e.to_string()))?;
        store.write_file(DOC_NAME, json.as_bytes())
    }

    #[must_use]
    pub fn iter(&self) -> impl Iterator<Item = &PendingKey> {
        self.entries.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn contains(&self, pubkey_b64: &str) -> bool {
        self.entries.iter().any(|k| k.pubkey_b64 == pubkey_b64)
    }

    /// Push a new pending key. Rejects duplicates (returns `Ok(false)`,
    /// no-op) and rejects arrivals once the queue is at capacity.
    pub fn push(&mut self, pubkey_b64: &str, received_at: i64) -> Result<bool, OsmError> {
        if self.contains(pubkey_b64) {
            return Ok(false);
        }
        if self.entries.len() >= MAX_PENDING_KEYS {
            log::warn!("pending_keys: queue full, dropping new arrival");
            return Err(OsmError::CapacityExceeded);
        }
        self.entries.push(PendingKey {
            pubkey_b64: pubkey_b64.to_string(),
            received_at,
        });
        Ok(true)
    }

    /// Remove and return the pending key for `pubkey_b64`, if present —
    /// used once the user assigns or creates a contact from it.
    pub fn take(&mut self, pubkey_b64: &str) -> Option<PendingKey> {
        let idx = self.entries.iter().position(|k| k.pubkey_b64 == pubkey_b64)?;
        Some(self.entries.remove(idx))
    }

    /// Remove and return the oldest pending key, if any.
    pub fn take_oldest(&mut self) -> Option<PendingKey> {
        if self.entries.is_empty() {
            None
        } else {
            Some(self.entries.remove(0))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_deduplicates_by_pubkey() {
        let mut keys = PendingKeys::new();
        assert!(keys.push("abc", 0).unwrap());
        assert!(!keys.push("abc", 1).unwrap());
        assert_eq!(keys.len(), 1);
    }

    #[test]
    fn overflow_rejects_new_arrival() {
        let mut keys = PendingKeys::new();
        for i in 0..MAX_PENDING_KEYS {
            keys.push(&format!("key{i}"), 0).unwrap();
        }
        assert!(matches!(keys.push("overflow", 0), Err(OsmError::CapacityExceeded)));
        assert_eq!(keys.len(), MAX_PENDING_KEYS);
        assert!(!keys.contains("overflow"));
    }

    #[test]
    fn take_removes_matching_entry() {
        let mut keys = PendingKeys::new();
        keys.push("abc", 0).unwrap();
        keys.push("def", 0).unwrap();

        let taken = keys.take("abc").unwrap();
        assert_eq!(taken.pubkey_b64, "abc");
        assert_eq!(keys.len(), 1);
        assert!(!keys.contains("abc"));
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::mount(dir.path()).unwrap();

        let mut keys = PendingKeys::new();
        keys.push("abc", 7).unwrap();
        keys.save(&store).unwrap();

        let loaded = PendingKeys::load(&store).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.iter().next().unwrap().received_at, 7);
    }
}
