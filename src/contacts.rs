//! In-memory contact list with stable integer ids.
//!
//! Backed by a bounded `Vec`, not a `HashMap`: capacities are small by
//! design (32 contacts) and insertion-order iteration is part of the
//! contract, so a linear scan is simpler than indexing machinery.

use serde::{Deserialize, Serialize};

use crate::error::OsmError;
use crate::store::Store;

/// Upper bound on the number of contacts held at once.
pub const MAX_CONTACTS: usize = 32;
const DOC_NAME: &str = "data_contacts.json";

/// A contact's key-exchange state. Persisted as a small integer
/// (`0|1|2`), matching the on-disk/wire encoding: unknown values decode
/// tolerantly to `PendingSent` rather than failing the load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum ContactStatus {
    PendingSent,
    PendingReceived,
    Established,
}

impl ContactStatus {
    #[must_use]
    pub fn as_u8(self) -> u8 {
        match self {
            Self::PendingSent => 0,
            Self::PendingReceived => 1,
            Self::Established => 2,
        }
    }

    #[must_use]
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::PendingReceived,
            2 => Self::Established,
            _ => Self::PendingSent,
        }
    }
}

impl Default for ContactStatus {
    fn default() -> Self {
        Self::PendingSent
    }
}

impl From<u8> for ContactStatus {
    fn from(value: u8) -> Self {
        Self::from_u8(value)
    }
}

impl From<ContactStatus> for u8 {
    fn from(value: ContactStatus) -> Self {
        value.as_u8()
    }
}

/// A single locally-known peer.
///
/// Field names match the on-disk/wire shape exactly (`pubkey`, `unread`)
/// rather than the more descriptive in-memory names a first draft might
/// reach for; every field defaults tolerantly if a document is missing it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    #[serde(default)]
    pub id: u32,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: ContactStatus,
    /// Base64-encoded peer public key. Empty until the exchange completes.
    #[serde(default, rename = "pubkey")]
    pub public_key: String,
    #[serde(default, rename = "unread")]
    pub unread_count: u32,
    #[serde(default)]
    pub created_at: i64,
}

impl Contact {
    /// A contact is Established exactly when its key decodes to 32 bytes.
    #[must_use]
    pub fn is_established(&self) -> bool {
        self.status == ContactStatus::Established && crate::crypto::b64_to_pubkey(&self.public_key).is_ok()
    }
}

/// The in-memory contact collection.
#[derive(Debug, Default)]
pub struct Contacts {
    entries: Vec<Contact>,
    next_id: u32,
}

impl Contacts {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_id: 1,
        }
    }

    /// Load from the store, or start empty if no document exists.
    pub fn load(store: &Store) -> Result<Self, OsmError> {
        let Some(bytes) = store.read_file(DOC_NAME) else {
            return Ok(Self::new());
        };
        let text = String::from_utf8_lossy(&bytes);
        let entries: Vec<Contact> =
            serde_json::from_str(&text).map_err(|e| OsmError::Malformed(e.to_string()))?;
        let next_id = entries.iter().map(|c| c.id).max().unwrap_or(0) + 1;
        Ok(Self { entries, next_id })
    }

    /// Persist the full collection.
    pub fn save(&self, store: &Store) -> Result<(), OsmError> {
        let json = serde_json::to_string(&self.entries).map_err(|e| OsmError::Malformed(e.to_string()))?;
        store.write_file(DOC_NAME, json.as_bytes())
    }

    #[must_use]
    pub fn iter(&self) -> impl Iterator<Item = &Contact> {
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
    pub fn find_by_id(&self, id: u32) -> Option<&Contact> {
        self.entries.iter().find(|c| c.id == id)
    }

    #[must_use]
    pub fn find_by_id_mut(&mut self, id: u32) -> Option<&mut Contact> {
        self.entries.iter_mut().find(|c| c.id == id)
    }

    #[must_use]
    pub fn find_by_name(&self, name: &str) -> Option<&Contact> {
        self.entries.iter().find(|c| c.name == name)
    }

    #[must_use]
    pub fn find_by_name_mut(&mut self, name: &str) -> Option<&mut Contact> {
        self.entries.iter_mut().find(|c| c.name == name)
    }

    /// True if any contact already carries this exact public key.
    #[must_use]
    pub fn has_public_key(&self, pubkey_b64: &str) -> bool {
        !pubkey_b64.is_empty() && self.entries.iter().any(|c| c.public_key == pubkey_b64)
    }

    /// Add a new contact with no key yet (the "add" intent: status PendingSent).
    pub fn add(&mut self, name: &str, status: ContactStatus, created_at: i64) -> Result<u32, OsmError> {
        if self.entries.len() >= MAX_CONTACTS {
            return Err(OsmError::CapacityExceeded);
        }
        let id = self.next_id;
        self.entries.push(Contact {
            id,
            name: name.to_string(),
            status,
            public_key: String::new(),
            unread_count: 0,
            created_at,
        });
        self.next_id += 1;
        Ok(id)
    }

    /// Delete a contact by id, preserving order among survivors. Returns
    /// `true` if a contact was removed.
    pub fn delete(&mut self, id: u32) -> bool {
        let Some(idx) = self.entries.iter().position(|c| c.id == id) else {
            return false;
        };
        self.entries.remove(idx);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_assigns_increasing_ids() {
        let mut contacts = Contacts::new();
        let a = contacts.add("Alice", ContactStatus::PendingSent, 0).unwrap();
        let b = contacts.add("Bob", ContactStatus::PendingSent, 0).unwrap();
        assert_eq!(a, 1);
        assert_eq!(b, 2);
    }

    #[test]
    fn capacity_is_enforced() {
        let mut contacts = Contacts::new();
        for i in 0..MAX_CONTACTS {
            contacts.add(&format!("c{i}"), ContactStatus::PendingSent, 0).unwrap();
        }
        assert!(matches!(
            contacts.add("overflow", ContactStatus::PendingSent, 0),
            Err(OsmError::CapacityExceeded)
        ));
    }

    #[test]
    fn delete_preserves_insertion_order_of_survivors() {
        let mut contacts = Contacts::new();
        let a = contacts.add("Alice", ContactStatus::PendingSent, 0).unwrap();
        let b = contacts.add("Bob", ContactStatus::PendingSent, 0).unwrap();
        let c = contacts.add("Carol", ContactStatus::PendingSent, 0).unwrap();

        contacts.delete(b);

        let ids: Vec<u32> = contacts.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![a, c]);
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::mount(dir.path()).unwrap();

        let mut contacts = Contacts::new();
        contacts.add("Alice", ContactStatus::Established, 100).unwrap();
        contacts.save(&store).unwrap();

        let loaded = Contacts::load(&store).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.find_by_name("Alice").unwrap().created_at, 100);
    }

    #[test]
    fn no_two_contacts_share_a_public_key() {
        let mut contacts = Contacts::new();
        let id = contacts.add("Alice", ContactStatus::Established, 0).unwrap();
        contacts.find_by_id_mut(id).unwrap().public_key = "abc".to_string();
        assert!(contacts.has_public_key("abc"));
        assert!(!contacts.has_public_key("xyz"));
    }
}
