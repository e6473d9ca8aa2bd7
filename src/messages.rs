//! In-memory message log with stable integer ids.
//!
//! Mirrors `contacts.rs`'s bounded-`Vec`, insertion-order contract.

use serde::{Deserialize, Serialize};

use crate::error::OsmError;
use crate::store::Store;

/// Upper bound on the number of messages held at once.
pub const MAX_MESSAGES: usize = 256;
/// Longest plaintext a message may carry.
pub const MAX_PLAINTEXT_LEN: usize = 1023;
/// Longest ciphertext envelope a message may carry.
pub const MAX_CIPHERTEXT_LEN: usize = 2047;
const DOC_NAME: &str = "data_messages.json";

/// Who originated a message. Persisted as a small integer (`0|1`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum Direction {
    Sent,
    Received,
}

impl Direction {
    #[must_use]
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Sent => 0,
            Self::Received => 1,
        }
    }

    #[must_use]
    pub fn from_u8(value: u8) -> Self {
        if value == 1 {
            Self::Received
        } else {
            Self::Sent
        }
    }
}

impl Default for Direction {
    fn default() -> Self {
        Self::Sent
    }
}

impl From<u8> for Direction {
    fn from(value: u8) -> Self {
        Self::from_u8(value)
    }
}

impl From<Direction> for u8 {
    fn from(value: Direction) -> Self {
        value.as_u8()
    }
}

/// A single message, sent or received.
///
/// Field names and the `ciphertext` omission match the on-disk/wire shape
/// exactly: the ciphertext is kept in RAM for retransmission diagnostics
/// but is not part of the persisted document, so it comes back empty
/// after a reload — callers needing it must re-derive it from `plaintext`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub id: u32,
    #[serde(default, rename = "cid")]
    pub contact_id: u32,
    #[serde(default, rename = "dir")]
    pub direction: Direction,
    #[serde(default, rename = "text")]
    pub plaintext: String,
    #[serde(skip)]
    pub ciphertext: String,
    #[serde(default, rename = "ts")]
    pub timestamp: i64,
}

/// The in-memory message collection.
#[derive(Debug, Default)]
pub struct Messages {
    entries: Vec<Message>,
    next_id: u32,
}

impl Messages {
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
        let entries: Vec<Message> =
            serde_json::from_str(&text).map_err(|e| OsmError::Malformed(e.to_string()))?;
        let next_id = entries.iter().map(|m| m.id).max().unwrap_or(0) + 1;
        Ok(Self { entries, next_id })
    }

    /// Persist the full collection.
    pub fn save(&self, store: &Store) -> Result<(), OsmError> {
        let json = serde_json::to_string(&self.entries).map_err(|e| OsmError::Malformed(e.to_string()))?;
        store.write_file(DOC_NAME, json.as_bytes())
    }

    #[must_use]
    pub fn iter(&self) -> impl Iterator<Item = &Message> {
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
    pub fn count_for(&self, contact_id: u32) -> usize {
        self.entries.iter().filter(|m| m.contact_id == contact_id).count()
    }

    pub fn add(
        &mut self,
        contact_id: u32,
        direction: Direction,
        plaintext: &str,
        ciphertext: &str,
        timestamp: i64,
    ) -> Result<u32, OsmError> {
        if self.entries.len() >= MAX_MESSAGES {
            return Err(OsmError::CapacityExceeded);
        }
        if plaintext.len() > MAX_PLAINTEXT_LEN || ciphertext.len() > MAX_CIPHERTEXT_LEN {
            return Err(OsmError::Malformed("message exceeds maximum length".into()));
        }
        let id = self.next_id;
        self.entries.push(Message {
            id,
            contact_id,
            direction,
            plaintext: plaintext.to_string(),
            ciphertext: ciphertext.to_string(),
            timestamp,
        });
        self.next_id += 1;
        Ok(id)
    }

    /// Delete every message belonging to `contact_id`. Used by contact
    /// cascade delete; returns the number of messages removed.
    pub fn delete_for_contact(&mut self, contact_id: u32) -> usize {
        let before = self.entries.len();
        self.entries.retain(|m| m.contact_id != contact_id);
        before - self.entries.len()
    }
}
