//! Durable queue of envelopes awaiting delivery to a connected peer.
//!
//! At-least-once delivery with ACK-keyed deduplication: an entry stays in
//! the queue, re-armed for resend, until its `msg_id` is acknowledged.

use serde::{Deserialize, Serialize};

use crate::crypto;
use crate::error::OsmError;
use crate::store::Store;

/// Upper bound on the number of queued entries.
pub const MAX_OUTBOX: usize = 32;
const DOC_NAME: &str = "data_outbox.json";

/// One envelope awaiting (re)delivery.
///
/// Field names match the on-disk/wire shape (`uuid` for the routing tag).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxEntry {
    /// Full envelope including its `OSM:KEY:`/`OSM:MSG:` prefix.
    #[serde(default)]
    pub data: String,
    #[serde(default, rename = "uuid")]
    pub char_uuid: u16,
    /// 8-byte truncated SHA-512 of `data`, hex-encoded.
    #[serde(default)]
    pub msg_id: String,
    #[serde(default)]
    pub acked: bool,
    #[serde(default)]
    pub sent: bool,
}

impl OutboxEntry {
    fn new(data: String, char_uuid: u16) -> Self {
        let msg_id = hex_encode(&crypto::fingerprint(data.as_bytes()));
        Self {
            data,
            char_uuid,
            msg_id,
            acked: false,
            sent: false,
        }
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// The in-memory, persisted delivery queue.
#[derive(Debug, Default)]
pub struct Outbox {
    entries: Vec<OutboxEntry>,
    last_connected_count: usize,
}

impl Outbox {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            last_connected_count: 0,
        }
    }

    /// Load from the store, or start empty if no document exists.
    pub fn load(store: &Store) -> Result<Self, OsmError> {
        let Some(bytes) = store.read_file(DOC_NAME) else {
            return Ok(Self::new());
        };
        let text = String::from_utf8_lossy(&bytes);
        let entries: Vec<OutboxEntry> =
            serde_json::from_str(&text).map_err(|e| OsmError::Malformed(e.to_string()))?;
        Ok(Self {
            entries,
            last_connected_count: 0,
        })
    }

    /// Persist the full queue.
    pub fn save(&self, store: &Store) -> Result<(), OsmError> {
        let json = serde_json::to_string(&self.entries).map_err(|e| OsmError::Malformed(e.to_string()))?;
        store.write_file(DOC_NAME, json.as_bytes())
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
    pub fn iter(&self) -> impl Iterator<Item = &OutboxEntry> {
        self.entries.iter()
    }

    /// Enqueue a new envelope. Rejects (logs and drops) once the queue is
    /// at capacity rather than evicting an existing entry.
    pub fn enqueue(&mut self, data: String, char_uuid: u16) -> Result<(), OsmError> {
        if self.entries.len() >= MAX_OUTBOX {
            log::warn!("outbox: queue full, dropping enqueue");
            return Err(OsmError::CapacityExceeded);
        }
        self.entries.push(OutboxEntry::new(data, char_uuid));
        Ok(())
    }

    /// Observe the current connected-peer count. On a 0→≥1 transition,
    /// re-arms every entry (clears `sent`) so reconnect triggers redelivery.
    pub fn observe_peer_count(&mut self, connected_count: usize) {
        if self.last_connected_count == 0 && connected_count > 0 {
            for entry in &mut self.entries {
                entry.sent = false;
            }
        }
        self.last_connected_count = connected_count;
    }

    /// Entries that still need to be broadcast (`sent == false`), provided
    /// at least one peer is connected.
    #[must_use]
    pub fn pending_to_send(&self, connected_count: usize) -> Vec<usize> {
        if connected_count == 0 {
            return Vec::new();
        }
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| !e.sent)
            .map(|(i, _)| i)
            .collect()
    }

    /// Mark an entry sent after a successful broadcast.
    pub fn mark_sent(&mut self, index: usize) {
        if let Some(entry) = self.entries.get_mut(index) {
            entry.sent = true;
        }
    }

    /// Remove the entry whose `msg_id` matches an arrived ACK id. Returns
    /// `true` if an entry was removed.
    pub fn ack(&mut self, msg_id_hex: &str) -> bool {
        let Some(idx) = self.entries.iter().position(|e| e.msg_id == msg_id_hex) else {
            return false;
        };
        self.entries.remove(idx);
        true
    }
}
