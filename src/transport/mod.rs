//! Byte-stream transport: framing, fragmentation, reassembly, and the
//! backend abstraction that lets a TCP listener and (eventually) a
//! packet-oriented BLE backend share the same upper layers.
//!
//! The outer frame's integers are big-endian; the inner fragment's are
//! little-endian — load-bearing for wire compatibility, not a bug.

pub mod frame;
pub mod tcp;

use std::collections::HashMap;

use frame::{FragmentOutcome, Reassembler};

/// Routing tag for the device→host notification channel.
pub const CHAR_NOTIFY: u16 = 0xFE02;
/// Routing tag for the host→device write channel.
pub const CHAR_WRITE: u16 = 0xFE03;
/// Routing tag for the status channel.
pub const CHAR_STATUS: u16 = 0xFE04;
/// Routing tag for the read-only device-info channel.
pub const CHAR_INFO: u16 = 0xFE05;

/// Maximum number of concurrently connected peers.
pub const MAX_PEERS: usize = 4;

/// The capability set a transport backend must provide. Fragmentation,
/// reassembly, ACK handling, and the outbox are written once against this
/// trait and are backend-independent.
pub trait TransportBackend {
    /// Start listening/advertising. Idempotent if already started.
    fn start(&mut self) -> anyhow::Result<()>;

    /// Stop: close every peer connection and the listening socket. No
    /// callbacks fire after this returns.
    fn stop(&mut self) -> anyhow::Result<()>;

    /// Non-blocking poll: accept new peers, drain readable bytes from
    /// existing ones. Returns `(peer_idx, bytes)` for every chunk read
    /// this call, and reports disconnects via `Disconnected`.
    fn poll(&mut self) -> Vec<PeerEvent>;

    /// Send raw bytes to a specific connected peer slot. May block briefly
    /// if the peer's socket buffer is full.
    fn send_raw(&mut self, peer_idx: usize, bytes: &[u8]) -> anyhow::Result<()>;

    /// Number of currently connected peer slots.
    fn connected_count(&self) -> usize;
}

/// One event surfaced by a backend's `poll`.
#[derive(Debug)]
pub enum PeerEvent {
    Connected(usize),
    Disconnected(usize),
    Data(usize, Vec<u8>),
}

/// A delivered, fully reassembled envelope.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub peer_idx: usize,
    pub char_uuid: u16,
    pub bytes: Vec<u8>,
}

/// Owns the backend plus per-peer framing/reassembly state, and exposes a
/// simple `poll` → deliveries + ACK ids interface to the App Core.
pub struct Transport {
    backend: Box<dyn TransportBackend>,
    decoders: HashMap<usize, frame::FrameDecoder>,
    reassemblers: HashMap<usize, Reassembler>,
}

impl Transport {
    #[must_use]
    pub fn new(backend: Box<dyn TransportBackend>) -> Self {
        Self {
            backend,
            decoders: HashMap::new(),
            reassemblers: HashMap::new(),
        }
    }

    pub fn start(&mut self) -> anyhow::Result<()> {
        self.backend.start()
    }

    /// Idempotent start, tolerant of an already-running backend. Called
    /// once per loop tick so `AppCore::tick` stays a single self-contained
    /// entry point for both production and tests.
    pub fn start_if_needed(&mut self) {
        if let Err(e) = self.start() {
            log::debug!("transport: start (already running or failed): {e}");
        }
    }

    pub fn stop(&mut self) -> anyhow::Result<()> {
        self.decoders.clear();
        self.reassemblers.clear();
        self.backend.stop()
    }

    #[must_use]
    pub fn connected_count(&self) -> usize {
        self.backend.connected_count()
    }

    /// Drive accept/read for every peer and reassemble any completed
    /// messages. Returns delivered application-level envelopes and any ACK
    /// ids that arrived this tick.
    pub fn poll(&mut self) -> (Vec<Delivery>, Vec<[u8; 8]>) {
        let mut deliveries = Vec::new();
        let mut acks = Vec::new();

        for event in self.backend.poll() {
            match event {
                PeerEvent::Connected(idx) => {
                    self.decoders.insert(idx, frame::FrameDecoder::new());
                    self.reassemblers.insert(idx, Reassembler::new());
                }
                PeerEvent::Disconnected(idx) => {
                    self.decoders.remove(&idx);
                    self.reassemblers.remove(&idx);
                }
                PeerEvent::Data(idx, bytes) => {
                    let decoder = self.decoders.entry(idx).or_default();
                    decoder.feed(&bytes);
                    while let Some((char_uuid, payload)) = decoder.next_frame() {
                        let reassembler = self.reassemblers.entry(idx).or_default();
                        match reassembler.feed(&payload) {
                            FragmentOutcome::Complete(message) => {
                                let ack = frame::ack_id(&message);
                                self.send_ack(idx, ack);
                                deliveries.push(Delivery {
                                    peer_idx: idx,
                                    char_uuid,
                                    bytes: message,
                                });
                            }
                            FragmentOutcome::Ack(id) => acks.push(id),
                            FragmentOutcome::Incomplete | FragmentOutcome::Dropped => {}
                        }
                    }
                }
            }
        }

        (deliveries, acks)
    }

    fn send_ack(&mut self, peer_idx: usize, id: [u8; 8]) {
        let ack_fragment = frame::encode_ack_fragment(id);
        let outer = frame::encode_outer_frame(CHAR_NOTIFY, &ack_fragment);
        if let Err(e) = self.backend.send_raw(peer_idx, &outer) {
            log::warn!("transport: failed to send ACK to peer {peer_idx}: {e}");
        }
    }

    /// Fragment and frame `message` to every connected peer on `char_uuid`.
    /// Tolerates per-peer failures; returns the count of peers it
    /// succeeded against.
    pub fn broadcast(&mut self, char_uuid: u16, message: &[u8]) -> usize {
        let peer_indices: Vec<usize> = self.decoders.keys().copied().collect();
        let mut ok_count = 0;
        for idx in peer_indices {
            let mut failed = false;
            for fragment in frame::fragment(message) {
                let outer = frame::encode_outer_frame(char_uuid, &fragment);
                if self.backend.send_raw(idx, &outer).is_err() {
                    failed = true;
                    break;
                }
            }
            if !failed {
                ok_count += 1;
            }
        }
        ok_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// In-memory backend stand-in for end-to-end tests: no real sockets.
    /// Tests hold a clone of `pending_events` to inject events between
    /// `poll` calls, simulating accepts/reads arriving over time.
    struct MemoryBackend {
        connected: Rc<RefCell<usize>>,
        pending_events: Rc<RefCell<Vec<PeerEvent>>>,
        sent: Rc<RefCell<Vec<(usize, Vec<u8>)>>>,
    }

    impl TransportBackend for MemoryBackend {
        fn start(&mut self) -> anyhow::Result<()> {
            Ok(())
        }
        fn stop(&mut self) -> anyhow::Result<()> {
            Ok(())
        }
        fn poll(&mut self) -> Vec<PeerEvent> {
            std::mem::take(&mut *self.pending_events.borrow_mut())
        }
        fn send_raw(&mut self, peer_idx: usize, bytes: &[u8]) -> anyhow::Result<()> {
            self.sent.borrow_mut().push((peer_idx, bytes.to_vec()));
            Ok(())
        }
        fn connected_count(&self) -> usize {
            *self.connected.borrow()
        }
    }

    fn harness() -> (Transport, Rc<RefCell<Vec<PeerEvent>>>, Rc<RefCell<usize>>) {
        let pending_events = Rc::new(RefCell::new(Vec::new()));
        let connected = Rc::new(RefCell::new(0));
        let backend = MemoryBackend {
            connected: connected.clone(),
            pending_events: pending_events.clone(),
            sent: Rc::new(RefCell::new(Vec::new())),
        };
        (Transport::new(Box::new(backend)), pending_events, connected)
    }

    #[test]
    fn connect_then_single_fragment_message_is_delivered() {
        let (mut transport, pending_events, connected) = harness();
        *connected.borrow_mut() = 1;
        pending_events.borrow_mut().push(PeerEvent::Connected(0));

        let (deliveries, _) = transport.poll();
        assert!(deliveries.is_empty());

        let fragment = frame::fragment(b"OSM:KEY:abc").remove(0);
        let outer = frame::encode_outer_frame(CHAR_WRITE, &fragment);
        pending_events.borrow_mut().push(PeerEvent::Data(0, outer));

        let (deliveries, _) = transport.poll();
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].bytes, b"OSM:KEY:abc");
        assert_eq!(deliveries[0].char_uuid, CHAR_WRITE);
    }

    #[test]
    fn disconnect_clears_reassembly_state_for_that_peer() {
        let (mut transport, pending_events, connected) = harness();
        *connected.borrow_mut() = 1;
        pending_events.borrow_mut().push(PeerEvent::Connected(0));
        transport.poll();
        assert!(transport.reassemblers.contains_key(&0));

        pending_events.borrow_mut().push(PeerEvent::Disconnected(0));
        transport.poll();
        assert!(!transport.reassemblers.contains_key(&0));
    }

    #[test]
    fn broadcast_fragments_and_frames_to_every_connected_peer() {
        let (mut transport, pending_events, connected) = harness();
        *connected.borrow_mut() = 2;
        pending_events.borrow_mut().push(PeerEvent::Connected(0));
        pending_events.borrow_mut().push(PeerEvent::Connected(1));
        transport.poll();

        let sent_count = transport.broadcast(CHAR_NOTIFY, b"OSM:MSG:abc");
        assert_eq!(sent_count, 2);
    }
}
