//! `TcpListener`-based [`TransportBackend`] implementation.
//!
//! A stand-in byte-stream carrier for the Companion App link during
//! development and scripted testing; a BLE/packet-oriented backend would
//! implement the same trait without touching fragmentation or reassembly.

use std::io::{ErrorKind, Read, Write};
use std::net::{TcpListener, TcpStream};

use super::{PeerEvent, TransportBackend, MAX_PEERS};

struct Peer {
    stream: TcpStream,
}

/// Listens on a fixed port and accepts up to [`MAX_PEERS`] concurrent
/// connections, each polled non-blockingly.
pub struct TcpBackend {
    port: u16,
    listener: Option<TcpListener>,
    peers: Vec<Option<Peer>>,
}

impl TcpBackend {
    #[must_use]
    pub fn new(port: u16) -> Self {
        Self {
            port,
            listener: None,
            peers: (0..MAX_PEERS).map(|_| None).collect(),
        }
    }

    fn lowest_free_slot(&self) -> Option<usize> {
        self.peers.iter().position(Option::is_none)
    }
}

impl TransportBackend for TcpBackend {
    fn start(&mut self) -> anyhow::Result<()> {
        if self.listener.is_some() {
            return Ok(());
        }
        let listener = TcpListener::bind(("0.0.0.0", self.port))?;
        listener.set_nonblocking(true)?;
        log::info!("transport: listening on port {}", self.port);
        self.listener = Some(listener);
        Ok(())
    }

    fn stop(&mut self) -> anyhow::Result<()> {
        self.listener = None;
        for slot in &mut self.peers {
            *slot = None;
        }
        Ok(())
    }

    fn poll(&mut self) -> Vec<PeerEvent> {
        let mut events = Vec::new();

        if let Some(listener) = &self.listener {
            loop {
                match listener.accept() {
                    Ok((stream, addr)) => {
                        let Some(idx) = self.lowest_free_slot() else {
                            log::warn!("transport: rejecting connection from {addr}, no free slots");
                            continue;
                        };
                        if stream.set_nonblocking(true).is_err() {
                            continue;
                        }
                        log::info!("transport: peer {idx} connected from {addr}");
                        self.peers[idx] = Some(Peer { stream });
                        events.push(PeerEvent::Connected(idx));
                    }
                    Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                    Err(e) => {
                        log::warn!("transport: accept failed: {e}");
                        break;
                    }
                }
            }
        }

        let mut buf = [0u8; 4096];
        for idx in 0..self.peers.len() {
            let Some(peer) = self.peers[idx].as_mut() else {
                continue;
            };
            match peer.stream.read(&mut buf) {
                Ok(0) => {
                    log::info!("transport: peer {idx} disconnected (EOF)");
                    self.peers[idx] = None;
                    events.push(PeerEvent::Disconnected(idx));
                }
                Ok(n) => events.push(PeerEvent::Data(idx, buf[..n].to_vec())),
                Err(e) if e.kind() == ErrorKind::WouldBlock => {}
                Err(e) => {
                    log::warn!("transport: peer {idx} read error: {e}");
                    self.peers[idx] = None;
                    events.push(PeerEvent::Disconnected(idx));
                }
            }
        }

        events
    }

    fn send_raw(&mut self, peer_idx: usize, bytes: &[u8]) -> anyhow::Result<()> {
        let peer = self
            .peers
            .get_mut(peer_idx)
            .and_then(Option::as_mut)
            .ok_or_else(|| anyhow::anyhow!("no peer at slot {peer_idx}"))?;
        peer.stream.write_all(bytes)?;
        Ok(())
    }

    fn connected_count(&self) -> usize {
        self.peers.iter().filter(|p| p.is_some()).count()
    }
}
