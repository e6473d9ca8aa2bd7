//! Outer byte-stream frame and inner fragment codec.
//!
//! The outer frame's integers are big-endian; the inner fragment's are
//! little-endian. This asymmetry is intentional (see module docs on
//! [`crate::transport`]) and must not be "fixed" to one endianness.

use crate::crypto;

/// Maximum Transmission Unit for a single fragment, header included.
pub const MTU: usize = 200;
/// Fragment header size: flags(1) + seq(2).
pub const FRAGMENT_HEADER_LEN: usize = 3;
/// Largest reassembled message this transport will hold in memory.
pub const MAX_MSG: usize = 4096;

pub const FLAG_START: u8 = 0x01;
pub const FLAG_END: u8 = 0x02;
pub const FLAG_ACK: u8 = 0x04;

/// Encode the outer length-prefixed frame: `[len:u32 BE][char_uuid:u16 BE][payload]`.
#[must_use]
pub fn encode_outer_frame(char_uuid: u16, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + 2 + payload.len());
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(&char_uuid.to_be_bytes());
    out.extend_from_slice(payload);
    out
}

/// Incrementally decodes outer frames from a byte-stream peer, tolerating
/// partial reads split across arbitrary socket boundaries.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Feed freshly-read bytes in. Call `next_frame` afterward (possibly
    /// more than once) to drain any frames now complete.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Pop the next complete `(char_uuid, payload)` frame, if the buffer
    /// holds one.
    pub fn next_frame(&mut self) -> Option<(u16, Vec<u8>)> {
        if self.buf.len() < 6 {
            return None;
        }
        let msg_len = u32::from_be_bytes(self.buf[0..4].try_into().ok()?) as usize;
        let total = 6 + msg_len;
        if self.buf.len() < total {
            return None;
        }
        let char_uuid = u16::from_be_bytes(self.buf[4..6].try_into().ok()?);
        let payload = self.buf[6..total].to_vec();
        self.buf.drain(0..total);
        Some((char_uuid, payload))
    }
}

/// Split a logical message into ordered fragments under `MTU`.
///
/// The first fragment carries a 2-byte little-endian total length ahead of
/// its payload slice; every fragment after that carries pure payload.
#[must_use]
pub fn fragment(message: &[u8]) -> Vec<Vec<u8>> {
    let max_payload = MTU - FRAGMENT_HEADER_LEN;
    let mut fragments = Vec::new();
    let mut seq: u16 = 0;
    let mut offset = 0usize;
    let total_len = message.len() as u16;

    loop {
        let is_first = offset == 0;
        let header_extra = if is_first { 2 } else { 0 };
        let room = max_payload - header_extra;
        let remaining = message.len() - offset;
        let take = remaining.min(room);
        let is_last = offset + take >= message.len();

        let mut flags = 0u8;
        if is_first {
            flags |= FLAG_START;
        }
        if is_last {
            flags |= FLAG_END;
        }

        let mut frame = Vec::with_capacity(FRAGMENT_HEADER_LEN + header_extra + take);
        frame.push(flags);
        frame.extend_from_slice(&seq.to_le_bytes());
        if is_first {
            frame.extend_from_slice(&total_len.to_le_bytes());
        }
        frame.extend_from_slice(&message[offset..offset + take]);
        fragments.push(frame);

        offset += take;
        seq += 1;
        if is_last {
            break;
        }
    }

    fragments
}

/// Per-peer reassembly state for the receive path.
#[derive(Debug)]
pub struct Reassembler {
    buf: Vec<u8>,
    expected_total: usize,
    expected_seq: u16,
    active: bool,
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of feeding one fragment into a [`Reassembler`].
#[derive(Debug, PartialEq, Eq)]
pub enum FragmentOutcome {
    /// Not yet a complete message; keep reading.
    Incomplete,
    /// Reassembly was abandoned (malformed START, out-of-sequence fragment,
    /// or overflow). No data was delivered.
    Dropped,
    /// An 8-byte ACK id arrived; no reassembly state changed.
    Ack([u8; 8]),
    /// A full message was reassembled.
    Complete(Vec<u8>),
}

impl Reassembler {
    #[must_use]
    pub fn new() -> Self {
        Self {
            buf: Vec::new(),
            expected_total: 0,
            expected_seq: 0,
            active: false,
        }
    }

    /// Feed one inner fragment (header + payload) into the state machine.
    pub fn feed(&mut self, fragment: &[u8]) -> FragmentOutcome {
        if fragment.len() < FRAGMENT_HEADER_LEN {
            self.active = false;
            return FragmentOutcome::Dropped;
        }
        let flags = fragment[0];
        let seq = u16::from_le_bytes([fragment[1], fragment[2]]);
        let payload = &fragment[FRAGMENT_HEADER_LEN..];

        if flags & FLAG_ACK != 0 {
            if payload.len() == 8 {
                let mut id = [0u8; 8];
                id.copy_from_slice(payload);
                return FragmentOutcome::Ack(id);
            }
            return FragmentOutcome::Dropped;
        }

        if flags & FLAG_START != 0 {
            if payload.len() < 2 {
                self.active = false;
                return FragmentOutcome::Dropped;
            }
            let total = u16::from_le_bytes([payload[0], payload[1]]) as usize;
            if total > MAX_MSG {
                self.active = false;
                return FragmentOutcome::Dropped;
            }
            self.buf.clear();
            self.expected_total = total;
            self.expected_seq = 0;
            self.active = true;

            let data = &payload[2..];
            if self.buf.len() + data.len() > MAX_MSG {
                self.active = false;
                return FragmentOutcome::Dropped;
            }
            self.buf.extend_from_slice(data);
        } else {
            if !self.active || seq != self.expected_seq {
                self.active = false;
                return FragmentOutcome::Dropped;
            }
            if self.buf.len() + payload.len() > MAX_MSG {
                self.active = false;
                return FragmentOutcome::Dropped;
            }
            self.buf.extend_from_slice(payload);
        }

        if !self.active {
            return FragmentOutcome::Dropped;
        }

        self.expected_seq = self.expected_seq.wrapping_add(1);

        if flags & FLAG_END != 0 {
            self.active = false;
            let message = std::mem::take(&mut self.buf);
            return FragmentOutcome::Complete(message);
        }

        FragmentOutcome::Incomplete
    }

    /// Abandon any in-flight assembly, e.g. on peer disconnect.
    pub fn cancel(&mut self) {
        self.active = false;
        self.buf.clear();
    }
}

/// Compute the 8-byte fingerprint ACK id for a reassembled payload.
#[must_use]
pub fn ack_id(payload: &[u8]) -> [u8; 8] {
    crypto::fingerprint(payload)
}

/// Encode an ACK fragment carrying `id` on the device→host channel.
#[must_use]
pub fn encode_ack_fragment(id: [u8; 8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(FRAGMENT_HEADER_LEN + 8);
    frame.push(FLAG_ACK);
    frame.extend_from_slice(&0u16.to_le_bytes());
    frame.extend_from_slice(&id);
    frame
}
