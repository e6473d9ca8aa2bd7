//! Crate-wide error kind.
//!
//! Every fallible public function returns `anyhow::Result<T>`; call sites
//! that need to match on error *kind* rather than just bubble a message use
//! [`OsmError`] instead. This is the one place in the crate where error
//! identity matters — everywhere else `anyhow::Context` is enough.

use thiserror::Error;

/// The error taxonomy named by the persistence, crypto, and command-surface
/// designs. Propagation is local: call sites match on the variant, set a
/// sticky flag or emit a `CMD:ERR:` line, and continue. Only a boot-time
/// store-mount failure is allowed to propagate out of `main` via
/// `anyhow::Result`.
#[derive(Debug, Error)]
pub enum OsmError {
    /// Decryption or public-key decoding failed. Dropped silently; never
    /// exposed to the peer that sent the offending bytes.
    #[error("authentication failed")]
    AuthFailed,

    /// A write was rejected for lack of space. Sets the `storage_full`
    /// sticky flag.
    #[error("storage is full")]
    StorageFull,

    /// Any other persistence failure (I/O error, unreadable document).
    /// Sets the `storage_error` sticky flag.
    #[error("storage error: {0}")]
    StorageIo(String),

    /// An add of a contact, message, pending key, or outbox entry above its
    /// capacity. The new entry is rejected; existing entries are untouched.
    #[error("capacity exceeded")]
    CapacityExceeded,

    /// An envelope or document field did not parse.
    #[error("malformed input: {0}")]
    Malformed(String),

    /// A send was requested to a contact that is not yet `Established`.
    #[error("contact is not established")]
    NotEstablished,

    /// A command-surface line did not match any known command.
    #[error("unknown command")]
    Unknown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_failed_message() {
        assert_eq!(OsmError::AuthFailed.to_string(), "authentication failed");
    }

    #[test]
    fn storage_io_carries_detail() {
        let err = OsmError::StorageIo("disk read error".into());
        assert_eq!(err.to_string(), "storage error: disk read error");
    }

    #[test]
    fn converts_into_anyhow() {
        let result: anyhow::Result<()> = Err(OsmError::NotEstablished).map_err(anyhow::Error::from);
        let err = result.unwrap_err();
        assert_eq!(err.to_string(), "contact is not established");
    }
}
