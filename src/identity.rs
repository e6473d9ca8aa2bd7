//! The device's long-term keypair.
//!
//! Loaded once at boot and held for the life of the process; mutated only
//! by an explicit KEYGEN, never destroyed once created.

use serde::{Deserialize, Serialize};

use crate::crypto::{self, PrivKey, PubKey};
use crate::error::OsmError;
use crate::store::Store;

const DOC_NAME: &str = "data_identity.json";

/// The device's keypair, held in process-wide state.
#[derive(Debug, Clone)]
pub struct Identity {
    pub pubkey: PubKey,
    pub privkey: PrivKey,
    pub valid: bool,
}

#[derive(Serialize, Deserialize)]
struct IdentityDoc {
    #[serde(default)]
    pubkey: String,
    #[serde(default)]
    privkey: String,
}

impl Identity {
    /// An identity with no key material, `valid = false`.
    fn empty() -> Self {
        Self {
            pubkey: [0u8; crypto::KEY_LEN],
            privkey: [0u8; crypto::KEY_LEN],
            valid: false,
        }
    }

    /// Generate a fresh keypair, not yet persisted.
    #[must_use]
    pub fn generate() -> Self {
        let (pubkey, privkey) = crypto::generate_identity();
        Self {
            pubkey,
            privkey,
            valid: true,
        }
    }

    /// Load the identity document from the store. Returns an invalid,
    /// empty identity if no document exists yet — callers decide whether
    /// that means "run setup" or "auto-generate" (see App Core).
    pub fn load(store: &Store) -> Result<Self, OsmError> {
        let Some(bytes) = store.read_file(DOC_NAME) else {
            return Ok(Self::empty());
        };

        let text = String::from_utf8_lossy(&bytes);
        let doc: IdentityDoc =
            serde_json::from_str(&text).map_err(|e| OsmError::Malformed(e.to_string()))?;

        let pubkey = crypto::b64_to_pubkey(&doc.pubkey)?;
        let privkey = crypto::b64_to_pubkey(&doc.privkey)?;

        Ok(Self {
            pubkey,
            privkey,
            valid: true,
        })
    }

    /// Persist the identity document in full.
    pub fn save(&self, store: &Store) -> Result<(), OsmError> {
        let doc = IdentityDoc {
            pubkey: crypto::pubkey_to_b64(&self.pubkey),
            privkey: crypto::pubkey_to_b64(&self.privkey),
        };
        let json = serde_json::to_string(&doc).map_err(|e| OsmError::Malformed(e.to_string()))?;
        store.write_file(DOC_NAME, json.as_bytes())
    }

    /// Base64 of the public key, the form carried on the wire.
    #[must_use]
    pub fn pubkey_b64(&self) -> String {
        crypto::pubkey_to_b64(&self.pubkey)
    }
}
