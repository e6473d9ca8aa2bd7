//! Identity keypairs and authenticated message encryption.
//!
//! Primitives: X25519 key agreement bundled with XSalsa20-Poly1305
//! authenticated encryption (the "crypto_box" construction). Scratch
//! buffers that hold key material or ciphertext are wrapped in
//! `zeroize::Zeroizing`, so they are wiped on every exit path — including
//! early-return error paths — without an explicit zeroize call at each one.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use crypto_box::aead::generic_array::GenericArray;
use crypto_box::{aead::Aead, aead::OsRng, PublicKey, SalsaBox, SecretKey};
use sha2::{Digest, Sha512};
use zeroize::Zeroizing;

use crate::error::OsmError;

/// Length of a raw X25519 public or private key.
pub const KEY_LEN: usize = 32;
/// Length of the crypto_box nonce.
const NONCE_LEN: usize = 24;
/// Length of the Poly1305 authentication tag appended by `SalsaBox`.
const TAG_LEN: usize = 16;
/// Largest plaintext `encrypt` will accept.
pub const MAX_PLAINTEXT_LEN: usize = 1024;
/// Number of leading bytes of SHA-512 used as a fingerprint.
pub const FINGERPRINT_LEN: usize = 8;
/// Encoded length of a base64-STANDARD 32-byte public key (44 chars incl. one `=`).
pub const PUBKEY_B64_LEN: usize = 44;

/// A 32-byte X25519 public key.
pub type PubKey = [u8; KEY_LEN];
/// A 32-byte X25519 private key.
pub type PrivKey = [u8; KEY_LEN];

/// Generate a fresh identity keypair.
///
/// The public key is derived deterministically from the private key via
/// fixed-base scalar multiplication; the private key is drawn from the
/// host's secure randomness source.
#[must_use]
pub fn generate_identity() -> (PubKey, PrivKey) {
    let secret = SecretKey::generate(&mut OsRng);
    let public = secret.public_key();
    (*public.as_bytes(), *secret.as_bytes())
}

/// Encrypt `plaintext` for `peer_pub` under `own_priv`.
///
/// Returns base64 of `nonce(24) || ciphertext || tag(16)`. Fails if
/// `plaintext` exceeds [`MAX_PLAINTEXT_LEN`] bytes.
pub fn encrypt(plaintext: &[u8], peer_pub: &PubKey, own_priv: &PrivKey) -> Result<String, OsmError> {
    if plaintext.len() > MAX_PLAINTEXT_LEN {
        return Err(OsmError::Malformed("plaintext exceeds maximum length".into()));
    }

    let secret = SecretKey::from(*own_priv);
    let public = PublicKey::from(*peer_pub);
    let cbox = SalsaBox::new(&public, &secret);
    drop(secret);

    let nonce = crypto_box::generate_nonce(&mut OsRng);
    let mut ciphertext = cbox
        .encrypt(&nonce, plaintext)
        .map_err(|_| OsmError::AuthFailed)?;

    let mut out: Zeroizing<Vec<u8>> = Zeroizing::new(Vec::with_capacity(NONCE_LEN + ciphertext.len()));
    out.extend_from_slice(&nonce);
    out.append(&mut ciphertext);
    Ok(BASE64.encode(&*out))
}

/// Decrypt an `encrypt`-produced envelope.
///
/// Fails with [`OsmError::AuthFailed`] for any malformed input or failed
/// authentication — the two cases are indistinguishable to the caller.
pub fn decrypt(envelope_b64: &str, peer_pub: &PubKey, own_priv: &PrivKey) -> Result<Vec<u8>, OsmError> {
    let raw: Zeroizing<Vec<u8>> = Zeroizing::new(
        BASE64
            .decode(envelope_b64.trim_end())
            .map_err(|_| OsmError::AuthFailed)?,
    );

    if raw.len() < NONCE_LEN + TAG_LEN + 1 {
        return Err(OsmError::AuthFailed);
    }

    let (nonce_bytes, ciphertext) = raw.split_at(NONCE_LEN);
    let nonce = GenericArray::clone_from_slice(nonce_bytes);

    let secret = SecretKey::from(*own_priv);
    let public = PublicKey::from(*peer_pub);
    let cbox = SalsaBox::new(&public, &secret);
    drop(secret);

    cbox.decrypt(&nonce, ciphertext).map_err(|_| OsmError::AuthFailed)
}

/// Encode a public key as standard base64 (44 characters).
#[must_use]
pub fn pubkey_to_b64(pub_key: &PubKey) -> String {
    BASE64.encode(pub_key)
}

/// Decode a base64-encoded public key. Fails unless it decodes to exactly
/// [`KEY_LEN`] bytes.
pub fn b64_to_pubkey(encoded: &str) -> Result<PubKey, OsmError> {
    let bytes = BASE64
        .decode(encoded.trim_end())
        .map_err(|_| OsmError::Malformed("invalid base64 public key".into()))?;
    bytes
        .try_into()
        .map_err(|_| OsmError::Malformed("public key is not 32 bytes".into()))
}

/// First 8 bytes of SHA-512 of arbitrary bytes. Used both for public key
/// fingerprints and for transport-layer ACK ids — identifies a byte
/// sequence for deduplication, not an authentication tag.
#[must_use]
pub fn fingerprint(data: &[u8]) -> [u8; FINGERPRINT_LEN] {
    let hash = Sha512::digest(data);
    let mut out = [0u8; FINGERPRINT_LEN];
    out.copy_from_slice(&hash[..FINGERPRINT_LEN]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let (a_pub, a_priv) = generate_identity();
        let (b_pub, b_priv) = generate_identity();
        let plaintext = b"Hello Bob, this is a secret message!";

        let envelope = encrypt(plaintext, &b_pub, &a_priv).unwrap();
        assert!(!envelope.is_empty());

        let decrypted = decrypt(&envelope, &a_pub, &b_priv).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn wrong_key_rejection() {
        let (a_pub, a_priv) = generate_identity();
        let (b_pub, _b_priv) = generate_identity();
        let (_e_pub, e_priv) = generate_identity();

        let envelope = encrypt(b"Secret", &b_pub, &a_priv).unwrap();
        assert!(matches!(decrypt(&envelope, &a_pub, &e_priv), Err(OsmError::AuthFailed)));
    }

    #[test]
    fn nonce_freshness() {
        let (_a_pub, a_priv) = generate_identity();
        let (b_pub, _b_priv) = generate_identity();

        let e1 = encrypt(b"same plaintext", &b_pub, &a_priv).unwrap();
        let e2 = encrypt(b"same plaintext", &b_pub, &a_priv).unwrap();

        let d1 = BASE64.decode(&e1).unwrap();
        let d2 = BASE64.decode(&e2).unwrap();
        assert_ne!(&d1[..NONCE_LEN], &d2[..NONCE_LEN]);
    }

    #[test]
    fn pubkey_b64_length() {
        let (pub_key, _priv) = generate_identity();
        assert_eq!(pubkey_to_b64(&pub_key).len(), PUBKEY_B64_LEN);
    }

    #[test]
    fn pubkey_roundtrip() {
        let (pub_key, _priv) = generate_identity();
        let encoded = pubkey_to_b64(&pub_key);
        let decoded = b64_to_pubkey(&encoded).unwrap();
        assert_eq!(decoded, pub_key);
    }

    #[test]
    fn bad_pubkey_rejected() {
        assert!(b64_to_pubkey("not base64 at all!!").is_err());
        assert!(b64_to_pubkey(&BASE64.encode(b"too short")).is_err());
    }

    #[test]
    fn plaintext_too_long_rejected() {
        let (b_pub, _) = generate_identity();
        let (_, a_priv) = generate_identity();
        let huge = vec![b'A'; MAX_PLAINTEXT_LEN + 1];
        assert!(encrypt(&huge, &b_pub, &a_priv).is_err());
    }

    #[test]
    fn decrypt_rejects_truncated_envelope() {
        let (a_pub, _a_priv) = generate_identity();
        let (_b_pub, b_priv) = generate_identity();
        let short = BASE64.encode(b"too short to contain nonce+tag");
        assert!(matches!(decrypt(&short, &a_pub, &b_priv), Err(OsmError::AuthFailed)));
    }

    #[test]
    fn fingerprint_is_stable_and_truncated() {
        let a = fingerprint(b"hello world");
        let b = fingerprint(b"hello world");
        assert_eq!(a, b);
        assert_eq!(a.len(), FINGERPRINT_LEN);

        let c = fingerprint(b"hello world!");
        assert_ne!(a, c);
    }
}
