//! Encrypted secret store (C2): envelope encryption for platform tokens.
//!
//! Grounded on the teacher's `source/connector/crypto.rs` AES-256-GCM
//! blob format (`nonce(12) || ciphertext || tag(16)`), adapted to derive
//! the symmetric key once per process from a configuration secret via
//! PBKDF2 rather than from a random key file, per the spec's "process-wide
//! configuration secret via a password-based KDF" contract.

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm};
use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;

use crate::error::CryptoError;

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const PBKDF2_ITERATIONS: u32 = 120_000;

/// Derives the process-wide symmetric key and performs AEAD seal/open.
///
/// One `SecretStore` is built at process start from `ENCRYPTION_KEY` and
/// the stable salt stored alongside configuration, then shared (behind an
/// `Arc`) by every component that persists tokens. It never logs the
/// derived key or any plaintext it handles.
#[derive(Clone)]
pub struct SecretStore {
    key: [u8; KEY_LEN],
}

impl SecretStore {
    /// Derive the symmetric key from `secret` and `salt` via PBKDF2-HMAC-SHA256.
    ///
    /// `salt` must be stable across process restarts — callers persist it
    /// alongside configuration rather than regenerating it, or every
    /// previously-sealed blob becomes unopenable.
    pub fn derive(secret: &str, salt: &[u8]) -> Self {
        let mut key = [0u8; KEY_LEN];
        pbkdf2_hmac::<Sha256>(secret.as_bytes(), salt, PBKDF2_ITERATIONS, &mut key);
        Self { key }
    }

    /// Seal plaintext bytes into `nonce(12) || ciphertext_with_tag`.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let cipher = Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| CryptoError::KeyDerivation { message: e.to_string() })?;
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        let ciphertext = cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| CryptoError::Tamper)?;

        let mut blob = nonce.to_vec();
        blob.extend_from_slice(&ciphertext);
        Ok(blob)
    }

    /// Open a blob produced by [`SecretStore::seal`]. Any tamper (wrong
    /// key, corrupted ciphertext, flipped tag byte) yields `CryptoTamper`.
    pub fn open(&self, blob: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if blob.len() < NONCE_LEN + 16 {
            return Err(CryptoError::MalformedBlob);
        }
        let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);
        let nonce = aes_gcm::Nonce::from_slice(nonce_bytes);

        let cipher = Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| CryptoError::KeyDerivation { message: e.to_string() })?;

        cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| CryptoError::Tamper)
    }
}

impl std::fmt::Debug for SecretStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretStore").field("key", &"<redacted>").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SecretStore {
        SecretStore::derive("unit-test-secret", b"stable-salt-0001")
    }

    #[test]
    fn round_trip_encrypt_decrypt() {
        let store = store();
        let plaintext = b"my-secret-refresh-token";
        let blob = store.seal(plaintext).unwrap();
        assert_ne!(blob, plaintext);
        assert_eq!(store.open(&blob).unwrap(), plaintext);
    }

    #[test]
    fn empty_plaintext_round_trips() {
        let store = store();
        let blob = store.seal(b"").unwrap();
        assert_eq!(store.open(&blob).unwrap(), b"");
    }

    #[test]
    fn wrong_key_fails() {
        let a = SecretStore::derive("secret-a", b"stable-salt-0001");
        let b = SecretStore::derive("secret-b", b"stable-salt-0001");
        let blob = a.seal(b"token").unwrap();
        assert!(b.open(&blob).is_err());
    }

    #[test]
    fn different_salt_yields_different_key() {
        let a = SecretStore::derive("same-secret", b"salt-one-------1");
        let b = SecretStore::derive("same-secret", b"salt-two-------2");
        let blob = a.seal(b"token").unwrap();
        assert!(b.open(&blob).is_err());
    }

    #[test]
    fn corrupt_ciphertext_fails_with_tamper() {
        let store = store();
        let mut blob = store.seal(b"token").unwrap();
        let last = blob.len() - 1;
        blob[last] ^= 0xFF;
        let err = store.open(&blob).unwrap_err();
        assert!(matches!(err, CryptoError::Tamper));
    }

    #[test]
    fn short_blob_fails_malformed() {
        let store = store();
        let err = store.open(&[0u8; 4]).unwrap_err();
        assert!(matches!(err, CryptoError::MalformedBlob));
    }

    #[test]
    fn derive_is_deterministic_given_same_secret_and_salt() {
        let store = store();
        let blob = store.seal(b"token").unwrap();
        let rederived = store();
        assert_eq!(rederived.open(&blob).unwrap(), b"token");
    }

    #[test]
    fn debug_impl_never_prints_key_material() {
        let store = store();
        let rendered = format!("{store:?}");
        assert!(rendered.contains("redacted"));
    }
}
