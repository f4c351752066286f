//! Symmetric encryption of stored credentials (spec.md §3 Credentials).
//!
//! A single process-wide key, derived from an environment secret, seals
//! every Google OAuth token and phpBB session cookie before it touches
//! the store. Each ciphertext carries its own random nonce so the same
//! plaintext never produces the same bytes twice.

use base64::{engine::general_purpose::STANDARD, Engine};
use chacha20poly1305::{
    aead::{Aead, KeyInit, OsRng},
    ChaCha20Poly1305, Key, Nonce,
};
use rand::RngCore;
use thiserror::Error;

const NONCE_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum CredentialCipherError {
    #[error("encryption key must be 32 bytes, got {0}")]
    BadKeyLength(usize),
    #[error("ciphertext is truncated or corrupt")]
    Truncated,
    #[error("decryption failed (wrong key or tampered ciphertext)")]
    DecryptFailed,
    #[error("ciphertext is not valid base64: {0}")]
    BadEncoding(#[from] base64::DecodeError),
}

/// Seals/opens credential blobs with a process-wide key.
///
/// The key is expected from an environment variable
/// (`LATTICEFLOW_CREDENTIAL_KEY`, 32 raw bytes, base64-encoded) rather
/// than ever being persisted — spec.md §3 calls this "a symmetric key
/// derived from a process-wide secret".
#[derive(Clone)]
pub struct CredentialCipher {
    cipher: ChaCha20Poly1305,
}

impl CredentialCipher {
    pub fn from_key_bytes(key: &[u8]) -> Result<Self, CredentialCipherError> {
        if key.len() != 32 {
            return Err(CredentialCipherError::BadKeyLength(key.len()));
        }
        let key = Key::from_slice(key);
        Ok(Self {
            cipher: ChaCha20Poly1305::new(key),
        })
    }

    pub fn from_base64_key(encoded: &str) -> Result<Self, CredentialCipherError> {
        let bytes = STANDARD.decode(encoded)?;
        Self::from_key_bytes(&bytes)
    }

    /// Seal plaintext into `base64(nonce || ciphertext)`.
    pub fn seal(&self, plaintext: &str) -> String {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .expect("chacha20poly1305 encryption is infallible for valid keys");

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        STANDARD.encode(out)
    }

    /// Reverse of [`seal`].
    pub fn open(&self, sealed: &str) -> Result<String, CredentialCipherError> {
        let raw = STANDARD.decode(sealed)?;
        if raw.len() < NONCE_LEN {
            return Err(CredentialCipherError::Truncated);
        }
        let (nonce_bytes, ciphertext) = raw.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);
        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| CredentialCipherError::DecryptFailed)?;
        Ok(String::from_utf8_lossy(&plaintext).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_cipher() -> CredentialCipher {
        CredentialCipher::from_key_bytes(&[7u8; 32]).unwrap()
    }

    #[test]
    fn seal_then_open_round_trips() {
        let cipher = test_cipher();
        let sealed = cipher.seal("refresh-token-xyz");
        assert_eq!(cipher.open(&sealed).unwrap(), "refresh-token-xyz");
    }

    #[test]
    fn seals_are_not_deterministic() {
        let cipher = test_cipher();
        assert_ne!(cipher.seal("same"), cipher.seal("same"));
    }

    #[test]
    fn rejects_short_keys() {
        assert!(CredentialCipher::from_key_bytes(&[0u8; 16]).is_err());
    }

    #[test]
    fn rejects_tampered_ciphertext() {
        let cipher = test_cipher();
        let mut sealed = cipher.seal("secret").into_bytes();
        *sealed.last_mut().unwrap() ^= 0x01;
        let sealed = String::from_utf8(sealed).unwrap();
        assert!(cipher.open(&sealed).is_err());
    }
}
