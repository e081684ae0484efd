//! Application-level payload encryption.
//!
//! AES-256-GCM with a 12-byte random IV and 16-byte tag, keyed by the
//! 32-byte key derived from the TLS exporter. Encrypted payloads are
//! `IV || ciphertext || tag`.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use thiserror::Error;

/// Application key length in bytes.
pub const APP_KEY_LEN: usize = 32;

/// GCM IV length in bytes.
pub const GCM_IV_LEN: usize = 12;

/// GCM authentication tag length in bytes.
pub const GCM_TAG_LEN: usize = 16;

/// Errors from application-payload encryption or decryption.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("encrypted payload too short: {len} bytes (min {})", GCM_IV_LEN + GCM_TAG_LEN)]
    TooShort { len: usize },

    #[error("payload encryption failed")]
    EncryptFailed,

    #[error("payload authentication failed")]
    DecryptFailed,
}

/// Per-connection application cipher.
///
/// Scoped to the transport's lifetime; cloned into reader tasks and
/// handler contexts.
#[derive(Clone)]
pub struct AppCipher {
    cipher: Aes256Gcm,
}

impl AppCipher {
    pub fn new(key: &[u8; APP_KEY_LEN]) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)),
        }
    }

    /// Encrypts `plaintext` into `IV || ciphertext || tag`.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ct = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| CryptoError::EncryptFailed)?;

        let mut out = Vec::with_capacity(GCM_IV_LEN + ct.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ct);
        Ok(out)
    }

    /// Decrypts `IV || ciphertext || tag`, authenticating the tag.
    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if data.len() < GCM_IV_LEN + GCM_TAG_LEN {
            return Err(CryptoError::TooShort { len: data.len() });
        }

        let nonce = Nonce::from_slice(&data[..GCM_IV_LEN]);
        self.cipher
            .decrypt(nonce, &data[GCM_IV_LEN..])
            .map_err(|_| CryptoError::DecryptFailed)
    }
}

impl std::fmt::Debug for AppCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppCipher").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_cipher() -> AppCipher {
        AppCipher::new(&[0x42u8; APP_KEY_LEN])
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let cipher = test_cipher();
        let plaintext = b"Hello";

        let enc = cipher.encrypt(plaintext).unwrap();
        assert_eq!(enc.len(), GCM_IV_LEN + plaintext.len() + GCM_TAG_LEN);

        let dec = cipher.decrypt(&enc).unwrap();
        assert_eq!(dec, plaintext);
    }

    #[test]
    fn test_empty_plaintext() {
        let cipher = test_cipher();
        let enc = cipher.encrypt(b"").unwrap();
        assert_eq!(enc.len(), GCM_IV_LEN + GCM_TAG_LEN);
        assert!(cipher.decrypt(&enc).unwrap().is_empty());
    }

    #[test]
    fn test_unique_ivs() {
        let cipher = test_cipher();
        let a = cipher.encrypt(b"x").unwrap();
        let b = cipher.encrypt(b"x").unwrap();
        assert_ne!(a[..GCM_IV_LEN], b[..GCM_IV_LEN]);
    }

    #[test]
    fn test_corruption_detected() {
        let cipher = test_cipher();
        let enc = cipher.encrypt(b"sensitive data").unwrap();

        // Flip one byte in every position of the ciphertext-or-tag region.
        for i in GCM_IV_LEN..enc.len() {
            let mut bad = enc.clone();
            bad[i] ^= 0x01;
            assert!(matches!(
                cipher.decrypt(&bad),
                Err(CryptoError::DecryptFailed)
            ));
        }
    }

    #[test]
    fn test_wrong_key_fails() {
        let enc = test_cipher().encrypt(b"data").unwrap();
        let other = AppCipher::new(&[0x43u8; APP_KEY_LEN]);
        assert!(other.decrypt(&enc).is_err());
    }

    #[test]
    fn test_too_short_rejected() {
        let cipher = test_cipher();
        assert!(matches!(
            cipher.decrypt(&[0u8; GCM_IV_LEN + GCM_TAG_LEN - 1]),
            Err(CryptoError::TooShort { .. })
        ));
    }
}
