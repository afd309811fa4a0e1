//! Field encryption for stored personal data.
//!
//! The license number is encrypted at rest with AES-256-GCM. Each encryption
//! uses a fresh random nonce; the stored form is `nonce_b64:ciphertext_b64`.
//! Decryption failures surface as errors so corrupt or tampered rows are
//! visible, never silently empty.

use aes_gcm::aead::{Aead, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, KeyInit};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use miette::Diagnostic;
use thiserror::Error;

const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

#[derive(Debug, Error, Diagnostic)]
pub enum CryptoError {
    #[error("encryption key must be {KEY_LEN} bytes after base64 decoding")]
    #[diagnostic(
        code(renewbot::crypto::key),
        help("Generate one with: head -c 32 /dev/urandom | base64")
    )]
    InvalidKey,

    #[error("stored ciphertext is malformed")]
    #[diagnostic(code(renewbot::crypto::malformed))]
    Malformed,

    #[error("decryption failed; the row may be corrupt or the key wrong")]
    #[diagnostic(code(renewbot::crypto::decrypt))]
    Decrypt,

    #[error("encryption failed")]
    #[diagnostic(code(renewbot::crypto::encrypt))]
    Encrypt,
}

/// Encrypts and decrypts individual sensitive fields.
#[derive(Clone)]
pub struct FieldCipher {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for FieldCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldCipher").finish()
    }
}

impl FieldCipher {
    /// Build a cipher from a base64-encoded 32-byte key.
    pub fn from_base64_key(key_b64: &str) -> Result<Self, CryptoError> {
        let key = BASE64
            .decode(key_b64.trim().as_bytes())
            .map_err(|_| CryptoError::InvalidKey)?;
        if key.len() != KEY_LEN {
            return Err(CryptoError::InvalidKey);
        }
        let cipher = Aes256Gcm::new_from_slice(&key).map_err(|_| CryptoError::InvalidKey)?;
        Ok(Self { cipher })
    }

    /// Encrypt a field value into its `nonce_b64:ciphertext_b64` storage form.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| CryptoError::Encrypt)?;
        Ok(format!(
            "{}:{}",
            BASE64.encode(nonce),
            BASE64.encode(ciphertext)
        ))
    }

    /// Decrypt a value previously produced by [`encrypt`](Self::encrypt).
    pub fn decrypt(&self, stored: &str) -> Result<String, CryptoError> {
        let (nonce_b64, ct_b64) = stored.split_once(':').ok_or(CryptoError::Malformed)?;
        let nonce_raw = BASE64
            .decode(nonce_b64.as_bytes())
            .map_err(|_| CryptoError::Malformed)?;
        if nonce_raw.len() != NONCE_LEN {
            return Err(CryptoError::Malformed);
        }
        let ciphertext = BASE64
            .decode(ct_b64.as_bytes())
            .map_err(|_| CryptoError::Malformed)?;
        let plaintext = self
            .cipher
            .decrypt(aes_gcm::Nonce::from_slice(&nonce_raw), ciphertext.as_ref())
            .map_err(|_| CryptoError::Decrypt)?;
        String::from_utf8(plaintext).map_err(|_| CryptoError::Decrypt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_cipher() -> FieldCipher {
        FieldCipher::from_base64_key(&BASE64.encode([7u8; KEY_LEN])).unwrap()
    }

    #[test]
    fn round_trip() {
        let cipher = test_cipher();
        let stored = cipher.encrypt("MH47-20110012345").unwrap();
        assert_ne!(stored, "MH47-20110012345");
        assert_eq!(cipher.decrypt(&stored).unwrap(), "MH47-20110012345");
    }

    #[test]
    fn fresh_nonce_per_encryption() {
        let cipher = test_cipher();
        let a = cipher.encrypt("same").unwrap();
        let b = cipher.encrypt("same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn tampered_ciphertext_rejected() {
        let cipher = test_cipher();
        let stored = cipher.encrypt("secret").unwrap();
        let mut bytes = stored.into_bytes();
        let last = bytes.len() - 1;
        bytes[last] = if bytes[last] == b'A' { b'B' } else { b'A' };
        let tampered = String::from_utf8(bytes).unwrap();
        assert!(cipher.decrypt(&tampered).is_err());
    }

    #[test]
    fn short_key_rejected() {
        let err = FieldCipher::from_base64_key(&BASE64.encode([1u8; 16])).unwrap_err();
        assert!(matches!(err, CryptoError::InvalidKey));
    }
}
