//! AES-256-GCM encryption for provider tokens stored on OAuth connections.
//!
//! Output is base64 of `nonce || ciphertext || tag`, suitable for a TEXT
//! column. The key is a SHA-256 of a configured passphrase.

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use base64::Engine;
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::auth::{AuthError, AuthResult};

/// Nonce size for AES-256-GCM (12 bytes).
const NONCE_SIZE: usize = 12;
/// GCM tag size (16 bytes).
const TAG_SIZE: usize = 16;

/// Encrypts and decrypts short secrets with a fixed key.
#[derive(Clone)]
pub struct TokenCipher {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for TokenCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TokenCipher")
    }
}

impl TokenCipher {
    /// Derive the key from `passphrase`.
    pub fn new(passphrase: &str) -> Self {
        let key = Sha256::digest(passphrase.as_bytes());
        Self {
            cipher: Aes256Gcm::new(&key),
        }
    }

    /// Encrypt with a random nonce. The same plaintext never encrypts twice
    /// to the same output.
    pub fn encrypt(&self, plaintext: &str) -> AuthResult<String> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| AuthError::Internal(format!("Encryption failed: {e}")))?;

        let mut combined = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);
        Ok(base64::engine::general_purpose::STANDARD.encode(&combined))
    }

    pub fn decrypt(&self, encrypted_b64: &str) -> AuthResult<String> {
        let combined = base64::engine::general_purpose::STANDARD
            .decode(encrypted_b64)
            .map_err(|e| AuthError::Internal(format!("Base64 decode failed: {e}")))?;

        if combined.len() < NONCE_SIZE + TAG_SIZE {
            return Err(AuthError::Internal("Ciphertext too short".into()));
        }

        let (nonce, ciphertext) = combined.split_at(NONCE_SIZE);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|e| AuthError::Internal(format!("Decryption failed: {e}")))?;

        String::from_utf8(plaintext)
            .map_err(|e| AuthError::Internal(format!("UTF-8 decode failed: {e}")))
    }

    /// Encrypt an optional value, passing `None` through.
    pub fn encrypt_opt(&self, plaintext: Option<&str>) -> AuthResult<Option<String>> {
        plaintext.map(|p| self.encrypt(p)).transpose()
    }
}
