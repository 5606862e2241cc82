//! At-rest encryption of message bodies.
//!
//! Ciphertext is `base64(nonce || AES-256-GCM(body))`, so it can be stored
//! anywhere a plaintext body can.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::RngCore;
use sha2::Sha256;
use thiserror::Error;

/// Nonce size for AES-GCM (96 bits = 12 bytes).
const NONCE_SIZE: usize = 12;

/// Salt for passphrase-derived keys.
const KEY_SALT: &[u8] = b"parley.message-key.v1";

/// PBKDF2-HMAC-SHA256 rounds for passphrase-derived keys.
pub const KEY_ROUNDS: u32 = 100_000;

/// Crypto errors.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Encryption failed.
    #[error("Encryption failed: {0}")]
    Encrypt(String),

    /// Ciphertext was malformed or did not authenticate.
    #[error("Decryption failed: {0}")]
    Decrypt(String),
}

/// Symmetric encryption of message bodies.
pub trait Crypto: Send + Sync {
    /// Encrypt a plaintext body.
    fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError>;

    /// Decrypt a body produced by [`Crypto::encrypt`].
    fn decrypt(&self, ciphertext: &str) -> Result<String, CryptoError>;
}

/// AES-256-GCM with a fixed key.
pub struct AesGcmCrypto {
    cipher: Aes256Gcm,
}

impl AesGcmCrypto {
    /// Create from a raw 256-bit key.
    #[must_use]
    pub fn new(key: [u8; 32]) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key)),
        }
    }

    /// Create from a configured passphrase.
    #[must_use]
    pub fn from_passphrase(passphrase: &str) -> Self {
        Self::new(derive_key(passphrase))
    }
}

/// Derive a 256-bit key from a passphrase with PBKDF2-HMAC-SHA256.
#[must_use]
pub fn derive_key(passphrase: &str) -> [u8; 32] {
    stretch(passphrase.as_bytes(), KEY_SALT, KEY_ROUNDS)
}

fn stretch(passphrase: &[u8], salt: &[u8], rounds: u32) -> [u8; 32] {
    let mut key = [0u8; 32];
    pbkdf2::pbkdf2_hmac::<Sha256>(passphrase, salt, rounds, &mut key);
    key
}

impl Crypto for AesGcmCrypto {
    fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| CryptoError::Encrypt(e.to_string()))?;

        let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(sealed))
    }

    fn decrypt(&self, ciphertext: &str) -> Result<String, CryptoError> {
        let sealed = BASE64
            .decode(ciphertext)
            .map_err(|e| CryptoError::Decrypt(format!("invalid encoding: {e}")))?;

        if sealed.len() < NONCE_SIZE {
            return Err(CryptoError::Decrypt("ciphertext too short".into()));
        }
        let (nonce_bytes, body) = sealed.split_at(NONCE_SIZE);

        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), body)
            .map_err(|e| CryptoError::Decrypt(e.to_string()))?;

        String::from_utf8(plaintext).map_err(|e| CryptoError::Decrypt(e.to_string()))
    }
}
