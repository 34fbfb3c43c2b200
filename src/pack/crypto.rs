//! Authenticated encryption for cold-storage archives.
//!
//! AES-256-GCM over the whole archive, framed as `nonce(12) || ciphertext`.
//! The auth tag lives inside the ciphertext, so tampering or a wrong key
//! fails decryption instead of yielding garbage bytes.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Nonce size in bytes (96 bits for GCM).
pub const NONCE_SIZE: usize = 12;

/// Authentication tag size in bytes.
pub const TAG_SIZE: usize = 16;

/// Encryption capability selected at configuration time.
///
/// The packer always holds a provider; when no encryption is configured it
/// holds [`DisabledEncryption`] rather than branching on an option.
pub trait EncryptionProvider {
    /// Whether this provider actually encrypts.
    fn is_enabled(&self) -> bool;

    /// Encrypt `plaintext`, returning the framed output.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EncryptionDisabled`] on the disabled provider, or
    /// an encryption failure.
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>>;

    /// Decrypt framed data produced by [`EncryptionProvider::encrypt`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::EncryptionDisabled`] on the disabled provider, or
    /// [`Error::Decryption`] for truncated input, a wrong key, or a failed
    /// auth tag.
    fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>>;
}

/// AES-256-GCM provider.
///
/// Key material of any length is accepted: exactly 32 bytes is used
/// directly, anything else is hashed through SHA-256 to derive the 32-byte
/// key. The derivation must match between pack and unpack.
pub struct AesGcmEncryption {
    key: [u8; 32],
}

impl AesGcmEncryption {
    /// Build a provider from raw key material.
    #[must_use]
    pub fn new(key_material: &[u8]) -> Self {
        Self {
            key: derive_key(key_material),
        }
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key))
    }
}

impl EncryptionProvider for AesGcmEncryption {
    fn is_enabled(&self) -> bool {
        true
    }

    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher()
            .encrypt(nonce, plaintext)
            .map_err(|e| Error::Other(format!("encryption failed: {e}")))?;

        let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.len() < NONCE_SIZE + TAG_SIZE {
            return Err(Error::Decryption("data too short".to_string()));
        }
        let nonce = Nonce::from_slice(&data[..NONCE_SIZE]);
        self.cipher()
            .decrypt(nonce, &data[NONCE_SIZE..])
            .map_err(|_| {
                Error::Decryption("decryption failed (wrong key or tampered data)".to_string())
            })
    }
}

/// The no-encryption provider. Any crypto call on it is a usage error.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledEncryption;

impl EncryptionProvider for DisabledEncryption {
    fn is_enabled(&self) -> bool {
        false
    }

    fn encrypt(&self, _plaintext: &[u8]) -> Result<Vec<u8>> {
        Err(Error::EncryptionDisabled)
    }

    fn decrypt(&self, _data: &[u8]) -> Result<Vec<u8>> {
        Err(Error::EncryptionDisabled)
    }
}

fn derive_key(material: &[u8]) -> [u8; 32] {
    if let Ok(key) = <[u8; 32]>::try_from(material) {
        return key;
    }
    let mut key = [0u8; 32];
    key.copy_from_slice(&Sha256::digest(material));
    key
}
