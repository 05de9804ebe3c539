//! # Symmetric Crypto
//!
//! XChaCha20-Poly1305 AEAD used by the `x25519` cipher suite once the key
//! exchange has produced a session key.
//!
//! Sealed payloads carry their nonce up front:
//! ```text
//! [Nonce(24)] [Ciphertext + Tag(N + 16)]
//! ```

use crate::error::{ProtocolError, Result};
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use zeroize::Zeroize;

/// XChaCha20 nonce length in bytes
pub const NONCE_LEN: usize = 24;

/// Poly1305 tag length in bytes
pub const TAG_LEN: usize = 16;

pub struct Crypto {
    cipher: XChaCha20Poly1305,
}

impl Crypto {
    pub fn new(key: &[u8; 32]) -> Self {
        Self {
            cipher: XChaCha20Poly1305::new(Key::from_slice(key)),
        }
    }

    /// Fresh random nonce from the operating system RNG
    pub fn generate_nonce() -> Result<[u8; NONCE_LEN]> {
        let mut nonce = [0u8; NONCE_LEN];
        getrandom::fill(&mut nonce).map_err(|_| ProtocolError::EncryptionFailure)?;
        Ok(nonce)
    }

    pub fn encrypt(&self, plaintext: &[u8], nonce: &[u8; NONCE_LEN]) -> Result<Vec<u8>> {
        self.cipher
            .encrypt(XNonce::from_slice(nonce), plaintext)
            .map_err(|_| ProtocolError::EncryptionFailure)
    }

    pub fn decrypt(&self, ciphertext: &[u8], nonce: &[u8; NONCE_LEN]) -> Result<Vec<u8>> {
        self.cipher
            .decrypt(XNonce::from_slice(nonce), ciphertext)
            .map_err(|_| ProtocolError::DecryptionFailure)
    }

    /// Encrypt under a fresh nonce and return `nonce || ciphertext`
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut nonce = Self::generate_nonce()?;
        let ciphertext = self.encrypt(plaintext, &nonce)?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend(ciphertext);
        nonce.zeroize();
        Ok(sealed)
    }

    /// Split the nonce prefix off a sealed payload and decrypt the rest
    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>> {
        if sealed.len() < NONCE_LEN + TAG_LEN {
            return Err(ProtocolError::DecryptionFailure);
        }
        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(nonce_bytes);

        let plaintext = self.decrypt(ciphertext, &nonce);
        nonce.zeroize();
        plaintext
    }
}
