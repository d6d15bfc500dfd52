//! Packet Cipher
//!
//! Authenticated encryption envelope for tunnel payloads, keyed by a
//! pre-shared 32-byte secret. Each envelope carries its own IV:
//!
//! ```text
//!   [IV (24)][ciphertext || Poly1305 tag (16)]
//! ```
//!
//! XChaCha20-Poly1305 is used so IVs can be drawn at random for every
//! packet without tracking a nonce counter across restarts. The IV also
//! serves as the packet's identity for duplicate suppression: it is hashed
//! into a [`Signature`] on the receiving side.

use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;

/// Size of the pre-shared key in bytes.
pub const KEY_SIZE: usize = 32;

/// Size of the per-packet IV.
pub const IV_SIZE: usize = 24;

/// Size of the AEAD tag.
pub const TAG_SIZE: usize = 16;

/// Bytes added to every plaintext by the envelope.
pub const ENVELOPE_OVERHEAD: usize = IV_SIZE + TAG_SIZE;

/// Size of a duplicate-detection signature.
pub const SIGNATURE_SIZE: usize = 16;

/// Errors from cipher construction and packet processing.
#[derive(Debug, Error)]
pub enum CipherError {
    #[error("invalid key hex: {0}")]
    InvalidKeyHex(#[from] hex::FromHexError),

    #[error("invalid key length: expected {expected} bytes, got {got}")]
    InvalidKeyLength { expected: usize, got: usize },

    #[error("envelope too short: expected at least {expected} bytes, got {got}")]
    Truncated { expected: usize, got: usize },

    #[error("authentication failed")]
    Authentication,

    #[error("encryption failed")]
    EncryptionFailed,
}

/// Per-packet initialization vector.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Iv([u8; IV_SIZE]);

impl Iv {
    /// Draw a fresh random IV from the OS RNG.
    pub fn random() -> Self {
        let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
        let mut bytes = [0u8; IV_SIZE];
        bytes.copy_from_slice(nonce.as_slice());
        Self(bytes)
    }

    /// Create an IV from raw bytes.
    pub fn from_bytes(bytes: [u8; IV_SIZE]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; IV_SIZE] {
        &self.0
    }

    /// Derive the duplicate-detection signature for this IV.
    pub fn signature(&self) -> Signature {
        let digest = Sha256::digest(self.0);
        let mut sig = [0u8; SIGNATURE_SIZE];
        sig.copy_from_slice(&digest[..SIGNATURE_SIZE]);
        Signature(sig)
    }

    fn nonce(&self) -> &XNonce {
        XNonce::from_slice(&self.0)
    }
}

impl fmt::Debug for Iv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Iv({})", hex::encode(self.0))
    }
}

/// Opaque per-packet identity used by the duplicate register.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Signature([u8; SIGNATURE_SIZE]);

impl Signature {
    /// Create a signature from raw bytes.
    pub fn from_bytes(bytes: [u8; SIGNATURE_SIZE]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; SIGNATURE_SIZE] {
        &self.0
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// Envelope cipher bound to one pre-shared key.
///
/// Stateless apart from the key, so a single instance can be shared
/// between the send and receive paths.
#[derive(Clone)]
pub struct Cipher {
    aead: XChaCha20Poly1305,
}

impl Cipher {
    /// Create a cipher from raw key bytes.
    pub fn new(key: &[u8]) -> Result<Self, CipherError> {
        if key.len() != KEY_SIZE {
            return Err(CipherError::InvalidKeyLength {
                expected: KEY_SIZE,
                got: key.len(),
            });
        }
        let aead = XChaCha20Poly1305::new_from_slice(key).map_err(|_| {
            CipherError::InvalidKeyLength {
                expected: KEY_SIZE,
                got: key.len(),
            }
        })?;
        Ok(Self { aead })
    }

    /// Create a cipher from a hex-encoded key.
    pub fn from_hex(key_hex: &str) -> Result<Self, CipherError> {
        let key = hex::decode(key_hex.trim())?;
        Self::new(&key)
    }

    /// Seal a plaintext under a fresh random IV.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<(Vec<u8>, Iv), CipherError> {
        let iv = Iv::random();
        let envelope = self.encrypt_with_iv(plaintext, &iv)?;
        Ok((envelope, iv))
    }

    /// Seal a plaintext under a caller-supplied IV.
    ///
    /// Sealing the same plaintext twice under the same IV yields the same
    /// envelope. Only reuse an IV for copies of one logical packet.
    pub fn encrypt_with_iv(&self, plaintext: &[u8], iv: &Iv) -> Result<Vec<u8>, CipherError> {
        let ciphertext = self
            .aead
            .encrypt(iv.nonce(), plaintext)
            .map_err(|_| CipherError::EncryptionFailed)?;

        let mut envelope = Vec::with_capacity(IV_SIZE + ciphertext.len());
        envelope.extend_from_slice(iv.as_bytes());
        envelope.extend_from_slice(&ciphertext);
        Ok(envelope)
    }

    /// Open an envelope, returning the plaintext and the IV it was sealed with.
    ///
    /// Malformed or forged input is reported as an error, never as partial
    /// plaintext.
    pub fn decrypt(&self, envelope: &[u8]) -> Result<(Vec<u8>, Iv), CipherError> {
        if envelope.len() < ENVELOPE_OVERHEAD {
            return Err(CipherError::Truncated {
                expected: ENVELOPE_OVERHEAD,
                got: envelope.len(),
            });
        }

        let (iv_bytes, ciphertext) = envelope.split_at(IV_SIZE);
        let mut raw = [0u8; IV_SIZE];
        raw.copy_from_slice(iv_bytes);
        let iv = Iv(raw);

        let plaintext = self
            .aead
            .decrypt(iv.nonce(), ciphertext)
            .map_err(|_| CipherError::Authentication)?;

        Ok((plaintext, iv))
    }
}

impl fmt::Debug for Cipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cipher")
            .field("algorithm", &"XChaCha20-Poly1305")
            .field("key", &"[redacted]")
            .finish()
    }
}

/// Generate a random pre-shared key, hex-encoded.
pub fn generate_key_hex() -> String {
    let key = XChaCha20Poly1305::generate_key(&mut OsRng);
    hex::encode(key)
}
