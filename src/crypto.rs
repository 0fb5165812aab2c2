//! Room key — symmetric sealing of everything peers exchange.
//!
//! DESIGN
//! ======
//! One 256-bit ChaCha20-Poly1305 key per room. Sealed output is
//! `nonce (12 bytes) || ciphertext+tag`, with a fresh random nonce per
//! message. The key is shared out of band (share-link fragment or board-id
//! derivation) and never crosses the wire.
//!
//! ERROR HANDLING
//! ==============
//! An authentication failure means the peers hold different keys. That is
//! not recoverable by retrying, so it is classified as fatal.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::error::ErrorCode;

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;

const BOARD_KEY_DOMAIN: &[u8] = b"boardsync/room-key/v1\0";

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("sealed payload too short: {0} bytes")]
    Truncated(usize),
    #[error("payload failed authentication (room key mismatch)")]
    KeyMismatch,
    #[error("encryption failed")]
    Seal,
    #[error("invalid room key encoding: {0}")]
    InvalidKey(String),
}

impl ErrorCode for CryptoError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Truncated(_) => "E_CRYPTO_TRUNCATED",
            Self::KeyMismatch => "E_KEY_MISMATCH",
            Self::Seal => "E_CRYPTO_SEAL",
            Self::InvalidKey(_) => "E_INVALID_KEY",
        }
    }

    fn fatal(&self) -> bool {
        matches!(self, Self::KeyMismatch)
    }
}

/// Symmetric room key.
#[derive(Clone, PartialEq, Eq)]
pub struct RoomKey([u8; KEY_LEN]);

impl std::fmt::Debug for RoomKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("RoomKey(..)")
    }
}

impl RoomKey {
    /// Fresh random key for an ad hoc share-link room.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        rand::rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Deterministic key for an always-on board room. Every client that can
    /// open the board derives the same key.
    #[must_use]
    pub fn derive_for_board(board_id: &str) -> Self {
        let digest = Sha256::new()
            .chain_update(BOARD_KEY_DOMAIN)
            .chain_update(board_id.as_bytes())
            .finalize();
        let mut bytes = [0u8; KEY_LEN];
        bytes.copy_from_slice(&digest);
        Self(bytes)
    }

    /// Parse the base64url text form used in share links.
    ///
    /// # Errors
    ///
    /// Returns `InvalidKey` for bad base64 or a wrong length.
    pub fn parse(text: &str) -> Result<Self, CryptoError> {
        let raw = URL_SAFE_NO_PAD
            .decode(text.trim())
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        let bytes: [u8; KEY_LEN] = raw
            .try_into()
            .map_err(|v: Vec<u8>| CryptoError::InvalidKey(format!("expected {KEY_LEN} bytes, got {}", v.len())))?;
        Ok(Self(bytes))
    }

    /// Base64url text form (no padding).
    #[must_use]
    pub fn encode(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.0)
    }

    fn cipher(&self) -> ChaCha20Poly1305 {
        ChaCha20Poly1305::new(Key::from_slice(&self.0))
    }

    /// Seal `plaintext` as `nonce || ciphertext`.
    ///
    /// # Errors
    ///
    /// Returns `Seal` if the AEAD rejects the input.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut nonce = [0u8; NONCE_LEN];
        rand::rng().fill_bytes(&mut nonce);
        let ciphertext = self
            .cipher()
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| CryptoError::Seal)?;
        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Open a payload produced by [`RoomKey::seal`].
    ///
    /// # Errors
    ///
    /// Returns `Truncated` for short input and `KeyMismatch` when
    /// authentication fails.
    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if sealed.len() <= NONCE_LEN {
            return Err(CryptoError::Truncated(sealed.len()));
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        self.cipher()
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CryptoError::KeyMismatch)
    }
}

#[cfg(test)]
#[path = "crypto_test.rs"]
mod tests;
