//! Room — identity and key of one collaboration session.
//!
//! Board rooms use the board id as room id and derive the key from it, so
//! every client that can open the board joins without exchanging anything.
//! Ad hoc rooms carry a random id and key in the share-link fragment, which
//! browsers never send to a server.

use crate::crypto::{CryptoError, RoomKey};
use crate::error::ErrorCode;

const ROOM_ID_BYTES: usize = 10;
const FRAGMENT_PREFIX: &str = "#room=";

#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    #[error("link has no room fragment")]
    MissingFragment,
    #[error("malformed room fragment: {0}")]
    Malformed(String),
    #[error(transparent)]
    Key(#[from] CryptoError),
}

impl ErrorCode for RoomError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::MissingFragment => "E_ROOM_MISSING_FRAGMENT",
            Self::Malformed(_) => "E_ROOM_MALFORMED",
            Self::Key(e) => e.error_code(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Room {
    pub room_id: String,
    pub room_key: RoomKey,
}

impl Room {
    /// Always-on room for a board.
    #[must_use]
    pub fn for_board(board_id: &str) -> Self {
        Self {
            room_id: board_id.to_owned(),
            room_key: RoomKey::derive_for_board(board_id),
        }
    }

    /// Random share-link room.
    #[must_use]
    pub fn ad_hoc() -> Self {
        let bytes: [u8; ROOM_ID_BYTES] = rand::random();
        let room_id = bytes.iter().map(|b| format!("{b:02x}")).collect();
        Self { room_id, room_key: RoomKey::generate() }
    }

    /// `<base>#room=<id>,<key>`. Any fragment already on `base` is replaced.
    #[must_use]
    pub fn share_link(&self, base: &str) -> String {
        let base = base.split('#').next().unwrap_or(base);
        format!("{base}{FRAGMENT_PREFIX}{},{}", self.room_id, self.room_key.encode())
    }

    /// Parse a link produced by [`Room::share_link`].
    ///
    /// # Errors
    ///
    /// Fails when the fragment is missing, the id has characters outside
    /// `[A-Za-z0-9_-]`, or the key does not decode to 32 bytes.
    pub fn from_link(url: &str) -> Result<Self, RoomError> {
        let Some(idx) = url.find(FRAGMENT_PREFIX) else {
            return Err(RoomError::MissingFragment);
        };
        let fragment = &url[idx + FRAGMENT_PREFIX.len()..];
        let Some((room_id, key)) = fragment.split_once(',') else {
            return Err(RoomError::Malformed("expected <id>,<key>".into()));
        };
        if room_id.is_empty() || !room_id.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_') {
            return Err(RoomError::Malformed(format!("invalid room id {room_id:?}")));
        }
        let room_key = RoomKey::parse(key)?;
        Ok(Self { room_id: room_id.to_owned(), room_key })
    }
}

#[cfg(test)]
#[path = "room_test.rs"]
mod tests;
