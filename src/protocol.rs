//! Sealed payload messages exchanged between peers.
//!
//! These travel inside the encrypted `payload` of a wire frame, so the relay
//! never sees them. Scene messages carry raw CRDT updates; presence messages
//! are small JSON records sent on the volatile channel.

use serde::{Deserialize, Serialize};

use crate::element::ElementId;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pointer {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PointerButton {
    #[default]
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserIdleState {
    #[default]
    Active,
    Idle,
    Away,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SocketMessage {
    /// Full document state. Sent on join, to new peers, and periodically.
    #[serde(rename = "scene:init")]
    SceneInit { update: Vec<u8> },
    /// Incremental document update.
    #[serde(rename = "scene:update")]
    SceneUpdate { update: Vec<u8> },
    #[serde(rename = "presence:pointer", rename_all = "camelCase")]
    PointerUpdate {
        socket_id: String,
        username: String,
        pointer: Pointer,
        button: PointerButton,
        #[serde(default)]
        selected_element_ids: Vec<ElementId>,
    },
    #[serde(rename = "presence:idle", rename_all = "camelCase")]
    IdleStatus {
        socket_id: String,
        username: String,
        user_state: UserIdleState,
    },
}

impl SocketMessage {
    /// Presence messages go over the droppable channel.
    #[must_use]
    pub fn is_volatile(&self) -> bool {
        matches!(self, Self::PointerUpdate { .. } | Self::IdleStatus { .. })
    }

    /// # Errors
    ///
    /// Serialization of these types only fails on non-finite floats.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// # Errors
    ///
    /// Fails on JSON that is not a known message.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
#[path = "protocol_test.rs"]
mod tests;
