//! Presence — ephemeral collaborator records fed by awareness messages.
//!
//! Nothing here is persisted or version-tracked. Records appear on the first
//! pointer or idle message from a peer and disappear when the relay's member
//! list no longer contains that peer.

use std::collections::BTreeMap;

use crate::element::ElementId;
use crate::protocol::{Pointer, PointerButton, SocketMessage};

pub use crate::protocol::UserIdleState;

#[derive(Debug, Clone, PartialEq)]
pub struct Collaborator {
    pub socket_id: String,
    pub username: String,
    pub pointer: Option<Pointer>,
    pub button: PointerButton,
    pub selected_element_ids: Vec<ElementId>,
    /// `#rrggbb`, stable per socket id.
    pub color: String,
    pub is_current_user: bool,
    pub user_state: UserIdleState,
}

impl Collaborator {
    fn new(socket_id: &str, username: &str, is_current_user: bool) -> Self {
        Self {
            socket_id: socket_id.to_owned(),
            username: username.to_owned(),
            pointer: None,
            button: PointerButton::Up,
            selected_element_ids: Vec::new(),
            color: color_for(socket_id),
            is_current_user,
            user_state: UserIdleState::Active,
        }
    }
}

/// Collaborators keyed by socket id.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Collaborators {
    by_socket: BTreeMap<String, Collaborator>,
    own_socket_id: Option<String>,
}

impl Collaborators {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Socket id of this client, once the relay has assigned one.
    pub fn set_own_socket_id(&mut self, socket_id: &str) {
        self.own_socket_id = Some(socket_id.to_owned());
        for c in self.by_socket.values_mut() {
            c.is_current_user = c.socket_id == socket_id;
        }
    }

    /// Apply a presence message. Returns `false` for scene messages.
    pub fn upsert(&mut self, message: &SocketMessage) -> bool {
        match message {
            SocketMessage::PointerUpdate { socket_id, username, pointer, button, selected_element_ids } => {
                let c = self.entry(socket_id, username);
                c.pointer = Some(*pointer);
                c.button = *button;
                c.selected_element_ids.clone_from(selected_element_ids);
                true
            }
            SocketMessage::IdleStatus { socket_id, username, user_state } => {
                self.entry(socket_id, username).user_state = *user_state;
                true
            }
            SocketMessage::SceneInit { .. } | SocketMessage::SceneUpdate { .. } => false,
        }
    }

    fn entry(&mut self, socket_id: &str, username: &str) -> &mut Collaborator {
        let is_current = self.own_socket_id.as_deref() == Some(socket_id);
        let c = self
            .by_socket
            .entry(socket_id.to_owned())
            .or_insert_with(|| Collaborator::new(socket_id, username, is_current));
        if c.username != username {
            username.clone_into(&mut c.username);
        }
        c
    }

    /// Drop every record whose socket is not in `peers`. Returns how many left.
    pub fn retain_peers(&mut self, peers: &[String]) -> usize {
        let before = self.by_socket.len();
        self.by_socket.retain(|id, _| peers.iter().any(|p| p == id));
        before - self.by_socket.len()
    }

    pub fn clear(&mut self) {
        self.by_socket.clear();
        self.own_socket_id = None;
    }

    #[must_use]
    pub fn get(&self, socket_id: &str) -> Option<&Collaborator> {
        self.by_socket.get(socket_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Collaborator> {
        self.by_socket.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_socket.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_socket.is_empty()
    }
}

/// Stable, vivid color for a socket id: hue from an FNV-1a hash, fixed
/// saturation and lightness.
#[must_use]
pub fn color_for(socket_id: &str) -> String {
    let hash = socket_id
        .bytes()
        .fold(0xcbf2_9ce4_8422_2325_u64, |h, b| (h ^ u64::from(b)).wrapping_mul(0x0100_0000_01b3));
    #[allow(clippy::cast_precision_loss)]
    let hue = (hash % 360) as f64 / 360.0;
    let (r, g, b) = hsl_to_rgb(hue, 0.7, 0.6);
    format!("#{r:02x}{g:02x}{b:02x}")
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn hsl_to_rgb(h: f64, s: f64, l: f64) -> (u8, u8, u8) {
    let q = if l < 0.5 { l * (1.0 + s) } else { l + s - l * s };
    let p = 2.0 * l - q;
    let channel = |t: f64| {
        let t = t.rem_euclid(1.0);
        let v = if t < 1.0 / 6.0 {
            p + (q - p) * 6.0 * t
        } else if t < 0.5 {
            q
        } else if t < 2.0 / 3.0 {
            p + (q - p) * (2.0 / 3.0 - t) * 6.0
        } else {
            p
        };
        (v * 255.0).round().clamp(0.0, 255.0) as u8
    };
    (channel(h + 1.0 / 3.0), channel(h), channel(h - 1.0 / 3.0))
}

#[cfg(test)]
#[path = "presence_test.rs"]
mod tests;
