//! Real-time collaboration core for a shared whiteboard.
//!
//! Peers edit the same board through an end-to-end encrypted relay. Each
//! client keeps its editor scene, a replicated document, and the backend's
//! durable copy converging, and survives link loss without losing edits.
//! The relay forwards sealed frames and never sees plaintext.
//!
//! ## Module layout
//!
//! | Module | Role |
//! |--------|------|
//! | [`element`] | Drawable element type and scene version |
//! | [`version_store`] | Last-synced version per element |
//! | [`crypto`] | Room keys and authenticated sealing |
//! | [`room`] | Room identity and share links |
//! | [`protocol`] | Messages exchanged between peers |
//! | [`crdt`] | Replicated scene document and delta writes |
//! | [`reconcile`] | Local/remote merge with a deterministic winner |
//! | [`presence`] | Remote collaborators (pointers, selection, idle) |
//! | [`lifecycle`] | Connection status debounce and notices |
//! | [`transport`] | Encrypted room transport with reconnect |
//! | [`collab`] | Session orchestration ([`collab::Collab`]) |
//! | [`services`] | Backend REST, persistence, attachment sync |
//! | [`relay`] | Websocket relay server |
//! | [`state`] | Observable status for the UI |
//! | [`editor`] | Editor seam the core drives |
//! | [`scheduler`] | Cancellable delayed tasks |
//! | [`config`] | Environment-driven settings |

pub mod collab;
pub mod config;
pub mod crdt;
pub mod crypto;
pub mod editor;
pub mod element;
pub mod error;
pub mod lifecycle;
pub mod presence;
pub mod protocol;
pub mod reconcile;
pub mod relay;
pub mod room;
pub mod scheduler;
pub mod services;
pub mod state;
pub mod transport;
pub mod version_store;

pub use collab::{Collab, CollabDeps, CollabError, EnvironmentSignals, SessionHandle};
pub use element::{Element, ElementId};
pub use room::Room;
