//! Services the collaboration session calls out to.
//!
//! ARCHITECTURE
//! ============
//! Anything that talks to the board backend lives here, so the session can
//! stay focused on replication and lifecycle. `backend` is the REST seam,
//! `persistence` turns scene snapshots into durable saves, and `files`
//! moves attachments.

pub mod backend;
pub mod files;
pub mod persistence;
