//! Element — the versioned unit the sync core replicates.
//!
//! DESIGN
//! ======
//! The core only interprets identity, version, nonce, timestamps, the
//! soft-delete flag and file references. Everything type-specific (geometry,
//! style, text) lives in `payload` and is flattened into the serialized
//! object so the editor's native element JSON round-trips untouched.
//!
//! Deletion never removes an element. `mark_deleted` flips `is_deleted` and
//! bumps the version so the tombstone out-ranks every stale live copy.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub type ElementId = String;
pub type FileId = String;

/// Upload state of the attachment an element references.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    /// Attachment not yet stored remotely or not yet fetched locally.
    Pending,
    /// Attachment durably stored.
    Saved,
    /// Transfer failed; retryable.
    Error,
}

/// A drawable element as seen by the sync core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Element {
    pub id: ElementId,
    pub version: u64,
    /// Random per-version value used to break ties between equal versions.
    pub version_nonce: u32,
    /// Milliseconds since the Unix epoch of the last mutation.
    #[serde(default)]
    pub updated: i64,
    #[serde(default)]
    pub is_deleted: bool,
    /// In-progress, uncommitted element (e.g. a shape mid-drag). Never synced.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub transient: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_id: Option<FileId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<FileStatus>,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

/// Current time as milliseconds since Unix epoch.
#[must_use]
pub fn now_ms() -> i64 {
    let Ok(dur) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    i64::try_from(dur.as_millis()).unwrap_or(0)
}

impl Element {
    /// New element at version 1.
    pub fn new(id: impl Into<ElementId>, payload: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            version: 1,
            version_nonce: rand::random(),
            updated: now_ms(),
            is_deleted: false,
            transient: false,
            file_id: None,
            status: None,
            payload,
        }
    }

    /// Only committed elements leave this client.
    #[must_use]
    pub fn is_syncable(&self) -> bool {
        !self.transient
    }

    /// Record a mutation: next version, fresh nonce, new timestamp.
    pub fn bump(&mut self, now_ms: i64) {
        self.version += 1;
        self.version_nonce = rand::random();
        self.updated = now_ms;
    }

    /// Soft-delete. The element stays in the scene as a tombstone.
    pub fn mark_deleted(&mut self, now_ms: i64) {
        self.is_deleted = true;
        self.bump(now_ms);
    }

    /// Canonical JSON, used as the last-resort tie-break key.
    #[must_use]
    pub fn canonical_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Sum of element versions. Grows with every accepted mutation because
/// elements are never removed, only tombstoned.
#[must_use]
pub fn scene_version(elements: &[Element]) -> u64 {
    elements.iter().map(|e| e.version).sum()
}

#[cfg(test)]
#[path = "element_test.rs"]
mod tests;
