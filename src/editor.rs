//! Editor seam — the drawing surface the sync core reads from and writes to.

use serde::{Deserialize, Serialize};

use crate::element::{Element, FileId};

/// Tags an apply so the editor's change detection can tell peer changes from
/// user edits. `Remote` applies must not be fed back into `sync_elements`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOrigin {
    Local,
    Remote,
}

/// A binary attachment (image) referenced by an element's `file_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BinaryFile {
    pub id: FileId,
    pub mime_type: String,
    pub data: Vec<u8>,
    pub created: i64,
}

pub trait EditorApi: Send + Sync {
    /// Live (non-deleted) elements.
    fn get_all_elements(&self) -> Vec<Element>;

    /// Every element including tombstones.
    fn get_elements_including_deleted(&self) -> Vec<Element>;

    /// Replace the scene.
    fn apply_elements(&self, elements: Vec<Element>, origin: ApplyOrigin);

    /// Attachments currently held by the editor, keyed by id.
    fn get_files(&self) -> Vec<BinaryFile>;

    fn add_files(&self, files: Vec<BinaryFile>);
}
