//! File sync — attachments moved out of band from the element stream.
//!
//! DESIGN
//! ======
//! Attachments are too large for scene frames. Each one is packed
//! (`u32` metadata length, metadata JSON, raw bytes), compressed with LZ4 and
//! sealed with the room key, then uploaded to a one-time URL from the
//! backend. Downloads go the other way after one batch URL lookup.
//!
//! [`FileManager`] remembers which ids are being fetched or saved, and which
//! already succeeded or failed, so repeated scene changes do not re-transfer
//! the same file.
//!
//! ERROR HANDLING
//! ==============
//! Every failure is per id. A report lists what succeeded and what failed;
//! the caller flags elements with [`FileStatus`] and retries the failed ids
//! later. A failed batch lookup fails every id in it and nothing else.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::crypto::{CryptoError, RoomKey};
use crate::editor::BinaryFile;
use crate::element::{Element, FileId, FileStatus};
use crate::error::ErrorCode;
use crate::services::backend::{BackendError, BoardApi};

const BLOB_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, thiserror::Error)]
pub enum FileSyncError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error("decompression failed: {0}")]
    Decompress(String),
    #[error("malformed file payload: {0}")]
    Format(String),
}

impl ErrorCode for FileSyncError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Backend(e) => e.error_code(),
            Self::Crypto(e) => e.error_code(),
            Self::Decompress(_) => "E_FILE_DECOMPRESS",
            Self::Format(_) => "E_FILE_FORMAT",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Backend(e) if e.retryable())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileSyncReport {
    pub saved: Vec<FileId>,
    pub errored: Vec<FileId>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchReport {
    pub loaded: Vec<BinaryFile>,
    pub errored: Vec<FileId>,
}

// =============================================================================
// ENCODING
// =============================================================================

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileMeta {
    mime_type: String,
    created: i64,
}

/// Pack, compress and seal one attachment.
///
/// # Errors
///
/// Sealing failure, or metadata that does not fit the length prefix.
pub fn encode_file(file: &BinaryFile, key: &RoomKey) -> Result<Vec<u8>, FileSyncError> {
    let meta = serde_json::to_vec(&FileMeta { mime_type: file.mime_type.clone(), created: file.created })
        .map_err(|e| FileSyncError::Format(e.to_string()))?;
    let meta_len = u32::try_from(meta.len()).map_err(|_| FileSyncError::Format("metadata too large".into()))?;

    let mut packed = Vec::with_capacity(4 + meta.len() + file.data.len());
    packed.extend_from_slice(&meta_len.to_be_bytes());
    packed.extend_from_slice(&meta);
    packed.extend_from_slice(&file.data);

    let compressed = lz4_flex::compress_prepend_size(&packed);
    Ok(key.seal(&compressed)?)
}

/// Inverse of [`encode_file`].
///
/// # Errors
///
/// Wrong key, corrupt compression, or a malformed packed layout.
pub fn decode_file(id: &str, sealed: &[u8], key: &RoomKey) -> Result<BinaryFile, FileSyncError> {
    let compressed = key.open(sealed)?;
    let packed = lz4_flex::decompress_size_prepended(&compressed)
        .map_err(|e| FileSyncError::Decompress(e.to_string()))?;

    let Some((len_bytes, rest)) = packed.split_first_chunk::<4>() else {
        return Err(FileSyncError::Format("missing metadata length".into()));
    };
    let meta_len = u32::from_be_bytes(*len_bytes) as usize;
    if rest.len() < meta_len {
        return Err(FileSyncError::Format(format!("metadata length {meta_len} exceeds payload")));
    }
    let (meta, data) = rest.split_at(meta_len);
    let meta: FileMeta = serde_json::from_slice(meta).map_err(|e| FileSyncError::Format(e.to_string()))?;

    Ok(BinaryFile { id: id.to_owned(), mime_type: meta.mime_type, data: data.to_vec(), created: meta.created })
}

// =============================================================================
// MANAGER
// =============================================================================

#[derive(Default)]
struct Tracker {
    fetching: HashSet<FileId>,
    saving: HashSet<FileId>,
    saved: HashSet<FileId>,
    errored: HashSet<FileId>,
}

pub struct FileManager {
    board_id: String,
    api: Arc<dyn BoardApi>,
    key: RoomKey,
    tracker: Mutex<Tracker>,
}

impl std::fmt::Debug for FileManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileManager").field("board_id", &self.board_id).finish_non_exhaustive()
    }
}

impl FileManager {
    pub fn new(board_id: impl Into<String>, api: Arc<dyn BoardApi>, key: RoomKey) -> Self {
        Self { board_id: board_id.into(), api, key, tracker: Mutex::new(Tracker::default()) }
    }

    fn tracker(&self) -> MutexGuard<'_, Tracker> {
        self.tracker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn is_saved(&self, id: &str) -> bool {
        self.tracker().saved.contains(id)
    }

    #[must_use]
    pub fn is_errored(&self, id: &str) -> bool {
        self.tracker().errored.contains(id)
    }

    /// Files not yet saved, in flight, or failed.
    #[must_use]
    pub fn pending_uploads(&self, files: &[BinaryFile]) -> Vec<BinaryFile> {
        let tracker = self.tracker();
        files
            .iter()
            .filter(|f| {
                !tracker.saved.contains(&f.id) && !tracker.saving.contains(&f.id) && !tracker.errored.contains(&f.id)
            })
            .cloned()
            .collect()
    }

    /// Referenced ids this client neither holds nor is fetching.
    #[must_use]
    pub fn missing_files(&self, elements: &[Element], held: &[BinaryFile]) -> Vec<FileId> {
        let held: HashSet<&str> = held.iter().map(|f| f.id.as_str()).collect();
        let tracker = self.tracker();
        let mut seen = HashSet::new();
        elements
            .iter()
            .filter(|e| !e.is_deleted)
            .filter_map(|e| e.file_id.as_ref())
            .filter(|id| !held.contains(id.as_str()) && !tracker.fetching.contains(*id) && !tracker.errored.contains(*id))
            .filter(|id| seen.insert((*id).clone()))
            .cloned()
            .collect()
    }

    /// Forget failures so the ids are retried on the next pass.
    pub fn retry_errored(&self) -> Vec<FileId> {
        let mut tracker = self.tracker();
        tracker.errored.drain().collect()
    }

    pub async fn save_files(&self, files: Vec<BinaryFile>) -> FileSyncReport {
        let files: Vec<BinaryFile> = {
            let mut tracker = self.tracker();
            let mut claimed = Vec::with_capacity(files.len());
            for file in files {
                if tracker.saved.contains(&file.id) || !tracker.saving.insert(file.id.clone()) {
                    continue;
                }
                claimed.push(file);
            }
            claimed
        };
        if files.is_empty() {
            return FileSyncReport::default();
        }

        let results = join_all(files.iter().map(|f| self.upload(f))).await;

        let mut report = FileSyncReport::default();
        let mut tracker = self.tracker();
        for (file, result) in files.iter().zip(results) {
            tracker.saving.remove(&file.id);
            match result {
                Ok(()) => {
                    tracker.errored.remove(&file.id);
                    tracker.saved.insert(file.id.clone());
                    report.saved.push(file.id.clone());
                }
                Err(e) => {
                    warn!(file_id = %file.id, error = %e, code = e.error_code(), "files: upload failed");
                    tracker.errored.insert(file.id.clone());
                    report.errored.push(file.id.clone());
                }
            }
        }
        info!(board_id = %self.board_id, saved = report.saved.len(), errored = report.errored.len(), "files: saved");
        report
    }

    async fn upload(&self, file: &BinaryFile) -> Result<(), FileSyncError> {
        let sealed = encode_file(file, &self.key)?;
        let url = self.api.get_upload_url(&self.board_id, &file.id, &file.mime_type).await?;
        self.api.put_blob(&url, BLOB_CONTENT_TYPE, sealed).await?;
        Ok(())
    }

    pub async fn fetch_files(&self, ids: &[FileId]) -> FetchReport {
        let ids: Vec<FileId> = {
            let mut tracker = self.tracker();
            ids.iter().filter(|id| tracker.fetching.insert((*id).clone())).cloned().collect()
        };
        if ids.is_empty() {
            return FetchReport::default();
        }

        let mut report = FetchReport::default();
        let urls: HashMap<FileId, String> = match self.api.get_batch_file_urls(&self.board_id, &ids).await {
            Ok(urls) => urls,
            Err(e) => {
                warn!(board_id = %self.board_id, count = ids.len(), error = %e, "files: batch lookup failed");
                report.errored = ids;
                self.finish_fetch(&report);
                return report;
            }
        };

        let mut jobs = Vec::new();
        for id in &ids {
            match urls.get(id) {
                Some(url) => jobs.push(self.download(id, url)),
                None => {
                    debug!(file_id = %id, "files: no url for file");
                    report.errored.push(id.clone());
                }
            }
        }
        for result in join_all(jobs).await {
            match result {
                Ok(file) => report.loaded.push(file),
                Err((id, e)) => {
                    warn!(file_id = %id, error = %e, code = e.error_code(), "files: download failed");
                    report.errored.push(id);
                }
            }
        }

        self.finish_fetch(&report);
        info!(
            board_id = %self.board_id,
            loaded = report.loaded.len(),
            errored = report.errored.len(),
            "files: fetched"
        );
        report
    }

    async fn download(&self, id: &str, url: &str) -> Result<BinaryFile, (FileId, FileSyncError)> {
        let fetch = async {
            let sealed = self.api.get_blob(url).await?;
            decode_file(id, &sealed, &self.key)
        };
        fetch.await.map_err(|e| (id.to_owned(), e))
    }

    fn finish_fetch(&self, report: &FetchReport) {
        let mut tracker = self.tracker();
        for file in &report.loaded {
            tracker.fetching.remove(&file.id);
            tracker.errored.remove(&file.id);
            tracker.saved.insert(file.id.clone());
        }
        for id in &report.errored {
            tracker.fetching.remove(id);
            tracker.errored.insert(id.clone());
        }
    }
}

/// Set `status` on elements whose attachment is in `saved` or `errored`,
/// bumping each changed element so the flag replicates. Returns how many
/// elements changed.
pub fn flag_elements(elements: &mut [Element], saved: &[FileId], errored: &[FileId], now_ms: i64) -> usize {
    let saved: HashSet<&str> = saved.iter().map(String::as_str).collect();
    let errored: HashSet<&str> = errored.iter().map(String::as_str).collect();
    let mut changed = 0;
    for el in elements.iter_mut().filter(|e| !e.is_deleted) {
        let Some(file_id) = el.file_id.as_deref() else {
            continue;
        };
        let status = if errored.contains(file_id) {
            FileStatus::Error
        } else if saved.contains(file_id) {
            FileStatus::Saved
        } else {
            continue;
        };
        if el.status != Some(status) {
            el.status = Some(status);
            el.bump(now_ms);
            changed += 1;
        }
    }
    changed
}

#[cfg(test)]
#[path = "files_test.rs"]
mod tests;
