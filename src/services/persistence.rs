//! Persistence bridge — durable saves, decoupled from live replication.
//!
//! DESIGN
//! ======
//! The relay only forwards; it never stores. Durability comes from flushing
//! the editor's scene to the board backend on a timer and on key triggers
//! (page hidden, unload, stop). Each flush also refreshes the local draft.
//!
//! Writes are serialized through a write slot. The snapshot is read only
//! after the slot is acquired, so a write that waited behind another always
//! carries the newer scene and can never be overtaken by an older one.
//! `saved_version` (the scene version of the last successful write) only
//! ever grows, but it is reporting only. Change detection compares a digest
//! of every element's identity, version, nonce, tombstone and payload
//! against the digest of the last successful write, so a same-version
//! variant that won a tie-break, or a scene rolled back to an older
//! baseline, is still written.
//!
//! ERROR HANDLING
//! ==============
//! Nothing here is allowed to break collaboration. Failures come back as a
//! [`FlushOutcome`] and are logged. An empty read from the editor while the
//! scene is known to be non-empty is skipped, never written. A permission
//! failure flips the bridge read-only and raises exactly one notice.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::editor::EditorApi;
use crate::element::{Element, now_ms, scene_version};
use crate::error::ErrorCode;
use crate::services::backend::{BackendError, BoardApi, BoardUpdate};
use crate::state::{CollabState, Notice};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    Periodic,
    Hidden,
    Unload,
    Stop,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Editor returned no elements for a scene known to have some.
    EmptyScene,
    /// Nothing changed since the last successful save.
    Unchanged,
    /// An earlier save was refused for lack of permission.
    ReadOnly,
}

#[derive(Debug, Clone)]
pub enum FlushOutcome {
    Saved { version: u64 },
    Skipped(SkipReason),
    Failed(BackendError),
}

// =============================================================================
// DRAFTS
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum DraftError {
    #[error("draft io: {0}")]
    Io(#[from] std::io::Error),
    #[error("draft encoding: {0}")]
    Json(#[from] serde_json::Error),
}

impl ErrorCode for DraftError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Io(_) => "E_DRAFT_IO",
            Self::Json(_) => "E_DRAFT_JSON",
        }
    }
}

/// Local copy of the last flushed scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Draft {
    pub elements: Vec<Element>,
    #[serde(default)]
    pub title: Option<String>,
    pub saved_at: i64,
}

pub trait DraftStore: Send + Sync {
    /// # Errors
    ///
    /// Storage or encoding failure.
    fn save(&self, board_id: &str, draft: &Draft) -> Result<(), DraftError>;

    /// # Errors
    ///
    /// Storage or decoding failure. A missing draft is `Ok(None)`.
    fn load(&self, board_id: &str) -> Result<Option<Draft>, DraftError>;

    /// # Errors
    ///
    /// Storage failure. Clearing a missing draft succeeds.
    fn clear(&self, board_id: &str) -> Result<(), DraftError>;
}

/// One JSON file per board under a directory.
#[derive(Debug, Clone)]
pub struct FileDraftStore {
    dir: PathBuf,
}

impl FileDraftStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, board_id: &str) -> PathBuf {
        let safe: String = board_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{safe}.json"))
    }
}

impl DraftStore for FileDraftStore {
    fn save(&self, board_id: &str, draft: &Draft) -> Result<(), DraftError> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path_for(board_id);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec(draft)?)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn load(&self, board_id: &str) -> Result<Option<Draft>, DraftError> {
        read_draft(&self.path_for(board_id))
    }

    fn clear(&self, board_id: &str) -> Result<(), DraftError> {
        match std::fs::remove_file(self.path_for(board_id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn read_draft(path: &Path) -> Result<Option<Draft>, DraftError> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

// =============================================================================
// BRIDGE
// =============================================================================

pub struct PersistenceBridge {
    board_id: String,
    api: Arc<dyn BoardApi>,
    editor: Arc<dyn EditorApi>,
    drafts: Option<Arc<dyn DraftStore>>,
    state: CollabState,
    write_slot: tokio::sync::Mutex<()>,
    saved_version: AtomicU64,
    saved_digest: Mutex<Option<[u8; 32]>>,
    known_non_empty: AtomicBool,
    read_only: AtomicBool,
    title: Mutex<Option<String>>,
    title_dirty: AtomicBool,
}

impl std::fmt::Debug for PersistenceBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceBridge")
            .field("board_id", &self.board_id)
            .field("saved_version", &self.saved_version())
            .field("read_only", &self.is_read_only())
            .finish_non_exhaustive()
    }
}

impl PersistenceBridge {
    pub fn new(
        board_id: impl Into<String>,
        api: Arc<dyn BoardApi>,
        editor: Arc<dyn EditorApi>,
        drafts: Option<Arc<dyn DraftStore>>,
        state: CollabState,
    ) -> Self {
        Self {
            board_id: board_id.into(),
            api,
            editor,
            drafts,
            state,
            write_slot: tokio::sync::Mutex::new(()),
            saved_version: AtomicU64::new(0),
            saved_digest: Mutex::new(None),
            known_non_empty: AtomicBool::new(false),
            read_only: AtomicBool::new(false),
            title: Mutex::new(None),
            title_dirty: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn board_id(&self) -> &str {
        &self.board_id
    }

    #[must_use]
    pub fn saved_version(&self) -> u64 {
        self.saved_version.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.read_only.load(Ordering::SeqCst)
    }

    /// Tell the bridge what the in-memory scene looks like. Once a non-empty
    /// scene has been seen, empty reads are treated as transient.
    pub fn note_scene(&self, elements: &[Element]) {
        if !elements.is_empty() {
            self.known_non_empty.store(true, Ordering::SeqCst);
        }
    }

    /// Title to send with the next save.
    pub fn set_title(&self, title: impl Into<String>) {
        *self.title.lock().unwrap_or_else(PoisonError::into_inner) = Some(title.into());
        self.title_dirty.store(true, Ordering::SeqCst);
    }

    /// Forget what the backend was last sent, so the next flush writes
    /// whatever the editor holds. Used after the editor is rolled back.
    pub fn forget_saved_scene(&self) {
        *self.saved_digest.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn is_saved(&self, digest: &[u8; 32]) -> bool {
        self.saved_digest.lock().unwrap_or_else(PoisonError::into_inner).as_ref() == Some(digest)
    }

    fn title(&self) -> Option<String> {
        self.title.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub async fn flush(&self, reason: FlushReason) -> FlushOutcome {
        if self.is_read_only() {
            return FlushOutcome::Skipped(SkipReason::ReadOnly);
        }

        // PHASE: ACQUIRE WRITE SLOT, THEN SNAPSHOT
        // WHY: a queued write must carry the scene as of its turn, not as of
        // when it was scheduled.
        let _slot = self.write_slot.lock().await;
        if self.is_read_only() {
            return FlushOutcome::Skipped(SkipReason::ReadOnly);
        }
        let elements = self.editor.get_elements_including_deleted();
        if elements.is_empty() && self.known_non_empty.load(Ordering::SeqCst) {
            warn!(board_id = %self.board_id, ?reason, "persistence: empty read for non-empty scene; skipped");
            return FlushOutcome::Skipped(SkipReason::EmptyScene);
        }
        self.note_scene(&elements);

        let version = scene_version(&elements);
        let digest = scene_digest(&elements);
        let title_dirty = self.title_dirty.swap(false, Ordering::SeqCst);
        if self.is_saved(&digest) && !title_dirty {
            debug!(board_id = %self.board_id, version, ?reason, "persistence: unchanged");
            return FlushOutcome::Skipped(SkipReason::Unchanged);
        }

        // PHASE: LOCAL DRAFT
        let title = self.title();
        self.save_draft(&elements, title.clone());

        // PHASE: BACKEND WRITE
        let count = elements.len();
        let update = BoardUpdate { elements, title };
        match self.api.update_board(&self.board_id, &update).await {
            Ok(()) => {
                self.saved_version.fetch_max(version, Ordering::SeqCst);
                *self.saved_digest.lock().unwrap_or_else(PoisonError::into_inner) = Some(digest);
                info!(board_id = %self.board_id, version, count, ?reason, "persistence: saved");
                FlushOutcome::Saved { version }
            }
            Err(BackendError::PermissionDenied) => {
                if !self.read_only.swap(true, Ordering::SeqCst) {
                    warn!(board_id = %self.board_id, "persistence: permission denied; board is read-only");
                    self.state.notify(Notice::PermissionDenied);
                }
                FlushOutcome::Failed(BackendError::PermissionDenied)
            }
            Err(e) => {
                if title_dirty {
                    self.title_dirty.store(true, Ordering::SeqCst);
                }
                warn!(
                    board_id = %self.board_id,
                    error = %e,
                    code = e.error_code(),
                    retryable = e.retryable(),
                    "persistence: save failed"
                );
                FlushOutcome::Failed(e)
            }
        }
    }

    fn save_draft(&self, elements: &[Element], title: Option<String>) {
        let Some(drafts) = &self.drafts else {
            return;
        };
        let draft = Draft { elements: elements.to_vec(), title, saved_at: now_ms() };
        if let Err(e) = drafts.save(&self.board_id, &draft) {
            warn!(board_id = %self.board_id, error = %e, "persistence: draft save failed");
        }
    }

    /// Local draft, if any. Hosts read it on startup to offer recovery of
    /// edits that never reached the backend.
    #[must_use]
    pub fn load_draft(&self) -> Option<Draft> {
        let drafts = self.drafts.as_ref()?;
        match drafts.load(&self.board_id) {
            Ok(draft) => draft,
            Err(e) => {
                warn!(board_id = %self.board_id, error = %e, "persistence: draft load failed");
                None
            }
        }
    }

    pub fn clear_draft(&self) {
        let Some(drafts) = &self.drafts else {
            return;
        };
        if let Err(e) = drafts.clear(&self.board_id) {
            warn!(board_id = %self.board_id, error = %e, "persistence: draft clear failed");
        }
    }
}

/// Order-independent digest of everything that distinguishes one scene from
/// another.
fn scene_digest(elements: &[Element]) -> [u8; 32] {
    let mut sorted: Vec<&Element> = elements.iter().collect();
    sorted.sort_by(|a, b| a.id.cmp(&b.id));

    let mut hasher = Sha256::new();
    for el in sorted {
        hasher.update(el.id.as_bytes());
        hasher.update([0]);
        hasher.update(el.version.to_be_bytes());
        hasher.update(el.version_nonce.to_be_bytes());
        hasher.update([u8::from(el.is_deleted)]);
        hasher.update(serde_json::to_vec(&el.payload).unwrap_or_default());
    }
    let mut digest = [0u8; 32];
    digest.copy_from_slice(&hasher.finalize());
    digest
}

#[cfg(test)]
#[path = "persistence_test.rs"]
mod tests;
