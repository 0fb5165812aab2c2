//! Session-scoped observables consumed by the UI.
//!
//! DESIGN
//! ======
//! One `CollabState` per [`crate::collab::Collab`], handed to consumers
//! explicitly. Level-triggered values (connection status, indicator,
//! collaborating flag, collaborator list) are `watch` channels so late
//! subscribers see the current value. One-shot user notifications (toasts,
//! dialogs) go out on a `broadcast` bus; a notice sent with no subscriber is
//! dropped.

use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tracing::debug;

use crate::element::FileId;
use crate::presence::Collaborator;
use crate::transport::ConnectionStatus;

const NOTICE_CAPACITY: usize = 64;

/// What the status badge shows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StatusIndicator {
    #[default]
    Offline,
    Connecting,
    Reconnecting,
    Connected,
}

/// One-shot user-facing notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// Link lost after a successful connect, past the debounce window.
    Reconnecting,
    /// Link restored after `Reconnecting` was shown.
    Reconnected,
    /// Saving is not permitted; the board is read-only from now on.
    PermissionDenied,
    /// Some attachments failed to transfer and are marked for retry.
    FilesFailed { file_ids: Vec<FileId> },
    /// Unrecoverable session error, shown as a blocking dialog.
    Fatal { code: &'static str, message: String },
}

struct Inner {
    status: watch::Sender<ConnectionStatus>,
    indicator: watch::Sender<StatusIndicator>,
    collaborating: watch::Sender<bool>,
    collaborators: watch::Sender<Vec<Collaborator>>,
    notices: broadcast::Sender<Notice>,
}

#[derive(Clone)]
pub struct CollabState {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for CollabState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollabState")
            .field("status", &*self.inner.status.borrow())
            .field("indicator", &*self.inner.indicator.borrow())
            .field("collaborating", &*self.inner.collaborating.borrow())
            .finish_non_exhaustive()
    }
}

impl Default for CollabState {
    fn default() -> Self {
        Self::new()
    }
}

impl CollabState {
    #[must_use]
    pub fn new() -> Self {
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                status: watch::channel(ConnectionStatus::Disconnected).0,
                indicator: watch::channel(StatusIndicator::Offline).0,
                collaborating: watch::channel(false).0,
                collaborators: watch::channel(Vec::new()).0,
                notices,
            }),
        }
    }

    // =========================================================================
    // READ / SUBSCRIBE
    // =========================================================================

    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        *self.inner.status.borrow()
    }

    #[must_use]
    pub fn indicator(&self) -> StatusIndicator {
        *self.inner.indicator.borrow()
    }

    #[must_use]
    pub fn is_collaborating(&self) -> bool {
        *self.inner.collaborating.borrow()
    }

    #[must_use]
    pub fn collaborators(&self) -> Vec<Collaborator> {
        self.inner.collaborators.borrow().clone()
    }

    #[must_use]
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.status.subscribe()
    }

    #[must_use]
    pub fn watch_indicator(&self) -> watch::Receiver<StatusIndicator> {
        self.inner.indicator.subscribe()
    }

    #[must_use]
    pub fn watch_collaborating(&self) -> watch::Receiver<bool> {
        self.inner.collaborating.subscribe()
    }

    #[must_use]
    pub fn watch_collaborators(&self) -> watch::Receiver<Vec<Collaborator>> {
        self.inner.collaborators.subscribe()
    }

    #[must_use]
    pub fn notices(&self) -> broadcast::Receiver<Notice> {
        self.inner.notices.subscribe()
    }

    // =========================================================================
    // WRITE
    // =========================================================================

    pub(crate) fn set_status(&self, status: ConnectionStatus) {
        self.inner.status.send_if_modified(|s| replace_if_changed(s, status));
    }

    pub(crate) fn set_indicator(&self, indicator: StatusIndicator) {
        self.inner.indicator.send_if_modified(|s| replace_if_changed(s, indicator));
    }

    pub(crate) fn set_collaborating(&self, collaborating: bool) {
        self.inner.collaborating.send_if_modified(|s| replace_if_changed(s, collaborating));
    }

    pub(crate) fn set_collaborators(&self, collaborators: Vec<Collaborator>) {
        self.inner.collaborators.send_replace(collaborators);
    }

    pub(crate) fn notify(&self, notice: Notice) {
        if let Err(broadcast::error::SendError(notice)) = self.inner.notices.send(notice) {
            debug!(?notice, "state: notice dropped, no subscribers");
        }
    }
}

fn replace_if_changed<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        return false;
    }
    *slot = value;
    true
}

#[cfg(test)]
#[path = "state_helpers_test.rs"]
pub mod test_helpers;

#[cfg(test)]
#[path = "state_test.rs"]
mod tests;
