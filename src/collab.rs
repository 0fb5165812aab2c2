//! Collaboration session — the public entry point of the sync core.
//!
//! DESIGN
//! ======
//! [`Collab`] is an explicit object with `start`/`stop` lifecycle methods and
//! injected collaborators (editor, backend, connector, scheduler, drafts). At
//! most one session runs at a time. Each session owns its replicated scene,
//! its connection lifecycle, presence records and file tracker, and one
//! spawned driver task that processes everything asynchronous in order:
//! transport events, scene observer callbacks, timer callbacks and finished
//! file transfers.
//!
//! Local edits enter through [`Collab::sync_elements`] and leave as deltas.
//! Remote updates enter through the scene observer, are reconciled against
//! the editor and applied with [`ApplyOrigin::Remote`]. Ids where the local
//! copy won are rewritten into the document so every peer converges on the
//! same maximum.
//!
//! LIFECYCLE
//! =========
//! 1. `start_collaboration` stops any prior session (keeping its state),
//!    records the baseline, seeds the document, opens the portal
//! 2. `Joined` → full state to the room; new peer seen → full state again
//! 3. every `full_sync_interval`: full state + persistence flush
//! 4. `stop_collaboration` flushes (awaited), then closes the portal
//!
//! Every event carries the session generation it was produced under. A
//! callback from an older session is dropped, so a fast stop/start never
//! lets the old session touch the new one.
//!
//! ERROR HANDLING
//! ==============
//! Network and backend failures never escape: they surface through
//! [`CollabState`] as status, indicator and notices. A room key mismatch is
//! the one fatal case; it raises [`Notice::Fatal`] and stops the session,
//! keeping the local scene.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::CollabConfig;
use crate::crdt::ReplicatedScene;
use crate::editor::{ApplyOrigin, EditorApi};
use crate::element::{Element, ElementId, now_ms};
use crate::error::ErrorCode;
use crate::lifecycle::{ConnectionLifecycle, LifecycleEffect};
use crate::presence::{Collaborators, UserIdleState};
use crate::protocol::{Pointer, PointerButton, SocketMessage};
use crate::reconcile::reconcile;
use crate::room::{Room, RoomError};
use crate::scheduler::{CancelToken, Scheduler};
use crate::services::backend::BoardApi;
use crate::services::files::{FetchReport, FileManager, FileSyncReport, flag_elements};
use crate::services::persistence::{Draft, DraftStore, FlushOutcome, FlushReason, PersistenceBridge};
use crate::state::{CollabState, Notice};
use crate::transport::{ConnectionStatus, Connector, Portal, TransportEvent, TransportEventKind};

const TRANSPORT_EVENT_CAPACITY: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum CollabError {
    #[error(transparent)]
    Room(#[from] RoomError),
    #[error("no collaboration session")]
    NotCollaborating,
}

impl ErrorCode for CollabError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Room(_) => "E_ROOM_LINK",
            Self::NotCollaborating => "E_NOT_COLLABORATING",
        }
    }
}

/// Everything a [`Collab`] needs from its host.
pub struct CollabDeps {
    pub editor: Arc<dyn EditorApi>,
    pub api: Arc<dyn BoardApi>,
    pub connector: Arc<dyn Connector>,
    pub scheduler: Arc<dyn Scheduler>,
    pub drafts: Option<Arc<dyn DraftStore>>,
    pub config: CollabConfig,
    /// Display name used for presence.
    pub username: String,
    pub board_id: String,
}

/// Identifies one started session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHandle {
    generation: u64,
    room: Room,
}

impl SessionHandle {
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[must_use]
    pub fn room_id(&self) -> &str {
        &self.room.room_id
    }

    #[must_use]
    pub fn share_link(&self, base: &str) -> String {
        self.room.share_link(base)
    }
}

/// Page-level signals from the host environment.
#[async_trait]
pub trait EnvironmentSignals: Send + Sync {
    /// Page hidden or shown. Hiding reports the user away and flushes.
    async fn on_visibility_change(&self, hidden: bool);

    /// The page is about to go away. Flushes.
    async fn on_before_unload(&self);
}

// =============================================================================
// SESSION
// =============================================================================

#[derive(Debug)]
enum SessionEvent {
    /// The scene observer saw a remote transaction.
    Remote(Vec<Element>),
    ReconnectNoticeDue,
    IdleTimeout,
    UploadDue,
    FilesSaved(FileSyncReport),
    FilesFetched(FetchReport),
    PeriodicSync,
}

#[derive(Debug)]
struct Tagged {
    generation: u64,
    event: SessionEvent,
}

#[derive(Default)]
struct Timers {
    reconnect_notice: CancelToken,
    idle: CancelToken,
    upload: CancelToken,
    periodic: CancelToken,
}

impl Timers {
    fn cancel_all(&mut self) {
        self.reconnect_notice.cancel();
        self.idle.cancel();
        self.upload.cancel();
        self.periodic.cancel();
    }
}

struct Session {
    handle: SessionHandle,
    scene: ReplicatedScene,
    baseline: Vec<Element>,
    files: Arc<FileManager>,
    lifecycle: ConnectionLifecycle,
    collaborators: Collaborators,
    peers: HashSet<String>,
    socket_id: Option<String>,
    user_state: UserIdleState,
    hidden: bool,
    selection: Vec<ElementId>,
    last_pointer_at: Option<Instant>,
    timers: Timers,
    events: mpsc::UnboundedSender<Tagged>,
    driver: JoinHandle<()>,
}

impl Session {
    fn generation(&self) -> u64 {
        self.handle.generation
    }

    fn idle_message(&self, username: &str) -> SocketMessage {
        SocketMessage::IdleStatus {
            socket_id: self.socket_id.clone().unwrap_or_default(),
            username: username.to_owned(),
            user_state: self.user_state,
        }
    }
}

enum Flow {
    Continue,
    Stop,
}

// =============================================================================
// COLLAB
// =============================================================================

struct Inner {
    editor: Arc<dyn EditorApi>,
    api: Arc<dyn BoardApi>,
    scheduler: Arc<dyn Scheduler>,
    config: CollabConfig,
    username: String,
    board_id: String,
    state: CollabState,
    portal: Portal,
    persistence: Arc<PersistenceBridge>,
    session: Mutex<Option<Session>>,
    generation: AtomicU64,
}

#[derive(Clone)]
pub struct Collab {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Collab {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collab")
            .field("board_id", &self.inner.board_id)
            .field("generation", &self.inner.generation())
            .field("state", &self.inner.state)
            .finish_non_exhaustive()
    }
}

impl Collab {
    #[must_use]
    pub fn new(deps: CollabDeps) -> Self {
        let state = CollabState::new();
        let persistence = Arc::new(PersistenceBridge::new(
            deps.board_id.clone(),
            deps.api.clone(),
            deps.editor.clone(),
            deps.drafts,
            state.clone(),
        ));
        let portal = Portal::new(deps.connector, deps.config.clone());
        Self {
            inner: Arc::new(Inner {
                editor: deps.editor,
                api: deps.api,
                scheduler: deps.scheduler,
                config: deps.config,
                username: deps.username,
                board_id: deps.board_id,
                state,
                portal,
                persistence,
                session: Mutex::new(None),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Observables for the UI.
    #[must_use]
    pub fn state(&self) -> CollabState {
        self.inner.state.clone()
    }

    #[must_use]
    pub fn is_collaborating(&self) -> bool {
        self.inner.state.is_collaborating()
    }

    /// Handle of the running session, if any.
    #[must_use]
    pub fn session(&self) -> Option<SessionHandle> {
        self.inner.lock_session().as_ref().map(|s| s.handle.clone())
    }

    /// Share link of the running session.
    ///
    /// # Errors
    ///
    /// `NotCollaborating` when no session runs.
    pub fn share_link(&self, base: &str) -> Result<String, CollabError> {
        self.session().map(|h| h.share_link(base)).ok_or(CollabError::NotCollaborating)
    }

    /// Join the room named by a share link.
    ///
    /// # Errors
    ///
    /// The link has no valid room fragment.
    pub async fn start_from_link(&self, url: &str) -> Result<SessionHandle, CollabError> {
        let room = Room::from_link(url)?;
        Ok(self.start_collaboration(room).await)
    }

    pub async fn start_collaboration(&self, room: Room) -> SessionHandle {
        self.stop_collaboration(true).await;
        let inner = &self.inner;
        let generation = inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let handle = SessionHandle { generation, room: room.clone() };

        let (events_tx, events_rx) = mpsc::unbounded_channel::<Tagged>();
        let (transport_tx, transport_rx) = mpsc::channel::<TransportEvent>(TRANSPORT_EVENT_CAPACITY);

        let mut scene = ReplicatedScene::new();
        let observer_tx = events_tx.clone();
        scene.observe(move |elements| {
            let event = Tagged { generation, event: SessionEvent::Remote(elements.to_vec()) };
            if observer_tx.send(event).is_err() {
                debug!(generation, "collab: observer fired after driver exit");
            }
        });

        // PHASE: OPEN PORTAL, THEN SEED
        // WHY: opening resets the version store; seeding records the baseline
        // as written so the first delta only carries real edits.
        inner.portal.open(room.clone(), transport_tx);
        let baseline = inner.editor.get_elements_including_deleted();
        inner.portal.broadcast_scene(&mut scene, &baseline, &HashSet::new());
        inner.persistence.note_scene(&baseline);

        {
            // Held across spawn so the driver never sees a half-built session.
            let mut slot = inner.lock_session();
            let driver = tokio::spawn(drive(inner.clone(), generation, transport_rx, events_rx));
            let mut session = Session {
                handle: handle.clone(),
                scene,
                baseline,
                files: Arc::new(FileManager::new(inner.board_id.clone(), inner.api.clone(), room.room_key.clone())),
                lifecycle: ConnectionLifecycle::new(),
                collaborators: Collaborators::new(),
                peers: HashSet::new(),
                socket_id: None,
                user_state: UserIdleState::Active,
                hidden: false,
                selection: Vec::new(),
                last_pointer_at: None,
                timers: Timers::default(),
                events: events_tx,
                driver,
            };
            session.timers.periodic = inner.post_after(&session, inner.config.full_sync_interval, SessionEvent::PeriodicSync);
            session.timers.idle = inner.post_after(&session, inner.config.idle_timeout, SessionEvent::IdleTimeout);
            session.timers.upload = inner.post_after(&session, inner.config.file_upload_throttle, SessionEvent::UploadDue);
            *slot = Some(session);
        }

        inner.state.set_collaborating(true);
        info!(board_id = %inner.board_id, room_id = %room.room_id, generation, "collab: started");
        handle
    }

    /// End the session. The scene is flushed before the portal closes. With
    /// `keep_remote_state` false the editor goes back to the scene it held
    /// when the session started and the local draft is cleared.
    pub async fn stop_collaboration(&self, keep_remote_state: bool) {
        let inner = &self.inner;
        let Some(mut session) = inner.lock_session().take() else {
            return;
        };
        inner.generation.fetch_add(1, Ordering::SeqCst);
        session.driver.abort();
        session.timers.cancel_all();

        // PHASE: FLUSH BEFORE TEARDOWN
        // WHY: the last edit may exist only in memory and in the room.
        inner.persistence.flush(FlushReason::Stop).await;
        inner.portal.close();

        let effects = session.lifecycle.close();
        inner.apply_effects(&mut session, effects);
        inner.state.set_status(ConnectionStatus::Disconnected);
        inner.state.set_collaborators(Vec::new());
        inner.state.set_collaborating(false);

        if !keep_remote_state {
            inner.editor.apply_elements(session.baseline, ApplyOrigin::Remote);
            inner.persistence.forget_saved_scene();
            inner.persistence.clear_draft();
        }
        info!(
            board_id = %inner.board_id,
            room_id = %session.handle.room.room_id,
            generation = session.handle.generation,
            keep_remote_state,
            "collab: stopped"
        );
    }

    /// Called by the editor on every local change. Sends only elements whose
    /// version moved since the last sync. Returns whether a frame went out.
    pub fn sync_elements(&self, elements: &[Element]) -> bool {
        let inner = &self.inner;
        let mut guard = inner.lock_session();
        let Some(session) = guard.as_mut() else {
            return false;
        };
        let sent = inner.portal.broadcast_scene(&mut session.scene, elements, &HashSet::new());
        inner.persistence.note_scene(elements);

        let has_files = elements.iter().any(|e| e.file_id.is_some() && !e.is_deleted);
        if has_files && !session.timers.upload.is_armed() {
            session.timers.upload = inner.post_after(session, inner.config.file_upload_throttle, SessionEvent::UploadDue);
        }
        sent
    }

    /// Broadcast the local pointer, at most once per `cursor_sync_interval`.
    /// Returns whether it was sent.
    pub fn on_pointer_update(&self, pointer: Pointer, button: PointerButton) -> bool {
        let inner = &self.inner;
        let mut guard = inner.lock_session();
        let Some(session) = guard.as_mut() else {
            return false;
        };

        inner.note_activity(session);

        let now = Instant::now();
        if session
            .last_pointer_at
            .is_some_and(|at| now.duration_since(at) < inner.config.cursor_sync_interval)
        {
            return false;
        }
        session.last_pointer_at = Some(now);

        let message = SocketMessage::PointerUpdate {
            socket_id: session.socket_id.clone().unwrap_or_default(),
            username: inner.username.clone(),
            pointer,
            button,
            selected_element_ids: session.selection.clone(),
        };
        inner.portal.broadcast_presence(&message)
    }

    /// Selection to report with the next pointer update.
    pub fn set_selected_elements(&self, ids: Vec<ElementId>) {
        if let Some(session) = self.inner.lock_session().as_mut() {
            session.selection = ids;
        }
    }

    /// Board title for the next save.
    pub fn set_title(&self, title: impl Into<String>) {
        self.inner.persistence.set_title(title);
    }

    /// Save now.
    pub async fn flush(&self) -> FlushOutcome {
        self.inner.persistence.flush(FlushReason::Manual).await
    }

    /// Draft left by an earlier run that may hold edits the backend never
    /// got. The host decides whether to offer it before starting a session.
    #[must_use]
    pub fn local_draft(&self) -> Option<Draft> {
        self.inner.persistence.load_draft()
    }
}

#[async_trait]
impl EnvironmentSignals for Collab {
    async fn on_visibility_change(&self, hidden: bool) {
        let inner = &self.inner;
        if let Some(session) = inner.lock_session().as_mut() {
            session.hidden = hidden;
            let user_state = if hidden { UserIdleState::Away } else { UserIdleState::Active };
            if !hidden {
                session.timers.idle.cancel();
                session.timers.idle = inner.post_after(session, inner.config.idle_timeout, SessionEvent::IdleTimeout);
            }
            inner.set_user_state(session, user_state);
        }
        if hidden {
            inner.persistence.flush(FlushReason::Hidden).await;
        }
    }

    async fn on_before_unload(&self) {
        self.inner.persistence.flush(FlushReason::Unload).await;
    }
}

// =============================================================================
// DRIVER
// =============================================================================

async fn drive(
    inner: Arc<Inner>,
    generation: u64,
    mut transport: mpsc::Receiver<TransportEvent>,
    mut events: mpsc::UnboundedReceiver<Tagged>,
) {
    loop {
        let flow = tokio::select! {
            Some(event) = transport.recv() => inner.on_transport(generation, event),
            Some(tagged) = events.recv() => inner.on_session_event(tagged),
            else => break,
        };
        if matches!(flow, Flow::Stop) || inner.generation() != generation {
            break;
        }
    }
    debug!(generation, "collab: driver exit");
}

impl Inner {
    fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn lock_session(&self) -> MutexGuard<'_, Option<Session>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Deliver `event` to the session's driver after `delay`.
    fn post_after(&self, session: &Session, delay: Duration, event: SessionEvent) -> CancelToken {
        let tx = session.events.clone();
        let generation = session.generation();
        let task = async move {
            if tx.send(Tagged { generation, event }).is_err() {
                debug!(generation, "collab: timer fired after driver exit");
            }
        };
        self.scheduler.schedule(delay, task.boxed())
    }

    fn apply_effects(&self, session: &mut Session, effects: Vec<LifecycleEffect>) {
        for effect in effects {
            match effect {
                LifecycleEffect::Indicator(indicator) => self.state.set_indicator(indicator),
                LifecycleEffect::ScheduleReconnectNotice => {
                    session.timers.reconnect_notice.cancel();
                    session.timers.reconnect_notice =
                        self.post_after(session, self.config.reconnect_notice_delay, SessionEvent::ReconnectNoticeDue);
                }
                LifecycleEffect::CancelReconnectNotice => session.timers.reconnect_notice.cancel(),
                LifecycleEffect::Notify(notice) => self.state.notify(notice),
            }
        }
    }

    fn publish_collaborators(&self, session: &Session) {
        self.state.set_collaborators(session.collaborators.iter().cloned().collect());
    }

    fn set_user_state(&self, session: &mut Session, user_state: UserIdleState) {
        if session.user_state == user_state {
            return;
        }
        session.user_state = user_state;
        debug!(?user_state, "collab: user state");
        self.portal.broadcast_presence(&session.idle_message(&self.username));
    }

    fn note_activity(&self, session: &mut Session) {
        session.timers.idle.cancel();
        session.timers.idle = self.post_after(session, self.config.idle_timeout, SessionEvent::IdleTimeout);
        if session.user_state == UserIdleState::Idle && !session.hidden {
            self.set_user_state(session, UserIdleState::Active);
        }
    }

    fn spawn_flush(&self, reason: FlushReason) {
        let persistence = self.persistence.clone();
        tokio::spawn(async move {
            persistence.flush(reason).await;
        });
    }

    // =========================================================================
    // TRANSPORT EVENTS
    // =========================================================================

    fn on_transport(self: &Arc<Self>, generation: u64, event: TransportEvent) -> Flow {
        if event.generation != self.portal.generation() {
            debug!(event_generation = event.generation, "collab: stale transport event");
            return Flow::Continue;
        }
        let mut guard = self.lock_session();
        let Some(session) = guard.as_mut().filter(|s| s.generation() == generation) else {
            return Flow::Continue;
        };

        match event.kind {
            TransportEventKind::Status(status) => {
                self.state.set_status(status);
                let effects = session.lifecycle.on_status(status);
                self.apply_effects(session, effects);
            }
            TransportEventKind::Joined { socket_id, peers, first_in_room } => {
                info!(%socket_id, peers = peers.len(), first_in_room, "collab: joined room");
                session.collaborators.set_own_socket_id(&socket_id);
                session.collaborators.retain_peers(&peers);
                session.socket_id = Some(socket_id);
                session.peers = peers.into_iter().collect();
                self.publish_collaborators(session);
                self.portal.broadcast_full_state(&session.scene);
                self.portal.broadcast_presence(&session.idle_message(&self.username));
            }
            TransportEventKind::Peers(peers) => {
                let own = session.socket_id.as_deref();
                let newcomer = peers.iter().any(|p| Some(p.as_str()) != own && !session.peers.contains(p));
                if newcomer {
                    debug!(peers = peers.len(), "collab: new peer, sending full state");
                    self.portal.broadcast_full_state(&session.scene);
                }
                if session.collaborators.retain_peers(&peers) > 0 {
                    self.publish_collaborators(session);
                }
                session.peers = peers.into_iter().collect();
            }
            TransportEventKind::Message { from, message } => match message {
                SocketMessage::SceneInit { update } | SocketMessage::SceneUpdate { update } => {
                    if let Err(e) = session.scene.apply_remote(&update) {
                        warn!(from = ?from, error = %e, code = e.error_code(), "collab: remote update rejected");
                    }
                }
                presence => {
                    if session.collaborators.upsert(&presence) {
                        self.publish_collaborators(session);
                    }
                }
            },
            TransportEventKind::KeyMismatch => {
                drop(guard);
                warn!(board_id = %self.board_id, "collab: room key mismatch, stopping session");
                self.state.notify(Notice::Fatal {
                    code: "E_KEY_MISMATCH",
                    message: "Peers in this room use a different key. The session was stopped.".into(),
                });
                let collab = Collab { inner: self.clone() };
                tokio::spawn(async move { collab.stop_collaboration(true).await });
                return Flow::Stop;
            }
        }
        Flow::Continue
    }

    // =========================================================================
    // SESSION EVENTS
    // =========================================================================

    fn on_session_event(self: &Arc<Self>, tagged: Tagged) -> Flow {
        let mut guard = self.lock_session();
        let Some(session) = guard.as_mut().filter(|s| s.generation() == tagged.generation) else {
            debug!(generation = tagged.generation, "collab: stale session event");
            return Flow::Continue;
        };

        match tagged.event {
            SessionEvent::Remote(remote) => self.on_remote(session, &remote),
            SessionEvent::ReconnectNoticeDue => {
                let effects = session.lifecycle.reconnect_notice_due();
                self.apply_effects(session, effects);
            }
            SessionEvent::IdleTimeout => {
                if session.user_state == UserIdleState::Active && !session.hidden {
                    self.set_user_state(session, UserIdleState::Idle);
                }
            }
            SessionEvent::UploadDue => self.start_upload(session),
            SessionEvent::FilesSaved(report) => {
                self.flag_files(session, &report.saved, &report.errored);
            }
            SessionEvent::FilesFetched(report) => {
                let loaded: Vec<_> = report.loaded.iter().map(|f| f.id.clone()).collect();
                if !report.loaded.is_empty() {
                    self.editor.add_files(report.loaded);
                }
                self.flag_files(session, &loaded, &report.errored);
            }
            SessionEvent::PeriodicSync => {
                self.portal.broadcast_full_state(&session.scene);
                self.spawn_flush(FlushReason::Periodic);
                let retried = session.files.retry_errored();
                if !retried.is_empty() {
                    debug!(count = retried.len(), "collab: retrying failed files");
                    self.start_fetch(session, &self.editor.get_elements_including_deleted());
                    self.start_upload(session);
                }
                session.timers.periodic = self.post_after(session, self.config.full_sync_interval, SessionEvent::PeriodicSync);
            }
        }
        Flow::Continue
    }

    /// Merge a remote transaction into the editor and repair ids where the
    /// local copy won.
    fn on_remote(&self, session: &mut Session, remote: &[Element]) {
        let local = self.editor.get_elements_including_deleted();
        let merged = reconcile(&local, remote);

        if !merged.is_noop() {
            debug!(
                applied = merged.remote_applied.len(),
                retained = merged.local_retained.len(),
                "collab: applying remote elements"
            );
            self.editor.apply_elements(merged.elements.clone(), ApplyOrigin::Remote);
        }
        let applied: HashSet<&str> = merged.remote_applied.iter().map(String::as_str).collect();
        self.portal.note_received(merged.elements.iter().filter(|e| applied.contains(e.id.as_str())));

        let repairs: HashSet<ElementId> = merged.local_retained.iter().cloned().collect();
        self.portal.broadcast_scene(&mut session.scene, &merged.elements, &repairs);
        self.persistence.note_scene(&merged.elements);
        self.start_fetch(session, &merged.elements);
    }

    fn start_fetch(&self, session: &Session, elements: &[Element]) {
        let missing = session.files.missing_files(elements, &self.editor.get_files());
        if missing.is_empty() {
            return;
        }
        let files = session.files.clone();
        let tx = session.events.clone();
        let generation = session.generation();
        tokio::spawn(async move {
            let report = files.fetch_files(&missing).await;
            if tx.send(Tagged { generation, event: SessionEvent::FilesFetched(report) }).is_err() {
                debug!(generation, "collab: fetch finished after driver exit");
            }
        });
    }

    fn start_upload(&self, session: &Session) {
        let referenced: HashSet<String> = self
            .editor
            .get_elements_including_deleted()
            .into_iter()
            .filter(|e| !e.is_deleted)
            .filter_map(|e| e.file_id)
            .collect();
        let held = self.editor.get_files();
        let pending: Vec<_> = session
            .files
            .pending_uploads(&held)
            .into_iter()
            .filter(|f| referenced.contains(&f.id))
            .collect();
        if pending.is_empty() {
            return;
        }
        let files = session.files.clone();
        let tx = session.events.clone();
        let generation = session.generation();
        tokio::spawn(async move {
            let report = files.save_files(pending).await;
            if tx.send(Tagged { generation, event: SessionEvent::FilesSaved(report) }).is_err() {
                debug!(generation, "collab: upload finished after driver exit");
            }
        });
    }

    /// Record transfer results on the elements that reference the files.
    fn flag_files(&self, session: &mut Session, saved: &[String], errored: &[String]) {
        if saved.is_empty() && errored.is_empty() {
            return;
        }
        let mut elements = self.editor.get_elements_including_deleted();
        if flag_elements(&mut elements, saved, errored, now_ms()) > 0 {
            self.editor.apply_elements(elements.clone(), ApplyOrigin::Local);
            self.portal.broadcast_scene(&mut session.scene, &elements, &HashSet::new());
            self.persistence.note_scene(&elements);
        }
        if !errored.is_empty() {
            self.state.notify(Notice::FilesFailed { file_ids: errored.to_vec() });
        }
    }
}

#[cfg(test)]
#[path = "collab_test.rs"]
mod tests;
