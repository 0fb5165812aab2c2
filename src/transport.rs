//! Encrypted transport — the room portal.
//!
//! DESIGN
//! ======
//! A [`Portal`] owns one room session at a time: a spawned connection loop
//! that connects through a [`Connector`], joins the room, pumps frames and
//! reconnects with exponential backoff. Every payload is sealed with the room
//! key before it reaches a frame and opened after it leaves one; the relay
//! only ever sees routing metadata.
//!
//! Sends are fire-and-forget. When the link is down the message is dropped
//! and logged, never queued: the document is the source of truth and a full
//! state is sent on every join, so nothing is lost that matters.
//!
//! The portal also owns the [`ElementVersionStore`], since it decides what a
//! delta is. The store is cleared when the portal closes.
//!
//! LIFECYCLE
//! =========
//! 1. `open` bumps the generation, spawns the loop
//! 2. loop: `Connecting` → connect → `room:join` → `Connected` + `Joined`
//! 3. frames → `Message` / `Peers` / `KeyMismatch` events
//! 4. link lost → `Disconnected` → backoff sleep → step 2
//! 5. `close` aborts the loop and clears the store
//!
//! Every event carries the generation it was produced under; consumers drop
//! events from an older generation.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use frames::{Frame, Status};

use crate::config::CollabConfig;
use crate::crdt::{CrdtError, ReplicatedScene};
use crate::crypto::CryptoError;
use crate::element::{Element, ElementId};
use crate::error::ErrorCode;
use crate::protocol::SocketMessage;
use crate::room::Room;
use crate::version_store::ElementVersionStore;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("room join rejected: {0}")]
    Rejected(String),
    #[error("link closed")]
    Closed,
    #[error(transparent)]
    Codec(#[from] frames::CodecError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Crdt(#[from] CrdtError),
    #[error("payload encode failed: {0}")]
    Encode(#[from] serde_json::Error),
}

impl ErrorCode for TransportError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Connect(_) => "E_CONNECT",
            Self::Rejected(_) => "E_JOIN_REJECTED",
            Self::Closed => "E_LINK_CLOSED",
            Self::Codec(_) => "E_CODEC",
            Self::Crypto(e) => e.error_code(),
            Self::Crdt(e) => e.error_code(),
            Self::Encode(_) => "E_PAYLOAD_ENCODE",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Connect(_) | Self::Closed)
    }

    fn fatal(&self) -> bool {
        matches!(self, Self::Crypto(e) if e.fatal())
    }
}

// =============================================================================
// CONNECTOR
// =============================================================================

/// One live socket as a pair of bounded byte channels. `rx` yields `None`
/// once the socket is gone; dropping `tx` closes the socket.
#[derive(Debug)]
pub struct SocketLink {
    pub tx: mpsc::Sender<Vec<u8>>,
    pub rx: mpsc::Receiver<Vec<u8>>,
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<SocketLink, TransportError>;
}

/// Websocket connector over `tokio-tungstenite`.
#[derive(Debug, Clone)]
pub struct WsConnector {
    queue_capacity: usize,
}

impl WsConnector {
    #[must_use]
    pub fn new(queue_capacity: usize) -> Self {
        Self { queue_capacity: queue_capacity.max(1) }
    }
}

impl Default for WsConnector {
    fn default() -> Self {
        Self::new(CollabConfig::default().socket_queue_capacity)
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<SocketLink, TransportError> {
        let (stream, _) = connect_async(url)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        let (mut ws_write, mut ws_read) = stream.split();

        let (out_tx, mut out_rx) = mpsc::channel::<Vec<u8>>(self.queue_capacity);
        let (in_tx, in_rx) = mpsc::channel::<Vec<u8>>(self.queue_capacity);

        tokio::spawn(async move {
            while let Some(bytes) = out_rx.recv().await {
                if let Err(e) = ws_write.send(Message::Binary(bytes.into())).await {
                    debug!(error = %e, "ws: write failed");
                    break;
                }
            }
            if let Err(e) = ws_write.close().await {
                debug!(error = %e, "ws: close failed");
            }
        });

        tokio::spawn(async move {
            while let Some(message) = ws_read.next().await {
                match message {
                    Ok(Message::Binary(bytes)) => {
                        if in_tx.send(bytes.to_vec()).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        debug!(error = %e, "ws: read failed");
                        break;
                    }
                }
            }
        });

        Ok(SocketLink { tx: out_tx, rx: in_rx })
    }
}

// =============================================================================
// EVENTS
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEventKind {
    Status(ConnectionStatus),
    /// Join acknowledged by the relay.
    Joined { socket_id: String, peers: Vec<String>, first_in_room: bool },
    /// Room membership changed (includes this client).
    Peers(Vec<String>),
    Message { from: Option<String>, message: SocketMessage },
    /// An inbound payload failed authentication under our room key.
    KeyMismatch,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransportEvent {
    pub generation: u64,
    pub kind: TransportEventKind,
}

// =============================================================================
// PORTAL
// =============================================================================

struct PortalSession {
    room: Room,
    generation: u64,
    task: JoinHandle<()>,
}

/// State shared between the portal handle and its connection loop.
#[derive(Default)]
struct Shared {
    link: Mutex<Option<mpsc::Sender<Vec<u8>>>>,
    connected: AtomicBool,
}

pub struct Portal {
    connector: Arc<dyn Connector>,
    config: CollabConfig,
    shared: Arc<Shared>,
    session: Mutex<Option<PortalSession>>,
    store: Mutex<ElementVersionStore>,
    generation: AtomicU64,
}

impl std::fmt::Debug for Portal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Portal")
            .field("generation", &self.generation())
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

impl Portal {
    #[must_use]
    pub fn new(connector: Arc<dyn Connector>, config: CollabConfig) -> Self {
        Self {
            connector,
            config,
            shared: Arc::new(Shared::default()),
            session: Mutex::new(None),
            store: Mutex::new(ElementVersionStore::new()),
            generation: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn room_id(&self) -> Option<String> {
        lock(&self.session).as_ref().map(|s| s.room.room_id.clone())
    }

    /// Open a session for `room`, closing any previous one. Returns the new
    /// generation; every event on `events` is tagged with it.
    pub fn open(&self, room: Room, events: mpsc::Sender<TransportEvent>) -> u64 {
        self.close();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let ctx = LoopCtx {
            connector: self.connector.clone(),
            shared: self.shared.clone(),
            url: self.config.server_url.clone(),
            backoff_min: self.config.reconnect_backoff_min,
            backoff_max: self.config.reconnect_backoff_max,
            room: room.clone(),
            generation,
            events,
        };
        let task = tokio::spawn(connection_loop(ctx));
        info!(room_id = %room.room_id, generation, "portal: open");
        *lock(&self.session) = Some(PortalSession { room, generation, task });
        generation
    }

    /// Release the session. Safe to call repeatedly.
    pub fn close(&self) {
        let Some(session) = lock(&self.session).take() else {
            return;
        };
        session.task.abort();
        *lock(&self.shared.link) = None;
        self.shared.connected.store(false, Ordering::SeqCst);
        lock(&self.store).clear();
        // Events still in flight from the aborted loop become stale.
        self.generation.fetch_add(1, Ordering::SeqCst);
        info!(room_id = %session.room.room_id, generation = session.generation, "portal: closed");
    }

    // =========================================================================
    // SEND
    // =========================================================================

    /// Write the delta of `elements` (plus `repairs`) into `scene` and send
    /// the resulting update. Returns whether a frame went out.
    pub fn broadcast_scene(
        &self,
        scene: &mut ReplicatedScene,
        elements: &[Element],
        repairs: &HashSet<ElementId>,
    ) -> bool {
        let update = {
            let mut store = lock(&self.store);
            scene.write_delta(elements, &mut store, repairs)
        };
        match update {
            Ok(Some(update)) => self.send(&SocketMessage::SceneUpdate { update }),
            Ok(None) => false,
            Err(e) => {
                warn!(error = %e, code = e.error_code(), "portal: delta write failed");
                false
            }
        }
    }

    /// Send the whole document, for peers that joined or missed updates.
    pub fn broadcast_full_state(&self, scene: &ReplicatedScene) -> bool {
        self.send(&SocketMessage::SceneInit { update: scene.encode_state() })
    }

    /// Send a presence message on the volatile channel.
    pub fn broadcast_presence(&self, message: &SocketMessage) -> bool {
        self.send(message)
    }

    /// Record elements adopted from peers so they are not sent back.
    pub fn note_received<'a>(&self, elements: impl IntoIterator<Item = &'a Element>) {
        let mut store = lock(&self.store);
        for el in elements {
            store.record(el);
        }
    }

    #[must_use]
    pub fn last_synced(&self, id: &str) -> Option<u64> {
        lock(&self.store).last_synced(id)
    }

    fn send(&self, message: &SocketMessage) -> bool {
        match self.try_send(message) {
            Ok(sent) => sent,
            Err(e) => {
                warn!(error = %e, code = e.error_code(), "portal: send failed");
                false
            }
        }
    }

    fn try_send(&self, message: &SocketMessage) -> Result<bool, TransportError> {
        let (room_id, sealed) = {
            let session = lock(&self.session);
            let Some(session) = session.as_ref() else {
                debug!("portal: send without session, dropped");
                return Ok(false);
            };
            let sealed = session.room.room_key.seal(&message.to_bytes()?)?;
            (session.room.room_id.clone(), sealed)
        };
        if !self.is_connected() {
            debug!(%room_id, "portal: not connected, dropped");
            return Ok(false);
        }
        let syscall = if message.is_volatile() { frames::ROOM_VOLATILE } else { frames::ROOM_BROADCAST };
        let frame = Frame::request(syscall).with_room(room_id).with_payload(sealed);
        let link = lock(&self.shared.link);
        let Some(tx) = link.as_ref() else {
            return Ok(false);
        };
        match tx.try_send(frames::encode_frame(&frame)) {
            Ok(()) => Ok(true),
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(syscall, "portal: socket queue full, dropped");
                Ok(false)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(TransportError::Closed),
        }
    }
}

impl Drop for Portal {
    fn drop(&mut self) {
        if let Some(session) = lock(&self.session).take() {
            session.task.abort();
        }
    }
}

// =============================================================================
// CONNECTION LOOP
// =============================================================================

struct LoopCtx {
    connector: Arc<dyn Connector>,
    shared: Arc<Shared>,
    url: String,
    backoff_min: Duration,
    backoff_max: Duration,
    room: Room,
    generation: u64,
    events: mpsc::Sender<TransportEvent>,
}

impl LoopCtx {
    /// `false` when the consumer is gone and the loop should stop.
    async fn emit(&self, kind: TransportEventKind) -> bool {
        self.events
            .send(TransportEvent { generation: self.generation, kind })
            .await
            .is_ok()
    }

    fn set_link(&self, link: Option<mpsc::Sender<Vec<u8>>>) {
        self.shared.connected.store(link.is_some(), Ordering::SeqCst);
        *lock(&self.shared.link) = link;
    }
}

enum LinkEnd {
    Lost { joined: bool },
    ConsumerGone,
}

async fn connection_loop(ctx: LoopCtx) {
    let mut backoff = ctx.backoff_min;
    loop {
        if !ctx.emit(TransportEventKind::Status(ConnectionStatus::Connecting)).await {
            return;
        }
        match ctx.connector.connect(&ctx.url).await {
            Ok(link) => match run_link(&ctx, link).await {
                Ok(LinkEnd::Lost { joined }) => {
                    if joined {
                        backoff = ctx.backoff_min;
                    }
                    info!(room_id = %ctx.room.room_id, joined, "portal: link lost");
                }
                Ok(LinkEnd::ConsumerGone) => {
                    ctx.set_link(None);
                    return;
                }
                Err(e) => warn!(error = %e, code = e.error_code(), "portal: link failed"),
            },
            Err(e) => warn!(error = %e, url = %ctx.url, "portal: connect failed"),
        }

        ctx.set_link(None);
        if !ctx.emit(TransportEventKind::Status(ConnectionStatus::Disconnected)).await {
            return;
        }
        debug!(backoff_ms = backoff.as_millis(), "portal: reconnect backoff");
        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(ctx.backoff_max);
    }
}

async fn run_link(ctx: &LoopCtx, link: SocketLink) -> Result<LinkEnd, TransportError> {
    let SocketLink { tx, mut rx } = link;
    let join = Frame::request(frames::ROOM_JOIN).with_room(ctx.room.room_id.clone());
    tx.send(frames::encode_frame(&join)).await.map_err(|_| TransportError::Closed)?;

    let mut joined = false;
    while let Some(bytes) = rx.recv().await {
        let frame = match frames::decode_frame(&bytes) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "portal: undecodable frame");
                continue;
            }
        };

        let kind = match (frame.syscall.as_str(), frame.status) {
            (frames::ROOM_JOIN, Status::Done) if frame.parent_id.as_deref() == Some(join.id.as_str()) => {
                let reply = parse_join_reply(&frame);
                ctx.set_link(Some(tx.clone()));
                joined = true;
                info!(
                    room_id = %ctx.room.room_id,
                    socket_id = %reply.0,
                    peers = reply.1.len(),
                    "portal: joined"
                );
                if !ctx.emit(TransportEventKind::Status(ConnectionStatus::Connected)).await {
                    return Ok(LinkEnd::ConsumerGone);
                }
                TransportEventKind::Joined { socket_id: reply.0, peers: reply.1, first_in_room: reply.2 }
            }
            (frames::ROOM_JOIN, Status::Error) => {
                let message = frame.data.get("message").and_then(|v| v.as_str()).unwrap_or("join rejected");
                return Err(TransportError::Rejected(message.to_owned()));
            }
            (frames::ROOM_PEERS, _) => TransportEventKind::Peers(string_list(&frame.data, "peers")),
            (frames::ROOM_BROADCAST | frames::ROOM_VOLATILE, _) => match open_payload(ctx, &frame) {
                Ok(Some(kind)) => kind,
                Ok(None) => continue,
                Err(e) => {
                    warn!(error = %e, from = ?frame.from, "portal: payload rejected");
                    if matches!(e, TransportError::Crypto(CryptoError::KeyMismatch)) {
                        TransportEventKind::KeyMismatch
                    } else {
                        continue;
                    }
                }
            },
            (frames::GATEWAY_ERROR, _) => {
                warn!(data = %frame.data, "portal: gateway error");
                continue;
            }
            (syscall, status) => {
                debug!(syscall, ?status, "portal: ignored frame");
                continue;
            }
        };
        if !ctx.emit(kind).await {
            return Ok(LinkEnd::ConsumerGone);
        }
    }
    Ok(LinkEnd::Lost { joined })
}

fn open_payload(ctx: &LoopCtx, frame: &Frame) -> Result<Option<TransportEventKind>, TransportError> {
    if frame.payload.is_empty() {
        return Ok(None);
    }
    let plain = ctx.room.room_key.open(&frame.payload)?;
    let message = SocketMessage::from_bytes(&plain)?;
    Ok(Some(TransportEventKind::Message { from: frame.from.clone(), message }))
}

fn parse_join_reply(frame: &Frame) -> (String, Vec<String>, bool) {
    let socket_id = frame
        .data
        .get("socket_id")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_owned();
    let peers = string_list(&frame.data, "peers");
    let first_in_room = frame
        .data
        .get("first_in_room")
        .and_then(serde_json::Value::as_bool)
        .unwrap_or(peers.len() <= 1);
    (socket_id, peers, first_in_room)
}

fn string_list(data: &serde_json::Value, key: &str) -> Vec<String> {
    data.get(key)
        .and_then(|v| v.as_array())
        .map(|items| items.iter().filter_map(|v| v.as_str().map(ToOwned::to_owned)).collect())
        .unwrap_or_default()
}

#[cfg(test)]
#[path = "transport_test.rs"]
mod tests;
