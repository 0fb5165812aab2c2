//! Relay — websocket fan-out for room members.
//!
//! DESIGN
//! ======
//! On upgrade, assigns a socket id and enters a `select!` loop:
//! - Incoming client frames → decode + dispatch by syscall
//! - Frames queued by room peers → forward to the client
//!
//! The relay never holds a room key. Payloads are opaque sealed bytes; only
//! the routing metadata of a frame is read. Nothing is stored: a room exists
//! while it has members.
//!
//! Each peer has a bounded outbound queue and no connection loop ever waits
//! on another peer's queue. Volatile frames (presence) are dropped for a peer
//! whose queue is full. A peer that cannot take a reliable frame or a
//! membership push is disconnected and the rest of the room is told; its
//! client reconnects and receives full state again on rejoin.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → socket id assigned
//! 2. `room:join` → reply with id + members, push `room:peers` to the others
//! 3. `room:broadcast` / `room:volatile` → forwarded to the other members
//! 4. Close → leave room → push `room:peers` to the remaining members

use std::collections::HashMap;
use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::get;
use frames::Frame;
use serde_json::json;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Notify, RwLock, mpsc};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::RelayConfig;
use crate::error::ErrorCode;

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("room_id required")]
    RoomRequired,
    #[error("join a room first")]
    NotJoined,
    #[error("unknown syscall: {0}")]
    UnknownSyscall(String),
    #[error("undecodable frame: {0}")]
    Codec(#[from] frames::CodecError),
}

impl ErrorCode for RelayError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::RoomRequired => "E_ROOM_REQUIRED",
            Self::NotJoined => "E_NOT_JOINED",
            Self::UnknownSyscall(_) => "E_UNKNOWN_SYSCALL",
            Self::Codec(_) => "E_CODEC",
        }
    }
}

// =============================================================================
// STATE
// =============================================================================

type PeerTx = mpsc::Sender<Vec<u8>>;

/// One connection's outbound queue and its disconnect signal.
#[derive(Clone)]
struct PeerHandle {
    tx: PeerTx,
    kick: Arc<Notify>,
}

impl PeerHandle {
    fn new(capacity: usize) -> (Self, mpsc::Receiver<Vec<u8>>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx, kick: Arc::new(Notify::new()) }, rx)
    }
}

type RoomPeers = HashMap<String, PeerHandle>;
type Rooms = HashMap<String, RoomPeers>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    /// Must arrive; a member that cannot take it is disconnected.
    Reliable,
    /// May be dropped for a member whose queue is full.
    Volatile,
}

/// Shared relay state, injected into handlers via the `State` extractor.
#[derive(Clone)]
pub struct RelayState {
    rooms: Arc<RwLock<Rooms>>,
    peer_queue_capacity: usize,
}

impl RelayState {
    #[must_use]
    pub fn new(config: RelayConfig) -> Self {
        Self { rooms: Arc::new(RwLock::new(HashMap::new())), peer_queue_capacity: config.peer_queue_capacity }
    }

    /// Member socket ids of `room_id`, sorted.
    pub async fn members(&self, room_id: &str) -> Vec<String> {
        self.rooms.read().await.get(room_id).map(sorted_members).unwrap_or_default()
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// Add a member and tell the others. Returns the member list.
    async fn join(&self, room_id: &str, socket_id: &str, peer: PeerHandle) -> Vec<String> {
        let mut rooms = self.rooms.write().await;
        rooms.entry(room_id.to_owned()).or_default().insert(socket_id.to_owned(), peer);
        announce(&mut rooms, room_id, Vec::new(), Some(socket_id))
    }

    /// Remove a member and tell the rest; drops the room when it empties.
    async fn leave(&self, room_id: &str, socket_id: &str) {
        let mut rooms = self.rooms.write().await;
        let removed = rooms.get_mut(room_id).and_then(|room| room.remove(socket_id));
        if removed.is_some() {
            announce(&mut rooms, room_id, Vec::new(), None);
        }
    }

    /// Queue `frame` for every member of `room_id` except `from`. Never
    /// waits on a member's queue.
    async fn forward(&self, room_id: &str, from: &str, frame: &Frame, delivery: Delivery) {
        let bytes = frames::encode_frame(frame);
        let mut rooms = self.rooms.write().await;
        // A sender evicted since it read this frame no longer speaks for the room.
        let Some(room) = rooms.get(room_id).filter(|room| room.contains_key(from)) else {
            return;
        };
        let lagging = fan_out(room, room_id, &bytes, Some(from), delivery);
        if !lagging.is_empty() {
            announce(&mut rooms, room_id, lagging, None);
        }
    }
}

fn sorted_members(room: &RoomPeers) -> Vec<String> {
    let mut members: Vec<String> = room.keys().cloned().collect();
    members.sort();
    members
}

/// Queue `bytes` for every member except `skip`. Returns the members that
/// could not take a reliable frame.
fn fan_out(room: &RoomPeers, room_id: &str, bytes: &[u8], skip: Option<&str>, delivery: Delivery) -> Vec<String> {
    let mut lagging = Vec::new();
    for (socket_id, peer) in room {
        if Some(socket_id.as_str()) == skip {
            continue;
        }
        match peer.tx.try_send(bytes.to_vec()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) if delivery == Delivery::Reliable => lagging.push(socket_id.clone()),
            Err(TrySendError::Full(_)) => debug!(%room_id, %socket_id, "relay: volatile frame dropped"),
            // Connection is already on its way out; its cleanup leaves the room.
            Err(TrySendError::Closed(_)) => debug!(%room_id, %socket_id, "relay: peer gone"),
        }
    }
    lagging
}

/// Disconnect `lagging` members, then push the member list until every
/// remaining member has taken it. Returns the final member list.
fn announce(rooms: &mut Rooms, room_id: &str, mut lagging: Vec<String>, skip: Option<&str>) -> Vec<String> {
    loop {
        let Some(room) = rooms.get_mut(room_id) else {
            return Vec::new();
        };
        for socket_id in lagging.drain(..) {
            if let Some(peer) = room.remove(&socket_id) {
                warn!(%room_id, %socket_id, "relay: peer queue full; disconnecting");
                peer.kick.notify_one();
            }
        }
        if room.is_empty() {
            rooms.remove(room_id);
            info!(%room_id, "relay: room closed");
            return Vec::new();
        }

        let members = sorted_members(room);
        let push = Frame::request(frames::ROOM_PEERS).with_room(room_id).with_data(json!({ "peers": members }));
        lagging = fan_out(room, room_id, &frames::encode_frame(&push), skip, Delivery::Reliable);
        if lagging.is_empty() {
            return members;
        }
    }
}

// =============================================================================
// ROUTER
// =============================================================================

pub fn app(state: RelayState) -> Router {
    Router::new()
        .route("/ws", get(handle_ws))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the relay on `listener` until the server fails.
///
/// # Errors
///
/// Returns the underlying I/O error if the accept loop stops.
pub async fn serve(listener: tokio::net::TcpListener, config: RelayConfig) -> std::io::Result<()> {
    axum::serve(listener, app(RelayState::new(config))).await
}

async fn healthz() -> &'static str {
    "ok"
}

async fn handle_ws(State(state): State<RelayState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| run_ws(socket, state))
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: RelayState) {
    let socket_id = Uuid::new_v4().to_string();
    let (peer, mut peer_rx) = PeerHandle::new(state.peer_queue_capacity);
    let kick = peer.kick.clone();
    let mut current_room: Option<String> = None;
    info!(%socket_id, "relay: client connected");

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(Ok(msg)) = msg else { break };
                match msg {
                    Message::Binary(bytes) => {
                        let replies = process_inbound(&state, &mut current_room, &socket_id, &peer, &bytes).await;
                        for reply in replies {
                            if socket.send(Message::Binary(frames::encode_frame(&reply).into())).await.is_err() {
                                break;
                            }
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            Some(bytes) = peer_rx.recv() => {
                if socket.send(Message::Binary(bytes.into())).await.is_err() {
                    break;
                }
            }
            () = kick.notified() => {
                info!(%socket_id, "relay: disconnecting slow client");
                break;
            }
        }
    }

    if let Some(room_id) = current_room {
        state.leave(&room_id, &socket_id).await;
    }
    info!(%socket_id, "relay: client disconnected");
}

// =============================================================================
// FRAME DISPATCH
// =============================================================================

/// Decode and handle one inbound frame. Returns frames for the sender.
async fn process_inbound(
    state: &RelayState,
    current_room: &mut Option<String>,
    socket_id: &str,
    peer: &PeerHandle,
    bytes: &[u8],
) -> Vec<Frame> {
    let frame = match frames::decode_frame(bytes) {
        Ok(frame) => frame,
        Err(e) => {
            let e = RelayError::from(e);
            warn!(%socket_id, error = %e, "relay: invalid inbound frame");
            let err = Frame::request(frames::GATEWAY_ERROR)
                .with_data(json!({ "code": e.error_code(), "message": e.to_string() }));
            return vec![err];
        }
    };

    match frame.syscall.as_str() {
        frames::ROOM_JOIN => {
            let Some(room_id) = frame.room_id.clone() else {
                return vec![reply_error(&frame, &RelayError::RoomRequired)];
            };
            if let Some(previous) = current_room.take() {
                state.leave(&previous, socket_id).await;
            }
            let members = state.join(&room_id, socket_id, peer.clone()).await;
            info!(%socket_id, %room_id, members = members.len(), "relay: joined");
            *current_room = Some(room_id);
            let first_in_room = members.len() == 1;
            vec![frame.done_with(json!({
                "socket_id": socket_id,
                "peers": members,
                "first_in_room": first_in_room,
            }))]
        }
        frames::ROOM_BROADCAST | frames::ROOM_VOLATILE => {
            let Some(room_id) = current_room.as_deref() else {
                return vec![reply_error(&frame, &RelayError::NotJoined)];
            };
            let delivery =
                if frame.syscall == frames::ROOM_VOLATILE { Delivery::Volatile } else { Delivery::Reliable };
            let out = frame.clone().with_room(room_id).with_from(socket_id);
            state.forward(room_id, socket_id, &out, delivery).await;
            Vec::new()
        }
        other => vec![reply_error(&frame, &RelayError::UnknownSyscall(other.to_owned()))],
    }
}

fn reply_error(frame: &Frame, e: &RelayError) -> Frame {
    frame.error(e.error_code(), e.to_string())
}

#[cfg(test)]
#[path = "relay_test.rs"]
mod tests;
