//! Wire frame model and protobuf codec for the collaboration relay.
//!
//! This crate owns the wire representation shared by the `boardsync` client
//! transport and the relay server. Routing metadata (room, sender, syscall)
//! travels in clear so the relay can fan frames out; scene and presence
//! content travels in `payload`, sealed with the room key before it reaches
//! this layer. The relay never looks inside `payload`.

use std::time::{SystemTime, UNIX_EPOCH};

use prost::Message;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// =============================================================================
// SYSCALLS
// =============================================================================

/// Client asks to join a room; the relay answers with a `done` frame.
pub const ROOM_JOIN: &str = "room:join";

/// Relay push: room membership changed.
pub const ROOM_PEERS: &str = "room:peers";

/// Reliable fan-out of a sealed payload to every other room member.
pub const ROOM_BROADCAST: &str = "room:broadcast";

/// Droppable fan-out (presence). The relay may discard under backpressure.
pub const ROOM_VOLATILE: &str = "room:volatile";

/// Relay-level protocol error not tied to a request.
pub const GATEWAY_ERROR: &str = "gateway:error";

// =============================================================================
// ERRORS
// =============================================================================

/// Error returned by [`decode_frame`].
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The raw bytes could not be decoded as a protobuf `WireFrame`.
    #[error("failed to decode protobuf frame: {0}")]
    Decode(#[from] prost::DecodeError),
    /// The `status` integer on the wire does not map to a known [`Status`] variant.
    #[error("invalid frame status: {0}")]
    InvalidStatus(i32),
    /// The `data` field is not valid JSON.
    #[error("invalid frame data: {0}")]
    InvalidData(#[from] serde_json::Error),
}

// =============================================================================
// TYPES
// =============================================================================

/// Lifecycle status of a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Client request or relay push.
    Request,
    /// Successful reply to a request.
    Done,
    /// Error reply.
    Error,
}

impl Status {
    /// Convert status into wire enum integer value.
    #[must_use]
    pub fn as_i32(self) -> i32 {
        match self {
            Self::Request => WireStatus::Request as i32,
            Self::Done => WireStatus::Done as i32,
            Self::Error => WireStatus::Error as i32,
        }
    }

    fn from_i32(value: i32) -> Result<Self, CodecError> {
        match WireStatus::try_from(value) {
            Ok(WireStatus::Request) => Ok(Self::Request),
            Ok(WireStatus::Done) => Ok(Self::Done),
            Ok(WireStatus::Error) => Ok(Self::Error),
            Err(_) => Err(CodecError::InvalidStatus(value)),
        }
    }
}

/// A single message on the relay wire protocol.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Unique identifier for this frame.
    pub id: String,
    /// ID of the request frame this is replying to, if any.
    pub parent_id: Option<String>,
    /// Milliseconds since the Unix epoch when the frame was created.
    pub ts: i64,
    /// Room this frame is scoped to.
    pub room_id: Option<String>,
    /// Sender socket id, stamped by the relay on fan-out.
    pub from: Option<String>,
    /// Namespaced operation name, e.g. `"room:join"`.
    pub syscall: String,
    /// Lifecycle position of the frame.
    pub status: Status,
    /// Cleartext routing/control data.
    pub data: Value,
    /// Sealed content. Opaque to the relay.
    pub payload: Vec<u8>,
}

fn now_ms() -> i64 {
    let Ok(dur) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    i64::try_from(dur.as_millis()).unwrap_or(0)
}

fn next_id() -> String {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    format!("{:x}-{:x}", now_ms(), COUNTER.fetch_add(1, Ordering::Relaxed))
}

impl Frame {
    /// Create a request frame.
    pub fn request(syscall: impl Into<String>) -> Self {
        Self {
            id: next_id(),
            parent_id: None,
            ts: now_ms(),
            room_id: None,
            from: None,
            syscall: syscall.into(),
            status: Status::Request,
            data: Value::Object(Map::new()),
            payload: Vec::new(),
        }
    }

    /// Successful reply carrying `data`. Inherits room and syscall.
    #[must_use]
    pub fn done_with(&self, data: Value) -> Self {
        self.reply(Status::Done, data)
    }

    /// Error reply with a grepable code and message.
    #[must_use]
    pub fn error(&self, code: &str, message: impl Into<String>) -> Self {
        let data = serde_json::json!({ "code": code, "message": message.into() });
        self.reply(Status::Error, data)
    }

    fn reply(&self, status: Status, data: Value) -> Self {
        Self {
            id: next_id(),
            parent_id: Some(self.id.clone()),
            ts: now_ms(),
            room_id: self.room_id.clone(),
            from: None,
            syscall: self.syscall.clone(),
            status,
            data,
            payload: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_room(mut self, room_id: impl Into<String>) -> Self {
        self.room_id = Some(room_id.into());
        self
    }

    #[must_use]
    pub fn with_from(mut self, from: impl Into<String>) -> Self {
        self.from = Some(from.into());
        self
    }

    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    #[must_use]
    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }

    /// Prefix before the first `:` (e.g. `"room"`).
    #[must_use]
    pub fn prefix(&self) -> &str {
        self.syscall.split_once(':').map_or(self.syscall.as_str(), |(p, _)| p)
    }
}

// =============================================================================
// CODEC
// =============================================================================

/// Encode a frame into protobuf bytes.
#[must_use]
pub fn encode_frame(frame: &Frame) -> Vec<u8> {
    let wire = WireFrame {
        id: frame.id.clone(),
        parent_id: frame.parent_id.clone(),
        ts: frame.ts,
        room_id: frame.room_id.clone(),
        from: frame.from.clone(),
        syscall: frame.syscall.clone(),
        status: frame.status.as_i32(),
        data_json: frame.data.to_string(),
        payload: frame.payload.clone(),
    };
    wire.encode_to_vec()
}

/// Decode protobuf bytes into a frame.
///
/// # Errors
///
/// Returns [`CodecError::Decode`] for malformed bytes,
/// [`CodecError::InvalidStatus`] for out-of-range status values and
/// [`CodecError::InvalidData`] when `data` is not JSON.
pub fn decode_frame(bytes: &[u8]) -> Result<Frame, CodecError> {
    let wire = WireFrame::decode(bytes)?;
    let data = if wire.data_json.is_empty() {
        Value::Object(Map::new())
    } else {
        serde_json::from_str(&wire.data_json)?
    };
    Ok(Frame {
        id: wire.id,
        parent_id: wire.parent_id,
        ts: wire.ts,
        room_id: wire.room_id,
        from: wire.from,
        syscall: wire.syscall,
        status: Status::from_i32(wire.status)?,
        data,
        payload: wire.payload,
    })
}

#[derive(Clone, PartialEq, Message)]
struct WireFrame {
    #[prost(string, tag = "1")]
    id: String,
    #[prost(string, optional, tag = "2")]
    parent_id: Option<String>,
    #[prost(int64, tag = "3")]
    ts: i64,
    #[prost(string, optional, tag = "4")]
    room_id: Option<String>,
    #[prost(string, optional, tag = "5")]
    from: Option<String>,
    #[prost(string, tag = "6")]
    syscall: String,
    #[prost(enumeration = "WireStatus", tag = "7")]
    status: i32,
    #[prost(string, tag = "8")]
    data_json: String,
    #[prost(bytes = "vec", tag = "9")]
    payload: Vec<u8>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, prost::Enumeration)]
#[repr(i32)]
enum WireStatus {
    Request = 0,
    Done = 1,
    Error = 2,
}

#[cfg(test)]
#[path = "lib_test.rs"]
mod tests;
