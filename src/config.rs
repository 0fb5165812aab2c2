//! Runtime configuration loaded from environment variables.
//!
//! DESIGN
//! ======
//! Every knob has a `DEFAULT_*` constant and an environment override parsed
//! with [`env_parse`]. Unparseable values fall back to the default rather
//! than failing startup; the collaboration core has no config that is worth
//! refusing to start over.

use std::time::Duration;

const DEFAULT_COLLAB_SERVER_URL: &str = "ws://127.0.0.1:3002/ws";
const DEFAULT_BACKEND_URL: &str = "http://127.0.0.1:3000";
const DEFAULT_RECONNECT_NOTICE_DELAY_MS: u64 = 2_000;
const DEFAULT_FULL_SYNC_INTERVAL_MS: u64 = 20_000;
const DEFAULT_CURSOR_SYNC_MS: u64 = 33;
const DEFAULT_IDLE_TIMEOUT_MS: u64 = 60_000;
const DEFAULT_FILE_UPLOAD_THROTTLE_MS: u64 = 300;
const DEFAULT_RECONNECT_BACKOFF_MIN_MS: u64 = 1_000;
const DEFAULT_RECONNECT_BACKOFF_MAX_MS: u64 = 10_000;
const DEFAULT_SOCKET_QUEUE_CAPACITY: usize = 256;

const DEFAULT_RELAY_PORT: u16 = 3002;
const DEFAULT_RELAY_PEER_QUEUE_CAPACITY: usize = 256;

pub(crate) fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

fn env_millis(key: &str, default_ms: u64) -> Duration {
    Duration::from_millis(env_parse(key, default_ms))
}

// =============================================================================
// CLIENT
// =============================================================================

/// Tuning knobs for one collaboration client.
#[derive(Debug, Clone)]
pub struct CollabConfig {
    /// Websocket URL of the relay.
    pub server_url: String,
    /// Base URL of the board REST backend.
    pub backend_url: String,
    /// Debounce before a lost connection is shown as "Reconnecting".
    pub reconnect_notice_delay: Duration,
    /// Interval of the full-scene resync and persistence flush.
    pub full_sync_interval: Duration,
    /// Minimum spacing between pointer broadcasts.
    pub cursor_sync_interval: Duration,
    /// Inactivity before the local user is reported idle.
    pub idle_timeout: Duration,
    /// Window that coalesces bursts of attachment uploads.
    pub file_upload_throttle: Duration,
    /// First reconnect delay; doubles up to `reconnect_backoff_max`.
    pub reconnect_backoff_min: Duration,
    pub reconnect_backoff_max: Duration,
    /// Capacity of the per-socket byte channels.
    pub socket_queue_capacity: usize,
}

impl CollabConfig {
    /// Build config from environment variables.
    ///
    /// - `COLLAB_SERVER_URL`, `COLLAB_BACKEND_URL`
    /// - `COLLAB_RECONNECT_NOTICE_DELAY_MS` (default 2000)
    /// - `COLLAB_FULL_SYNC_INTERVAL_MS` (default 20000)
    /// - `COLLAB_CURSOR_SYNC_MS` (default 33)
    /// - `COLLAB_IDLE_TIMEOUT_MS` (default 60000)
    /// - `COLLAB_FILE_UPLOAD_THROTTLE_MS` (default 300)
    /// - `COLLAB_RECONNECT_BACKOFF_MIN_MS` / `_MAX_MS` (default 1000 / 10000)
    /// - `COLLAB_SOCKET_QUEUE_CAPACITY` (default 256)
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            server_url: std::env::var("COLLAB_SERVER_URL").unwrap_or_else(|_| DEFAULT_COLLAB_SERVER_URL.to_owned()),
            backend_url: std::env::var("COLLAB_BACKEND_URL")
                .unwrap_or_else(|_| DEFAULT_BACKEND_URL.to_owned())
                .trim_end_matches('/')
                .to_owned(),
            reconnect_notice_delay: env_millis("COLLAB_RECONNECT_NOTICE_DELAY_MS", DEFAULT_RECONNECT_NOTICE_DELAY_MS),
            full_sync_interval: env_millis("COLLAB_FULL_SYNC_INTERVAL_MS", DEFAULT_FULL_SYNC_INTERVAL_MS),
            cursor_sync_interval: env_millis("COLLAB_CURSOR_SYNC_MS", DEFAULT_CURSOR_SYNC_MS),
            idle_timeout: env_millis("COLLAB_IDLE_TIMEOUT_MS", DEFAULT_IDLE_TIMEOUT_MS),
            file_upload_throttle: env_millis("COLLAB_FILE_UPLOAD_THROTTLE_MS", DEFAULT_FILE_UPLOAD_THROTTLE_MS),
            reconnect_backoff_min: env_millis("COLLAB_RECONNECT_BACKOFF_MIN_MS", DEFAULT_RECONNECT_BACKOFF_MIN_MS),
            reconnect_backoff_max: env_millis("COLLAB_RECONNECT_BACKOFF_MAX_MS", DEFAULT_RECONNECT_BACKOFF_MAX_MS),
            socket_queue_capacity: env_parse("COLLAB_SOCKET_QUEUE_CAPACITY", DEFAULT_SOCKET_QUEUE_CAPACITY).max(1),
        }
    }
}

impl Default for CollabConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_COLLAB_SERVER_URL.to_owned(),
            backend_url: DEFAULT_BACKEND_URL.to_owned(),
            reconnect_notice_delay: Duration::from_millis(DEFAULT_RECONNECT_NOTICE_DELAY_MS),
            full_sync_interval: Duration::from_millis(DEFAULT_FULL_SYNC_INTERVAL_MS),
            cursor_sync_interval: Duration::from_millis(DEFAULT_CURSOR_SYNC_MS),
            idle_timeout: Duration::from_millis(DEFAULT_IDLE_TIMEOUT_MS),
            file_upload_throttle: Duration::from_millis(DEFAULT_FILE_UPLOAD_THROTTLE_MS),
            reconnect_backoff_min: Duration::from_millis(DEFAULT_RECONNECT_BACKOFF_MIN_MS),
            reconnect_backoff_max: Duration::from_millis(DEFAULT_RECONNECT_BACKOFF_MAX_MS),
            socket_queue_capacity: DEFAULT_SOCKET_QUEUE_CAPACITY,
        }
    }
}

// =============================================================================
// RELAY
// =============================================================================

/// Relay server settings.
#[derive(Debug, Clone, Copy)]
pub struct RelayConfig {
    pub port: u16,
    /// Outbound queue depth per connected peer.
    pub peer_queue_capacity: usize,
}

impl RelayConfig {
    /// `RELAY_PORT` (default 3002), `RELAY_PEER_QUEUE_CAPACITY` (default 256).
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            port: env_parse("RELAY_PORT", DEFAULT_RELAY_PORT),
            peer_queue_capacity: env_parse("RELAY_PEER_QUEUE_CAPACITY", DEFAULT_RELAY_PEER_QUEUE_CAPACITY).max(1),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self { port: DEFAULT_RELAY_PORT, peer_queue_capacity: DEFAULT_RELAY_PEER_QUEUE_CAPACITY }
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
