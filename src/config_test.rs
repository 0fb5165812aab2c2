use super::*;

// =============================================================================
// env_parse
// =============================================================================

#[test]
fn env_parse_missing_returns_default() {
    let val: usize = env_parse("__BOARDSYNC_TEST_MISSING_KEY__", 42);
    assert_eq!(val, 42);
}

#[test]
fn env_parse_present_valid() {
    unsafe { std::env::set_var("__BOARDSYNC_TEST_EP_VALID__", "99") };
    let val: u64 = env_parse("__BOARDSYNC_TEST_EP_VALID__", 0);
    assert_eq!(val, 99);
    unsafe { std::env::remove_var("__BOARDSYNC_TEST_EP_VALID__") };
}

#[test]
fn env_parse_present_invalid_returns_default() {
    unsafe { std::env::set_var("__BOARDSYNC_TEST_EP_INVALID__", "soon") };
    let val: u16 = env_parse("__BOARDSYNC_TEST_EP_INVALID__", 7);
    assert_eq!(val, 7);
    unsafe { std::env::remove_var("__BOARDSYNC_TEST_EP_INVALID__") };
}

// =============================================================================
// defaults
// =============================================================================

#[test]
fn collab_config_defaults_match_constants() {
    let config = CollabConfig::default();
    assert_eq!(config.reconnect_notice_delay, Duration::from_millis(DEFAULT_RECONNECT_NOTICE_DELAY_MS));
    assert_eq!(config.full_sync_interval, Duration::from_millis(DEFAULT_FULL_SYNC_INTERVAL_MS));
    assert_eq!(config.cursor_sync_interval, Duration::from_millis(DEFAULT_CURSOR_SYNC_MS));
    assert_eq!(config.idle_timeout, Duration::from_millis(DEFAULT_IDLE_TIMEOUT_MS));
    assert!(config.file_upload_throttle < Duration::from_secs(1));
    assert!(config.reconnect_backoff_min <= config.reconnect_backoff_max);
}

#[test]
fn relay_config_defaults_match_constants() {
    let config = RelayConfig::default();
    assert_eq!(config.port, DEFAULT_RELAY_PORT);
    assert_eq!(config.peer_queue_capacity, DEFAULT_RELAY_PEER_QUEUE_CAPACITY);
}
