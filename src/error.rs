//! Error classification shared by every module's error enum.
//!
//! Each module owns a `thiserror` enum. Implementing [`ErrorCode`] gives the
//! session one place to decide whether a failure is retried quietly, shown
//! once, or fatal to the session.

/// Grepable error code plus recovery classification.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;

    /// Transient failures recover on their own (reconnect, next flush).
    fn retryable(&self) -> bool {
        false
    }

    /// Fatal failures end the collaboration session.
    fn fatal(&self) -> bool {
        false
    }
}
