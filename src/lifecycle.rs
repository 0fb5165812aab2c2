//! Connection lifecycle — what the user is told about the link.
//!
//! DESIGN
//! ======
//! ```text
//! idle ──▶ connecting ──▶ connected ◀──▶ disconnected ──▶ connecting ...
//!   │                         │                │
//!   └─────────────────────────┴────────────────┴──▶ closed (terminal)
//! ```
//!
//! The machine is pure: it consumes transport status events and returns
//! effects. Timing lives with the caller, which arms the reconnect-notice
//! debounce through the scheduler when asked and calls
//! [`ConnectionLifecycle::reconnect_notice_due`] when it fires. Retry timing
//! belongs to the transport.
//!
//! A first connect that is slow or fails is never reported as a reconnect.
//! Only a drop after a successful connect can raise "Reconnecting", and once
//! shown it is followed by a "Reconnected" confirmation.

use crate::state::{Notice, StatusIndicator};
use crate::transport::ConnectionStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LifecycleState {
    #[default]
    Idle,
    Connecting,
    Connected,
    Disconnected,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEffect {
    Indicator(StatusIndicator),
    /// Arm the debounce; when it fires, call `reconnect_notice_due`.
    ScheduleReconnectNotice,
    CancelReconnectNotice,
    Notify(Notice),
}

#[derive(Debug, Default, Clone)]
pub struct ConnectionLifecycle {
    state: LifecycleState,
    has_been_connected: bool,
    has_had_disconnection: bool,
    notice_pending: bool,
    reconnecting_shown: bool,
}

impl ConnectionLifecycle {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    #[must_use]
    pub fn has_been_connected(&self) -> bool {
        self.has_been_connected
    }

    #[must_use]
    pub fn has_had_disconnection(&self) -> bool {
        self.has_had_disconnection
    }

    pub fn on_status(&mut self, status: ConnectionStatus) -> Vec<LifecycleEffect> {
        if self.state == LifecycleState::Closed {
            return Vec::new();
        }
        match status {
            ConnectionStatus::Connecting => self.on_connecting(),
            ConnectionStatus::Connected => self.on_connected(),
            ConnectionStatus::Disconnected => self.on_disconnected(),
        }
    }

    fn on_connecting(&mut self) -> Vec<LifecycleEffect> {
        let first = !self.has_been_connected && self.state == LifecycleState::Idle;
        self.state = LifecycleState::Connecting;
        if first {
            vec![LifecycleEffect::Indicator(StatusIndicator::Connecting)]
        } else {
            Vec::new()
        }
    }

    fn on_connected(&mut self) -> Vec<LifecycleEffect> {
        if self.state == LifecycleState::Connected {
            return Vec::new();
        }
        self.state = LifecycleState::Connected;
        self.has_been_connected = true;

        let mut effects = Vec::new();
        if std::mem::take(&mut self.notice_pending) {
            effects.push(LifecycleEffect::CancelReconnectNotice);
        }
        effects.push(LifecycleEffect::Indicator(StatusIndicator::Connected));
        if std::mem::take(&mut self.reconnecting_shown) {
            effects.push(LifecycleEffect::Notify(Notice::Reconnected));
        }
        effects
    }

    fn on_disconnected(&mut self) -> Vec<LifecycleEffect> {
        if self.state == LifecycleState::Disconnected {
            return Vec::new();
        }
        self.state = LifecycleState::Disconnected;
        if !self.has_been_connected {
            // Still on the first attempt; keep showing "Connecting".
            return Vec::new();
        }
        self.has_had_disconnection = true;
        if self.notice_pending || self.reconnecting_shown {
            return Vec::new();
        }
        self.notice_pending = true;
        vec![LifecycleEffect::ScheduleReconnectNotice]
    }

    /// The debounce elapsed. Shows "Reconnecting" if the link is still down.
    pub fn reconnect_notice_due(&mut self) -> Vec<LifecycleEffect> {
        if !std::mem::take(&mut self.notice_pending) {
            return Vec::new();
        }
        match self.state {
            LifecycleState::Disconnected | LifecycleState::Connecting => {
                self.reconnecting_shown = true;
                vec![
                    LifecycleEffect::Indicator(StatusIndicator::Reconnecting),
                    LifecycleEffect::Notify(Notice::Reconnecting),
                ]
            }
            LifecycleState::Idle | LifecycleState::Connected | LifecycleState::Closed => Vec::new(),
        }
    }

    /// Explicit stop. Terminal; later status events are ignored.
    pub fn close(&mut self) -> Vec<LifecycleEffect> {
        if self.state == LifecycleState::Closed {
            return Vec::new();
        }
        self.state = LifecycleState::Closed;
        let mut effects = Vec::new();
        if std::mem::take(&mut self.notice_pending) {
            effects.push(LifecycleEffect::CancelReconnectNotice);
        }
        self.reconnecting_shown = false;
        effects.push(LifecycleEffect::Indicator(StatusIndicator::Offline));
        effects
    }
}

#[cfg(test)]
#[path = "lifecycle_test.rs"]
mod tests;
