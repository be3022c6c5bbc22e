//! IPC message protocol definitions
//!
//! All messages are JSON-encoded, prefixed with a 4-byte little-endian length.

use serde::{Deserialize, Serialize};

use crate::events::{StateEvent, Status};
use crate::state::ActivationState;

/// Requests from the frontend to the daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Request current daemon status
    GetStatus,

    /// Ping to check connectivity
    Ping,

    /// Turn this connection into a push-only event stream
    Subscribe,
}

/// Responses from the daemon to the frontend
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Current daemon status
    Status(DaemonStatus),

    /// Pong response to ping
    Pong,

    /// Subscription confirmed
    Subscribed,

    /// Error response
    Error { code: String, message: String },
}

/// Push notification for subscribed connections.
///
/// Tagged by `kind`, since the wrapped `StateEvent` already uses `type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    /// Activation state has changed
    StateChanged {
        state: ActivationState,
        previous: ActivationState,
    },
    /// Any other state machine event
    Event(StateEvent),
}

impl From<StateEvent> for Notification {
    fn from(event: StateEvent) -> Self {
        match event {
            StateEvent::StateChanged { from, to } => Notification::StateChanged {
                state: to,
                previous: from,
            },
            other => Notification::Event(other),
        }
    }
}

/// Full daemon status snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonStatus {
    /// Daemon version
    pub version: String,

    /// Current activation state
    pub state: ActivationState,

    /// Last status line shown to the user
    pub status: Option<Status>,

    /// Whether continuous recognition is armed
    pub recognition_running: bool,

    /// Uptime in seconds
    pub uptime_secs: u64,
}

impl Default for DaemonStatus {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            state: ActivationState::default(),
            status: None,
            recognition_running: false,
            uptime_secs: 0,
        }
    }
}

impl DaemonStatus {
    /// Fold a state machine event into the snapshot
    pub fn apply(&mut self, event: &StateEvent) {
        match event {
            StateEvent::StateChanged { to, .. } => self.state = *to,
            StateEvent::Status(status) => {
                match status {
                    Status::WaitingForWakePhrase => self.recognition_running = true,
                    Status::RecognitionRetrying { .. } | Status::WakeDetected => {
                        self.recognition_running = false
                    }
                    _ => {}
                }
                self.status = Some(status.clone());
            }
            _ => {}
        }
    }
}
