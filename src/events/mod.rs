//! Events module for state machine transitions
//!
//! Everything an observer can see about a turn goes out as a `StateEvent`:
//! state changes, the user-facing status line, transcripts, reply text and
//! the navigation side channel.

use serde::{Deserialize, Serialize};

use crate::state::ActivationState;

/// User-facing status line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Status {
    /// Armed and waiting for the wake phrase
    WaitingForWakePhrase,
    /// Wake phrase heard, opening the microphone
    WakeDetected,
    /// Recording the query
    Recording,
    /// Waiting on the backend
    Processing,
    /// Playing the reply
    Speaking,
    /// Recognition hiccup, a reset is scheduled
    RecognitionRetrying { code: String },
    /// Microphone could not be opened
    MicrophoneError,
    /// Backend unreachable or answered with an error
    ConnectionError,
    /// Backend answered with an unusable reply
    InvalidResponse,
    /// Playback was refused; the reply can still be played by hand
    ManualPlayRequired { audio_url: String },
    /// A navigation command was forwarded
    NavigationSent,
    /// The turn failed for a reason outside the cases above
    Failed { reason: String },
}

/// Events emitted by the state machine during a turn
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StateEvent {
    /// The activation state changed
    StateChanged {
        from: ActivationState,
        to: ActivationState,
    },

    /// Status line update
    Status(Status),

    /// The recorded query was transcribed
    TranscriptReady { text: String },

    /// Transcript display should be cleared (Idle re-entry)
    TranscriptCleared,

    /// Navigation command for the host frame; payload is the raw transcript
    NavigationRequested { payload: String },

    /// Reply text from the chat backend
    ResponseReady { text: String },

    /// A turn finished normally
    TurnComplete {
        /// Duration in milliseconds from wake phrase to Idle
        duration_ms: u64,
    },

    /// A turn was aborted and the machine forced back to Idle
    TurnFailed { error: String },
}

impl std::fmt::Display for StateEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StateEvent::StateChanged { from, to } => write!(f, "STATE_CHANGED ({} -> {})", from, to),
            StateEvent::Status(status) => write!(f, "STATUS ({:?})", status),
            StateEvent::TranscriptReady { text } => write!(f, "TRANSCRIPT_READY ({})", text),
            StateEvent::TranscriptCleared => write!(f, "TRANSCRIPT_CLEARED"),
            StateEvent::NavigationRequested { payload } => {
                write!(f, "NAVIGATION_REQUESTED ({})", payload)
            }
            StateEvent::ResponseReady { .. } => write!(f, "RESPONSE_READY"),
            StateEvent::TurnComplete { duration_ms } => {
                write!(f, "TURN_COMPLETE ({}ms)", duration_ms)
            }
            StateEvent::TurnFailed { error } => write!(f, "TURN_FAILED ({})", error),
        }
    }
}
