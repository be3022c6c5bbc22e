//! State machine module for the voice interaction
//!
//! Five states, one turn at a time:
//! - Idle: continuous recognition armed, waiting for the wake phrase
//! - Listening: wake phrase heard, microphone being opened
//! - Recording: bounded capture of the query
//! - Processing: transcription and chat
//! - Speaking: spatialized (or plain) playback of the reply

mod machine;

pub use machine::{ActivationState, StateMachine, TurnTimings};
