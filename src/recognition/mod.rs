//! Continuous recognition module
//!
//! A `SpeechRecognizer` is the always-on primitive; the
//! `ContinuousRecognitionLoop` supervises it, watches for the wake phrase
//! and decides how to recover when a session ends or faults.

mod event;
mod supervisor;
mod windowed;

pub use event::{RecognitionErrorKind, RecognitionEvent, SpeechRecognizer};
pub use supervisor::{ContinuousRecognitionLoop, LoopSignal, RestartPolicy};
pub use windowed::WindowedRecognizer;
