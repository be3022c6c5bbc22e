//! Recognition primitive interface

use tokio::sync::mpsc;

use crate::error::{Result, VoiceError};

/// Fault classes a recognizer can report
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionErrorKind {
    /// Nothing was said for a while
    NoSpeech,
    Aborted,
    AudioCapture,
    Network,
    NotAllowed,
    ServiceNotAllowed,
    Other(String),
}

impl RecognitionErrorKind {
    /// Stable wire code
    pub fn code(&self) -> &str {
        match self {
            RecognitionErrorKind::NoSpeech => "no-speech",
            RecognitionErrorKind::Aborted => "aborted",
            RecognitionErrorKind::AudioCapture => "audio-capture",
            RecognitionErrorKind::Network => "network",
            RecognitionErrorKind::NotAllowed => "not-allowed",
            RecognitionErrorKind::ServiceNotAllowed => "service-not-allowed",
            RecognitionErrorKind::Other(code) => code.as_str(),
        }
    }
}

impl From<&VoiceError> for RecognitionErrorKind {
    fn from(err: &VoiceError) -> Self {
        match err {
            VoiceError::PermissionDenied(_) => RecognitionErrorKind::NotAllowed,
            VoiceError::DeviceUnavailable(_) => RecognitionErrorKind::AudioCapture,
            VoiceError::Http(_) | VoiceError::TranscriptionFailed(_) => RecognitionErrorKind::Network,
            VoiceError::RecognitionFault(code) => RecognitionErrorKind::Other(code.clone()),
            other => RecognitionErrorKind::Other(other.to_string()),
        }
    }
}

impl std::fmt::Display for RecognitionErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Output of a recognition session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionEvent {
    /// Interim hypothesis, may still change
    Partial(String),
    /// Final transcript for one segment
    Final(String),
    /// The session faulted; no further events follow
    Error(RecognitionErrorKind),
    /// The session ended on its own
    Ended,
}

/// Always-on streaming recognizer
pub trait SpeechRecognizer: Send {
    /// Begin a session that reports on `events`
    fn start(&mut self, events: mpsc::Sender<RecognitionEvent>) -> Result<()>;

    /// Halt the current session, if any, and release the microphone
    fn stop(&mut self);
}
