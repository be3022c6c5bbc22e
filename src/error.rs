//! Error taxonomy for a conversational turn
//!
//! Every failure that can interrupt a turn is one of these variants. None
//! of them is fatal to the daemon: the state machine maps each one to a
//! status message and returns to Idle.

use thiserror::Error;

/// Result alias used by the voice components
pub type Result<T> = std::result::Result<T, VoiceError>;

/// Errors raised by capture, recognition, pipeline and playback
#[derive(Debug, Error)]
pub enum VoiceError {
    /// The OS or user refused microphone access
    #[error("microphone permission denied: {0}")]
    PermissionDenied(String),

    /// No usable input device
    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),

    /// The recognition primitive reported a fault
    #[error("recognition fault: {0}")]
    RecognitionFault(String),

    /// `/transcribe` answered with a non-success status
    #[error("transcription failed with status {0}")]
    TranscriptionFailed(u16),

    /// `/chat` answered with a non-success status
    #[error("chat failed with status {0}")]
    ChatFailed(u16),

    /// `/chat` reply carried neither text nor audio
    #[error("chat reply has neither text nor audio")]
    InvalidResponse,

    /// Both the spatial and the plain playback path failed
    #[error("playback blocked for {url}")]
    PlaybackBlocked { url: String },

    /// Response audio could not be decoded
    #[error("audio decode failed: {0}")]
    DecodeFailed(String),

    /// Transport-level HTTP failure
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl VoiceError {
    /// Whether the failure came from the backend connection
    pub fn is_connection(&self) -> bool {
        matches!(
            self,
            VoiceError::TranscriptionFailed(_) | VoiceError::ChatFailed(_) | VoiceError::Http(_)
        )
    }

    /// Whether the failure came from microphone access
    pub fn is_microphone(&self) -> bool {
        matches!(
            self,
            VoiceError::PermissionDenied(_) | VoiceError::DeviceUnavailable(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(VoiceError::ChatFailed(500).is_connection());
        assert!(VoiceError::TranscriptionFailed(502).is_connection());
        assert!(!VoiceError::InvalidResponse.is_connection());
        assert!(VoiceError::PermissionDenied("denied".into()).is_microphone());
        assert!(!VoiceError::DecodeFailed("bad frame".into()).is_microphone());
    }

    #[test]
    fn test_error_display_carries_status() {
        let err = VoiceError::ChatFailed(500);
        assert_eq!(err.to_string(), "chat failed with status 500");
    }
}
