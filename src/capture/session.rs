//! Bounded one-shot recording

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info};

use crate::error::Result;

/// Captured audio with its declared MIME type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioBlob {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

impl AudioBlob {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Source of microphone tracks
#[async_trait]
pub trait Microphone: Send + Sync {
    /// Request access and start buffering.
    ///
    /// Fails with `PermissionDenied` or `DeviceUnavailable`.
    async fn open(&self) -> Result<Box<dyn InputTrack>>;
}

/// An open microphone track
pub trait InputTrack: Send {
    /// MIME type of the chunks this track produces
    fn mime_type(&self) -> &str;

    /// Stop the device. Calling it more than once is a no-op.
    fn release(&mut self);

    /// Drain the chunks buffered so far
    fn take_chunks(&mut self) -> Result<Vec<Vec<u8>>>;
}

/// One bounded recording.
///
/// The track is released when the session is stopped and, failing that,
/// when the session is dropped, so no exit path leaves the device open.
pub struct AudioCaptureSession {
    track: Box<dyn InputTrack>,
    opened_at: Instant,
    deadline: Instant,
}

impl AudioCaptureSession {
    /// Open the microphone and start a recording of at most `max_duration`
    pub async fn open(microphone: &dyn Microphone, max_duration: Duration) -> Result<Self> {
        let track = microphone.open().await?;
        let opened_at = Instant::now();

        debug!(
            max_ms = max_duration.as_millis() as u64,
            mime = track.mime_type(),
            "capture session opened"
        );

        Ok(Self {
            track,
            opened_at,
            deadline: opened_at + max_duration,
        })
    }

    /// Record until the deadline, then stop
    pub async fn wait(self) -> Result<AudioBlob> {
        sleep_until(self.deadline).await;
        self.stop()
    }

    /// Stop now and return everything recorded so far as one blob
    pub fn stop(mut self) -> Result<AudioBlob> {
        self.track.release();
        let bytes = self.track.take_chunks()?.concat();

        info!(
            duration_ms = self.opened_at.elapsed().as_millis() as u64,
            bytes = bytes.len(),
            "capture session closed"
        );

        Ok(AudioBlob {
            bytes,
            mime_type: self.track.mime_type().to_string(),
        })
    }
}

impl Drop for AudioCaptureSession {
    fn drop(&mut self) {
        self.track.release();
    }
}
