//! Shared audio output context

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::time::Duration;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SampleRate;
use tracing::{debug, error, warn};

use crate::error::{Result, VoiceError};

/// Whether the output can render right now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputState {
    Suspended,
    Running,
}

/// Process-wide output destination for rendered replies
#[async_trait]
pub trait AudioOutput: Send + Sync {
    fn state(&self) -> OutputState;

    /// Bring a suspended output back. Resuming a running one is a no-op.
    async fn resume(&self) -> Result<()>;

    /// Play stereo frames; resolves when playback has finished
    async fn render(&self, frames: Vec<[f32; 2]>, sample_rate: u32) -> Result<()>;
}

/// Default cpal output device.
///
/// Holds no stream while idle, which is what "suspended" means here; a
/// stream exists only for the duration of one render.
pub struct CpalOutput {
    running: AtomicBool,
}

impl CpalOutput {
    /// Check that an output device exists
    pub fn open() -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| VoiceError::DeviceUnavailable("no output device available".to_string()))?;

        debug!(
            device = %device.name().unwrap_or_default(),
            "audio output context created"
        );

        Ok(Self {
            running: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl AudioOutput for CpalOutput {
    fn state(&self) -> OutputState {
        if self.running.load(Ordering::SeqCst) {
            OutputState::Running
        } else {
            OutputState::Suspended
        }
    }

    async fn resume(&self) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }

        let available = tokio::task::spawn_blocking(|| cpal::default_host().default_output_device().is_some())
            .await
            .unwrap_or(false);
        if !available {
            return Err(VoiceError::DeviceUnavailable("output device went away".to_string()));
        }

        self.running.store(true, Ordering::SeqCst);
        debug!("audio output resumed");
        Ok(())
    }

    async fn render(&self, frames: Vec<[f32; 2]>, sample_rate: u32) -> Result<()> {
        let result = tokio::task::spawn_blocking(move || render_blocking(frames, sample_rate))
            .await
            .map_err(|e| VoiceError::Io(std::io::Error::other(e)))?;

        // Idle again until the next resume
        self.running.store(false, Ordering::SeqCst);
        result
    }
}

fn render_blocking(frames: Vec<[f32; 2]>, sample_rate: u32) -> Result<()> {
    if frames.is_empty() {
        return Ok(());
    }

    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| VoiceError::DeviceUnavailable("no output device".to_string()))?;

    let supports_rate = |c: &cpal::SupportedStreamConfigRange| {
        c.min_sample_rate() <= SampleRate(sample_rate) && c.max_sample_rate() >= SampleRate(sample_rate)
    };
    let supported_config = device
        .supported_output_configs()
        .map_err(|e| VoiceError::DeviceUnavailable(e.to_string()))?
        .find(|c| c.channels() == 2 && supports_rate(c))
        .or_else(|| {
            device
                .supported_output_configs()
                .ok()?
                .find(|c| c.channels() == 1 && supports_rate(c))
        })
        .ok_or_else(|| {
            VoiceError::DeviceUnavailable(format!("output cannot play {sample_rate} Hz"))
        })?;

    let config = supported_config
        .with_sample_rate(SampleRate(sample_rate))
        .config();
    let channels = usize::from(config.channels);

    let frame_count = frames.len();
    let (done_tx, done_rx) = mpsc::channel::<()>();
    let mut done_tx = Some(done_tx);
    let mut position = 0usize;

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                for out in data.chunks_mut(channels) {
                    let [left, right] = frames.get(position).copied().unwrap_or([0.0, 0.0]);
                    if channels == 1 {
                        out[0] = (left + right) / 2.0;
                    } else {
                        out[0] = left;
                        out[1] = right;
                        for extra in out.iter_mut().skip(2) {
                            *extra = 0.0;
                        }
                    }

                    if position < frames.len() {
                        position += 1;
                    } else if let Some(tx) = done_tx.take() {
                        let _ = tx.send(());
                    }
                }
            },
            |err| {
                error!(error = %err, "audio playback error");
            },
            None,
        )
        .map_err(|e| VoiceError::DeviceUnavailable(e.to_string()))?;

    stream
        .play()
        .map_err(|e| VoiceError::DeviceUnavailable(e.to_string()))?;

    let duration_ms = (frame_count as u64 * 1000) / u64::from(sample_rate.max(1));
    if done_rx
        .recv_timeout(Duration::from_millis(duration_ms + 1000))
        .is_err()
    {
        warn!(duration_ms, "playback did not signal completion");
    }

    // Let the device drain its last buffer
    std::thread::sleep(Duration::from_millis(100));
    drop(stream);

    debug!(frames = frame_count, "playback complete");
    Ok(())
}
