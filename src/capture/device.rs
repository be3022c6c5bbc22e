//! Microphone backed by the default cpal input device

use std::sync::{mpsc, Arc, Mutex};
use std::thread;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BuildStreamError, SampleRate, Stream};
use tokio::sync::oneshot;
use tracing::{debug, error};

use super::session::{InputTrack, Microphone};
use crate::error::{Result, VoiceError};

/// Sample rate for capture (16kHz for speech)
pub const SAMPLE_RATE: u32 = 16000;

/// Opens the default input device.
///
/// cpal streams are not `Send`, so each track keeps its stream on a
/// dedicated thread that lives until the track is released.
#[derive(Debug, Default)]
pub struct CpalMicrophone;

#[async_trait]
impl Microphone for CpalMicrophone {
    async fn open(&self) -> Result<Box<dyn InputTrack>> {
        let samples = Arc::new(Mutex::new(Vec::new()));
        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let buffer = Arc::clone(&samples);
        thread::Builder::new()
            .name("mic-capture".to_string())
            .spawn(move || {
                let stream = match build_input_stream(buffer) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));

                // Returns on release or when the track is dropped
                let _ = stop_rx.recv();
                drop(stream);
                debug!("microphone stream closed");
            })?;

        ready_rx
            .await
            .map_err(|_| VoiceError::DeviceUnavailable("capture thread exited".to_string()))??;

        Ok(Box::new(CpalTrack {
            samples,
            stop_tx: Some(stop_tx),
        }))
    }
}

struct CpalTrack {
    samples: Arc<Mutex<Vec<f32>>>,
    stop_tx: Option<mpsc::Sender<()>>,
}

impl InputTrack for CpalTrack {
    fn mime_type(&self) -> &str {
        "audio/wav"
    }

    fn release(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
    }

    fn take_chunks(&mut self) -> Result<Vec<Vec<u8>>> {
        let samples = self
            .samples
            .lock()
            .map(|mut buf| std::mem::take(&mut *buf))
            .unwrap_or_default();

        // A WAV header has to cover the whole recording, so it is one chunk
        Ok(vec![samples_to_wav(&samples, SAMPLE_RATE)?])
    }
}

fn build_input_stream(buffer: Arc<Mutex<Vec<f32>>>) -> Result<Stream> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| VoiceError::DeviceUnavailable("no input device available".to_string()))?;

    let supported_config = device
        .supported_input_configs()
        .map_err(|e| VoiceError::DeviceUnavailable(e.to_string()))?
        .find(|c| {
            c.channels() == 1
                && c.min_sample_rate() <= SampleRate(SAMPLE_RATE)
                && c.max_sample_rate() >= SampleRate(SAMPLE_RATE)
        })
        .ok_or_else(|| VoiceError::DeviceUnavailable("no suitable input config".to_string()))?;

    let config = supported_config
        .with_sample_rate(SampleRate(SAMPLE_RATE))
        .config();

    let stream = device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                if let Ok(mut buf) = buffer.lock() {
                    buf.extend_from_slice(data);
                }
            },
            |err| {
                error!(error = %err, "audio capture error");
            },
            None,
        )
        .map_err(map_build_error)?;

    stream
        .play()
        .map_err(|e| VoiceError::DeviceUnavailable(e.to_string()))?;

    debug!(
        device = %device.name().unwrap_or_default(),
        sample_rate = SAMPLE_RATE,
        "microphone stream started"
    );

    Ok(stream)
}

/// Backend-specific failures are how hosts report refused access
fn map_build_error(err: BuildStreamError) -> VoiceError {
    match err {
        BuildStreamError::BackendSpecific { .. } => VoiceError::PermissionDenied(err.to_string()),
        other => VoiceError::DeviceUnavailable(other.to_string()),
    }
}

/// Encode f32 samples as 16-bit mono WAV
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| VoiceError::Io(std::io::Error::other(e)))?;

        for &sample in samples {
            let sample_i16 = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer
                .write_sample(sample_i16)
                .map_err(|e| VoiceError::Io(std::io::Error::other(e)))?;
        }

        writer
            .finalize()
            .map_err(|e| VoiceError::Io(std::io::Error::other(e)))?;
    }

    Ok(cursor.into_inner())
}
