//! Windowed continuous recognizer
//!
//! Records back-to-back windows, skips the quiet ones by RMS energy and
//! sends voiced ones to the backend for transcription. A run of quiet
//! windows raises `no-speech`; the session ends after a fixed length, the
//! way streaming recognizers time out.

use std::io::Cursor;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, trace, warn};

use super::event::{RecognitionErrorKind, RecognitionEvent, SpeechRecognizer};
use crate::backend::Backend;
use crate::capture::{AudioBlob, InputTrack, Microphone};
use crate::config::RecognizerConfig;
use crate::error::{Result, VoiceError};

/// The track of the window being recorded, shared so `stop` can release it
type TrackSlot = Arc<Mutex<Option<Box<dyn InputTrack>>>>;

pub struct WindowedRecognizer {
    microphone: Arc<dyn Microphone>,
    backend: Arc<dyn Backend>,
    settings: RecognizerConfig,
    task: Option<JoinHandle<()>>,
    track: TrackSlot,
}

impl WindowedRecognizer {
    pub fn new(
        microphone: Arc<dyn Microphone>,
        backend: Arc<dyn Backend>,
        settings: RecognizerConfig,
    ) -> Self {
        Self {
            microphone,
            backend,
            settings,
            task: None,
            track: Arc::new(Mutex::new(None)),
        }
    }
}

fn lock(slot: &TrackSlot) -> MutexGuard<'_, Option<Box<dyn InputTrack>>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SpeechRecognizer for WindowedRecognizer {
    fn start(&mut self, events: mpsc::Sender<RecognitionEvent>) -> Result<()> {
        self.stop();

        let runtime = Handle::try_current()
            .map_err(|_| VoiceError::RecognitionFault("no-runtime".to_string()))?;

        let session = run_session(
            Arc::clone(&self.microphone),
            Arc::clone(&self.backend),
            self.settings.clone(),
            Arc::clone(&self.track),
            events,
        );
        self.task = Some(runtime.spawn(session));
        Ok(())
    }

    fn stop(&mut self) {
        // The microphone must be free when this returns; an aborted task
        // is only dropped on its next poll
        if let Some(mut track) = lock(&self.track).take() {
            track.release();
            debug!("recognition window released");
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for WindowedRecognizer {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_session(
    microphone: Arc<dyn Microphone>,
    backend: Arc<dyn Backend>,
    settings: RecognizerConfig,
    track: TrackSlot,
    events: mpsc::Sender<RecognitionEvent>,
) {
    let started = Instant::now();
    let session_len = Duration::from_millis(settings.session_ms);
    let window = Duration::from_millis(settings.window_ms);
    let mut silent_windows = 0u32;

    loop {
        if started.elapsed() >= session_len {
            let _ = events.send(RecognitionEvent::Ended).await;
            return;
        }

        let blob = match capture_window(microphone.as_ref(), window, &track).await {
            Ok(blob) => blob,
            Err(e) => {
                warn!(error = %e, "recognition capture failed");
                let _ = events.send(RecognitionEvent::Error((&e).into())).await;
                return;
            }
        };

        if !is_voiced(&blob, settings.silence_threshold) {
            silent_windows += 1;
            trace!(silent_windows, "quiet window");
            if silent_windows >= settings.silent_windows {
                let _ = events
                    .send(RecognitionEvent::Error(RecognitionErrorKind::NoSpeech))
                    .await;
                return;
            }
            continue;
        }
        silent_windows = 0;

        let text = match backend.transcribe(blob).await {
            Ok(query) => query.text,
            Err(e) => {
                warn!(error = %e, "recognition transcription failed");
                let _ = events.send(RecognitionEvent::Error((&e).into())).await;
                return;
            }
        };

        if text.trim().is_empty() {
            continue;
        }

        if events.send(RecognitionEvent::Final(text)).await.is_err() {
            debug!("recognition listener gone, ending session");
            return;
        }
    }
}

/// Record one window, leaving the open track where `stop` can reach it
async fn capture_window(
    microphone: &dyn Microphone,
    window: Duration,
    slot: &TrackSlot,
) -> Result<AudioBlob> {
    let track = microphone.open().await?;
    let mime_type = track.mime_type().to_string();
    *lock(slot) = Some(track);

    sleep(window).await;

    let taken = lock(slot).take();
    let Some(mut track) = taken else {
        return Err(VoiceError::RecognitionFault("aborted".to_string()));
    };
    track.release();
    let bytes = track.take_chunks()?.concat();

    Ok(AudioBlob { bytes, mime_type })
}

/// Undecodable audio is passed on and left for the backend to judge
fn is_voiced(blob: &AudioBlob, threshold: f32) -> bool {
    match wav_rms(&blob.bytes) {
        Ok(level) => level >= threshold,
        Err(e) => {
            debug!(error = %e, "window energy unavailable");
            true
        }
    }
}

/// RMS level of 16-bit WAV audio, in [0, 1]
fn wav_rms(bytes: &[u8]) -> Result<f32> {
    let reader = hound::WavReader::new(Cursor::new(bytes))
        .map_err(|e| VoiceError::DecodeFailed(e.to_string()))?;

    let mut sum_squares = 0.0f64;
    let mut count = 0usize;
    for sample in reader.into_samples::<i16>() {
        let sample = sample.map_err(|e| VoiceError::DecodeFailed(e.to_string()))?;
        let value = f64::from(sample) / 32768.0;
        sum_squares += value * value;
        count += 1;
    }

    if count == 0 {
        return Ok(0.0);
    }
    Ok((sum_squares / count as f64).sqrt() as f32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{samples_to_wav, AudioCaptureSession, SAMPLE_RATE};
    use crate::testing::{FakeBackend, FakeMicrophone};

    fn tone() -> Vec<u8> {
        let samples: Vec<f32> = (0..1600)
            .map(|i| 0.5 * (i as f32 * 0.1).sin())
            .collect();
        samples_to_wav(&samples, SAMPLE_RATE).unwrap()
    }

    fn silence() -> Vec<u8> {
        samples_to_wav(&[0.0; 1600], SAMPLE_RATE).unwrap()
    }

    fn settings() -> RecognizerConfig {
        RecognizerConfig {
            window_ms: 1000,
            session_ms: 60_000,
            silence_threshold: 0.01,
            silent_windows: 3,
        }
    }

    #[test]
    fn test_rms_levels() {
        assert!(wav_rms(&silence()).unwrap() < 0.001);
        assert!(wav_rms(&tone()).unwrap() > 0.2);
        assert!(wav_rms(b"not a wav").is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_voiced_window_becomes_final() {
        let mic = Arc::new(FakeMicrophone::with_chunks(vec![tone()]));
        let backend = Arc::new(FakeBackend::new().transcript("hey asistente"));
        let mut recognizer = WindowedRecognizer::new(mic, backend, settings());

        let (tx, mut rx) = mpsc::channel(8);
        recognizer.start(tx).unwrap();

        assert_eq!(
            rx.recv().await,
            Some(RecognitionEvent::Final("hey asistente".into()))
        );
        recognizer.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_quiet_windows_raise_no_speech() {
        let mic = Arc::new(FakeMicrophone::with_chunks(vec![silence()]));
        let backend = Arc::new(FakeBackend::new());
        let mut recognizer = WindowedRecognizer::new(mic.clone(), backend.clone(), settings());

        let (tx, mut rx) = mpsc::channel(8);
        let started = Instant::now();
        recognizer.start(tx).unwrap();

        assert_eq!(
            rx.recv().await,
            Some(RecognitionEvent::Error(RecognitionErrorKind::NoSpeech))
        );
        assert_eq!(started.elapsed(), Duration::from_millis(3000));
        assert_eq!(backend.transcribe_calls(), 0);
        assert_eq!(mic.open_tracks(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_ends_after_its_length() {
        let mic = Arc::new(FakeMicrophone::with_chunks(vec![tone()]));
        let backend = Arc::new(FakeBackend::new());
        let mut recognizer = WindowedRecognizer::new(
            mic,
            backend,
            RecognizerConfig {
                session_ms: 2000,
                ..settings()
            },
        );

        let (tx, mut rx) = mpsc::channel(8);
        recognizer.start(tx).unwrap();

        assert_eq!(rx.recv().await, Some(RecognitionEvent::Ended));
    }

    #[tokio::test(start_paused = true)]
    async fn test_microphone_refusal_is_reported() {
        let mic = Arc::new(FakeMicrophone::denied());
        let mut recognizer = WindowedRecognizer::new(mic, Arc::new(FakeBackend::new()), settings());

        let (tx, mut rx) = mpsc::channel(8);
        recognizer.start(tx).unwrap();

        assert_eq!(
            rx.recv().await,
            Some(RecognitionEvent::Error(RecognitionErrorKind::NotAllowed))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_releases_microphone() {
        let mic = Arc::new(FakeMicrophone::with_chunks(vec![tone()]));
        let mut recognizer =
            WindowedRecognizer::new(mic.clone(), Arc::new(FakeBackend::new()), settings());

        let (tx, _rx) = mpsc::channel(8);
        recognizer.start(tx).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(mic.open_tracks(), 1);

        // Released before stop returns, with no further polling
        recognizer.stop();
        assert_eq!(mic.open_tracks(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_turn_capture_never_overlaps_recognition() {
        let mic = Arc::new(FakeMicrophone::with_chunks(vec![tone()]));
        let mut recognizer =
            WindowedRecognizer::new(mic.clone(), Arc::new(FakeBackend::new()), settings());

        let (tx, _rx) = mpsc::channel(8);
        recognizer.start(tx).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        recognizer.stop();
        let session = AudioCaptureSession::open(mic.as_ref(), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(mic.open_tracks(), 1);

        drop(session);
        assert_eq!(mic.open_tracks(), 0);
    }

    #[test]
    fn test_start_outside_runtime_is_a_fault() {
        let mic = Arc::new(FakeMicrophone::with_chunks(vec![]));
        let mut recognizer = WindowedRecognizer::new(mic, Arc::new(FakeBackend::new()), settings());

        let (tx, _rx) = mpsc::channel(8);
        let result = recognizer.start(tx);
        assert!(matches!(result, Err(VoiceError::RecognitionFault(code)) if code == "no-runtime"));
    }
}
