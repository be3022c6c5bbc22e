//! Core interaction state machine
//!
//! Owns the activation state and the conversation context and drives one
//! turn at a time: Idle → Listening → Recording → Processing → Speaking →
//! Idle. Any failure outside Idle forces Idle, which re-arms recognition.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::backend::ConversationContext;
use crate::capture::{AudioCaptureSession, Microphone};
use crate::error::{Result, VoiceError};
use crate::events::{StateEvent, Status};
use crate::pipeline::{ConversationPipeline, PipelineOutcome};
use crate::playback::PlaybackEngine;
use crate::recognition::{
    ContinuousRecognitionLoop, LoopSignal, RecognitionErrorKind, RecognitionEvent,
};

/// The five activation states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationState {
    /// Recognition armed, waiting for the wake phrase
    #[default]
    Idle,
    /// Wake phrase heard, opening the microphone
    Listening,
    /// Recording the query
    Recording,
    /// Transcribing and chatting
    Processing,
    /// Playing the reply
    Speaking,
}

impl std::fmt::Display for ActivationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActivationState::Idle => write!(f, "Idle"),
            ActivationState::Listening => write!(f, "Listening"),
            ActivationState::Recording => write!(f, "Recording"),
            ActivationState::Processing => write!(f, "Processing"),
            ActivationState::Speaking => write!(f, "Speaking"),
        }
    }
}

/// Timing constants for turns and recovery
#[derive(Debug, Clone, Copy)]
pub struct TurnTimings {
    /// Upper bound for one recording
    pub max_recording: Duration,
}

/// How a turn ended when nothing failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TurnOutcome {
    Navigated,
    TextOnly,
    Spoke,
}

/// The orchestrator
pub struct StateMachine {
    /// Current state
    state: ActivationState,
    /// Set from wake phrase until Idle re-entry
    activated: bool,
    /// Server-issued context, carried from one reply to the next request
    context: ConversationContext,
    recognition: ContinuousRecognitionLoop,
    microphone: Arc<dyn Microphone>,
    pipeline: ConversationPipeline,
    playback: Arc<PlaybackEngine>,
    timings: TurnTimings,
    /// Pending re-arm after a recognition fault
    reset_at: Option<Instant>,
    /// Whether a capture session is currently open
    recording: bool,
    /// Time when the current non-Idle state was entered
    state_entered_at: Option<Instant>,
    /// Channel for emitting state events
    event_tx: broadcast::Sender<StateEvent>,
}

impl StateMachine {
    /// Create a new state machine
    pub fn new(
        recognition: ContinuousRecognitionLoop,
        microphone: Arc<dyn Microphone>,
        pipeline: ConversationPipeline,
        playback: Arc<PlaybackEngine>,
        timings: TurnTimings,
        event_tx: broadcast::Sender<StateEvent>,
    ) -> Self {
        Self {
            state: ActivationState::Idle,
            activated: false,
            context: ConversationContext::empty(),
            recognition,
            microphone,
            pipeline,
            playback,
            timings,
            reset_at: None,
            recording: false,
            state_entered_at: None,
            event_tx,
        }
    }

    /// Get the current state
    pub fn state(&self) -> ActivationState {
        self.state
    }

    /// Whether the wake phrase can currently be heard
    pub fn is_recognition_running(&self) -> bool {
        self.recognition.is_running()
    }

    /// Arm recognition and process its events until the task is dropped
    pub async fn run(&mut self) {
        info!("state machine started");
        self.enter_idle();

        loop {
            self.step().await;
        }
    }

    /// Wait for the next recognition event or the pending reset
    async fn step(&mut self) {
        let reset_at = self.reset_at;
        tokio::select! {
            event = self.recognition.next_event() => {
                self.handle_recognition_event(event).await;
            }
            () = wait_until(reset_at) => {
                debug!("scheduled reset due");
                self.enter_idle();
            }
        }
    }

    /// Route one recognition event through the restart policy
    async fn handle_recognition_event(&mut self, event: RecognitionEvent) {
        match self.recognition.handle(event, self.activated) {
            LoopSignal::Ignored => {}
            LoopSignal::Activated { transcript } => {
                self.run_turn(transcript).await;
            }
            LoopSignal::RestartNow => self.enter_idle(),
            LoopSignal::RestartAfter(delay) => self.schedule_reset(delay),
            LoopSignal::AbortTurn => self.enter_idle(),
            LoopSignal::Fault { code, reset_after } => {
                self.publish_status(Status::RecognitionRetrying { code });
                self.schedule_reset(reset_after);
            }
        }
    }

    /// Run one full turn and always end in Idle
    async fn run_turn(&mut self, wake_transcript: String) {
        let started = Instant::now();
        self.activated = true;
        debug!(transcript = %wake_transcript, "turn started");

        match self.drive_turn().await {
            Ok(outcome) => {
                let duration_ms = started.elapsed().as_millis() as u64;
                info!(?outcome, duration_ms, "turn complete");
                self.emit(StateEvent::TurnComplete { duration_ms });
            }
            Err(e) => {
                warn!(error = %e, state = %self.state, "turn failed, returning to Idle");
                self.publish_status(status_for(&e));
                self.emit(StateEvent::TurnFailed {
                    error: e.to_string(),
                });
            }
        }

        self.enter_idle();
    }

    async fn drive_turn(&mut self) -> Result<TurnOutcome> {
        // The microphone belongs to the capture session from here on
        self.recognition.stop();
        self.transition_to(ActivationState::Listening);
        self.publish_status(Status::WakeDetected);

        let session =
            AudioCaptureSession::open(self.microphone.as_ref(), self.timings.max_recording).await?;
        self.recording = true;
        self.transition_to(ActivationState::Recording);
        self.publish_status(Status::Recording);

        let blob = session.wait().await;
        self.recording = false;
        let blob = blob.map_err(capture_failure)?;

        self.transition_to(ActivationState::Processing);
        self.publish_status(Status::Processing);

        match self.pipeline.run(blob, &self.context).await? {
            PipelineOutcome::Navigation(payload) => {
                self.emit(StateEvent::TranscriptReady {
                    text: payload.clone(),
                });
                self.emit(StateEvent::NavigationRequested { payload });
                self.publish_status(Status::NavigationSent);
                Ok(TurnOutcome::Navigated)
            }
            PipelineOutcome::Reply { query, reply } => {
                self.emit(StateEvent::TranscriptReady { text: query });
                self.context = reply.context;
                self.emit(StateEvent::ResponseReady { text: reply.text });

                let Some(audio_url) = reply.audio_url else {
                    return Ok(TurnOutcome::TextOnly);
                };

                self.transition_to(ActivationState::Speaking);
                self.publish_status(Status::Speaking);
                self.playback.play(&audio_url).await?;
                Ok(TurnOutcome::Spoke)
            }
        }
    }

    /// Idle re-entry: clear activation, re-arm recognition, clear transcript
    fn enter_idle(&mut self) {
        self.activated = false;
        self.recording = false;
        self.reset_at = None;

        if self.state != ActivationState::Idle {
            self.transition_to(ActivationState::Idle);
        }

        match self.recognition.start() {
            Ok(started) => {
                if started {
                    debug!(session = self.recognition.sessions(), "recognition armed");
                }
                self.publish_status(Status::WaitingForWakePhrase);
            }
            Err(e) => {
                warn!(error = %e, "recognition failed to start, retry scheduled");
                let code = RecognitionErrorKind::from(&e);
                self.publish_status(Status::RecognitionRetrying {
                    code: code.code().to_string(),
                });
                self.schedule_reset(self.recognition.policy().fault_reset);
            }
        }

        self.emit(StateEvent::TranscriptCleared);
    }

    fn schedule_reset(&mut self, delay: Duration) {
        debug!(delay_ms = delay.as_millis() as u64, "reset scheduled");
        self.reset_at = Some(Instant::now() + delay);
    }

    /// Perform a state transition
    fn transition_to(&mut self, new_state: ActivationState) {
        let old_state = self.state;
        let duration_ms = self
            .state_entered_at
            .map(|t| t.elapsed().as_millis() as u64)
            .unwrap_or(0);

        info!(
            from = %old_state,
            to = %new_state,
            duration_ms = duration_ms,
            "state transition"
        );

        self.state = new_state;
        self.state_entered_at = if new_state != ActivationState::Idle {
            Some(Instant::now())
        } else {
            None
        };

        debug_assert!(
            self.active_resources() <= 1,
            "more than one of recognition/recording/playback active"
        );

        self.emit(StateEvent::StateChanged {
            from: old_state,
            to: new_state,
        });
    }

    /// How many of {recognition, recording, playback} are live
    fn active_resources(&self) -> usize {
        [
            self.recognition.is_running(),
            self.recording,
            self.playback.is_active(),
        ]
        .into_iter()
        .filter(|active| *active)
        .count()
    }

    fn publish_status(&self, status: Status) {
        self.emit(StateEvent::Status(status));
    }

    fn emit(&self, event: StateEvent) {
        debug!(%event, "emitting event");
        let _ = self.event_tx.send(event);
    }
}

/// Status line shown for a failed turn
fn status_for(err: &VoiceError) -> Status {
    match err {
        VoiceError::PlaybackBlocked { url } => Status::ManualPlayRequired {
            audio_url: url.clone(),
        },
        VoiceError::InvalidResponse => Status::InvalidResponse,
        VoiceError::RecognitionFault(code) => Status::RecognitionRetrying { code: code.clone() },
        e if e.is_microphone() => Status::MicrophoneError,
        e if e.is_connection() => Status::ConnectionError,
        e => Status::Failed {
            reason: e.to_string(),
        },
    }
}

/// Anything that goes wrong while closing a recording is a device problem
fn capture_failure(err: VoiceError) -> VoiceError {
    if err.is_microphone() {
        err
    } else {
        VoiceError::DeviceUnavailable(err.to_string())
    }
}

/// Sleep until `deadline`, or forever when there is none
async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
