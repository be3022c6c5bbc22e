//! Supervised restart policy for the continuous recognizer
//!
//! Whether a session is running is tracked here with an explicit flag;
//! the recognizer is never asked about its own state.

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use super::event::{RecognitionErrorKind, RecognitionEvent, SpeechRecognizer};
use crate::error::Result;

/// Queued events per session
const EVENT_BUFFER: usize = 32;

/// Fixed delays applied after faults
#[derive(Debug, Clone, Copy)]
pub struct RestartPolicy {
    /// Wait before re-arming after `no-speech` while idle
    pub no_speech_backoff: Duration,
    /// Wait before resetting after any other fault
    pub fault_reset: Duration,
}

/// What the orchestrator should do after a recognition event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopSignal {
    /// Nothing to do
    Ignored,
    /// A final transcript contained the wake phrase
    Activated { transcript: String },
    /// The session ended while idle; start again now
    RestartNow,
    /// Start again after the given delay
    RestartAfter(Duration),
    /// The active turn lost its footing; force Idle
    AbortTurn,
    /// Surface `code` and reset after the delay
    Fault { code: String, reset_after: Duration },
}

pub struct ContinuousRecognitionLoop {
    recognizer: Box<dyn SpeechRecognizer>,
    wake_phrases: Vec<String>,
    policy: RestartPolicy,
    running: bool,
    events: Option<mpsc::Receiver<RecognitionEvent>>,
    sessions: u64,
}

impl ContinuousRecognitionLoop {
    pub fn new(
        recognizer: Box<dyn SpeechRecognizer>,
        wake_phrases: &[String],
        policy: RestartPolicy,
    ) -> Self {
        let wake_phrases = wake_phrases
            .iter()
            .map(|w| w.trim().to_lowercase())
            .filter(|w| !w.is_empty())
            .collect();

        Self {
            recognizer,
            wake_phrases,
            policy,
            running: false,
            events: None,
            sessions: 0,
        }
    }

    /// Start a session. Returns `false` when one is already running.
    pub fn start(&mut self) -> Result<bool> {
        if self.running {
            debug!("recognition already running, start dropped");
            return Ok(false);
        }

        // A fresh channel per session keeps stale events from a stopped
        // session out of the new one
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        self.recognizer.start(tx)?;

        self.events = Some(rx);
        self.running = true;
        self.sessions += 1;
        info!(session = self.sessions, "recognition started");
        Ok(true)
    }

    /// Halt the session and drop anything it still had queued
    pub fn stop(&mut self) {
        if self.running {
            info!(session = self.sessions, "recognition stopped");
        }
        self.recognizer.stop();
        self.running = false;
        self.events = None;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn policy(&self) -> RestartPolicy {
        self.policy
    }

    /// Number of sessions started so far
    pub fn sessions(&self) -> u64 {
        self.sessions
    }

    /// Next event of the current session; pends forever when stopped
    pub async fn next_event(&mut self) -> RecognitionEvent {
        let Some(events) = self.events.as_mut() else {
            return std::future::pending().await;
        };

        match events.recv().await {
            Some(event) => event,
            None => {
                // Recognizer went away without saying so
                self.events = None;
                RecognitionEvent::Ended
            }
        }
    }

    /// Apply the restart policy to one event
    pub fn handle(&mut self, event: RecognitionEvent, activated: bool) -> LoopSignal {
        match event {
            RecognitionEvent::Partial(text) => {
                trace!(partial = %text, "partial transcript");
                LoopSignal::Ignored
            }
            RecognitionEvent::Final(text) => {
                if activated {
                    debug!(transcript = %text, "final transcript during turn ignored");
                    LoopSignal::Ignored
                } else if self.matches_wake_phrase(&text) {
                    info!(transcript = %text, "wake phrase detected");
                    LoopSignal::Activated { transcript: text }
                } else {
                    debug!(transcript = %text, "no wake phrase");
                    LoopSignal::Ignored
                }
            }
            RecognitionEvent::Ended => {
                self.stop();
                if activated {
                    LoopSignal::Ignored
                } else {
                    debug!("recognition session ended, restarting");
                    LoopSignal::RestartNow
                }
            }
            RecognitionEvent::Error(RecognitionErrorKind::NoSpeech) => {
                self.stop();
                if activated {
                    warn!("no speech during turn, aborting");
                    LoopSignal::AbortTurn
                } else {
                    debug!(
                        backoff_ms = self.policy.no_speech_backoff.as_millis() as u64,
                        "no speech, re-arming after backoff"
                    );
                    LoopSignal::RestartAfter(self.policy.no_speech_backoff)
                }
            }
            RecognitionEvent::Error(kind) => {
                self.stop();
                warn!(code = %kind, "recognition fault, reset scheduled");
                LoopSignal::Fault {
                    code: kind.code().to_string(),
                    reset_after: self.policy.fault_reset,
                }
            }
        }
    }

    fn matches_wake_phrase(&self, transcript: &str) -> bool {
        let normalized = transcript.to_lowercase();
        self.wake_phrases
            .iter()
            .any(|phrase| normalized.contains(phrase.as_str()))
    }
}
