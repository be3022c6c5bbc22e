//! asistente-daemon: wake-phrase voice assistant
//!
//! This daemon listens continuously for the wake phrase and then runs one
//! conversational turn at a time:
//! - Bounded query recording from the default microphone
//! - Transcription and chat against the HTTP backend
//! - Spatialized playback of the spoken reply, with a plain fallback
//! - IPC for status queries, events and navigation commands
//!
//! Recognition heals itself: ended sessions restart, silence backs off and
//! faults reset after a delay.

mod backend;
mod capture;
mod config;
mod error;
mod events;
mod ipc;
mod lifecycle;
mod pipeline;
mod playback;
mod recognition;
mod state;
#[cfg(test)]
mod testing;

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::backend::{Backend, HttpBackend};
use crate::capture::{CpalMicrophone, Microphone};
use crate::config::Config;
use crate::events::StateEvent;
use crate::ipc::Server;
use crate::lifecycle::ShutdownSignal;
use crate::pipeline::ConversationPipeline;
use crate::playback::{AudioOutput, CommandPlayer, CpalOutput, PlaybackEngine};
use crate::recognition::{ContinuousRecognitionLoop, RestartPolicy, WindowedRecognizer};
use crate::state::{StateMachine, TurnTimings};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "asistente-daemon starting"
    );

    let config = Config::load()?;
    config.ensure_dirs()?;
    info!(
        ?config.socket_path,
        backend = %config.backend_url,
        wake_phrases = ?config.wake_phrases,
        "configuration loaded"
    );

    let shutdown = ShutdownSignal::new();

    // State machine -> IPC server and log mirror
    let (event_tx, _event_rx) = broadcast::channel::<StateEvent>(64);

    let backend: Arc<dyn Backend> = Arc::new(HttpBackend::new(&config.backend_url)?);
    let microphone: Arc<dyn Microphone> = Arc::new(CpalMicrophone);

    let recognizer = WindowedRecognizer::new(
        Arc::clone(&microphone),
        Arc::clone(&backend),
        config.recognizer.clone(),
    );
    let recognition = ContinuousRecognitionLoop::new(
        Box::new(recognizer),
        &config.wake_phrases,
        RestartPolicy {
            no_speech_backoff: config.no_speech_restart(),
            fault_reset: config.fault_reset(),
        },
    );

    let pipeline = ConversationPipeline::new(Arc::clone(&backend), &config.navigation_prefixes);
    let fallback = Arc::new(CommandPlayer::new(&config.fallback_player, &config.backend_url)?);
    let playback = Arc::new(PlaybackEngine::new(
        Arc::clone(&backend),
        fallback,
        Box::new(open_output),
    ));

    if let Some(url) = &config.welcome_audio_url {
        match playback.play(url).await {
            Ok(path) => info!(?path, "welcome greeting played"),
            Err(e) => warn!(error = %e, "welcome greeting could not be played"),
        }
    }

    let mut state_machine = StateMachine::new(
        recognition,
        microphone,
        pipeline,
        Arc::clone(&playback),
        TurnTimings {
            max_recording: config.max_recording(),
        },
        event_tx.clone(),
    );

    let server = Server::new(&config.socket_path, event_tx.clone())?;
    let mut ipc_event_rx = event_tx.subscribe();
    let server_for_events = &server;

    info!("daemon initialized, entering main loop");

    tokio::select! {
        _ = state_machine.run() => {
            info!("state machine exited");
        }

        result = server.run() => {
            if let Err(e) = result {
                error!(?e, "IPC server error");
            }
        }

        // Keep the IPC status snapshot in step with the state machine
        _ = async {
            loop {
                match ipc_event_rx.recv().await {
                    Ok(event) => {
                        info!(%event, "state event");
                        server_for_events.observe(&event).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "state event receiver lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        break;
                    }
                }
            }
        } => {
            info!("state event handler exited");
        }

        _ = shutdown.wait() => {
            info!("shutdown signal received");
        }
    }

    info!(
        state = %state_machine.state(),
        recognition_running = state_machine.is_recognition_running(),
        "shutting down..."
    );

    server.shutdown().await;
    drop(state_machine);

    info!("asistente-daemon stopped");

    Ok(())
}

/// The shared spatial output, opened on first playback
fn open_output() -> error::Result<Arc<dyn AudioOutput>> {
    Ok(Arc::new(CpalOutput::open()?))
}
