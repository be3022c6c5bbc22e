//! Playback engine with spatial path and plain fallback

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::fallback::FallbackPlayer;
use super::output::{AudioOutput, OutputState};
use super::spatial::{decode, spatialize, SpatialProfile};
use crate::backend::Backend;
use crate::error::{Result, VoiceError};

/// Builds the shared output on first use
pub type OutputFactory = Box<dyn Fn() -> Result<Arc<dyn AudioOutput>> + Send + Sync>;

/// Which path ended up playing the reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackPath {
    Spatial,
    Fallback,
}

pub struct PlaybackEngine {
    backend: Arc<dyn Backend>,
    fallback: Arc<dyn FallbackPlayer>,
    open_output: OutputFactory,
    output: OnceCell<Arc<dyn AudioOutput>>,
    profile: SpatialProfile,
    active: AtomicBool,
}

/// Clears the active flag however `play` exits
struct ActiveGuard<'a>(&'a AtomicBool);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl PlaybackEngine {
    pub fn new(
        backend: Arc<dyn Backend>,
        fallback: Arc<dyn FallbackPlayer>,
        open_output: OutputFactory,
    ) -> Self {
        Self {
            backend,
            fallback,
            open_output,
            output: OnceCell::new(),
            profile: SpatialProfile::default(),
            active: AtomicBool::new(false),
        }
    }

    /// Whether a reply is playing
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Play `audio_url`, spatially if possible.
    ///
    /// Only a failure of the plain fallback is an error, and it is always
    /// `PlaybackBlocked`.
    pub async fn play(&self, audio_url: &str) -> Result<PlaybackPath> {
        self.active.store(true, Ordering::SeqCst);
        let _guard = ActiveGuard(&self.active);

        match self.play_spatial(audio_url).await {
            Ok(()) => {
                info!(audio_url, "reply played");
                return Ok(PlaybackPath::Spatial);
            }
            Err(e) => {
                warn!(error = %e, audio_url, "spatial playback failed, using plain player");
            }
        }

        match self.fallback.play(audio_url).await {
            Ok(()) => {
                info!(audio_url, "reply played without spatialization");
                Ok(PlaybackPath::Fallback)
            }
            Err(e) => {
                warn!(error = %e, audio_url, "plain playback failed");
                Err(VoiceError::PlaybackBlocked {
                    url: audio_url.to_string(),
                })
            }
        }
    }

    async fn play_spatial(&self, audio_url: &str) -> Result<()> {
        let output = self.output().await?;
        if output.state() != OutputState::Running {
            output.resume().await?;
        }

        let bytes = self.backend.fetch_audio(audio_url).await?;
        let audio = decode(&bytes)?;
        debug!(
            samples = audio.samples.len(),
            sample_rate = audio.sample_rate,
            "reply decoded"
        );

        let frames = spatialize(&audio, &self.profile);
        output.render(frames, audio.sample_rate).await
    }

    async fn output(&self) -> Result<&Arc<dyn AudioOutput>> {
        self.output
            .get_or_try_init(|| async { (self.open_output)() })
            .await
    }
}
