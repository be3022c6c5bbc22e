//! Plain playback through an external player

use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, warn};
use url::Url;

use crate::backend;
use crate::error::{Result, VoiceError};

/// Non-spatial player that takes the reply URL as-is
#[async_trait]
pub trait FallbackPlayer: Send + Sync {
    /// Play `audio_url` to the end
    async fn play(&self, audio_url: &str) -> Result<()>;
}

/// Runs a configured media player command with the resolved URL appended
pub struct CommandPlayer {
    program: String,
    args: Vec<String>,
    base_url: Url,
}

impl CommandPlayer {
    pub fn new(command: &[String], backend_url: &str) -> anyhow::Result<Self> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| anyhow::anyhow!("fallback player command is empty"))?;

        let base_url = backend::base_url(backend_url)?;

        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            base_url,
        })
    }

    fn resolve(&self, audio_url: &str) -> Result<Url> {
        self.base_url.join(audio_url).map_err(|_| VoiceError::PlaybackBlocked {
            url: audio_url.to_string(),
        })
    }
}

#[async_trait]
impl FallbackPlayer for CommandPlayer {
    async fn play(&self, audio_url: &str) -> Result<()> {
        let url = self.resolve(audio_url)?;
        debug!(program = %self.program, url = %url, "plain playback");

        let status = Command::new(&self.program)
            .args(&self.args)
            .arg(url.as_str())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await?;

        if !status.success() {
            warn!(program = %self.program, ?status, "plain player refused playback");
            return Err(VoiceError::PlaybackBlocked {
                url: audio_url.to_string(),
            });
        }
        Ok(())
    }
}
