//! Configuration loading and management
//!
//! Defaults are overlaid by `config.toml` in the data directory (when it
//! exists) and then by `ASISTENTE_*` environment variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

/// Daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path to the Unix domain socket for IPC
    pub socket_path: PathBuf,

    /// Directory for runtime data
    pub data_dir: PathBuf,

    /// Base URL of the transcription/chat backend
    pub backend_url: String,

    /// Phrases that start a turn when heard in a final transcript
    pub wake_phrases: Vec<String>,

    /// Transcript prefixes routed to the navigation side channel
    pub navigation_prefixes: Vec<String>,

    /// Upper bound for one recorded query
    pub max_recording_ms: u64,

    /// Delay before re-arming after `no-speech` while idle
    pub no_speech_restart_ms: u64,

    /// Delay before resetting after any other recognition fault
    pub fault_reset_ms: u64,

    /// Continuous recognizer settings
    pub recognizer: RecognizerConfig,

    /// Command used for plain (non-spatial) playback; the URL is appended
    pub fallback_player: Vec<String>,

    /// Greeting played once at startup
    pub welcome_audio_url: Option<String>,
}

/// Settings for the windowed continuous recognizer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognizerConfig {
    /// Length of each captured window
    pub window_ms: u64,
    /// A session ends after this long and must be restarted
    pub session_ms: u64,
    /// RMS level below which a window counts as silence
    pub silence_threshold: f32,
    /// Consecutive silent windows that raise `no-speech`
    pub silent_windows: u32,
}

impl Default for RecognizerConfig {
    fn default() -> Self {
        Self {
            window_ms: 3000,
            session_ms: 60_000,
            silence_threshold: 0.01,
            silent_windows: 3,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = default_data_dir();
        Self {
            socket_path: data_dir.join("daemon.sock"),
            data_dir,
            backend_url: "http://127.0.0.1:5000".to_string(),
            wake_phrases: vec!["hey asistente".to_string()],
            navigation_prefixes: vec![
                "llévame a".to_string(),
                "llevame a".to_string(),
                "llévanos a".to_string(),
                "llevanos a".to_string(),
            ],
            max_recording_ms: 5000,
            no_speech_restart_ms: 500,
            fault_reset_ms: 2000,
            recognizer: RecognizerConfig::default(),
            fallback_player: vec![
                "mpv".to_string(),
                "--no-video".to_string(),
                "--really-quiet".to_string(),
            ],
            welcome_audio_url: None,
        }
    }
}

/// `$HOME/.local/share/asistente`, or a relative directory without HOME
fn default_data_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home)
        .join(".local")
        .join("share")
        .join("asistente")
}

impl Config {
    /// Load configuration from defaults, the config file and environment
    pub fn load() -> Result<Self> {
        std::env::var("HOME").context("HOME is not set")?;

        let config_file = default_data_dir().join("config.toml");
        let mut config = if config_file.exists() {
            Self::from_file(&config_file)?
        } else {
            Self::default()
        };

        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML config file; missing fields take their defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))
    }

    /// Apply `ASISTENTE_*` overrides from the given lookup
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("ASISTENTE_BACKEND_URL") {
            self.backend_url = url;
        }
        if let Some(phrase) = lookup("ASISTENTE_WAKE_PHRASE") {
            self.wake_phrases = vec![phrase];
        }
        if let Some(socket) = lookup("ASISTENTE_SOCKET") {
            self.socket_path = PathBuf::from(socket);
        }
    }

    /// Reject settings the state machine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.wake_phrases.iter().all(|p| p.trim().is_empty()) {
            bail!("at least one non-empty wake phrase is required");
        }
        let durations = [
            ("max_recording_ms", self.max_recording_ms),
            ("no_speech_restart_ms", self.no_speech_restart_ms),
            ("fault_reset_ms", self.fault_reset_ms),
            ("recognizer.window_ms", self.recognizer.window_ms),
            ("recognizer.session_ms", self.recognizer.session_ms),
        ];
        if let Some((name, _)) = durations.into_iter().find(|&(_, ms)| ms == 0) {
            bail!("{name} must be greater than zero");
        }
        if self.recognizer.silent_windows == 0 {
            bail!("recognizer.silent_windows must be at least 1");
        }
        if self.fallback_player.is_empty() {
            bail!("fallback_player command must not be empty");
        }
        Ok(())
    }

    /// Ensure data directory exists
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        Ok(())
    }

    pub fn max_recording(&self) -> Duration {
        Duration::from_millis(self.max_recording_ms)
    }

    pub fn no_speech_restart(&self) -> Duration {
        Duration::from_millis(self.no_speech_restart_ms)
    }

    pub fn fault_reset(&self) -> Duration {
        Duration::from_millis(self.fault_reset_ms)
    }
}
