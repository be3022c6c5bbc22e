//! Backend collaborator: transcription, chat and response audio
//!
//! The HTTP implementation lives in `http`; everything else talks to the
//! `Backend` trait so turns can be driven without a server.

mod http;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::capture::AudioBlob;
use crate::error::Result;

pub use http::HttpBackend;

/// Parse the backend base URL so relative paths join under it
pub fn base_url(raw: &str) -> std::result::Result<Url, url::ParseError> {
    let mut url = Url::parse(raw)?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

/// Opaque conversation state issued by the chat backend.
///
/// The daemon never inspects or merges it; each successful reply replaces
/// it wholesale and the next request sends it back unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationContext(Option<serde_json::Value>);

impl ConversationContext {
    pub fn empty() -> Self {
        Self(None)
    }

    /// Wrap a server value; `null` counts as no context
    pub fn from_value(value: Option<serde_json::Value>) -> Self {
        match value {
            Some(serde_json::Value::Null) | None => Self(None),
            Some(value) => Self(Some(value)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }

    pub fn as_value(&self) -> Option<&serde_json::Value> {
        self.0.as_ref()
    }
}

/// `/transcribe` reply
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct QueryResult {
    pub text: String,
}

/// `/chat` reply as received; every field may be missing
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatReply {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub audio_url: Option<String>,
    #[serde(default)]
    pub context: Option<serde_json::Value>,
}

/// `/chat` request body
#[derive(Debug, Serialize)]
pub(crate) struct ChatRequest<'a> {
    pub query: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<&'a serde_json::Value>,
}

/// Remote speech-to-text, chat and audio hosting
#[async_trait]
pub trait Backend: Send + Sync {
    /// Transcribe one recording. Non-success is `TranscriptionFailed`.
    async fn transcribe(&self, audio: AudioBlob) -> Result<QueryResult>;

    /// Send a query with the current context. Non-success is `ChatFailed`.
    async fn chat(&self, query: &str, context: &ConversationContext) -> Result<ChatReply>;

    /// Download a response audio resource
    async fn fetch_audio(&self, audio_url: &str) -> Result<Vec<u8>>;
}
