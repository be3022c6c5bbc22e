//! reqwest client for the backend HTTP interface

use anyhow::Context;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use tracing::{debug, info, warn};
use url::Url;

use super::{Backend, ChatReply, ChatRequest, ConversationContext, QueryResult};
use crate::capture::AudioBlob;
use crate::error::{Result, VoiceError};

/// Multipart file name the backend expects for uploads
const UPLOAD_FILE_NAME: &str = "recording.mp3";

/// MIME type declared on uploads
const UPLOAD_MIME: &str = "audio/mp3";

/// Talks to `/transcribe`, `/chat` and the audio URLs they hand out
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: Url,
    transcribe_url: Url,
    chat_url: Url,
}

impl HttpBackend {
    /// Create a client rooted at `base_url`
    pub fn new(base_url: &str) -> anyhow::Result<Self> {
        let base_url = super::base_url(base_url)
            .with_context(|| format!("invalid backend url {base_url}"))?;

        Ok(Self {
            client: reqwest::Client::new(),
            transcribe_url: base_url.join("transcribe")?,
            chat_url: base_url.join("chat")?,
            base_url,
        })
    }

    /// Resolve an `audio_url` that may be relative to the backend
    pub fn resolve(&self, audio_url: &str) -> Result<Url> {
        self.base_url.join(audio_url).map_err(|e| {
            VoiceError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("bad audio url {audio_url}: {e}"),
            ))
        })
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn transcribe(&self, audio: AudioBlob) -> Result<QueryResult> {
        debug!(
            audio_bytes = audio.len(),
            captured_mime = %audio.mime_type,
            "starting transcription"
        );

        let part = Part::bytes(audio.bytes)
            .file_name(UPLOAD_FILE_NAME)
            .mime_str(UPLOAD_MIME)?;
        let form = Form::new().part("audio", part);

        let response = self
            .client
            .post(self.transcribe_url.clone())
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, body = %body, "transcription rejected");
            return Err(VoiceError::TranscriptionFailed(status.as_u16()));
        }

        let result: QueryResult = response.json().await?;
        info!(transcript = %result.text, "transcription complete");
        Ok(result)
    }

    async fn chat(&self, query: &str, context: &ConversationContext) -> Result<ChatReply> {
        let body = ChatRequest {
            query,
            context: context.as_value(),
        };

        let response = self
            .client
            .post(self.chat_url.clone())
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, body = %body, "chat rejected");
            return Err(VoiceError::ChatFailed(status.as_u16()));
        }

        let reply: ChatReply = response.json().await?;
        debug!(
            has_text = reply.text.is_some(),
            has_audio = reply.audio_url.is_some(),
            has_context = reply.context.is_some(),
            "chat reply received"
        );
        Ok(reply)
    }

    async fn fetch_audio(&self, audio_url: &str) -> Result<Vec<u8>> {
        let url = self.resolve(audio_url)?;
        let response = self.client.get(url).send().await?.error_for_status()?;
        let bytes = response.bytes().await?;
        debug!(bytes = bytes.len(), audio_url, "response audio fetched");
        Ok(bytes.to_vec())
    }
}
