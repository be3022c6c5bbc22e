//! Conversation pipeline
//!
//! Turns one recording into either a navigation command or a chat reply.
//! Steps run strictly in order and nothing is retried here; recovery is the
//! state machine's job.

use std::sync::Arc;

use tracing::{debug, info};

use crate::backend::{Backend, ConversationContext};
use crate::capture::AudioBlob;
use crate::error::{Result, VoiceError};

/// A successful chat turn
#[derive(Debug, Clone, PartialEq)]
pub struct ChatResult {
    pub text: String,
    pub audio_url: Option<String>,
    /// Replaces the caller's stored context
    pub context: ConversationContext,
}

/// What a pipeline run produced
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOutcome {
    /// The transcript was a navigation command; payload is the raw text
    Navigation(String),
    /// The transcript went to chat
    Reply { query: String, reply: ChatResult },
}

pub struct ConversationPipeline {
    backend: Arc<dyn Backend>,
    navigation_prefixes: Vec<String>,
}

impl ConversationPipeline {
    pub fn new(backend: Arc<dyn Backend>, navigation_prefixes: &[String]) -> Self {
        let navigation_prefixes = navigation_prefixes
            .iter()
            .map(|p| p.trim().to_lowercase())
            .filter(|p| !p.is_empty())
            .collect();

        Self {
            backend,
            navigation_prefixes,
        }
    }

    /// Case-insensitive prefix match against the navigation commands
    pub fn is_navigation(&self, transcript: &str) -> bool {
        let normalized = transcript.trim().to_lowercase();
        self.navigation_prefixes
            .iter()
            .any(|prefix| normalized.starts_with(prefix.as_str()))
    }

    /// Transcribe `blob`, then either route it to navigation or to chat
    pub async fn run(&self, blob: AudioBlob, context: &ConversationContext) -> Result<PipelineOutcome> {
        let query = self.backend.transcribe(blob).await?;

        if self.is_navigation(&query.text) {
            info!(payload = %query.text, "navigation command detected");
            return Ok(PipelineOutcome::Navigation(query.text));
        }

        debug!(has_context = !context.is_empty(), "sending chat query");
        let reply = self.backend.chat(&query.text, context).await?;

        if reply.text.is_none() && reply.audio_url.is_none() {
            return Err(VoiceError::InvalidResponse);
        }

        Ok(PipelineOutcome::Reply {
            query: query.text,
            reply: ChatResult {
                text: reply.text.unwrap_or_default(),
                audio_url: reply.audio_url.filter(|url| !url.is_empty()),
                context: ConversationContext::from_value(reply.context),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ChatReply;
    use crate::testing::{blob, FakeBackend};
    use serde_json::json;

    fn pipeline(backend: &Arc<FakeBackend>) -> ConversationPipeline {
        let prefixes = vec!["Llévame a".to_string(), "llevame a".to_string()];
        ConversationPipeline::new(backend.clone(), &prefixes)
    }

    #[tokio::test]
    async fn test_navigation_never_reaches_chat() {
        let backend = Arc::new(FakeBackend::new().transcript("llévame a la sala reunión"));
        let outcome = pipeline(&backend)
            .run(blob(), &ConversationContext::empty())
            .await
            .unwrap();

        assert_eq!(
            outcome,
            PipelineOutcome::Navigation("llévame a la sala reunión".to_string())
        );
        assert!(backend.chat_calls().is_empty());
    }

    #[tokio::test]
    async fn test_navigation_prefix_is_case_insensitive() {
        let backend = Arc::new(FakeBackend::new());
        let pipeline = pipeline(&backend);

        assert!(pipeline.is_navigation("LLÉVAME A la sala 1"));
        assert!(pipeline.is_navigation("  llevame a la entrada"));
        assert!(!pipeline.is_navigation("quiero que me lleves a la sala 1"));
    }

    #[tokio::test]
    async fn test_chat_reply_with_context() {
        let backend = Arc::new(FakeBackend::new().transcript("¿quién eres?").reply(ChatReply {
            text: Some("Soy el asistente del museo".to_string()),
            audio_url: Some("/static/audio_responses/a.mp3".to_string()),
            context: Some(json!({ "turn": 1 })),
        }));

        let previous = ConversationContext::from_value(Some(json!({ "turn": 0 })));
        let outcome = pipeline(&backend).run(blob(), &previous).await.unwrap();

        let PipelineOutcome::Reply { query, reply } = outcome else {
            panic!("expected chat reply");
        };
        assert_eq!(query, "¿quién eres?");
        assert_eq!(reply.audio_url.as_deref(), Some("/static/audio_responses/a.mp3"));
        assert_eq!(reply.context.as_value(), Some(&json!({ "turn": 1 })));
        assert_eq!(backend.chat_calls(), vec![("¿quién eres?".to_string(), previous)]);
    }

    #[tokio::test]
    async fn test_missing_context_is_success() {
        let backend = Arc::new(FakeBackend::new().transcript("hola").reply(ChatReply {
            text: Some("Hola".to_string()),
            audio_url: Some("/a.mp3".to_string()),
            context: None,
        }));

        let outcome = pipeline(&backend)
            .run(blob(), &ConversationContext::empty())
            .await
            .unwrap();
        let PipelineOutcome::Reply { reply, .. } = outcome else {
            panic!("expected chat reply");
        };
        assert!(reply.context.is_empty());
    }

    #[tokio::test]
    async fn test_reply_without_text_or_audio_is_invalid() {
        let backend = Arc::new(FakeBackend::new().transcript("hola").reply(ChatReply::default()));
        let result = pipeline(&backend).run(blob(), &ConversationContext::empty()).await;

        assert!(matches!(result, Err(VoiceError::InvalidResponse)));
    }

    #[tokio::test]
    async fn test_chat_failure_carries_status() {
        let backend = Arc::new(FakeBackend::new().transcript("hola").chat_status(500));
        let result = pipeline(&backend).run(blob(), &ConversationContext::empty()).await;

        assert!(matches!(result, Err(VoiceError::ChatFailed(500))));
    }

    #[tokio::test]
    async fn test_transcription_failure_skips_chat() {
        let backend = Arc::new(FakeBackend::new().transcribe_status(502));
        let result = pipeline(&backend).run(blob(), &ConversationContext::empty()).await;

        assert!(matches!(result, Err(VoiceError::TranscriptionFailed(502))));
        assert!(backend.chat_calls().is_empty());
    }
}
