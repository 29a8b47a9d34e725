//! The external services a session depends on, injected as trait objects.

use std::sync::Arc;

use tracing::warn;

use parley_backend::{AiBackend, WebhookBackend};
use parley_core::config::Config;
use parley_core::error::{ParleyError, Result};
use parley_core::types::{CollaboratorStatus, HealthSnapshot};
use parley_media::{MediaTransport, SpeechToText, TextToSpeech, stt, tts};

/// Collaborators shared read-only by every session.
///
/// Speech and AI providers are optional so a gateway can start and report
/// them as missing; creating a session requires all of them.
#[derive(Clone)]
pub struct Collaborators {
    pub transport: Arc<dyn MediaTransport>,
    pub stt: Option<Arc<dyn SpeechToText>>,
    pub tts: Option<Arc<dyn TextToSpeech>>,
    pub ai: Option<Arc<dyn AiBackend>>,
}

/// Collaborators guaranteed present, handed to a new session.
#[derive(Clone)]
pub struct ReadyCollaborators {
    pub transport: Arc<dyn MediaTransport>,
    pub stt: Arc<dyn SpeechToText>,
    pub tts: Arc<dyn TextToSpeech>,
    pub ai: Arc<dyn AiBackend>,
}

impl Collaborators {
    pub fn new(transport: Arc<dyn MediaTransport>) -> Self {
        Self {
            transport,
            stt: None,
            tts: None,
            ai: None,
        }
    }

    pub fn with_stt(mut self, stt: Arc<dyn SpeechToText>) -> Self {
        self.stt = Some(stt);
        self
    }

    pub fn with_tts(mut self, tts: Arc<dyn TextToSpeech>) -> Self {
        self.tts = Some(tts);
        self
    }

    pub fn with_ai(mut self, ai: Arc<dyn AiBackend>) -> Self {
        self.ai = Some(ai);
        self
    }

    /// Build every provider the config describes. Providers that cannot be
    /// built are logged and left missing.
    pub fn from_config(config: &Config, transport: Arc<dyn MediaTransport>) -> Self {
        let mut collaborators = Self::new(transport);

        match config.transcription.as_ref().map(stt::from_config) {
            Some(Ok(provider)) => collaborators.stt = Some(provider),
            Some(Err(e)) => warn!(error = %e, "Speech-to-text unavailable"),
            None => warn!("Speech-to-text is not configured"),
        }

        match config.tts.as_ref().map(tts::from_config) {
            Some(Ok(provider)) => collaborators.tts = Some(provider),
            Some(Err(e)) => warn!(error = %e, "Text-to-speech unavailable"),
            None => warn!("Text-to-speech is not configured"),
        }

        match config.webhook.as_ref().map(WebhookBackend::from_config) {
            Some(Ok(backend)) => collaborators.ai = Some(Arc::new(backend)),
            Some(Err(e)) => warn!(error = %e, "AI backend unavailable"),
            None => warn!("AI webhook is not configured"),
        }

        collaborators
    }

    /// Names of collaborators that are not configured.
    pub fn missing(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.stt.is_none() {
            missing.push("speech_to_text");
        }
        if self.tts.is_none() {
            missing.push("text_to_speech");
        }
        if self.ai.is_none() {
            missing.push("ai_backend");
        }
        missing
    }

    /// Every collaborator, or a `Config` error naming the absent ones.
    pub fn require(&self) -> Result<ReadyCollaborators> {
        match (&self.stt, &self.tts, &self.ai) {
            (Some(stt), Some(tts), Some(ai)) => Ok(ReadyCollaborators {
                transport: self.transport.clone(),
                stt: stt.clone(),
                tts: tts.clone(),
                ai: ai.clone(),
            }),
            _ => Err(ParleyError::Config(format!(
                "missing collaborators: {}",
                self.missing().join(", ")
            ))),
        }
    }

    pub fn health(&self, active_sessions: usize) -> HealthSnapshot {
        HealthSnapshot {
            speech_to_text: CollaboratorStatus::from_present(self.stt.is_some()),
            text_to_speech: CollaboratorStatus::from_present(self.tts.is_some()),
            ai_backend: CollaboratorStatus::from_present(self.ai.is_some()),
            media_transport: CollaboratorStatus::Configured,
            active_sessions,
        }
    }
}
