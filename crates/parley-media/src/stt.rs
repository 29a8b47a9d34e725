//! Speech-to-Text Gateway — turns a captured utterance into text.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use parley_core::config::TranscriptionConfig;
use parley_core::error::{ParleyError, Result};

use crate::audio::AudioBuffer;

/// A speech recognition provider.
#[async_trait]
pub trait SpeechToText: Send + Sync {
    /// Provider identifier (e.g., "deepgram", "groq").
    fn id(&self) -> &str;

    /// Transcribe a bounded audio buffer. An empty string means nothing was recognised.
    async fn transcribe(&self, audio: &AudioBuffer, language: Option<&str>) -> Result<String>;
}

/// Build the configured speech-to-text provider.
pub fn from_config(config: &TranscriptionConfig) -> Result<Arc<dyn SpeechToText>> {
    let api_key = config.resolve_api_key().ok_or_else(|| {
        ParleyError::Config(format!(
            "No API key configured for speech-to-text provider '{}'",
            config.provider
        ))
    })?;
    let timeout = Duration::from_millis(config.timeout_ms());

    match config.provider.as_str() {
        "deepgram" => Ok(Arc::new(DeepgramStt::new(
            api_key,
            config.model.clone(),
            timeout,
        ))),
        "groq" | "openai" => Ok(Arc::new(WhisperStt::new(
            config.provider.clone(),
            api_key,
            config.model.clone(),
            timeout,
        ))),
        other => Err(ParleyError::Config(format!(
            "Unknown speech-to-text provider '{other}'"
        ))),
    }
}

/// Get the Whisper-compatible transcription URL for a given provider.
pub fn whisper_url(provider: &str) -> &'static str {
    match provider {
        "openai" => "https://api.openai.com/v1/audio/transcriptions",
        _ => "https://api.groq.com/openai/v1/audio/transcriptions",
    }
}

/// Map a reqwest failure onto the error taxonomy.
pub(crate) fn classify_reqwest(
    collaborator: &'static str,
    timeout: Duration,
    err: reqwest::Error,
) -> ParleyError {
    if err.is_timeout() {
        ParleyError::Timeout {
            collaborator,
            after_ms: timeout.as_millis() as u64,
        }
    } else {
        ParleyError::Service(format!("{collaborator} request failed: {err}"))
    }
}

/// Whisper-compatible multipart transcription (Groq, OpenAI).
pub struct WhisperStt {
    provider: String,
    api_key: String,
    model: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl WhisperStt {
    pub fn new(provider: String, api_key: String, model: Option<String>, timeout: Duration) -> Self {
        Self {
            provider,
            api_key,
            model: model.unwrap_or_else(|| "whisper-large-v3-turbo".to_string()),
            timeout,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl SpeechToText for WhisperStt {
    fn id(&self) -> &str {
        &self.provider
    }

    async fn transcribe(&self, audio: &AudioBuffer, language: Option<&str>) -> Result<String> {
        let wav_data = audio.to_wav();
        let url = whisper_url(&self.provider);

        debug!(url, model = %self.model, wav_bytes = wav_data.len(), "Sending audio for transcription");

        let part = reqwest::multipart::Part::bytes(wav_data)
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .map_err(|e| ParleyError::Service(e.to_string()))?;

        let mut form = reqwest::multipart::Form::new()
            .text("model", self.model.clone())
            .text("response_format", "text")
            .part("file", part);
        if let Some(lang) = language {
            // Whisper wants ISO-639-1 ("en"), not a locale ("en-US")
            let iso = lang.split(['-', '_']).next().unwrap_or(lang);
            form = form.text("language", iso.to_string());
        }

        let resp = self
            .client
            .post(url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .multipart(form)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| classify_reqwest("speech_to_text", self.timeout, e))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(ParleyError::Service(format!(
                "Transcription API error {status}: {body}"
            )));
        }

        let text = resp
            .text()
            .await
            .map_err(|e| classify_reqwest("speech_to_text", self.timeout, e))?;
        Ok(text.trim().to_string())
    }
}

/// Deepgram pre-recorded transcription (`/v1/listen`).
pub struct DeepgramStt {
    api_key: String,
    model: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl DeepgramStt {
    pub fn new(api_key: String, model: Option<String>, timeout: Duration) -> Self {
        Self {
            api_key,
            model: model.unwrap_or_else(|| "nova-2".to_string()),
            timeout,
            client: reqwest::Client::new(),
        }
    }

    pub fn listen_url(&self, language: Option<&str>) -> String {
        let mut url = format!(
            "https://api.deepgram.com/v1/listen?model={}&smart_format=true",
            self.model
        );
        if let Some(lang) = language {
            url.push_str("&language=");
            url.push_str(lang);
        }
        url
    }
}

/// Pull the best transcript out of a Deepgram response body.
pub fn deepgram_transcript(body: &serde_json::Value) -> Option<String> {
    body.pointer("/results/channels/0/alternatives/0/transcript")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
}

#[async_trait]
impl SpeechToText for DeepgramStt {
    fn id(&self) -> &str {
        "deepgram"
    }

    async fn transcribe(&self, audio: &AudioBuffer, language: Option<&str>) -> Result<String> {
        let url = self.listen_url(language);
        let wav_data = audio.to_wav();

        debug!(model = %self.model, wav_bytes = wav_data.len(), "Sending audio to Deepgram");

        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("Token {}", self.api_key))
            .header("Content-Type", "audio/wav")
            .body(wav_data)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| classify_reqwest("speech_to_text", self.timeout, e))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(ParleyError::Service(format!(
                "Deepgram API error {status}: {body}"
            )));
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ParleyError::Service(format!("Deepgram returned invalid JSON: {e}")))?;

        deepgram_transcript(&body).ok_or_else(|| {
            ParleyError::Service("Deepgram response has no transcript".to_string())
        })
    }
}
