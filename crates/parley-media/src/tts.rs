//! Text-to-Speech Gateway — turns reply text into PCM audio.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tracing::debug;

use parley_core::config::TtsConfig;
use parley_core::error::{ParleyError, Result};

use crate::audio::{AudioBuffer, SAMPLE_RATE};
use crate::stt::classify_reqwest;

/// A speech synthesis provider.
#[async_trait]
pub trait TextToSpeech: Send + Sync {
    fn id(&self) -> &str;

    /// Synthesize `text` with the given voice into 16kHz mono PCM.
    async fn synthesize(&self, text: &str, voice_id: &str) -> Result<AudioBuffer>;
}

/// Build the configured text-to-speech provider.
pub fn from_config(config: &TtsConfig) -> Result<Arc<dyn TextToSpeech>> {
    let api_key = config.resolve_api_key().ok_or_else(|| {
        ParleyError::Config(format!(
            "No API key configured for text-to-speech provider '{}'",
            config.provider
        ))
    })?;

    match config.provider.as_str() {
        "elevenlabs" => Ok(Arc::new(ElevenLabsTts::new(
            api_key,
            config.default_model.clone(),
            Duration::from_millis(config.timeout_ms()),
        ))),
        other => Err(ParleyError::Config(format!(
            "Unknown text-to-speech provider '{other}'"
        ))),
    }
}

/// Build the ElevenLabs streaming TTS request URL for a given voice.
pub fn build_tts_url(voice: &str) -> String {
    format!("https://api.elevenlabs.io/v1/text-to-speech/{voice}/stream?output_format=pcm_16000")
}

/// ElevenLabs streaming synthesis, requested as raw `pcm_16000`.
pub struct ElevenLabsTts {
    api_key: String,
    model: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl ElevenLabsTts {
    pub fn new(api_key: String, model: Option<String>, timeout: Duration) -> Self {
        Self {
            api_key,
            model: model.unwrap_or_else(|| "eleven_turbo_v2".to_string()),
            timeout,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl TextToSpeech for ElevenLabsTts {
    fn id(&self) -> &str {
        "elevenlabs"
    }

    async fn synthesize(&self, text: &str, voice_id: &str) -> Result<AudioBuffer> {
        let url = build_tts_url(voice_id);

        debug!(voice = voice_id, model = %self.model, text_len = text.len(), "Starting TTS stream");

        let resp = self
            .client
            .post(&url)
            .header("xi-api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(&serde_json::json!({
                "text": text,
                "model_id": self.model,
            }))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| classify_reqwest("text_to_speech", self.timeout, e))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(ParleyError::Service(format!("TTS API error {status}: {body}")));
        }

        let mut pcm = Vec::new();
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let bytes = chunk.map_err(|e| classify_reqwest("text_to_speech", self.timeout, e))?;
            pcm.extend_from_slice(&bytes);
        }

        let audio = AudioBuffer::from_le_bytes(&pcm, SAMPLE_RATE);
        if audio.is_empty() {
            return Err(ParleyError::Service("TTS returned no audio".to_string()));
        }
        debug!(duration_ms = audio.duration_ms(), "TTS stream complete");
        Ok(audio)
    }
}
