//! Configuration loading, environment overrides, and validation.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::types::VOICE_CHANNEL;

/// Top-level Parley configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook: Option<WebhookConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcription: Option<TranscriptionConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tts: Option<TtsConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway: Option<GatewayConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

/// AI backend webhook (e.g. an n8n workflow) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Environment variable holding the URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url_env: Option<String>,

    /// Whole-request timeout in milliseconds (default: 20000).
    #[serde(default = "default_webhook_timeout")]
    pub timeout_ms: u64,

    /// Response fields tried in order for the reply text.
    #[serde(default = "default_reply_fields")]
    pub reply_fields: Vec<String>,

    /// Channel tag sent with every request (default: "voice_call").
    #[serde(default = "default_channel")]
    pub channel: String,
}

fn default_webhook_timeout() -> u64 {
    20_000
}

fn default_reply_fields() -> Vec<String> {
    vec!["output".into(), "text".into(), "message".into()]
}

fn default_channel() -> String {
    VOICE_CHANNEL.into()
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            url: None,
            url_env: None,
            timeout_ms: default_webhook_timeout(),
            reply_fields: default_reply_fields(),
            channel: default_channel(),
        }
    }
}

impl WebhookConfig {
    pub fn resolve_url(&self) -> Option<String> {
        resolve_secret_field(&self.url, &self.url_env)
    }
}

/// Speech-to-text configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionConfig {
    /// Provider: "deepgram", "groq" or "openai" (default: "groq").
    #[serde(default = "default_transcription_provider")]
    pub provider: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    /// Model name (e.g. "whisper-large-v3-turbo", "nova-2").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Default language hint (e.g. "en-US").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,

    /// Request timeout in milliseconds (default: 15000).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

fn default_transcription_provider() -> String {
    "groq".into()
}

impl TranscriptionConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env)
    }

    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms.unwrap_or(15_000)
    }
}

/// Text-to-speech configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsConfig {
    /// TTS provider (default: "elevenlabs").
    #[serde(default = "default_tts_provider")]
    pub provider: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    /// Default voice ID.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_voice: Option<String>,

    /// Default model ID (e.g. "eleven_turbo_v2").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,

    /// Request timeout in milliseconds (default: 15000).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

fn default_tts_provider() -> String {
    "elevenlabs".into()
}

impl TtsConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env)
    }

    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms.unwrap_or(15_000)
    }
}

/// Session lifecycle and turn-taking policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Seconds without activity before a session is reaped (default: 300).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inactivity_timeout_secs: Option<u64>,

    /// Seconds between reaper sweeps (default: 300).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reap_interval_secs: Option<u64>,

    /// Maximum concurrently open sessions (default: 64).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_sessions: Option<usize>,

    /// Transcripts with fewer non-whitespace characters are dropped (default: 3).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_transcript_chars: Option<usize>,

    /// Consecutive collaborator failures before the session ends (default: 3).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_consecutive_failures: Option<u32>,

    /// Extra AI backend attempts per turn (default: 0).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_retries: Option<u32>,

    /// Utterance spoken in place of a reply when a collaborator fails.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub apology: Option<String>,

    /// Spoken once when a session starts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub greeting: Option<String>,

    /// Grace period for queued audio when a session ends (default: 500).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_grace_ms: Option<u64>,

    /// Playback chunk length in milliseconds, 0 disables pacing (default: 200).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub playback_chunk_ms: Option<u64>,

    /// Hard cap on a single utterance (default: 30000).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_utterance_ms: Option<u64>,

    /// RMS energy above which a frame counts as speech (default: 300.0).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vad_threshold: Option<f64>,

    /// Silent 20ms frames that end an utterance (default: 15).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vad_silence_frames: Option<usize>,
}

pub const DEFAULT_APOLOGY: &str = "I'm having some technical difficulties. Please try again.";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind: Option<String>,
}

fn default_port() -> u16 {
    8080
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "plain" (default) or "json".
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log level override (trace/debug/info/warn/error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Per-crate log level overrides (e.g. "parley_session=debug").
    #[serde(default)]
    pub filters: Vec<String>,

    /// Output target: "stderr" (default) or "stdout".
    #[serde(default = "default_log_output")]
    pub output: String,
}

fn default_log_format() -> String {
    "plain".into()
}

fn default_log_output() -> String {
    "stderr".into()
}

/// Resolve a secret: check the direct value first, then the env-var reference.
pub fn resolve_secret_field(direct: &Option<String>, env_var: &Option<String>) -> Option<String> {
    if let Some(val) = direct {
        if !val.is_empty() {
            return Some(val.clone());
        }
    }
    if let Some(env) = env_var {
        if let Ok(val) = std::env::var(env) {
            if !val.is_empty() {
                return Some(val);
            }
        }
    }
    None
}

/// Substitute `${ENV_VAR}` patterns in a string with their environment variable values.
fn substitute_env_vars(input: &str) -> String {
    let re = regex::Regex::new(r"\$\{([^}]+)\}").expect("static env-var pattern");
    re.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_default()
    })
    .into_owned()
}

impl Config {
    /// Load config from a JSON5 file, substituting `${ENV_VAR}` references.
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path).map_err(crate::error::ParleyError::Io)?;

        let substituted = substitute_env_vars(&raw);

        let config: Config = json5::from_str(&substituted)
            .map_err(|e| crate::error::ParleyError::Config(e.to_string()))?;

        Ok(config)
    }

    /// Default config file path.
    pub fn config_path() -> PathBuf {
        data_dir().join("config.json")
    }

    /// Apply the process environment on top of the file config.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|name| std::env::var(name).ok());
    }

    /// Apply overrides from an arbitrary variable lookup.
    ///
    /// Recognised variables: `N8N_WEBHOOK_URL`, `DEEPGRAM_API_KEY`,
    /// `ELEVENLABS_API_KEY`, `ELEVENLABS_VOICE_ID`, `PORT`,
    /// `PARLEY_INACTIVITY_TIMEOUT_SECS`, `PARLEY_MAX_SESSIONS`.
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(url) = var("N8N_WEBHOOK_URL") {
            self.webhook.get_or_insert_with(WebhookConfig::default).url = Some(url);
        }

        if let Some(key) = var("DEEPGRAM_API_KEY") {
            let stt = self.transcription.get_or_insert_with(|| TranscriptionConfig {
                provider: "deepgram".into(),
                api_key: None,
                api_key_env: None,
                model: None,
                language: None,
                timeout_ms: None,
            });
            if stt.provider == "deepgram" && stt.api_key.is_none() {
                stt.api_key = Some(key);
            }
        }

        if let Some(key) = var("ELEVENLABS_API_KEY") {
            let tts = self.tts.get_or_insert_with(|| TtsConfig {
                provider: default_tts_provider(),
                api_key: None,
                api_key_env: None,
                default_voice: None,
                default_model: None,
                timeout_ms: None,
            });
            if tts.api_key.is_none() {
                tts.api_key = Some(key);
            }
        }

        if let Some(voice) = var("ELEVENLABS_VOICE_ID") {
            if let Some(tts) = self.tts.as_mut() {
                tts.default_voice.get_or_insert(voice);
            }
        }

        if let Some(port) = var("PORT").and_then(|p| p.parse().ok()) {
            self.gateway
                .get_or_insert_with(|| GatewayConfig {
                    port: default_port(),
                    bind: None,
                })
                .port = port;
        }

        if let Some(secs) = var("PARLEY_INACTIVITY_TIMEOUT_SECS").and_then(|s| s.parse().ok()) {
            self.session.get_or_insert_with(SessionConfig::default).inactivity_timeout_secs =
                Some(secs);
        }

        if let Some(max) = var("PARLEY_MAX_SESSIONS").and_then(|s| s.parse().ok()) {
            self.session.get_or_insert_with(SessionConfig::default).max_sessions = Some(max);
        }
    }

    /// Gateway port.
    pub fn gateway_port(&self) -> u16 {
        self.gateway.as_ref().map(|g| g.port).unwrap_or(8080)
    }

    /// Gateway bind address.
    pub fn gateway_bind(&self) -> String {
        self.gateway
            .as_ref()
            .and_then(|g| g.bind.clone())
            .unwrap_or_else(|| "0.0.0.0".to_string())
    }

    pub fn webhook_url(&self) -> Option<String> {
        self.webhook.as_ref().and_then(|w| w.resolve_url())
    }

    pub fn inactivity_timeout_secs(&self) -> u64 {
        self.session
            .as_ref()
            .and_then(|s| s.inactivity_timeout_secs)
            .unwrap_or(300)
    }

    pub fn reap_interval_secs(&self) -> u64 {
        self.session
            .as_ref()
            .and_then(|s| s.reap_interval_secs)
            .unwrap_or(300)
    }

    pub fn max_sessions(&self) -> usize {
        self.session
            .as_ref()
            .and_then(|s| s.max_sessions)
            .unwrap_or(64)
    }

    pub fn min_transcript_chars(&self) -> usize {
        self.session
            .as_ref()
            .and_then(|s| s.min_transcript_chars)
            .unwrap_or(3)
    }

    pub fn max_consecutive_failures(&self) -> u32 {
        self.session
            .as_ref()
            .and_then(|s| s.max_consecutive_failures)
            .unwrap_or(3)
    }

    pub fn ai_retries(&self) -> u32 {
        self.session
            .as_ref()
            .and_then(|s| s.ai_retries)
            .unwrap_or(0)
    }

    pub fn apology(&self) -> String {
        self.session
            .as_ref()
            .and_then(|s| s.apology.clone())
            .filter(|a| !a.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_APOLOGY.to_string())
    }

    pub fn greeting(&self) -> Option<String> {
        self.session
            .as_ref()
            .and_then(|s| s.greeting.clone())
            .filter(|g| !g.trim().is_empty())
    }

    pub fn end_grace_ms(&self) -> u64 {
        self.session
            .as_ref()
            .and_then(|s| s.end_grace_ms)
            .unwrap_or(500)
    }

    pub fn playback_chunk_ms(&self) -> u64 {
        self.session
            .as_ref()
            .and_then(|s| s.playback_chunk_ms)
            .unwrap_or(200)
    }

    pub fn max_utterance_ms(&self) -> u64 {
        self.session
            .as_ref()
            .and_then(|s| s.max_utterance_ms)
            .unwrap_or(30_000)
    }

    pub fn vad_threshold(&self) -> f64 {
        self.session
            .as_ref()
            .and_then(|s| s.vad_threshold)
            .unwrap_or(300.0)
    }

    pub fn vad_silence_frames(&self) -> usize {
        self.session
            .as_ref()
            .and_then(|s| s.vad_silence_frames)
            .unwrap_or(15)
    }

    /// Voice used when a session does not pick one.
    pub fn default_voice(&self) -> String {
        self.tts
            .as_ref()
            .and_then(|t| t.default_voice.clone())
            .unwrap_or_else(|| "21m00Tcm4TlvDq8ikWAM".to_string())
    }

    /// Language hint used when a session does not pick one.
    pub fn default_language(&self) -> Option<String> {
        self.transcription.as_ref().and_then(|t| t.language.clone())
    }

    /// Get a config value by dotted path (e.g. "gateway.port", "session.max_sessions").
    pub fn get_path(&self, path: &str) -> Option<serde_json::Value> {
        let json = serde_json::to_value(self).ok()?;
        let mut current = &json;
        for segment in path.split('.') {
            current = current.get(segment)?;
        }
        Some(current.clone())
    }

    /// Validate config, returning (warnings, errors).
    pub fn validate(&self) -> (Vec<String>, Vec<String>) {
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        match &self.webhook {
            None => errors.push("AI webhook URL is not configured".to_string()),
            Some(webhook) => {
                match webhook.resolve_url() {
                    None => errors.push("AI webhook URL is not configured".to_string()),
                    Some(url) if !url.starts_with("http://") && !url.starts_with("https://") => {
                        errors.push(format!("AI webhook URL must be http(s): {url}"));
                    }
                    Some(_) => {}
                }
                if webhook.reply_fields.is_empty() {
                    errors.push("webhook.reply_fields cannot be empty".to_string());
                }
                if webhook.timeout_ms == 0 {
                    errors.push("webhook.timeout_ms cannot be 0".to_string());
                } else if !(15_000..=20_000).contains(&webhook.timeout_ms) {
                    warnings.push(format!(
                        "webhook.timeout_ms is {}; 15000-20000 keeps callers from waiting in silence",
                        webhook.timeout_ms
                    ));
                }
            }
        }

        match &self.transcription {
            None => errors.push("Speech-to-text is not configured".to_string()),
            Some(stt) if stt.resolve_api_key().is_none() => errors.push(format!(
                "Speech-to-text provider '{}' has no API key configured",
                stt.provider
            )),
            Some(_) => {}
        }

        match &self.tts {
            None => errors.push("Text-to-speech is not configured".to_string()),
            Some(tts) if tts.resolve_api_key().is_none() => errors.push(format!(
                "Text-to-speech provider '{}' has no API key configured",
                tts.provider
            )),
            Some(_) => {}
        }

        if self.max_sessions() == 0 {
            errors.push("session.max_sessions cannot be 0".to_string());
        }

        if self.max_consecutive_failures() == 0 {
            errors.push("session.max_consecutive_failures cannot be 0".to_string());
        }

        if let Some(gw) = &self.gateway {
            if gw.port == 0 {
                errors.push("Gateway port cannot be 0".to_string());
            }
        }

        (warnings, errors)
    }
}

/// Base directory for Parley data: `~/.parley/`
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".parley")
}
