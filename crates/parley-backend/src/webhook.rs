//! Webhook backend — POSTs the utterance to an HTTP agent workflow.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use parley_core::config::WebhookConfig;
use parley_core::error::{ParleyError, Result};
use parley_core::types::SessionId;

use crate::{AiBackend, AiRequest, extract_reply};

/// AI backend reached through a JSON webhook (n8n and friends).
///
/// The underlying `reqwest::Client` is shared by every session that talks
/// to this backend; it holds no per-session state.
pub struct WebhookBackend {
    url: String,
    channel: String,
    reply_fields: Vec<String>,
    timeout: Duration,
    client: reqwest::Client,
}

impl WebhookBackend {
    pub fn new(url: String, timeout: Duration) -> Self {
        let defaults = WebhookConfig::default();
        Self {
            url,
            channel: defaults.channel,
            reply_fields: defaults.reply_fields,
            timeout,
            client: reqwest::Client::new(),
        }
    }

    pub fn from_config(config: &WebhookConfig) -> Result<Self> {
        let url = config
            .resolve_url()
            .ok_or_else(|| ParleyError::Config("AI webhook URL is not configured".to_string()))?;
        if config.reply_fields.is_empty() {
            return Err(ParleyError::Config(
                "webhook.reply_fields cannot be empty".to_string(),
            ));
        }
        Ok(Self::new(url, Duration::from_millis(config.timeout_ms))
            .with_channel(config.channel.clone())
            .with_reply_fields(config.reply_fields.clone()))
    }

    pub fn with_channel(mut self, channel: String) -> Self {
        self.channel = channel;
        self
    }

    pub fn with_reply_fields(mut self, fields: Vec<String>) -> Self {
        self.reply_fields = fields;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn timeout_error(&self) -> ParleyError {
        ParleyError::Timeout {
            collaborator: "ai_backend",
            after_ms: self.timeout.as_millis() as u64,
        }
    }

    async fn exchange(&self, request: &AiRequest) -> Result<String> {
        let resp = self
            .client
            .post(&self.url)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    self.timeout_error()
                } else {
                    ParleyError::BackendUnavailable(format!("webhook request failed: {e}"))
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ParleyError::BackendUnavailable(format!(
                "webhook returned {status}: {body}"
            )));
        }

        let raw = resp
            .text()
            .await
            .map_err(|e| ParleyError::BackendUnavailable(format!("webhook body read failed: {e}")))?;
        let body: serde_json::Value = serde_json::from_str(&raw)
            .map_err(|e| ParleyError::MalformedResponse(format!("webhook body is not JSON: {e}")))?;

        extract_reply(&body, &self.reply_fields).ok_or_else(|| {
            ParleyError::MalformedResponse(format!(
                "no non-empty reply in fields {:?}",
                self.reply_fields
            ))
        })
    }
}

#[async_trait]
impl AiBackend for WebhookBackend {
    fn id(&self) -> &str {
        "webhook"
    }

    async fn ask(&self, session_id: &SessionId, text: &str) -> Result<String> {
        let request = AiRequest {
            message: text.to_string(),
            session_id: session_id.to_string(),
            channel: self.channel.clone(),
        };

        info!(%session_id, chars = text.len(), "Sending utterance to AI webhook");

        match tokio::time::timeout(self.timeout, self.exchange(&request)).await {
            Ok(Ok(reply)) => {
                debug!(%session_id, reply_chars = reply.len(), "AI webhook replied");
                Ok(reply)
            }
            Ok(Err(e)) => {
                warn!(%session_id, kind = e.kind(), %e, "AI webhook failed");
                Err(e)
            }
            Err(_) => {
                warn!(%session_id, timeout_ms = self.timeout.as_millis() as u64, "AI webhook timed out");
                Err(self.timeout_error())
            }
        }
    }
}
