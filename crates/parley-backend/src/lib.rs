//! AI Backend Gateway.
//!
//! Each backend implements the [`AiBackend`] trait: it receives the caller's
//! transcribed utterance tagged with the session identifier and returns the
//! agent's reply text. A backend never returns an empty reply; a response
//! without usable text is a [`ParleyError::MalformedResponse`].

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use parley_core::error::{ParleyError, Result};
use parley_core::types::SessionId;

pub mod webhook;

pub use webhook::WebhookBackend;

/// Fixed-shape request sent to the AI backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AiRequest {
    pub message: String,
    #[serde(rename = "sessionId")]
    pub session_id: String,
    pub channel: String,
}

/// The core AI backend trait.
#[async_trait]
pub trait AiBackend: Send + Sync {
    /// Backend identifier (e.g., "webhook").
    fn id(&self) -> &str;

    /// Ask the agent for a reply. Fails with `Timeout`, `BackendUnavailable`
    /// or `MalformedResponse`; no retries are attempted here.
    async fn ask(&self, session_id: &SessionId, text: &str) -> Result<String>;
}

/// A backend bound to one session; every call carries the session identifier.
#[derive(Clone)]
pub struct SessionBackend {
    session_id: SessionId,
    backend: Arc<dyn AiBackend>,
}

impl SessionBackend {
    pub fn new(session_id: SessionId, backend: Arc<dyn AiBackend>) -> Self {
        Self {
            session_id,
            backend,
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub async fn ask(&self, text: &str) -> Result<String> {
        let reply = self.backend.ask(&self.session_id, text).await?;
        if reply.trim().is_empty() {
            return Err(ParleyError::MalformedResponse(format!(
                "backend '{}' returned an empty reply",
                self.backend.id()
            )));
        }
        Ok(reply)
    }
}

/// Pick the reply text out of a loosely-typed response.
///
/// Fields are tried in order and the first non-blank string wins. A JSON
/// array is unwrapped to its first element, which is how n8n's
/// "Respond to Webhook" node answers by default.
pub fn extract_reply(body: &serde_json::Value, fields: &[String]) -> Option<String> {
    let object = match body {
        serde_json::Value::Array(items) => items.first()?,
        other => other,
    };
    fields.iter().find_map(|field| {
        object
            .get(field)
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
    })
}
