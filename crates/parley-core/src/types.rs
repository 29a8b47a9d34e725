use std::fmt;

use serde::{Deserialize, Serialize};

/// Channel tag sent to the AI backend on every voice request.
pub const VOICE_CHANNEL: &str = "voice_call";

/// Opaque unique session identifier.
#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Allocate a fresh random identifier.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// State of a session's turn state machine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    #[default]
    Idle,
    Capturing,
    Transcribing,
    AwaitingReply,
    Synthesizing,
    Speaking,
    Terminated,
}

impl TurnState {
    /// Speech arriving in this state interrupts the current turn.
    pub fn accepts_barge_in(self) -> bool {
        !matches!(self, Self::Idle | Self::Terminated)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Capturing => "capturing",
            Self::Transcribing => "transcribing",
            Self::AwaitingReply => "awaiting_reply",
            Self::Synthesizing => "synthesizing",
            Self::Speaking => "speaking",
            Self::Terminated => "terminated",
        }
    }
}

impl fmt::Display for TurnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnOutcome {
    /// Reply (or apology) audio was delivered.
    Completed,
    /// A new utterance interrupted the turn.
    Superseded,
    /// Nothing could be delivered.
    Failed,
    /// Transcript too short to forward.
    Discarded,
}

/// Coarse status reported by the control surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Inactive,
}

/// Whether a collaborator is available to new sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollaboratorStatus {
    Configured,
    Missing,
}

impl CollaboratorStatus {
    pub fn from_present(present: bool) -> Self {
        if present {
            Self::Configured
        } else {
            Self::Missing
        }
    }
}

/// Health of every collaborator plus the current load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub speech_to_text: CollaboratorStatus,
    pub text_to_speech: CollaboratorStatus,
    pub ai_backend: CollaboratorStatus,
    pub media_transport: CollaboratorStatus,
    pub active_sessions: usize,
}

impl HealthSnapshot {
    /// Every collaborator is configured.
    pub fn is_ready(&self) -> bool {
        [
            self.speech_to_text,
            self.text_to_speech,
            self.ai_backend,
            self.media_transport,
        ]
        .iter()
        .all(|s| *s == CollaboratorStatus::Configured)
    }
}
