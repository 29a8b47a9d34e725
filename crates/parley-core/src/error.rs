use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParleyError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Capacity exceeded: {max} concurrent sessions already open")]
    CapacityExceeded { max: usize },

    #[error("Session not found: {0}")]
    NotFound(String),

    #[error("{collaborator} timed out after {after_ms}ms")]
    Timeout {
        collaborator: &'static str,
        after_ms: u64,
    },

    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Service error: {0}")]
    Service(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ParleyError {
    /// Short machine-readable classification, used for logs and metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::CapacityExceeded { .. } => "capacity_exceeded",
            Self::NotFound(_) => "not_found",
            Self::Timeout { .. } => "timeout",
            Self::BackendUnavailable(_) => "backend_unavailable",
            Self::MalformedResponse(_) => "malformed_response",
            Self::Service(_) => "service",
            Self::Transport(_) => "transport",
            Self::Io(_) => "io",
            Self::Json(_) => "json",
            Self::Other(_) => "other",
        }
    }

    /// Whether this is a per-turn collaborator failure that the turn machine
    /// recovers from with a spoken apology.
    pub fn is_collaborator_failure(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. }
                | Self::BackendUnavailable(_)
                | Self::MalformedResponse(_)
                | Self::Service(_)
                | Self::Transport(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ParleyError>;
