//! Error types for the debate engine.

use thiserror::Error;

/// Failures detected before any side effect takes place.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("A debate topic is required")]
    EmptyTopic,

    #[error("An argument is required")]
    EmptyArgument,

    #[error("A turn is already being processed for this session")]
    TurnInFlight,

    #[error("A verdict needs at least {required} turns, the debate has {actual}")]
    NotEnoughTurns { required: usize, actual: usize },

    #[error("A point of information needs a draft of at least {required} characters, got {actual}")]
    DraftTooShort { required: usize, actual: usize },

    #[error("Points of information are only offered between 1:00 and 6:00 of a speech, {elapsed_secs}s have elapsed")]
    PoiWindowClosed { elapsed_secs: u64 },

    #[error("Unknown debate format: {0}")]
    UnknownFormat(String),

    #[error("Role '{role}' does not exist in the {format} format")]
    UnknownRole { format: String, role: String },

    #[error("Nothing to save: the session has no topic and no turns")]
    NothingToSave,
}

/// Errors raised by a key-value backend.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),
}

#[derive(Error, Debug)]
pub enum DebateError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{service} service failed: {message}")]
    Service {
        service: &'static str,
        message: String,
    },

    #[error("Session is already published as {share_id}")]
    StaleWrite { share_id: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("OpenAI API error: {0}")]
    OpenAIError(#[from] async_openai::error::OpenAIError),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("TTS error: {0}")]
    TtsError(String),
}

impl DebateError {
    pub fn service(service: &'static str, message: impl Into<String>) -> Self {
        DebateError::Service {
            service,
            message: message.into(),
        }
    }

    /// Whether the user can simply resubmit the same request.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DebateError::Service { .. } | DebateError::OpenAIError(_)
        )
    }
}
