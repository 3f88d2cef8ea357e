//! Error types for the ops console.

use std::time::Duration;

/// Top-level error type for the console.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Mailbox error: {0}")]
    Mailbox(#[from] MailboxError),

    #[error("Connector error: {0}")]
    Connector(#[from] ConnectorError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Unknown connector: {0}")]
    UnknownConnector(String),
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} rate limited")]
    RateLimited { provider: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors raised by a reasoning backend during a stage call.
///
/// Whether a stage may substitute a safe default is decided by
/// [`BackendError::is_recoverable`].
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("Backend request failed: {0}")]
    Request(String),

    #[error("Backend returned unusable output: {0}")]
    InvalidResponse(String),

    #[error("Backend call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Backend fault: {0}")]
    Fatal(String),
}

impl PipelineError {
    /// True for submission rejections (nothing was changed).
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::Busy | Self::TaskNotFound(_) | Self::InvalidTransition { .. }
        )
    }
}

impl BackendError {
    /// Classification and decision stages fall back to defaults for these.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Fatal(_))
    }
}

impl From<LlmError> for BackendError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::AuthFailed { .. } => Self::Fatal(err.to_string()),
            LlmError::InvalidResponse { .. } | LlmError::Json(_) => {
                Self::InvalidResponse(err.to_string())
            }
            LlmError::RequestFailed { .. } | LlmError::RateLimited { .. } => {
                Self::Request(err.to_string())
            }
        }
    }
}

/// External mailbox errors.
#[derive(Debug, thiserror::Error)]
pub enum MailboxError {
    /// The credential handle was rejected (HTTP 401).
    #[error("Mailbox rejected the credential")]
    Unauthorized,

    #[error("Mailbox request failed: {0}")]
    Request(String),

    #[error("Mailbox returned an invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Connector {0} has no credential")]
    MissingCredential(String),
}

impl MailboxError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized)
    }
}

/// Connector registry errors.
#[derive(Debug, thiserror::Error)]
pub enum ConnectorError {
    #[error("Connector {0} is not connected")]
    NotConnected(String),

    #[error("Connector {0} requires a credential")]
    CredentialRequired(String),
}

/// Pipeline errors.
///
/// `Busy`, `TaskNotFound` and `InvalidTransition` returned at submission are
/// rejections with no side effect. A `Stage` error fails the run.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("A pipeline run is already in flight")]
    Busy,

    #[error("Task {0} not found")]
    TaskNotFound(String),

    #[error("Task {id} cannot move from {from} to {to}")]
    InvalidTransition { id: String, from: String, to: String },

    #[error("{stage} stage failed: {source}")]
    Stage {
        stage: String,
        #[source]
        source: BackendError,
    },
}

/// Result type alias for the console.
pub type Result<T> = std::result::Result<T, Error>;
