use thiserror::Error;

/// Failures reported by a synthesis provider.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SynthesisError {
    #[error("Invalid synthesis config: {0}")]
    InvalidConfig(String),

    #[error("Provider unreachable: {0}")]
    Connect(String),

    #[error("Provider rejected the session: {0}")]
    Rejected(String),

    #[error("Provider error: {0}")]
    Upstream(String),

    #[error("Provider disconnected: {0}")]
    Disconnected(String),

    #[error("Provider protocol error: {0}")]
    Protocol(String),
}

/// Result type alias for provider operations
pub type Result<T> = std::result::Result<T, SynthesisError>;
