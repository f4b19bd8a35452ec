use std::time::Duration;

use synth_core::SynthesisError;
use thiserror::Error;
use tonic::Status;

/// Gateway error types
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Synthesis(#[from] SynthesisError),

    #[error("Provider did not open a session within {0:?}")]
    ProviderTimeout(Duration),

    #[error("Configuration error: {0}")]
    Config(String),

    /// Reading the client's request stream failed; the status is kept as is.
    #[error("Inbound stream failed: {}", .0.message())]
    Inbound(Status),
}

/// The one place gateway failures become gRPC statuses.
impl From<GatewayError> for Status {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::InvalidInput(msg) => Status::invalid_argument(msg),
            GatewayError::Synthesis(SynthesisError::InvalidConfig(msg)) => {
                Status::invalid_argument(msg)
            }
            GatewayError::Synthesis(
                e @ (SynthesisError::Connect(_) | SynthesisError::Disconnected(_)),
            ) => {
                tracing::warn!("Provider unavailable: {}", e);
                Status::unavailable(e.to_string())
            }
            GatewayError::Synthesis(e) => {
                tracing::error!("Provider error: {}", e);
                Status::internal(format!("Failed to process TTS stream: {e}"))
            }
            e @ GatewayError::ProviderTimeout(_) => {
                tracing::warn!("{}", e);
                Status::unavailable(e.to_string())
            }
            GatewayError::Config(msg) => {
                tracing::error!("Configuration error: {}", msg);
                Status::internal(msg)
            }
            GatewayError::Inbound(status) => status,
        }
    }
}
