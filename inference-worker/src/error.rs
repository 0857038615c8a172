//! Error types for the inference worker.

use docchat_common::{ProtocolError, StreamError};

/// Error types for inference and stream handling.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    #[error("Missing API key for provider '{0}'")]
    MissingApiKey(String),

    #[error("Inference failed: {0}")]
    InferenceFailed(String),

    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),

    #[error("Provider communication error: {0}")]
    Communication(String),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Stream error: {0}")]
    Transport(#[from] StreamError),
}

pub type Result<T> = std::result::Result<T, Error>;
