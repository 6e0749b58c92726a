//! Error types for the client.

use crate::config::ClientConfigError;
use stalewise_core::FetchError;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Config(#[from] ClientConfigError),
    #[error("Failed to build HTTP client: {0}")]
    Transport(String),
    #[error("Failed to initialize tracing: {0}")]
    Telemetry(String),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("Failed to print response: {0}")]
    Output(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ClientResult<T> = Result<T, ClientError>;
