use thiserror::Error;
use vramgate_core::ConfigError;

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("invalid size: {0}")]
    Size(#[from] ConfigError),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    InvalidArgument(String),
}
