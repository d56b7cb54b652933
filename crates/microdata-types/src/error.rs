//! Errors raised while loading shared inputs.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MicrodataError {
    /// Settings failed to load or validate
    #[error("Configuration error: {0}")]
    Config(String),

    /// A data dictionary payload is not valid JSON for its shape
    #[error("Malformed data dictionary: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A data dictionary payload has the wrong shape
    #[error("Invalid data dictionary: {0}")]
    InvalidInput(String),
}
