//! Theme pipeline error types.

use thiserror::Error;

use crate::cluster::ClusterError;

/// Errors that can occur during enrichment and theme generation.
#[derive(Debug, Error)]
pub enum ThemesError {
    /// Storage location or other required configuration is missing or invalid
    #[error("Configuration error: {0}")]
    Config(String),

    /// The supplied data dictionary has an unsupported shape
    #[error("Unsupported data dictionary source: {0}")]
    DictionarySource(String),

    /// Fetching the data dictionary from the catalog failed
    #[error("Catalog error: {0}")]
    Catalog(#[from] microdata_catalog::CatalogError),

    /// Degenerate clustering input
    #[error("Clustering input error: {0}")]
    ClusteringInput(String),

    /// Clustering error
    #[error("Clustering error: {0}")]
    Clustering(#[from] ClusterError),

    /// Embedding error
    #[error("Embedding error: {0}")]
    Embedding(#[from] microdata_embeddings::EmbeddingError),

    /// Theme LLM call failed
    #[error("LLM error: {0}")]
    Llm(String),

    /// LLM response could not be parsed into themes
    #[error("Failed to parse theme response: {0}")]
    Parse(String),

    /// Persisted state not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<microdata_types::MicrodataError> for ThemesError {
    fn from(err: microdata_types::MicrodataError) -> Self {
        match err {
            microdata_types::MicrodataError::Config(msg) => ThemesError::Config(msg),
            microdata_types::MicrodataError::Serialization(e) => {
                ThemesError::DictionarySource(e.to_string())
            }
            microdata_types::MicrodataError::InvalidInput(msg) => ThemesError::DictionarySource(msg),
        }
    }
}
