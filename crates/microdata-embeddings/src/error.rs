use thiserror::Error;

#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// Backend settings are incomplete or contradictory
    #[error("Invalid embedding configuration: {0}")]
    Config(String),

    /// Labels handed to the embedder violate its preconditions
    #[error("Invalid embedding input: {0}")]
    InvalidInput(String),

    #[error("Model files unavailable: {0}")]
    ModelNotFound(String),

    #[error("Model download failed: {0}")]
    Download(String),

    #[error("Tokenizer failure: {0}")]
    Tokenizer(String),

    #[error("Encoder failure: {0}")]
    Candle(#[from] candle_core::Error),

    /// The remote endpoint failed or answered with an unusable body
    #[error("Embedding endpoint error: {0}")]
    Api(String),

    /// A backend returned vectors of the wrong width
    #[error("Embedding width {actual} does not match model width {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// The on-disk memo could not be written
    #[error("Embedding memo error: {0}")]
    Cache(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
