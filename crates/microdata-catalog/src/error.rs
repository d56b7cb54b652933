//! Catalog error types.

use thiserror::Error;

/// Errors returned by catalog clients.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The catalog has no such study
    #[error("Study not found in catalog: {0}")]
    NotFound(String),

    /// Network or HTTP failure after the retry budget was spent
    #[error("Catalog fetch failed: {0}")]
    Fetch(String),

    /// The catalog refused the request with a client error status
    #[error("Catalog rejected request: HTTP {status}")]
    Rejected { status: u16 },

    /// The catalog answered with something other than JSON
    #[error("Invalid catalog response: {0}")]
    InvalidResponse(String),

    /// Client could not be constructed
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl CatalogError {
    /// Whether another attempt could succeed.
    ///
    /// Transport errors, 429 and 5xx statuses, and unparseable bodies are
    /// transient. Other 4xx statuses are not.
    pub fn is_transient(&self) -> bool {
        matches!(self, CatalogError::Fetch(_) | CatalogError::InvalidResponse(_))
    }
}
