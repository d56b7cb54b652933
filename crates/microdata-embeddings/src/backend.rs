//! Embedding backend selection.
//!
//! The set of backends is closed; configuration picks one at startup and the
//! caller owns the resulting handle for the life of the process.

use std::path::Path;
use std::sync::Arc;

use microdata_types::{EmbeddingBackendKind, EmbeddingSettings};
use tracing::info;

use crate::api::{ApiEmbedder, ApiEmbedderConfig};
use crate::cache::ModelSource;
use crate::candle::CandleEmbedder;
use crate::error::EmbeddingError;
use crate::model::Embedder;

/// Construct the configured embedding backend.
///
/// `model_cache_dir` is where the Candle backend keeps downloaded model files.
pub fn build_embedder(
    settings: &EmbeddingSettings,
    model_cache_dir: &Path,
) -> Result<Arc<dyn Embedder>, EmbeddingError> {
    info!(backend = ?settings.backend, model = %settings.model, "Building embedder");

    match settings.backend {
        EmbeddingBackendKind::Candle => {
            let source = ModelSource::parse(&settings.model);
            Ok(Arc::new(CandleEmbedder::load(&source, model_cache_dir)?))
        }
        EmbeddingBackendKind::Api => {
            let api_key = settings.api_key.clone().ok_or_else(|| {
                EmbeddingError::Config(
                    "embedding.api_key is required for the api backend".to_string(),
                )
            })?;
            let mut config = ApiEmbedderConfig::openai(api_key, settings.model.clone());
            if let Some(base_url) = &settings.api_base_url {
                config = config.with_base_url(base_url.clone());
            }
            Ok(Arc::new(ApiEmbedder::new(config)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_api_backend_requires_key() {
        let temp = TempDir::new().unwrap();
        let settings = EmbeddingSettings {
            backend: EmbeddingBackendKind::Api,
            ..Default::default()
        };
        let result = build_embedder(&settings, temp.path());
        assert!(matches!(result, Err(EmbeddingError::Config(_))));
    }

    #[test]
    fn test_api_backend_builds() {
        let temp = TempDir::new().unwrap();
        let settings = EmbeddingSettings {
            backend: EmbeddingBackendKind::Api,
            model: "text-embedding-3-small".to_string(),
            api_key: Some("sk-test".to_string()),
            api_base_url: Some("http://localhost:9".to_string()),
            ..Default::default()
        };
        let embedder = build_embedder(&settings, temp.path()).unwrap();
        assert_eq!(embedder.info().name, "text-embedding-3-small");
    }
}
