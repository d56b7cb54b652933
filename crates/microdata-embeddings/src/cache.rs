//! Locating sentence-encoder weights.
//!
//! A model reference is either a local directory holding the encoder files
//! or a HuggingFace repository id, optionally pinned as `org/name@revision`.
//! Hub downloads go through hf-hub's own cache, rooted at the configured
//! model cache directory.

use std::path::{Path, PathBuf};

use hf_hub::api::sync::ApiBuilder;
use hf_hub::{Repo, RepoType};
use tracing::{debug, info};

use crate::error::EmbeddingError;

const CONFIG_FILE: &str = "config.json";
const TOKENIZER_FILE: &str = "tokenizer.json";
const WEIGHTS_FILE: &str = "model.safetensors";

const DEFAULT_REVISION: &str = "main";

/// Where an encoder comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelSource {
    /// A directory that already holds the encoder files
    Local(PathBuf),
    /// A HuggingFace model repository
    Hub { repo_id: String, revision: String },
}

impl ModelSource {
    /// Interpret a configured model reference.
    ///
    /// Existing directories win over repository ids of the same spelling.
    pub fn parse(reference: &str) -> Self {
        let path = Path::new(reference);
        if path.is_dir() {
            return ModelSource::Local(path.to_path_buf());
        }
        match reference.split_once('@') {
            Some((repo_id, revision)) if !revision.is_empty() => ModelSource::Hub {
                repo_id: repo_id.to_string(),
                revision: revision.to_string(),
            },
            _ => ModelSource::Hub {
                repo_id: reference.trim_end_matches('@').to_string(),
                revision: DEFAULT_REVISION.to_string(),
            },
        }
    }

    /// Short display name: the last path segment.
    pub fn name(&self) -> String {
        match self {
            ModelSource::Local(dir) => dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| dir.display().to_string()),
            ModelSource::Hub { repo_id, .. } => repo_id
                .rsplit('/')
                .next()
                .unwrap_or(repo_id)
                .to_string(),
        }
    }
}

/// Resolved encoder files.
#[derive(Debug, Clone)]
pub struct ModelFiles {
    pub config: PathBuf,
    pub tokenizer: PathBuf,
    pub weights: PathBuf,
}

/// Per-user default for downloaded models.
pub fn default_model_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from(".cache"))
        .join("microdata-themes")
        .join("models")
}

/// Resolve `source` to files on disk, downloading hub models on first use.
pub fn resolve_model(source: &ModelSource, cache_dir: &Path) -> Result<ModelFiles, EmbeddingError> {
    match source {
        ModelSource::Local(dir) => {
            let files = ModelFiles {
                config: dir.join(CONFIG_FILE),
                tokenizer: dir.join(TOKENIZER_FILE),
                weights: dir.join(WEIGHTS_FILE),
            };
            for path in [&files.config, &files.tokenizer, &files.weights] {
                if !path.is_file() {
                    return Err(EmbeddingError::ModelNotFound(path.display().to_string()));
                }
            }
            debug!(dir = %dir.display(), "Using local model directory");
            Ok(files)
        }
        ModelSource::Hub { repo_id, revision } => {
            std::fs::create_dir_all(cache_dir)?;
            let api = ApiBuilder::new()
                .with_cache_dir(cache_dir.to_path_buf())
                .with_progress(false)
                .build()
                .map_err(|e| EmbeddingError::Download(e.to_string()))?;
            let repo = api.repo(Repo::with_revision(
                repo_id.clone(),
                RepoType::Model,
                revision.clone(),
            ));

            info!(repo = %repo_id, revision = %revision, "Resolving model files");
            let fetch = |file: &str| {
                repo.get(file)
                    .map_err(|e| EmbeddingError::Download(format!("{repo_id}/{file}: {e}")))
            };
            Ok(ModelFiles {
                config: fetch(CONFIG_FILE)?,
                tokenizer: fetch(TOKENIZER_FILE)?,
                weights: fetch(WEIGHTS_FILE)?,
            })
        }
    }
}
