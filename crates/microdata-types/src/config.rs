//! Configuration loading for the microdata pipeline.
//!
//! Layered config: defaults -> config file -> env vars -> CLI flags.
//! The default config file lives at ~/.config/microdata-themes/config.toml.

use config::{Config, Environment, File};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::MicrodataError;

const APP_NAME: &str = "microdata-themes";

/// Which embedding implementation to construct.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingBackendKind {
    /// Local BERT-family model run through Candle (default)
    #[default]
    Candle,
    /// OpenAI-compatible `/embeddings` endpoint
    Api,
}

/// Embedding model configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingSettings {
    /// Backend to use
    #[serde(default)]
    pub backend: EmbeddingBackendKind,

    /// Candle: HuggingFace repo id (`org/name[@revision]`) or a local model
    /// directory. API: the remote model name.
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Instruction prepended to every label before encoding
    #[serde(default = "default_embedding_instruction")]
    pub instruction: String,

    /// API base URL (API backend only)
    #[serde(default)]
    pub api_base_url: Option<String>,

    /// API key (loaded from env var, not stored in config file)
    #[serde(default)]
    pub api_key: Option<String>,
}

fn default_embedding_model() -> String {
    "sentence-transformers/all-MiniLM-L6-v2".to_string()
}

fn default_embedding_instruction() -> String {
    "Represent the survey variable label for clustering; Input: ".to_string()
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            backend: EmbeddingBackendKind::default(),
            model: default_embedding_model(),
            instruction: default_embedding_instruction(),
            api_base_url: None,
            api_key: None,
        }
    }
}

/// Defaults for the enrichment decision procedure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentSettings {
    /// Upper bound on the number of clusters
    #[serde(default = "default_max_clusters")]
    pub max_clusters: usize,

    /// Token budget per cluster prompt
    #[serde(default = "default_token_limit")]
    pub token_limit: usize,

    /// Separator used to join labels
    #[serde(default = "default_special_separator")]
    pub special_separator: String,
}

fn default_max_clusters() -> usize {
    20
}

fn default_token_limit() -> usize {
    500
}

fn default_special_separator() -> String {
    "!!!!!".to_string()
}

impl Default for EnrichmentSettings {
    fn default() -> Self {
        Self {
            max_clusters: default_max_clusters(),
            token_limit: default_token_limit(),
            special_separator: default_special_separator(),
        }
    }
}

/// Cluster engine parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterSettings {
    /// Target dimensionality after truncated SVD
    #[serde(default = "default_n_components")]
    pub n_components: usize,

    /// Seed for the randomized SVD
    #[serde(default = "default_random_state")]
    pub random_state: u64,
}

fn default_n_components() -> usize {
    50
}

fn default_random_state() -> u64 {
    1029
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            n_components: default_n_components(),
            random_state: default_random_state(),
        }
    }
}

/// Theme-naming LLM configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    /// API base URL
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,

    /// Model name (also selects the tokenizer)
    #[serde(default = "default_llm_model")]
    pub model: String,

    /// API key (loaded from env var, not stored in config file)
    #[serde(default)]
    pub api_key: Option<String>,

    /// Request timeout in seconds
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,

    /// Maximum attempts per prompt
    #[serde(default = "default_llm_max_retries")]
    pub max_retries: u32,
}

fn default_llm_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_llm_model() -> String {
    "gpt-3.5-turbo".to_string()
}

fn default_llm_timeout_secs() -> u64 {
    60
}

fn default_llm_max_retries() -> u32 {
    3
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            model: default_llm_model(),
            api_key: None,
            timeout_secs: default_llm_timeout_secs(),
            max_retries: default_llm_max_retries(),
        }
    }
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Directory holding per-study variables and cluster files
    #[serde(default = "default_vars_dir")]
    pub vars_dir: String,

    /// Directory holding per-study theme descriptions
    #[serde(default = "default_desc_dir")]
    pub desc_dir: String,

    /// Directory for the embedding memo and downloaded models
    #[serde(default = "default_cache_dir")]
    pub cache_dir: String,

    /// NADA catalog API base URL
    #[serde(default = "default_catalog_url")]
    pub catalog_url: String,

    /// Model id whose tokenizer measures label budgets
    #[serde(default = "default_tokenizer_model")]
    pub tokenizer_model: String,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Embedding configuration
    #[serde(default)]
    pub embedding: EmbeddingSettings,

    /// Enrichment defaults
    #[serde(default)]
    pub enrichment: EnrichmentSettings,

    /// Cluster engine parameters
    #[serde(default)]
    pub cluster: ClusterSettings,

    /// Theme-naming LLM
    #[serde(default)]
    pub llm: LlmSettings,
}

fn data_dir(name: &str) -> String {
    ProjectDirs::from("", "", APP_NAME)
        .map(|p| p.data_local_dir().join(name))
        .unwrap_or_else(|| PathBuf::from("./data").join(name))
        .to_string_lossy()
        .to_string()
}

fn default_vars_dir() -> String {
    data_dir("microdata/variables")
}

fn default_desc_dir() -> String {
    data_dir("microdata/descriptions")
}

fn default_cache_dir() -> String {
    ProjectDirs::from("", "", APP_NAME)
        .map(|p| p.cache_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("./.cache"))
        .to_string_lossy()
        .to_string()
}

fn default_catalog_url() -> String {
    "https://microdata.worldbank.org/index.php/api/catalog".to_string()
}

fn default_tokenizer_model() -> String {
    "gpt-3.5-turbo".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            vars_dir: default_vars_dir(),
            desc_dir: default_desc_dir(),
            cache_dir: default_cache_dir(),
            catalog_url: default_catalog_url(),
            tokenizer_model: default_tokenizer_model(),
            log_level: default_log_level(),
            embedding: EmbeddingSettings::default(),
            enrichment: EnrichmentSettings::default(),
            cluster: ClusterSettings::default(),
            llm: LlmSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings with layered precedence:
    /// 1. Built-in defaults
    /// 2. Config file (~/.config/microdata-themes/config.toml)
    /// 3. CLI-specified config file (optional)
    /// 4. Environment variables (MICRODATA_*)
    ///
    /// CLI flags should be applied by the caller after this returns.
    pub fn load(cli_config_path: Option<&str>) -> Result<Self, MicrodataError> {
        let config_dir = ProjectDirs::from("", "", APP_NAME)
            .map(|p| p.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        let default_config_path = config_dir.join("config");

        let mut builder = Config::builder()
            .set_default("vars_dir", default_vars_dir())
            .map_err(|e| MicrodataError::Config(e.to_string()))?
            .set_default("desc_dir", default_desc_dir())
            .map_err(|e| MicrodataError::Config(e.to_string()))?
            .set_default("cache_dir", default_cache_dir())
            .map_err(|e| MicrodataError::Config(e.to_string()))?
            .set_default("catalog_url", default_catalog_url())
            .map_err(|e| MicrodataError::Config(e.to_string()))?
            .set_default("tokenizer_model", default_tokenizer_model())
            .map_err(|e| MicrodataError::Config(e.to_string()))?
            .set_default("log_level", default_log_level())
            .map_err(|e| MicrodataError::Config(e.to_string()))?
            .add_source(File::with_name(&default_config_path.to_string_lossy()).required(false));

        if let Some(path) = cli_config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // Format: MICRODATA_VARS_DIR, MICRODATA_LLM__MODEL, MICRODATA_EMBEDDING__BACKEND, ...
        builder = builder.add_source(
            Environment::with_prefix("MICRODATA")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .map_err(|e| MicrodataError::Config(e.to_string()))?;

        let settings: Settings = config
            .try_deserialize()
            .map_err(|e| MicrodataError::Config(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate directory settings and numeric bounds.
    pub fn validate(&self) -> Result<(), MicrodataError> {
        for (key, value) in [
            ("vars_dir", &self.vars_dir),
            ("desc_dir", &self.desc_dir),
            ("cache_dir", &self.cache_dir),
        ] {
            if value.trim().is_empty() {
                return Err(MicrodataError::Config(format!("`{key}` is not set")));
            }
            let path = expand_home(value);
            if path.exists() && !path.is_dir() {
                return Err(MicrodataError::Config(format!(
                    "`{key}` points to {path:?}, which is not a directory"
                )));
            }
        }
        if self.enrichment.token_limit == 0 {
            return Err(MicrodataError::Config(
                "enrichment.token_limit must be > 0".to_string(),
            ));
        }
        if self.enrichment.max_clusters == 0 {
            return Err(MicrodataError::Config(
                "enrichment.max_clusters must be > 0".to_string(),
            ));
        }
        if self.cluster.n_components == 0 {
            return Err(MicrodataError::Config(
                "cluster.n_components must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Variables directory with `~` expanded.
    pub fn vars_path(&self) -> PathBuf {
        expand_home(&self.vars_dir)
    }

    /// Descriptions directory with `~` expanded.
    pub fn desc_path(&self) -> PathBuf {
        expand_home(&self.desc_dir)
    }

    /// Cache directory with `~` expanded.
    pub fn cache_path(&self) -> PathBuf {
        expand_home(&self.cache_dir)
    }

    /// Directory holding memoized label embeddings.
    pub fn embedding_cache_path(&self) -> PathBuf {
        self.cache_path().join("embeddings")
    }

    /// Directory holding downloaded model files.
    pub fn model_cache_path(&self) -> PathBuf {
        self.cache_path().join("models")
    }
}

/// Expand a leading `~/` to the user's home directory.
fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = directories::BaseDirs::new().map(|b| b.home_dir().to_path_buf()) {
            return home.join(rest);
        }
    }
    Path::new(path).to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.enrichment.max_clusters, 20);
        assert_eq!(settings.enrichment.token_limit, 500);
        assert_eq!(settings.enrichment.special_separator, "!!!!!");
        assert_eq!(settings.cluster.n_components, 50);
        assert_eq!(settings.cluster.random_state, 1029);
        assert_eq!(settings.embedding.backend, EmbeddingBackendKind::Candle);
        assert!(settings.vars_dir.contains("variables"));
    }

    #[test]
    fn test_default_settings_validate() {
        assert!(Settings::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_dir() {
        let settings = Settings {
            vars_dir: "  ".to_string(),
            ..Default::default()
        };
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("vars_dir"));
    }

    #[test]
    fn test_validate_rejects_file_as_dir() {
        let temp = tempfile::NamedTempFile::new().unwrap();
        let settings = Settings {
            cache_dir: temp.path().to_string_lossy().to_string(),
            ..Default::default()
        };
        assert!(matches!(
            settings.validate(),
            Err(MicrodataError::Config(_))
        ));
    }

    #[test]
    fn test_validate_rejects_zero_token_limit() {
        let mut settings = Settings::default();
        settings.enrichment.token_limit = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_load_with_cli_file() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("themes.toml");
        let vars = temp.path().join("vars");
        std::fs::write(
            &path,
            format!(
                "vars_dir = {:?}\n[enrichment]\ntoken_limit = 250\n[llm]\nmodel = \"gpt-4\"\n",
                vars.to_string_lossy()
            ),
        )
        .unwrap();

        let settings = Settings::load(Some(&path.to_string_lossy())).unwrap();
        assert_eq!(settings.vars_path(), vars);
        assert_eq!(settings.enrichment.token_limit, 250);
        assert_eq!(settings.enrichment.max_clusters, 20);
        assert_eq!(settings.llm.model, "gpt-4");
    }

    #[test]
    fn test_expand_home() {
        let expanded = expand_home("~/microdata");
        assert!(!expanded.to_string_lossy().starts_with('~') || std::env::var("HOME").is_err());
        assert_eq!(expand_home("/tmp/x"), PathBuf::from("/tmp/x"));
    }

    #[test]
    fn test_backend_kind_serde() {
        let kind: EmbeddingBackendKind = serde_json::from_str("\"api\"").unwrap();
        assert_eq!(kind, EmbeddingBackendKind::Api);
    }
}
