//! # microdata-themes
//!
//! Label clustering and theme prompt construction for survey data
//! dictionaries.
//!
//! The pipeline:
//! 1. [`extractor`] groups valid variables under their labels
//! 2. [`enrichment::ThemeEnricher`] decides from a token budget whether the
//!    label set needs splitting, and if so embeds and clusters it
//! 3. [`prompts`] builds one chat prompt per cluster
//! 4. [`theme_llm::ThemeGenerator`] asks an LLM to name the themes of each
//!    cluster and stores the result
//!
//! ## Usage
//!
//! ```rust,ignore
//! use microdata_themes::{DictionarySource, EnrichOptions, ThemeEnricher};
//!
//! let artifact = enricher
//!     .enrich("ETH_2018_ESS_v03_M", DictionarySource::Catalog, &EnrichOptions::default())
//!     .await?;
//! println!("{} clusters", artifact.cluster_count());
//! ```

pub mod cluster;
pub mod config;
pub mod enrichment;
pub mod error;
pub mod extractor;
pub mod prompts;
pub mod quality;
pub mod storage;
pub mod theme_llm;
pub mod tokens;

pub use cluster::{ClusterEngine, ClusterError, ClusterParams, Clusterer, Linkage, Metric};
pub use config::EnrichOptions;
pub use enrichment::{DictionarySource, ThemeEnricher};
pub use error::ThemesError;
pub use extractor::{extract_label_groups, sorted_labels};
pub use prompts::{
    build_prompts, sort_by_token_count_desc, ChatMessage, Role, ThemePrompt,
    DEFAULT_THEME_SYSTEM_MESSAGE,
};
pub use quality::{is_valid_label, is_valid_variable};
pub use storage::ThemeStorage;
pub use theme_llm::{
    parse_theme_response, ApiThemeClient, ApiThemeClientConfig, ClusterThemes, Theme,
    ThemeClient, ThemeDescription, ThemeGenerator,
};
pub use tokens::{TiktokenCounter, TokenCounter};
