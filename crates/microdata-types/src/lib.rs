//! # microdata-types
//!
//! Shared domain types for the microdata theme enrichment pipeline.
//!
//! This crate defines the core data structures used throughout the system:
//! - Data dictionaries: survey variables with their names and labels
//! - Label groups: variable names grouped under an identical label
//! - Enrichment artifacts: the persisted cluster assignment for one survey
//! - Settings: layered configuration
//!
//! ## Usage
//!
//! ```rust
//! use microdata_types::{DataDictionary, LabelGroup};
//!
//! let dictionary: DataDictionary =
//!     serde_json::from_str(r#"{"variables": [{"name": "v1", "labl": "Age"}]}"#).unwrap();
//! assert_eq!(dictionary.variables.len(), 1);
//! let _group = LabelGroup::new();
//! ```

pub mod artifact;
pub mod config;
pub mod dictionary;
pub mod error;

pub use artifact::{ClusterAssignment, ClusterId, EnrichmentArtifact, LabelGroup};
pub use config::{
    ClusterSettings, EmbeddingBackendKind, EmbeddingSettings, EnrichmentSettings, LlmSettings,
    Settings,
};
pub use dictionary::{DataDictionary, Variable};
pub use error::MicrodataError;
