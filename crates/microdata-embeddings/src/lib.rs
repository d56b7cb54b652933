//! # microdata-embeddings
//!
//! Label embeddings for microdata theme clustering.
//!
//! ## Features
//! - `Embedder` capability trait with a closed set of backends
//!   (local Candle BERT model, OpenAI-compatible HTTP endpoint)
//! - Instruction-prefixed label encoding
//! - Content-addressed on-disk memo that survives restarts
//! - Local model directories or HuggingFace repositories, cached on first use

pub mod api;
pub mod backend;
pub mod cache;
pub mod candle;
pub mod error;
pub mod label;
pub mod memo;
pub mod model;

pub use crate::candle::CandleEmbedder;
pub use api::{ApiEmbedder, ApiEmbedderConfig};
pub use backend::build_embedder;
pub use cache::{default_model_cache_dir, resolve_model, ModelFiles, ModelSource};
pub use error::EmbeddingError;
pub use label::{LabelEmbedder, DEFAULT_INSTRUCTION};
pub use memo::EmbeddingMemo;
pub use model::{Embedder, Embedding, InstructedText, ModelInfo};
