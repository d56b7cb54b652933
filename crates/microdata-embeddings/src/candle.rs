//! Local sentence encoder on Candle.
//!
//! Runs a BERT-family model on the CPU and mean-pools the last hidden state
//! over non-padding tokens. BERT has no separate instruction channel, so the
//! instruction is prepended to each label.

use std::path::Path;

use async_trait::async_trait;
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config as BertConfig};
use tokenizers::{PaddingParams, PaddingStrategy, Tokenizer, TruncationParams};
use tracing::{debug, info, instrument};

use crate::cache::{default_model_cache_dir, resolve_model, ModelFiles, ModelSource};
use crate::error::EmbeddingError;
use crate::model::{Embedder, Embedding, InstructedText, ModelInfo};

/// Longest tokenized label kept; longer ones are truncated.
pub const MAX_SEQ_LENGTH: usize = 256;

const DEFAULT_BATCH_SIZE: usize = 32;

pub struct CandleEmbedder {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
    info: ModelInfo,
    batch_size: usize,
}

impl CandleEmbedder {
    /// Resolve `source` (downloading into `cache_dir` if needed) and load it.
    pub fn load(source: &ModelSource, cache_dir: &Path) -> Result<Self, EmbeddingError> {
        let files = resolve_model(source, cache_dir)?;
        Self::from_files(&source.name(), &files)
    }

    /// The stock MiniLM encoder in the per-user cache.
    pub fn load_default() -> Result<Self, EmbeddingError> {
        Self::load(
            &ModelSource::parse("sentence-transformers/all-MiniLM-L6-v2"),
            &default_model_cache_dir(),
        )
    }

    #[instrument(skip(files))]
    pub fn from_files(name: &str, files: &ModelFiles) -> Result<Self, EmbeddingError> {
        let device = Device::Cpu;

        let raw_config = std::fs::read_to_string(&files.config)?;
        let config: BertConfig = serde_json::from_str(&raw_config).map_err(|e| {
            EmbeddingError::ModelNotFound(format!("{}: {}", files.config.display(), e))
        })?;
        let dimension = hidden_size(&raw_config)?;

        let mut tokenizer = Tokenizer::from_file(&files.tokenizer)
            .map_err(|e| EmbeddingError::Tokenizer(e.to_string()))?;
        tokenizer.with_padding(Some(PaddingParams {
            strategy: PaddingStrategy::BatchLongest,
            ..Default::default()
        }));
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: MAX_SEQ_LENGTH,
                ..Default::default()
            }))
            .map_err(|e| EmbeddingError::Tokenizer(e.to_string()))?;

        // SAFETY: the weights file is not modified while mapped
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[files.weights.clone()], DType::F32, &device)?
        };
        let model = BertModel::load(vb, &config)?;

        info!(model = name, dimension, "Encoder loaded");
        Ok(Self {
            model,
            tokenizer,
            device,
            info: ModelInfo {
                name: name.to_string(),
                dimension,
                max_sequence_length: MAX_SEQ_LENGTH,
            },
            batch_size: DEFAULT_BATCH_SIZE,
        })
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    fn encode_batch(&self, texts: Vec<String>) -> Result<Vec<Embedding>, EmbeddingError> {
        let encodings = self
            .tokenizer
            .encode_batch(texts, true)
            .map_err(|e| EmbeddingError::Tokenizer(e.to_string()))?;

        let mut ids = Vec::with_capacity(encodings.len());
        let mut masks = Vec::with_capacity(encodings.len());
        for encoding in &encodings {
            ids.push(Tensor::new(encoding.get_ids(), &self.device)?);
            masks.push(Tensor::new(encoding.get_attention_mask(), &self.device)?);
        }
        let input_ids = Tensor::stack(&ids, 0)?;
        let attention_mask = Tensor::stack(&masks, 0)?;
        let token_type_ids = input_ids.zeros_like()?;

        let hidden = self
            .model
            .forward(&input_ids, &token_type_ids, Some(&attention_mask))?;
        let pooled: Vec<Vec<f32>> = mean_pool(&hidden, &attention_mask)?.to_vec2()?;

        Ok(pooled.into_iter().map(Embedding::new).collect())
    }
}

/// Average of token states weighted by the attention mask.
fn mean_pool(hidden: &Tensor, attention_mask: &Tensor) -> candle_core::Result<Tensor> {
    let mask = attention_mask.to_dtype(DType::F32)?.unsqueeze(2)?;
    let summed = hidden.broadcast_mul(&mask)?.sum(1)?;
    let counts = mask.sum(1)?.clamp(1e-9, f64::MAX)?;
    summed.broadcast_div(&counts)
}

fn hidden_size(raw_config: &str) -> Result<usize, EmbeddingError> {
    serde_json::from_str::<serde_json::Value>(raw_config)?
        .get("hidden_size")
        .and_then(serde_json::Value::as_u64)
        .map(|n| n as usize)
        .ok_or_else(|| EmbeddingError::ModelNotFound("config has no hidden_size".to_string()))
}

#[async_trait]
impl Embedder for CandleEmbedder {
    fn info(&self) -> &ModelInfo {
        &self.info
    }

    async fn encode(&self, inputs: &[InstructedText]) -> Result<Vec<Embedding>, EmbeddingError> {
        let mut embeddings = Vec::with_capacity(inputs.len());
        for chunk in inputs.chunks(self.batch_size) {
            debug!(size = chunk.len(), "Encoding batch");
            embeddings.extend(self.encode_batch(chunk.iter().map(InstructedText::joined).collect())?);
        }
        Ok(embeddings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hidden_size() {
        assert_eq!(hidden_size(r#"{"hidden_size": 384}"#).unwrap(), 384);
        assert!(matches!(
            hidden_size(r#"{"vocab_size": 30522}"#),
            Err(EmbeddingError::ModelNotFound(_))
        ));
    }

    #[test]
    fn test_mean_pool_ignores_padding() {
        let device = Device::Cpu;
        // One sequence of three tokens, the last one padding
        let hidden = Tensor::new(&[[[1.0f32, 2.0], [3.0, 4.0], [100.0, 100.0]]], &device).unwrap();
        let mask = Tensor::new(&[[1u32, 1, 0]], &device).unwrap();
        let pooled: Vec<Vec<f32>> = mean_pool(&hidden, &mask).unwrap().to_vec2().unwrap();
        assert_eq!(pooled, vec![vec![2.0, 3.0]]);
    }

    #[tokio::test]
    #[ignore = "requires model download"]
    async fn test_batches_preserve_order() {
        let embedder = CandleEmbedder::load_default().unwrap().with_batch_size(2);
        let inputs: Vec<InstructedText> = ["Age", "Sex", "Income", "Toilet type", "Region"]
            .iter()
            .map(|l| InstructedText::new("", *l))
            .collect();

        let batched = embedder.encode(&inputs).await.unwrap();
        let single = embedder.encode(&inputs[3..4]).await.unwrap();
        assert_eq!(batched.len(), 5);
        assert_eq!(batched[3].dimension(), embedder.info().dimension);
        let diff: f32 = batched[3]
            .values
            .iter()
            .zip(&single[0].values)
            .map(|(a, b)| (a - b).abs())
            .sum();
        assert!(diff < 1e-3);
    }
}
