//! Label embedding with instruction prefix and memoization.

use std::sync::Arc;

use tracing::{debug, info, instrument};

use crate::error::EmbeddingError;
use crate::memo::EmbeddingMemo;
use crate::model::{Embedder, InstructedText};

/// Instruction used to condition label encodings for clustering.
pub const DEFAULT_INSTRUCTION: &str = "Represent the survey variable label for clustering; Input: ";

/// Maps a sorted, deduplicated label list to index-aligned vectors.
pub struct LabelEmbedder {
    embedder: Arc<dyn Embedder>,
    memo: Option<EmbeddingMemo>,
    instruction: String,
}

impl LabelEmbedder {
    /// Create a label embedder without a memo.
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            memo: None,
            instruction: DEFAULT_INSTRUCTION.to_string(),
        }
    }

    /// Memoize results in `memo`.
    pub fn with_memo(mut self, memo: EmbeddingMemo) -> Self {
        self.memo = Some(memo);
        self
    }

    /// Replace the instruction prefix.
    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = instruction.into();
        self
    }

    pub fn instruction(&self) -> &str {
        &self.instruction
    }

    /// Embed `labels`, which must be strictly ascending (sorted, no duplicates).
    ///
    /// Backend failures propagate unchanged; nothing is retried here.
    #[instrument(skip(self, labels), fields(count = labels.len()))]
    pub async fn embed(&self, labels: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if let Some(pos) = labels.windows(2).position(|w| w[0] >= w[1]) {
            return Err(EmbeddingError::InvalidInput(format!(
                "labels must be sorted and unique; {:?} precedes {:?}",
                labels[pos],
                labels[pos + 1]
            )));
        }
        if labels.is_empty() {
            return Ok(vec![]);
        }

        let model = self.embedder.info().name.clone();
        let key = EmbeddingMemo::key(&model, &self.instruction, labels);

        if let Some(memo) = &self.memo {
            if let Some(vectors) = memo.get(&key, labels.len()) {
                return Ok(vectors);
            }
        }

        info!(model = %model, count = labels.len(), "Encoding labels");
        let inputs: Vec<InstructedText> = labels
            .iter()
            .map(|label| InstructedText::new(self.instruction.as_str(), label.as_str()))
            .collect();

        let embeddings = self.embedder.encode(&inputs).await?;
        if embeddings.len() != labels.len() {
            return Err(EmbeddingError::InvalidInput(format!(
                "embedder returned {} vectors for {} labels",
                embeddings.len(),
                labels.len()
            )));
        }

        let vectors: Vec<Vec<f32>> = embeddings.into_iter().map(|e| e.into_values()).collect();

        if let Some(memo) = &self.memo {
            memo.put(&key, &model, &vectors)?;
            debug!(key = %key, "Memoized label embeddings");
        }

        Ok(vectors)
    }
}
