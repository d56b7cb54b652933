//! Token counting for label budgets and prompt sizes.

use tiktoken_rs::CoreBPE;
use tracing::debug;

use crate::error::ThemesError;

/// Counts tokens under a target model's tokenizer.
pub trait TokenCounter: Send + Sync {
    /// Number of tokens `text` encodes to.
    fn count(&self, text: &str) -> usize;
}

/// tiktoken-based counter for OpenAI models.
pub struct TiktokenCounter {
    model: String,
    bpe: CoreBPE,
}

impl TiktokenCounter {
    /// Tokenizer for a model id (e.g. "gpt-3.5-turbo", "gpt-4").
    pub fn for_model(model: &str) -> Result<Self, ThemesError> {
        let bpe = tiktoken_rs::get_bpe_from_model(model)
            .map_err(|e| ThemesError::Config(format!("no tokenizer for model `{model}`: {e}")))?;
        debug!(model, "Loaded tokenizer");
        Ok(Self {
            model: model.to_string(),
            bpe,
        })
    }

    /// The cl100k_base encoding, independent of model id.
    pub fn cl100k() -> Result<Self, ThemesError> {
        let bpe = tiktoken_rs::cl100k_base()
            .map_err(|e| ThemesError::Config(format!("cl100k_base unavailable: {e}")))?;
        Ok(Self {
            model: "cl100k_base".to_string(),
            bpe,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

impl TokenCounter for TiktokenCounter {
    fn count(&self, text: &str) -> usize {
        self.bpe.encode_with_special_tokens(text).len()
    }
}
