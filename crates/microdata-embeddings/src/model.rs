//! The embedding capability.

use async_trait::async_trait;

use crate::error::EmbeddingError;

/// A unit-length label vector.
///
/// All-zero vectors cannot be scaled and are kept as they are.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    /// Scale `values` to unit L2 norm.
    pub fn new(mut values: Vec<f32>) -> Self {
        let norm = values
            .iter()
            .map(|&v| f64::from(v) * f64::from(v))
            .sum::<f64>()
            .sqrt();
        if norm > 0.0 {
            for v in values.iter_mut() {
                *v = (f64::from(*v) / norm) as f32;
            }
        }
        Self { values }
    }

    /// Wrap vectors a backend already normalized.
    pub fn from_normalized(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn dimension(&self) -> usize {
        self.values.len()
    }

    pub fn into_values(self) -> Vec<f32> {
        self.values
    }
}

/// A label together with the instruction that conditions its encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstructedText {
    pub instruction: String,
    pub text: String,
}

impl InstructedText {
    pub fn new(instruction: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            instruction: instruction.into(),
            text: text.into(),
        }
    }

    /// Instruction immediately followed by the text.
    pub fn joined(&self) -> String {
        let mut out = String::with_capacity(self.instruction.len() + self.text.len());
        out.push_str(&self.instruction);
        out.push_str(&self.text);
        out
    }
}

/// What a backend reports about its model.
#[derive(Debug, Clone)]
pub struct ModelInfo {
    /// Memo entries are keyed by this name
    pub name: String,
    pub dimension: usize,
    pub max_sequence_length: usize,
}

/// An embedding backend.
///
/// One handle is built at startup and shared, so implementations are
/// `Send + Sync`. `encode` returns one vector per input, in input order.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn info(&self) -> &ModelInfo;

    async fn encode(&self, inputs: &[InstructedText]) -> Result<Vec<Embedding>, EmbeddingError>;
}
