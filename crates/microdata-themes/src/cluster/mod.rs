//! Cluster engine: dimensionality reduction followed by hierarchical
//! agglomerative clustering.
//!
//! Given n embedding rows and a target cluster count k, the engine projects
//! the rows with a seeded randomized truncated SVD and partitions the
//! projection with Ward linkage (by default). Labels are contiguous
//! integers `0..k`, numbered in order of first appearance, so the output is
//! a deterministic function of the rows, k and [`ClusterParams`].

mod agglomerative;
mod svd;

use microdata_types::ClusterSettings;
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument};

pub use agglomerative::agglomerative;
pub use svd::truncated_svd;

/// Errors from the cluster engine.
#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("Invalid clustering input: {0}")]
    InvalidInput(String),

    #[error("Invalid clustering parameters: {0}")]
    InvalidParams(String),
}

/// Distance between projected rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    #[default]
    Euclidean,
    Manhattan,
    Cosine,
}

impl Metric {
    pub fn distance(&self, a: &[f64], b: &[f64]) -> f64 {
        match self {
            Metric::Euclidean => a
                .iter()
                .zip(b)
                .map(|(x, y)| (x - y) * (x - y))
                .sum::<f64>()
                .sqrt(),
            Metric::Manhattan => a.iter().zip(b).map(|(x, y)| (x - y).abs()).sum(),
            Metric::Cosine => {
                let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
                let na: f64 = a.iter().map(|x| x * x).sum::<f64>().sqrt();
                let nb: f64 = b.iter().map(|x| x * x).sum::<f64>().sqrt();
                if na == 0.0 || nb == 0.0 {
                    1.0
                } else {
                    1.0 - dot / (na * nb)
                }
            }
        }
    }
}

/// Merge criterion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Linkage {
    #[default]
    Ward,
    Complete,
    Average,
    Single,
}

/// Engine parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterParams {
    /// Target dimensionality of the projection
    pub n_components: usize,

    /// Seed for the SVD range finder
    pub random_state: u64,

    pub metric: Metric,

    pub linkage: Linkage,
}

impl Default for ClusterParams {
    fn default() -> Self {
        Self {
            n_components: 50,
            random_state: 1029,
            metric: Metric::Euclidean,
            linkage: Linkage::Ward,
        }
    }
}

impl From<&ClusterSettings> for ClusterParams {
    fn from(settings: &ClusterSettings) -> Self {
        Self {
            n_components: settings.n_components,
            random_state: settings.random_state,
            ..Default::default()
        }
    }
}

/// Partitions embedding rows into a fixed number of groups.
pub trait Clusterer: Send + Sync {
    /// Label each row with a cluster id in `0..n_clusters`.
    fn cluster(&self, embeddings: &[Vec<f32>], n_clusters: usize) -> Result<Vec<usize>, ClusterError>;
}

/// Truncated SVD followed by agglomerative clustering.
#[derive(Debug, Clone, Default)]
pub struct ClusterEngine {
    params: ClusterParams,
}

impl ClusterEngine {
    pub fn new(params: ClusterParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &ClusterParams {
        &self.params
    }
}

impl Clusterer for ClusterEngine {
    #[instrument(skip(self, embeddings), fields(rows = embeddings.len()))]
    fn cluster(&self, embeddings: &[Vec<f32>], n_clusters: usize) -> Result<Vec<usize>, ClusterError> {
        let n = embeddings.len();
        if n == 0 {
            return Err(ClusterError::InvalidInput("no embeddings".to_string()));
        }
        if n_clusters == 0 || n_clusters > n {
            return Err(ClusterError::InvalidInput(format!(
                "n_clusters must be in 1..={}, got {}",
                n, n_clusters
            )));
        }
        if self.params.n_components == 0 {
            return Err(ClusterError::InvalidParams("n_components must be positive".to_string()));
        }

        let data = to_matrix(embeddings)?;
        let reduced = truncated_svd(&data, self.params.n_components, self.params.random_state)?;
        debug!(
            from = data.ncols(),
            to = reduced.ncols(),
            "Reduced embedding dimensionality"
        );

        let rows: Vec<Vec<f64>> = reduced
            .row_iter()
            .map(|row| row.iter().copied().collect())
            .collect();
        agglomerative(
            &rows,
            n_clusters,
            self.params.metric,
            self.params.linkage,
        )
    }
}

/// Rows as an n x d matrix; rows must share a nonzero width and be finite.
fn to_matrix(embeddings: &[Vec<f32>]) -> Result<DMatrix<f64>, ClusterError> {
    let d = embeddings.first().map_or(0, Vec::len);
    if d == 0 {
        return Err(ClusterError::InvalidInput("embeddings have dimension 0".to_string()));
    }
    if let Some((i, row)) = embeddings.iter().enumerate().find(|(_, r)| r.len() != d) {
        return Err(ClusterError::InvalidInput(format!(
            "row {} has dimension {}, expected {}",
            i,
            row.len(),
            d
        )));
    }
    if embeddings.iter().flatten().any(|v| !v.is_finite()) {
        return Err(ClusterError::InvalidInput("embeddings contain non-finite values".to_string()));
    }
    Ok(DMatrix::from_fn(embeddings.len(), d, |i, j| f64::from(embeddings[i][j])))
}
