//! Enrichment options.

use microdata_types::EnrichmentSettings;
use serde::{Deserialize, Serialize};

/// Options for one enrichment run.
///
/// Missing fields take the [`EnrichmentSettings`] defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EnrichOptions {
    /// Upper bound on the number of clusters
    pub max_clusters: usize,

    /// Token budget; label sets at or under it are not clustered
    pub token_limit: usize,

    /// Separator joining labels for token counting and prompts
    pub special_separator: String,

    /// Write the data dictionary and artifact to disk
    pub persist: bool,

    /// Recompute even if persisted state exists
    pub force: bool,
}

impl Default for EnrichOptions {
    fn default() -> Self {
        Self::from(&EnrichmentSettings::default())
    }
}

impl From<&EnrichmentSettings> for EnrichOptions {
    fn from(settings: &EnrichmentSettings) -> Self {
        Self {
            max_clusters: settings.max_clusters,
            token_limit: settings.token_limit,
            special_separator: settings.special_separator.clone(),
            persist: true,
            force: false,
        }
    }
}

impl EnrichOptions {
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn with_persist(mut self, persist: bool) -> Self {
        self.persist = persist;
        self
    }

    pub fn with_token_limit(mut self, token_limit: usize) -> Self {
        self.token_limit = token_limit;
        self
    }

    pub fn with_max_clusters(mut self, max_clusters: usize) -> Self {
        self.max_clusters = max_clusters;
        self
    }

    /// Number of clusters for a label set of `len_tokens` tokens and
    /// `n_labels` distinct labels, when over budget.
    ///
    /// `min(max_clusters, len_tokens / token_limit)`, floored at 1 and capped
    /// at the number of labels.
    pub fn cluster_count(&self, len_tokens: usize, n_labels: usize) -> usize {
        let by_budget = len_tokens / self.token_limit.max(1);
        self.max_clusters.min(by_budget).max(1).min(n_labels.max(1))
    }
}
