//! Label groups, cluster assignments and the persisted enrichment artifact.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Variable names grouped under an identical (trimmed) label.
///
/// Keys iterate in sorted order; that order is the one used to embed labels
/// and to regroup cluster results.
pub type LabelGroup = BTreeMap<String, Vec<String>>;

/// Mapping from cluster id to the labels assigned to that cluster.
pub type ClusterAssignment = BTreeMap<ClusterId, LabelGroup>;

/// Identifier of one cluster within an artifact.
///
/// Serialized as a decimal string (`"0"`, `"1"`, ...) so it can be used as a
/// JSON object key, and ordered numerically so `"10"` sorts after `"9"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ClusterId(pub u32);

impl ClusterId {
    /// The id used when no clustering was needed.
    pub const SINGLE: ClusterId = ClusterId(0);
}

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ClusterId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(ClusterId)
    }
}

impl From<usize> for ClusterId {
    fn from(value: usize) -> Self {
        ClusterId(value as u32)
    }
}

impl Serialize for ClusterId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ClusterId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// The persisted result of enriching one survey.
///
/// JSON layout:
/// `{"idno", "token_limit", "special_sep", "max_clusters", "cluster": {"<id>": {"<label>": ["<name>", ...]}}}`
///
/// `max_clusters` is absent from artifacts written before it was recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichmentArtifact {
    /// Study identifier owning this artifact
    pub idno: String,

    /// Token budget that drove the clustering decision
    pub token_limit: usize,

    /// Separator used to join labels for token counting and prompts
    #[serde(rename = "special_sep", alias = "special_separator")]
    pub special_separator: String,

    /// Cluster cap in force when the artifact was built
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_clusters: Option<usize>,

    /// Cluster id -> label group
    pub cluster: ClusterAssignment,
}

impl EnrichmentArtifact {
    /// Create a new artifact.
    pub fn new(
        idno: impl Into<String>,
        token_limit: usize,
        special_separator: impl Into<String>,
        cluster: ClusterAssignment,
    ) -> Self {
        Self {
            idno: idno.into(),
            token_limit,
            special_separator: special_separator.into(),
            max_clusters: None,
            cluster,
        }
    }

    pub fn with_max_clusters(mut self, max_clusters: usize) -> Self {
        self.max_clusters = Some(max_clusters);
        self
    }

    /// Number of clusters.
    pub fn cluster_count(&self) -> usize {
        self.cluster.len()
    }

    /// All labels across clusters, in cluster then label order.
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.cluster.values().flat_map(|g| g.keys().map(String::as_str))
    }

    /// Total number of labels across clusters.
    pub fn label_count(&self) -> usize {
        self.cluster.values().map(BTreeMap::len).sum()
    }

    /// Whether the clusters partition `group` exactly: every label appears
    /// in exactly one cluster, with its variable names unchanged.
    pub fn is_partition_of(&self, group: &LabelGroup) -> bool {
        let mut seen = BTreeSet::new();
        for bucket in self.cluster.values() {
            for (label, names) in bucket {
                if !seen.insert(label.as_str()) {
                    return false;
                }
                if group.get(label) != Some(names) {
                    return false;
                }
            }
        }
        seen.len() == group.len()
    }
}
