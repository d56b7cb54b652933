//! Hierarchical agglomerative clustering.
//!
//! Builds the full dendrogram with `kodama` over a condensed distance matrix
//! and cuts it at `n_clusters` by replaying the lowest merges.

use kodama::{linkage, Method, Step};

use super::{ClusterError, Linkage, Metric};

impl From<Linkage> for Method {
    fn from(linkage: Linkage) -> Self {
        match linkage {
            Linkage::Ward => Method::Ward,
            Linkage::Complete => Method::Complete,
            Linkage::Average => Method::Average,
            Linkage::Single => Method::Single,
        }
    }
}

/// Assign each point to one of `n_clusters` flat clusters.
///
/// Labels are contiguous from 0, numbered in order of first appearance.
/// Ward linkage requires the Euclidean metric.
pub fn agglomerative(
    points: &[Vec<f64>],
    n_clusters: usize,
    metric: Metric,
    linkage_kind: Linkage,
) -> Result<Vec<usize>, ClusterError> {
    let n = points.len();
    if n == 0 {
        return Err(ClusterError::InvalidInput("no points to cluster".to_string()));
    }
    if n_clusters == 0 || n_clusters > n {
        return Err(ClusterError::InvalidInput(format!(
            "n_clusters must be in 1..={}, got {}",
            n, n_clusters
        )));
    }
    if linkage_kind == Linkage::Ward && metric != Metric::Euclidean {
        return Err(ClusterError::InvalidParams(format!(
            "ward linkage requires euclidean metric, got {:?}",
            metric
        )));
    }

    if n_clusters == n {
        return Ok((0..n).collect());
    }
    if n_clusters == 1 {
        return Ok(vec![0; n]);
    }

    // Upper triangle, row by row
    let mut condensed = Vec::with_capacity(n * (n - 1) / 2);
    for i in 0..n {
        for j in (i + 1)..n {
            condensed.push(metric.distance(&points[i], &points[j]));
        }
    }

    let dendrogram = linkage(&mut condensed, n, linkage_kind.into());
    Ok(cut(dendrogram.steps(), n, n_clusters))
}

/// Flat labels after the first `n - n_clusters` merges.
///
/// Steps are in ascending dissimilarity order and step `i` creates cluster
/// `n + i`.
fn cut(steps: &[Step<f64>], n: usize, n_clusters: usize) -> Vec<usize> {
    let mut parent: Vec<usize> = (0..n + steps.len()).collect();
    for (i, step) in steps.iter().take(n - n_clusters).enumerate() {
        parent[step.cluster1] = n + i;
        parent[step.cluster2] = n + i;
    }

    let mut root_label: Vec<Option<usize>> = vec![None; parent.len()];
    let mut next = 0;
    (0..n)
        .map(|i| {
            let mut root = i;
            while parent[root] != root {
                root = parent[root];
            }
            *root_label[root].get_or_insert_with(|| {
                next += 1;
                next - 1
            })
        })
        .collect()
}
