//! Enrichment orchestration.
//!
//! Turns a survey's data dictionary into an [`EnrichmentArtifact`]:
//! extract label groups, decide from the token budget whether clustering is
//! needed, embed and cluster the sorted labels when it is, and regroup the
//! label groups by cluster.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use microdata_catalog::CatalogClient;
use microdata_embeddings::LabelEmbedder;
use microdata_types::{ClusterAssignment, ClusterId, DataDictionary, EnrichmentArtifact, LabelGroup};
use serde_json::Value;
use tracing::{debug, info, instrument};

use crate::cluster::Clusterer;
use crate::config::EnrichOptions;
use crate::error::ThemesError;
use crate::extractor::{extract_label_groups, sorted_labels};
use crate::storage::ThemeStorage;
use crate::tokens::TokenCounter;

/// Where the data dictionary for a run comes from.
#[derive(Debug, Clone)]
pub enum DictionarySource {
    /// Local copy if present (and not forced), else the catalog
    Catalog,

    /// A JSON file
    Path(PathBuf),

    /// An already loaded JSON object
    Inline(Value),
}

/// Runs the enrichment pipeline for one survey at a time.
pub struct ThemeEnricher {
    storage: ThemeStorage,
    catalog: Arc<dyn CatalogClient>,
    embedder: LabelEmbedder,
    clusterer: Arc<dyn Clusterer>,
    counter: Arc<dyn TokenCounter>,
}

impl ThemeEnricher {
    pub fn new(
        storage: ThemeStorage,
        catalog: Arc<dyn CatalogClient>,
        embedder: LabelEmbedder,
        clusterer: Arc<dyn Clusterer>,
        counter: Arc<dyn TokenCounter>,
    ) -> Self {
        Self {
            storage,
            catalog,
            embedder,
            clusterer,
            counter,
        }
    }

    pub fn storage(&self) -> &ThemeStorage {
        &self.storage
    }

    pub fn counter(&self) -> &Arc<dyn TokenCounter> {
        &self.counter
    }

    /// Produce the cluster artifact for `idno`.
    ///
    /// For [`DictionarySource::Catalog`], a persisted artifact built with the
    /// same token limit, separator and cluster cap is returned as-is unless
    /// `options.force` is set. Inline and file sources always recompute.
    #[instrument(skip(self, source, options), fields(force = options.force))]
    pub async fn enrich(
        &self,
        idno: &str,
        source: DictionarySource,
        options: &EnrichOptions,
    ) -> Result<EnrichmentArtifact, ThemesError> {
        if options.token_limit == 0 {
            return Err(ThemesError::Config("token_limit must be positive".to_string()));
        }

        if !options.force && matches!(source, DictionarySource::Catalog) {
            if let Some(existing) = self.storage.load_artifact(idno)? {
                if built_with(&existing, options) {
                    info!(idno, clusters = existing.cluster_count(), "Reusing persisted artifact");
                    return Ok(existing);
                }
                debug!(idno, "Persisted artifact built with other parameters, recomputing");
            }
        }

        let dictionary = self.load_dictionary(idno, source, options).await?;
        let groups = extract_label_groups(&dictionary);
        if groups.is_empty() {
            return Err(ThemesError::ClusteringInput(format!(
                "no valid labels in data dictionary for {idno}"
            )));
        }

        let labels = sorted_labels(&groups);
        let len_tokens = self.counter.count(&labels.join(&options.special_separator));

        let cluster = if len_tokens <= options.token_limit {
            debug!(idno, len_tokens, "Labels within token limit, single cluster");
            let mut cluster = ClusterAssignment::new();
            cluster.insert(ClusterId::SINGLE, groups);
            cluster
        } else {
            let n_clusters = options.cluster_count(len_tokens, labels.len());
            info!(
                idno,
                len_tokens,
                labels = labels.len(),
                n_clusters,
                "Clustering labels"
            );
            let embeddings = self.embedder.embed(&labels).await?;
            let assignments = self.clusterer.cluster(&embeddings, n_clusters)?;
            regroup(groups, &assignments)?
        };

        let artifact = EnrichmentArtifact::new(
            idno,
            options.token_limit,
            options.special_separator.as_str(),
            cluster,
        )
        .with_max_clusters(options.max_clusters);

        if options.persist {
            self.storage.save_artifact(&artifact)?;
        }

        info!(idno, clusters = artifact.cluster_count(), "Enrichment complete");
        Ok(artifact)
    }

    /// Resolve `source` to a data dictionary, persisting it when asked.
    pub async fn load_dictionary(
        &self,
        idno: &str,
        source: DictionarySource,
        options: &EnrichOptions,
    ) -> Result<DataDictionary, ThemesError> {
        let value = match source {
            DictionarySource::Inline(value) => {
                if !value.is_object() {
                    return Err(ThemesError::DictionarySource(
                        "inline data dictionary must be a JSON object".to_string(),
                    ));
                }
                value
            }
            DictionarySource::Path(path) => read_dictionary_file(&path)?,
            DictionarySource::Catalog => {
                if !options.force {
                    if let Some(local) = self.storage.load_dictionary(idno)? {
                        debug!(idno, "Using local data dictionary");
                        return Ok(DataDictionary::from_value(local)?);
                    }
                }
                self.catalog.fetch_variables(idno).await?
            }
        };

        let dictionary = DataDictionary::from_value(value.clone())?;
        if options.persist {
            self.storage.save_dictionary(idno, &value)?;
        }
        Ok(dictionary)
    }

    /// The persisted artifact for `idno`.
    pub fn load_artifact(&self, idno: &str) -> Result<EnrichmentArtifact, ThemesError> {
        self.storage
            .load_artifact(idno)?
            .ok_or_else(|| ThemesError::NotFound(format!("no cluster artifact for {idno}")))
    }

    /// Remove persisted state for `idno`.
    pub fn clean(&self, idno: &str) -> Result<Vec<PathBuf>, ThemesError> {
        self.storage.clean(idno)
    }
}

fn built_with(artifact: &EnrichmentArtifact, options: &EnrichOptions) -> bool {
    artifact.token_limit == options.token_limit
        && artifact.special_separator == options.special_separator
        && artifact.max_clusters == Some(options.max_clusters)
}

/// Bucket label groups by assignment. `assignments[i]` is the cluster of the
/// i-th label in sorted order, which is the iteration order of `groups`.
fn regroup(groups: LabelGroup, assignments: &[usize]) -> Result<ClusterAssignment, ThemesError> {
    if assignments.len() != groups.len() {
        return Err(ThemesError::ClusteringInput(format!(
            "clusterer returned {} assignments for {} labels",
            assignments.len(),
            groups.len()
        )));
    }

    let mut cluster = ClusterAssignment::new();
    for ((label, names), &id) in groups.into_iter().zip(assignments) {
        cluster
            .entry(ClusterId::from(id))
            .or_default()
            .insert(label, names);
    }
    Ok(cluster)
}

fn read_dictionary_file(path: &Path) -> Result<Value, ThemesError> {
    let bytes = std::fs::read(path)?;
    let value: Value = serde_json::from_slice(&bytes).map_err(|e| {
        ThemesError::DictionarySource(format!("{}: {}", path.display(), e))
    })?;
    if !value.is_object() {
        return Err(ThemesError::DictionarySource(format!(
            "{}: data dictionary must be a JSON object",
            path.display()
        )));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::ClusterError;
    use async_trait::async_trait;
    use microdata_catalog::CatalogError;
    use microdata_embeddings::{Embedder, Embedding, EmbeddingError, InstructedText, ModelInfo};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct FixedCatalog {
        payload: Value,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CatalogClient for FixedCatalog {
        async fn fetch_variables(&self, _idno: &str) -> Result<Value, CatalogError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.payload.clone())
        }
    }

    struct UnreachableCatalog;

    #[async_trait]
    impl CatalogClient for UnreachableCatalog {
        async fn fetch_variables(&self, _idno: &str) -> Result<Value, CatalogError> {
            Err(CatalogError::Fetch("connection refused".to_string()))
        }
    }

    /// Encodes each text as `[len, 1]`.
    struct LengthEmbedder {
        info: ModelInfo,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Embedder for LengthEmbedder {
        fn info(&self) -> &ModelInfo {
            &self.info
        }

        async fn encode(&self, inputs: &[InstructedText]) -> Result<Vec<Embedding>, EmbeddingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(inputs
                .iter()
                .map(|i| Embedding::from_normalized(vec![i.text.len() as f32, 1.0]))
                .collect())
        }
    }

    /// Round-robin assignment; records the requested cluster counts.
    #[derive(Default)]
    struct RoundRobin {
        requests: Mutex<Vec<usize>>,
    }

    impl Clusterer for RoundRobin {
        fn cluster(&self, embeddings: &[Vec<f32>], n_clusters: usize) -> Result<Vec<usize>, ClusterError> {
            self.requests.lock().unwrap().push(n_clusters);
            Ok((0..embeddings.len()).map(|i| i % n_clusters).collect())
        }
    }

    /// One token per character.
    struct CharCounter;

    impl TokenCounter for CharCounter {
        fn count(&self, text: &str) -> usize {
            text.chars().count()
        }
    }

    struct Harness {
        _temp: TempDir,
        enricher: ThemeEnricher,
        catalog: Arc<FixedCatalog>,
        embedder: Arc<LengthEmbedder>,
        clusterer: Arc<RoundRobin>,
    }

    fn harness(payload: Value) -> Harness {
        harness_with_catalog(payload, None)
    }

    fn harness_with_catalog(payload: Value, catalog: Option<Arc<dyn CatalogClient>>) -> Harness {
        let temp = TempDir::new().unwrap();
        let storage = ThemeStorage::new(temp.path().join("vars"), temp.path().join("desc"));
        let fixed = Arc::new(FixedCatalog {
            payload,
            calls: AtomicUsize::new(0),
        });
        let embedder = Arc::new(LengthEmbedder {
            info: ModelInfo {
                name: "length".to_string(),
                dimension: 2,
                max_sequence_length: 64,
            },
            calls: AtomicUsize::new(0),
        });
        let clusterer = Arc::new(RoundRobin::default());
        let enricher = ThemeEnricher::new(
            storage,
            catalog.unwrap_or_else(|| fixed.clone() as Arc<dyn CatalogClient>),
            LabelEmbedder::new(embedder.clone()),
            clusterer.clone(),
            Arc::new(CharCounter),
        );
        Harness {
            _temp: temp,
            enricher,
            catalog: fixed,
            embedder,
            clusterer,
        }
    }

    fn small_dictionary() -> Value {
        json!({
            "variables": [
                {"name": "v3", "labl": "toilet type"},
                {"name": "v1", "labl": "age"},
                {"name": "v2", "labl": "income"}
            ]
        })
    }

    /// 40 distinct labels of 20 characters each.
    fn large_dictionary() -> Value {
        let variables: Vec<Value> = (0..40)
            .map(|i| json!({"name": format!("q{i:02}"), "labl": format!("survey question {i:04}")}))
            .collect();
        json!({"variables": variables})
    }

    #[tokio::test]
    async fn test_under_budget_is_single_cluster() {
        let h = harness(small_dictionary());
        let artifact = h
            .enricher
            .enrich("S1", DictionarySource::Catalog, &EnrichOptions::default())
            .await
            .unwrap();

        let expected: ClusterAssignment = serde_json::from_value(json!({
            "0": {"age": ["v1"], "income": ["v2"], "toilet type": ["v3"]}
        }))
        .unwrap();
        assert_eq!(artifact.cluster, expected);
        assert_eq!(artifact.token_limit, 500);
        assert_eq!(artifact.special_separator, "!!!!!");
        assert_eq!(h.embedder.calls.load(Ordering::SeqCst), 0);
        assert!(h.clusterer.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_over_budget_clusters_and_partitions() {
        let h = harness(large_dictionary());
        // 40 labels * 20 chars + 39 * 5 separator chars = 995 tokens
        let options = EnrichOptions::default().with_token_limit(200);
        let artifact = h
            .enricher
            .enrich("S1", DictionarySource::Catalog, &options)
            .await
            .unwrap();

        assert_eq!(*h.clusterer.requests.lock().unwrap(), vec![4]);
        assert_eq!(h.embedder.calls.load(Ordering::SeqCst), 1);
        assert_eq!(artifact.cluster_count(), 4);

        let dictionary = DataDictionary::from_value(large_dictionary()).unwrap();
        assert!(artifact.is_partition_of(&extract_label_groups(&dictionary)));

        // Round-robin over sorted labels: cluster 1 starts with the second label
        let first_of_1 = artifact.cluster[&ClusterId(1)].keys().next().unwrap();
        assert_eq!(first_of_1, "survey question 0001");
    }

    #[tokio::test]
    async fn test_cluster_count_floor_of_one() {
        let h = harness(large_dictionary());
        let options = EnrichOptions::default().with_token_limit(990);
        let artifact = h
            .enricher
            .enrich("S1", DictionarySource::Catalog, &options)
            .await
            .unwrap();
        assert_eq!(*h.clusterer.requests.lock().unwrap(), vec![1]);
        assert_eq!(artifact.cluster_count(), 1);
    }

    #[tokio::test]
    async fn test_persisted_artifact_is_reused() {
        let h = harness(large_dictionary());
        let options = EnrichOptions::default().with_token_limit(200);
        let first = h
            .enricher
            .enrich("S1", DictionarySource::Catalog, &options)
            .await
            .unwrap();
        let second = h
            .enricher
            .enrich("S1", DictionarySource::Catalog, &options)
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(h.catalog.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.embedder.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.enricher.load_artifact("S1").unwrap(), first);
    }

    #[tokio::test]
    async fn test_force_recomputes() {
        let h = harness(large_dictionary());
        let options = EnrichOptions::default().with_token_limit(200);
        h.enricher
            .enrich("S1", DictionarySource::Catalog, &options)
            .await
            .unwrap();
        h.enricher
            .enrich("S1", DictionarySource::Catalog, &options.clone().with_force(true))
            .await
            .unwrap();

        assert_eq!(h.catalog.calls.load(Ordering::SeqCst), 2);
        assert_eq!(h.clusterer.requests.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_changed_token_limit_recomputes_from_local_dictionary() {
        let h = harness(large_dictionary());
        h.enricher
            .enrich(
                "S1",
                DictionarySource::Catalog,
                &EnrichOptions::default().with_token_limit(200),
            )
            .await
            .unwrap();
        let artifact = h
            .enricher
            .enrich(
                "S1",
                DictionarySource::Catalog,
                &EnrichOptions::default().with_token_limit(100),
            )
            .await
            .unwrap();

        assert_eq!(artifact.token_limit, 100);
        assert_eq!(artifact.cluster_count(), 9);
        // Dictionary came from the local copy the first run persisted
        assert_eq!(h.catalog.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_lower_max_clusters_recomputes() {
        let h = harness(large_dictionary());
        let wide = h
            .enricher
            .enrich(
                "S1",
                DictionarySource::Catalog,
                &EnrichOptions::default().with_token_limit(100),
            )
            .await
            .unwrap();
        assert_eq!(wide.cluster_count(), 9);
        assert_eq!(wide.max_clusters, Some(20));

        let narrow = h
            .enricher
            .enrich(
                "S1",
                DictionarySource::Catalog,
                &EnrichOptions::default()
                    .with_token_limit(100)
                    .with_max_clusters(2),
            )
            .await
            .unwrap();
        assert!(narrow.cluster_count() <= 2);
        assert_eq!(narrow.max_clusters, Some(2));
        assert_eq!(*h.clusterer.requests.lock().unwrap(), vec![9, 2]);
        assert_eq!(h.enricher.load_artifact("S1").unwrap(), narrow);
    }

    #[tokio::test]
    async fn test_artifact_without_recorded_cap_recomputes() {
        let h = harness(large_dictionary());
        let options = EnrichOptions::default().with_token_limit(200);
        let mut legacy = h
            .enricher
            .enrich("S1", DictionarySource::Catalog, &options)
            .await
            .unwrap();
        legacy.max_clusters = None;
        h.enricher.storage().save_artifact(&legacy).unwrap();

        let rebuilt = h
            .enricher
            .enrich("S1", DictionarySource::Catalog, &options)
            .await
            .unwrap();
        assert_eq!(rebuilt.max_clusters, Some(20));
        assert_eq!(h.clusterer.requests.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_new_inline_dictionary_replaces_previous() {
        let h = harness(json!({}));
        h.enricher
            .enrich(
                "S1",
                DictionarySource::Inline(small_dictionary()),
                &EnrichOptions::default(),
            )
            .await
            .unwrap();

        let replacement = json!({"variables": [{"name": "r1", "labl": "region"}]});
        let artifact = h
            .enricher
            .enrich(
                "S1",
                DictionarySource::Inline(replacement.clone()),
                &EnrichOptions::default(),
            )
            .await
            .unwrap();

        let expected: ClusterAssignment =
            serde_json::from_value(json!({"0": {"region": ["r1"]}})).unwrap();
        assert_eq!(artifact.cluster, expected);
        assert_eq!(
            h.enricher.storage().load_dictionary("S1").unwrap(),
            Some(replacement)
        );
        assert_eq!(h.enricher.load_artifact("S1").unwrap(), artifact);
    }

    #[tokio::test]
    async fn test_dictionary_file_is_always_reread() {
        let h = harness(json!({}));
        let path = h._temp.path().join("dict.json");
        std::fs::write(&path, small_dictionary().to_string()).unwrap();
        h.enricher
            .enrich("S1", DictionarySource::Path(path.clone()), &EnrichOptions::default())
            .await
            .unwrap();

        std::fs::write(
            &path,
            json!({"variables": [{"name": "r1", "labl": "region"}]}).to_string(),
        )
        .unwrap();
        let artifact = h
            .enricher
            .enrich("S1", DictionarySource::Path(path), &EnrichOptions::default())
            .await
            .unwrap();
        assert_eq!(artifact.label_count(), 1);
    }

    #[tokio::test]
    async fn test_no_persist_writes_nothing() {
        let h = harness(small_dictionary());
        let options = EnrichOptions::default().with_persist(false);
        h.enricher
            .enrich("S1", DictionarySource::Catalog, &options)
            .await
            .unwrap();

        assert!(h.enricher.storage().load_artifact("S1").unwrap().is_none());
        assert!(h.enricher.storage().load_dictionary("S1").unwrap().is_none());
        assert!(matches!(
            h.enricher.load_artifact("S1"),
            Err(ThemesError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_inline_dictionary_is_persisted() {
        let h = harness(json!({}));
        h.enricher
            .enrich(
                "S1",
                DictionarySource::Inline(small_dictionary()),
                &EnrichOptions::default(),
            )
            .await
            .unwrap();

        assert_eq!(
            h.enricher.storage().load_dictionary("S1").unwrap(),
            Some(small_dictionary())
        );
        assert_eq!(h.catalog.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_inline_non_object_is_rejected() {
        let h = harness(json!({}));
        let err = h
            .enricher
            .enrich("S1", DictionarySource::Inline(json!([1, 2])), &EnrichOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ThemesError::DictionarySource(_)));
    }

    #[tokio::test]
    async fn test_dictionary_from_file() {
        let h = harness(json!({}));
        let path = h._temp.path().join("dict.json");
        std::fs::write(&path, small_dictionary().to_string()).unwrap();

        let artifact = h
            .enricher
            .enrich("S1", DictionarySource::Path(path), &EnrichOptions::default())
            .await
            .unwrap();
        assert_eq!(artifact.label_count(), 3);
    }

    #[tokio::test]
    async fn test_no_valid_labels_is_error() {
        let h = harness(json!({
            "variables": [
                {"name": "v1", "labl": "  "},
                {"name": "v2", "labl": "(sum) income"},
                {"name": "v3", "labl": "2019"}
            ]
        }));
        let err = h
            .enricher
            .enrich("S1", DictionarySource::Catalog, &EnrichOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ThemesError::ClusteringInput(_)));
    }

    #[tokio::test]
    async fn test_catalog_failure_propagates() {
        let h = harness_with_catalog(json!({}), Some(Arc::new(UnreachableCatalog)));
        let err = h
            .enricher
            .enrich("S1", DictionarySource::Catalog, &EnrichOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ThemesError::Catalog(CatalogError::Fetch(_))));
    }

    #[tokio::test]
    async fn test_variable_order_does_not_matter() {
        let forward = large_dictionary();
        let mut reversed = forward.clone();
        reversed["variables"].as_array_mut().unwrap().reverse();

        let options = EnrichOptions::default()
            .with_token_limit(200)
            .with_persist(false);
        let a = harness(forward)
            .enricher
            .enrich("S1", DictionarySource::Catalog, &options)
            .await
            .unwrap();
        let b = harness(reversed)
            .enricher
            .enrich("S1", DictionarySource::Catalog, &options)
            .await
            .unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_clean_then_reenrich_fetches_again() {
        let h = harness(small_dictionary());
        h.enricher
            .enrich("S1", DictionarySource::Catalog, &EnrichOptions::default())
            .await
            .unwrap();
        let removed = h.enricher.clean("S1").unwrap();
        assert_eq!(removed.len(), 2);

        h.enricher
            .enrich("S1", DictionarySource::Catalog, &EnrichOptions::default())
            .await
            .unwrap();
        assert_eq!(h.catalog.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_regroup_rejects_length_mismatch() {
        let mut groups = LabelGroup::new();
        groups.insert("age".to_string(), vec!["v1".to_string()]);
        assert!(matches!(
            regroup(groups, &[0, 1]),
            Err(ThemesError::ClusteringInput(_))
        ));
    }
}
