//! End-to-end test infrastructure for microdata theme enrichment.
//!
//! Provides a shared TestHarness with an in-memory catalog and a
//! deterministic keyword embedder, wired to the real cluster engine,
//! tokenizer, embedding memo and file storage.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use microdata_catalog::{CatalogClient, CatalogError};
use microdata_embeddings::{
    Embedder, Embedding, EmbeddingError, EmbeddingMemo, InstructedText, LabelEmbedder, ModelInfo,
};
use microdata_themes::{ClusterEngine, ClusterParams, ThemeEnricher, ThemeStorage, TiktokenCounter};

/// Keyword families used by the synthetic household survey.
pub const FAMILIES: [(&str, &[&str]); 3] = [
    ("demographics", &["age", "sex", "member", "relationship"]),
    ("agriculture", &["crop", "plot", "harvest", "seed"]),
    ("housing", &["toilet", "roof", "dwelling", "water"]),
];

/// Catalog backed by a map of study id to variables payload.
#[derive(Default)]
pub struct MapCatalog {
    surveys: Mutex<HashMap<String, Value>>,
    calls: AtomicUsize,
}

impl MapCatalog {
    pub fn insert(&self, idno: &str, payload: Value) {
        self.surveys
            .lock()
            .expect("catalog lock poisoned")
            .insert(idno.to_string(), payload);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CatalogClient for MapCatalog {
    async fn fetch_variables(&self, idno: &str) -> Result<Value, CatalogError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.surveys
            .lock()
            .expect("catalog lock poisoned")
            .get(idno)
            .cloned()
            .ok_or_else(|| CatalogError::NotFound(idno.to_string()))
    }
}

/// Embeds a label as one-hot family indicators plus small deterministic
/// jitter, so labels of one family sit close together.
pub struct KeywordEmbedder {
    info: ModelInfo,
    calls: AtomicUsize,
}

const JITTER_DIMS: usize = 8;

impl KeywordEmbedder {
    pub fn new() -> Self {
        Self {
            info: ModelInfo {
                name: "keyword-test".to_string(),
                dimension: FAMILIES.len() + JITTER_DIMS,
                max_sequence_length: 256,
            },
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn vector(text: &str) -> Vec<f32> {
        let lower = text.to_lowercase();
        let mut values = vec![0.0f32; FAMILIES.len() + JITTER_DIMS];
        for (i, (_, keywords)) in FAMILIES.iter().enumerate() {
            if keywords.iter().any(|k| lower.contains(k)) {
                values[i] = 1.0;
            }
        }
        let seed: usize = text.bytes().map(usize::from).sum();
        for d in 0..JITTER_DIMS {
            values[FAMILIES.len() + d] = ((seed * (d + 3)) % 11) as f32 * 0.005;
        }
        values
    }
}

impl Default for KeywordEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Embedder for KeywordEmbedder {
    fn info(&self) -> &ModelInfo {
        &self.info
    }

    async fn encode(&self, inputs: &[InstructedText]) -> Result<Vec<Embedding>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(inputs.iter().map(|i| Embedding::new(Self::vector(&i.text))).collect())
    }
}

/// Shared test harness for E2E tests.
pub struct TestHarness {
    /// Keeps temp dir alive for the lifetime of the harness
    pub _temp_dir: tempfile::TempDir,
    pub storage: ThemeStorage,
    pub memo_dir: PathBuf,
    pub catalog: Arc<MapCatalog>,
    pub embedder: Arc<KeywordEmbedder>,
}

impl TestHarness {
    pub fn new() -> Self {
        let temp_dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        let storage = ThemeStorage::new(
            temp_dir.path().join("variables"),
            temp_dir.path().join("descriptions"),
        );
        let memo_dir = temp_dir.path().join("cache/embeddings");

        Self {
            _temp_dir: temp_dir,
            storage,
            memo_dir,
            catalog: Arc::new(MapCatalog::default()),
            embedder: Arc::new(KeywordEmbedder::new()),
        }
    }

    /// Enricher over the harness collaborators with default cluster params.
    pub fn enricher(&self) -> ThemeEnricher {
        self.enricher_with(ClusterParams::default())
    }

    pub fn enricher_with(&self, params: ClusterParams) -> ThemeEnricher {
        let counter =
            TiktokenCounter::for_model("gpt-3.5-turbo").expect("Failed to load tokenizer");
        let embedder = LabelEmbedder::new(self.embedder.clone())
            .with_memo(EmbeddingMemo::new(&self.memo_dir));
        ThemeEnricher::new(
            self.storage.clone(),
            self.catalog.clone(),
            embedder,
            Arc::new(ClusterEngine::new(params)),
            Arc::new(counter),
        )
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Family a label belongs to, by keyword.
pub fn family_of(label: &str) -> Option<&'static str> {
    let lower = label.to_lowercase();
    FAMILIES
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| lower.contains(k)))
        .map(|(name, _)| *name)
}

/// A variables payload for `labels`, named `v0, v1, ...`.
pub fn dictionary(labels: &[&str]) -> Value {
    let variables: Vec<Value> = labels
        .iter()
        .enumerate()
        .map(|(i, label)| json!({"vid": format!("V{i}"), "name": format!("v{i}"), "labl": label}))
        .collect();
    json!({"total": labels.len(), "variables": variables})
}

/// The three-label survey from the enrichment contract.
pub fn small_survey() -> Value {
    json!({
        "variables": [
            {"name": "v1", "labl": "age"},
            {"name": "v2", "labl": "income"},
            {"name": "v3", "labl": "toilet type"}
        ]
    })
}

/// 20 labels per family, interleaved, plus a few invalid variables.
pub fn household_survey() -> Value {
    let mut labels: Vec<String> = Vec::new();
    for i in 0..20 {
        labels.push(format!("age of household member number {i}"));
        labels.push(format!("crop planted on plot number {i}"));
        labels.push(format!("main roof material of dwelling number {i}"));
    }
    labels.push("(sum) crop value".to_string());
    labels.push("2019".to_string());
    labels.push("   ".to_string());
    let refs: Vec<&str> = labels.iter().map(String::as_str).collect();
    dictionary(&refs)
}
