//! Command implementations.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use microdata_catalog::{NadaCatalog, NadaCatalogConfig};
use microdata_embeddings::{build_embedder, EmbeddingMemo, LabelEmbedder};
use microdata_themes::{
    build_prompts, ApiThemeClient, ApiThemeClientConfig, ClusterEngine, ClusterParams,
    DictionarySource, EnrichOptions, ThemeEnricher, ThemeGenerator, ThemeStorage,
    TiktokenCounter, DEFAULT_THEME_SYSTEM_MESSAGE,
};
use microdata_types::{EnrichmentArtifact, Settings};

/// Load settings and apply the global CLI overrides.
pub fn load_settings(config_path: Option<&str>, log_level: Option<&str>) -> Result<Settings> {
    let mut settings = Settings::load(config_path).context("Failed to load configuration")?;
    if let Some(level) = log_level {
        settings.log_level = level.to_string();
    }
    Ok(settings)
}

/// Install the global tracing subscriber. `RUST_LOG` wins over settings.
pub fn init_logging(settings: &Settings) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&settings.log_level)),
        )
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;
    Ok(())
}

/// Wire the production enricher from settings.
pub fn build_enricher(settings: &Settings) -> Result<ThemeEnricher> {
    let storage = ThemeStorage::from_settings(settings);

    let catalog = NadaCatalog::new(NadaCatalogConfig::new(settings.catalog_url.clone()))
        .context("Failed to create catalog client")?;

    let backend = build_embedder(&settings.embedding, &settings.model_cache_path())
        .context("Failed to load embedding model")?;
    let embedder = LabelEmbedder::new(backend)
        .with_instruction(settings.embedding.instruction.clone())
        .with_memo(EmbeddingMemo::new(settings.embedding_cache_path()));

    let clusterer = ClusterEngine::new(ClusterParams::from(&settings.cluster));
    let counter = TiktokenCounter::for_model(&settings.tokenizer_model)
        .context("Failed to load tokenizer")?;

    Ok(ThemeEnricher::new(
        storage,
        Arc::new(catalog),
        embedder,
        Arc::new(clusterer),
        Arc::new(counter),
    ))
}

/// `enrich`: produce and print the cluster artifact.
pub async fn run_enrich(
    settings: &Settings,
    idno: &str,
    dictionary: Option<PathBuf>,
    options: EnrichOptions,
) -> Result<()> {
    let enricher = build_enricher(settings)?;
    let source = match dictionary {
        Some(path) => DictionarySource::Path(path),
        None => DictionarySource::Catalog,
    };

    let artifact = enricher
        .enrich(idno, source, &options)
        .await
        .with_context(|| format!("Enrichment failed for {idno}"))?;

    print_artifact(&artifact);
    Ok(())
}

/// `prompts`: print (and optionally save) the theme prompts.
pub fn show_prompts(settings: &Settings, idno: &str, save: bool) -> Result<()> {
    let storage = ThemeStorage::from_settings(settings);
    let artifact = load_artifact(&storage, idno)?;
    let counter = TiktokenCounter::for_model(&settings.tokenizer_model)
        .context("Failed to load tokenizer")?;

    let prompts = build_prompts(&artifact, DEFAULT_THEME_SYSTEM_MESSAGE, &counter);
    for prompt in &prompts {
        println!("Cluster {}: {} tokens", prompt.cluster_id, prompt.token_count);
    }

    if save {
        storage.save_prompts(idno, &prompts)?;
        println!("Saved {} prompts to {:?}", prompts.len(), storage.prompt_path(idno)?);
    }
    Ok(())
}

/// `themes`: enrich if needed, then name the themes of every cluster.
pub async fn run_themes(settings: &Settings, idno: &str) -> Result<()> {
    let enricher = build_enricher(settings)?;
    let artifact = enricher
        .enrich(
            idno,
            DictionarySource::Catalog,
            &EnrichOptions::from(&settings.enrichment),
        )
        .await
        .with_context(|| format!("Enrichment failed for {idno}"))?;

    let config = ApiThemeClientConfig::from_settings(&settings.llm)?;
    let client = ApiThemeClient::new(config)?;
    let counter = TiktokenCounter::for_model(&settings.llm.model)
        .context("Failed to load tokenizer for the theme model")?;

    let generator = ThemeGenerator::new(
        Arc::new(client),
        Arc::new(counter),
        enricher.storage().clone(),
    );
    let description = generator.describe(idno, &artifact).await?;

    for cluster in &description.clusters {
        println!("Cluster {}", cluster.cluster_id);
        for theme in &cluster.themes {
            println!("  {} ({} labels)", theme.theme, theme.labels.len());
        }
    }
    info!(path = ?enricher.storage().description_path(idno)?, "Description written");
    Ok(())
}

/// `show`: print a stored artifact, as a summary or as its JSON document.
pub fn show_artifact(settings: &Settings, idno: &str, json: bool) -> Result<()> {
    let storage = ThemeStorage::from_settings(settings);
    let artifact = load_artifact(&storage, idno)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&artifact)?);
    } else {
        print_artifact(&artifact);
    }
    Ok(())
}

/// `clean`: remove stored state for a survey.
pub fn clean(settings: &Settings, idno: &str) -> Result<()> {
    let storage = ThemeStorage::from_settings(settings);
    let removed = storage.clean(idno)?;
    if removed.is_empty() {
        println!("Nothing to clean for {idno}");
    }
    for path in removed {
        println!("Removed {:?}", path);
    }
    Ok(())
}

fn load_artifact(storage: &ThemeStorage, idno: &str) -> Result<EnrichmentArtifact> {
    storage
        .load_artifact(idno)?
        .with_context(|| format!("No artifact for {idno}; run `microdata enrich {idno}` first"))
}

fn print_artifact(artifact: &EnrichmentArtifact) {
    println!(
        "{}: {} labels in {} clusters (token limit {})",
        artifact.idno,
        artifact.label_count(),
        artifact.cluster_count(),
        artifact.token_limit
    );
    for (id, group) in &artifact.cluster {
        let preview: Vec<&str> = group.keys().take(3).map(String::as_str).collect();
        println!("  {:>3}: {:>4} labels  {}", id, group.len(), preview.join(" | "));
    }
}
