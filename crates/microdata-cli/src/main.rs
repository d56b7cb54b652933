//! Survey theme enrichment CLI
//!
//! # Usage
//!
//! ```bash
//! microdata enrich <IDNO> [--dictionary PATH] [--force] [--no-persist]
//! microdata prompts <IDNO> [--save]
//! microdata themes <IDNO>
//! microdata show <IDNO> [--json]
//! microdata clean <IDNO>
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded in order (later sources override earlier):
//! 1. Built-in defaults
//! 2. Config file (~/.config/microdata-themes/config.toml)
//! 3. Environment variables (MICRODATA_*)
//! 4. CLI flags

use anyhow::Result;
use clap::Parser;

use microdata_cli::{
    clean, init_logging, load_settings, run_enrich, run_themes, show_artifact, show_prompts, Cli,
    Commands,
};
use microdata_themes::EnrichOptions;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load_settings(cli.config.as_deref(), cli.log_level.as_deref())?;
    init_logging(&settings)?;

    match cli.command {
        Commands::Enrich {
            idno,
            dictionary,
            force,
            no_persist,
            max_clusters,
            token_limit,
        } => {
            let mut options = EnrichOptions::from(&settings.enrichment)
                .with_force(force)
                .with_persist(!no_persist);
            if let Some(max_clusters) = max_clusters {
                options = options.with_max_clusters(max_clusters);
            }
            if let Some(token_limit) = token_limit {
                options = options.with_token_limit(token_limit);
            }
            run_enrich(&settings, &idno, dictionary, options).await?;
        }
        Commands::Prompts { idno, save } => {
            show_prompts(&settings, &idno, save)?;
        }
        Commands::Themes { idno } => {
            run_themes(&settings, &idno).await?;
        }
        Commands::Show { idno, json } => {
            show_artifact(&settings, &idno, json)?;
        }
        Commands::Clean { idno } => {
            clean(&settings, &idno)?;
        }
    }

    Ok(())
}
