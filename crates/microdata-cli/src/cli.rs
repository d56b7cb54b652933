//! CLI argument parsing.
//!
//! Flags override config file and environment values.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Survey theme enrichment
///
/// Clusters the variable labels of a survey data dictionary and asks an LLM
/// to name the themes of each cluster.
#[derive(Parser, Debug)]
#[command(name = "microdata")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default ~/.config/microdata-themes/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Set log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Cluster a survey's labels and store the artifact
    Enrich {
        /// Study id (idno)
        idno: String,

        /// Read the data dictionary from this JSON file instead of the catalog
        #[arg(short, long)]
        dictionary: Option<PathBuf>,

        /// Recompute even if a stored artifact exists
        #[arg(short, long)]
        force: bool,

        /// Do not write the dictionary or artifact to disk
        #[arg(long)]
        no_persist: bool,

        /// Upper bound on the number of clusters
        #[arg(long)]
        max_clusters: Option<usize>,

        /// Token budget per cluster
        #[arg(long)]
        token_limit: Option<usize>,
    },

    /// Build theme prompts from a stored artifact
    Prompts {
        idno: String,

        /// Write the prompts next to the artifact
        #[arg(long)]
        save: bool,
    },

    /// Generate theme descriptions with the configured LLM
    Themes { idno: String },

    /// Show a stored artifact
    Show {
        idno: String,

        /// Print the artifact as JSON
        #[arg(long)]
        json: bool,
    },

    /// Delete a survey's stored dictionary, artifact and prompts
    Clean { idno: String },
}
