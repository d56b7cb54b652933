//! Command-line front end for survey theme enrichment.
//!
//! # Modules
//!
//! - `cli`: Command-line argument parsing with clap
//! - `commands`: Command implementations (enrich, prompts, themes, show, clean)

pub mod cli;
pub mod commands;

pub use cli::{Cli, Commands};
pub use commands::{
    build_enricher, clean, init_logging, load_settings, run_enrich, run_themes, show_artifact,
    show_prompts,
};
