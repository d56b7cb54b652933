//! # microdata-catalog
//!
//! Fetches survey data dictionaries from a NADA microdata catalog.
//!
//! The fetch is a blocking point of the enrichment pipeline: transient
//! failures are retried with exponential backoff up to a fixed attempt
//! ceiling, then surfaced to the caller.

pub mod client;
pub mod error;

pub use client::{CatalogClient, NadaCatalog, NadaCatalogConfig};
pub use error::CatalogError;
