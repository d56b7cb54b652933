//! NADA catalog client.

use std::time::Duration;

use async_trait::async_trait;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoffBuilder;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::error::CatalogError;

/// Source of survey data dictionaries.
#[async_trait]
pub trait CatalogClient: Send + Sync {
    /// Fetch the variables payload for `idno` (`{"variables": [...], ...}`).
    async fn fetch_variables(&self, idno: &str) -> Result<Value, CatalogError>;
}

/// Configuration for [`NadaCatalog`].
#[derive(Debug, Clone)]
pub struct NadaCatalogConfig {
    /// Catalog API base (e.g. "https://microdata.worldbank.org/index.php/api/catalog")
    pub catalog_url: String,

    /// Request timeout
    pub timeout: Duration,

    /// Maximum attempts per fetch
    pub max_attempts: u32,

    /// First retry delay
    pub initial_interval: Duration,

    /// Give up once this much time has passed
    pub max_elapsed: Duration,
}

impl NadaCatalogConfig {
    pub fn new(catalog_url: impl Into<String>) -> Self {
        Self {
            catalog_url: catalog_url.into(),
            timeout: Duration::from_secs(30),
            max_attempts: 5,
            initial_interval: Duration::from_millis(500),
            max_elapsed: Duration::from_secs(120),
        }
    }
}

/// HTTP client for the NADA `variables` endpoint.
pub struct NadaCatalog {
    client: Client,
    config: NadaCatalogConfig,
}

impl NadaCatalog {
    pub fn new(config: NadaCatalogConfig) -> Result<Self, CatalogError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| CatalogError::Config(e.to_string()))?;

        Ok(Self { client, config })
    }

    /// URL of the variables listing for `idno`.
    pub fn variables_url(&self, idno: &str) -> String {
        format!(
            "{}/variables/{}",
            self.config.catalog_url.trim_end_matches('/'),
            idno
        )
    }

    async fn request(&self, url: &str, idno: &str) -> Result<Value, CatalogError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| CatalogError::Fetch(e.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND => return Err(CatalogError::NotFound(idno.to_string())),
            StatusCode::TOO_MANY_REQUESTS => {
                return Err(CatalogError::Fetch("HTTP 429 Too Many Requests".to_string()));
            }
            status if status.is_client_error() => {
                return Err(CatalogError::Rejected {
                    status: status.as_u16(),
                });
            }
            status if !status.is_success() => {
                return Err(CatalogError::Fetch(format!("HTTP {}", status)));
            }
            _ => {}
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| CatalogError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl CatalogClient for NadaCatalog {
    async fn fetch_variables(&self, idno: &str) -> Result<Value, CatalogError> {
        let url = self.variables_url(idno);
        let mut backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.config.initial_interval)
            .with_max_elapsed_time(Some(self.config.max_elapsed))
            .build();

        let mut attempts = 0;

        loop {
            attempts += 1;
            debug!(attempt = attempts, url = %url, "Fetching data dictionary");

            match self.request(&url, idno).await {
                Ok(value) => {
                    info!(idno = %idno, attempts, "Fetched data dictionary");
                    return Ok(value);
                }
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) => {
                    if attempts >= self.config.max_attempts {
                        error!(error = %e, attempts, "Max attempts exceeded");
                        return Err(e);
                    }

                    match backoff.next_backoff() {
                        Some(duration) => {
                            warn!(
                                error = %e,
                                retry_in_ms = duration.as_millis(),
                                "Catalog fetch failed, retrying"
                            );
                            tokio::time::sleep(duration).await;
                        }
                        None => {
                            error!(error = %e, "Backoff exhausted");
                            return Err(e);
                        }
                    }
                }
            }
        }
    }
}
