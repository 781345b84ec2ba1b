//! Catalog Provider
//!
//! One-shot loaders for the static catalog document.

use async_trait::async_trait;
use std::path::PathBuf;
use tracing::{debug, info};

use super::error::{CatalogError, CatalogResult};
use super::model::Catalog;

/// Supplies the catalog once at startup.
#[async_trait]
pub trait CatalogProvider: Send + Sync {
    async fn load(&self) -> CatalogResult<Catalog>;
}

/// Loads the catalog from a JSON file on disk
pub struct FileCatalogProvider {
    path: PathBuf,
}

impl FileCatalogProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl CatalogProvider for FileCatalogProvider {
    async fn load(&self) -> CatalogResult<Catalog> {
        debug!(path = ?self.path, "Reading catalog file");
        let contents = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| CatalogError::Io {
                path: self.path.clone(),
                source,
            })?;

        let catalog = Catalog::from_json_str(&contents)?;
        info!(items = catalog.len(), "Catalog loaded");
        Ok(catalog)
    }
}

/// Fetches the catalog document over HTTP
pub struct UrlCatalogProvider {
    url: String,
    client: reqwest::Client,
}

impl UrlCatalogProvider {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::new(),
        }
    }

    fn fetch_error(&self, reason: impl ToString) -> CatalogError {
        CatalogError::Fetch {
            url: self.url.clone(),
            reason: reason.to_string(),
        }
    }
}

#[async_trait]
impl CatalogProvider for UrlCatalogProvider {
    async fn load(&self) -> CatalogResult<Catalog> {
        debug!(url = %self.url, "Fetching catalog");
        let resp = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| self.fetch_error(e))?;

        if !resp.status().is_success() {
            return Err(self.fetch_error(format!("status {}", resp.status())));
        }

        let body = resp.text().await.map_err(|e| self.fetch_error(e))?;
        let catalog = Catalog::from_json_str(&body)?;
        info!(items = catalog.len(), "Catalog fetched");
        Ok(catalog)
    }
}

/// Pick a provider for a catalog location: `http(s)://` URLs are fetched,
/// anything else is read as a file path.
pub fn provider_for(location: &str) -> Box<dyn CatalogProvider> {
    if location.starts_with("http://") || location.starts_with("https://") {
        Box::new(UrlCatalogProvider::new(location))
    } else {
        Box::new(FileCatalogProvider::new(location))
    }
}
