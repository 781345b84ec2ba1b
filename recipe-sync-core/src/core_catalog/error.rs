//! Catalog load errors
//!
//! Any of these is fatal to startup: no selection is possible without a catalog.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Failed to read catalog file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to fetch catalog from {url}: {reason}")]
    Fetch { url: String, reason: String },

    #[error("Failed to parse catalog: {0}")]
    Parse(String),
}

impl From<serde_json::Error> for CatalogError {
    fn from(err: serde_json::Error) -> Self {
        CatalogError::Parse(err.to_string())
    }
}

/// Result type for catalog operations
pub type CatalogResult<T> = Result<T, CatalogError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: CatalogError = json_err.into();
        assert!(matches!(err, CatalogError::Parse(_)));
        assert!(err.to_string().starts_with("Failed to parse catalog"));
    }

    #[test]
    fn test_fetch_error_display() {
        let err = CatalogError::Fetch {
            url: "http://localhost/recipes.json".to_string(),
            reason: "status 404".to_string(),
        };
        assert!(err.to_string().contains("recipes.json"));
        assert!(err.to_string().contains("404"));
    }
}
