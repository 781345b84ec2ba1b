//! Export sink
//!
//! Serializes an [`ExportSnapshot`] as a UTF-8 JSON document and writes it
//! to disk under the download name.

use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

use super::projector::ExportSnapshot;

/// Name of the downloadable artifact
pub const EXPORT_FILE_NAME: &str = "selected_recipes.json";

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Failed to serialize export: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Failed to write export to {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type ExportResult<T> = Result<T, ExportError>;

/// Render the snapshot as JSON text
pub fn render_json(snapshot: &ExportSnapshot, pretty: bool) -> ExportResult<String> {
    let json = if pretty {
        serde_json::to_string_pretty(snapshot)?
    } else {
        serde_json::to_string(snapshot)?
    };
    Ok(json)
}

/// Write the snapshot to `path`. A directory path gets `selected_recipes.json`
/// appended. Returns the file actually written.
pub async fn write_export(
    snapshot: &ExportSnapshot,
    path: impl AsRef<Path>,
    pretty: bool,
) -> ExportResult<PathBuf> {
    let mut target = path.as_ref().to_path_buf();
    if tokio::fs::metadata(&target)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false)
    {
        target.push(EXPORT_FILE_NAME);
    }

    let json = render_json(snapshot, pretty)?;
    tokio::fs::write(&target, json)
        .await
        .map_err(|source| ExportError::Io {
            path: target.clone(),
            source,
        })?;

    info!(path = ?target, items = snapshot.len(), "Export written");
    Ok(target)
}
