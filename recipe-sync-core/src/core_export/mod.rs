/*
    core_export - Export Projector

    Derives the downloadable snapshot of the catalog restricted to the current
    selection, and writes it out as `selected_recipes.json`.
*/

pub mod projector;
pub mod sink;

pub use projector::{project, ExportSnapshot};
pub use sink::{render_json, write_export, ExportError, ExportResult, EXPORT_FILE_NAME};
