//! recipe-sync core
//!
//! Keeps a selection over a static recipe catalog mirrored in a remote store
//! shared with other clients, and projects it into an exportable snapshot.

pub mod config;
pub mod core_catalog;
pub mod core_export;
pub mod core_selection;
pub mod core_store;
pub mod logging;
pub mod metrics;

pub use config::Config;
pub use core_catalog::{Catalog, Item, ItemId, SubItem, SubItemRef};
pub use core_export::{project, ExportSnapshot};
pub use core_selection::{SelectionSnapshot, SyncEngine, SyncError, SyncHandle, SyncReport};
pub use core_store::{MemorySelectionStore, RestSelectionStore, SelectionRecord, SelectionStore};
pub use logging::{init_logging, LogLevel};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_exports() {
        let _ = LogLevel::Info;
        let _ = Config::default();
        assert!(Catalog::default().is_empty());
    }
}
