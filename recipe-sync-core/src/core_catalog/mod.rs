/*
    core_catalog - Static item catalog

    The catalog is loaded once at startup and is read-only afterwards.
    Handles:
    - Item / SubItem model (with the absent sentinel)
    - Loading the catalog document from a file or URL
*/

pub mod error;
pub mod model;
pub mod provider;

pub use error::{CatalogError, CatalogResult};
pub use model::{Catalog, Item, ItemId, SubItem, SubItemRef};
pub use provider::{provider_for, CatalogProvider, FileCatalogProvider, UrlCatalogProvider};
