/*
    core_store - Remote Selection Store

    The durable mirror of the selection, shared with other clients.
    Handles:
    - Selection rows and push-channel event types
    - The store trait (read-all, upsert, subscribe)
    - In-memory and PostgREST adapters
*/

pub mod errors;
pub mod memory;
pub mod rest;
pub mod traits;
pub mod types;

pub use errors::{RecordError, StoreError, StoreResult};
pub use memory::MemorySelectionStore;
pub use rest::{RestSelectionStore, RestStoreConfig};
pub use traits::SelectionStore;
pub use types::{ChangeEvent, ChangeOp, ChangeSubscription, SelectionRecord};
