//! Error types for the selection engine

use thiserror::Error;

use crate::core_catalog::{ItemId, SubItemRef};
use crate::core_store::{ChangeOp, RecordError, StoreError};

/// Result type for selection engine operations
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors reported by the selection engine.
///
/// Store-boundary failures (`SeedRead`, `Upsert`, `Subscription`) never abort a
/// reconciliation pass; they are delivered as reports and the selection state
/// keeps its last consistent value.
#[derive(Debug, Clone, Error)]
pub enum SyncError {
    /// Startup read failed; the session starts with an empty selection
    #[error("Seed read failed: {0}")]
    SeedRead(#[source] StoreError),

    /// An upsert was not acknowledged; the optimistic local value is kept
    #[error("Upsert failed for {item}: {source}")]
    Upsert {
        item: ItemId,
        #[source]
        source: StoreError,
    },

    /// Push channel could not be opened or was lost; live sync is off
    #[error("Subscription failed: {0}")]
    Subscription(#[source] StoreError),

    #[error("Unknown item: {0}")]
    UnknownItem(ItemId),

    #[error("Sub-item {sub_item} does not belong to item {item}")]
    UnknownSubItem { item: ItemId, sub_item: SubItemRef },

    #[error("Sync engine is not running")]
    EngineStopped,
}

/// A push event that cannot be applied. Such events are discarded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedEventError {
    #[error("{op} event has an unusable payload: {source}")]
    Payload {
        op: ChangeOp,
        #[source]
        source: RecordError,
    },

    #[error("{op} event references unknown item {item}")]
    UnknownItem { op: ChangeOp, item: ItemId },
}
