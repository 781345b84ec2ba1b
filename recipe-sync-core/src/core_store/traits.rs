//! Remote Selection Store trait
//!
//! Defines the interface to the durable per-item selection table.

use async_trait::async_trait;

use super::errors::StoreResult;
use super::types::{ChangeSubscription, SelectionRecord};

/// Durable store of selection records, keyed by natural key.
///
/// Implementations must ensure:
/// - `upsert` is idempotent: insert-or-replace on `item_id` as conflict target
/// - `subscribe` delivers insert/update/delete events for the same table,
///   including echoes of this client's own upserts
#[async_trait]
pub trait SelectionStore: Send + Sync {
    /// Point read of every record (startup seed)
    async fn read_all(&self) -> StoreResult<Vec<SelectionRecord>>;

    /// Insert or replace the record for `record.item_id`.
    ///
    /// Returns the row as stored.
    async fn upsert(&self, record: &SelectionRecord) -> StoreResult<SelectionRecord>;

    /// Open a push channel for the table
    async fn subscribe(&self) -> StoreResult<ChangeSubscription>;
}
