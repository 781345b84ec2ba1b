/*
    memory.rs - In-process selection store

    Keeps the selection table in memory and fans change events out to every
    live subscription. Also stands in for "other clients" in tests:
    - external deletes and raw event injection
    - failure injection for reads, upserts and subscribe
    - a read gate to hold the seed read open
*/

use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tracing::debug;

use super::errors::{StoreError, StoreResult};
use super::traits::SelectionStore;
use super::types::{ChangeEvent, ChangeOp, ChangeSubscription, SelectionRecord};
use crate::core_catalog::ItemId;

const SUBSCRIPTION_BUFFER: usize = 256;

#[derive(Debug, Default)]
struct Faults {
    fail_reads: bool,
    fail_subscribe: bool,
    failing_upserts: usize,
}

/// In-memory selection table with a broadcast push channel
pub struct MemorySelectionStore {
    rows: RwLock<BTreeMap<ItemId, SelectionRecord>>,
    subscribers: Mutex<Vec<mpsc::Sender<ChangeEvent>>>,
    faults: Mutex<Faults>,
    read_gate: watch::Sender<bool>,
    upserts: Mutex<Vec<SelectionRecord>>,
}

impl Default for MemorySelectionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySelectionStore {
    pub fn new() -> Self {
        Self::with_rows(Vec::new())
    }

    /// Create a store pre-populated with rows (no events are emitted)
    pub fn with_rows(rows: impl IntoIterator<Item = SelectionRecord>) -> Self {
        let table = rows
            .into_iter()
            .map(|row| (row.item_id.clone(), row))
            .collect();
        let (read_gate, _) = watch::channel(true);

        Self {
            rows: RwLock::new(table),
            subscribers: Mutex::new(Vec::new()),
            faults: Mutex::new(Faults::default()),
            read_gate,
            upserts: Mutex::new(Vec::new()),
        }
    }

    /// Current table contents
    pub async fn rows(&self) -> BTreeMap<ItemId, SelectionRecord> {
        self.rows.read().await.clone()
    }

    pub async fn get(&self, item_id: &str) -> Option<SelectionRecord> {
        self.rows.read().await.get(item_id).cloned()
    }

    /// Every upsert accepted so far, in arrival order
    pub async fn upsert_log(&self) -> Vec<SelectionRecord> {
        self.upserts.lock().await.clone()
    }

    /// Delete a row as another client would, emitting a delete event
    pub async fn delete(&self, item_id: &ItemId) -> bool {
        let removed = self.rows.write().await.remove(item_id).is_some();
        if removed {
            self.publish(ChangeEvent::deleted(item_id)).await;
        }
        removed
    }

    /// Write a row as another client would, emitting insert/update
    pub async fn write_external(&self, record: SelectionRecord) {
        let op = self.store_row(record.clone()).await;
        self.publish(ChangeEvent::upserted(op, &record)).await;
    }

    /// Deliver a raw event to subscribers without touching the table
    pub async fn inject(&self, event: ChangeEvent) {
        self.publish(event).await;
    }

    /// Drop every live subscription, as a lost connection would
    pub async fn disconnect_subscribers(&self) {
        self.subscribers.lock().await.clear();
    }

    pub async fn subscriber_count(&self) -> usize {
        let mut subscribers = self.subscribers.lock().await;
        subscribers.retain(|tx| !tx.is_closed());
        subscribers.len()
    }

    pub async fn set_read_failure(&self, fail: bool) {
        self.faults.lock().await.fail_reads = fail;
    }

    pub async fn set_subscribe_failure(&self, fail: bool) {
        self.faults.lock().await.fail_subscribe = fail;
    }

    /// Make the next `count` upserts fail
    pub async fn fail_next_upserts(&self, count: usize) {
        self.faults.lock().await.failing_upserts = count;
    }

    /// Block `read_all` until [`MemorySelectionStore::release_reads`]
    pub fn hold_reads(&self) {
        self.read_gate.send_replace(false);
    }

    pub fn release_reads(&self) {
        self.read_gate.send_replace(true);
    }

    async fn store_row(&self, record: SelectionRecord) -> ChangeOp {
        let mut rows = self.rows.write().await;
        match rows.insert(record.item_id.clone(), record) {
            Some(_) => ChangeOp::Update,
            None => ChangeOp::Insert,
        }
    }

    async fn publish(&self, event: ChangeEvent) {
        let mut subscribers = self.subscribers.lock().await;
        subscribers.retain(|tx| !tx.is_closed());
        for tx in subscribers.iter() {
            if tx.send(event.clone()).await.is_err() {
                debug!("Subscriber went away while publishing");
            }
        }
    }
}

#[async_trait]
impl SelectionStore for MemorySelectionStore {
    async fn read_all(&self) -> StoreResult<Vec<SelectionRecord>> {
        let mut gate = self.read_gate.subscribe();
        gate.wait_for(|open| *open)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        if self.faults.lock().await.fail_reads {
            return Err(StoreError::Unavailable("read failure injected".to_string()));
        }

        Ok(self.rows.read().await.values().cloned().collect())
    }

    async fn upsert(&self, record: &SelectionRecord) -> StoreResult<SelectionRecord> {
        {
            let mut faults = self.faults.lock().await;
            if faults.failing_upserts > 0 {
                faults.failing_upserts -= 1;
                return Err(StoreError::Unavailable("upsert failure injected".to_string()));
            }
        }

        self.upserts.lock().await.push(record.clone());
        let op = self.store_row(record.clone()).await;
        self.publish(ChangeEvent::upserted(op, record)).await;
        Ok(record.clone())
    }

    async fn subscribe(&self) -> StoreResult<ChangeSubscription> {
        if self.faults.lock().await.fail_subscribe {
            return Err(StoreError::Unavailable(
                "subscribe failure injected".to_string(),
            ));
        }

        let (tx, subscription) = ChangeSubscription::channel(SUBSCRIPTION_BUFFER);
        self.subscribers.lock().await.push(tx);
        Ok(subscription)
    }
}
