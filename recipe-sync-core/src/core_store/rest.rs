//! PostgREST selection store
//!
//! Talks to a PostgREST-style endpoint (`{url}/rest/v1/{table}`):
//! - `read_all`: `GET ?select=*`
//! - `upsert`: `POST ?on_conflict=<key>` with `Prefer: resolution=merge-duplicates`
//! - `subscribe`: a poller that diffs consecutive reads into change events

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::errors::{StoreError, StoreResult};
use super::traits::SelectionStore;
use super::types::{ChangeEvent, ChangeOp, ChangeSubscription, SelectionRecord, KEY_COLUMN};
use crate::core_catalog::ItemId;

const SUBSCRIPTION_BUFFER: usize = 256;

/// Connection settings for [`RestSelectionStore`]
#[derive(Debug, Clone)]
pub struct RestStoreConfig {
    pub url: String,
    pub api_key: Option<String>,
    pub table: String,
    pub conflict_key: String,
    pub request_timeout: Duration,
    pub poll_interval: Duration,
}

impl RestStoreConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            api_key: None,
            table: "checked_states".to_string(),
            conflict_key: KEY_COLUMN.to_string(),
            request_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_secs(2),
        }
    }
}

/// Selection store backed by a PostgREST table
#[derive(Clone)]
pub struct RestSelectionStore {
    client: reqwest::Client,
    config: RestStoreConfig,
}

impl RestSelectionStore {
    pub fn new(config: RestStoreConfig) -> StoreResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| StoreError::Request(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    fn table_url(&self) -> String {
        format!(
            "{}/rest/v1/{}",
            self.config.url.trim_end_matches('/'),
            self.config.table
        )
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.api_key {
            Some(key) => req.header("apikey", key).bearer_auth(key),
            None => req,
        }
    }

    async fn ensure_ok(&self, resp: reqwest::Response) -> StoreResult<reqwest::Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(StoreError::Status {
            status: status.as_u16(),
            body,
        })
    }

    async fn fetch_rows(&self) -> StoreResult<BTreeMap<ItemId, SelectionRecord>> {
        let rows = self.read_all().await?;
        Ok(rows
            .into_iter()
            .map(|row| (row.item_id.clone(), row))
            .collect())
    }
}

#[async_trait]
impl SelectionStore for RestSelectionStore {
    async fn read_all(&self) -> StoreResult<Vec<SelectionRecord>> {
        let resp = self
            .authorize(self.client.get(self.table_url()))
            .query(&[("select", "*")])
            .send()
            .await?;

        let raw: Vec<Value> = self.ensure_ok(resp).await?.json().await?;
        let mut records = Vec::with_capacity(raw.len());
        for row in &raw {
            match SelectionRecord::from_json(row) {
                Ok(record) => records.push(record),
                Err(e) => warn!(error = %e, "Skipping malformed selection row"),
            }
        }

        debug!(rows = records.len(), "Read selection table");
        Ok(records)
    }

    async fn upsert(&self, record: &SelectionRecord) -> StoreResult<SelectionRecord> {
        let resp = self
            .authorize(self.client.post(self.table_url()))
            .query(&[("on_conflict", self.config.conflict_key.as_str())])
            .header("Prefer", "resolution=merge-duplicates,return=representation")
            .json(record)
            .send()
            .await?;

        let body: Value = self.ensure_ok(resp).await?.json().await?;
        let stored = match &body {
            Value::Array(rows) => rows.first(),
            other => Some(other),
        };

        match stored {
            Some(row) => Ok(SelectionRecord::from_json(row)?),
            None => Ok(record.clone()),
        }
    }

    async fn subscribe(&self) -> StoreResult<ChangeSubscription> {
        let baseline = self.fetch_rows().await?;
        let (tx, subscription) = ChangeSubscription::channel(SUBSCRIPTION_BUFFER);

        let store = self.clone();
        tokio::spawn(async move { store.poll_changes(baseline, tx).await });

        Ok(subscription)
    }
}

impl RestSelectionStore {
    async fn poll_changes(
        self,
        mut previous: BTreeMap<ItemId, SelectionRecord>,
        tx: mpsc::Sender<ChangeEvent>,
    ) {
        let mut interval = tokio::time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        interval.tick().await;

        loop {
            tokio::select! {
                _ = tx.closed() => {
                    debug!("Change poller stopped: subscription dropped");
                    return;
                }
                _ = interval.tick() => {}
            }

            let current = match self.fetch_rows().await {
                Ok(rows) => rows,
                Err(e) => {
                    warn!(error = %e, "Change poll failed, retrying next tick");
                    continue;
                }
            };

            for event in diff_rows(&previous, &current) {
                if tx.send(event).await.is_err() {
                    return;
                }
            }
            previous = current;
        }
    }
}

/// Change events that turn `previous` into `current`
pub fn diff_rows(
    previous: &BTreeMap<ItemId, SelectionRecord>,
    current: &BTreeMap<ItemId, SelectionRecord>,
) -> Vec<ChangeEvent> {
    let mut events = Vec::new();

    for (id, row) in current {
        match previous.get(id) {
            None => events.push(ChangeEvent::upserted(ChangeOp::Insert, row)),
            Some(old) if old != row => events.push(ChangeEvent::upserted(ChangeOp::Update, row)),
            Some(_) => {}
        }
    }

    for id in previous.keys() {
        if !current.contains_key(id) {
            events.push(ChangeEvent::deleted(id));
        }
    }

    events
}
