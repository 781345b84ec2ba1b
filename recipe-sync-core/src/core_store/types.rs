/*
    types.rs - Wire types of the remote selection store

    Defines:
    - SelectionRecord: one row per item (natural key `recipe_name`)
    - ChangeOp / ChangeEvent: push-channel notifications
    - ChangeSubscription: the consumer end of a push channel
*/

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;
use tokio::sync::mpsc;

use super::errors::RecordError;
use crate::core_catalog::{ItemId, SubItem, SubItemRef};

/// Column holding the natural key
pub const KEY_COLUMN: &str = "recipe_name";
const KEY_ALIAS: &str = "item_id";
const CHECKED_COLUMN: &str = "is_checked";
const SUB_ITEMS_COLUMN: &str = "selected_images";
const SUB_ITEMS_ALIAS: &str = "selected_subitems";

/// Durable selection row for one item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Value")]
pub struct SelectionRecord {
    #[serde(rename = "recipe_name")]
    pub item_id: ItemId,

    pub is_checked: bool,

    /// Ordered, duplicate-free, never contains the absent sentinel
    #[serde(rename = "selected_images")]
    pub selected_sub_items: Vec<SubItemRef>,
}

impl SelectionRecord {
    pub fn new(
        item_id: impl Into<ItemId>,
        is_checked: bool,
        selected_sub_items: impl IntoIterator<Item = SubItemRef>,
    ) -> Self {
        let mut seen = BTreeSet::new();
        let selected_sub_items = selected_sub_items
            .into_iter()
            .filter(|r| seen.insert(r.clone()))
            .collect();

        SelectionRecord {
            item_id: item_id.into(),
            is_checked,
            selected_sub_items,
        }
    }

    /// Decode a row leniently: `null`/missing `is_checked` reads as false,
    /// `null`/missing sub-items as empty, and absent sentinels are dropped.
    pub fn from_json(value: &Value) -> Result<Self, RecordError> {
        let obj = value.as_object().ok_or(RecordError::NotAnObject)?;
        let item_id = record_key(obj)?;

        let is_checked = match obj.get(CHECKED_COLUMN) {
            None | Some(Value::Null) => false,
            Some(Value::Bool(b)) => *b,
            Some(_) => return Err(RecordError::CheckedNotBool),
        };

        let raw_subs = obj.get(SUB_ITEMS_COLUMN).or_else(|| obj.get(SUB_ITEMS_ALIAS));
        let selected = match raw_subs {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(entries)) => {
                let mut refs = Vec::with_capacity(entries.len());
                for entry in entries {
                    let slot = SubItem::from_json(entry).map_err(RecordError::InvalidSubItem)?;
                    if let Some(r) = slot.into_present() {
                        refs.push(r);
                    }
                }
                refs
            }
            Some(_) => return Err(RecordError::SubItemsNotArray),
        };

        Ok(SelectionRecord::new(item_id, is_checked, selected))
    }
}

impl TryFrom<Value> for SelectionRecord {
    type Error = RecordError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        SelectionRecord::from_json(&value)
    }
}

/// Extract the natural key from a row, accepting the `item_id` alias.
pub fn record_key(obj: &Map<String, Value>) -> Result<ItemId, RecordError> {
    match obj.get(KEY_COLUMN).or_else(|| obj.get(KEY_ALIAS)) {
        None | Some(Value::Null) => Err(RecordError::MissingKey),
        Some(Value::String(s)) => Ok(ItemId::new(s.clone())),
        Some(_) => Err(RecordError::KeyNotString),
    }
}

/// Kind of change carried by a push event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOp {
    #[serde(alias = "INSERT")]
    Insert,
    #[serde(alias = "UPDATE")]
    Update,
    #[serde(alias = "DELETE")]
    Delete,
}

impl std::fmt::Display for ChangeOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ChangeOp::Insert => "insert",
            ChangeOp::Update => "update",
            ChangeOp::Delete => "delete",
        };
        write!(f, "{}", s)
    }
}

/// A push-channel notification.
///
/// The payload is kept raw: it comes from other clients and is validated by
/// the reconciliation engine, which discards malformed events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub op: ChangeOp,
    pub record: Value,
}

impl ChangeEvent {
    pub fn new(op: ChangeOp, record: Value) -> Self {
        ChangeEvent { op, record }
    }

    /// Insert/update event carrying a full row
    pub fn upserted(op: ChangeOp, record: &SelectionRecord) -> Self {
        // SelectionRecord serialization cannot fail: all fields are strings/bools
        let record = serde_json::to_value(record).unwrap_or(Value::Null);
        ChangeEvent { op, record }
    }

    /// Delete event; only the key is guaranteed on deletes
    pub fn deleted(item_id: &ItemId) -> Self {
        ChangeEvent {
            op: ChangeOp::Delete,
            record: json!({ KEY_COLUMN: item_id.as_str() }),
        }
    }
}

/// Consumer end of a push channel.
///
/// Dropping the subscription (or calling [`ChangeSubscription::unsubscribe`])
/// cancels it; producers observe this through their closed sender.
pub struct ChangeSubscription {
    events: mpsc::Receiver<ChangeEvent>,
}

impl ChangeSubscription {
    pub fn new(events: mpsc::Receiver<ChangeEvent>) -> Self {
        Self { events }
    }

    /// Create a connected producer/consumer pair
    pub fn channel(capacity: usize) -> (mpsc::Sender<ChangeEvent>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self::new(rx))
    }

    /// Wait for the next event; `None` once the producer side is gone.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        self.events.recv().await
    }

    /// Take an already-delivered event without waiting.
    pub fn try_recv(&mut self) -> Option<ChangeEvent> {
        self.events.try_recv().ok()
    }

    pub fn unsubscribe(mut self) {
        self.events.close();
    }
}
