/*
    model.rs - Catalog data model

    Defines:
    - ItemId: natural key of a catalog entry
    - SubItemRef: a present sub-item reference (URL or opaque string)
    - SubItem: a catalog slot that is either a reference or the absent sentinel
    - Item: one catalog entry with its ordered sub-items
    - Catalog: the immutable item map
*/

use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::fmt;

use super::error::CatalogResult;

/// Literal string the catalog uses in place of a missing sub-item.
pub const ABSENT_LITERAL: &str = "null";

/// Natural key of a catalog item
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub String);

impl ItemId {
    pub fn new(id: impl Into<String>) -> Self {
        ItemId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ItemId {
    fn from(s: &str) -> Self {
        ItemId(s.to_string())
    }
}

impl From<String> for ItemId {
    fn from(s: String) -> Self {
        ItemId(s)
    }
}

impl Borrow<str> for ItemId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// A present sub-item reference.
///
/// Never holds the absent sentinel: the only ways to build one from catalog
/// or wire data go through [`SubItem`], which maps the sentinel to
/// [`SubItem::Absent`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct SubItemRef(String);

impl SubItemRef {
    /// Build a reference, returning `None` for the absent sentinel.
    pub fn parse(raw: impl Into<String>) -> Option<Self> {
        let raw = raw.into();
        if raw == ABSENT_LITERAL {
            None
        } else {
            Some(SubItemRef(raw))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubItemRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<'de> Deserialize<'de> for SubItemRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        SubItemRef::parse(raw)
            .ok_or_else(|| de::Error::custom("sub-item reference is the absent sentinel"))
    }
}

/// One sub-item slot of a catalog item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubItem {
    /// `null` or the literal string `"null"` in the source data
    Absent,
    Ref(SubItemRef),
    /// Object form (`{"url": ..., "alt": ...}`); the whole object is kept so
    /// it serializes back unchanged
    Object {
        reference: SubItemRef,
        source: Map<String, Value>,
    },
}

impl SubItem {
    /// Interpret a JSON value as a sub-item.
    ///
    /// Accepts `null`, a string, or an object with a `url` string field.
    pub fn from_json(value: &Value) -> Result<Self, String> {
        match value {
            Value::Null => Ok(SubItem::Absent),
            Value::String(s) => Ok(SubItem::from(s.as_str())),
            Value::Object(obj) => match obj.get("url") {
                Some(Value::Null) => Ok(SubItem::Absent),
                Some(Value::String(url)) => Ok(match SubItemRef::parse(url.as_str()) {
                    Some(reference) => SubItem::Object {
                        reference,
                        source: obj.clone(),
                    },
                    None => SubItem::Absent,
                }),
                Some(other) => Err(format!("sub-item `url` is not a string: {}", other)),
                None => Err("sub-item object has no `url` field".to_string()),
            },
            other => Err(format!("unsupported sub-item value: {}", other)),
        }
    }

    pub fn as_present(&self) -> Option<&SubItemRef> {
        match self {
            SubItem::Absent => None,
            SubItem::Ref(r) | SubItem::Object { reference: r, .. } => Some(r),
        }
    }

    pub fn into_present(self) -> Option<SubItemRef> {
        match self {
            SubItem::Absent => None,
            SubItem::Ref(r) | SubItem::Object { reference: r, .. } => Some(r),
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, SubItem::Absent)
    }
}

impl From<&str> for SubItem {
    fn from(s: &str) -> Self {
        SubItemRef::parse(s).map(SubItem::Ref).unwrap_or(SubItem::Absent)
    }
}

impl Serialize for SubItem {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            SubItem::Absent => serializer.serialize_none(),
            SubItem::Ref(r) => serializer.serialize_str(r.as_str()),
            SubItem::Object { source, .. } => source.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for SubItem {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        SubItem::from_json(&value).map_err(de::Error::custom)
    }
}

/// A catalog entry.
///
/// Only the sub-item list is interpreted; every other field of the source
/// document is carried through untouched so exported copies match the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    #[serde(rename = "images", default)]
    pub sub_items: Vec<SubItem>,

    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Item {
    pub fn new(sub_items: Vec<SubItem>) -> Self {
        Item {
            sub_items,
            fields: Map::new(),
        }
    }

    /// Present sub-item references in catalog order.
    pub fn present_sub_items(&self) -> impl Iterator<Item = &SubItemRef> {
        self.sub_items.iter().filter_map(SubItem::as_present)
    }

    pub fn owns(&self, sub_item: &SubItemRef) -> bool {
        self.present_sub_items().any(|r| r == sub_item)
    }

    pub fn title(&self) -> Option<&str> {
        self.fields.get("title").and_then(Value::as_str)
    }
}

/// The immutable item catalog, keyed by natural key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Catalog {
    items: BTreeMap<ItemId, Item>,
}

impl Catalog {
    pub fn from_items(items: impl IntoIterator<Item = (ItemId, Item)>) -> Self {
        Catalog {
            items: items.into_iter().collect(),
        }
    }

    /// Parse a catalog document: a JSON object mapping item key to item.
    pub fn from_json_str(json: &str) -> CatalogResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn get(&self, id: &str) -> Option<&Item> {
        self.items.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.items.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ItemId, &Item)> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
