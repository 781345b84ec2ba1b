/*
    state.rs - Selection State

    In-memory view of what is currently selected:
    - checked_by_item: item -> checked flag
    - selected_sub_items: flat aggregate of selected sub-item refs across all
      items (not partitioned; two items sharing a ref are indistinguishable)

    Only the reconciliation engine mutates this; everything else reads
    snapshots.
*/

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::core_catalog::{Item, ItemId, SubItemRef};
use crate::core_store::SelectionRecord;

/// Selection state owned by the reconciliation engine
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionState {
    checked_by_item: BTreeMap<ItemId, bool>,
    selected_sub_items: BTreeSet<SubItemRef>,
}

/// A consistent, owned copy of the selection state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionSnapshot {
    pub checked_by_item: BTreeMap<ItemId, bool>,
    pub selected_sub_items: BTreeSet<SubItemRef>,
}

impl SelectionSnapshot {
    pub fn is_checked(&self, item: &str) -> bool {
        self.checked_by_item.get(item).copied().unwrap_or(false)
    }

    /// Items whose flag is true
    pub fn checked_items(&self) -> impl Iterator<Item = &ItemId> {
        self.checked_by_item
            .iter()
            .filter(|(_, checked)| **checked)
            .map(|(id, _)| id)
    }

    pub fn is_selected(&self, sub_item: &str) -> bool {
        self.selected_sub_items.iter().any(|r| r.as_str() == sub_item)
    }
}

impl SelectionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unconditional local overwrite of an item's flag
    pub fn set_checked(&mut self, item: ItemId, checked: bool) {
        self.checked_by_item.insert(item, checked);
    }

    /// Forget an item's flag entirely, returning the old value
    pub fn clear_checked(&mut self, item: &str) -> Option<bool> {
        self.checked_by_item.remove(item)
    }

    pub fn is_checked(&self, item: &str) -> bool {
        self.checked_by_item.get(item).copied().unwrap_or(false)
    }

    /// Replace the whole aggregate
    pub fn set_selected_sub_items(&mut self, subset: impl IntoIterator<Item = SubItemRef>) {
        self.selected_sub_items = subset.into_iter().collect();
    }

    pub fn add_sub_items<'a>(&mut self, refs: impl IntoIterator<Item = &'a SubItemRef>) {
        self.selected_sub_items.extend(refs.into_iter().cloned());
    }

    pub fn remove_sub_items<'a>(&mut self, refs: impl IntoIterator<Item = &'a SubItemRef>) {
        for r in refs {
            self.selected_sub_items.remove(r);
        }
    }

    /// Flip membership of one ref; returns whether it is now selected
    pub fn toggle_sub_item(&mut self, sub_item: &SubItemRef) -> bool {
        if self.selected_sub_items.remove(sub_item) {
            false
        } else {
            self.selected_sub_items.insert(sub_item.clone());
            true
        }
    }

    pub fn checked_by_item(&self) -> &BTreeMap<ItemId, bool> {
        &self.checked_by_item
    }

    pub fn selected_sub_items(&self) -> &BTreeSet<SubItemRef> {
        &self.selected_sub_items
    }

    pub fn snapshot(&self) -> SelectionSnapshot {
        SelectionSnapshot {
            checked_by_item: self.checked_by_item.clone(),
            selected_sub_items: self.selected_sub_items.clone(),
        }
    }

    /// The full record to upsert for `item`: its flag plus the item's own
    /// sub-items (catalog order) that are in the aggregate.
    pub fn record_for(&self, item_id: &ItemId, item: &Item) -> SelectionRecord {
        let selected = item
            .present_sub_items()
            .filter(|r| self.selected_sub_items.contains(*r))
            .cloned();
        SelectionRecord::new(item_id.clone(), self.is_checked(item_id.as_str()), selected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_catalog::SubItem;

    fn sub(s: &str) -> SubItemRef {
        SubItemRef::parse(s).unwrap()
    }

    #[test]
    fn test_set_checked_overwrites() {
        let mut state = SelectionState::new();
        state.set_checked(ItemId::from("A"), true);
        state.set_checked(ItemId::from("A"), false);

        assert!(!state.is_checked("A"));
        assert_eq!(state.checked_by_item().len(), 1);
        assert_eq!(state.clear_checked("A"), Some(false));
        assert!(state.checked_by_item().is_empty());
    }

    #[test]
    fn test_aggregate_is_flat() {
        let mut state = SelectionState::new();
        state.add_sub_items(&[sub("s1"), sub("shared")]);
        state.add_sub_items(&[sub("shared"), sub("s3")]);
        assert_eq!(state.selected_sub_items().len(), 3);

        // removing on behalf of one item drops the shared ref for everyone
        state.remove_sub_items(&[sub("s3"), sub("shared")]);
        let left: Vec<&str> = state.selected_sub_items().iter().map(|r| r.as_str()).collect();
        assert_eq!(left, vec!["s1"]);
    }

    #[test]
    fn test_toggle_and_replace() {
        let mut state = SelectionState::new();
        assert!(state.toggle_sub_item(&sub("s1")));
        assert!(state.selected_sub_items().contains(&sub("s1")));
        assert!(!state.toggle_sub_item(&sub("s1")));
        assert!(state.selected_sub_items().is_empty());

        state.set_selected_sub_items(vec![sub("s2"), sub("s3")]);
        assert_eq!(state.selected_sub_items().len(), 2);
    }

    #[test]
    fn test_snapshot_is_detached() {
        let mut state = SelectionState::new();
        state.set_checked(ItemId::from("A"), true);
        let snap = state.snapshot();

        state.set_checked(ItemId::from("A"), false);
        assert!(snap.is_checked("A"));
        assert_eq!(snap.checked_items().count(), 1);
    }

    #[test]
    fn test_record_for_uses_catalog_order() {
        let item = Item::new(vec![
            SubItem::from("s2"),
            SubItem::Absent,
            SubItem::from("s1"),
            SubItem::from("s3"),
        ]);
        let mut state = SelectionState::new();
        state.set_checked(ItemId::from("A"), true);
        state.add_sub_items(&[sub("s1"), sub("s2"), sub("other")]);

        let record = state.record_for(&ItemId::from("A"), &item);
        assert!(record.is_checked);
        assert_eq!(record.selected_sub_items, vec![sub("s2"), sub("s1")]);
    }
}
