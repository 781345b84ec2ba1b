//! Export projection
//!
//! `project` keeps every checked item whose sub-item list, filtered down to
//! the selected refs (catalog order preserved), is non-empty. The result is a
//! detached copy: nothing in it borrows from the catalog or the selection.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::core_catalog::{Catalog, Item, ItemId, SubItem, SubItemRef};
use crate::core_selection::SelectionSnapshot;

/// Filtered catalog entries keyed by item, ready for serialization
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExportSnapshot {
    items: BTreeMap<ItemId, Item>,
}

impl ExportSnapshot {
    pub fn get(&self, item: &str) -> Option<&Item> {
        self.items.get(item)
    }

    pub fn contains(&self, item: &str) -> bool {
        self.items.contains_key(item)
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

    pub fn into_inner(self) -> BTreeMap<ItemId, Item> {
        self.items
    }

    /// Project from a selection snapshot
    pub fn from_snapshot(catalog: &Catalog, snapshot: &SelectionSnapshot) -> Self {
        project(
            catalog,
            &snapshot.checked_by_item,
            &snapshot.selected_sub_items,
        )
    }
}

/// Pure projection of `catalog` onto the selection.
pub fn project(
    catalog: &Catalog,
    checked_by_item: &BTreeMap<ItemId, bool>,
    selected_sub_items: &BTreeSet<SubItemRef>,
) -> ExportSnapshot {
    let items = catalog
        .iter()
        .filter(|(id, _)| checked_by_item.get(*id).copied().unwrap_or(false))
        .filter_map(|(id, item)| {
            let kept: Vec<SubItem> = item
                .sub_items
                .iter()
                .filter(|slot| {
                    slot.as_present()
                        .is_some_and(|r| selected_sub_items.contains(r))
                })
                .cloned()
                .collect();

            if kept.is_empty() {
                return None;
            }

            let mut copy = item.clone();
            copy.sub_items = kept;
            Some((id.clone(), copy))
        })
        .collect();

    ExportSnapshot { items }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn slot() -> impl Strategy<Value = SubItem> {
        prop_oneof![
            1 => Just(SubItem::Absent),
            5 => "[a-e]{1,2}".prop_map(|s| SubItem::from(s.as_str())),
        ]
    }

    fn catalog_strategy() -> impl Strategy<Value = Catalog> {
        prop::collection::btree_map("[A-F]", prop::collection::vec(slot(), 0..5), 0..6).prop_map(
            |items| {
                Catalog::from_items(
                    items
                        .into_iter()
                        .map(|(id, subs)| (ItemId::new(id), Item::new(subs))),
                )
            },
        )
    }

    fn flags_strategy() -> impl Strategy<Value = BTreeMap<ItemId, bool>> {
        prop::collection::btree_map("[A-F]".prop_map(ItemId::new), any::<bool>(), 0..6)
    }

    fn refs_strategy() -> impl Strategy<Value = BTreeSet<SubItemRef>> {
        prop::collection::btree_set(
            "[a-e]{1,2}".prop_filter_map("sentinel", SubItemRef::parse),
            0..10,
        )
    }

    proptest! {
        #[test]
        fn prop_present_iff_checked_and_nonempty(
            catalog in catalog_strategy(),
            flags in flags_strategy(),
            refs in refs_strategy(),
        ) {
            let out = project(&catalog, &flags, &refs);

            for (id, item) in catalog.iter() {
                let is_checked = flags.get(id).copied().unwrap_or(false);
                let any_selected = item.present_sub_items().any(|r| refs.contains(r));
                prop_assert_eq!(out.contains(id.as_str()), is_checked && any_selected);
            }
            prop_assert!(out.iter().all(|(id, _)| catalog.contains(id.as_str())));
        }

        #[test]
        fn prop_projected_lists_are_ordered_selected_subsequences(
            catalog in catalog_strategy(),
            flags in flags_strategy(),
            refs in refs_strategy(),
        ) {
            let out = project(&catalog, &flags, &refs);

            for (id, projected) in out.iter() {
                prop_assert!(projected.sub_items.iter().all(|s| !s.is_absent()));

                let expected: Vec<&SubItemRef> = catalog
                    .get(id.as_str())
                    .unwrap()
                    .present_sub_items()
                    .filter(|r| refs.contains(*r))
                    .collect();
                let actual: Vec<&SubItemRef> = projected.present_sub_items().collect();
                prop_assert_eq!(actual, expected);
            }
        }
    }
}
