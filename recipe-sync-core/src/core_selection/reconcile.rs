/*
    reconcile.rs - Reconciliation transitions

    Pure functions that move SelectionState forward given one of three kinds
    of incoming facts:
    - local user intent (optimistic, produces the record to upsert)
    - push-channel change events (overwrite the affected item)
    - the startup seed (additive, lowest precedence)

    Precedence inside one pass: local intent > push event. A push event for an
    item that also has an accepted local intent in the same pass is
    superseded. Rejected intents change nothing, so they never win.
*/

use std::collections::BTreeSet;

use super::errors::{MalformedEventError, SyncError, SyncResult};
use super::state::SelectionState;
use crate::core_catalog::{Catalog, Item, ItemId, SubItemRef};
use crate::core_store::types::record_key;
use crate::core_store::{ChangeEvent, ChangeOp, RecordError, SelectionRecord};

/// A local user action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalIntent {
    /// Whole-item check/uncheck
    SetChecked { item: ItemId, checked: bool },
    /// Flip one sub-item inside an item
    ToggleSubItem { item: ItemId, sub_item: SubItemRef },
    /// Replace the item's share of the aggregate
    SelectSubItems { item: ItemId, sub_items: Vec<SubItemRef> },
    /// Re-issue the item's current record without changing it
    Flush { item: ItemId },
}

impl LocalIntent {
    pub fn item(&self) -> &ItemId {
        match self {
            LocalIntent::SetChecked { item, .. }
            | LocalIntent::ToggleSubItem { item, .. }
            | LocalIntent::SelectSubItems { item, .. }
            | LocalIntent::Flush { item } => item,
        }
    }
}

/// One input of a reconciliation pass
#[derive(Debug, Clone)]
pub enum Input {
    Local(LocalIntent),
    Remote(ChangeEvent),
}

/// What happened to one input of a pass, aligned with the input order
#[derive(Debug, Clone)]
pub enum InputOutcome {
    /// Local intent applied; this record must be upserted
    Upsert(SelectionRecord),
    /// Local intent refused; state untouched
    Rejected(SyncError),
    /// Push event applied to this item
    Applied(ItemId),
    /// Push event dropped because it cannot be applied
    Discarded(MalformedEventError),
    /// Push event dropped because a local intent for the item won
    Superseded(ItemId),
}

/// Outcome of applying the startup seed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeedOutcome {
    pub applied: usize,
    pub ignored: Vec<ItemId>,
}

/// Rule: selecting any sub-item implies the owning item is checked.
///
/// Applies to every sub-item intent, deselection included: the resulting
/// upsert always carries `is_checked = true`.
pub fn sub_item_selection_checks_owner(state: &mut SelectionState, item: &ItemId) {
    state.set_checked(item.clone(), true);
}

fn catalog_item<'a>(catalog: &'a Catalog, item: &ItemId) -> SyncResult<&'a Item> {
    catalog
        .get(item.as_str())
        .ok_or_else(|| SyncError::UnknownItem(item.clone()))
}

fn ensure_owned(item_id: &ItemId, item: &Item, sub_item: &SubItemRef) -> SyncResult<()> {
    if item.owns(sub_item) {
        Ok(())
    } else {
        Err(SyncError::UnknownSubItem {
            item: item_id.clone(),
            sub_item: sub_item.clone(),
        })
    }
}

/// Check an intent against the catalog and return the item it targets.
///
/// Depends on the catalog only, never on the selection, so the answer is the
/// same wherever the intent lands in a pass.
pub fn validate_local<'a>(catalog: &'a Catalog, intent: &LocalIntent) -> SyncResult<&'a Item> {
    let item_id = intent.item();
    let item = catalog_item(catalog, item_id)?;

    match intent {
        LocalIntent::ToggleSubItem { sub_item, .. } => ensure_owned(item_id, item, sub_item)?,
        LocalIntent::SelectSubItems { sub_items, .. } => {
            for sub_item in sub_items {
                ensure_owned(item_id, item, sub_item)?;
            }
        }
        LocalIntent::SetChecked { .. } | LocalIntent::Flush { .. } => {}
    }

    Ok(item)
}

/// Apply a local intent optimistically and return the record to upsert.
///
/// Validation happens before any mutation, so a rejected intent leaves the
/// state untouched.
pub fn apply_local(
    state: &mut SelectionState,
    catalog: &Catalog,
    intent: &LocalIntent,
) -> SyncResult<SelectionRecord> {
    let item_id = intent.item();
    let item = validate_local(catalog, intent)?;

    match intent {
        LocalIntent::SetChecked { checked, .. } => {
            state.set_checked(item_id.clone(), *checked);
            if *checked {
                state.add_sub_items(item.present_sub_items());
            } else {
                state.remove_sub_items(item.present_sub_items());
            }
        }
        LocalIntent::ToggleSubItem { sub_item, .. } => {
            state.toggle_sub_item(sub_item);
            sub_item_selection_checks_owner(state, item_id);
        }
        LocalIntent::SelectSubItems { sub_items, .. } => {
            state.remove_sub_items(item.present_sub_items());
            state.add_sub_items(sub_items);
            sub_item_selection_checks_owner(state, item_id);
        }
        LocalIntent::Flush { .. } => {}
    }

    Ok(state.record_for(item_id, item))
}

/// Item a push event refers to, if its key is readable
pub fn event_item(event: &ChangeEvent) -> Option<ItemId> {
    event.record.as_object().and_then(|obj| record_key(obj).ok())
}

/// Apply a push event by overwriting the affected item's fields.
///
/// - insert/update: replace the flag, drop every ref the catalog assigns to
///   the item from the aggregate, then add the event's refs
/// - delete: forget the flag and drop the item's refs
pub fn apply_remote(
    state: &mut SelectionState,
    catalog: &Catalog,
    event: &ChangeEvent,
) -> Result<ItemId, MalformedEventError> {
    let op = event.op;
    let payload_error = |source: RecordError| MalformedEventError::Payload { op, source };

    match op {
        ChangeOp::Delete => {
            let obj = event
                .record
                .as_object()
                .ok_or_else(|| payload_error(RecordError::NotAnObject))?;
            let item_id = record_key(obj).map_err(payload_error)?;
            let item = catalog
                .get(item_id.as_str())
                .ok_or_else(|| MalformedEventError::UnknownItem {
                    op,
                    item: item_id.clone(),
                })?;

            state.clear_checked(item_id.as_str());
            state.remove_sub_items(item.present_sub_items());
            Ok(item_id)
        }
        ChangeOp::Insert | ChangeOp::Update => {
            let record = SelectionRecord::from_json(&event.record).map_err(payload_error)?;
            let item = catalog
                .get(record.item_id.as_str())
                .ok_or_else(|| MalformedEventError::UnknownItem {
                    op,
                    item: record.item_id.clone(),
                })?;

            state.set_checked(record.item_id.clone(), record.is_checked);
            state.remove_sub_items(item.present_sub_items());
            state.add_sub_items(&record.selected_sub_items);
            Ok(record.item_id)
        }
    }
}

/// Populate state from a full read of the store.
///
/// Additive: refs from every record are unioned so duplicates across records
/// are tolerated. Records for items missing from the catalog are ignored.
pub fn apply_seed(
    state: &mut SelectionState,
    catalog: &Catalog,
    records: &[SelectionRecord],
) -> SeedOutcome {
    let mut outcome = SeedOutcome::default();

    for record in records {
        if !catalog.contains(record.item_id.as_str()) {
            outcome.ignored.push(record.item_id.clone());
            continue;
        }
        state.set_checked(record.item_id.clone(), record.is_checked);
        state.add_sub_items(&record.selected_sub_items);
        outcome.applied += 1;
    }

    outcome
}

/// Run one reconciliation pass over inputs in arrival order.
///
/// Push events for an item with an accepted local intent anywhere in the pass
/// are superseded, whether they arrived before or after the intent.
pub fn reconcile_pass(
    state: &mut SelectionState,
    catalog: &Catalog,
    inputs: &[Input],
) -> Vec<InputOutcome> {
    let local_items: BTreeSet<&ItemId> = inputs
        .iter()
        .filter_map(|input| match input {
            Input::Local(intent) => validate_local(catalog, intent).ok().map(|_| intent.item()),
            Input::Remote(_) => None,
        })
        .collect();

    inputs
        .iter()
        .map(|input| match input {
            Input::Local(intent) => match apply_local(state, catalog, intent) {
                Ok(record) => InputOutcome::Upsert(record),
                Err(e) => InputOutcome::Rejected(e),
            },
            Input::Remote(event) => match event_item(event) {
                Some(item) if local_items.contains(&item) => InputOutcome::Superseded(item),
                _ => match apply_remote(state, catalog, event) {
                    Ok(item) => InputOutcome::Applied(item),
                    Err(e) => InputOutcome::Discarded(e),
                },
            },
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sub(s: &str) -> SubItemRef {
        SubItemRef::parse(s).unwrap()
    }

    fn id(s: &str) -> ItemId {
        ItemId::from(s)
    }

    fn catalog() -> Catalog {
        Catalog::from_json_str(
            r#"{
                "A": {"title": "Alpha", "images": ["s1", "s2", null]},
                "B": {"title": "Beta", "images": ["s3", "null"]},
                "C": {"title": "Gamma", "images": ["s4"]}
            }"#,
        )
        .unwrap()
    }

    fn refs(state: &SelectionState) -> Vec<&str> {
        state.selected_sub_items().iter().map(|r| r.as_str()).collect()
    }

    fn update(item: &str, checked: bool, subs: &[&str]) -> ChangeEvent {
        ChangeEvent::new(
            ChangeOp::Update,
            json!({"recipe_name": item, "is_checked": checked, "selected_images": subs}),
        )
    }

    #[test]
    fn test_check_item_selects_all_sub_items() {
        let catalog = catalog();
        let mut state = SelectionState::new();

        let record = apply_local(
            &mut state,
            &catalog,
            &LocalIntent::SetChecked { item: id("A"), checked: true },
        )
        .unwrap();

        assert!(state.is_checked("A"));
        assert_eq!(refs(&state), vec!["s1", "s2"]);
        assert_eq!(record, SelectionRecord::new("A", true, vec![sub("s1"), sub("s2")]));
    }

    #[test]
    fn test_uncheck_item_drops_its_sub_items() {
        let catalog = catalog();
        let mut state = SelectionState::new();
        let check = LocalIntent::SetChecked { item: id("A"), checked: true };
        apply_local(&mut state, &catalog, &check).unwrap();

        let record = apply_local(
            &mut state,
            &catalog,
            &LocalIntent::SetChecked { item: id("A"), checked: false },
        )
        .unwrap();

        assert!(!state.is_checked("A"));
        assert!(state.selected_sub_items().is_empty());
        assert_eq!(record, SelectionRecord::new("A", false, Vec::new()));
    }

    #[test]
    fn test_deselect_keeps_item_checked() {
        let catalog = catalog();
        let mut state = SelectionState::new();
        let check = LocalIntent::SetChecked { item: id("A"), checked: true };
        apply_local(&mut state, &catalog, &check).unwrap();

        let record = apply_local(
            &mut state,
            &catalog,
            &LocalIntent::ToggleSubItem { item: id("A"), sub_item: sub("s2") },
        )
        .unwrap();

        assert!(state.is_checked("A"));
        assert_eq!(refs(&state), vec!["s1"]);
        assert_eq!(record, SelectionRecord::new("A", true, vec![sub("s1")]));
    }

    #[test]
    fn test_selecting_sub_item_checks_owner() {
        let catalog = catalog();
        let mut state = SelectionState::new();

        let record = apply_local(
            &mut state,
            &catalog,
            &LocalIntent::ToggleSubItem { item: id("B"), sub_item: sub("s3") },
        )
        .unwrap();

        assert!(state.is_checked("B"));
        assert!(record.is_checked);
        assert_eq!(record.selected_sub_items, vec![sub("s3")]);
    }

    #[test]
    fn test_select_sub_items_replaces_item_share_only() {
        let catalog = catalog();
        let mut state = SelectionState::new();
        state.add_sub_items(&[sub("s1"), sub("s2"), sub("s4")]);

        let record = apply_local(
            &mut state,
            &catalog,
            &LocalIntent::SelectSubItems { item: id("A"), sub_items: vec![sub("s2")] },
        )
        .unwrap();

        assert_eq!(refs(&state), vec!["s2", "s4"]);
        assert!(state.is_checked("A"));
        assert_eq!(record.selected_sub_items, vec![sub("s2")]);
    }

    #[test]
    fn test_rejected_intent_leaves_state_untouched() {
        let catalog = catalog();
        let mut state = SelectionState::new();
        state.add_sub_items(&[sub("s1")]);
        let before = state.clone();

        let err = apply_local(
            &mut state,
            &catalog,
            &LocalIntent::SetChecked { item: id("Z"), checked: true },
        )
        .unwrap_err();
        assert!(matches!(err, SyncError::UnknownItem(_)));

        let err = apply_local(
            &mut state,
            &catalog,
            &LocalIntent::SelectSubItems {
                item: id("A"),
                sub_items: vec![sub("s1"), sub("s3")],
            },
        )
        .unwrap_err();
        assert!(matches!(err, SyncError::UnknownSubItem { .. }));

        assert_eq!(state, before);
    }

    #[test]
    fn test_flush_reissues_current_record() {
        let catalog = catalog();
        let mut state = SelectionState::new();
        state.set_checked(id("A"), true);
        state.add_sub_items(&[sub("s2")]);
        let before = state.clone();

        let record =
            apply_local(&mut state, &catalog, &LocalIntent::Flush { item: id("A") }).unwrap();
        assert_eq!(record, SelectionRecord::new("A", true, vec![sub("s2")]));
        assert_eq!(state, before);
    }

    #[test]
    fn test_update_event_overwrites_item() {
        let catalog = catalog();
        let mut state = SelectionState::new();
        apply_seed(
            &mut state,
            &catalog,
            &[SelectionRecord::new("A", true, vec![sub("s1"), sub("s2")])],
        );

        let item = apply_remote(&mut state, &catalog, &update("A", false, &["s1"])).unwrap();

        assert_eq!(item, id("A"));
        assert!(!state.is_checked("A"));
        assert_eq!(refs(&state), vec!["s1"]);
    }

    #[test]
    fn test_delete_event_forgets_item() {
        let catalog = catalog();
        let mut state = SelectionState::new();
        apply_seed(
            &mut state,
            &catalog,
            &[SelectionRecord::new("B", true, vec![sub("s3")])],
        );

        let event = ChangeEvent::deleted(&id("B"));
        apply_remote(&mut state, &catalog, &event).unwrap();

        assert!(state.checked_by_item().get("B").is_none());
        assert!(state.selected_sub_items().is_empty());
    }

    #[test]
    fn test_delete_removes_shared_ref_of_other_item() {
        let catalog = Catalog::from_json_str(
            r#"{"B": {"images": ["s3"]}, "D": {"images": ["s3", "s5"]}}"#,
        )
        .unwrap();
        let mut state = SelectionState::new();
        apply_seed(
            &mut state,
            &catalog,
            &[
                SelectionRecord::new("B", true, vec![sub("s3")]),
                SelectionRecord::new("D", true, vec![sub("s3"), sub("s5")]),
            ],
        );

        apply_remote(&mut state, &catalog, &ChangeEvent::deleted(&id("B"))).unwrap();

        assert!(state.is_checked("D"));
        assert_eq!(refs(&state), vec!["s5"]);
    }

    #[test]
    fn test_malformed_events_are_discarded() {
        let catalog = catalog();
        let mut state = SelectionState::new();
        state.set_checked(id("A"), true);
        let before = state.clone();

        let not_array = ChangeEvent::new(
            ChangeOp::Update,
            json!({"recipe_name": "A", "is_checked": false, "selected_images": "s1"}),
        );
        assert!(matches!(
            apply_remote(&mut state, &catalog, &not_array),
            Err(MalformedEventError::Payload { source: RecordError::SubItemsNotArray, .. })
        ));

        assert!(matches!(
            apply_remote(&mut state, &catalog, &update("Z", true, &[])),
            Err(MalformedEventError::UnknownItem { .. })
        ));

        let keyless = ChangeEvent::new(ChangeOp::Delete, json!({"id": 3}));
        assert!(matches!(
            apply_remote(&mut state, &catalog, &keyless),
            Err(MalformedEventError::Payload { source: RecordError::MissingKey, .. })
        ));

        let scalar = ChangeEvent::new(ChangeOp::Delete, json!("A"));
        assert!(apply_remote(&mut state, &catalog, &scalar).is_err());

        assert_eq!(state, before);
    }

    #[test]
    fn test_event_sentinels_never_reach_aggregate() {
        let catalog = catalog();
        let mut state = SelectionState::new();

        apply_remote(&mut state, &catalog, &update("A", true, &["s1", "null"])).unwrap();
        let with_null = ChangeEvent::new(
            ChangeOp::Insert,
            json!({"recipe_name": "B", "is_checked": true, "selected_images": [null, "s3"]}),
        );
        apply_remote(&mut state, &catalog, &with_null).unwrap();

        assert_eq!(refs(&state), vec!["s1", "s3"]);
    }

    #[test]
    fn test_same_event_twice_is_idempotent() {
        let catalog = catalog();
        let event = update("A", true, &["s2"]);

        let mut once = SelectionState::new();
        apply_remote(&mut once, &catalog, &event).unwrap();

        let mut twice = once.clone();
        apply_remote(&mut twice, &catalog, &event).unwrap();

        assert_eq!(once, twice);
    }

    #[test]
    fn test_seed_ignores_unknown_items_and_tolerates_duplicates() {
        let catalog = catalog();
        let mut state = SelectionState::new();

        let outcome = apply_seed(
            &mut state,
            &catalog,
            &[
                SelectionRecord::new("A", true, vec![sub("s1")]),
                SelectionRecord::new("C", false, vec![sub("s1"), sub("s4")]),
                SelectionRecord::new("Ghost", true, vec![sub("g1")]),
            ],
        );

        assert_eq!(outcome.applied, 2);
        assert_eq!(outcome.ignored, vec![id("Ghost")]);
        assert!(state.checked_by_item().get("Ghost").is_none());
        assert_eq!(refs(&state), vec!["s1", "s4"]);
    }

    #[test]
    fn test_local_intent_supersedes_event_in_same_pass() {
        let catalog = catalog();
        let mut state = SelectionState::new();

        let inputs = vec![
            Input::Local(LocalIntent::SetChecked { item: id("A"), checked: true }),
            Input::Remote(update("A", false, &[])),
            Input::Remote(update("B", true, &["s3"])),
        ];
        let outcomes = reconcile_pass(&mut state, &catalog, &inputs);

        assert!(matches!(outcomes[0], InputOutcome::Upsert(_)));
        assert!(matches!(&outcomes[1], InputOutcome::Superseded(item) if item == &id("A")));
        assert!(matches!(&outcomes[2], InputOutcome::Applied(item) if item == &id("B")));
        assert!(state.is_checked("A"));
        assert_eq!(refs(&state), vec!["s1", "s2", "s3"]);
    }

    #[test]
    fn test_event_before_intent_in_same_pass_is_superseded() {
        let catalog = catalog();
        let mut state = SelectionState::new();

        let inputs = vec![
            Input::Remote(update("A", true, &["s1", "s2"])),
            Input::Local(LocalIntent::ToggleSubItem { item: id("A"), sub_item: sub("s1") }),
        ];
        let outcomes = reconcile_pass(&mut state, &catalog, &inputs);

        assert!(matches!(outcomes[0], InputOutcome::Superseded(_)));
        assert_eq!(refs(&state), vec!["s1"]);
    }

    #[test]
    fn test_rejected_intent_does_not_supersede_event() {
        let catalog = catalog();
        let mut state = SelectionState::new();
        apply_seed(
            &mut state,
            &catalog,
            &[SelectionRecord::new("A", true, vec![sub("s1")])],
        );

        let inputs = vec![
            Input::Local(LocalIntent::ToggleSubItem { item: id("A"), sub_item: sub("s3") }),
            Input::Remote(update("A", false, &["s2"])),
        ];
        let outcomes = reconcile_pass(&mut state, &catalog, &inputs);

        assert!(matches!(
            &outcomes[0],
            InputOutcome::Rejected(SyncError::UnknownSubItem { .. })
        ));
        assert!(matches!(&outcomes[1], InputOutcome::Applied(item) if item == &id("A")));
        assert!(!state.is_checked("A"));
        assert_eq!(refs(&state), vec!["s2"]);
    }

    #[test]
    fn test_event_before_rejected_intent_is_applied() {
        let catalog = catalog();
        let mut state = SelectionState::new();

        let inputs = vec![
            Input::Remote(update("B", true, &["s3"])),
            Input::Local(LocalIntent::SelectSubItems {
                item: id("B"),
                sub_items: vec![sub("s1")],
            }),
            Input::Remote(update("A", true, &["s2"])),
            Input::Local(LocalIntent::SetChecked { item: id("Z"), checked: true }),
        ];
        let outcomes = reconcile_pass(&mut state, &catalog, &inputs);

        assert!(matches!(&outcomes[0], InputOutcome::Applied(item) if item == &id("B")));
        assert!(matches!(outcomes[1], InputOutcome::Rejected(_)));
        assert!(matches!(&outcomes[2], InputOutcome::Applied(item) if item == &id("A")));
        assert!(matches!(outcomes[3], InputOutcome::Rejected(SyncError::UnknownItem(_))));
        assert!(state.is_checked("B"));
        assert_eq!(refs(&state), vec!["s2", "s3"]);
    }

    #[test]
    fn test_validate_local_ignores_state() {
        let catalog = catalog();

        let toggle = LocalIntent::ToggleSubItem { item: id("A"), sub_item: sub("s2") };
        assert!(validate_local(&catalog, &toggle).is_ok());

        let foreign = LocalIntent::SelectSubItems { item: id("A"), sub_items: vec![sub("s4")] };
        assert!(matches!(
            validate_local(&catalog, &foreign),
            Err(SyncError::UnknownSubItem { .. })
        ));

        let flush = LocalIntent::Flush { item: id("Ghost") };
        assert!(matches!(validate_local(&catalog, &flush), Err(SyncError::UnknownItem(_))));
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn catalog() -> Catalog {
        Catalog::from_json_str(
            r#"{"A": {"images": ["a1", "a2", null]}, "B": {"images": ["b1", "null"]}, "C": {"images": []}}"#,
        )
        .unwrap()
    }

    fn any_sub() -> impl Strategy<Value = String> {
        prop_oneof![
            Just("a1".to_string()),
            Just("a2".to_string()),
            Just("b1".to_string()),
            Just("null".to_string()),
            "[a-z]{1,3}",
        ]
    }

    fn any_event() -> impl Strategy<Value = ChangeEvent> {
        (
            prop_oneof![Just(ChangeOp::Insert), Just(ChangeOp::Update), Just(ChangeOp::Delete)],
            prop_oneof![Just("A"), Just("B"), Just("C"), Just("Z")],
            any::<bool>(),
            prop::collection::vec(any_sub(), 0..4),
        )
            .prop_map(|(op, item, checked, subs)| {
                ChangeEvent::new(
                    op,
                    serde_json::json!({
                        "recipe_name": item,
                        "is_checked": checked,
                        "selected_images": subs,
                    }),
                )
            })
    }

    proptest! {
        #[test]
        fn prop_sentinel_never_in_aggregate(events in prop::collection::vec(any_event(), 0..12)) {
            let catalog = catalog();
            let mut state = SelectionState::new();
            for event in &events {
                let _ = apply_remote(&mut state, &catalog, event);
            }
            prop_assert!(state.selected_sub_items().iter().all(|r| r.as_str() != "null"));
        }

        #[test]
        fn prop_state_only_references_catalog_items(events in prop::collection::vec(any_event(), 0..12)) {
            let catalog = catalog();
            let mut state = SelectionState::new();
            for event in &events {
                let _ = apply_remote(&mut state, &catalog, event);
            }
            prop_assert!(state.checked_by_item().keys().all(|id| catalog.contains(id.as_str())));
        }

        #[test]
        fn prop_applying_event_twice_matches_once(
            seed in prop::collection::vec(any_event(), 0..6),
            event in any_event(),
        ) {
            let catalog = catalog();
            let mut state = SelectionState::new();
            for e in &seed {
                let _ = apply_remote(&mut state, &catalog, e);
            }

            let mut once = state.clone();
            let _ = apply_remote(&mut once, &catalog, &event);
            let mut twice = once.clone();
            let _ = apply_remote(&mut twice, &catalog, &event);

            prop_assert_eq!(once, twice);
        }
    }
}
