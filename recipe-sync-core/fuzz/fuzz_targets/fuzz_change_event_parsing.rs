#![no_main]

use libfuzzer_sys::fuzz_target;
use recipe_sync_core::core_catalog::Catalog;
use recipe_sync_core::core_selection::{apply_remote, SelectionState};
use recipe_sync_core::core_store::{ChangeEvent, ChangeOp, SelectionRecord};

fuzz_target!(|data: &[u8]| {
    // Arbitrary push payloads must be applied or discarded, never panic
    let Ok(json_str) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(value) = serde_json::from_str::<serde_json::Value>(json_str) else {
        return;
    };

    let _ = SelectionRecord::from_json(&value);

    let catalog = Catalog::from_json_str(r#"{"A": {"images": ["s1", null]}, "B": {"images": ["s1"]}}"#)
        .unwrap_or_default();
    for op in [ChangeOp::Insert, ChangeOp::Update, ChangeOp::Delete] {
        let mut state = SelectionState::new();
        let _ = apply_remote(&mut state, &catalog, &ChangeEvent::new(op, value.clone()));
        assert!(state.selected_sub_items().iter().all(|r| r.as_str() != "null"));
    }
});
