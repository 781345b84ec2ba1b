#![no_main]

use libfuzzer_sys::fuzz_target;
use recipe_sync_core::core_catalog::Catalog;

fuzz_target!(|data: &[u8]| {
    if let Ok(json_str) = std::str::from_utf8(data) {
        if let Ok(catalog) = Catalog::from_json_str(json_str) {
            for (_, item) in catalog.iter() {
                assert!(item.present_sub_items().all(|r| r.as_str() != "null"));
            }
        }
    }
});
