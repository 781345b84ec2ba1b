//! Two clients sharing one in-memory selection store
//!
//! Run with:
//! ```bash
//! RUST_LOG=debug cargo run --example two_clients
//! ```

use recipe_sync_core::config::SyncConfig;
use recipe_sync_core::core_catalog::{Catalog, SubItemRef};
use recipe_sync_core::core_export::render_json;
use recipe_sync_core::core_selection::{SyncEngine, SyncReport};
use recipe_sync_core::core_store::{ChangeOp, MemorySelectionStore, SelectionStore};
use recipe_sync_core::logging::{init_logging_with_config, LogConfig, LogLevel};
use std::sync::Arc;
use tracing::info;

const CATALOG: &str = r#"{
    "Shakshuka": {"title": "Shakshuka", "images": ["shakshuka-1.jpg", "shakshuka-2.jpg"]},
    "Ramen": {"title": "Ramen", "images": ["ramen-1.jpg", null]}
}"#;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging_with_config(LogConfig::new(LogLevel::Info).with_target(false))?;

    let catalog = Arc::new(Catalog::from_json_str(CATALOG)?);
    let store: Arc<dyn SelectionStore> = Arc::new(MemorySelectionStore::new());
    let config = SyncConfig::default();

    let (kitchen, _) = SyncEngine::start(catalog.clone(), store.clone(), &config);
    let (phone, _) = SyncEngine::start(catalog, store, &config);
    for handle in [&kitchen, &phone] {
        handle
            .wait_for_report(|r| matches!(r, SyncReport::Seeded { .. }))
            .await;
    }

    kitchen.check_item("Shakshuka").await?;
    phone
        .wait_for_report(|r| matches!(r, SyncReport::EventApplied { .. }))
        .await;
    info!("phone sees the kitchen's check");

    if let Some(image) = SubItemRef::parse("shakshuka-2.jpg") {
        phone.toggle_sub_item("Shakshuka", image).await?;
    }
    kitchen
        .wait_for_report(|r| matches!(r, SyncReport::EventApplied { op: ChangeOp::Update, .. }))
        .await;

    let export = kitchen.export().await?;
    println!("{}", render_json(&export, true)?);

    kitchen.shutdown().await?;
    phone.shutdown().await?;
    Ok(())
}
