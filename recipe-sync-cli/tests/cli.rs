//! End-to-end runs of the `recipe-sync` binary against the in-memory store

use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

const CATALOG: &str = r#"{
    "Pancakes": {"title": "Pancakes", "images": ["p1.jpg", "p2.jpg", null]},
    "Soup": {"title": "Soup", "images": ["s1.jpg"]}
}"#;

fn workspace() -> TempDir {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("recipes.json"), CATALOG).unwrap();
    dir
}

fn recipe_sync(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_recipe-sync"))
        .current_dir(dir)
        .env_remove("RUST_LOG")
        .args(["--catalog", "recipes.json", "--log-level", "error"])
        .args(args)
        .output()
        .unwrap()
}

#[test]
fn test_status_prints_empty_selection() {
    let dir = workspace();
    let out = recipe_sync(dir.path(), &["status"]);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));

    let snapshot: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(snapshot["checked_by_item"], serde_json::json!({}));
    assert_eq!(snapshot["selected_sub_items"], serde_json::json!([]));
}

#[test]
fn test_check_prints_upserted_record() {
    let dir = workspace();
    let out = recipe_sync(dir.path(), &["check", "Pancakes"]);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));

    let record: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(
        record,
        serde_json::json!({
            "recipe_name": "Pancakes",
            "is_checked": true,
            "selected_images": ["p1.jpg", "p2.jpg"]
        })
    );
}

#[test]
fn test_unknown_recipe_fails() {
    let dir = workspace();
    let out = recipe_sync(dir.path(), &["check", "Lasagna"]);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("Unknown item: Lasagna"));
}

#[test]
fn test_export_writes_download_file() {
    let dir = workspace();
    let out = recipe_sync(dir.path(), &["export"]);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));

    let body = std::fs::read_to_string(dir.path().join("selected_recipes.json")).unwrap();
    let exported: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(exported, serde_json::json!({}));
}

#[test]
fn test_missing_catalog_is_fatal() {
    let dir = TempDir::new().unwrap();
    let out = recipe_sync(dir.path(), &["status"]);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("loading catalog"));
}
