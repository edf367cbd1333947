//! Integration tests for persisted form state:
//! - Round trip through a shared store into a fresh engine
//! - Type-aware merge of nested objects on restore
//! - Excluded fields never reaching storage
//! - reset vs clear
//! - Corrupt snapshots and out-of-range steps

use std::sync::Arc;

use form_engine::{
    FieldKind, FieldSchema, FileStore, FormData, FormDefinition, FormEngine, KeyValueStore,
    MemoryStore, StepCheck, StepSchema,
};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tempfile::TempDir;

fn data(v: Value) -> FormData {
    v.as_object().cloned().unwrap_or_default()
}

fn title_engine(store: Arc<dyn KeyValueStore>) -> FormEngine {
    FormEngine::builder()
        .form_id("gender_title")
        .initial_values(data(json!({"title": "", "description": ""})))
        .total_steps(2)
        .step_validator(1, |d: &FormData| match d.get("title").and_then(Value::as_str) {
            Some(t) if !t.is_empty() => StepCheck::Valid,
            _ => StepCheck::from("Title is required"),
        })
        .storage(store)
        .build()
        .expect("build engine")
}

#[test]
fn round_trip_restores_values_and_step() {
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());

    let mut engine = title_engine(store.clone());
    engine.set_field("title", "My Title");
    assert!(engine.next_step());
    engine.set_field("description", "Narrator, warm voice");
    assert!(engine.save_to_storage());

    let restored = title_engine(store);
    assert_eq!(restored.current_step(), 2);
    assert_eq!(
        restored.form_data(),
        &data(json!({"title": "My Title", "description": "Narrator, warm voice"}))
    );
}

#[test]
fn snapshot_wire_format() {
    let store = MemoryStore::new();
    let mut engine = title_engine(Arc::new(store.clone()));
    engine.set_field("title", "x");

    let raw = store.get("form_gender_title").unwrap().expect("snapshot written");
    let raw: Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(raw["formData"], json!({"title": "x", "description": ""}));
    assert_eq!(raw["currentStep"], json!(1));
    assert!(raw["timestamp"].is_string());
}

#[test]
fn nested_objects_merge_on_restore() {
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let seed = data(json!({"user": {"name": "", "contact": {"email": "", "phone": ""}}}));
    let build = |store: Arc<dyn KeyValueStore>| {
        FormEngine::builder()
            .form_id("nested")
            .initial_values(seed.clone())
            .storage(store)
            .build()
            .expect("build engine")
    };

    let mut engine = build(store.clone());
    engine.set_field("user", json!({"name": "John", "contact": {"email": "j@x.com"}}));
    engine.save_to_storage();

    let restored = build(store);
    let user = restored.get_field("user").expect("user present");
    assert_eq!(user["name"], json!("John"));
    assert_eq!(user["contact"]["email"], json!("j@x.com"));
    assert_eq!(user["contact"]["phone"], json!(""));
}

#[test]
fn excluded_field_is_never_persisted() {
    let store = MemoryStore::new();
    let definition = || {
        FormDefinition::new(
            "upload",
            vec![StepSchema::new(
                1,
                vec![
                    FieldSchema::new("title", FieldKind::Text),
                    FieldSchema::new("file", FieldKind::File),
                ],
            )],
        )
        .persist(true)
        .exclude("file")
    };

    let mut engine = FormEngine::builder()
        .definition(definition())
        .storage(Arc::new(store.clone()))
        .build()
        .unwrap();
    engine.set_field("title", "Demo reel");
    engine.set_field("file", json!({"handle": 42, "name": "reel.wav"}));
    engine.save_to_storage();

    let raw: Value = serde_json::from_str(&store.get("form_upload").unwrap().unwrap()).unwrap();
    assert!(raw["formData"].get("file").is_none());
    assert_eq!(raw["formData"]["title"], json!("Demo reel"));

    let restored = FormEngine::builder()
        .definition(definition())
        .storage(Arc::new(store))
        .build()
        .unwrap();
    assert_eq!(restored.get_field("title"), Some(&json!("Demo reel")));
    assert_eq!(restored.get_field("file"), Some(&json!("")));
}

#[test]
fn reset_keeps_storage_clear_removes_it() {
    let store = MemoryStore::new();
    let mut engine = title_engine(Arc::new(store.clone()));
    engine.set_field("title", "kept");
    assert!(store.contains("form_gender_title"));

    engine.reset();
    assert_eq!(engine.get_field("title"), Some(&json!("")));
    assert!(store.contains("form_gender_title"));
    let raw = store.get("form_gender_title").unwrap().unwrap();
    let raw: Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(raw["formData"]["title"], json!("kept"));

    engine.clear();
    assert!(!store.contains("form_gender_title"));
    assert_eq!(engine.get_field("title"), Some(&json!("")));
}

#[test]
fn corrupt_snapshot_is_ignored() {
    let store = MemoryStore::new();
    store.set("form_gender_title", "{\"formData\": ").unwrap();

    let engine = title_engine(Arc::new(store));
    assert_eq!(engine.current_step(), 1);
    assert_eq!(engine.get_field("title"), Some(&json!("")));
}

#[test]
fn out_of_range_step_is_not_restored() {
    let store = MemoryStore::new();
    let snapshot = json!({
        "formData": {"title": "old"},
        "currentStep": 9,
        "timestamp": "2026-01-01T00:00:00Z"
    });
    store.set("form_gender_title", &snapshot.to_string()).unwrap();

    let engine = title_engine(Arc::new(store));
    assert_eq!(engine.current_step(), 1);
    assert_eq!(engine.get_field("title"), Some(&json!("old")));
}

#[test]
fn two_engines_share_a_key_last_write_wins() {
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let mut a = title_engine(store.clone());
    let mut b = title_engine(store.clone());
    a.set_field("title", "from a");
    b.set_field("title", "from b");

    let restored = title_engine(store);
    assert_eq!(restored.get_field("title"), Some(&json!("from b")));
}

#[test]
fn file_store_round_trip_through_engine() {
    let tmp = TempDir::new().unwrap();
    let store: Arc<dyn KeyValueStore> =
        Arc::new(FileStore::open(tmp.path().join("forms")).expect("open store"));

    let mut engine = title_engine(store.clone());
    engine.set_field("title", "On disk");
    assert!(engine.go_to_step(2));

    let restored = title_engine(store);
    assert_eq!(restored.current_step(), 2);
    assert_eq!(restored.get_field("title"), Some(&json!("On disk")));
    assert!(tmp.path().join("forms/form_gender_title.json").exists());
}
