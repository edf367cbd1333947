use std::sync::Arc;

use form_engine::{
    CustomOutcome, DefinitionCache, FieldErrors, FormData, FormDefinition, FormEngine, FormError,
    MemoryStore, StepCheck, ValidationRule,
};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

const BOOKING_RON: &str = r#"(
    id: "voice_booking",
    persistToStorage: true,
    excludedFields: ["script_file"],
    steps: [
        (
            title: Some("Client"),
            fields: [
                (name: "client_type", type: "select", defaultValue: Some("private"),
                 options: ["private", "business"]),
                (name: "company", type: "text", required: true,
                 dependencies: [(field: "client_type", operator: "equals", value: "business")]),
                (name: "email", type: "email", required: true),
            ],
        ),
        (
            title: Some("Job"),
            fields: [
                (name: "words", type: "number", required: true,
                 validationRules: [(type: "min", value: 50.0), (type: "max", value: 5000.0)]),
                (name: "script_file", type: "file"),
            ],
        ),
        (
            title: Some("Confirm"),
            fields: [
                (name: "accept_terms", type: "checkbox"),
            ],
        ),
    ],
)"#;

fn load(id: &str) -> Result<FormDefinition, FormError> {
    let mut def = FormDefinition::from_ron_str(BOOKING_RON)?;
    assert_eq!(def.id, id);
    if let Some(email) = def.field_mut("email") {
        let studio_only = |value: &Value, _: &FormData| -> CustomOutcome {
            value.as_str().is_some_and(|s| !s.ends_with("@example.com")).into()
        };
        email.validation_rules.push(ValidationRule::custom(studio_only));
    }
    if let Some(step) = def.step_mut(3) {
        step.step_validator = Some(Arc::new(|d: &FormData| {
            StepCheck::from(d.get("accept_terms") == Some(&json!(true)))
        }));
    }
    Ok(def)
}

fn engine(cache: &DefinitionCache, store: &MemoryStore) -> FormEngine {
    let def = cache
        .get_or_load("voice_booking", false, load)
        .expect("definition loads");
    FormEngine::builder()
        .definition(def)
        .storage(Arc::new(store.clone()))
        .build()
        .expect("build engine")
}

#[test]
fn walks_through_all_steps() {
    let cache = DefinitionCache::new();
    let store = MemoryStore::new();
    let mut form = engine(&cache, &store);

    assert_eq!(form.total_steps(), 3);
    assert!(form.is_first_step());
    assert_eq!(form.get_field("client_type"), Some(&json!("private")));
    assert_eq!(form.get_field("accept_terms"), Some(&json!(false)));

    // company is hidden for private clients, so only email blocks.
    assert!(!form.next_step());
    assert_eq!(form.get_field_error("email", true), Some("Email is required"));
    assert_eq!(form.get_field_error("email", false), None);
    assert_eq!(form.get_field_error("company", true), None);

    form.set_field("email", "me@example.com");
    assert!(!form.next_step());
    assert_eq!(form.get_field_error("email", true), Some("Email is invalid"));

    form.set_field("email", "me@studio.io");
    assert!(form.next_step());
    assert_eq!(form.current_step(), 2);

    form.set_field("words", "20");
    assert!(!form.next_step());
    assert_eq!(form.get_field_error("words", true), Some("Words must be at least 50"));

    form.set_field("words", 1200);
    assert!(form.next_step());
    assert!(form.is_last_step());

    assert!(!form.next_step());
    assert_eq!(form.step_error(3), Some("Step is invalid"));

    form.set_field("accept_terms", true);
    assert!(form.validate_step(3));
    assert_eq!(form.step_error(3), None);
    assert!(!form.next_step());
    assert!(form.validate_all());
}

#[test]
fn dependency_reveals_required_field() {
    let cache = DefinitionCache::new();
    let store = MemoryStore::new();
    let mut form = engine(&cache, &store);

    form.set_field("email", "me@studio.io");
    form.set_field("client_type", "business");
    assert!(form.is_field_visible("company"));
    assert!(!form.next_step());
    assert_eq!(form.get_field_error("company", true), Some("Company is required"));

    let visible: Vec<&str> = form.visible_fields(1).iter().map(|f| f.name.as_str()).collect();
    assert_eq!(visible, vec!["client_type", "company", "email"]);

    form.set_field("client_type", "private");
    assert!(form.next_step());
    assert_eq!(form.errors(), &FieldErrors::new());
}

#[test]
fn validate_all_collects_every_step() {
    let cache = DefinitionCache::new();
    let store = MemoryStore::new();
    let mut form = engine(&cache, &store);

    assert!(!form.validate_all());
    let keys: Vec<&str> = form.errors().keys().map(String::as_str).collect();
    assert_eq!(keys, vec!["email", "step_3", "words"]);
    assert_eq!(form.current_step(), 1);
}

#[test]
fn cached_definition_is_shared_between_engines() {
    let cache = DefinitionCache::new();
    let store = MemoryStore::new();

    let mut first = engine(&cache, &store);
    first.set_field("email", "me@studio.io");
    first.set_field("script_file", json!({"handle": 9}));
    assert!(first.next_step());
    assert_eq!(cache.len(), 1);

    let second = engine(&cache, &store);
    assert_eq!(second.current_step(), 2);
    assert_eq!(second.get_field("email"), Some(&json!("me@studio.io")));
    assert_eq!(second.get_field("script_file"), Some(&json!("")));
    assert_eq!(second.definition().map(|d| d.id.as_str()), Some("voice_booking"));
}

#[test]
fn custom_outcome_shapes() {
    assert_eq!(CustomOutcome::from(true), CustomOutcome::Valid);
    assert_eq!(CustomOutcome::from(false), CustomOutcome::Invalid);
    assert_eq!(CustomOutcome::from("taken"), CustomOutcome::Message("taken".to_string()));
}
