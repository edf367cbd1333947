//! Form definitions and their cache.
//!
//! A `FormDefinition` is the declarative container for a whole multi-step
//! form: ordered steps plus persistence options. Definitions usually arrive
//! as server-supplied configuration (RON or JSON); closures (custom rules,
//! dynamic predicates, step validators) are attached in code afterwards via
//! `field_mut` / `step_mut`.
//!
//! Typical usage:
//! ```ignore
//! let mut def = FormDefinition::from_json_str(&config_text)?;
//! if let Some(step) = def.step_mut(2) {
//!     step.step_validator = Some(Arc::new(|d| StepCheck::from(d.contains_key("title"))));
//! }
//! let engine = FormEngine::builder().definition(def).build()?;
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};

use log::debug;
use serde::Deserialize;

use crate::errors::FormError;
use crate::field::{FieldSchema, FormData};
use crate::step::StepSchema;

fn default_initial_step() -> usize {
    1
}

/// Ordered steps with global persistence options.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormDefinition {
    pub id: String,
    pub steps: Vec<StepSchema>,
    #[serde(default)]
    pub persist_to_storage: bool,
    /// Fields never written to storage (e.g. file handles).
    #[serde(default)]
    pub excluded_fields: Vec<String>,
    #[serde(default = "default_initial_step")]
    pub initial_step: usize,
}

impl FormDefinition {
    /// Create a definition; step indices are renumbered 1..=N by position.
    pub fn new(id: impl Into<String>, steps: Vec<StepSchema>) -> Self {
        let mut def = Self {
            id: id.into(),
            steps,
            persist_to_storage: false,
            excluded_fields: Vec::new(),
            initial_step: 1,
        };
        def.renumber();
        def
    }

    pub fn persist(mut self, persist: bool) -> Self {
        self.persist_to_storage = persist;
        self
    }

    pub fn exclude(mut self, field: impl Into<String>) -> Self {
        self.excluded_fields.push(field.into());
        self
    }

    pub fn initial_step(mut self, step: usize) -> Self {
        self.initial_step = step;
        self
    }

    /// Parse a definition from RON text.
    pub fn from_ron_str(text: &str) -> Result<Self, FormError> {
        let mut def: Self = ron::from_str(text)?;
        def.renumber();
        def.check()?;
        Ok(def)
    }

    /// Parse a definition from JSON text (the shape served by the admin API).
    pub fn from_json_str(text: &str) -> Result<Self, FormError> {
        let mut def: Self = serde_json::from_str(text)?;
        def.renumber();
        def.check()?;
        Ok(def)
    }

    fn renumber(&mut self) {
        for (i, step) in self.steps.iter_mut().enumerate() {
            step.index = i + 1;
        }
    }

    /// Structural checks: at least one step, initial step in range, unique field names.
    pub fn check(&self) -> Result<(), FormError> {
        let total = self.total_steps();
        if total == 0 {
            return Err(FormError::NoSteps);
        }
        if !(1..=total).contains(&self.initial_step) {
            return Err(FormError::InitialStepOutOfRange {
                step: self.initial_step,
                total,
            });
        }
        let mut seen = HashSet::new();
        for field in self.fields() {
            if !seen.insert(field.name.as_str()) {
                return Err(FormError::DuplicateField(field.name.clone()));
            }
        }
        Ok(())
    }

    pub fn total_steps(&self) -> usize {
        self.steps.len()
    }

    /// Step by 1-based position.
    pub fn step(&self, n: usize) -> Option<&StepSchema> {
        n.checked_sub(1).and_then(|i| self.steps.get(i))
    }

    pub fn step_mut(&mut self, n: usize) -> Option<&mut StepSchema> {
        n.checked_sub(1).and_then(move |i| self.steps.get_mut(i))
    }

    /// All fields across steps, in step order.
    pub fn fields(&self) -> impl Iterator<Item = &FieldSchema> {
        self.steps.iter().flat_map(|s| s.fields.iter())
    }

    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.steps.iter().find_map(|s| s.field_by_name(name))
    }

    pub fn field_mut(&mut self, name: &str) -> Option<&mut FieldSchema> {
        self.steps
            .iter_mut()
            .find_map(|s| s.field_by_name_mut(name))
    }

    /// Seed values: each field's default value or its kind's empty value.
    pub fn initial_values(&self) -> FormData {
        self.fields()
            .map(|f| (f.name.clone(), f.initial_value()))
            .collect()
    }
}

/// Explicit cache of loaded definitions keyed by form id.
///
/// Owned by whoever builds engines; `force` bypasses the cached entry.
#[derive(Default)]
pub struct DefinitionCache {
    entries: RwLock<HashMap<String, Arc<FormDefinition>>>,
}

impl DefinitionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached definition for `id`, or run `loader` (always when
    /// `force` is set) and cache its result. Loader errors are not cached.
    pub fn get_or_load<F>(
        &self,
        id: &str,
        force: bool,
        loader: F,
    ) -> Result<Arc<FormDefinition>, FormError>
    where
        F: FnOnce(&str) -> Result<FormDefinition, FormError>,
    {
        if !force {
            if let Some(def) = self.get(id) {
                return Ok(def);
            }
        }
        debug!("loading form definition '{id}' (force={force})");
        let def = loader(id)?;
        def.check()?;
        let def = Arc::new(def);
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.to_string(), Arc::clone(&def));
        Ok(def)
    }

    pub fn get(&self, id: &str) -> Option<Arc<FormDefinition>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    pub fn insert(&self, def: FormDefinition) -> Arc<FormDefinition> {
        let def = Arc::new(def);
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(def.id.clone(), Arc::clone(&def));
        def
    }

    /// Drop one entry; returns whether it was cached.
    pub fn invalidate(&self, id: &str) -> bool {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
            .is_some()
    }

    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{FieldKind, ValidationRule};
    use serde_json::json;
    use std::cell::Cell;

    const TALENT_RON: &str = r#"(
        id: "talent_onboarding",
        persistToStorage: true,
        excludedFields: ["demo_reel"],
        steps: [
            (
                title: Some("Profile"),
                fields: [
                    (name: "display_name", type: "text", required: true,
                     validationRules: [(type: "minLength", value: 2)]),
                    (name: "gender", type: "select", options: ["female", "male", "other"]),
                ],
            ),
            (
                title: Some("Rates"),
                fields: [
                    (name: "hourly_rate", type: "number", defaultValue: Some(50),
                     validationRules: [(type: "min", value: 10.0, message: Some("Rate too low"))]),
                    (name: "demo_reel", type: "file"),
                ],
            ),
        ],
    )"#;

    #[test]
    fn parses_ron_definition() {
        let def = FormDefinition::from_ron_str(TALENT_RON).unwrap();
        assert_eq!(def.id, "talent_onboarding");
        assert_eq!(def.total_steps(), 2);
        assert_eq!(def.step(2).map(|s| s.index), Some(2));
        assert_eq!(def.step(2).and_then(|s| s.title.as_deref()), Some("Rates"));
        assert!(def.persist_to_storage);
        assert_eq!(def.initial_step, 1);
        assert_eq!(def.field("hourly_rate").map(|f| f.kind), Some(FieldKind::Number));
        assert!(matches!(
            def.field("display_name").map(|f| &f.validation_rules[0]),
            Some(ValidationRule::MinLength { value: 2, .. })
        ));
    }

    #[test]
    fn parses_json_definition() {
        let text = json!({
            "id": "contact",
            "initialStep": 1,
            "steps": [{"fields": [{"name": "email", "type": "email", "required": true}]}]
        })
        .to_string();
        let def = FormDefinition::from_json_str(&text).unwrap();
        assert_eq!(def.field("email").map(|f| f.is_required()), Some(true));
        assert!(!def.persist_to_storage);
    }

    #[test]
    fn initial_values_use_defaults_then_kind_empties() {
        let def = FormDefinition::from_ron_str(TALENT_RON).unwrap();
        let values = def.initial_values();
        assert_eq!(values.get("hourly_rate"), Some(&json!(50)));
        assert_eq!(values.get("display_name"), Some(&json!("")));
        assert_eq!(values.get("demo_reel"), Some(&json!("")));
    }

    #[test]
    fn rejects_broken_definitions() {
        let dup = FormDefinition::new(
            "dup",
            vec![
                StepSchema::new(1, vec![FieldSchema::new("a", FieldKind::Text)]),
                StepSchema::new(2, vec![FieldSchema::new("a", FieldKind::Text)]),
            ],
        );
        assert!(matches!(dup.check(), Err(FormError::DuplicateField(name)) if name == "a"));

        assert!(matches!(
            FormDefinition::new("empty", vec![]).check(),
            Err(FormError::NoSteps)
        ));

        let out_of_range =
            FormDefinition::new("x", vec![StepSchema::new(1, vec![])]).initial_step(3);
        assert!(matches!(
            out_of_range.check(),
            Err(FormError::InitialStepOutOfRange { step: 3, total: 1 })
        ));

        assert!(FormDefinition::from_json_str("{not json").is_err());
    }

    #[test]
    fn cache_loads_once_until_forced() {
        let cache = DefinitionCache::new();
        let calls = Cell::new(0);
        let loader = |id: &str| {
            calls.set(calls.get() + 1);
            Ok(FormDefinition::new(id, vec![StepSchema::new(1, vec![])]))
        };

        cache.get_or_load("a", false, loader).unwrap();
        cache.get_or_load("a", false, loader).unwrap();
        assert_eq!(calls.get(), 1);

        cache.get_or_load("a", true, loader).unwrap();
        assert_eq!(calls.get(), 2);

        assert!(cache.invalidate("a"));
        assert!(!cache.invalidate("a"));
        assert!(cache.is_empty());
    }

    #[test]
    fn cache_does_not_store_failures() {
        let cache = DefinitionCache::new();
        let result =
            cache.get_or_load("broken", false, |_| Err(FormError::Loader("offline".into())));
        assert!(result.is_err());
        assert!(cache.get("broken").is_none());
    }
}
