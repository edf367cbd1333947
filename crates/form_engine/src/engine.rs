//! Form engine: live form state and step navigation.
//!
//! The engine owns the current values, the error map, the touched set and a
//! 1-based step pointer. It runs in one of two modes, chosen at build time:
//!
//! - declarative: built from a `FormDefinition`; seed values, per-step
//!   validation and the step count come from the schemas
//! - imperative: built from a form id, initial values and optional per-step
//!   validator closures
//!
//! Every mutation of values or of the step pointer schedules a save when
//! persistence is enabled (`SaveMode::Immediate` saves inside the call,
//! `SaveMode::Deferred` waits for `flush`).
//!
//! ```ignore
//! let mut engine = FormEngine::builder()
//!     .form_id("gender_title")
//!     .initial_values(values)
//!     .total_steps(2)
//!     .step_validator(1, |d: &FormData| {
//!         if d.get("title").and_then(Value::as_str).is_some_and(|t| !t.is_empty()) {
//!             StepCheck::Valid
//!         } else {
//!             StepCheck::from("Title is required")
//!         }
//!     })
//!     .build()?;
//! engine.set_field("title", "My Title");
//! assert!(engine.next_step());
//! ```

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use derivative::Derivative;
use log::{debug, trace, warn};
use serde_json::Value;

use crate::definition::FormDefinition;
use crate::errors::FormError;
use crate::field::{FieldSchema, FormData};
use crate::merge::MergeFrom;
use crate::step::{self, FieldErrors, StepCheck, StepSchema, StepValidationResult, StepValidatorFn};
use crate::storage::{FormSnapshot, KeyValueStore, SnapshotStorage, DEFAULT_KEY_PREFIX};
use crate::validation;

/// When auto-save writes to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SaveMode {
    /// Save inside every mutating call.
    #[default]
    Immediate,
    /// Mark a pending save; `FormEngine::flush` writes it.
    Deferred,
}

/// Error-map key for a step-level failure of step `n`.
pub fn step_error_key(n: usize) -> String {
    format!("step_{n}")
}

#[derive(Derivative)]
#[derivative(Debug)]
enum Mode {
    Declarative(Arc<FormDefinition>),
    Imperative {
        #[derivative(Debug = "ignore")]
        validators: BTreeMap<usize, StepValidatorFn>,
    },
}

/// Builder for `FormEngine`.
#[derive(Derivative, Default)]
#[derivative(Debug)]
pub struct FormEngineBuilder {
    definition: Option<Arc<FormDefinition>>,
    form_id: Option<String>,
    initial_values: Option<FormData>,
    total_steps: Option<usize>,
    #[derivative(Debug = "ignore")]
    step_validators: BTreeMap<usize, StepValidatorFn>,
    injected: FormData,
    #[derivative(Debug = "ignore")]
    store: Option<Arc<dyn KeyValueStore>>,
    persist: Option<bool>,
    excluded_fields: Vec<String>,
    initial_step: Option<usize>,
    key_prefix: Option<String>,
    save_mode: SaveMode,
}

impl FormEngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declarative mode. Accepts an owned definition or a cached `Arc`.
    pub fn definition(mut self, def: impl Into<Arc<FormDefinition>>) -> Self {
        self.definition = Some(def.into());
        self
    }

    /// Imperative mode id; in declarative mode overrides the definition id
    /// (e.g. one storage entry per edited record).
    pub fn form_id(mut self, id: impl Into<String>) -> Self {
        self.form_id = Some(id.into());
        self
    }

    /// Imperative seed values (also the `reset` target).
    pub fn initial_values(mut self, values: FormData) -> Self {
        self.initial_values = Some(values);
        self
    }

    pub fn total_steps(mut self, n: usize) -> Self {
        self.total_steps = Some(n);
        self
    }

    /// Imperative validator for step `n` (1-based).
    pub fn step_validator<F, R>(mut self, n: usize, f: F) -> Self
    where
        F: Fn(&FormData) -> R + Send + Sync + 'static,
        R: Into<StepCheck>,
    {
        self.step_validators
            .insert(n, Arc::new(move |data: &FormData| f(data).into()));
        self
    }

    /// Caller-supplied values applied over seed values and any persisted snapshot.
    pub fn inject_values(mut self, values: FormData) -> Self {
        self.injected.extend(values);
        self
    }

    pub fn storage(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Enable or disable auto-save and restore-on-build.
    pub fn persist(mut self, persist: bool) -> Self {
        self.persist = Some(persist);
        self
    }

    pub fn exclude_field(mut self, name: impl Into<String>) -> Self {
        self.excluded_fields.push(name.into());
        self
    }

    pub fn initial_step(mut self, n: usize) -> Self {
        self.initial_step = Some(n);
        self
    }

    pub fn key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }

    pub fn save_mode(mut self, mode: SaveMode) -> Self {
        self.save_mode = mode;
        self
    }

    pub fn build(self) -> Result<FormEngine, FormError> {
        let (form_id, mode, total_steps, seed, mut excluded, def_initial_step, def_persist) =
            match self.definition {
                Some(def) => {
                    if !self.step_validators.is_empty()
                        || self.initial_values.is_some()
                        || self.total_steps.is_some()
                    {
                        return Err(FormError::ConflictingModes);
                    }
                    def.check()?;
                    let form_id = self.form_id.unwrap_or_else(|| def.id.clone());
                    let seed = def.initial_values();
                    let total = def.total_steps();
                    let excluded = def.excluded_fields.clone();
                    let initial_step = def.initial_step;
                    let persist = def.persist_to_storage;
                    (form_id, Mode::Declarative(def), total, seed, excluded, initial_step, persist)
                }
                None => {
                    let form_id = self.form_id.ok_or(FormError::MissingFormId)?;
                    let seed = self.initial_values.ok_or(FormError::MissingInitialValues)?;
                    let highest = self.step_validators.keys().next_back().copied().unwrap_or(1);
                    let total = self.total_steps.unwrap_or(highest);
                    if total == 0 {
                        return Err(FormError::NoSteps);
                    }
                    let out_of_range = self
                        .step_validators
                        .keys()
                        .find(|&&n| n == 0 || n > total);
                    if let Some(&step) = out_of_range {
                        return Err(FormError::ValidatorOutOfRange { step, total });
                    }
                    let mode = Mode::Imperative {
                        validators: self.step_validators,
                    };
                    (form_id, mode, total, seed, Vec::new(), 1, self.store.is_some())
                }
            };

        let initial_step = self.initial_step.unwrap_or(def_initial_step);
        if !(1..=total_steps).contains(&initial_step) {
            return Err(FormError::InitialStepOutOfRange {
                step: initial_step,
                total: total_steps,
            });
        }

        excluded.extend(self.excluded_fields);
        let mut auto_save = self.persist.unwrap_or(def_persist);
        if auto_save && self.store.is_none() {
            warn!("form '{form_id}': persistence requested without a store; disabled");
            auto_save = false;
        }
        let storage = self.store.map(|store| SnapshotStorage::new(store, excluded));
        let storage_key = format!(
            "{}{}",
            self.key_prefix.as_deref().unwrap_or(DEFAULT_KEY_PREFIX),
            form_id
        );

        // Reset target: seed values with injected values applied.
        let mut initial_values = seed;
        for (k, v) in &self.injected {
            initial_values.insert(k.clone(), v.clone());
        }

        let mut engine = FormEngine {
            form_id,
            mode,
            total_steps,
            initial_step,
            form_data: initial_values.clone(),
            initial_values,
            errors: FieldErrors::new(),
            touched: BTreeSet::new(),
            current_step: initial_step,
            reported_keys: HashMap::new(),
            storage,
            storage_key,
            auto_save,
            save_mode: self.save_mode,
            pending_save: false,
        };

        if engine.auto_save && engine.load_from_storage() {
            // Injected values outrank whatever was persisted.
            for (k, v) in self.injected {
                engine.form_data.insert(k, v);
            }
        }

        debug!(
            "form '{}' ready: {} steps, starting at {}",
            engine.form_id, engine.total_steps, engine.current_step
        );
        Ok(engine)
    }
}

/// Live state of one multi-step form.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct FormEngine {
    form_id: String,
    mode: Mode,
    total_steps: usize,
    initial_step: usize,
    initial_values: FormData,
    form_data: FormData,
    errors: FieldErrors,
    touched: BTreeSet<String>,
    current_step: usize,
    /// Keys written by the last run of each step's validation.
    reported_keys: HashMap<usize, Vec<String>>,
    storage: Option<SnapshotStorage>,
    storage_key: String,
    auto_save: bool,
    save_mode: SaveMode,
    pending_save: bool,
}

impl FormEngine {
    pub fn builder() -> FormEngineBuilder {
        FormEngineBuilder::new()
    }

    pub fn form_id(&self) -> &str {
        &self.form_id
    }

    pub fn storage_key(&self) -> &str {
        &self.storage_key
    }

    pub fn definition(&self) -> Option<&FormDefinition> {
        match &self.mode {
            Mode::Declarative(def) => Some(def.as_ref()),
            Mode::Imperative { .. } => None,
        }
    }

    // ---- values -----------------------------------------------------------

    pub fn form_data(&self) -> &FormData {
        &self.form_data
    }

    pub fn get_field(&self, name: &str) -> Option<&Value> {
        self.form_data.get(name)
    }

    /// Overwrite a value and drop that field's error. Does not mark it touched.
    pub fn set_field(&mut self, name: &str, value: impl Into<Value>) {
        self.form_data.insert(name.to_string(), value.into());
        self.errors.remove(name);
        self.schedule_save();
    }

    /// `set_field` for each entry, in order.
    pub fn set_fields<I, K, V>(&mut self, values: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        for (k, v) in values {
            self.set_field(k.as_ref(), v);
        }
    }

    /// True when the values differ from the reset target.
    pub fn is_dirty(&self) -> bool {
        self.form_data != self.initial_values
    }

    // ---- touch & errors ---------------------------------------------------

    pub fn touch_field(&mut self, name: &str) {
        self.touched.insert(name.to_string());
    }

    /// Touch and immediately re-validate the current step.
    pub fn mark_field_as_touched(&mut self, name: &str) {
        self.touch_field(name);
        self.validate_step(self.current_step);
    }

    pub fn is_touched(&self, name: &str) -> bool {
        self.touched.contains(name)
    }

    pub fn touched_fields(&self) -> &BTreeSet<String> {
        &self.touched
    }

    /// Recorded error for `name`, surfaced only once the field was touched
    /// (or when `show_if_untouched` is set).
    pub fn get_field_error(&self, name: &str, show_if_untouched: bool) -> Option<&str> {
        if !show_if_untouched && !self.touched.contains(name) {
            return None;
        }
        self.errors.get(name).map(String::as_str)
    }

    /// Step-level error recorded for step `n`.
    pub fn step_error(&self, n: usize) -> Option<&str> {
        self.errors.get(&step_error_key(n)).map(String::as_str)
    }

    pub fn errors(&self) -> &FieldErrors {
        &self.errors
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    // ---- validation -------------------------------------------------------

    /// Validate step `n`, replacing the errors that step reported last time.
    /// Out-of-range steps are invalid and change nothing.
    pub fn validate_step(&mut self, n: usize) -> bool {
        if !(1..=self.total_steps).contains(&n) {
            return false;
        }

        let result = match &self.mode {
            Mode::Declarative(def) => def
                .step(n)
                .map(|s| step::validate_step(s, &self.form_data))
                .unwrap_or_default(),
            Mode::Imperative { validators } => validators
                .get(&n)
                .map(|v| StepValidationResult::from(v(&self.form_data)))
                .unwrap_or_default(),
        };

        let mut stale = self.reported_keys.remove(&n).unwrap_or_default();
        if let Some(def) = self.definition() {
            if let Some(s) = def.step(n) {
                stale.extend(s.fields.iter().map(|f| f.name.clone()));
            }
        }
        stale.push(step_error_key(n));
        for key in &stale {
            self.errors.remove(key);
        }

        let mut reported = Vec::with_capacity(result.field_errors.len() + 1);
        for (field, message) in result.field_errors {
            reported.push(field.clone());
            self.errors.insert(field, message);
        }
        if let Some(message) = result.step_error {
            let key = step_error_key(n);
            reported.push(key.clone());
            self.errors.insert(key, message);
        }
        self.reported_keys.insert(n, reported);

        debug!("form '{}': step {n} valid={}", self.form_id, result.valid);
        result.valid
    }

    /// Clear every error, then validate all steps (no short-circuit).
    pub fn validate_all(&mut self) -> bool {
        self.errors.clear();
        self.reported_keys.clear();
        let mut all_valid = true;
        for n in 1..=self.total_steps {
            all_valid &= self.validate_step(n);
        }
        all_valid
    }

    /// Validate a single field by name and record the outcome (declarative mode).
    pub fn validate_field(&mut self, name: &str) -> Option<String> {
        let field = self.field_definition(name)?;
        let value = self.form_data.get(name).unwrap_or(&Value::Null);
        let result = validation::validate(field, value, &self.form_data);
        match &result {
            Some(message) => {
                self.errors.insert(name.to_string(), message.clone());
            }
            None => {
                self.errors.remove(name);
            }
        }
        result
    }

    // ---- navigation -------------------------------------------------------

    pub fn current_step(&self) -> usize {
        self.current_step
    }

    pub fn total_steps(&self) -> usize {
        self.total_steps
    }

    pub fn is_first_step(&self) -> bool {
        self.current_step == 1
    }

    pub fn is_last_step(&self) -> bool {
        self.current_step == self.total_steps
    }

    /// Advance if the current step validates and is not the last one.
    pub fn next_step(&mut self) -> bool {
        if !self.validate_step(self.current_step) {
            return false;
        }
        if self.current_step >= self.total_steps {
            return false;
        }
        self.current_step += 1;
        debug!("form '{}': next -> step {}", self.form_id, self.current_step);
        self.schedule_save();
        true
    }

    /// Go back one step. Never validates.
    pub fn previous_step(&mut self) -> bool {
        if self.current_step <= 1 {
            return false;
        }
        self.current_step -= 1;
        debug!("form '{}': previous -> step {}", self.form_id, self.current_step);
        self.schedule_save();
        true
    }

    /// Jump to step `n` without validation.
    pub fn go_to_step(&mut self, n: usize) -> bool {
        if !(1..=self.total_steps).contains(&n) {
            return false;
        }
        self.current_step = n;
        debug!("form '{}': jump -> step {n}", self.form_id);
        self.schedule_save();
        true
    }

    // ---- lifecycle --------------------------------------------------------

    /// Restore in-memory state only; persisted storage is left alone.
    pub fn reset(&mut self) {
        self.form_data = self.initial_values.clone();
        self.errors.clear();
        self.reported_keys.clear();
        self.touched.clear();
        self.current_step = self.initial_step;
        self.pending_save = false;
    }

    /// `reset` plus removal of the persisted snapshot.
    pub fn clear(&mut self) {
        self.reset();
        self.clear_storage();
    }

    // ---- persistence ------------------------------------------------------

    /// Write the current values and step. Returns whether a snapshot was stored.
    pub fn save_to_storage(&mut self) -> bool {
        let Some(storage) = &self.storage else {
            return false;
        };
        self.pending_save = false;
        let snapshot = FormSnapshot::new(self.form_data.clone(), self.current_step);
        storage.save(&self.storage_key, &snapshot)
    }

    /// Merge the persisted snapshot into the live values. The stored step is
    /// honored only if it is within range. Returns whether a snapshot was found.
    pub fn load_from_storage(&mut self) -> bool {
        let Some(snapshot) = self.storage.as_ref().and_then(|s| s.load(&self.storage_key)) else {
            return false;
        };
        self.form_data.merge_from_option(Some(&snapshot.form_data));
        if (1..=self.total_steps).contains(&snapshot.current_step) {
            self.current_step = snapshot.current_step;
        } else {
            debug!(
                "form '{}': ignoring persisted step {} (total {})",
                self.form_id, snapshot.current_step, self.total_steps
            );
        }
        true
    }

    pub fn clear_storage(&mut self) -> bool {
        self.pending_save = false;
        self.storage
            .as_ref()
            .is_some_and(|s| s.remove(&self.storage_key))
    }

    /// Write a deferred auto-save, if one is pending.
    pub fn flush(&mut self) -> bool {
        if !self.pending_save {
            return false;
        }
        self.save_to_storage()
    }

    pub fn has_pending_save(&self) -> bool {
        self.pending_save
    }

    fn schedule_save(&mut self) {
        if !self.auto_save {
            return;
        }
        match self.save_mode {
            SaveMode::Immediate => {
                self.save_to_storage();
            }
            SaveMode::Deferred => {
                trace!("form '{}': save deferred", self.form_id);
                self.pending_save = true;
            }
        }
    }

    // ---- schema lookups (declarative mode) --------------------------------

    pub fn field_definition(&self, name: &str) -> Option<&FieldSchema> {
        self.definition().and_then(|d| d.field(name))
    }

    pub fn step_schema(&self, n: usize) -> Option<&StepSchema> {
        self.definition().and_then(|d| d.step(n))
    }

    /// Unknown fields and imperative-mode fields count as visible.
    pub fn is_field_visible(&self, name: &str) -> bool {
        self.field_definition(name)
            .map_or(true, |f| f.is_visible(&self.form_data))
    }

    pub fn is_field_disabled(&self, name: &str) -> bool {
        self.field_definition(name)
            .is_some_and(|f| f.is_disabled(&self.form_data))
    }

    /// Fields of step `n` currently visible.
    pub fn visible_fields(&self, n: usize) -> Vec<&FieldSchema> {
        self.step_schema(n)
            .map(|s| {
                s.fields
                    .iter()
                    .filter(|f| f.is_visible(&self.form_data))
                    .collect()
            })
            .unwrap_or_default()
    }
}
