//! Step schema and step validation.
//!
//! A `StepSchema` groups fields under a title together with an optional
//! step-level (cross-field) validator. Step validators may answer in any of
//! the legacy shapes (`bool`, a message, a field-error map); `StepCheck`
//! adapts them and `StepValidationResult` is the single normalized result.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use derivative::Derivative;
use serde::Deserialize;

use crate::field::{FieldSchema, FormData};
use crate::validation;

/// Synthetic key under which a step-level failure is reported.
pub const STEP_ERROR_KEY: &str = "_step";

/// Default message for a step validator answering plain `false`.
pub const DEFAULT_STEP_ERROR: &str = "Step is invalid";

/// Field name -> message.
pub type FieldErrors = BTreeMap<String, String>;

/// Step-level validator over the whole form.
pub type StepValidatorFn = Arc<dyn Fn(&FormData) -> StepCheck + Send + Sync>;

/// Raw answer of a step validator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepCheck {
    Valid,
    /// Whole-step failure (the legacy string shape).
    Invalid(String),
    FieldErrors(FieldErrors),
}

impl From<bool> for StepCheck {
    fn from(ok: bool) -> Self {
        if ok {
            Self::Valid
        } else {
            Self::Invalid(DEFAULT_STEP_ERROR.to_string())
        }
    }
}

impl From<&str> for StepCheck {
    fn from(message: &str) -> Self {
        Self::Invalid(message.to_string())
    }
}

impl From<String> for StepCheck {
    fn from(message: String) -> Self {
        Self::Invalid(message)
    }
}

impl From<Result<(), String>> for StepCheck {
    fn from(result: Result<(), String>) -> Self {
        result.map_or_else(Self::Invalid, |()| Self::Valid)
    }
}

impl From<FieldErrors> for StepCheck {
    fn from(errors: FieldErrors) -> Self {
        if errors.is_empty() {
            Self::Valid
        } else {
            Self::FieldErrors(errors)
        }
    }
}

impl From<HashMap<String, String>> for StepCheck {
    fn from(errors: HashMap<String, String>) -> Self {
        errors.into_iter().collect::<FieldErrors>().into()
    }
}

/// Normalized outcome of validating one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepValidationResult {
    pub valid: bool,
    pub field_errors: FieldErrors,
    pub step_error: Option<String>,
}

impl Default for StepValidationResult {
    fn default() -> Self {
        Self::passed()
    }
}

impl StepValidationResult {
    pub fn passed() -> Self {
        Self {
            valid: true,
            field_errors: FieldErrors::new(),
            step_error: None,
        }
    }

    fn from_parts(field_errors: FieldErrors, step_error: Option<String>) -> Self {
        Self {
            valid: field_errors.is_empty() && step_error.is_none(),
            field_errors,
            step_error,
        }
    }

    /// Flat error map; a step-level failure appears under `STEP_ERROR_KEY`.
    pub fn errors(&self) -> FieldErrors {
        let mut all = self.field_errors.clone();
        if let Some(message) = &self.step_error {
            all.insert(STEP_ERROR_KEY.to_string(), message.clone());
        }
        all
    }
}

impl From<StepCheck> for StepValidationResult {
    fn from(check: StepCheck) -> Self {
        match check {
            StepCheck::Valid => Self::passed(),
            StepCheck::Invalid(message) => Self::from_parts(FieldErrors::new(), Some(message)),
            StepCheck::FieldErrors(errors) => Self::from_parts(errors, None),
        }
    }
}

/// A titled group of fields.
#[derive(Derivative, Clone, Deserialize)]
#[derivative(Debug)]
#[serde(rename_all = "camelCase")]
pub struct StepSchema {
    #[serde(default)]
    pub index: usize,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub fields: Vec<FieldSchema>,
    #[serde(skip)]
    #[derivative(Debug = "ignore")]
    pub step_validator: Option<StepValidatorFn>,
}

impl StepSchema {
    pub fn new(index: usize, fields: Vec<FieldSchema>) -> Self {
        Self {
            index,
            title: None,
            description: None,
            fields,
            step_validator: None,
        }
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    /// Attach a cross-field validator. Runs only when every field passed.
    pub fn validator<F, R>(mut self, f: F) -> Self
    where
        F: Fn(&FormData) -> R + Send + Sync + 'static,
        R: Into<StepCheck>,
    {
        self.step_validator = Some(Arc::new(move |data: &FormData| f(data).into()));
        self
    }

    pub fn field_by_name(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_by_name_mut(&mut self, name: &str) -> Option<&mut FieldSchema> {
        self.fields.iter_mut().find(|f| f.name == name)
    }
}

/// Validate every field of `step` (no short-circuit across fields), then the
/// step validator if all fields passed.
pub fn validate_step(step: &StepSchema, data: &FormData) -> StepValidationResult {
    let mut field_errors = FieldErrors::new();
    for field in &step.fields {
        let value = data.get(&field.name).unwrap_or(&serde_json::Value::Null);
        if let Some(message) = validation::validate(field, value, data) {
            field_errors.insert(field.name.clone(), message);
        }
    }

    if !field_errors.is_empty() {
        return StepValidationResult::from_parts(field_errors, None);
    }

    match &step.step_validator {
        Some(validator) => StepValidationResult::from(validator(data)),
        None => StepValidationResult::passed(),
    }
}
