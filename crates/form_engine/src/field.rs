//! Field type & metadata.
//!
//! This module defines the declarative pieces of a form:
//! - `FieldKind`: closed enumeration of supported input kinds
//! - `ValidationRule`: ordered, typed rules attached to a field
//! - `Dependency` / `Condition`: visibility and disable logic
//! - `FieldSchema`: metadata + rules for a single field
//!
//! Everything here is pure data. Evaluation of rules lives in
//! `validation.rs`; mutation lives in `engine.rs`.
//!
//! Usage:
//! ```ignore
//! use form_engine::{FieldKind, FieldSchema};
//!
//! let field = FieldSchema::new("email", FieldKind::Email)
//!     .required()
//!     .custom(|value, _data| value.as_str().is_some_and(|s| s.contains('@')).into());
//! ```

use std::borrow::Cow;
use std::sync::Arc;

use derivative::Derivative;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::{AsRefStr, Display, EnumIter, EnumString};

/// Live form values keyed by field name (flat namespace, insertion ordered).
pub type FormData = Map<String, Value>;

/// Result of a custom rule: the `true | false | "message"` shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CustomOutcome {
    Valid,
    Invalid,
    Message(String),
}

impl From<bool> for CustomOutcome {
    fn from(ok: bool) -> Self {
        if ok { Self::Valid } else { Self::Invalid }
    }
}

impl From<String> for CustomOutcome {
    fn from(message: String) -> Self {
        Self::Message(message)
    }
}

impl From<&str> for CustomOutcome {
    fn from(message: &str) -> Self {
        Self::Message(message.to_string())
    }
}

impl From<Result<(), String>> for CustomOutcome {
    fn from(result: Result<(), String>) -> Self {
        match result {
            Ok(()) => Self::Valid,
            Err(message) => Self::Message(message),
        }
    }
}

/// Custom rule closure: receives the normalized value and the whole form.
pub type CustomValidator = Arc<dyn Fn(&Value, &FormData) -> CustomOutcome + Send + Sync>;

/// Predicate over the whole form, used for dynamic visibility / disabling.
pub type FormPredicate = Arc<dyn Fn(&FormData) -> bool + Send + Sync>;

/// A single input kind supported by the form engine.
///
/// Notes:
/// - Number / Range are numeric; an empty value is `null`, never `0`
/// - Checkbox / Switch are boolean; "required" means the value must be `true`
/// - Multiselect / FileMultiple hold arrays; "required" means non-empty
/// - everything else is treated as text
///
/// Config files name kinds as strings (`"file-multiple"`), which works the
/// same for RON and JSON.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
    EnumIter,
)]
#[serde(rename_all = "kebab-case", try_from = "String")]
#[strum(serialize_all = "kebab-case")]
pub enum FieldKind {
    Text,
    Email,
    Password,
    Number,
    Tel,
    Url,
    Textarea,
    Select,
    Multiselect,
    Checkbox,
    Radio,
    Date,
    Datetime,
    File,
    FileMultiple,
    Switch,
    Range,
    Hidden,
}

impl FieldKind {
    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Number | Self::Range)
    }

    pub fn is_boolean(self) -> bool {
        matches!(self, Self::Checkbox | Self::Switch)
    }

    /// Return true if this kind holds multiple values.
    pub fn is_multi(self) -> bool {
        matches!(self, Self::Multiselect | Self::FileMultiple)
    }

    /// Type-appropriate empty value used to seed form state.
    pub fn empty_value(self) -> Value {
        if self.is_numeric() {
            Value::Null
        } else if self.is_boolean() {
            Value::Bool(false)
        } else if self.is_multi() {
            Value::Array(Vec::new())
        } else {
            Value::String(String::new())
        }
    }
}

impl TryFrom<String> for FieldKind {
    type Error = strum::ParseError;

    fn try_from(name: String) -> Result<Self, Self::Error> {
        name.parse()
    }
}

/// Typed validation rule. Every rule may carry its own message; when absent
/// a default message built from the field label is used.
///
/// `min` / `max` bound the value on numeric kinds and the length on text
/// kinds. `Custom` cannot come from configuration and is attached in code.
///
/// In config a rule is a flat record, e.g. `(type: "minLength", value: 2)`
/// in RON or `{"type": "minLength", "value": 2}` in JSON.
#[derive(Derivative, Clone, Deserialize)]
#[derivative(Debug)]
#[serde(try_from = "RuleConfig")]
pub enum ValidationRule {
    Required {
        message: Option<String>,
    },
    MinLength {
        value: usize,
        message: Option<String>,
    },
    MaxLength {
        value: usize,
        message: Option<String>,
    },
    Min {
        value: f64,
        message: Option<String>,
    },
    Max {
        value: f64,
        message: Option<String>,
    },
    Pattern {
        value: String,
        message: Option<String>,
    },
    Email {
        message: Option<String>,
    },
    Url {
        message: Option<String>,
    },
    Custom {
        #[derivative(Debug = "ignore")]
        validator: CustomValidator,
        message: Option<String>,
    },
}

/// Wire shape of a configured rule.
#[derive(Debug, Deserialize)]
struct RuleConfig {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    value: Value,
    #[serde(default)]
    message: Option<String>,
}

impl TryFrom<RuleConfig> for ValidationRule {
    type Error = String;

    fn try_from(config: RuleConfig) -> Result<Self, Self::Error> {
        let RuleConfig { kind, value, message } = config;
        let rule = match kind.as_str() {
            "required" => Self::Required { message },
            "minLength" => Self::MinLength {
                value: config_count(&kind, &value)?,
                message,
            },
            "maxLength" => Self::MaxLength {
                value: config_count(&kind, &value)?,
                message,
            },
            "min" => Self::Min {
                value: config_number(&kind, &value)?,
                message,
            },
            "max" => Self::Max {
                value: config_number(&kind, &value)?,
                message,
            },
            "pattern" => Self::Pattern {
                value: value
                    .as_str()
                    .map(str::to_string)
                    .ok_or_else(|| format!("rule 'pattern' needs a string value, got {value}"))?,
                message,
            },
            "email" => Self::Email { message },
            "url" => Self::Url { message },
            "custom" => {
                return Err("custom rules cannot be configured, attach them in code".into())
            }
            other => return Err(format!("unknown validation rule type '{other}'")),
        };
        Ok(rule)
    }
}

fn config_number(kind: &str, value: &Value) -> Result<f64, String> {
    value
        .as_f64()
        .ok_or_else(|| format!("rule '{kind}' needs a numeric value, got {value}"))
}

fn config_count(kind: &str, value: &Value) -> Result<usize, String> {
    let n = config_number(kind, value)?;
    if n < 0.0 || n.fract() != 0.0 {
        return Err(format!("rule '{kind}' needs a non-negative integer, got {value}"));
    }
    Ok(n as usize)
}

impl ValidationRule {
    pub fn required() -> Self {
        Self::Required { message: None }
    }

    pub fn min_length(value: usize) -> Self {
        Self::MinLength { value, message: None }
    }

    pub fn max_length(value: usize) -> Self {
        Self::MaxLength { value, message: None }
    }

    pub fn min(value: f64) -> Self {
        Self::Min { value, message: None }
    }

    pub fn max(value: f64) -> Self {
        Self::Max { value, message: None }
    }

    pub fn pattern(regex: impl Into<String>) -> Self {
        Self::Pattern {
            value: regex.into(),
            message: None,
        }
    }

    pub fn email() -> Self {
        Self::Email { message: None }
    }

    pub fn url() -> Self {
        Self::Url { message: None }
    }

    pub fn custom(f: impl Fn(&Value, &FormData) -> CustomOutcome + Send + Sync + 'static) -> Self {
        Self::Custom {
            validator: Arc::new(f),
            message: None,
        }
    }

    /// Replace the rule's message.
    pub fn with_message(mut self, text: impl Into<String>) -> Self {
        let text = Some(text.into());
        match &mut self {
            Self::Required { message }
            | Self::MinLength { message, .. }
            | Self::MaxLength { message, .. }
            | Self::Min { message, .. }
            | Self::Max { message, .. }
            | Self::Pattern { message, .. }
            | Self::Email { message }
            | Self::Url { message }
            | Self::Custom { message, .. } => *message = text,
        }
        self
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Required { message }
            | Self::MinLength { message, .. }
            | Self::MaxLength { message, .. }
            | Self::Min { message, .. }
            | Self::Max { message, .. }
            | Self::Pattern { message, .. }
            | Self::Email { message }
            | Self::Url { message }
            | Self::Custom { message, .. } => message.as_deref(),
        }
    }
}

/// Comparison used by a `Dependency`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "camelCase", try_from = "String")]
#[strum(serialize_all = "camelCase")]
pub enum DependencyOperator {
    Equals,
    NotEquals,
    Contains,
    NotContains,
    GreaterThan,
    LessThan,
}

impl TryFrom<String> for DependencyOperator {
    type Error = strum::ParseError;

    fn try_from(name: String) -> Result<Self, Self::Error> {
        name.parse()
    }
}

/// Visibility condition on another field's value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dependency {
    pub field: String,
    pub operator: DependencyOperator,
    pub value: Value,
}

impl Dependency {
    pub fn new(
        field: impl Into<String>,
        operator: DependencyOperator,
        value: impl Into<Value>,
    ) -> Self {
        Self {
            field: field.into(),
            operator,
            value: value.into(),
        }
    }

    /// Evaluate against the current form data. A missing field compares as `null`.
    pub fn is_satisfied(&self, data: &FormData) -> bool {
        let actual = data.get(&self.field).unwrap_or(&Value::Null);
        match self.operator {
            DependencyOperator::Equals => loosely_equal(actual, &self.value),
            DependencyOperator::NotEquals => !loosely_equal(actual, &self.value),
            DependencyOperator::Contains => contains(actual, &self.value),
            DependencyOperator::NotContains => !contains(actual, &self.value),
            DependencyOperator::GreaterThan => match (as_number(actual), as_number(&self.value)) {
                (Some(a), Some(b)) => a > b,
                _ => false,
            },
            DependencyOperator::LessThan => match (as_number(actual), as_number(&self.value)) {
                (Some(a), Some(b)) => a < b,
                _ => false,
            },
        }
    }
}

fn loosely_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn contains(haystack: &Value, needle: &Value) -> bool {
    match (haystack, needle) {
        (Value::String(h), Value::String(n)) => h.contains(n.as_str()),
        (Value::Array(items), n) => items.iter().any(|item| loosely_equal(item, n)),
        _ => false,
    }
}

/// Numeric view of a value: numbers as-is, numeric strings parsed.
pub(crate) fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Static flag or predicate over the form data.
#[derive(Derivative, Clone, Deserialize)]
#[derivative(Debug)]
#[serde(from = "bool")]
pub enum Condition {
    Static(bool),
    Dynamic(#[derivative(Debug = "ignore")] FormPredicate),
}

impl Condition {
    pub fn when(f: impl Fn(&FormData) -> bool + Send + Sync + 'static) -> Self {
        Self::Dynamic(Arc::new(f))
    }

    pub fn evaluate(&self, data: &FormData) -> bool {
        match self {
            Self::Static(flag) => *flag,
            Self::Dynamic(predicate) => predicate(data),
        }
    }
}

impl From<bool> for Condition {
    fn from(flag: bool) -> Self {
        Self::Static(flag)
    }
}

/// Declarative description of a form field.
#[derive(Derivative, Clone, Deserialize)]
#[derivative(Debug)]
#[serde(rename_all = "camelCase")]
pub struct FieldSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: FieldKind,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub help: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub validation_rules: Vec<ValidationRule>,
    #[serde(default)]
    pub default_value: Option<Value>,
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
    #[serde(default)]
    pub visible: Option<Condition>,
    #[serde(default)]
    pub disabled: Option<Condition>,
    #[serde(default)]
    pub options: Vec<String>,
}

impl FieldSchema {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            label: None,
            help: None,
            required: false,
            validation_rules: Vec::new(),
            default_value: None,
            dependencies: Vec::new(),
            visible: None,
            disabled: None,
            options: Vec::new(),
        }
    }

    /// Display name used in default messages.
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn rule(mut self, rule: ValidationRule) -> Self {
        self.validation_rules.push(rule);
        self
    }

    pub fn min_length(self, n: usize) -> Self {
        self.rule(ValidationRule::min_length(n))
    }

    pub fn max_length(self, n: usize) -> Self {
        self.rule(ValidationRule::max_length(n))
    }

    pub fn min(self, n: f64) -> Self {
        self.rule(ValidationRule::min(n))
    }

    pub fn max(self, n: f64) -> Self {
        self.rule(ValidationRule::max(n))
    }

    pub fn pattern(self, regex: impl Into<String>, message: impl Into<String>) -> Self {
        self.rule(ValidationRule::pattern(regex).with_message(message))
    }

    pub fn custom(
        self,
        f: impl Fn(&Value, &FormData) -> CustomOutcome + Send + Sync + 'static,
    ) -> Self {
        self.rule(ValidationRule::custom(f))
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    pub fn depends_on(
        mut self,
        field: impl Into<String>,
        operator: DependencyOperator,
        value: impl Into<Value>,
    ) -> Self {
        self.dependencies.push(Dependency::new(field, operator, value));
        self
    }

    pub fn visible(mut self, visible: bool) -> Self {
        self.visible = Some(Condition::Static(visible));
        self
    }

    pub fn visible_when(mut self, f: impl Fn(&FormData) -> bool + Send + Sync + 'static) -> Self {
        self.visible = Some(Condition::when(f));
        self
    }

    pub fn disabled(mut self, disabled: bool) -> Self {
        self.disabled = Some(Condition::Static(disabled));
        self
    }

    pub fn disabled_when(mut self, f: impl Fn(&FormData) -> bool + Send + Sync + 'static) -> Self {
        self.disabled = Some(Condition::when(f));
        self
    }

    pub fn options<I, S>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options = options.into_iter().map(Into::into).collect();
        self
    }

    /// Label, or the name with its first letter upper-cased.
    pub fn display_label(&self) -> Cow<'_, str> {
        if let Some(label) = &self.label {
            return Cow::Borrowed(label);
        }
        let mut chars = self.name.chars();
        match chars.next() {
            Some(first) => Cow::Owned(first.to_uppercase().chain(chars).collect()),
            None => Cow::Borrowed(""),
        }
    }

    /// Explicit flag OR a `required` rule.
    pub fn is_required(&self) -> bool {
        self.required
            || self
                .validation_rules
                .iter()
                .any(|r| matches!(r, ValidationRule::Required { .. }))
    }

    /// Message of the `required` rule, if one is declared with a message.
    pub fn required_message(&self) -> Option<&str> {
        self.validation_rules.iter().find_map(|r| match r {
            ValidationRule::Required { message } => message.as_deref(),
            _ => None,
        })
    }

    /// Visible iff the `visible` condition holds and every dependency is satisfied.
    pub fn is_visible(&self, data: &FormData) -> bool {
        let flag = self.visible.as_ref().map_or(true, |c| c.evaluate(data));
        flag && self.dependencies.iter().all(|d| d.is_satisfied(data))
    }

    pub fn is_disabled(&self, data: &FormData) -> bool {
        self.disabled.as_ref().is_some_and(|c| c.evaluate(data))
    }

    /// Value used to seed form state: `default_value` or the kind's empty value.
    pub fn initial_value(&self) -> Value {
        self.default_value
            .clone()
            .unwrap_or_else(|| self.kind.empty_value())
    }
}
