//! Field validation.
//!
//! `validate` turns a field definition, its current value and the whole form
//! into an optional error message:
//!
//! 1. hidden fields are always valid
//! 2. the value is normalized to a kind-appropriate shape
//! 3. an empty required value fails with the required message
//! 4. custom rules run in order; the first failure wins
//! 5. a structural `ValueSchema` built from the kind and the declarative
//!    rules is checked; the first violated rule wins

use std::sync::LazyLock;

use log::warn;
use regex::Regex;
use serde_json::Value;

use crate::field::{as_number, CustomOutcome, FieldKind, FieldSchema, FormData, ValidationRule};

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email regex")
});

static URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z][a-zA-Z0-9+.\-]*://[^\s/?#]+([/?#]\S*)?$").expect("url regex")
});

/// Validate one field. Returns `None` when the value is acceptable.
pub fn validate(field: &FieldSchema, value: &Value, data: &FormData) -> Option<String> {
    if !field.is_visible(data) {
        return None;
    }

    let value = normalize(field.kind, value);
    let label = field.display_label();

    if field.is_required() && is_empty(field.kind, &value) {
        return Some(
            field
                .required_message()
                .map(str::to_string)
                .unwrap_or_else(|| format!("{label} is required")),
        );
    }

    for rule in &field.validation_rules {
        if let ValidationRule::Custom { validator, message } = rule {
            match validator(&value, data) {
                CustomOutcome::Valid => {}
                CustomOutcome::Message(text) => return Some(text),
                CustomOutcome::Invalid => {
                    return Some(
                        message
                            .clone()
                            .unwrap_or_else(|| format!("{label} is invalid")),
                    );
                }
            }
        }
    }

    ValueSchema::for_field(field).check(&value)
}

/// Map `null` and loosely typed input onto the shape the kind expects.
///
/// - numeric: `null` / `""` stay `null` (empty, distinct from zero); numeric
///   strings become numbers
/// - boolean: `null` becomes `false`; `"true"` / `"false"` are parsed
/// - multi-valued: `null` becomes `[]`; a lone value is wrapped
/// - everything else: `null` becomes `""`
pub fn normalize(kind: FieldKind, value: &Value) -> Value {
    if kind.is_numeric() {
        match value {
            Value::Null => Value::Null,
            Value::String(s) if s.trim().is_empty() => Value::Null,
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .unwrap_or_else(|| value.clone()),
            _ => value.clone(),
        }
    } else if kind.is_boolean() {
        match value {
            Value::Null => Value::Bool(false),
            Value::Bool(_) => value.clone(),
            Value::String(s) => Value::Bool(s == "true"),
            Value::Number(n) => Value::Bool(n.as_f64().is_some_and(|f| f != 0.0)),
            _ => value.clone(),
        }
    } else if kind.is_multi() {
        match value {
            Value::Null => Value::Array(Vec::new()),
            Value::Array(_) => value.clone(),
            other => Value::Array(vec![other.clone()]),
        }
    } else {
        match value {
            Value::Null => Value::String(String::new()),
            _ => value.clone(),
        }
    }
}

/// Emptiness as seen by the required check on a normalized value.
/// Zero is a present number; `false` is an empty boolean.
fn is_empty(kind: FieldKind, value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => kind.is_boolean() && !*b,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Number(_) => false,
    }
}

fn fmt_bound(n: f64) -> String {
    format!("{n}")
}

/// Structural check built from a field's kind and declarative rules.
#[derive(Debug)]
enum ValueSchema {
    Text(TextSchema),
    Number(NumberSchema),
    Boolean,
    List(ListSchema),
}

#[derive(Debug)]
enum TextCheck {
    MinLength(usize, String),
    MaxLength(usize, String),
    Pattern(Regex, String),
    Email(String),
    Url(String),
}

#[derive(Debug, Default)]
struct TextSchema {
    checks: Vec<TextCheck>,
}

#[derive(Debug)]
struct NumberSchema {
    min: Option<(f64, String)>,
    max: Option<(f64, String)>,
    not_a_number: String,
}

#[derive(Debug, Default)]
struct ListSchema {
    min_items: Option<(usize, String)>,
    max_items: Option<(usize, String)>,
}

impl ValueSchema {
    fn for_field(field: &FieldSchema) -> Self {
        let kind = field.kind;
        if kind.is_numeric() {
            Self::Number(NumberSchema::build(field))
        } else if kind.is_boolean() {
            Self::Boolean
        } else if kind.is_multi() {
            Self::List(ListSchema::build(field))
        } else {
            Self::Text(TextSchema::build(field))
        }
    }

    fn check(&self, value: &Value) -> Option<String> {
        match self {
            Self::Text(schema) => schema.check(value),
            Self::Number(schema) => schema.check(value),
            Self::Boolean => None,
            Self::List(schema) => schema.check(value),
        }
    }
}

impl TextSchema {
    fn build(field: &FieldSchema) -> Self {
        let label = field.display_label();
        let mut schema = Self::default();
        let mut has_email = false;
        let mut has_url = false;

        for rule in &field.validation_rules {
            let custom_msg = rule.message().map(str::to_string);
            match rule {
                ValidationRule::MinLength { value, .. } => {
                    schema.push_min_length(*value, custom_msg, &label);
                }
                ValidationRule::Min { value, .. } => {
                    schema.push_min_length(value.max(0.0) as usize, custom_msg, &label);
                }
                ValidationRule::MaxLength { value, .. } => {
                    schema.push_max_length(*value, custom_msg, &label);
                }
                ValidationRule::Max { value, .. } => {
                    schema.push_max_length(value.max(0.0) as usize, custom_msg, &label);
                }
                ValidationRule::Pattern { value, .. } => match Regex::new(value) {
                    Ok(re) => schema.checks.push(TextCheck::Pattern(
                        re,
                        custom_msg.unwrap_or_else(|| format!("{label} has an invalid format")),
                    )),
                    Err(e) => {
                        warn!("field '{}': ignoring invalid pattern {value:?}: {e}", field.name)
                    }
                },
                ValidationRule::Email { .. } => {
                    has_email = true;
                    let message = custom_msg
                        .unwrap_or_else(|| format!("{label} must be a valid email address"));
                    schema.checks.push(TextCheck::Email(message));
                }
                ValidationRule::Url { .. } => {
                    has_url = true;
                    schema.checks.push(TextCheck::Url(
                        custom_msg.unwrap_or_else(|| format!("{label} must be a valid URL")),
                    ));
                }
                ValidationRule::Required { .. } | ValidationRule::Custom { .. } => {}
            }
        }

        // Email / url kinds carry their format check even without an explicit rule.
        if field.kind == FieldKind::Email && !has_email {
            schema
                .checks
                .push(TextCheck::Email(format!("{label} must be a valid email address")));
        }
        if field.kind == FieldKind::Url && !has_url {
            schema
                .checks
                .push(TextCheck::Url(format!("{label} must be a valid URL")));
        }
        schema
    }

    fn push_min_length(&mut self, n: usize, message: Option<String>, label: &str) {
        self.checks.push(TextCheck::MinLength(
            n,
            message.unwrap_or_else(|| format!("{label} must be at least {n} characters")),
        ));
    }

    fn push_max_length(&mut self, n: usize, message: Option<String>, label: &str) {
        self.checks.push(TextCheck::MaxLength(
            n,
            message.unwrap_or_else(|| format!("{label} must be at most {n} characters")),
        ));
    }

    fn check(&self, value: &Value) -> Option<String> {
        let text = match value {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            // Opaque values (e.g. file handles) only take part in the required check.
            Value::Null | Value::Array(_) | Value::Object(_) => return None,
        };
        // Optional and empty: nothing else to check.
        if text.is_empty() {
            return None;
        }

        let len = text.chars().count();
        self.checks.iter().find_map(|check| {
            let failed = match check {
                TextCheck::MinLength(n, _) => len < *n,
                TextCheck::MaxLength(n, _) => len > *n,
                TextCheck::Pattern(re, _) => !re.is_match(&text),
                TextCheck::Email(_) => !EMAIL_RE.is_match(&text),
                TextCheck::Url(_) => !URL_RE.is_match(&text),
            };
            failed.then(|| check.message().to_string())
        })
    }
}

impl TextCheck {
    fn message(&self) -> &str {
        match self {
            Self::MinLength(_, m)
            | Self::MaxLength(_, m)
            | Self::Pattern(_, m)
            | Self::Email(m)
            | Self::Url(m) => m,
        }
    }
}

impl NumberSchema {
    fn build(field: &FieldSchema) -> Self {
        let label = field.display_label();
        let mut schema = Self {
            min: None,
            max: None,
            not_a_number: format!("{label} must be a number"),
        };
        for rule in &field.validation_rules {
            let custom_msg = rule.message().map(str::to_string);
            match rule {
                ValidationRule::Min { value, .. } => {
                    let message = custom_msg.unwrap_or_else(|| {
                        format!("{label} must be at least {}", fmt_bound(*value))
                    });
                    schema.min = Some((*value, message));
                }
                ValidationRule::Max { value, .. } => {
                    let message = custom_msg.unwrap_or_else(|| {
                        format!("{label} must be at most {}", fmt_bound(*value))
                    });
                    schema.max = Some((*value, message));
                }
                _ => {}
            }
        }
        schema
    }

    fn check(&self, value: &Value) -> Option<String> {
        let n = match value {
            Value::Null => return None,
            other => match as_number(other) {
                Some(n) if other.is_number() => n,
                _ => return Some(self.not_a_number.clone()),
            },
        };
        if let Some((min, msg)) = &self.min {
            if n < *min {
                return Some(msg.clone());
            }
        }
        if let Some((max, msg)) = &self.max {
            if n > *max {
                return Some(msg.clone());
            }
        }
        None
    }
}

impl ListSchema {
    fn build(field: &FieldSchema) -> Self {
        let label = field.display_label();
        let mut schema = Self::default();
        for rule in &field.validation_rules {
            let custom_msg = rule.message().map(str::to_string);
            let (lower, n) = match rule {
                ValidationRule::MinLength { value, .. } => (true, *value),
                ValidationRule::Min { value, .. } => (true, value.max(0.0) as usize),
                ValidationRule::MaxLength { value, .. } => (false, *value),
                ValidationRule::Max { value, .. } => (false, value.max(0.0) as usize),
                _ => continue,
            };
            if lower {
                schema.min_items = Some((
                    n,
                    custom_msg.unwrap_or_else(|| format!("{label} must have at least {n} items")),
                ));
            } else {
                schema.max_items = Some((
                    n,
                    custom_msg.unwrap_or_else(|| format!("{label} must have at most {n} items")),
                ));
            }
        }
        schema
    }

    fn check(&self, value: &Value) -> Option<String> {
        let len = value.as_array().map_or(0, Vec::len);
        // Optional and empty: bounds do not apply.
        if len == 0 {
            return None;
        }
        if let Some((n, msg)) = &self.min_items {
            if len < *n {
                return Some(msg.clone());
            }
        }
        if let Some((n, msg)) = &self.max_items {
            if len > *n {
                return Some(msg.clone());
            }
        }
        None
    }
}
