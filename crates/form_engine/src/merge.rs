use serde_json::{Map, Value};

/// Type-aware merge used when restoring persisted form state.
///
/// Objects merge key by key into the live object, keeping keys the source
/// does not mention. Every other kind (primitives, arrays) is replaced.
pub(crate) trait MergeFrom {
    fn merge_from(&mut self, other: &Self);

    fn merge_from_option(&mut self, other: Option<&Self>) {
        if let Some(other) = other {
            self.merge_from(other);
        }
    }
}

impl MergeFrom for Value {
    fn merge_from(&mut self, other: &Self) {
        match (self, other) {
            (Value::Object(this), Value::Object(other)) => this.merge_from(other),
            (this, other) => *this = other.clone(),
        }
    }
}

impl MergeFrom for Map<String, Value> {
    fn merge_from(&mut self, other: &Self) {
        for (k, v) in other {
            if let Some(existing) = self.get_mut(k) {
                existing.merge_from(v);
            } else {
                self.insert(k.clone(), v.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn nested_objects_keep_unmentioned_keys() {
        let mut live = json!({"name": "", "contact": {"email": "", "phone": ""}});
        live.merge_from(&json!({"name": "John", "contact": {"email": "j@x.com"}}));
        assert_eq!(
            live,
            json!({"name": "John", "contact": {"email": "j@x.com", "phone": ""}})
        );
    }

    #[test]
    fn arrays_and_primitives_are_replaced() {
        let mut live = json!({"tags": ["a", "b"], "age": 3});
        live.merge_from(&json!({"tags": ["c"], "age": null}));
        assert_eq!(live, json!({"tags": ["c"], "age": null}));
    }

    #[test]
    fn object_replaces_primitive() {
        let mut live = json!("");
        live.merge_from(&json!({"a": 1}));
        assert_eq!(live, json!({"a": 1}));
    }

    #[test]
    fn merge_from_none_is_noop() {
        let mut live = json!({"a": 1});
        live.merge_from_option(None);
        assert_eq!(live, json!({"a": 1}));
    }
}
