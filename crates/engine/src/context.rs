//! Runtime value types and the evaluation context.
//!
//! A `Context` is the key-value view conditions are evaluated against: the
//! event payload, user attributes, and a snapshot of overlay state, all as a
//! tree of [`Value`] nodes. Condition fields address it with dotted paths
//! (`total_generations`, `event.subType`, `overlay.TRIPWIRE.isExpired`).

use std::collections::BTreeMap;

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;

/// A runtime value in the evaluation context.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Decimal(Decimal),
    Text(String),
    List(Vec<Value>),
    Record(BTreeMap<String, Value>),
}

impl Value {
    /// Convert a JSON value. Integers stay `Int`; other numbers become
    /// `Decimal` (no `f64` survives into the evaluation path).
    pub fn from_json(v: &serde_json::Value) -> Value {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    n.as_f64()
                        .and_then(Decimal::from_f64)
                        .map(Value::Decimal)
                        .unwrap_or(Value::Null)
                }
            }
            serde_json::Value::String(s) => Value::Text(s.clone()),
            serde_json::Value::Array(items) => {
                Value::List(items.iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(fields) => Value::Record(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Numeric view of the value, if it has one. `Text` parses leniently so
    /// config values like `"5.1"` compare against payload numbers.
    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            Value::Int(i) => Some(Decimal::from(*i)),
            Value::Decimal(d) => Some(*d),
            Value::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Canonical text rendering, used for string equality and for
    /// `{{placeholder}}` substitution. Composite values render empty.
    pub fn render(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Decimal(d) => d.to_string(),
            Value::Text(s) => s.clone(),
            Value::List(_) | Value::Record(_) => String::new(),
        }
    }

    pub fn is_composite(&self) -> bool {
        matches!(self, Value::List(_) | Value::Record(_))
    }
}

/// The evaluation context: a tree of values addressed by dotted paths.
#[derive(Debug, Clone, Default)]
pub struct Context {
    root: BTreeMap<String, Value>,
}

impl Context {
    pub fn new() -> Context {
        Context::default()
    }

    /// Set a top-level entry.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        let _ = self.root.insert(key.into(), value);
    }

    /// Merge a JSON object's fields in at the top level. Non-objects are
    /// ignored.
    pub fn merge_object(&mut self, payload: &serde_json::Value) {
        if let serde_json::Value::Object(fields) = payload {
            for (k, v) in fields {
                let _ = self.root.insert(k.clone(), Value::from_json(v));
            }
        }
    }

    /// Resolve a dotted path, descending through `Record` nodes.
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let mut current = self.root.get(segments.next()?)?;
        for segment in segments {
            match current {
                Value::Record(fields) => current = fields.get(segment)?,
                _ => return None,
            }
        }
        Some(current)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.lookup(path).is_some()
    }

    /// Patch a subfield of a top-level `Record` entry, creating the record
    /// if absent. Used to stamp synthetic trigger fields like
    /// `overlay.type`.
    pub fn insert_at(&mut self, record_key: &str, field: impl Into<String>, value: Value) {
        let entry = self
            .root
            .entry(record_key.to_string())
            .or_insert_with(|| Value::Record(BTreeMap::new()));
        if let Value::Record(fields) = entry {
            let _ = fields.insert(field.into(), value);
        }
    }
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_descends_dotted_paths() {
        let mut ctx = Context::new();
        ctx.merge_object(&serde_json::json!({
            "event": { "subType": "PUSH_OFFER", "nested": { "deep": 1 } },
            "credits": 3.5
        }));
        assert_eq!(
            ctx.lookup("event.subType"),
            Some(&Value::Text("PUSH_OFFER".into()))
        );
        assert_eq!(ctx.lookup("event.nested.deep"), Some(&Value::Int(1)));
        assert!(ctx.lookup("event.missing").is_none());
        assert!(ctx.lookup("missing.path").is_none());
    }

    #[test]
    fn lookup_stops_at_non_record() {
        let mut ctx = Context::new();
        ctx.insert("credits", Value::Int(5));
        assert!(ctx.lookup("credits.anything").is_none());
    }

    #[test]
    fn json_numbers_stay_exact() {
        let v = Value::from_json(&serde_json::json!(3.5));
        assert_eq!(v.as_decimal(), Some("3.5".parse().unwrap()));
        let v = Value::from_json(&serde_json::json!(42));
        assert_eq!(v, Value::Int(42));
    }

    #[test]
    fn text_coerces_to_decimal_leniently() {
        assert_eq!(
            Value::Text(" 5.1 ".into()).as_decimal(),
            Some("5.1".parse().unwrap())
        );
        assert_eq!(Value::Text("PAYWALL".into()).as_decimal(), None);
        assert_eq!(Value::Bool(true).as_decimal(), None);
    }

    #[test]
    fn insert_at_patches_nested_record() {
        let mut ctx = Context::new();
        ctx.insert("overlay", Value::Record(BTreeMap::new()));
        ctx.insert_at("overlay", "type", Value::Text("TRIPWIRE".into()));
        assert_eq!(
            ctx.lookup("overlay.type"),
            Some(&Value::Text("TRIPWIRE".into()))
        );
    }

    #[test]
    fn render_is_canonical() {
        assert_eq!(Value::Bool(true).render(), "true");
        assert_eq!(Value::Int(10).render(), "10");
        assert_eq!(Value::Text("x".into()).render(), "x");
        assert_eq!(Value::Null.render(), "");
    }
}
