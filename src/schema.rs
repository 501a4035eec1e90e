//! JSON Schema validation and date-path handling.
//!
//! A schema is compiled once into a [`CompiledSchema`] that both validates
//! `serde_json::Value`s against it and knows, from a one-time walk of the
//! raw schema document, every path where a date-typed value lives.
//!
//! Native (pre-serialization) timestamps are represented as JSON numbers
//! (milliseconds since the Unix epoch); wire (post-serialization)
//! timestamps are RFC 3339 strings. `format: "date"`/`"date-time"`
//! acceptors must pass both, so validation always runs against a
//! transient clone with date-path numbers coerced to strings first.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{MeshError, MeshResult};
use crate::path::{Path, PathSegment};

/// One offending path + human-readable reason from a failed validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub path: String,
    pub reason: String,
}

pub struct CompiledSchema {
    validator: jsonschema::Validator,
    date_paths: Vec<Path>,
}

impl std::fmt::Debug for CompiledSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledSchema")
            .field("date_paths", &self.date_paths)
            .finish()
    }
}

impl CompiledSchema {
    pub fn compile(schema: &Value) -> MeshResult<Self> {
        let validator = jsonschema::validator_for(schema)
            .map_err(|e| MeshError::Internal(format!("invalid schema: {e}")))?;
        let mut date_paths = Vec::new();
        extract_date_paths(schema, &mut Vec::new(), &mut date_paths);
        Ok(CompiledSchema {
            validator,
            date_paths,
        })
    }

    pub fn date_paths(&self) -> &[Path] {
        &self.date_paths
    }

    pub fn check(&self, value: &Value) -> bool {
        let coerced = coerce_dates_to_strings(value, &self.date_paths);
        self.validator.is_valid(&coerced)
    }

    pub fn validate(&self, value: &Value) -> MeshResult<()> {
        let coerced = coerce_dates_to_strings(value, &self.date_paths);
        let issues: Vec<ValidationIssue> = self
            .validator
            .iter_errors(&coerced)
            .map(|e| ValidationIssue {
                path: e.instance_path.to_string(),
                reason: e.to_string(),
            })
            .collect();
        if issues.is_empty() {
            Ok(())
        } else {
            Err(MeshError::ValidationFailed { issues })
        }
    }

    /// Validate, then return `value` with every date path's ISO string
    /// replaced by its native millisecond-timestamp form.
    pub fn validate_and_parse_dates(&self, value: Value) -> MeshResult<Value> {
        self.validate(&value)?;
        Ok(parse_dates_in_place(value, &self.date_paths))
    }

    /// Replace every native timestamp at a date path with its ISO-8601
    /// wire representation. The canonical egress step before framing.
    pub fn serialize_dates(&self, value: &Value) -> Value {
        coerce_dates_to_strings(value, &self.date_paths)
    }
}

fn extract_date_paths(schema: &Value, path: &mut Path, out: &mut Vec<Path>) {
    let Some(obj) = schema.as_object() else {
        return;
    };

    if let Some(Value::String(fmt)) = obj.get("format") {
        if fmt == "date" || fmt == "date-time" {
            out.push(path.clone());
        }
    }

    if let Some(Value::Object(props)) = obj.get("properties") {
        let mut keys: Vec<&String> = props.keys().collect();
        keys.sort();
        for key in keys {
            let sub = &props[key];
            path.push(PathSegment::key(key.clone()));
            extract_date_paths(sub, path, out);
            path.pop();
        }
    }

    if let Some(additional @ Value::Object(_)) = obj.get("additionalProperties") {
        path.push(PathSegment::key("*"));
        extract_date_paths(additional, path, out);
        path.pop();
    }

    if let Some(items @ Value::Object(_)) = obj.get("items") {
        path.push(PathSegment::index(crate::path::ARRAY_WILDCARD));
        extract_date_paths(items, path, out);
        path.pop();
    }

    for combinator in ["allOf", "anyOf", "oneOf"] {
        if let Some(Value::Array(subs)) = obj.get(combinator) {
            for sub in subs {
                extract_date_paths(sub, path, out);
            }
        }
    }
}

/// Walk `value` along `date_paths`, calling `f` on every matched leaf.
/// `Key("*")`/`Index(ARRAY_WILDCARD)` segments fan out over every
/// object key / array element at that level.
fn for_each_date_leaf(value: &mut Value, date_paths: &[Path], mut f: impl FnMut(&mut Value)) {
    for path in date_paths {
        walk_mut(value, path, &mut f);
    }
}

fn walk_mut(value: &mut Value, path: &[PathSegment], f: &mut impl FnMut(&mut Value)) {
    match path.split_first() {
        None => f(value),
        Some((PathSegment::Key(k), rest)) if k == "*" => {
            if let Value::Object(map) = value {
                for v in map.values_mut() {
                    walk_mut(v, rest, f);
                }
            }
        }
        Some((PathSegment::Key(k), rest)) => {
            if let Value::Object(map) = value {
                if let Some(v) = map.get_mut(k) {
                    walk_mut(v, rest, f);
                }
            }
        }
        Some((PathSegment::Index(i), rest)) if *i == crate::path::ARRAY_WILDCARD => {
            if let Value::Array(arr) = value {
                for v in arr.iter_mut() {
                    walk_mut(v, rest, f);
                }
            }
        }
        Some((PathSegment::Index(i), rest)) => {
            if let Value::Array(arr) = value {
                if let Some(v) = arr.get_mut(*i) {
                    walk_mut(v, rest, f);
                }
            }
        }
    }
}

fn coerce_dates_to_strings(value: &Value, date_paths: &[Path]) -> Value {
    let mut clone = value.clone();
    for_each_date_leaf(&mut clone, date_paths, |v| {
        if let Value::Number(n) = v {
            if let Some(millis) = n.as_i64() {
                *v = Value::String(millis_to_iso(millis));
            }
        }
    });
    clone
}

fn parse_dates_in_place(mut value: Value, date_paths: &[Path]) -> Value {
    for_each_date_leaf(&mut value, date_paths, |v| {
        if let Value::String(s) = v {
            if let Some(millis) = iso_to_millis(s) {
                *v = Value::Number(millis.into());
            }
        }
    });
    value
}

pub fn millis_to_iso(millis: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .unwrap_or_else(|| DateTime::<Utc>::from_timestamp(0, 0).unwrap())
        .to_rfc3339()
}

pub fn iso_to_millis(s: &str) -> Option<i64> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc).timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn counter_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "value": {"type": "integer"},
                "created": {"type": ["string", "integer"], "format": "date-time"}
            },
            "required": ["value"]
        })
    }

    #[test]
    fn extracts_top_level_date_path() {
        let schema = CompiledSchema::compile(&counter_schema()).unwrap();
        assert_eq!(schema.date_paths().len(), 1);
        assert_eq!(schema.date_paths()[0], vec![PathSegment::key("created")]);
    }

    #[test]
    fn extracts_wildcard_and_nested_paths() {
        let schema = json!({
            "type": "object",
            "additionalProperties": {
                "type": "object",
                "properties": {
                    "seen": {"type": "string", "format": "date-time"}
                }
            }
        });
        let compiled = CompiledSchema::compile(&schema).unwrap();
        assert_eq!(
            compiled.date_paths()[0],
            vec![PathSegment::key("*"), PathSegment::key("seen")]
        );
    }

    #[test]
    fn round_trip_preserves_millisecond_precision() {
        let schema = CompiledSchema::compile(&counter_schema()).unwrap();
        let native = json!({"value": 1, "created": 1_700_000_000_123i64});
        let wire = schema.serialize_dates(&native);
        assert!(wire["created"].is_string());
        let back = schema.validate_and_parse_dates(wire).unwrap();
        assert_eq!(back, native);
    }

    #[test]
    fn validates_native_and_wire_forms_equally() {
        let schema = CompiledSchema::compile(&counter_schema()).unwrap();
        let native = json!({"value": 1, "created": 1_700_000_000_123i64});
        let wire = schema.serialize_dates(&native);
        assert!(schema.check(&native));
        assert!(schema.check(&wire));
    }

    #[test]
    fn validation_failure_lists_paths() {
        let schema = CompiledSchema::compile(&counter_schema()).unwrap();
        let bad = json!({"created": "2024-01-01T00:00:00Z"});
        let err = schema.validate(&bad).unwrap_err();
        match err {
            MeshError::ValidationFailed { issues } => assert!(!issues.is_empty()),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
