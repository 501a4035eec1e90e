//! Structural diff and apply over `serde_json::Value`.
//!
//! Pure, allocation-only functions: `diff` computes a structural delta
//! between two values, `apply` replays one onto a value. Neither mutates
//! its input value argument; `apply` returns a new value built from a
//! clone. Array deletions are emitted highest-index-first so a replayed
//! sequence never needs index-shift bookkeeping at apply time.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::path::{Path, PathSegment, ARRAY_WILDCARD};
use crate::schema::{iso_to_millis, millis_to_iso};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum DiffNode {
    #[serde(rename = "N")]
    New {
        path: Path,
        rhs: Value,
        #[serde(rename = "$dates", default, skip_serializing_if = "Vec::is_empty")]
        dates: Vec<Path>,
    },
    #[serde(rename = "D")]
    Deleted {
        path: Path,
        lhs: Value,
        #[serde(rename = "$dates", default, skip_serializing_if = "Vec::is_empty")]
        dates: Vec<Path>,
    },
    #[serde(rename = "E")]
    Edited {
        path: Path,
        lhs: Value,
        rhs: Value,
        #[serde(rename = "$dates", default, skip_serializing_if = "Vec::is_empty")]
        dates: Vec<Path>,
    },
    #[serde(rename = "A")]
    ArrayChange {
        path: Path,
        index: usize,
        item: Box<DiffNode>,
    },
}

impl DiffNode {
    /// The path of the leaf this node actually mutates (for `ArrayChange`
    /// this recurses into the nested item, which carries the full path
    /// including the array index).
    pub fn path(&self) -> &Path {
        match self {
            DiffNode::New { path, .. }
            | DiffNode::Deleted { path, .. }
            | DiffNode::Edited { path, .. } => path,
            DiffNode::ArrayChange { item, .. } => item.path(),
        }
    }
}

/// Diff `lhs` against `rhs`, optionally restricted to the subtree under
/// `hint`. See "Hint semantics".
pub fn diff(lhs: &Value, rhs: &Value, hint: Option<&[PathSegment]>) -> Vec<DiffNode> {
    match hint {
        None => diff_value(lhs, rhs, &mut Vec::new()),
        Some(hint_path) => diff_with_hint(lhs, rhs, hint_path),
    }
}

fn diff_with_hint(lhs: &Value, rhs: &Value, hint: &[PathSegment]) -> Vec<DiffNode> {
    let lhs_sub = get_at(lhs, hint);
    let rhs_sub = get_at(rhs, hint);
    match (lhs_sub, rhs_sub) {
        (None, None) => Vec::new(),
        (None, Some(r)) => vec![DiffNode::New {
            path: hint.to_vec(),
            rhs: r.clone(),
            dates: Vec::new(),
        }],
        (Some(l), None) => vec![DiffNode::Deleted {
            path: hint.to_vec(),
            lhs: l.clone(),
            dates: Vec::new(),
        }],
        (Some(l), Some(r)) => {
            let mut prefix = hint.to_vec();
            let base_len = prefix.len();
            let mut out = Vec::new();
            diff_into(l, r, &mut prefix, base_len, &mut out);
            out
        }
    }
}

fn get_at<'a>(value: &'a Value, path: &[PathSegment]) -> Option<&'a Value> {
    let mut cur = value;
    for seg in path {
        cur = match (cur, seg) {
            (Value::Object(m), PathSegment::Key(k)) => m.get(k)?,
            (Value::Array(a), PathSegment::Index(i)) => a.get(*i)?,
            _ => return None,
        };
    }
    Some(cur)
}

fn diff_value(lhs: &Value, rhs: &Value, prefix: &mut Path) -> Vec<DiffNode> {
    let mut out = Vec::new();
    diff_into(lhs, rhs, prefix, prefix.len(), &mut out);
    out
}

fn diff_into(lhs: &Value, rhs: &Value, path: &mut Path, _base_len: usize, out: &mut Vec<DiffNode>) {
    if lhs == rhs {
        return;
    }
    match (lhs, rhs) {
        (Value::Object(lm), Value::Object(rm)) => {
            let mut keys: Vec<&String> = lm.keys().chain(rm.keys()).collect();
            keys.sort();
            keys.dedup();
            for key in keys {
                path.push(PathSegment::key(key.clone()));
                match (lm.get(key), rm.get(key)) {
                    (None, Some(r)) => out.push(DiffNode::New {
                        path: path.clone(),
                        rhs: r.clone(),
                        dates: Vec::new(),
                    }),
                    (Some(l), None) => out.push(DiffNode::Deleted {
                        path: path.clone(),
                        lhs: l.clone(),
                        dates: Vec::new(),
                    }),
                    (Some(l), Some(r)) if l != r => diff_into(l, r, path, _base_len, out),
                    _ => {}
                }
                path.pop();
            }
        }
        (Value::Array(la), Value::Array(ra)) => {
            let common = la.len().min(ra.len());
            for i in 0..common {
                if la[i] != ra[i] {
                    path.push(PathSegment::index(i));
                    let mut nested = Vec::new();
                    diff_into(&la[i], &ra[i], path, _base_len, &mut nested);
                    path.pop();
                    for item in nested {
                        out.push(DiffNode::ArrayChange {
                            path: path.clone(),
                            index: i,
                            item: Box::new(item),
                        });
                    }
                }
            }
            if ra.len() > la.len() {
                for i in la.len()..ra.len() {
                    path.push(PathSegment::index(i));
                    let item = DiffNode::New {
                        path: path.clone(),
                        rhs: ra[i].clone(),
                        dates: Vec::new(),
                    };
                    path.pop();
                    out.push(DiffNode::ArrayChange {
                        path: path.clone(),
                        index: i,
                        item: Box::new(item),
                    });
                }
            } else if la.len() > ra.len() {
                for i in (ra.len()..la.len()).rev() {
                    path.push(PathSegment::index(i));
                    let item = DiffNode::Deleted {
                        path: path.clone(),
                        lhs: la[i].clone(),
                        dates: Vec::new(),
                    };
                    path.pop();
                    out.push(DiffNode::ArrayChange {
                        path: path.clone(),
                        index: i,
                        item: Box::new(item),
                    });
                }
            }
        }
        _ => out.push(DiffNode::Edited {
            path: path.clone(),
            lhs: lhs.clone(),
            rhs: rhs.clone(),
            dates: Vec::new(),
        }),
    }
}

/// Apply `diffs` to `value`, returning the resulting value. `value` is not
/// mutated in place; a clone is built up and returned.
pub fn apply(value: &Value, diffs: &[DiffNode]) -> Value {
    let mut out = value.clone();
    for node in diffs {
        apply_node(&mut out, node);
    }
    out
}

fn apply_node(root: &mut Value, node: &DiffNode) {
    match node {
        DiffNode::New { path, rhs, dates } | DiffNode::Edited { path, rhs, dates, .. } => {
            let rehydrated = rehydrate(rhs.clone(), dates);
            set_at_path(root, path, rehydrated);
        }
        DiffNode::Deleted { path, .. } => {
            delete_at_path(root, path);
        }
        DiffNode::ArrayChange { item, .. } => apply_node(root, item),
    }
}

fn rehydrate(mut value: Value, dates: &[Path]) -> Value {
    for date_path in dates {
        rehydrate_at(&mut value, date_path);
    }
    value
}

fn rehydrate_at(value: &mut Value, path: &[PathSegment]) {
    match path.split_first() {
        None => {
            if let Value::String(s) = value {
                if let Some(millis) = iso_to_millis(s) {
                    *value = Value::Number(millis.into());
                }
            }
        }
        Some((PathSegment::Key(k), rest)) if k == "*" => {
            if let Value::Object(map) = value {
                for v in map.values_mut() {
                    rehydrate_at(v, rest);
                }
            }
        }
        Some((PathSegment::Key(k), rest)) => {
            if let Value::Object(map) = value {
                if let Some(v) = map.get_mut(k) {
                    rehydrate_at(v, rest);
                }
            }
        }
        Some((PathSegment::Index(i), rest)) if *i == ARRAY_WILDCARD => {
            if let Value::Array(arr) = value {
                for v in arr.iter_mut() {
                    rehydrate_at(v, rest);
                }
            }
        }
        Some((PathSegment::Index(i), rest)) => {
            if let Value::Array(arr) = value {
                if let Some(v) = arr.get_mut(*i) {
                    rehydrate_at(v, rest);
                }
            }
        }
    }
}

fn set_at_path(root: &mut Value, path: &[PathSegment], value: Value) {
    let Some((last, ancestors)) = path.split_last() else {
        *root = value;
        return;
    };
    let parent = navigate_vivify(root, ancestors);
    match (parent, last) {
        (Value::Object(map), PathSegment::Key(k)) => {
            map.insert(k.clone(), value);
        }
        (Value::Array(arr), PathSegment::Index(i)) => {
            if *i < arr.len() {
                arr[*i] = value;
            } else {
                arr.push(value);
            }
        }
        _ => {}
    }
}

fn delete_at_path(root: &mut Value, path: &[PathSegment]) {
    let Some((last, ancestors)) = path.split_last() else {
        return;
    };
    let parent = navigate_vivify(root, ancestors);
    match (parent, last) {
        (Value::Object(map), PathSegment::Key(k)) => {
            map.remove(k);
        }
        (Value::Array(arr), PathSegment::Index(i)) => {
            if *i < arr.len() {
                arr.remove(*i);
            }
        }
        _ => {}
    }
}

fn navigate_vivify<'a>(root: &'a mut Value, path: &[PathSegment]) -> &'a mut Value {
    let mut cur = root;
    for seg in path {
        cur = match seg {
            PathSegment::Key(k) => {
                if !cur.is_object() {
                    *cur = Value::Object(Default::default());
                }
                cur.as_object_mut()
                    .unwrap()
                    .entry(k.clone())
                    .or_insert(Value::Null)
            }
            PathSegment::Index(i) => {
                if !cur.is_array() {
                    *cur = Value::Array(Vec::new());
                }
                let arr = cur.as_array_mut().unwrap();
                while arr.len() <= *i {
                    arr.push(Value::Null);
                }
                &mut arr[*i]
            }
        };
    }
    cur
}

/// Tag each diff node with the `$dates` sub-paths (relative to its own
/// `rhs`/`lhs`) that `date_paths` (absolute, possibly wildcarded, from
/// `CompiledSchema::date_paths`) says must be rehydrated on apply.
/// Used by the SharedObject server engine.
pub fn annotate_dates(diffs: &mut [DiffNode], date_paths: &[Path]) {
    for node in diffs {
        annotate_node(node, date_paths);
    }
}

fn annotate_node(node: &mut DiffNode, date_paths: &[Path]) {
    match node {
        DiffNode::New { path, dates, .. } | DiffNode::Deleted { path, dates, .. } => {
            *dates = relative_date_paths(path, date_paths);
        }
        DiffNode::Edited { path, dates, .. } => {
            *dates = relative_date_paths(path, date_paths);
        }
        DiffNode::ArrayChange { item, .. } => annotate_node(item, date_paths),
    }
}

fn relative_date_paths(node_path: &[PathSegment], date_paths: &[Path]) -> Vec<Path> {
    let mut out = Vec::new();
    for date_path in date_paths {
        let common = node_path.len().min(date_path.len());
        let prefix_matches = (0..common).all(|i| segment_matches(&date_path[i], &node_path[i]));
        if !prefix_matches {
            continue;
        }
        if date_path.len() >= node_path.len() {
            out.push(date_path[node_path.len()..].to_vec());
        }
    }
    out
}

fn segment_matches(pattern: &PathSegment, concrete: &PathSegment) -> bool {
    match (pattern, concrete) {
        (PathSegment::Key(k), PathSegment::Key(_)) if k == "*" => true,
        (PathSegment::Index(i), PathSegment::Index(_)) if *i == ARRAY_WILDCARD => true,
        _ => pattern == concrete,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn diff_soundness_on_objects() {
        let a = json!({"value": 1, "name": "x"});
        let b = json!({"value": 42, "name": "x", "extra": true});
        let d = diff(&a, &b, None);
        assert_eq!(apply(&a, &d), b);
    }

    #[test]
    fn diff_soundness_on_arrays_with_tail_deletion() {
        let a = json!({"items": [1, 2, 3, 4]});
        let b = json!({"items": [1, 2]});
        let d = diff(&a, &b, None);
        assert_eq!(apply(&a, &d), b);
    }

    #[test]
    fn diff_soundness_on_arrays_with_append() {
        let a = json!({"items": [1]});
        let b = json!({"items": [1, 2, 3]});
        let d = diff(&a, &b, None);
        assert_eq!(apply(&a, &d), b);
    }

    #[test]
    fn array_deletions_are_highest_index_first() {
        let a = json!({"items": [1, 2, 3, 4, 5]});
        let b = json!({"items": [1]});
        let d = diff(&a, &b, None);
        let indices: Vec<usize> = d
            .iter()
            .filter_map(|n| match n {
                DiffNode::ArrayChange {
                    item,
                    index,
                    ..
                } if matches!(**item, DiffNode::Deleted { .. }) => Some(*index),
                _ => None,
            })
            .collect();
        let mut sorted_desc = indices.clone();
        sorted_desc.sort_unstable_by(|a, b| b.cmp(a));
        assert_eq!(indices, sorted_desc);
    }

    #[test]
    fn hint_restricts_to_subtree() {
        let a = json!({"a": {"x": 1}, "b": {"x": 1}});
        let b = json!({"a": {"x": 2}, "b": {"x": 1}});
        let hint = vec![PathSegment::key("a")];
        let d = diff(&a, &b, Some(&hint));
        assert_eq!(d.len(), 1);
        assert_eq!(d[0].path(), &vec![PathSegment::key("a"), PathSegment::key("x")]);
    }

    #[test]
    fn hint_on_one_sided_key_emits_single_node() {
        let a = json!({});
        let b = json!({"obj": {"nested": {"deep": 1}}});
        let hint = vec![PathSegment::key("obj")];
        let d = diff(&a, &b, Some(&hint));
        assert_eq!(d.len(), 1);
        assert!(matches!(d[0], DiffNode::New { .. }));
    }

    #[test]
    fn date_annotation_and_apply_rehydrates() {
        let date_paths = vec![vec![PathSegment::key("created")]];
        let a = json!({"value": 1, "created": 1_700_000_000_000i64});
        let b = json!({"value": 1, "created": 1_700_000_100_000i64});
        let mut d = diff(&a, &b, None);
        annotate_dates(&mut d, &date_paths);

        // simulate wire transit: dates become ISO strings
        for node in &mut d {
            if let DiffNode::Edited { rhs, .. } = node {
                if let Value::Number(n) = rhs {
                    *rhs = Value::String(millis_to_iso(n.as_i64().unwrap()));
                }
            }
        }

        let applied = apply(&a, &d);
        assert_eq!(applied, b);
    }
}
