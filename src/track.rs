//! Mutation tracking for a server-owned document.
//!
//! Rust has no ambient proxy/trap mechanism, so mutation tracking here is
//! explicit: [`SharedDoc`] wraps a `serde_json::Value` behind
//! `set`/`delete`/`mutate`, each of which performs the write and records
//! the touched path into a [`PathTree`] in the same call. There is no way
//! to reach the inner value without going through one of these and
//! getting tracked.

use serde_json::Value;

use crate::path::{Path, PathSegment, PathTree};

/// A server- or client-owned document whose mutations are tracked as a
/// minimal covering set of paths, ready to hand to [`crate::diff::diff`]
/// as hints.
#[derive(Debug)]
pub struct SharedDoc {
    value: Value,
    dirty: PathTree,
}

impl SharedDoc {
    pub fn new(value: Value) -> Self {
        SharedDoc {
            value,
            dirty: PathTree::new(),
        }
    }

    pub fn get(&self) -> &Value {
        &self.value
    }

    /// Replace the value at `path` and record the mutation.
    pub fn set(&mut self, path: &[PathSegment], value: Value) {
        set_at(&mut self.value, path, value);
        self.dirty.add(path);
    }

    /// Remove the value at `path` and record the mutation.
    pub fn delete(&mut self, path: &[PathSegment]) {
        delete_at(&mut self.value, path);
        self.dirty.add(path);
    }

    /// Run `f` against the value at `path` (or the document root if
    /// `path` is empty) and record the mutation unconditionally: `f` is
    /// assumed to have mutated, since there's no way to detect a no-op
    /// write without re-diffing.
    pub fn mutate(&mut self, path: &[PathSegment], f: impl FnOnce(&mut Value)) {
        if let Some(target) = get_mut_at(&mut self.value, path) {
            f(target);
            self.dirty.add(path);
        }
    }

    /// The minimal covering set of paths touched since the last
    /// [`SharedDoc::take_dirty`], or since construction.
    pub fn dirty_paths(&self) -> Vec<Path> {
        self.dirty.paths()
    }

    /// Drain and return the dirty set, resetting it to empty. Call this
    /// once per notify cycle so the next cycle starts clean.
    pub fn take_dirty(&mut self) -> Vec<Path> {
        let paths = self.dirty.paths();
        self.dirty.clear();
        paths
    }

    pub fn is_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }
}

fn set_at(root: &mut Value, path: &[PathSegment], value: Value) {
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

fn delete_at(root: &mut Value, path: &[PathSegment]) {
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

fn get_mut_at<'a>(root: &'a mut Value, path: &[PathSegment]) -> Option<&'a mut Value> {
    let mut cur = root;
    for seg in path {
        cur = match (cur, seg) {
            (Value::Object(m), PathSegment::Key(k)) => m.get_mut(k)?,
            (Value::Array(a), PathSegment::Index(i)) => a.get_mut(*i)?,
            _ => return None,
        };
    }
    Some(cur)
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

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn set_records_path_and_mutates() {
        let mut doc = SharedDoc::new(json!({"value": 1}));
        doc.set(&[PathSegment::key("value")], json!(2));
        assert_eq!(doc.get()["value"], json!(2));
        assert_eq!(doc.dirty_paths(), vec![vec![PathSegment::key("value")]]);
    }

    #[test]
    fn mutate_on_root_touches_whole_document() {
        let mut doc = SharedDoc::new(json!({"count": 1}));
        doc.mutate(&[], |v| {
            v["count"] = json!(v["count"].as_i64().unwrap() + 1);
        });
        assert_eq!(doc.get()["count"], json!(2));
        assert_eq!(doc.dirty_paths(), vec![Vec::<PathSegment>::new()]);
    }

    #[test]
    fn take_dirty_resets_tracking() {
        let mut doc = SharedDoc::new(json!({"a": 1, "b": 2}));
        doc.set(&[PathSegment::key("a")], json!(9));
        let drained = doc.take_dirty();
        assert_eq!(drained, vec![vec![PathSegment::key("a")]]);
        assert!(!doc.is_dirty());
    }

    #[test]
    fn repeated_sets_to_same_path_stay_minimal() {
        let mut doc = SharedDoc::new(json!({"a": {"b": 1}}));
        doc.set(&[PathSegment::key("a"), PathSegment::key("b")], json!(2));
        doc.set(&[PathSegment::key("a")], json!({"b": 3}));
        assert_eq!(doc.dirty_paths(), vec![vec![PathSegment::key("a")]]);
    }

    #[test]
    fn delete_removes_array_element() {
        let mut doc = SharedDoc::new(json!({"items": [1, 2, 3]}));
        doc.delete(&[PathSegment::key("items"), PathSegment::index(1)]);
        assert_eq!(doc.get()["items"], json!([1, 3]));
    }
}
