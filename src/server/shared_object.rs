//! Server-side SharedObject engine.
//!
//! Holds the authoritative value (via [`SharedDoc`] for mutation
//! tracking), the version counter, and the snapshot-of-last-transmit.
//! `notify` is the five-step algorithm verbatim; callers (the registry's
//! auto-notify task, or a manual `notify()` call) decide which paths to
//! diff and what to do with the resulting frame.

use serde_json::Value;

use crate::diff::{self, DiffNode};
use crate::error::MeshResult;
use crate::path::{Path, PathSegment};
use crate::schema::CompiledSchema;
use crate::track::SharedDoc;

pub struct NotifyOutcome {
    pub diffs: Vec<DiffNode>,
    pub version: u64,
    pub now: i64,
}

pub struct SharedObjectEndpoint {
    doc: SharedDoc,
    version: u64,
    snapshot: Value,
    schema: CompiledSchema,
    pub auto_notify: bool,
    warned_manual_notify: bool,
}

impl SharedObjectEndpoint {
    pub fn new(initial: Value, schema: CompiledSchema, auto_notify: bool) -> MeshResult<Self> {
        schema.validate(&initial)?;
        Ok(SharedObjectEndpoint {
            doc: SharedDoc::new(initial.clone()),
            version: 0,
            snapshot: initial,
            schema,
            auto_notify,
            warned_manual_notify: false,
        })
    }

    pub fn data(&self) -> &Value {
        self.doc.get()
    }

    pub fn doc_mut(&mut self) -> &mut SharedDoc {
        &mut self.doc
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn snapshot(&self) -> &Value {
        &self.snapshot
    }

    pub fn take_dirty(&mut self) -> Vec<Path> {
        self.doc.take_dirty()
    }

    /// `true` exactly once: the first manual `notify()` while auto-notify
    /// is enabled. Subsequent manual calls return `false` — the caller
    /// logs the warning once and stays quiet after that.
    pub fn note_manual_notify(&mut self) -> bool {
        if self.auto_notify && !self.warned_manual_notify {
            self.warned_manual_notify = true;
            true
        } else {
            false
        }
    }

    /// Steps 2-5 of the notify algorithm. `paths` is the PathTree's
    /// minimal covering set (auto-notify) or `[hint]`/`[[]]` (manual).
    pub fn notify(&mut self, mut paths: Vec<Path>) -> MeshResult<Option<NotifyOutcome>> {
        let current = self.doc.get().clone();
        self.schema.validate(&current)?;

        paths.sort_by_key(|p| p.len());

        let mut diffs = Vec::new();
        for path in &paths {
            let hint = if path.is_empty() {
                None
            } else {
                Some(path.as_slice())
            };
            let mut subtree_diffs = diff::diff(&self.snapshot, &current, hint);
            diff::annotate_dates(&mut subtree_diffs, self.schema.date_paths());
            diffs.append(&mut subtree_diffs);
        }

        if diffs.is_empty() {
            return Ok(None);
        }

        for path in &paths {
            rebase_subtree(&mut self.snapshot, &current, path);
        }
        self.version += 1;
        let now = chrono::Utc::now().timestamp_millis();
        Ok(Some(NotifyOutcome {
            diffs,
            version: self.version,
            now,
        }))
    }
}

/// Replace the subtree at `path` in `snapshot` with the value found at
/// the same path in `current` (step 5: "deep-clone each modified subtree
/// back into the snapshot").
fn rebase_subtree(snapshot: &mut Value, current: &Value, path: &[PathSegment]) {
    let Some(value) = get_at(current, path) else {
        return;
    };
    let value = value.clone();
    if path.is_empty() {
        *snapshot = value;
        return;
    }
    let Some((last, ancestors)) = path.split_last() else {
        return;
    };
    let parent = navigate_vivify(snapshot, ancestors);
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
