//! Path-addressed reads and writes on `serde_json::Value` trees.
//!
//! The value tree, the default snapshot and the dirty/touched/validating
//! meta trees all go through these functions. Writes create intermediate
//! containers on demand: an index segment creates an array, a key segment
//! an object. Unsets prune containers left empty so meta trees never carry
//! `{}` or all-null arrays.

use crate::{Path, Seg};
use serde_json::{Map, Value};

/// Get a reference to the value at `path`.
///
/// An index segment applied to an object looks up the decimal key, which
/// keeps lookups stable for hosts that key rows by position.
pub fn get_at_path<'a>(doc: &'a Value, path: &Path) -> Option<&'a Value> {
    let mut current = doc;
    for seg in path.segments() {
        current = match (seg, current) {
            (Seg::Key(key), Value::Object(obj)) => obj.get(key)?,
            (Seg::Index(idx), Value::Array(arr)) => arr.get(*idx)?,
            (Seg::Index(idx), Value::Object(obj)) => obj.get(&idx.to_string())?,
            _ => return None,
        };
    }
    Some(current)
}

/// True when a value (possibly `null`) is stored at `path`.
#[inline]
pub fn has_path(doc: &Value, path: &Path) -> bool {
    get_at_path(doc, path).is_some()
}

/// How far past the end of an array an index write may reach.
pub const MAX_INDEX_GAP: usize = 1024;

/// Set a value at `path`, creating intermediate containers as needed.
///
/// Array slots skipped over by an index write are filled with `null`. An
/// index more than [`MAX_INDEX_GAP`] past the end of its array is refused
/// and nothing is written. Returns whether the value was written.
pub fn set_at_path(doc: &mut Value, path: &Path, value: Value) -> bool {
    if !within_reach(doc, path.segments()) {
        return false;
    }
    set_segments(doc, path.segments(), value);
    true
}

fn within_reach(doc: &Value, segments: &[Seg]) -> bool {
    let mut current = Some(doc);
    for seg in segments {
        current = match (seg, current) {
            (Seg::Key(key), Some(Value::Object(obj))) => obj.get(key),
            (Seg::Key(_), _) => None,
            (Seg::Index(idx), Some(Value::Object(obj))) => obj.get(&idx.to_string()),
            (Seg::Index(idx), node) => {
                let len = match node {
                    Some(Value::Array(arr)) => arr.len(),
                    _ => 0,
                };
                if idx.saturating_sub(len) > MAX_INDEX_GAP {
                    return false;
                }
                node.and_then(|n| n.get(*idx))
            }
        };
    }
    true
}

fn set_segments(current: &mut Value, segments: &[Seg], value: Value) {
    match segments {
        [] => *current = value,
        [Seg::Key(key), rest @ ..] => {
            if !current.is_object() {
                *current = Value::Object(Map::new());
            }
            if let Value::Object(obj) = current {
                let entry = obj.entry(key.clone()).or_insert(Value::Null);
                set_segments(entry, rest, value);
            }
        }
        [Seg::Index(idx), rest @ ..] => {
            if let Value::Object(obj) = current {
                let entry = obj.entry(idx.to_string()).or_insert(Value::Null);
                set_segments(entry, rest, value);
                return;
            }
            if !current.is_array() {
                *current = Value::Array(Vec::new());
            }
            if let Value::Array(arr) = current {
                if *idx >= arr.len() {
                    arr.resize(*idx + 1, Value::Null);
                }
                set_segments(&mut arr[*idx], rest, value);
            }
        }
    }
}

/// Remove the value at `path`, returning it.
///
/// Removing an array element leaves a `null` hole unless it is the last
/// element, so sibling indices never shift. Ancestors left empty (an empty
/// object, or an array holding only `null`) are removed in turn.
pub fn unset_at_path(doc: &mut Value, path: &Path) -> Option<Value> {
    if path.is_empty() {
        return Some(std::mem::take(doc));
    }
    unset_segments(doc, path.segments())
}

fn unset_segments(current: &mut Value, segments: &[Seg]) -> Option<Value> {
    let (head, rest) = segments.split_first()?;
    if rest.is_empty() {
        return remove_child(current, head);
    }

    let child = child_mut(current, head)?;
    let removed = unset_segments(child, rest);
    if removed.is_some() && is_pointless(child) {
        remove_child(current, head);
    }
    removed
}

fn child_mut<'a>(current: &'a mut Value, seg: &Seg) -> Option<&'a mut Value> {
    match (seg, current) {
        (Seg::Key(key), Value::Object(obj)) => obj.get_mut(key),
        (Seg::Index(idx), Value::Array(arr)) => arr.get_mut(*idx),
        (Seg::Index(idx), Value::Object(obj)) => obj.get_mut(&idx.to_string()),
        _ => None,
    }
}

fn remove_child(current: &mut Value, seg: &Seg) -> Option<Value> {
    match (seg, current) {
        (Seg::Key(key), Value::Object(obj)) => obj.remove(key),
        (Seg::Index(idx), Value::Object(obj)) => obj.remove(&idx.to_string()),
        (Seg::Index(idx), Value::Array(arr)) => {
            if *idx >= arr.len() {
                return None;
            }
            let removed = std::mem::take(&mut arr[*idx]);
            while matches!(arr.last(), Some(Value::Null)) {
                arr.pop();
            }
            Some(removed)
        }
        _ => None,
    }
}

/// True for containers that carry no information: `{}` or arrays whose
/// elements are all `null` (including `[]`).
pub fn is_pointless(value: &Value) -> bool {
    match value {
        Value::Object(obj) => obj.is_empty(),
        Value::Array(arr) => arr.iter().all(Value::is_null),
        _ => false,
    }
}

/// Remove the container at `path` if it is an empty or all-null array.
///
/// Used after structural array operations so a removed last row does not
/// leave a dangling `[]` in a meta tree.
pub fn unset_empty_array(doc: &mut Value, path: &Path) {
    let empty = matches!(get_at_path(doc, path), Some(Value::Array(arr)) if arr.iter().all(Value::is_null));
    if empty {
        unset_at_path(doc, path);
    }
}

// ============================================================================
// Boolean meta trees
// ============================================================================

/// Mark `path` as `true` in a boolean meta tree.
#[inline]
pub fn mark(tree: &mut Value, path: &Path) {
    set_at_path(tree, path, Value::Bool(true));
}

/// Clear `path` (and everything below it) from a boolean meta tree.
#[inline]
pub fn clear_mark(tree: &mut Value, path: &Path) {
    unset_at_path(tree, path);
}

/// True when `path` is marked, either directly or through any marked
/// descendant.
pub fn is_marked(tree: &Value, path: &Path) -> bool {
    get_at_path(tree, path).is_some_and(contains_true)
}

fn contains_true(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Object(obj) => obj.values().any(contains_true),
        Value::Array(arr) => arr.iter().any(contains_true),
        _ => false,
    }
}

/// Collect every marked leaf path in a boolean meta tree.
pub fn marked_paths(tree: &Value) -> Vec<Path> {
    let mut out = Vec::new();
    collect_marked(tree, &mut Path::root(), &mut out);
    out
}

fn collect_marked(value: &Value, at: &mut Path, out: &mut Vec<Path>) {
    match value {
        Value::Bool(true) => out.push(at.clone()),
        Value::Object(obj) => {
            for (k, v) in obj {
                at.push(Seg::Key(k.clone()));
                collect_marked(v, at, out);
                at.pop();
            }
        }
        Value::Array(arr) => {
            for (i, v) in arr.iter().enumerate() {
                at.push(Seg::Index(i));
                collect_marked(v, at, out);
                at.pop();
            }
        }
        _ => {}
    }
}

/// Build a pruned boolean tree marking every leaf where `current` differs
/// from `baseline`. Returns `None` when the two are deeply equal.
///
/// Array positions that match are `null` placeholders so marks stay
/// index-aligned with the value array.
pub fn diff_tree(current: &Value, baseline: Option<&Value>) -> Option<Value> {
    match (current, baseline) {
        (Value::Object(cur), Some(Value::Object(base))) => {
            let mut out = Map::new();
            for (k, v) in cur {
                if let Some(d) = diff_tree(v, base.get(k)) {
                    out.insert(k.clone(), d);
                }
            }
            for k in base.keys() {
                if !cur.contains_key(k) {
                    out.insert(k.clone(), Value::Bool(true));
                }
            }
            (!out.is_empty()).then_some(Value::Object(out))
        }
        (Value::Array(cur), Some(Value::Array(base))) => {
            let mut out: Vec<Value> = cur
                .iter()
                .enumerate()
                .map(|(i, v)| diff_tree(v, base.get(i)).unwrap_or(Value::Null))
                .collect();
            if base.len() > cur.len() {
                out.resize(base.len(), Value::Bool(true));
            }
            while matches!(out.last(), Some(Value::Null)) {
                out.pop();
            }
            (!out.is_empty()).then_some(Value::Array(out))
        }
        (Value::Object(cur), None) => {
            let out: Map<String, Value> = cur
                .iter()
                .filter_map(|(k, v)| diff_tree(v, None).map(|d| (k.clone(), d)))
                .collect();
            Some(if out.is_empty() {
                Value::Bool(true)
            } else {
                Value::Object(out)
            })
        }
        (Value::Array(cur), None) => {
            let out: Vec<Value> = cur
                .iter()
                .map(|v| diff_tree(v, None).unwrap_or(Value::Null))
                .collect();
            Some(if out.is_empty() {
                Value::Bool(true)
            } else {
                Value::Array(out)
            })
        }
        (cur, Some(base)) if cur == base => None,
        _ => Some(Value::Bool(true)),
    }
}
