//! Error types: usage failures (`FormError`) and validation results
//! (`FieldError` / `FieldErrors`).
//!
//! Validation errors are data, never `Err`. They live in a [`FieldErrors`]
//! tree keyed by path, where a non-leaf path (a whole field array) may carry
//! its own error that covers its subtree.

use crate::{parse_path, Path, Seg};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;

/// Result type alias for form operations.
pub type FormResult<T> = Result<T, FormError>;

/// Errors that can occur while driving a form.
#[derive(Debug, Error)]
pub enum FormError {
    /// No descriptor is registered at this path.
    #[error("unknown field: {name}")]
    UnknownField {
        /// The unregistered path.
        name: Path,
    },

    /// The path is registered, but not as a field array.
    #[error("not a field array: {name}")]
    NotAFieldArray {
        /// The offending path.
        name: Path,
    },

    /// Array row index is out of bounds.
    #[error("row {index} out of bounds (len: {len}) in field array {name}")]
    IndexOutOfBounds {
        /// The field array path.
        name: Path,
        /// The index that was addressed.
        index: usize,
        /// The current row count.
        len: usize,
    },

    /// The async values loader failed.
    #[error("values loader failed: {message}")]
    Loader {
        /// Loader-provided description.
        message: String,
    },

    /// The form has been closed (unmounted).
    #[error("form is closed")]
    Closed,
}

impl FormError {
    /// Create an unknown field error.
    #[inline]
    pub fn unknown_field(name: Path) -> Self {
        FormError::UnknownField { name }
    }

    /// Create an index out of bounds error.
    #[inline]
    pub fn index_out_of_bounds(name: Path, index: usize, len: usize) -> Self {
        FormError::IndexOutOfBounds { name, index, len }
    }

    /// Create a loader error.
    #[inline]
    pub fn loader(message: impl Into<String>) -> Self {
        FormError::Loader {
            message: message.into(),
        }
    }
}

/// A single validation error.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    /// Rule that failed (`required`, `minLength`, `validate`, ...).
    #[serde(rename = "type")]
    pub kind: String,
    /// User-facing message; may be empty.
    #[serde(default)]
    pub message: String,
    /// Every failing rule and its message, populated in `CriteriaMode::All`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub types: BTreeMap<String, String>,
}

impl FieldError {
    /// Create an error of the given type.
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            types: BTreeMap::new(),
        }
    }

    /// Record an additional failing rule (builder pattern).
    #[must_use]
    pub fn with_type(mut self, kind: impl Into<String>, message: impl Into<String>) -> Self {
        self.types.insert(kind.into(), message.into());
        self
    }
}

/// The error tree of a form.
///
/// Errors are stored flat against their full path. Lookup follows the
/// covering rule: an error on an ancestor (for example a whole field array)
/// answers for any path inside it, unless something more specific exists
/// at or below the requested path.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FieldErrors {
    entries: BTreeMap<Path, FieldError>,
}

impl FieldErrors {
    /// Create an empty error tree.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an error (builder pattern).
    #[must_use]
    pub fn with(mut self, name: impl Into<Path>, error: FieldError) -> Self {
        self.set(name, error);
        self
    }

    /// Insert or replace the error at `name`.
    pub fn set(&mut self, name: impl Into<Path>, error: FieldError) {
        self.entries.insert(name.into(), error);
    }

    /// Look up the error for `name`, honoring the covering rule.
    pub fn get(&self, name: impl Into<Path>) -> Option<&FieldError> {
        self.lookup(&name.into()).map(|(_, e)| e)
    }

    /// Look up the error for `name` together with the path it is stored at.
    pub fn lookup(&self, name: &Path) -> Option<(&Path, &FieldError)> {
        if let Some((p, e)) = self.entries.get_key_value(name) {
            return Some((p, e));
        }
        if self.has_descendants(name) {
            return None;
        }
        let mut ancestor = name.parent();
        while let Some(p) = ancestor {
            if let Some((k, e)) = self.entries.get_key_value(&p) {
                return Some((k, e));
            }
            ancestor = p.parent();
        }
        None
    }

    /// The error stored exactly at `name`, without covering.
    #[inline]
    pub fn get_exact(&self, name: &Path) -> Option<&FieldError> {
        self.entries.get(name)
    }

    /// True when an error exists at `name` or below it.
    pub fn contains(&self, name: &Path) -> bool {
        self.entries.keys().any(|k| name.is_prefix_of(k))
    }

    fn has_descendants(&self, name: &Path) -> bool {
        self.entries.keys().any(|k| name.is_ancestor_of(k))
    }

    /// Remove only the error stored exactly at `name`.
    #[inline]
    pub fn remove(&mut self, name: &Path) -> Option<FieldError> {
        self.entries.remove(name)
    }

    /// Remove the error at `name` and every error below it.
    pub fn clear(&mut self, name: &Path) -> bool {
        let before = self.entries.len();
        self.entries.retain(|k, _| !name.is_prefix_of(k));
        before != self.entries.len()
    }

    /// Remove every error.
    #[inline]
    pub fn clear_all(&mut self) {
        self.entries.clear();
    }

    /// Errors at `name` and below, keyed by full path.
    pub fn subtree(&self, name: &Path) -> FieldErrors {
        FieldErrors {
            entries: self
                .entries
                .iter()
                .filter(|(k, _)| name.is_prefix_of(k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    /// Copy the errors at `name` and below from `source`, replacing whatever
    /// was stored there.
    pub fn replace_subtree(&mut self, name: &Path, source: &FieldErrors) {
        self.clear(name);
        for (k, v) in source.entries.iter().filter(|(k, _)| name.is_prefix_of(k)) {
            self.entries.insert(k.clone(), v.clone());
        }
    }

    /// Re-index errors under the array at `array` with `new_index_of`
    /// (old row index -> new row index, `None` drops the row). The array's
    /// own root-level error is kept.
    pub fn remap_rows(&mut self, array: &Path, new_index_of: impl Fn(usize) -> Option<usize>) {
        let depth = array.len();
        let moved: Vec<(Path, FieldError)> = {
            let keys: Vec<Path> = self
                .entries
                .keys()
                .filter(|k| array.is_ancestor_of(k))
                .cloned()
                .collect();
            keys.into_iter()
                .filter_map(|k| self.entries.remove(&k).map(|e| (k, e)))
                .collect()
        };
        for (key, error) in moved {
            let Some(old) = key[depth].as_index() else {
                self.entries.insert(key, error);
                continue;
            };
            if let Some(new) = new_index_of(old) {
                let mut segs = key.segments().to_vec();
                segs[depth] = Seg::Index(new);
                self.entries.insert(Path::from_segments(segs), error);
            }
        }
    }

    /// Number of stored errors.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no error is stored.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over `(path, error)` pairs in path order.
    pub fn iter(&self) -> impl Iterator<Item = (&Path, &FieldError)> {
        self.entries.iter()
    }

    /// Paths that carry an error, in path order.
    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.entries.keys()
    }

    /// Render as a nested JSON tree.
    ///
    /// A path that carries its own error and also has errored descendants
    /// places its own error under a `root` key.
    pub fn to_value(&self) -> Value {
        let mut out = Value::Object(Map::new());
        for (path, error) in &self.entries {
            let encoded = serde_json::to_value(error).unwrap_or(Value::Null);
            if self.has_descendants(path) {
                crate::access::set_at_path(&mut out, &path.with_segment(Seg::key("root")), encoded);
            } else {
                crate::access::set_at_path(&mut out, path, encoded);
            }
        }
        out
    }
}

impl<P: Into<Path>> FromIterator<(P, FieldError)> for FieldErrors {
    fn from_iter<I: IntoIterator<Item = (P, FieldError)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().map(|(p, e)| (p.into(), e)).collect(),
        }
    }
}

impl<'a> IntoIterator for &'a FieldErrors {
    type Item = (&'a Path, &'a FieldError);
    type IntoIter = std::collections::btree_map::Iter<'a, Path, FieldError>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Path of the form-level error produced when a resolver fails.
pub fn resolver_error_path() -> Path {
    parse_path("root.resolver")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn required(msg: &str) -> FieldError {
        FieldError::new("required", msg)
    }

    #[test]
    fn test_error_display() {
        let err = FormError::unknown_field(parse_path("users.0.name"));
        assert_eq!(err.to_string(), "unknown field: users.0.name");
    }

    #[test]
    fn test_array_error_covers_subtree() {
        let errors = FieldErrors::new().with("items", required("Items cannot be empty"));
        for name in ["items", "items.0", "items.field", "items.3.name"] {
            assert_eq!(
                errors.get(name).map(|e| e.message.as_str()),
                Some("Items cannot be empty"),
                "lookup at {name}"
            );
        }
        assert!(errors.get("other").is_none());
    }

    #[test]
    fn test_specific_error_below_wins_over_cover() {
        let errors = FieldErrors::new()
            .with("items", FieldError::new("minLength", "too few"))
            .with("items.0.name", required("name required"));
        assert_eq!(errors.get("items.0.name").unwrap().kind, "required");
        // something more specific exists below items.0
        assert!(errors.get("items.0").is_none());
        assert_eq!(errors.get("items.1").unwrap().kind, "minLength");
    }

    #[test]
    fn test_clear_removes_subtree() {
        let mut errors = FieldErrors::new()
            .with("a", required(""))
            .with("a.b", required(""))
            .with("ab", required(""));
        assert!(errors.clear(&parse_path("a")));
        assert_eq!(errors.len(), 1);
        assert!(errors.get_exact(&parse_path("ab")).is_some());
    }

    #[test]
    fn test_remap_rows_keeps_root_error() {
        let mut errors = FieldErrors::new()
            .with("items", required("root"))
            .with("items.0.name", required("zero"))
            .with("items.2.name", required("two"));
        // remove row 1: 0 -> 0, 2 -> 1
        errors.remap_rows(&parse_path("items"), |old| match old {
            0 => Some(0),
            1 => None,
            n => Some(n - 1),
        });
        assert_eq!(errors.get_exact(&parse_path("items")).unwrap().message, "root");
        assert_eq!(errors.get_exact(&parse_path("items.1.name")).unwrap().message, "two");
        assert!(errors.get_exact(&parse_path("items.2.name")).is_none());
    }

    #[test]
    fn test_to_value_nests_errors() {
        let errors = FieldErrors::new()
            .with("firstName", required("first"))
            .with("items", FieldError::new("minLength", "few"))
            .with("items.0.name", required("name"));
        let v = errors.to_value();
        assert_eq!(v["firstName"], json!({"type": "required", "message": "first"}));
        assert_eq!(v["items"]["root"]["type"], "minLength");
        // rows sit beside `root`, keyed by their decimal index
        assert_eq!(v["items"]["0"]["name"]["message"], "name");
    }

    #[test]
    fn test_field_error_serde_uses_type_key() {
        let e = FieldError::new("pattern", "bad").with_type("pattern", "bad");
        let v = serde_json::to_value(&e).unwrap();
        assert_eq!(v["type"], "pattern");
        assert_eq!(v["types"]["pattern"], "bad");
    }
}
