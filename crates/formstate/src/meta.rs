//! Dirty/touched/validating trees and the submit latches.

use crate::access::{clear_mark, diff_tree, get_at_path, is_marked, mark, set_at_path};
use crate::registry::FieldRegistry;
use crate::Path;
use serde_json::{Map, Value};

fn empty_tree() -> Value {
    Value::Object(Map::new())
}

/// Interaction state of one form.
#[derive(Debug)]
pub(crate) struct MetaState {
    pub dirty: Value,
    pub touched: Value,
    pub validating: Value,
    has_been_submitted: bool,
    is_dirty_since_submit: bool,
}

impl Default for MetaState {
    fn default() -> Self {
        Self {
            dirty: empty_tree(),
            touched: empty_tree(),
            validating: empty_tree(),
            has_been_submitted: false,
            is_dirty_since_submit: false,
        }
    }
}

impl MetaState {
    /// Recompute the dirty mark of `name` from equality with the default.
    /// Returns true when the dirty tree changed.
    pub fn update_dirty(&mut self, name: &Path, registry: &FieldRegistry) -> bool {
        let before = get_at_path(&self.dirty, name).cloned();
        let current = registry.live_at(name);
        let default = registry.default_at(name);
        let after = match current {
            Some(current) => diff_tree(current, default),
            None if default.is_some() => Some(Value::Bool(true)),
            None => None,
        };
        if before == after {
            return false;
        }
        if name.is_empty() {
            self.dirty = after.filter(Value::is_object).unwrap_or_else(empty_tree);
            return true;
        }
        clear_mark(&mut self.dirty, name);
        if let Some(after) = after {
            set_at_path(&mut self.dirty, name, after);
        }
        true
    }

    /// Rebuild the whole dirty tree from the value and default trees.
    pub fn recompute_dirty(&mut self, registry: &FieldRegistry) {
        self.dirty = diff_tree(registry.values(), Some(registry.defaults()))
            .filter(Value::is_object)
            .unwrap_or_else(empty_tree);
    }

    /// Whole-form dirtiness: any registered field carrying a dirty mark.
    /// Ad-hoc values with no descriptor do not count, and writes that skip
    /// the dirty update leave this unchanged.
    pub fn is_dirty(&self, registry: &FieldRegistry) -> bool {
        registry
            .descriptors()
            .any(|field| is_marked(&self.dirty, &field.name))
    }

    /// Mark `name` touched. Returns true when it was not touched before.
    pub fn touch(&mut self, name: &Path) -> bool {
        if get_at_path(&self.touched, name) == Some(&Value::Bool(true)) {
            return false;
        }
        mark(&mut self.touched, name);
        true
    }

    pub fn is_touched(&self, name: &Path) -> bool {
        is_marked(&self.touched, name)
    }

    pub fn is_field_dirty(&self, name: &Path) -> bool {
        is_marked(&self.dirty, name)
    }

    pub fn set_validating(&mut self, name: &Path, validating: bool) {
        if validating {
            mark(&mut self.validating, name);
        } else {
            clear_mark(&mut self.validating, name);
        }
    }

    pub fn is_validating(&self, name: &Path) -> bool {
        is_marked(&self.validating, name)
    }

    pub fn any_validating(&self) -> bool {
        is_marked(&self.validating, &Path::root())
    }

    /// Drop every mark of `name`.
    pub fn forget(&mut self, name: &Path, keep_dirty: bool, keep_touched: bool) {
        if !keep_dirty {
            clear_mark(&mut self.dirty, name);
        }
        if !keep_touched {
            clear_mark(&mut self.touched, name);
        }
        clear_mark(&mut self.validating, name);
    }

    /// Record a value change for the since-submit flag.
    pub fn note_value_change(&mut self) {
        if self.has_been_submitted {
            self.is_dirty_since_submit = true;
        }
    }

    /// Record a completed submit (successful or not).
    pub fn note_submit_completed(&mut self) {
        self.has_been_submitted = true;
        self.is_dirty_since_submit = false;
    }

    /// Reset interaction state. `has_been_submitted` is a one-way latch and
    /// survives.
    pub fn reset(&mut self, keep_dirty: bool, keep_touched: bool) {
        if !keep_dirty {
            self.dirty = empty_tree();
        }
        if !keep_touched {
            self.touched = empty_tree();
        }
        self.validating = empty_tree();
        self.is_dirty_since_submit = false;
    }

    pub fn has_been_submitted(&self) -> bool {
        self.has_been_submitted
    }

    pub fn is_dirty_since_submit(&self) -> bool {
        self.is_dirty_since_submit
    }
}
