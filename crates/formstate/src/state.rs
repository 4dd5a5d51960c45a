//! Observable form state.
//!
//! Snapshots are derived on demand from the registry, meta trees and error
//! tree; they are never a source of truth.

use crate::access::is_marked;
use crate::{FieldError, FieldErrors, Path};
use serde_json::Value;
use std::sync::Arc;

/// Submit/validity flags that are not derivable from the trees.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct FormFlags {
    pub is_valid: bool,
    pub is_submitted: bool,
    pub is_submitting: bool,
    pub is_submit_successful: bool,
    pub submit_count: u32,
    pub is_loading: bool,
}

/// Externally observable aggregate of the form.
#[derive(Clone, Debug, PartialEq)]
pub struct FormStateSnapshot {
    /// Live value tree.
    pub values: Value,
    /// Default snapshot used as the dirtiness baseline.
    pub default_values: Value,
    /// Error tree.
    pub errors: FieldErrors,
    /// Pruned boolean tree of dirty leaves.
    pub dirty_fields: Value,
    /// Pruned boolean tree of touched leaves.
    pub touched_fields: Value,
    /// Pruned boolean tree of fields with a validation in flight.
    pub validating_fields: Value,
    /// Any registered field differs from its default.
    pub is_dirty: bool,
    /// Last validity computation passed.
    pub is_valid: bool,
    /// At least one validation is in flight.
    pub is_validating: bool,
    /// A submit has completed since the last reset.
    pub is_submitted: bool,
    /// A submit is in progress.
    pub is_submitting: bool,
    /// The last completed submit passed validation.
    pub is_submit_successful: bool,
    /// Number of submit attempts since the last reset.
    pub submit_count: u32,
    /// The whole form is disabled.
    pub disabled: bool,
    /// A submit has ever completed. Survives `reset`.
    pub has_been_submitted: bool,
    /// A value changed after the last completed submit.
    pub is_dirty_since_submit: bool,
    /// An async values loader is pending.
    pub is_loading: bool,
}

impl FormStateSnapshot {
    /// Error covering `name`.
    pub fn error(&self, name: impl Into<Path>) -> Option<&FieldError> {
        self.errors.get(name)
    }

    /// True when `name` (or something below it) is dirty.
    pub fn is_field_dirty(&self, name: impl Into<Path>) -> bool {
        is_marked(&self.dirty_fields, &name.into())
    }

    /// True when `name` (or something below it) is touched.
    pub fn is_field_touched(&self, name: impl Into<Path>) -> bool {
        is_marked(&self.touched_fields, &name.into())
    }

    /// True when `name` (or something below it) is being validated.
    pub fn is_field_validating(&self, name: impl Into<Path>) -> bool {
        is_marked(&self.validating_fields, &name.into())
    }
}

/// State of a single field.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FieldState {
    /// An error covers the field.
    pub invalid: bool,
    /// The field differs from its default.
    pub is_dirty: bool,
    /// The field has been blurred or touched programmatically.
    pub is_touched: bool,
    /// A validation for the field is in flight.
    pub is_validating: bool,
    /// The covering error, if any.
    pub error: Option<FieldError>,
}

/// Payload of the form-state channel.
#[derive(Clone, Debug)]
pub struct StateUpdate {
    /// Path the update concerns; `None` for form-wide changes.
    pub name: Option<Path>,
    /// State after the update.
    pub state: Arc<FormStateSnapshot>,
}

/// Which state updates a `Form::subscribe_state` observer receives.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StateSelector {
    /// Only updates concerning these paths (empty = every update).
    pub names: Vec<Path>,
    /// Require an exact path match instead of a related one.
    pub exact: bool,
}

impl StateSelector {
    /// Every update.
    pub fn all() -> Self {
        Self::default()
    }

    /// Updates concerning `name`.
    pub fn field(name: impl Into<Path>) -> Self {
        Self {
            names: vec![name.into()],
            exact: false,
        }
    }

    /// Updates concerning any of `names`.
    pub fn fields<I, P>(names: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Path>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
            exact: false,
        }
    }

    /// Require exact path matches.
    #[must_use]
    pub fn exact(mut self) -> Self {
        self.exact = true;
        self
    }

    /// True when an update about `name` concerns this selector.
    pub fn matches(&self, name: Option<&Path>) -> bool {
        let Some(name) = name else {
            return true;
        };
        if self.names.is_empty() {
            return true;
        }
        self.names.iter().any(|selected| {
            if self.exact {
                selected == name
            } else {
                selected.is_related(name)
            }
        })
    }
}
