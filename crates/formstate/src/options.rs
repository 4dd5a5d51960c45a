//! Form configuration and per-call option structs.

use crate::{Resolver, ValidationRules};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// When field-level validation runs before the first submit.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Mode {
    /// Only on submit (and explicit `trigger`).
    #[default]
    OnSubmit,
    /// On blur.
    OnBlur,
    /// On every change.
    OnChange,
    /// On first blur, then on every change.
    OnTouched,
    /// On blur and change.
    All,
}

/// When field-level validation runs after the first submit.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReValidateMode {
    /// On blur.
    OnBlur,
    /// On every change.
    #[default]
    OnChange,
    /// Only on submit.
    OnSubmit,
}

/// Whether rule evaluation stops at the first failing rule.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CriteriaMode {
    /// Stop at the first failing rule.
    #[default]
    FirstError,
    /// Evaluate every rule and collect them into `FieldError::types`.
    All,
}

/// Form-level disabled default.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FormDisabled {
    /// Every field follows this flag.
    Form(bool),
    /// Only the listed paths are disabled.
    Paths(Vec<String>),
}

impl Default for FormDisabled {
    fn default() -> Self {
        FormDisabled::Form(false)
    }
}

/// Form configuration.
#[derive(Clone)]
pub struct FormOptions {
    /// Validation trigger before the first submit.
    pub mode: Mode,
    /// Validation trigger after the first submit.
    pub re_validate_mode: ReValidateMode,
    /// First-error or collect-all rule evaluation.
    pub criteria_mode: CriteriaMode,
    /// Default values; the baseline for dirtiness.
    pub default_values: Value,
    /// External schema validator. Rule mode is used when absent.
    pub resolver: Option<Arc<dyn Resolver>>,
    /// Opaque context handed to the resolver.
    pub context: Value,
    /// Remove a field's value when it unmounts.
    pub should_unregister: bool,
    /// Focus the first errored field after a failed submit.
    pub should_focus_error: bool,
    /// Passed through to the resolver unchanged.
    pub should_use_native_validation: bool,
    /// Form-level disabled default.
    pub disabled: FormDisabled,
    /// Bypass rule evaluation for read-only fields.
    pub skip_read_only_validation: bool,
}

impl Default for FormOptions {
    fn default() -> Self {
        Self {
            mode: Mode::default(),
            re_validate_mode: ReValidateMode::default(),
            criteria_mode: CriteriaMode::default(),
            default_values: Value::Object(Default::default()),
            resolver: None,
            context: Value::Null,
            should_unregister: false,
            should_focus_error: true,
            should_use_native_validation: false,
            disabled: FormDisabled::default(),
            skip_read_only_validation: false,
        }
    }
}

impl std::fmt::Debug for FormOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FormOptions")
            .field("mode", &self.mode)
            .field("re_validate_mode", &self.re_validate_mode)
            .field("criteria_mode", &self.criteria_mode)
            .field("default_values", &self.default_values)
            .field("resolver", &self.resolver.as_ref().map(|_| "<resolver>"))
            .field("should_unregister", &self.should_unregister)
            .field("disabled", &self.disabled)
            .field("skip_read_only_validation", &self.skip_read_only_validation)
            .finish()
    }
}

impl FormOptions {
    /// Create options with defaults (`OnSubmit` mode, rule validation).
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the validation mode.
    #[must_use]
    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the revalidation mode used after the first submit.
    #[must_use]
    pub fn with_re_validate_mode(mut self, mode: ReValidateMode) -> Self {
        self.re_validate_mode = mode;
        self
    }

    /// Set the criteria mode.
    #[must_use]
    pub fn with_criteria_mode(mut self, mode: CriteriaMode) -> Self {
        self.criteria_mode = mode;
        self
    }

    /// Set default values.
    #[must_use]
    pub fn with_default_values(mut self, values: Value) -> Self {
        self.default_values = values;
        self
    }

    /// Validate through an external resolver.
    #[must_use]
    pub fn with_resolver(mut self, resolver: Arc<dyn Resolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Set the resolver context.
    #[must_use]
    pub fn with_context(mut self, context: Value) -> Self {
        self.context = context;
        self
    }

    /// Drop values of unmounted fields.
    #[must_use]
    pub fn with_should_unregister(mut self, enabled: bool) -> Self {
        self.should_unregister = enabled;
        self
    }

    /// Focus the first errored field after a failed submit.
    #[must_use]
    pub fn with_should_focus_error(mut self, enabled: bool) -> Self {
        self.should_focus_error = enabled;
        self
    }

    /// Pass-through flag for the resolver.
    #[must_use]
    pub fn with_should_use_native_validation(mut self, enabled: bool) -> Self {
        self.should_use_native_validation = enabled;
        self
    }

    /// Set the form-level disabled default.
    #[must_use]
    pub fn with_disabled(mut self, disabled: FormDisabled) -> Self {
        self.disabled = disabled;
        self
    }

    /// Skip rule evaluation for read-only fields.
    #[must_use]
    pub fn with_skip_read_only_validation(mut self, enabled: bool) -> Self {
        self.skip_read_only_validation = enabled;
        self
    }
}

/// Options accepted by `Form::register`.
#[derive(Clone, Debug, Default)]
pub struct RegisterOptions {
    /// Built-in validation rules.
    pub rules: ValidationRules,
    /// Field-level disabled flag; wins over the form-level default.
    pub disabled: Option<bool>,
    /// Read-only affordance; validated unless the form skips read-only fields.
    pub read_only: bool,
    /// Initial value used when neither a live nor a default value exists.
    pub value: Option<Value>,
}

impl RegisterOptions {
    /// Options with the given rules.
    pub fn new(rules: ValidationRules) -> Self {
        Self {
            rules,
            ..Default::default()
        }
    }

    /// Set the field-level disabled flag.
    #[must_use]
    pub fn with_disabled(mut self, disabled: bool) -> Self {
        self.disabled = Some(disabled);
        self
    }

    /// Mark the field read-only.
    #[must_use]
    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Set an initial value.
    #[must_use]
    pub fn with_value(mut self, value: Value) -> Self {
        self.value = Some(value);
        self
    }
}

impl From<ValidationRules> for RegisterOptions {
    fn from(rules: ValidationRules) -> Self {
        Self::new(rules)
    }
}

/// Options for `Form::set_value`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SetValueOptions {
    /// Queue validation of the path.
    pub should_validate: bool,
    /// Recompute the dirty mark of the path.
    pub should_dirty: bool,
    /// Mark the path touched.
    pub should_touch: bool,
}

impl SetValueOptions {
    /// Queue validation.
    #[must_use]
    pub fn validate(mut self) -> Self {
        self.should_validate = true;
        self
    }

    /// Recompute dirtiness.
    #[must_use]
    pub fn dirty(mut self) -> Self {
        self.should_dirty = true;
        self
    }

    /// Mark touched.
    #[must_use]
    pub fn touch(mut self) -> Self {
        self.should_touch = true;
        self
    }
}

/// Which parts of form state survive a `reset`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResetOptions {
    /// Keep current values.
    pub keep_values: bool,
    /// Keep the default snapshot even when new values are passed.
    pub keep_default_values: bool,
    /// Keep the values of dirty fields, overwrite the rest.
    pub keep_dirty_values: bool,
    /// Keep errors.
    pub keep_errors: bool,
    /// Keep dirty marks.
    pub keep_dirty: bool,
    /// Keep touched marks.
    pub keep_touched: bool,
    /// Keep `is_submitted`.
    pub keep_is_submitted: bool,
    /// Keep `submit_count`.
    pub keep_submit_count: bool,
    /// Keep `is_submit_successful`.
    pub keep_is_submit_successful: bool,
    /// Keep `is_valid`.
    pub keep_is_valid: bool,
}

/// Which parts of a field survive `Form::reset_field`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResetFieldOptions {
    /// Keep the dirty mark.
    pub keep_dirty: bool,
    /// Keep the touched mark.
    pub keep_touched: bool,
    /// Keep the error.
    pub keep_error: bool,
    /// Replace the field's default value.
    pub default_value: Option<Value>,
}

/// What `Form::unregister` leaves behind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UnregisterOptions {
    /// Keep the live value.
    pub keep_value: bool,
    /// Keep errors. On by default: errors persist until revalidated or
    /// cleared explicitly.
    pub keep_error: bool,
    /// Keep the dirty mark.
    pub keep_dirty: bool,
    /// Keep the touched mark.
    pub keep_touched: bool,
    /// Keep the default value.
    pub keep_default_value: bool,
    /// Skip the validity refresh.
    pub keep_is_valid: bool,
}

impl Default for UnregisterOptions {
    fn default() -> Self {
        Self {
            keep_value: false,
            keep_error: true,
            keep_dirty: false,
            keep_touched: false,
            keep_default_value: false,
            keep_is_valid: false,
        }
    }
}
