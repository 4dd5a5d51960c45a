//! External resolver contract.
//!
//! A resolver validates (and may transform) the whole value tree in one
//! call, in place of the built-in rules. The engine tells it which fields
//! triggered the run through [`ResolverOptions`]: a single field for a
//! field-level trigger, every registered field for `trigger()` with no
//! argument and for submit.

use crate::{CriteriaMode, FieldErrors, ValidationRules};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

/// Descriptor view handed to the resolver for each field in scope.
#[derive(Clone, Debug)]
pub struct ResolverField {
    /// Canonical field name.
    pub name: String,
    /// The field's built-in rules.
    pub rules: ValidationRules,
    /// Resolved disabled state.
    pub disabled: bool,
    /// Whether the field currently has a mounted element.
    pub mounted: bool,
}

/// Options passed alongside values and context.
#[derive(Clone, Debug)]
pub struct ResolverOptions {
    /// Fields in scope for this run, keyed by name.
    pub fields: BTreeMap<String, ResolverField>,
    /// Names in scope for this run, in registration order.
    pub names: Vec<String>,
    /// Criteria mode of the form.
    pub criteria_mode: CriteriaMode,
    /// Passed through unchanged.
    pub should_use_native_validation: bool,
}

/// Resolver result: transformed values plus errors (empty when valid).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResolverOutput {
    /// Values the resolver produced (used as submit data when valid).
    pub values: Value,
    /// Errors keyed by path.
    pub errors: FieldErrors,
}

impl ResolverOutput {
    /// A passing result.
    pub fn valid(values: Value) -> Self {
        Self {
            values,
            errors: FieldErrors::new(),
        }
    }

    /// A failing result.
    pub fn invalid(errors: FieldErrors) -> Self {
        Self {
            values: Value::Object(Default::default()),
            errors,
        }
    }
}

/// A resolver that could not produce a result at all.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ResolverError {
    /// Description of the failure.
    pub message: String,
}

impl ResolverError {
    /// Create a resolver error.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Schema-style validator.
///
/// # Example
///
/// ```
/// use async_trait::async_trait;
/// use formstate::{FieldError, FieldErrors, Resolver, ResolverError, ResolverOptions, ResolverOutput};
/// use serde_json::Value;
///
/// struct NonEmptyItems;
///
/// #[async_trait]
/// impl Resolver for NonEmptyItems {
///     async fn resolve(
///         &self,
///         values: Value,
///         _context: Value,
///         _options: ResolverOptions,
///     ) -> Result<ResolverOutput, ResolverError> {
///         let empty = values["items"].as_array().map_or(true, |a| a.is_empty());
///         if empty {
///             let errors = FieldErrors::new()
///                 .with("items", FieldError::new("required", "Items cannot be empty"));
///             Ok(ResolverOutput::invalid(errors))
///         } else {
///             Ok(ResolverOutput::valid(values))
///         }
///     }
/// }
/// ```
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Validate `values`.
    async fn resolve(
        &self,
        values: Value,
        context: Value,
        options: ResolverOptions,
    ) -> Result<ResolverOutput, ResolverError>;
}
