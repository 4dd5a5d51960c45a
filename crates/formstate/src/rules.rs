//! Built-in validation rules and their evaluation.

use crate::{CriteriaMode, FieldError};
use futures::future::BoxFuture;
use regex::Regex;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

/// Outcome of a custom `validate` function: `Err(message)` fails the rule.
pub type ValidateResult = Result<(), String>;

/// Custom validation function: `(field value, all form values)`.
pub type ValidateFn = Arc<dyn Fn(Value, Value) -> BoxFuture<'static, ValidateResult> + Send + Sync>;

/// A rule threshold paired with the message reported when it fails.
#[derive(Clone, Debug, PartialEq)]
pub struct Rule<T> {
    /// Threshold / flag.
    pub value: T,
    /// Message reported on failure.
    pub message: String,
}

impl<T> Rule<T> {
    /// Create a rule.
    pub fn new(value: T, message: impl Into<String>) -> Self {
        Self {
            value,
            message: message.into(),
        }
    }
}

/// Custom validation: one anonymous function (error type `validate`) or a
/// set of named functions (error type = name).
#[derive(Clone)]
pub enum Validate {
    /// Reported as type `validate`.
    Single(ValidateFn),
    /// Reported under each function's name, evaluated in insertion order.
    Named(Vec<(String, ValidateFn)>),
}

impl Validate {
    /// Wrap a synchronous check.
    pub fn sync_fn(
        f: impl Fn(&Value, &Value) -> ValidateResult + Send + Sync + 'static,
    ) -> ValidateFn {
        Arc::new(move |value, values| {
            let result = f(&value, &values);
            Box::pin(futures::future::ready(result))
        })
    }

    /// Wrap an asynchronous check.
    pub fn async_fn<F, Fut>(f: F) -> ValidateFn
    where
        F: Fn(Value, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ValidateResult> + Send + 'static,
    {
        Arc::new(move |value, values| Box::pin(f(value, values)))
    }
}

impl std::fmt::Debug for Validate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Validate::Single(_) => f.write_str("Validate::Single(<fn>)"),
            Validate::Named(fns) => f
                .debug_tuple("Validate::Named")
                .field(&fns.iter().map(|(n, _)| n.as_str()).collect::<Vec<_>>())
                .finish(),
        }
    }
}

/// Built-in rules of one field (or one field array).
///
/// ```
/// use formstate::ValidationRules;
///
/// let rules = ValidationRules::new()
///     .required("First name is required")
///     .min_length(2, "Too short");
/// assert!(rules.is_required());
/// ```
#[derive(Clone, Debug, Default)]
pub struct ValidationRules {
    /// Value must be non-empty.
    pub required: Option<Rule<bool>>,
    /// Numeric lower bound.
    pub min: Option<Rule<f64>>,
    /// Numeric upper bound.
    pub max: Option<Rule<f64>>,
    /// Minimum string length / array length.
    pub min_length: Option<Rule<usize>>,
    /// Maximum string length / array length.
    pub max_length: Option<Rule<usize>>,
    /// String pattern.
    pub pattern: Option<Rule<Regex>>,
    /// Custom validation.
    pub validate: Option<Validate>,
}

impl ValidationRules {
    /// No rules.
    pub fn new() -> Self {
        Self::default()
    }

    /// Require a non-empty value.
    #[must_use]
    pub fn required(mut self, message: impl Into<String>) -> Self {
        self.required = Some(Rule::new(true, message));
        self
    }

    /// Numeric lower bound.
    #[must_use]
    pub fn min(mut self, min: f64, message: impl Into<String>) -> Self {
        self.min = Some(Rule::new(min, message));
        self
    }

    /// Numeric upper bound.
    #[must_use]
    pub fn max(mut self, max: f64, message: impl Into<String>) -> Self {
        self.max = Some(Rule::new(max, message));
        self
    }

    /// Minimum length.
    #[must_use]
    pub fn min_length(mut self, len: usize, message: impl Into<String>) -> Self {
        self.min_length = Some(Rule::new(len, message));
        self
    }

    /// Maximum length.
    #[must_use]
    pub fn max_length(mut self, len: usize, message: impl Into<String>) -> Self {
        self.max_length = Some(Rule::new(len, message));
        self
    }

    /// String pattern.
    #[must_use]
    pub fn pattern(mut self, pattern: Regex, message: impl Into<String>) -> Self {
        self.pattern = Some(Rule::new(pattern, message));
        self
    }

    /// Synchronous custom check, reported as type `validate`.
    #[must_use]
    pub fn validate(
        mut self,
        f: impl Fn(&Value, &Value) -> ValidateResult + Send + Sync + 'static,
    ) -> Self {
        self.validate = Some(Validate::Single(Validate::sync_fn(f)));
        self
    }

    /// Asynchronous custom check, reported as type `validate`.
    #[must_use]
    pub fn validate_async<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Value, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ValidateResult> + Send + 'static,
    {
        self.validate = Some(Validate::Single(Validate::async_fn(f)));
        self
    }

    /// Add a named synchronous check, reported under `name`.
    #[must_use]
    pub fn validate_named(
        mut self,
        name: impl Into<String>,
        f: impl Fn(&Value, &Value) -> ValidateResult + Send + Sync + 'static,
    ) -> Self {
        let entry = (name.into(), Validate::sync_fn(f));
        match &mut self.validate {
            Some(Validate::Named(fns)) => fns.push(entry),
            _ => self.validate = Some(Validate::Named(vec![entry])),
        }
        self
    }

    /// True if `required` is set.
    #[inline]
    pub fn is_required(&self) -> bool {
        self.required.as_ref().is_some_and(|r| r.value)
    }

    /// True if no rule is set.
    pub fn is_empty(&self) -> bool {
        self.required.is_none()
            && self.min.is_none()
            && self.max.is_none()
            && self.min_length.is_none()
            && self.max_length.is_none()
            && self.pattern.is_none()
            && self.validate.is_none()
    }
}

/// True for values `required` rejects: `null`, `""`, `[]`, `{}` and
/// `false` (an unchecked checkbox).
pub fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        Value::Number(_) => false,
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) if !s.trim().is_empty() => s.trim().parse().ok(),
        _ => None,
    }
}

fn length_of(value: &Value) -> Option<usize> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.chars().count()),
        Value::Array(a) => Some(a.len()),
        _ => None,
    }
}

struct Collector {
    criteria: CriteriaMode,
    error: Option<FieldError>,
}

impl Collector {
    /// Record a failure. Returns true when evaluation should stop.
    fn fail(&mut self, kind: &str, message: &str) -> bool {
        let collect_all = self.criteria == CriteriaMode::All;
        let error = self
            .error
            .get_or_insert_with(|| FieldError::new(kind, message));
        if collect_all {
            error.types.insert(kind.to_owned(), message.to_owned());
        }
        !collect_all
    }
}

/// Evaluate `rules` against `value`.
///
/// Emptiness short-circuits: `min`/`max`/length/pattern rules only apply to
/// non-empty values, while `validate` always runs.
pub async fn evaluate_rules(
    rules: &ValidationRules,
    value: &Value,
    form_values: &Value,
    criteria: CriteriaMode,
) -> Option<FieldError> {
    let mut collector = Collector {
        criteria,
        error: None,
    };
    let empty = is_empty_value(value);

    if let Some(rule) = rules.required.as_ref().filter(|r| r.value) {
        if empty && collector.fail("required", &rule.message) {
            return collector.error;
        }
    }

    if !empty {
        if let Some(n) = as_number(value) {
            if let Some(rule) = &rules.min {
                if n < rule.value && collector.fail("min", &rule.message) {
                    return collector.error;
                }
            }
            if let Some(rule) = &rules.max {
                if n > rule.value && collector.fail("max", &rule.message) {
                    return collector.error;
                }
            }
        }

        if let Some(len) = length_of(value) {
            if let Some(rule) = &rules.min_length {
                if len < rule.value && collector.fail("minLength", &rule.message) {
                    return collector.error;
                }
            }
            if let Some(rule) = &rules.max_length {
                if len > rule.value && collector.fail("maxLength", &rule.message) {
                    return collector.error;
                }
            }
        }

        if let (Some(rule), Value::String(s)) = (&rules.pattern, value) {
            if !rule.value.is_match(s) && collector.fail("pattern", &rule.message) {
                return collector.error;
            }
        }
    } else if let Some(rule) = &rules.min_length {
        // an emptied field array still violates its minimum row count
        if matches!(value, Value::Array(_))
            && rule.value > 0
            && collector.fail("minLength", &rule.message)
        {
            return collector.error;
        }
    }

    match &rules.validate {
        Some(Validate::Single(f)) => {
            if let Err(message) = f(value.clone(), form_values.clone()).await {
                collector.fail("validate", &message);
            }
        }
        Some(Validate::Named(fns)) => {
            for (name, f) in fns {
                if let Err(message) = f(value.clone(), form_values.clone()).await {
                    if collector.fail(name, &message) {
                        break;
                    }
                }
            }
        }
        None => {}
    }

    collector.error
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn eval(rules: &ValidationRules, value: Value) -> Option<FieldError> {
        futures::executor::block_on(evaluate_rules(
            rules,
            &value,
            &json!({}),
            CriteriaMode::FirstError,
        ))
    }

    #[test]
    fn test_required() {
        let rules = ValidationRules::new().required("needed");
        assert_eq!(eval(&rules, json!("")).unwrap().kind, "required");
        assert_eq!(eval(&rules, json!(null)).unwrap().message, "needed");
        assert_eq!(eval(&rules, json!([])).unwrap().kind, "required");
        assert_eq!(eval(&rules, json!(false)).unwrap().kind, "required");
        assert!(eval(&rules, json!("x")).is_none());
        assert!(eval(&rules, json!(0)).is_none());
    }

    #[test]
    fn test_min_max_on_numbers_and_numeric_strings() {
        let rules = ValidationRules::new().min(2.0, "low").max(5.0, "high");
        assert_eq!(eval(&rules, json!(1)).unwrap().kind, "min");
        assert_eq!(eval(&rules, json!("9")).unwrap().kind, "max");
        assert!(eval(&rules, json!(3)).is_none());
        assert!(eval(&rules, json!("")).is_none());
    }

    #[test]
    fn test_length_rules_count_chars() {
        let rules = ValidationRules::new().min_length(2, "short").max_length(3, "long");
        assert_eq!(eval(&rules, json!("é")).unwrap().kind, "minLength");
        assert_eq!(eval(&rules, json!("abcd")).unwrap().kind, "maxLength");
        assert!(eval(&rules, json!("ab")).is_none());
        // empty and not required: skipped
        assert!(eval(&rules, json!("")).is_none());
    }

    #[test]
    fn test_array_length_rules() {
        let rules = ValidationRules::new().min_length(1, "need a row");
        assert_eq!(eval(&rules, json!([])).unwrap().kind, "minLength");
        assert!(eval(&rules, json!([{"a": 1}])).is_none());
    }

    #[test]
    fn test_pattern() {
        let rules = ValidationRules::new().pattern(Regex::new(r"^\d+$").unwrap(), "digits");
        assert_eq!(eval(&rules, json!("12a")).unwrap().kind, "pattern");
        assert!(eval(&rules, json!("123")).is_none());
    }

    #[test]
    fn test_validate_sync_and_named() {
        let rules = ValidationRules::new().validate(|v, _| {
            if v == "admin" {
                Err("reserved".into())
            } else {
                Ok(())
            }
        });
        let err = eval(&rules, json!("admin")).unwrap();
        assert_eq!((err.kind.as_str(), err.message.as_str()), ("validate", "reserved"));

        let rules = ValidationRules::new()
            .validate_named("positive", |v, _| {
                (v.as_i64().unwrap_or(0) > 0).then_some(()).ok_or("must be positive".into())
            })
            .validate_named("even", |v, _| {
                (v.as_i64().unwrap_or(1) % 2 == 0).then_some(()).ok_or("must be even".into())
            });
        assert_eq!(eval(&rules, json!(3)).unwrap().kind, "even");
    }

    #[test]
    fn test_validate_sees_form_values() {
        let rules = ValidationRules::new().validate(|v, all| {
            if Some(v) == all.get("password") {
                Ok(())
            } else {
                Err("mismatch".into())
            }
        });
        let err = futures::executor::block_on(evaluate_rules(
            &rules,
            &json!("a"),
            &json!({"password": "b"}),
            CriteriaMode::FirstError,
        ));
        assert_eq!(err.unwrap().message, "mismatch");
    }

    #[test]
    fn test_criteria_all_collects_types() {
        let rules = ValidationRules::new()
            .min_length(5, "short")
            .pattern(Regex::new("^[a-z]+$").unwrap(), "lowercase")
            .validate(|_, _| Err("nope".into()));
        let err = futures::executor::block_on(evaluate_rules(
            &rules,
            &json!("AB"),
            &json!({}),
            CriteriaMode::All,
        ))
        .unwrap();
        assert_eq!(err.kind, "minLength");
        assert_eq!(err.types.len(), 3);
        assert_eq!(err.types["pattern"], "lowercase");
        assert_eq!(err.types["validate"], "nope");
    }

    #[test]
    fn test_async_validate() {
        let rules = ValidationRules::new().validate_async(|v: Value, _| async move {
            if v.as_str() == Some("taken") {
                Err("already taken".to_string())
            } else {
                Ok(())
            }
        });
        assert_eq!(eval(&rules, json!("taken")).unwrap().message, "already taken");
        assert!(eval(&rules, json!("free")).is_none());
    }
}
