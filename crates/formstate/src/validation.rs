//! Validation orchestration.
//!
//! A run is prepared under the form lock ([`ValidationRun`]), executed
//! without it (rules or resolver may await), and applied under the lock
//! again ([`apply_outcome`]). Each validated path carries a generation
//! counter; a result is applied only while its generation is still the
//! latest one issued for that path, so a slow superseded run can never
//! overwrite a newer result or clear a newer `validating` mark.

use crate::error::resolver_error_path;
use crate::meta::MetaState;
use crate::rules::evaluate_rules;
use crate::{
    access::get_at_path, CriteriaMode, FieldError, FieldErrors, Mode, Path, ReValidateMode,
    Resolver, ResolverError, ResolverField, ResolverOptions, ResolverOutput, ValidationRules,
};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{trace, warn};

/// Decide whether an interaction event skips field validation.
pub(crate) fn should_skip_validation(
    is_blur_event: bool,
    is_touched: bool,
    is_submitted: bool,
    re_validate_mode: ReValidateMode,
    mode: Mode,
) -> bool {
    if mode == Mode::All {
        return false;
    }
    if !is_submitted && mode == Mode::OnTouched {
        return !(is_touched || is_blur_event);
    }
    let on_blur = if is_submitted {
        re_validate_mode == ReValidateMode::OnBlur
    } else {
        mode == Mode::OnBlur
    };
    if on_blur {
        return !is_blur_event;
    }
    let on_change = if is_submitted {
        re_validate_mode == ReValidateMode::OnChange
    } else {
        mode == Mode::OnChange
    };
    if on_change {
        return is_blur_event;
    }
    true
}

/// Per-path generation counters plus one for whole-form validity.
#[derive(Debug, Default)]
pub(crate) struct GenerationTracker {
    generations: HashMap<Path, u64>,
    validity: u64,
}

impl GenerationTracker {
    /// Issue a new generation for `name`.
    pub fn begin(&mut self, name: &Path) -> u64 {
        let generation = self.generations.entry(name.clone()).or_insert(0);
        *generation += 1;
        *generation
    }

    pub fn is_current(&self, name: &Path, generation: u64) -> bool {
        self.generations.get(name) == Some(&generation)
    }

    /// Issue a new validity generation.
    pub fn begin_validity(&mut self) -> u64 {
        self.validity += 1;
        self.validity
    }

    pub fn is_validity_current(&self, generation: u64) -> bool {
        self.validity == generation
    }

    /// Supersede every run in flight.
    pub fn invalidate_all(&mut self) {
        for generation in self.generations.values_mut() {
            *generation += 1;
        }
        self.validity += 1;
    }
}

/// What a validation run covers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Scope {
    /// Field-level trigger for these paths.
    Fields(Vec<Path>),
    /// Every registered field (`trigger()` / submit).
    All,
    /// Validity refresh only; no errors are written.
    ValidityOnly,
}

/// Descriptor data captured for a run.
#[derive(Clone, Debug)]
pub(crate) struct RunField {
    pub name: Path,
    pub rules: ValidationRules,
    pub disabled: bool,
    pub mounted: bool,
    /// Disabled, or read-only while the form skips read-only fields.
    pub excluded: bool,
    /// Rules revision of the descriptor.
    pub revision: u64,
    /// Verdict cached for the current value and rules, rule mode only.
    pub cached_valid: Option<bool>,
}

#[derive(Debug)]
struct Verdict {
    value: Value,
    revision: u64,
    valid: bool,
}

/// Last rule-mode verdict of each field, keyed by the value and rules
/// revision it was computed for. Lets a field-level run settle whole-form
/// validity without re-running the rules of every other field.
#[derive(Debug, Default)]
pub(crate) struct RuleCache {
    verdicts: HashMap<Path, Verdict>,
}

impl RuleCache {
    /// Cached verdict of `name`, if it was computed for this value and revision.
    pub fn verdict(&self, name: &Path, value: &Value, revision: u64) -> Option<bool> {
        self.verdicts
            .get(name)
            .filter(|v| v.revision == revision && &v.value == value)
            .map(|v| v.valid)
    }

    pub fn store(&mut self, name: Path, value: Value, revision: u64, valid: bool) {
        self.verdicts.insert(
            name,
            Verdict {
                value,
                revision,
                valid,
            },
        );
    }

    /// Drop the verdicts of `name` and its descendants.
    pub fn forget(&mut self, name: &Path) {
        self.verdicts.retain(|path, _| !name.is_prefix_of(path));
    }
}

/// A prepared validation run.
pub(crate) struct ValidationRun {
    pub scope: Scope,
    /// Error-owning paths of this run with their generations.
    pub targets: Vec<(Path, u64)>,
    pub validity_generation: u64,
    pub values: Value,
    pub context: Value,
    pub resolver: Option<Arc<dyn Resolver>>,
    /// Every registered field, in registration order.
    pub fields: Vec<RunField>,
    pub criteria_mode: CriteriaMode,
    pub should_use_native_validation: bool,
}

/// Raw result of executing a run.
pub(crate) enum RunOutcome {
    /// Rule results of the evaluated fields (`None` = passes or excluded).
    Rules(BTreeMap<Path, Option<FieldError>>),
    Resolver(Result<ResolverOutput, ResolverError>),
}

/// What applying a run changed.
#[derive(Debug, Default)]
pub(crate) struct Applied {
    /// New whole-form validity, unless superseded.
    pub valid: Option<bool>,
    /// No error covers any target of the run.
    pub targets_valid: bool,
    /// Resolver-produced values (submit data in resolver mode).
    pub output_values: Option<Value>,
    /// Number of targets whose result was applied.
    pub applied: usize,
    /// Validity could not be settled from this run and cached verdicts.
    pub validity_pending: bool,
}

impl ValidationRun {
    /// Names the resolver is told about, in registration order for
    /// full-form runs and request order for field-level ones.
    pub fn resolver_names(&self) -> Vec<Path> {
        match &self.scope {
            Scope::Fields(names) => names.clone(),
            Scope::All | Scope::ValidityOnly => self.fields.iter().map(|f| f.name.clone()).collect(),
        }
    }

    fn resolver_options(&self) -> ResolverOptions {
        let names = self.resolver_names();
        let fields = self
            .fields
            .iter()
            .filter(|f| names.iter().any(|n| n.is_prefix_of(&f.name)))
            .map(|f| {
                (
                    f.name.to_string(),
                    ResolverField {
                        name: f.name.to_string(),
                        rules: f.rules.clone(),
                        disabled: f.disabled,
                        mounted: f.mounted,
                    },
                )
            })
            .collect();
        ResolverOptions {
            fields,
            names: names.iter().map(ToString::to_string).collect(),
            criteria_mode: self.criteria_mode,
            should_use_native_validation: self.should_use_native_validation,
        }
    }

    /// Whether rule mode evaluates `field` in this run: every field for a
    /// full run, the targets for a field-level run, and fields without a
    /// cached verdict for a validity refresh.
    fn evaluates(&self, field: &RunField) -> bool {
        match &self.scope {
            Scope::All => true,
            Scope::Fields(_) => self.targets.iter().any(|(name, _)| name == &field.name),
            Scope::ValidityOnly => field.cached_valid.is_none(),
        }
    }

    fn is_excluded(&self, name: &Path) -> bool {
        self.fields
            .iter()
            .any(|f| f.excluded && f.name.is_prefix_of(name))
    }

    /// Run rules or the resolver. Never touches form state.
    pub async fn execute(&self) -> RunOutcome {
        if let Some(resolver) = &self.resolver {
            let options = self.resolver_options();
            trace!(names = options.names.len(), "calling resolver");
            let result = resolver
                .resolve(self.values.clone(), self.context.clone(), options)
                .await;
            return RunOutcome::Resolver(result);
        }

        let mut results = BTreeMap::new();
        for field in &self.fields {
            if field.excluded {
                results.insert(field.name.clone(), None);
                continue;
            }
            if !self.evaluates(field) {
                continue;
            }
            let value = get_at_path(&self.values, &field.name)
                .cloned()
                .unwrap_or(Value::Null);
            let result =
                evaluate_rules(&field.rules, &value, &self.values, self.criteria_mode).await;
            results.insert(field.name.clone(), result);
        }
        RunOutcome::Rules(results)
    }
}

/// Apply an outcome to the error tree and meta trees.
pub(crate) fn apply_outcome(
    run: &ValidationRun,
    outcome: RunOutcome,
    tracker: &GenerationTracker,
    errors: &mut FieldErrors,
    meta: &mut MetaState,
    cache: &mut RuleCache,
) -> Applied {
    let mut applied = Applied::default();
    let current: Vec<&Path> = run
        .targets
        .iter()
        .filter_map(|(name, generation)| {
            if tracker.is_current(name, *generation) {
                Some(name)
            } else {
                trace!(name = %name, generation, "discarding stale validation result");
                None
            }
        })
        .collect();
    for name in &current {
        meta.set_validating(name, false);
    }
    applied.applied = current.len();
    let validity_current = tracker.is_validity_current(run.validity_generation);

    match outcome {
        RunOutcome::Rules(results) => {
            for name in &current {
                match results.get(*name).cloned().flatten() {
                    Some(error) => errors.set((*name).clone(), error),
                    None => {
                        errors.remove(name);
                    }
                }
            }
            applied.targets_valid = run
                .targets
                .iter()
                .all(|(name, _)| results.get(name).map_or(true, Option::is_none));
            let mut valid = true;
            let mut unknown = false;
            for field in run.fields.iter().filter(|f| !f.excluded) {
                let verdict = match results.get(&field.name) {
                    Some(result) => {
                        let value = get_at_path(&run.values, &field.name)
                            .cloned()
                            .unwrap_or(Value::Null);
                        cache.store(field.name.clone(), value, field.revision, result.is_none());
                        Some(result.is_none())
                    }
                    None => field.cached_valid,
                };
                match verdict {
                    Some(ok) => valid &= ok,
                    None => unknown = true,
                }
            }
            if unknown && valid {
                applied.validity_pending = true;
            } else if validity_current {
                applied.valid = Some(valid);
            }
        }
        RunOutcome::Resolver(Ok(output)) => {
            let reported: FieldErrors = output
                .errors
                .iter()
                .filter(|(path, _)| !run.is_excluded(path))
                .map(|(path, error)| (path.clone(), error.clone()))
                .collect();
            errors.remove(&resolver_error_path());
            for name in &current {
                apply_resolver_errors(name, &reported, errors);
            }
            if run.scope == Scope::All {
                for (path, error) in reported.iter() {
                    if !run.targets.iter().any(|(t, _)| t.is_related(path)) {
                        errors.set(path.clone(), error.clone());
                    }
                }
            }
            applied.targets_valid = match run.scope {
                Scope::Fields(_) => run
                    .targets
                    .iter()
                    .all(|(name, _)| !reported.contains(name) && reported.lookup(name).is_none()),
                _ => reported.is_empty(),
            };
            if validity_current {
                applied.valid = Some(reported.is_empty());
            }
            applied.output_values = Some(output.values);
        }
        RunOutcome::Resolver(Err(e)) => {
            warn!(error = %e, "resolver failed");
            if !current.is_empty() || run.scope == Scope::ValidityOnly {
                errors.set(resolver_error_path(), FieldError::new("resolver", e.message));
            }
            if validity_current {
                applied.valid = Some(false);
            }
        }
    }
    applied
}

/// Replace the errors of `name` with what the resolver reported for it.
///
/// A resolver may report an error on an ancestor (a whole array) that
/// covers `name`; that error is stored at the ancestor path it was
/// reported for, not re-keyed under `name`.
fn apply_resolver_errors(name: &Path, reported: &FieldErrors, errors: &mut FieldErrors) {
    let own = reported.subtree(name);
    errors.clear(name);
    if !own.is_empty() {
        errors.replace_subtree(name, &own);
        return;
    }
    if let Some((at, error)) = reported.lookup(name) {
        errors.set(at.clone(), error.clone());
    }
}
