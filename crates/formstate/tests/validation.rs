//! Validation runs: rule mode, resolver mode, batching and superseded
//! results.

use async_trait::async_trait;
use formstate::{
    CriteriaMode, FieldError, FieldErrors, Form, FormDisabled, FormOptions, Mode,
    RegisterOptions, Resolver, ResolverError, ResolverOptions, ResolverOutput, SetValueOptions,
    ValidationRules,
};
use regex::Regex;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;

/// Resolver that records every call and answers from a fixed error set.
#[derive(Default)]
struct Recording {
    calls: Mutex<Vec<ResolverOptions>>,
    errors: Mutex<FieldErrors>,
    fail: Mutex<Option<String>>,
}

impl Recording {
    fn calls(&self) -> Vec<ResolverOptions> {
        self.calls.lock().unwrap().clone()
    }

    fn names(&self, call: usize) -> Vec<String> {
        self.calls()[call].names.clone()
    }

    fn answer(&self, errors: FieldErrors) {
        *self.errors.lock().unwrap() = errors;
    }
}

#[async_trait]
impl Resolver for Recording {
    async fn resolve(
        &self,
        values: Value,
        _context: Value,
        options: ResolverOptions,
    ) -> Result<ResolverOutput, ResolverError> {
        self.calls.lock().unwrap().push(options);
        if let Some(message) = self.fail.lock().unwrap().clone() {
            return Err(ResolverError::new(message));
        }
        let errors = self.errors.lock().unwrap().clone();
        if errors.is_empty() {
            Ok(ResolverOutput::valid(values))
        } else {
            Ok(ResolverOutput::invalid(errors))
        }
    }
}

/// Resolver whose calls each wait for an externally supplied answer.
#[derive(Default)]
struct Gated {
    gates: Mutex<VecDeque<oneshot::Receiver<FieldErrors>>>,
    calls: Mutex<usize>,
}

#[async_trait]
impl Resolver for Gated {
    async fn resolve(
        &self,
        values: Value,
        _context: Value,
        _options: ResolverOptions,
    ) -> Result<ResolverOutput, ResolverError> {
        let gate = self.gates.lock().unwrap().pop_front();
        *self.calls.lock().unwrap() += 1;
        let errors = match gate {
            Some(rx) => rx.await.unwrap_or_default(),
            None => FieldErrors::new(),
        };
        Ok(ResolverOutput { values, errors })
    }
}

fn resolver_form(resolver: Arc<dyn Resolver>, defaults: Value) -> Form {
    Form::new(
        FormOptions::new()
            .with_resolver(resolver)
            .with_default_values(defaults),
    )
}

fn required(message: &str) -> RegisterOptions {
    RegisterOptions::new(ValidationRules::new().required(message))
}

// ============================================================================
// Batching
// ============================================================================

#[tokio::test]
async fn test_registrations_batch_into_one_resolver_call() {
    let resolver = Arc::new(Recording::default());
    let form = resolver_form(resolver.clone(), json!({"a": "", "b": "", "c": ""}));
    for name in ["a", "b", "c"] {
        form.register(name, RegisterOptions::default());
    }
    assert!(resolver.calls().is_empty());

    form.flush().await;
    assert_eq!(resolver.calls().len(), 1);
    assert_eq!(resolver.names(0), vec!["a", "b", "c"]);
    assert!(form.form_state().is_valid);

    // nothing queued: a second flush does no work
    form.flush().await;
    assert_eq!(resolver.calls().len(), 1);
}

#[tokio::test]
async fn test_queued_writes_validate_together() {
    let resolver = Arc::new(Recording::default());
    let form = resolver_form(resolver.clone(), json!({"a": "", "b": ""}));
    form.register("a", RegisterOptions::default());
    form.register("b", RegisterOptions::default());
    form.flush().await;

    let validate = SetValueOptions::default().validate();
    form.set_value("a", json!(1), validate);
    form.set_value("b", json!(2), validate);
    form.set_value("a", json!(3), validate);
    form.flush().await;

    assert_eq!(resolver.calls().len(), 2);
    assert_eq!(resolver.names(1), vec!["a", "b"]);
}

#[tokio::test]
async fn test_close_discards_pending_work() {
    let resolver = Arc::new(Recording::default());
    let form = resolver_form(resolver.clone(), json!({"a": ""}));
    form.register("a", RegisterOptions::default());
    let _sub = form.subscribe_state(formstate::StateSelector::all(), |_| {});

    form.close();
    form.flush().await;
    assert!(resolver.calls().is_empty());
    assert_eq!(form.observer_count(), 0);
}

// ============================================================================
// Resolver mode
// ============================================================================

#[tokio::test]
async fn test_resolver_sees_only_requested_fields() {
    let resolver = Arc::new(Recording::default());
    let form = resolver_form(resolver.clone(), json!({"a": "", "b": ""}));
    form.register("a", required("a"));
    form.register("b", RegisterOptions::default());

    form.trigger_field("a").await;
    let call = &resolver.calls()[0];
    assert_eq!(call.names, vec!["a"]);
    assert_eq!(call.fields.keys().collect::<Vec<_>>(), vec!["a"]);
    assert!(call.fields["a"].rules.is_required());

    form.trigger_all().await;
    assert_eq!(resolver.names(1), vec!["a", "b"]);
    assert_eq!(resolver.calls()[1].fields.len(), 2);

    let _ = form.submit().await;
    assert_eq!(resolver.names(2), vec!["a", "b"]);
}

#[tokio::test]
async fn test_array_error_covers_every_row() {
    let resolver = Arc::new(Recording::default());
    let form = resolver_form(resolver.clone(), json!({"items": [{"field": "x"}]}));
    form.field_array("items", ValidationRules::new());
    form.flush().await;
    resolver.answer(FieldErrors::new().with("items", FieldError::new("min", "at least one")));

    form.set_value("items", json!([]), SetValueOptions::default().validate());
    form.flush().await;

    let errors = form.errors();
    for name in ["items", "items.0", "items.field"] {
        assert_eq!(errors.get(name).unwrap().message, "at least one", "{name}");
    }
    assert!(errors.get_exact(&"items.0".into()).is_none());
    assert!(!form.form_state().is_valid);
}

#[tokio::test]
async fn test_field_trigger_result_follows_its_own_errors() {
    let resolver = Arc::new(Recording::default());
    let form = resolver_form(resolver.clone(), json!({"a": "", "b": ""}));
    form.register("a", RegisterOptions::default());
    form.register("b", RegisterOptions::default());
    resolver.answer(FieldErrors::new().with("b", FieldError::new("required", "b")));

    assert!(form.trigger_field("a").await);
    // b was not requested: its error is not stored, but validity sees it
    assert!(form.errors().get("b").is_none());
    assert!(!form.form_state().is_valid);

    assert!(!form.trigger(["a", "b"]).await);
    assert_eq!(form.errors().get("b").unwrap().kind, "required");
}

#[tokio::test]
async fn test_resolver_failure_becomes_root_error() {
    let resolver = Arc::new(Recording::default());
    let form = resolver_form(resolver.clone(), json!({"a": ""}));
    form.register("a", RegisterOptions::default());
    *resolver.fail.lock().unwrap() = Some("schema exploded".into());

    assert!(!form.trigger_field("a").await);
    let error = form.errors().get("root.resolver").cloned().unwrap();
    assert_eq!(error.kind, "resolver");
    assert_eq!(error.message, "schema exploded");
    assert!(!form.form_state().is_valid);

    *resolver.fail.lock().unwrap() = None;
    assert!(form.trigger_field("a").await);
    assert!(form.errors().is_empty());
    assert!(form.form_state().is_valid);
}

#[tokio::test]
async fn test_resolver_errors_on_disabled_fields_are_dropped() {
    let resolver = Arc::new(Recording::default());
    let form = Form::new(
        FormOptions::new()
            .with_resolver(resolver.clone())
            .with_default_values(json!({"a": "", "b": ""}))
            .with_disabled(FormDisabled::Paths(vec!["b".into()])),
    );
    form.register("a", RegisterOptions::default());
    form.register("b", RegisterOptions::default());
    resolver.answer(FieldErrors::new().with("b", FieldError::new("required", "b")));

    let data = form.submit().await.expect("only the disabled field failed");
    assert_eq!(data, json!({"a": ""}));
    assert!(form.form_state().is_valid);
    assert!(resolver.calls()[0].fields["b"].disabled);
}

#[tokio::test]
async fn test_submit_uses_resolver_output_values() {
    struct Trim;

    #[async_trait]
    impl Resolver for Trim {
        async fn resolve(
            &self,
            values: Value,
            _context: Value,
            _options: ResolverOptions,
        ) -> Result<ResolverOutput, ResolverError> {
            let name = values["name"].as_str().unwrap_or_default().trim().to_owned();
            Ok(ResolverOutput::valid(json!({"name": name})))
        }
    }

    let form = resolver_form(Arc::new(Trim), json!({"name": "  Ada  "}));
    form.register("name", RegisterOptions::default());
    assert_eq!(form.submit().await.unwrap(), json!({"name": "Ada"}));
    // live values are untouched
    assert_eq!(form.get_values(), json!({"name": "  Ada  "}));
}

// ============================================================================
// Superseded runs
// ============================================================================

#[tokio::test]
async fn test_latest_validation_wins() {
    let resolver = Arc::new(Gated::default());
    let (first_tx, first_rx) = oneshot::channel();
    let (second_tx, second_rx) = oneshot::channel();
    resolver.gates.lock().unwrap().extend([first_rx, second_rx]);

    let form = resolver_form(resolver.clone(), json!({"a": ""}));
    form.register("a", RegisterOptions::default());

    let calls = |n: usize| {
        let resolver = resolver.clone();
        async move {
            while *resolver.calls.lock().unwrap() < n {
                tokio::task::yield_now().await;
            }
        }
    };

    let first = tokio::spawn({
        let form = form.clone();
        async move { form.trigger_field("a").await }
    });
    calls(1).await;
    let second = tokio::spawn({
        let form = form.clone();
        async move { form.trigger_field("a").await }
    });
    calls(2).await;
    assert!(form.form_state().is_field_validating("a"));

    second_tx.send(FieldErrors::new()).unwrap();
    assert!(second.await.unwrap());
    assert!(!form.form_state().is_validating);

    first_tx
        .send(FieldErrors::new().with("a", FieldError::new("stale", "old answer")))
        .unwrap();
    let _ = first.await.unwrap();

    let state = form.form_state();
    assert!(state.errors.get("a").is_none());
    assert!(!state.is_validating);
    assert_eq!(state.validating_fields, json!({}));
}

#[tokio::test]
async fn test_close_supersedes_in_flight_run() {
    let resolver = Arc::new(Gated::default());
    let (tx, rx) = oneshot::channel();
    resolver.gates.lock().unwrap().push_back(rx);
    let form = resolver_form(resolver.clone(), json!({"a": ""}));
    form.register("a", RegisterOptions::default());

    let run = tokio::spawn({
        let form = form.clone();
        async move { form.trigger_field("a").await }
    });
    while *resolver.calls.lock().unwrap() == 0 {
        tokio::task::yield_now().await;
    }
    form.close();
    tx.send(FieldErrors::new().with("a", FieldError::new("late", "late")))
        .unwrap();
    let _ = run.await.unwrap();
    assert!(form.errors().is_empty());
}

// ============================================================================
// Rule mode
// ============================================================================

#[tokio::test]
async fn test_rule_kinds() {
    let form = Form::new(
        FormOptions::new()
            .with_mode(Mode::OnChange)
            .with_default_values(json!({"age": "", "code": "", "tags": []})),
    );
    form.register(
        "age",
        RegisterOptions::new(ValidationRules::new().min(18.0, "adult").max(130.0, "human")),
    );
    form.register(
        "code",
        RegisterOptions::new(
            ValidationRules::new()
                .min_length(2, "short")
                .pattern(Regex::new("^[A-Z]+$").unwrap(), "upper"),
        ),
    );
    form.register(
        "tags",
        RegisterOptions::new(ValidationRules::new().max_length(2, "too many")),
    );

    let kind = |form: &Form, name: &str| form.errors().get(name).map(|e| e.kind.clone());

    // empty values skip the value rules
    assert!(form.trigger_all().await);

    form.handle_change("age", json!("12")).await;
    assert_eq!(kind(&form, "age").as_deref(), Some("min"));
    form.handle_change("age", json!(200)).await;
    assert_eq!(kind(&form, "age").as_deref(), Some("max"));
    form.handle_change("age", json!(40)).await;
    assert_eq!(kind(&form, "age"), None);

    form.handle_change("code", json!("A")).await;
    assert_eq!(kind(&form, "code").as_deref(), Some("minLength"));
    form.handle_change("code", json!("ab")).await;
    assert_eq!(kind(&form, "code").as_deref(), Some("pattern"));

    form.handle_change("tags", json!(["a", "b", "c"])).await;
    assert_eq!(kind(&form, "tags").as_deref(), Some("maxLength"));
}

#[tokio::test]
async fn test_criteria_mode_all_collects_every_failure() {
    let form = Form::new(
        FormOptions::new()
            .with_criteria_mode(CriteriaMode::All)
            .with_default_values(json!({"code": "a"})),
    );
    form.register(
        "code",
        RegisterOptions::new(
            ValidationRules::new()
                .min_length(3, "short")
                .pattern(Regex::new("^[0-9]+$").unwrap(), "digits")
                .validate_named("reserved", |v, _| {
                    if v == "a" {
                        Err("reserved".into())
                    } else {
                        Ok(())
                    }
                }),
        ),
    );

    assert!(!form.trigger_field("code").await);
    let error = form.errors().get("code").cloned().unwrap();
    assert_eq!(error.kind, "minLength");
    assert_eq!(
        error.types.keys().map(String::as_str).collect::<Vec<_>>(),
        vec!["minLength", "pattern", "reserved"]
    );
}

#[tokio::test]
async fn test_async_validate_sees_form_values() {
    let form = Form::new(
        FormOptions::new().with_default_values(json!({"password": "secret", "confirm": ""})),
    );
    form.register("password", RegisterOptions::default());
    form.register(
        "confirm",
        RegisterOptions::new(ValidationRules::new().validate_async(|value, values| async move {
            tokio::time::sleep(Duration::from_millis(1)).await;
            if value == values["password"] {
                Ok(())
            } else {
                Err("passwords differ".to_owned())
            }
        })),
    );

    assert!(!form.trigger_field("confirm").await);
    assert_eq!(form.errors().get("confirm").unwrap().kind, "validate");

    form.set_value("confirm", json!("secret"), SetValueOptions::default());
    assert!(form.trigger_field("confirm").await);
    assert!(form.errors().is_empty());
}

#[tokio::test]
async fn test_required_treats_false_as_empty() {
    let form = Form::new(FormOptions::new().with_default_values(json!({"terms": false})));
    form.register("terms", required("accept the terms"));
    assert!(form.submit().await.is_err());

    form.set_value("terms", json!(true), SetValueOptions::default());
    assert!(form.submit().await.is_ok());
}

#[tokio::test]
async fn test_validity_covers_unvalidated_fields() {
    let form = Form::new(
        FormOptions::new()
            .with_mode(Mode::OnChange)
            .with_default_values(json!({"a": "", "b": ""})),
    );
    form.register("a", required("a"));
    form.register("b", required("b"));
    form.flush().await;
    assert!(!form.form_state().is_valid);

    form.handle_change("a", json!("x")).await;
    // b still fails silently
    assert!(form.errors().is_empty());
    assert!(!form.form_state().is_valid);

    form.handle_change("b", json!("y")).await;
    assert!(form.form_state().is_valid);
}

#[tokio::test]
async fn test_field_change_runs_only_its_own_rules() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let form = Form::new(
        FormOptions::new()
            .with_mode(Mode::OnChange)
            .with_default_values(json!({"a": "", "b": "ok"})),
    );
    form.register("a", required("a"));
    form.register(
        "b",
        RegisterOptions::new(ValidationRules::new().validate(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })),
    );

    for text in ["x", "xy", "xyz"] {
        form.handle_change("a", json!(text)).await;
    }
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    // b was never checked, so validity waits for the next flush
    assert!(form.has_pending());
    form.flush().await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(form.form_state().is_valid);

    form.handle_change("a", json!("")).await;
    assert!(!form.form_state().is_valid);
    form.handle_change("a", json!("back")).await;
    assert!(form.form_state().is_valid);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    form.handle_change("b", json!("changed")).await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}
