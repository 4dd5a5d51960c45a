//! The per-form handle.
//!
//! [`Form`] is a cheap cloneable handle over one form's state. All trees
//! live in a single [`FormCore`] behind a mutex; the lock is never held
//! across an await point or while observers run. Mutations apply fully
//! under the lock, then the channels are notified from outside it.

use crate::access::{clear_mark, get_at_path, marked_paths, set_at_path, unset_at_path};
use crate::element::{focus_element, ElementRef};
use crate::field_array::{self, ArrayEvent, ArrayOp, ArrayRow, FieldArray, RowIds};
use crate::meta::MetaState;
use crate::registry::FieldRegistry;
use crate::scheduler::UpdateScheduler;
use crate::state::{FormFlags, StateSelector, StateUpdate};
use crate::validation::{
    apply_outcome, should_skip_validation, Applied, GenerationTracker, RuleCache, RunField,
    Scope, ValidationRun,
};
use crate::watch::{ValuesEvent, WatchBuilder, WatchTarget};
use crate::{
    FieldError, FieldErrors, FieldState, FormError, FormOptions, FormResult,
    FormStateSnapshot, Path, RegisterOptions, ResetFieldOptions, ResetOptions, SetValueOptions,
    Subject, Subscription, UnregisterOptions, ValidationRules,
};
use serde_json::Value;
use std::fmt::Display;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

/// Everything one form owns.
pub(crate) struct FormCore {
    pub options: FormOptions,
    pub registry: FieldRegistry,
    pub meta: MetaState,
    pub errors: FieldErrors,
    pub generations: GenerationTracker,
    pub rule_cache: RuleCache,
    pub scheduler: UpdateScheduler,
    pub rows: RowIds,
    pub flags: FormFlags,
}

impl FormCore {
    fn new(options: FormOptions) -> Self {
        let registry = FieldRegistry::new(options.default_values.clone(), options.disabled.clone());
        Self {
            options,
            registry,
            meta: MetaState::default(),
            errors: FieldErrors::new(),
            generations: GenerationTracker::default(),
            rule_cache: RuleCache::default(),
            scheduler: UpdateScheduler::default(),
            rows: RowIds::default(),
            flags: FormFlags::default(),
        }
    }

    fn snapshot(&self) -> FormStateSnapshot {
        FormStateSnapshot {
            values: self.registry.values().clone(),
            default_values: self.registry.defaults().clone(),
            errors: self.errors.clone(),
            dirty_fields: self.meta.dirty.clone(),
            touched_fields: self.meta.touched.clone(),
            validating_fields: self.meta.validating.clone(),
            is_dirty: self.meta.is_dirty(&self.registry),
            is_valid: self.flags.is_valid,
            is_validating: self.meta.any_validating(),
            is_submitted: self.flags.is_submitted,
            is_submitting: self.flags.is_submitting,
            is_submit_successful: self.flags.is_submit_successful,
            submit_count: self.flags.submit_count,
            disabled: self.registry.form_disabled(),
            has_been_submitted: self.meta.has_been_submitted(),
            is_dirty_since_submit: self.meta.is_dirty_since_submit(),
            is_loading: self.flags.is_loading,
        }
    }

    fn field_state(&self, name: &Path) -> FieldState {
        let error = self.errors.get(name.clone()).cloned();
        FieldState {
            invalid: error.is_some(),
            is_dirty: self.meta.is_field_dirty(name),
            is_touched: self.meta.is_touched(name),
            is_validating: self.meta.is_validating(name),
            error,
        }
    }

    /// Disabled fields never validate; read-only ones do unless the form
    /// skips them.
    fn is_excluded(&self, name: &Path) -> bool {
        if self.registry.is_disabled(name) {
            return true;
        }
        self.options.skip_read_only_validation
            && self.registry.get(name).is_some_and(|f| f.is_read_only())
    }

    fn should_skip(&self, name: &Path, is_blur_event: bool) -> bool {
        should_skip_validation(
            is_blur_event,
            self.meta.is_touched(name),
            self.flags.is_submitted,
            self.options.re_validate_mode,
            self.options.mode,
        )
    }

    fn prepare_run(&mut self, scope: Scope) -> ValidationRun {
        let rule_mode = self.options.resolver.is_none();
        let fields: Vec<RunField> = self
            .registry
            .names()
            .into_iter()
            .filter_map(|name| {
                let field = self.registry.get(&name)?;
                let cached_valid = match get_at_path(self.registry.values(), &name) {
                    _ if !rule_mode => None,
                    Some(value) => self.rule_cache.verdict(&name, value, field.revision),
                    None => self.rule_cache.verdict(&name, &Value::Null, field.revision),
                };
                Some(RunField {
                    rules: field.rules.clone(),
                    disabled: self.registry.is_disabled(&name),
                    mounted: field.mounted,
                    excluded: self.is_excluded(&name),
                    revision: field.revision,
                    cached_valid,
                    name,
                })
            })
            .collect();
        let targets = match &scope {
            Scope::Fields(names) if self.options.resolver.is_some() => names.clone(),
            Scope::Fields(names) => self.registry.expand(names),
            Scope::All => fields.iter().map(|f| f.name.clone()).collect(),
            Scope::ValidityOnly => Vec::new(),
        };
        let targets = targets
            .into_iter()
            .map(|name| {
                let generation = self.generations.begin(&name);
                self.meta.set_validating(&name, true);
                (name, generation)
            })
            .collect();
        ValidationRun {
            scope,
            targets,
            validity_generation: self.generations.begin_validity(),
            values: self.registry.values().clone(),
            context: self.options.context.clone(),
            resolver: self.options.resolver.clone(),
            fields,
            criteria_mode: self.options.criteria_mode,
            should_use_native_validation: self.options.should_use_native_validation,
        }
    }

    /// Element to focus for `name`: the primary element, else the first
    /// option of a group.
    fn element_of(&self, name: &Path) -> Option<ElementRef> {
        let field = self.registry.get(name)?;
        field.element.clone().or_else(|| field.options.first().cloned())
    }

    /// First errored field (registration order) that has an element.
    fn first_error_element(&self) -> Option<ElementRef> {
        self.registry
            .names()
            .into_iter()
            .filter(|name| self.errors.get(name.clone()).is_some())
            .find_map(|name| self.element_of(&name))
    }

    fn forget_field(&mut self, name: &Path, options: &UnregisterOptions) {
        self.registry.remove(name);
        self.rows.remove(name);
        self.rule_cache.forget(name);
        if !options.keep_value {
            self.registry.unset_value(name);
        }
        if !options.keep_default_value {
            let mut defaults = self.registry.defaults().clone();
            unset_at_path(&mut defaults, name);
            self.registry.set_defaults(defaults);
        }
        if !options.keep_error {
            self.errors.clear(name);
        }
        self.meta
            .forget(name, options.keep_dirty, options.keep_touched);
        if !options.keep_is_valid {
            self.scheduler.queue_validity();
        }
    }

    fn reset(&mut self, values: Option<Value>, options: &ResetOptions) {
        let next = values
            .clone()
            .unwrap_or_else(|| self.registry.defaults().clone());
        if let Some(values) = values {
            if !options.keep_default_values {
                self.registry.set_defaults(values);
            }
        }
        if !options.keep_values {
            if options.keep_dirty_values {
                let mut merged = next;
                for path in marked_paths(&self.meta.dirty) {
                    if let Some(current) = self.registry.live_at(&path) {
                        set_at_path(&mut merged, &path, current.clone());
                    }
                }
                self.registry.replace_values(merged);
            } else {
                self.registry.replace_values(next);
            }
        }
        self.rows.regenerate_all(self.registry.values());

        if !options.keep_errors {
            self.errors.clear_all();
        }
        self.meta.reset(
            options.keep_dirty || options.keep_dirty_values,
            options.keep_touched,
        );
        if options.keep_dirty_values {
            self.meta.recompute_dirty(&self.registry);
        }

        if !options.keep_is_submitted {
            self.flags.is_submitted = false;
        }
        if !options.keep_submit_count {
            self.flags.submit_count = 0;
        }
        if !options.keep_is_submit_successful {
            self.flags.is_submit_successful = false;
        }
        self.flags.is_submitting = false;
        self.generations.invalidate_all();
        if !options.keep_is_valid {
            self.scheduler.queue_validity();
        }
    }
}

#[derive(Clone, Default)]
struct Channels {
    state: Subject<StateUpdate>,
    values: Subject<ValuesEvent>,
    array: Subject<ArrayEvent>,
}

/// Handle to one form. Clones share the same state.
///
/// # Example
///
/// ```
/// use formstate::{Form, FormOptions, RegisterOptions, SetValueOptions, ValidationRules};
/// use serde_json::json;
///
/// let form = Form::new(FormOptions::new().with_default_values(json!({"name": ""})));
/// form.register("name", RegisterOptions::new(ValidationRules::new().required("Name is required")));
/// form.set_value("name", json!("Ada"), SetValueOptions::default().dirty());
///
/// let state = form.form_state();
/// assert!(state.is_dirty);
/// assert_eq!(state.dirty_fields, json!({"name": true}));
/// ```
#[derive(Clone)]
pub struct Form {
    core: Arc<Mutex<FormCore>>,
    channels: Channels,
}

impl std::fmt::Debug for Form {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let core = self.lock();
        f.debug_struct("Form")
            .field("options", &core.options)
            .field("fields", &core.registry.names().len())
            .field("errors", &core.errors.len())
            .finish()
    }
}

impl Default for Form {
    fn default() -> Self {
        Self::new(FormOptions::default())
    }
}

impl Form {
    /// Create a form.
    pub fn new(options: FormOptions) -> Self {
        Self {
            core: Arc::new(Mutex::new(FormCore::new(options))),
            channels: Channels::default(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FormCore> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify_state(&self, name: Option<Path>) {
        if self.channels.state.observer_count() == 0 {
            return;
        }
        let state = Arc::new(self.lock().snapshot());
        self.channels.state.notify(&StateUpdate { name, state });
    }

    fn notify_values(&self, name: Option<Path>, changed_rows: Option<Vec<usize>>) {
        if self.channels.values.observer_count() == 0 {
            return;
        }
        let values = Arc::new(self.lock().registry.values().clone());
        self.channels.values.notify(&ValuesEvent {
            name,
            changed_rows,
            values,
        });
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Unmount the form: discard pending work, supersede in-flight
    /// validations and unsubscribe every observer.
    pub fn close(&self) {
        {
            let mut core = self.lock();
            core.scheduler.close();
            core.generations.invalidate_all();
        }
        self.channels.state.unsubscribe_all();
        self.channels.values.unsubscribe_all();
        self.channels.array.unsubscribe_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().scheduler.is_closed()
    }

    /// Observers currently attached to any channel of this form.
    pub fn observer_count(&self) -> usize {
        self.channels.state.observer_count()
            + self.channels.values.observer_count()
            + self.channels.array.observer_count()
    }

    /// Run everything queued since the last flush: one validation pass
    /// (one resolver call) for the whole batch.
    pub async fn flush(&self) {
        let batch = {
            let mut core = self.lock();
            if core.scheduler.is_closed() {
                debug!("flush on a closed form ignored");
                return;
            }
            core.scheduler.take()
        };
        let Some(batch) = batch else {
            return;
        };
        let scope = if batch.names.is_empty() {
            Scope::ValidityOnly
        } else {
            Scope::Fields(batch.names)
        };
        self.validate(scope).await;
    }

    /// True when a flush would do work.
    pub fn has_pending(&self) -> bool {
        self.lock().scheduler.has_pending()
    }

    // ------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------

    /// Register (or update) a field. Seeds its value from `options.value`
    /// or the defaults when absent and queues a validity refresh.
    pub fn register(&self, name: impl Into<Path>, options: impl Into<RegisterOptions>) -> bool {
        let name = name.into();
        let created = {
            let mut core = self.lock();
            let created = core.registry.register(&name, options.into());
            core.scheduler.queue_validity();
            created
        };
        if created {
            self.notify_values(Some(name.clone()), None);
            self.notify_state(Some(name));
        }
        created
    }

    /// Attach an element (or mark a headless field mounted).
    pub fn mount(&self, name: impl Into<Path>, element: Option<ElementRef>) -> bool {
        let name = name.into();
        let mut core = self.lock();
        let mounted = match element {
            Some(element) => core.registry.attach_element(&name, element),
            None => core.registry.mark_mounted(&name),
        };
        if !mounted {
            debug!(name = %name, "mount of an unregistered field ignored");
        }
        mounted
    }

    /// Detach a field's element. With `should_unregister`, the field is
    /// removed and its last live value moves to the unmounted cache.
    pub fn unmount(&self, name: impl Into<Path>) -> bool {
        let name = name.into();
        let removed = {
            let mut core = self.lock();
            if !core.registry.detach(&name) {
                debug!(name = %name, "unmount of an unregistered field ignored");
                return false;
            }
            if !core.options.should_unregister {
                return true;
            }
            core.registry.capture_unmounted(&name);
            core.registry.remove(&name);
            core.rows.remove(&name);
            core.meta.forget(&name, false, false);
            core.scheduler.queue_validity();
            true
        };
        self.notify_values(Some(name.clone()), None);
        self.notify_state(Some(name));
        removed
    }

    /// Remove fields. Errors are kept unless `keep_error` is turned off.
    pub fn unregister<I, P>(&self, names: I, options: UnregisterOptions)
    where
        I: IntoIterator<Item = P>,
        P: Into<Path>,
    {
        let names: Vec<Path> = names.into_iter().map(Into::into).collect();
        {
            let mut core = self.lock();
            for name in &names {
                core.forget_field(name, &options);
            }
        }
        for name in names {
            self.notify_values(Some(name.clone()), None);
            self.notify_state(Some(name));
        }
    }

    /// Remove every field.
    pub fn unregister_all(&self, options: UnregisterOptions) {
        let names = self.lock().registry.names();
        self.unregister(names, options);
    }

    /// Register (or update) a field array and return its handle.
    pub fn field_array(&self, name: impl Into<Path>, rules: ValidationRules) -> FieldArray {
        let name = name.into();
        self.register_array(&name, rules);
        FieldArray::new(self.clone(), name)
    }

    pub(crate) fn register_array(&self, name: &Path, rules: ValidationRules) {
        let created = {
            let mut core = self.lock();
            let core = &mut *core;
            let created = core.registry.register_array(name, rules);
            let len = core
                .registry
                .live_at(name)
                .and_then(Value::as_array)
                .map_or(0, Vec::len);
            core.rows.sync(name, len);
            core.scheduler.queue_validity();
            created
        };
        if created {
            self.notify_state(Some(name.clone()));
        }
    }

    pub(crate) fn array_rows(&self, name: &Path) -> Vec<ArrayRow> {
        let mut core = self.lock();
        let core = &mut *core;
        core.rows.rows(name, core.registry.values())
    }

    pub(crate) fn array_channel(&self) -> &Subject<ArrayEvent> {
        &self.channels.array
    }

    pub(crate) fn apply_array_op(&self, name: &Path, op: ArrayOp) -> FormResult<()> {
        let change = {
            let mut core = self.lock();
            let change = field_array::apply(&mut core, name, op)?;
            if !core.should_skip(name, false) {
                core.scheduler.queue_validation(name.clone());
            } else {
                core.scheduler.queue_validity();
            }
            change
        };
        self.notify_values(Some(name.clone()), Some(change.changed_rows));
        self.channels.array.notify(&ArrayEvent {
            name: name.clone(),
            rows: change.rows,
        });
        self.notify_state(Some(name.clone()));
        Ok(())
    }

    // ------------------------------------------------------------------
    // Values
    // ------------------------------------------------------------------

    /// Write a value. Notifies synchronously; validation (when requested)
    /// is queued for the next flush. Unknown paths are ignored.
    pub fn set_value(&self, name: impl Into<Path>, value: Value, options: SetValueOptions) -> bool {
        let name = name.into();
        {
            let mut core = self.lock();
            let core = &mut *core;
            if !core.registry.accepts(&name) {
                debug!(name = %name, "set_value on an unregistered path ignored");
                return false;
            }
            if !core.registry.set_value(&name, value) {
                debug!(name = %name, "set_value index out of reach ignored");
                return false;
            }
            core.rows.on_write(&name, core.registry.values());
            if options.should_dirty {
                core.meta.update_dirty(&name, &core.registry);
            }
            if options.should_touch {
                core.meta.touch(&name);
            }
            core.meta.note_value_change();
            if options.should_validate {
                core.scheduler.queue_validation(name.clone());
            }
        }
        self.notify_values(Some(name.clone()), None);
        self.notify_state(Some(name));
        true
    }

    /// Whole value tree.
    pub fn get_values(&self) -> Value {
        self.lock().registry.values().clone()
    }

    /// Value at `name`: live, else last unmounted value, else default.
    pub fn get_value(&self, name: impl Into<Path>) -> Option<Value> {
        self.lock().registry.get_value(&name.into())
    }

    /// Change event from the host. Recomputes dirtiness and validates when
    /// the trigger policy says so.
    pub async fn handle_change(&self, name: impl Into<Path>, value: Value) -> bool {
        let name = name.into();
        let validate = {
            let mut core = self.lock();
            let core = &mut *core;
            if !core.registry.accepts(&name) {
                debug!(name = %name, "change on an unregistered path ignored");
                return false;
            }
            if !core.registry.set_value(&name, value) {
                debug!(name = %name, "change index out of reach ignored");
                return false;
            }
            core.rows.on_write(&name, core.registry.values());
            core.meta.update_dirty(&name, &core.registry);
            core.meta.note_value_change();
            let validate = !core.should_skip(&name, false);
            if !validate {
                core.scheduler.queue_validity();
            }
            validate
        };
        self.notify_values(Some(name.clone()), None);
        self.notify_state(Some(name.clone()));
        if validate {
            self.validate(Scope::Fields(vec![name])).await;
        }
        true
    }

    /// Blur event from the host. Marks the field touched and validates when
    /// the trigger policy says so.
    pub async fn handle_blur(&self, name: impl Into<Path>) -> bool {
        let name = name.into();
        let validate = {
            let mut core = self.lock();
            if !core.registry.contains(&name) {
                debug!(name = %name, "blur on an unregistered field ignored");
                return false;
            }
            core.meta.touch(&name);
            !core.should_skip(&name, true)
        };
        self.notify_state(Some(name.clone()));
        if validate {
            self.validate(Scope::Fields(vec![name])).await;
        }
        true
    }

    // ------------------------------------------------------------------
    // Validation
    // ------------------------------------------------------------------

    async fn validate(&self, scope: Scope) -> Applied {
        let run = self.lock().prepare_run(scope);
        let single = match run.targets.as_slice() {
            [(name, _)] => Some(name.clone()),
            _ => None,
        };
        if !run.targets.is_empty() {
            self.notify_state(single.clone());
        }
        let outcome = run.execute().await;
        let applied = {
            let mut core = self.lock();
            let core = &mut *core;
            let applied = apply_outcome(
                &run,
                outcome,
                &core.generations,
                &mut core.errors,
                &mut core.meta,
                &mut core.rule_cache,
            );
            if let Some(valid) = applied.valid {
                core.flags.is_valid = valid;
            }
            if applied.validity_pending {
                core.scheduler.queue_validity();
            }
            applied
        };
        self.notify_state(single);
        applied
    }

    /// Validate the given fields regardless of mode; an empty list
    /// validates every registered field. Returns true when none of them
    /// has an error.
    pub async fn trigger<I, P>(&self, names: I) -> bool
    where
        I: IntoIterator<Item = P>,
        P: Into<Path>,
    {
        let names: Vec<Path> = names.into_iter().map(Into::into).collect();
        let scope = if names.is_empty() {
            Scope::All
        } else {
            Scope::Fields(names)
        };
        self.validate(scope).await.targets_valid
    }

    /// Validate one field.
    pub async fn trigger_field(&self, name: impl Into<Path>) -> bool {
        self.validate(Scope::Fields(vec![name.into()])).await.targets_valid
    }

    /// Validate every registered field.
    pub async fn trigger_all(&self) -> bool {
        self.validate(Scope::All).await.targets_valid
    }

    /// Set an error manually. It stays until the path is revalidated or
    /// cleared.
    pub fn set_error(&self, name: impl Into<Path>, error: FieldError, should_focus: bool) {
        let name = name.into();
        let element = {
            let mut core = self.lock();
            core.errors.set(name.clone(), error);
            core.flags.is_valid = false;
            if should_focus {
                core.element_of(&name)
            } else {
                None
            }
        };
        if let Some(element) = element {
            focus_element(element.as_ref(), false);
        }
        self.notify_state(Some(name));
    }

    /// Clear errors at the given paths (and below); an empty list clears
    /// every error.
    pub fn clear_errors<I, P>(&self, names: I)
    where
        I: IntoIterator<Item = P>,
        P: Into<Path>,
    {
        let names: Vec<Path> = names.into_iter().map(Into::into).collect();
        {
            let mut core = self.lock();
            if names.is_empty() {
                core.errors.clear_all();
            }
            for name in &names {
                core.errors.clear(name);
            }
        }
        match names.as_slice() {
            [name] => self.notify_state(Some(name.clone())),
            _ => self.notify_state(None),
        }
    }

    /// Focus a field's element through its capabilities.
    pub fn set_focus(&self, name: impl Into<Path>, select: bool) -> bool {
        let element = self.lock().element_of(&name.into());
        element.is_some_and(|e| focus_element(e.as_ref(), select))
    }

    // ------------------------------------------------------------------
    // State
    // ------------------------------------------------------------------

    /// Current form state.
    pub fn form_state(&self) -> FormStateSnapshot {
        self.lock().snapshot()
    }

    /// State of one field.
    pub fn get_field_state(&self, name: impl Into<Path>) -> FieldState {
        self.lock().field_state(&name.into())
    }

    /// Current errors.
    pub fn errors(&self) -> FieldErrors {
        self.lock().errors.clone()
    }

    /// Observe form state. Updates the selector does not match, and updates
    /// that leave the state unchanged, are not delivered.
    pub fn subscribe_state(
        &self,
        selector: StateSelector,
        callback: impl Fn(&FormStateSnapshot) + Send + Sync + 'static,
    ) -> Subscription {
        let last: Mutex<Option<Arc<FormStateSnapshot>>> = Mutex::new(None);
        self.channels.state.subscribe(move |update: &StateUpdate| {
            if !selector.matches(update.name.as_ref()) {
                return;
            }
            {
                let mut last = last.lock().unwrap_or_else(PoisonError::into_inner);
                if last.as_deref() == Some(update.state.as_ref()) {
                    return;
                }
                *last = Some(Arc::clone(&update.state));
            }
            callback(&update.state);
        })
    }

    /// Start a watch over `target`.
    pub fn watch(&self, target: impl Into<WatchTarget>) -> WatchBuilder {
        let form = self.clone();
        WatchBuilder::new(self.channels.values.clone(), move || form.get_values(), target.into())
    }

    /// Read the watched slice now, with default fallback for missing paths.
    pub fn watch_value(&self, target: impl Into<WatchTarget>) -> Value {
        let target: WatchTarget = target.into();
        let core = self.lock();
        target.read_with(core.registry.values(), |p| core.registry.get_value(p))
    }

    /// Toggle the form-level disabled flag. Paths disabled through
    /// [`FormOptions::disabled`] stay disabled.
    pub fn set_disabled(&self, disabled: bool) {
        {
            let mut core = self.lock();
            core.registry.set_form_disabled(disabled);
            core.scheduler.queue_validity();
        }
        self.notify_state(None);
    }

    // ------------------------------------------------------------------
    // Reset
    // ------------------------------------------------------------------

    /// Reset values and state. `has_been_submitted` always survives.
    pub fn reset(&self, values: Option<Value>, options: ResetOptions) {
        self.lock().reset(values, &options);
        self.notify_values(None, None);
        self.notify_state(None);
    }

    /// Reset one field to its default.
    pub fn reset_field(&self, name: impl Into<Path>, options: ResetFieldOptions) -> bool {
        let name = name.into();
        {
            let mut core = self.lock();
            let core = &mut *core;
            if !core.registry.contains(&name) {
                debug!(name = %name, "reset_field on an unregistered field ignored");
                return false;
            }
            if let Some(default) = options.default_value {
                core.registry.set_default_at(&name, default);
            }
            match core.registry.default_at(&name).cloned() {
                Some(default) => {
                    core.registry.set_value(&name, default);
                }
                None => {
                    core.registry.unset_value(&name);
                }
            }
            core.rows.on_write(&name, core.registry.values());
            if options.keep_dirty {
                core.meta.update_dirty(&name, &core.registry);
            } else {
                clear_mark(&mut core.meta.dirty, &name);
            }
            if !options.keep_touched {
                clear_mark(&mut core.meta.touched, &name);
            }
            if !options.keep_error {
                core.errors.clear(&name);
            }
            core.scheduler.queue_validity();
        }
        self.notify_values(Some(name.clone()), None);
        self.notify_state(Some(name));
        true
    }

    /// Resolve values from an async source. `is_loading` is set while
    /// pending; on success the result becomes the defaults and live values,
    /// except for fields already dirtied, which keep their values.
    pub async fn load_values<F, E>(&self, loader: F) -> FormResult<()>
    where
        F: Future<Output = Result<Value, E>>,
        E: Display,
    {
        self.lock().flags.is_loading = true;
        self.notify_state(None);
        let result = loader.await;
        let outcome = {
            let mut core = self.lock();
            core.flags.is_loading = false;
            match result {
                Ok(values) => {
                    let options = ResetOptions {
                        keep_dirty_values: true,
                        keep_errors: true,
                        keep_touched: true,
                        keep_is_submitted: true,
                        keep_submit_count: true,
                        keep_is_submit_successful: true,
                        ..ResetOptions::default()
                    };
                    core.reset(Some(values), &options);
                    Ok(())
                }
                Err(e) => {
                    warn!(error = %e, "values loader failed");
                    Err(FormError::loader(e.to_string()))
                }
            }
        };
        if outcome.is_ok() {
            self.notify_values(None, None);
        }
        self.notify_state(None);
        outcome
    }

    // ------------------------------------------------------------------
    // Submit
    // ------------------------------------------------------------------

    /// Validate everything and produce the submit data.
    ///
    /// Clears `root.*` errors first. On success the data excludes disabled
    /// fields (resolver-transformed values in resolver mode); on failure the
    /// first errored field is focused when `should_focus_error` is set.
    pub async fn submit(&self) -> Result<Value, FieldErrors> {
        {
            let mut core = self.lock();
            core.flags.is_submitting = true;
            core.errors.clear(&Path::root().key("root"));
        }
        self.notify_state(None);

        let applied = self.validate(Scope::All).await;

        let (result, focus) = {
            let mut core = self.lock();
            let core = &mut *core;
            let valid = core.errors.is_empty();
            let result = if valid {
                let mut data = match applied.output_values {
                    Some(values) if core.options.resolver.is_some() => values,
                    _ => core.registry.values().clone(),
                };
                for field in core.registry.descriptors() {
                    if core.registry.is_disabled(&field.name) {
                        unset_at_path(&mut data, &field.name);
                    }
                }
                Ok(data)
            } else {
                Err(core.errors.clone())
            };
            core.flags.is_submitted = true;
            core.flags.is_submitting = false;
            core.flags.submit_count += 1;
            core.flags.is_submit_successful = valid;
            core.meta.note_submit_completed();
            let focus = if !valid && core.options.should_focus_error {
                core.first_error_element()
            } else {
                None
            };
            (result, focus)
        };
        if let Some(element) = focus {
            focus_element(element.as_ref(), false);
        }
        self.notify_state(None);
        result
    }

    /// Submit and hand the data to `on_valid` when validation passes.
    /// Returns whether `on_valid` ran.
    pub async fn handle_submit<F, Fut>(&self, on_valid: F) -> bool
    where
        F: FnOnce(Value) -> Fut,
        Fut: Future<Output = ()>,
    {
        match self.submit().await {
            Ok(data) => {
                on_valid(data).await;
                true
            }
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn form(defaults: Value) -> Form {
        Form::new(FormOptions::new().with_default_values(defaults))
    }

    #[test]
    fn test_set_value_unknown_path_is_noop() {
        let form = form(json!({"a": 1}));
        assert!(!form.set_value("a", json!(2), SetValueOptions::default()));
        assert_eq!(form.get_values(), json!({"a": 1}));
    }

    #[test]
    fn test_set_value_without_dirty_keeps_marks() {
        let form = form(json!({"a": "x"}));
        form.register("a", RegisterOptions::default());
        form.set_value("a", json!("y"), SetValueOptions::default().dirty());
        assert_eq!(form.form_state().dirty_fields, json!({"a": true}));

        // back to default without should_dirty: the mark stays
        form.set_value("a", json!("x"), SetValueOptions::default());
        assert_eq!(form.form_state().dirty_fields, json!({"a": true}));
        assert!(form.form_state().is_dirty);

        form.set_value("a", json!("x"), SetValueOptions::default().dirty());
        assert_eq!(form.form_state().dirty_fields, json!({}));
        assert!(!form.form_state().is_dirty);
    }

    #[test]
    fn test_register_queues_validity_and_close_discards() {
        let form = form(json!({}));
        form.register("a", RegisterOptions::default());
        assert!(form.has_pending());
        form.close();
        assert!(!form.has_pending());
        assert!(form.is_closed());
    }

    #[test]
    fn test_unregister_keeps_errors_by_default() {
        let form = form(json!({"a": 1}));
        form.register("a", RegisterOptions::default());
        form.set_error("a", FieldError::new("manual", "bad"), false);
        form.unregister(["a"], UnregisterOptions::default());
        assert!(form.errors().get("a").is_some());
        assert_eq!(form.get_values(), json!({}));

        form.register("b", RegisterOptions::default());
        form.set_error("b", FieldError::new("manual", "bad"), false);
        form.unregister(
            ["b"],
            UnregisterOptions {
                keep_error: false,
                ..UnregisterOptions::default()
            },
        );
        assert!(form.errors().get("b").is_none());
    }

    #[test]
    fn test_unmount_with_should_unregister_caches_last_value() {
        let form = Form::new(
            FormOptions::new()
                .with_default_values(json!({"a": "default"}))
                .with_should_unregister(true),
        );
        form.register("a", RegisterOptions::default());
        form.mount("a", None);
        form.set_value("a", json!("typed"), SetValueOptions::default());
        assert!(form.unmount("a"));
        assert_eq!(form.get_values(), json!({}));
        assert_eq!(form.get_value("a"), Some(json!("typed")));
    }

    #[test]
    fn test_field_state() {
        let form = form(json!({"a": ""}));
        form.register("a", RegisterOptions::default());
        form.set_value("a", json!("x"), SetValueOptions::default().dirty().touch());
        form.set_error("a", FieldError::new("manual", "no"), false);
        let state = form.get_field_state("a");
        assert!(state.invalid && state.is_dirty && state.is_touched);
        assert!(!state.is_validating);
        assert_eq!(state.error.unwrap().message, "no");
    }
}
