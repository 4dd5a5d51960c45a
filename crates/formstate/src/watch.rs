//! Path-scoped value subscriptions.
//!
//! Every value-tree mutation publishes one [`ValuesEvent`] naming the path
//! it touched. A watcher decides relevance from its target paths and only
//! then reads its slice of the values. With a `compute` transform attached,
//! the last computed output is cached and the callback fires only when the
//! output changes.

use crate::access::get_at_path;
use crate::{Path, Subject, Subscription};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Payload of the values channel.
#[derive(Clone, Debug)]
pub struct ValuesEvent {
    /// Path written; `None` when the whole tree was replaced.
    pub name: Option<Path>,
    /// For structural array operations on `name`: the row indices whose
    /// content changed and that still exist.
    pub changed_rows: Option<Vec<usize>>,
    /// Value tree after the mutation.
    pub values: Arc<Value>,
}

/// Which values a watcher observes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WatchTarget {
    /// The whole value tree.
    All,
    /// A single path; the watcher receives its value.
    One(Path),
    /// Several paths; the watcher receives an array aligned to input order.
    Many(Vec<Path>),
}

impl WatchTarget {
    /// Watch several paths.
    pub fn many<I, P>(names: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Path>,
    {
        WatchTarget::Many(names.into_iter().map(Into::into).collect())
    }

    /// Read the watched slice of `values`. Missing paths read as `null`.
    pub fn read(&self, values: &Value) -> Value {
        self.read_with(values, |p| get_at_path(values, p).cloned())
    }

    pub(crate) fn read_with(&self, values: &Value, get: impl Fn(&Path) -> Option<Value>) -> Value {
        match self {
            WatchTarget::All => values.clone(),
            WatchTarget::One(p) => get(p).unwrap_or(Value::Null),
            WatchTarget::Many(paths) => Value::Array(
                paths
                    .iter()
                    .map(|p| get(p).unwrap_or(Value::Null))
                    .collect(),
            ),
        }
    }

    /// True when `event` may change the watched slice.
    pub fn is_relevant(&self, event: &ValuesEvent, exact: bool) -> bool {
        let Some(changed) = &event.name else {
            return true;
        };
        let rows = event.changed_rows.as_deref();
        match self {
            WatchTarget::All => true,
            WatchTarget::One(p) => path_relevant(p, changed, rows, exact),
            WatchTarget::Many(paths) => paths.iter().any(|p| path_relevant(p, changed, rows, exact)),
        }
    }
}

impl From<&str> for WatchTarget {
    fn from(name: &str) -> Self {
        WatchTarget::One(name.into())
    }
}

impl From<Path> for WatchTarget {
    fn from(name: Path) -> Self {
        WatchTarget::One(name)
    }
}

impl From<Vec<&str>> for WatchTarget {
    fn from(names: Vec<&str>) -> Self {
        WatchTarget::many(names)
    }
}

fn path_relevant(watched: &Path, changed: &Path, rows: Option<&[usize]>, exact: bool) -> bool {
    if let Some(rows) = rows {
        if changed.is_ancestor_of(watched) {
            return watched[changed.len()]
                .as_index()
                .is_some_and(|row| rows.contains(&row));
        }
    }
    if exact {
        watched == changed
    } else {
        watched.is_related(changed)
    }
}

/// Transform applied to the watched slice before delivery.
pub type ComputeFn = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

struct WatchState {
    target: WatchTarget,
    exact: bool,
    compute: Option<ComputeFn>,
    disabled: AtomicBool,
    last: Mutex<Option<Value>>,
}

impl WatchState {
    fn output(&self, values: &Value) -> Value {
        let raw = self.target.read(values);
        match &self.compute {
            Some(compute) => compute(&raw),
            None => raw,
        }
    }

    /// Returns the value to deliver, if any.
    fn on_event(&self, event: &ValuesEvent) -> Option<Value> {
        if self.disabled.load(Ordering::Acquire) || !self.target.is_relevant(event, self.exact) {
            return None;
        }
        let output = self.output(&event.values);
        if self.compute.is_none() {
            return Some(output);
        }
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        if last.as_ref() == Some(&output) {
            return None;
        }
        *last = Some(output.clone());
        Some(output)
    }
}

/// Builder returned by `Form::watch`.
#[must_use = "a watch does nothing until subscribed or read"]
pub struct WatchBuilder {
    channel: Subject<ValuesEvent>,
    values: Box<dyn Fn() -> Value + Send + Sync>,
    target: WatchTarget,
    exact: bool,
    compute: Option<ComputeFn>,
}

impl WatchBuilder {
    pub(crate) fn new(
        channel: Subject<ValuesEvent>,
        values: impl Fn() -> Value + Send + Sync + 'static,
        target: WatchTarget,
    ) -> Self {
        Self {
            channel,
            values: Box::new(values),
            target,
            exact: false,
            compute: None,
        }
    }

    /// Only notify for writes to exactly the watched paths.
    pub fn exact(mut self) -> Self {
        self.exact = true;
        self
    }

    /// Derive the delivered value; delivery happens only when it changes.
    pub fn compute(mut self, f: impl Fn(&Value) -> Value + Send + Sync + 'static) -> Self {
        self.compute = Some(Arc::new(f));
        self
    }

    /// Current (computed) value of the watched slice, read from the live
    /// value tree at call time.
    pub fn value(&self) -> Value {
        let raw = self.target.read(&(self.values)());
        match &self.compute {
            Some(compute) => compute(&raw),
            None => raw,
        }
    }

    /// Start observing. The returned handle unsubscribes on drop.
    pub fn subscribe(self, callback: impl Fn(&Value) + Send + Sync + 'static) -> WatchHandle {
        let initial = self.compute.as_ref().map(|_| self.value());
        let state = Arc::new(WatchState {
            target: self.target,
            exact: self.exact,
            compute: self.compute,
            disabled: AtomicBool::new(false),
            last: Mutex::new(initial),
        });
        let observer = Arc::clone(&state);
        let subscription = self.channel.subscribe(move |event| {
            if let Some(value) = observer.on_event(event) {
                callback(&value);
            }
        });
        WatchHandle {
            subscription,
            state,
        }
    }
}

/// Live watch subscription.
#[must_use = "dropping the handle unsubscribes the watcher"]
pub struct WatchHandle {
    subscription: Subscription,
    state: Arc<WatchState>,
}

impl WatchHandle {
    /// Suspend or resume delivery without unsubscribing. After resuming,
    /// the next relevant change is always delivered.
    pub fn set_disabled(&self, disabled: bool) {
        let was = self.state.disabled.swap(disabled, Ordering::AcqRel);
        if was && !disabled {
            *self.state.last.lock().unwrap_or_else(PoisonError::into_inner) = None;
        }
    }

    pub fn is_disabled(&self) -> bool {
        self.state.disabled.load(Ordering::Acquire)
    }

    /// Stop observing.
    pub fn unsubscribe(self) {
        self.subscription.unsubscribe();
    }
}

impl std::fmt::Debug for WatchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchHandle")
            .field("target", &self.state.target)
            .field("exact", &self.state.exact)
            .field("disabled", &self.is_disabled())
            .finish()
    }
}
