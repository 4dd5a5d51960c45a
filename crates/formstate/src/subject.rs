//! Minimal multicast notification channel.
//!
//! A [`Subject`] holds observer callbacks in subscription order. `notify`
//! runs them synchronously without holding the observer lock, so callbacks
//! may re-enter the form (read state, notify again, unsubscribe). Each
//! observer is checked for liveness right before it is invoked: an observer
//! removed earlier in the same pass is skipped, one removed after its turn
//! has already run.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

type Observer<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct SubjectInner<T> {
    next_id: u64,
    observers: Vec<(u64, Observer<T>)>,
}

impl<T> SubjectInner<T> {
    fn remove(&mut self, id: u64) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(oid, _)| *oid != id);
        before != self.observers.len()
    }
}

/// Multicast channel delivering `&T` payloads to subscribed callbacks.
///
/// Cloning a `Subject` creates another handle to the same observer list.
pub struct Subject<T> {
    inner: Arc<Mutex<SubjectInner<T>>>,
}

impl<T> Clone for Subject<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for Subject<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for Subject<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subject")
            .field("observers", &self.observer_count())
            .finish()
    }
}

impl<T> Subject<T> {
    /// Create a subject with no observers.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(SubjectInner {
                next_id: 0,
                observers: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SubjectInner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of currently subscribed observers.
    pub fn observer_count(&self) -> usize {
        self.lock().observers.len()
    }

    /// Invoke every live observer with `payload`, in subscription order.
    pub fn notify(&self, payload: &T) {
        let snapshot: Vec<(u64, Observer<T>)> = self.lock().observers.clone();
        for (id, observer) in snapshot {
            let live = self.lock().observers.iter().any(|(oid, _)| *oid == id);
            if live {
                observer(payload);
            }
        }
    }

    /// Remove every observer.
    pub fn unsubscribe_all(&self) {
        self.lock().observers.clear();
    }
}

impl<T: 'static> Subject<T> {
    /// Subscribe `observer`. The returned guard unsubscribes on drop.
    pub fn subscribe(&self, observer: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        let id = {
            let mut inner = self.lock();
            let id = inner.next_id;
            inner.next_id += 1;
            inner.observers.push((id, Arc::new(observer)));
            id
        };
        let weak: Weak<Mutex<SubjectInner<T>>> = Arc::downgrade(&self.inner);
        Subscription {
            cancel: Some(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .remove(id);
                }
            })),
        }
    }
}

/// RAII guard for a subject observer.
///
/// Dropping the guard (or calling [`unsubscribe`](Self::unsubscribe))
/// removes the observer. If the subject is gone, this is a no-op.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    /// Remove the observer now.
    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }

    /// Keep the observer subscribed for the subject's whole lifetime.
    pub fn detach(mut self) {
        self.cancel = None;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}
