//! Update scheduler.
//!
//! Synchronous mutations (registrations, `set_value` with validation) only
//! queue work here. The host drives `Form::flush` at its own tick boundary;
//! one flush runs one validation pass (one resolver call) for everything
//! queued since the previous flush.

use crate::Path;
use tracing::trace;

/// Work taken out of the scheduler by one flush.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct Batch {
    /// Paths whose errors must be recomputed, in queue order.
    pub names: Vec<Path>,
    /// Whole-form validity must be recomputed.
    pub validity: bool,
}

impl Batch {
    pub fn is_empty(&self) -> bool {
        self.names.is_empty() && !self.validity
    }
}

#[derive(Debug, Default)]
pub(crate) struct UpdateScheduler {
    pending: Batch,
    closed: bool,
}

impl UpdateScheduler {
    /// Queue validation of `name`. Returns false once closed.
    pub fn queue_validation(&mut self, name: Path) -> bool {
        if self.closed {
            return false;
        }
        if !self.pending.names.contains(&name) {
            trace!(name = %name, "queue validation");
            self.pending.names.push(name);
        }
        self.pending.validity = true;
        true
    }

    /// Queue a validity refresh. Returns false once closed.
    pub fn queue_validity(&mut self) -> bool {
        if self.closed {
            return false;
        }
        self.pending.validity = true;
        true
    }

    /// Take everything queued so far.
    pub fn take(&mut self) -> Option<Batch> {
        if self.closed || self.pending.is_empty() {
            return None;
        }
        let batch = std::mem::take(&mut self.pending);
        trace!(names = batch.names.len(), validity = batch.validity, "flush batch");
        Some(batch)
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Discard pending work and refuse new work.
    pub fn close(&mut self) {
        if self.pending.is_empty() {
            trace!("scheduler closed");
        } else {
            trace!(names = self.pending.names.len(), "scheduler closed, pending batch discarded");
        }
        self.pending = Batch::default();
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}
