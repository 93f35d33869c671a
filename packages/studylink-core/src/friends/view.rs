//! Optimistic local state.
//!
//! A value shown to the user before the store has confirmed it. The
//! last confirmed value is kept so a failed write can be rolled back.

/// A committed value plus at most one unconfirmed change.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Optimistic<T> {
    committed: T,
    pending: Option<T>,
}

impl<T: Clone> Optimistic<T> {
    /// Start from a confirmed value
    pub fn new(committed: T) -> Self {
        Self {
            committed,
            pending: None,
        }
    }

    /// What the user should see: the pending value if any.
    pub fn current(&self) -> &T {
        self.pending.as_ref().unwrap_or(&self.committed)
    }

    /// Last confirmed value
    pub fn committed(&self) -> &T {
        &self.committed
    }

    /// True while a change awaits confirmation
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Stage a change built from the current value.
    ///
    /// Returns false, staging nothing, if another change is in flight.
    pub fn begin<F>(&mut self, change: F) -> bool
    where
        F: FnOnce(&mut T),
    {
        if self.pending.is_some() {
            return false;
        }
        let mut next = self.committed.clone();
        change(&mut next);
        self.pending = Some(next);
        true
    }

    /// The store confirmed the change.
    pub fn commit(&mut self) {
        if let Some(next) = self.pending.take() {
            self.committed = next;
        }
    }

    /// The store rejected the change.
    pub fn rollback(&mut self) {
        self.pending = None;
    }

    /// Replace everything with a fresh value read from the store.
    pub fn reset(&mut self, committed: T) {
        self.committed = committed;
        self.pending = None;
    }
}
