//! Global FIFO of Ready steps.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadyEntry {
    pub run_id: Uuid,
    pub step_id: Uuid,
}

/// Entries may go stale (the step was skipped or already handed out); the
/// dispatcher re-checks each one inside the run's transition.
#[derive(Debug, Default)]
pub struct ReadyQueue {
    entries: Mutex<VecDeque<ReadyEntry>>,
}

impl ReadyQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_many(&self, run_id: Uuid, steps: impl IntoIterator<Item = Uuid>) {
        let mut entries = self.lock();
        entries.extend(steps.into_iter().map(|step_id| ReadyEntry { run_id, step_id }));
    }

    /// Put an entry back at the head, ahead of everything queued since.
    pub fn push_front(&self, entry: ReadyEntry) {
        self.lock().push_front(entry);
    }

    pub fn pop(&self) -> Option<ReadyEntry> {
        self.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<ReadyEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
