//! In-memory event log used by tests to observe which path an operation took.

use parking_lot::Mutex;

/// Internal milestones worth asserting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ProcessEvent {
    /// `get_session` could not decide locally and called the core.
    CallingServiceInVerify,
}

/// Append-only event history. Records nothing unless enabled.
#[derive(Debug, Default)]
pub struct ProcessState {
    enabled: bool,
    history: Mutex<Vec<ProcessEvent>>,
}

impl ProcessState {
    #[must_use]
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            history: Mutex::new(Vec::new()),
        }
    }

    pub fn add_state(&self, event: ProcessEvent) {
        if self.enabled {
            self.history.lock().push(event);
        }
    }

    /// Whether `event` has been recorded since the last reset.
    #[must_use]
    pub fn has_event(&self, event: ProcessEvent) -> bool {
        self.history.lock().contains(&event)
    }

    #[must_use]
    pub fn count(&self, event: ProcessEvent) -> usize {
        self.history.lock().iter().filter(|e| **e == event).count()
    }

    pub fn reset(&self) {
        self.history.lock().clear();
    }
}
