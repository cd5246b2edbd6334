use std::sync::{Mutex, MutexGuard};

/// Lifecycle of a job as seen by observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunPhase {
    Idle,
    Running,
    Cancelled,
    Failed,
    Completed,
}

/// Snapshot of a job's run state. `running` is derived, never stored.
#[derive(Debug, Default, Clone, PartialEq, serde::Serialize)]
pub struct RunStatus {
    pub started: bool,
    pub cancelled: bool,
    pub failed: bool,
    pub completed: bool,
    /// absolute progress, 0..=100
    pub percentage: u32,
    pub message: Option<String>,
}

impl RunStatus {
    pub fn is_running(&self) -> bool {
        !self.completed && !self.cancelled && !self.failed
    }

    /// Completed wins over failed/cancelled: it is the terminal bookkeeping state
    /// reached after cleanup whatever the outcome was.
    pub fn phase(&self) -> RunPhase {
        if self.completed {
            RunPhase::Completed
        } else if self.failed {
            RunPhase::Failed
        } else if self.cancelled {
            RunPhase::Cancelled
        } else if self.started {
            RunPhase::Running
        } else {
            RunPhase::Idle
        }
    }
}

/// Run state shared between the thread driving a job and anyone watching or
/// cancelling it. Every accessor takes the lock, so reads never see a
/// half-applied update.
#[derive(Debug, Default)]
pub struct JobRunState {
    inner: Mutex<RunStatus>,
}

impl JobRunState {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RunStatus> {
        // a poisoned lock still holds a consistent RunStatus; every write is a single assignment
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn snapshot(&self) -> RunStatus {
        self.lock().clone()
    }

    /// Apply several changes under one lock acquisition.
    pub fn update<F: FnOnce(&mut RunStatus)>(&self, f: F) {
        let mut lock = self.lock();
        f(&mut lock);
    }

    /// Back to idle: percentage, flags and message cleared together.
    pub fn reset(&self) {
        *self.lock() = RunStatus::default();
    }

    pub fn start(&self) {
        self.lock().started = true;
    }

    pub fn phase(&self) -> RunPhase {
        self.lock().phase()
    }

    pub fn is_running(&self) -> bool {
        self.lock().is_running()
    }

    pub fn is_cancelled(&self) -> bool {
        self.lock().cancelled
    }

    pub fn cancel(&self) {
        self.lock().cancelled = true;
    }

    pub fn is_failed(&self) -> bool {
        self.lock().failed
    }

    pub fn fail(&self) {
        self.lock().failed = true;
    }

    pub fn is_completed(&self) -> bool {
        self.lock().completed
    }

    pub fn complete(&self) {
        self.lock().completed = true;
    }

    pub fn percentage(&self) -> u32 {
        self.lock().percentage
    }

    /// Progress never goes backwards; a lower value than the current one is ignored.
    pub fn set_percentage(&self, value: u32) {
        let mut lock = self.lock();
        lock.percentage = lock.percentage.max(value.min(100));
    }

    pub fn message(&self) -> Option<String> {
        self.lock().message.clone()
    }

    pub fn set_message(&self, value: impl Into<String>) {
        self.lock().message = Some(value.into());
    }
}
