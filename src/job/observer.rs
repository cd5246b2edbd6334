use crate::job::state::RunStatus;

/// Front-end capability notified by the engine while a job runs.
///
/// `handle_failure` fires at most once per job; `handle_completion` fires
/// exactly once, last, after cleanup.
pub trait ProgressObserver: Send + Sync {
    fn update_progress(&self, status: &RunStatus);
    fn handle_failure(&self, status: &RunStatus);
    fn handle_completion(&self, status: &RunStatus);
}

/// Observer for headless runs: reports everything through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl ProgressObserver for TracingObserver {
    fn update_progress(&self, status: &RunStatus) {
        tracing::info!(
            "progress: {}% {}",
            status.percentage,
            status.message.as_deref().unwrap_or("")
        );
    }

    fn handle_failure(&self, status: &RunStatus) {
        tracing::error!(
            "job failed at {}%: {}",
            status.percentage,
            status.message.as_deref().unwrap_or("unknown error")
        );
    }

    fn handle_completion(&self, status: &RunStatus) {
        tracing::info!("job finished ({:?})", status.phase());
    }
}
