use crate::import::thumbnails::ThumbnailWorker;
use crate::job::error::PipelineError;
use crate::photos::model::SourceFileRecord;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// How often the collector wakes up to look at the cancel flag while no
/// worker has finished.
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// One unit of work run on the pool: make a thumbnail for a record.
pub trait ThumbnailTask: Send + Sync + 'static {
    fn process(&self, record: &SourceFileRecord) -> Option<PathBuf>;
}

impl ThumbnailTask for ThumbnailWorker {
    fn process(&self, record: &SourceFileRecord) -> Option<PathBuf> {
        self.generate(record)
    }
}

impl<F> ThumbnailTask for F
where
    F: Fn(&SourceFileRecord) -> Option<PathBuf> + Send + Sync + 'static,
{
    fn process(&self, record: &SourceFileRecord) -> Option<PathBuf> {
        self(record)
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PipelineOutcome {
    pub total: usize,
    pub completed: usize,
    pub thumbnails: usize,
    pub cancelled: bool,
}

/// Fixed-size worker pool that thumbnails records concurrently.
///
/// Dropping the pipeline releases the pool; tasks that are still running
/// finish on their own. Call [`Pipeline::wait_idle`] first when their output
/// must be cleaned up.
pub struct Pipeline {
    pool: rayon::ThreadPool,
    threads: usize,
    /// tasks submitted and not yet returned, skipped ones included
    active: Arc<AtomicUsize>,
}

/// Decrements the active count when a task returns, even by unwinding.
struct ActiveGuard(Arc<AtomicUsize>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Pipeline {
    pub fn new(threads: usize) -> Result<Self, PipelineError> {
        let threads = threads.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("photocat-thumb-{}", i))
            .panic_handler(|_| tracing::error!("pipeline: a worker panicked outside its task"))
            .build()
            .map_err(|e| PipelineError::PoolBuild {
                threads,
                message: e.to_string(),
            })?;
        Ok(Pipeline {
            pool,
            threads,
            active: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Block until every submitted task has returned or `limit` has passed.
    /// Returns whether the pool went idle. Tasks skipped after a cancel
    /// return immediately, so this mostly waits for tasks already running.
    pub fn wait_idle(&self, limit: Duration) -> bool {
        let started = Instant::now();
        loop {
            let active = self.active.load(Ordering::SeqCst);
            if active == 0 {
                return true;
            }
            if started.elapsed() >= limit {
                tracing::warn!("pipeline: {} tasks still running after {:?}", active, limit);
                return false;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
    }

    /// Run `task` over every record, at most `threads` at a time.
    ///
    /// Records are submitted in order; completions arrive in any order and
    /// each one sets that record's thumbnail and then calls
    /// `on_progress(completed, total)`. `is_cancelled` is checked between
    /// completions (and at least every 100 ms while waiting). Once it returns
    /// true, tasks that have not started yet are skipped, nothing more is
    /// awaited and the outcome is marked cancelled.
    pub fn run<T, C, P>(
        &self,
        records: &mut [SourceFileRecord],
        task: Arc<T>,
        is_cancelled: C,
        mut on_progress: P,
    ) -> Result<PipelineOutcome, PipelineError>
    where
        T: ThumbnailTask + ?Sized,
        C: Fn() -> bool,
        P: FnMut(usize, usize),
    {
        let total = records.len();
        let mut outcome = PipelineOutcome {
            total,
            ..Default::default()
        };
        if total == 0 {
            return Ok(outcome);
        }

        let (tx, rx) = mpsc::channel::<(usize, Option<PathBuf>)>();
        let abort = Arc::new(AtomicBool::new(false));

        tracing::info!("pipeline: thumbnailing {} files on {} threads", total, self.threads);

        for (index, record) in records.iter().enumerate() {
            let record = record.clone();
            let task = Arc::clone(&task);
            let abort = Arc::clone(&abort);
            let tx = tx.clone();
            self.active.fetch_add(1, Ordering::SeqCst);
            let guard = ActiveGuard(Arc::clone(&self.active));
            self.pool.spawn(move || {
                let _guard = guard;
                if abort.load(Ordering::SeqCst) {
                    return;
                }
                let result = std::panic::catch_unwind(AssertUnwindSafe(|| task.process(&record)))
                    .unwrap_or_else(|_| {
                        tracing::error!("pipeline: worker panicked on {:?}", record.path);
                        None
                    });
                // the collector may already have gone away after a cancel
                let _ = tx.send((index, result));
            });
        }
        drop(tx);

        while outcome.completed < total {
            if is_cancelled() {
                abort.store(true, Ordering::SeqCst);
                outcome.cancelled = true;
                tracing::info!(
                    "pipeline: cancelled after {}/{} files; not waiting for the rest",
                    outcome.completed,
                    total
                );
                return Ok(outcome);
            }

            match rx.recv_timeout(CANCEL_POLL_INTERVAL) {
                Ok((index, thumbnail)) => {
                    if thumbnail.is_some() {
                        outcome.thumbnails += 1;
                    }
                    records[index].thumbnail = thumbnail;
                    outcome.completed += 1;
                    on_progress(outcome.completed, total);
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(PipelineError::Disconnected {
                        completed: outcome.completed,
                        total,
                    })
                }
            }
        }

        tracing::info!(
            "pipeline: {} of {} files thumbnailed",
            outcome.thumbnails,
            total
        );
        Ok(outcome)
    }
}
