use crate::catalogue::{self, Catalogue, CatalogueRenderer};
use crate::import::exif::MetadataReader;
use crate::import::frames::FrameExtractor;
use crate::import::pipeline::Pipeline;
use crate::import::scanner;
use crate::import::thumbnails::ThumbnailWorker;
use crate::job::error::{ExportError, JobError, ValidationError};
use crate::job::observer::ProgressObserver;
use crate::job::progress::PhaseTracker;
use crate::job::spec::JobSpec;
use crate::job::state::{JobRunState, RunStatus};
use crate::photos::model::SourceFileRecord;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// check, thumbnails, assemble, write catalogue, render
pub const PHASE_WEIGHTS: [u32; 5] = [5, 45, 5, 5, 40];

pub const MSG_CHECKING: &str = "checking";
pub const MSG_PROCESSING_IMAGES: &str = "processing images";
pub const MSG_ASSEMBLING: &str = "assembling catalogue";
pub const MSG_WRITING: &str = "writing catalogue";
pub const MSG_RENDERING: &str = "rendering";
pub const MSG_CLEANUP: &str = "cleaning up";
pub const MSG_FINISHED: &str = "finished";

/// How long cleanup waits for workers still running after a cancel.
const CLEANUP_GRACE: Duration = Duration::from_secs(30);

/// Drives one catalogue job from validation to cleanup.
///
/// The engine is built once by the entry point and can run any number of
/// jobs, one at a time per [`JobRunState`].
pub struct JobEngine {
    reader: Box<dyn MetadataReader>,
    renderer: Option<Box<dyn CatalogueRenderer>>,
}

/// Per-run bookkeeping: progress, and the first failure of the run.
struct Run<'a> {
    state: &'a JobRunState,
    observer: &'a dyn ProgressObserver,
    tracker: PhaseTracker,
    /// status message of the first failure; it outlives the cleanup message
    failure: Option<String>,
}

/// Everything that must be released when the run ends, however it ends.
#[derive(Default)]
struct Transient {
    scratch: Option<TempDir>,
    pipeline: Option<Pipeline>,
}

impl<'a> Run<'a> {
    fn new(
        state: &'a JobRunState,
        observer: &'a dyn ProgressObserver,
    ) -> Result<Self, JobError> {
        let tracker = PhaseTracker::new(&PHASE_WEIGHTS).ok_or_else(|| {
            JobError::Internal(format!("invalid phase weights {:?}", PHASE_WEIGHTS))
        })?;
        Ok(Run {
            state,
            observer,
            tracker,
            failure: None,
        })
    }

    fn publish(&self) {
        self.state.set_percentage(self.tracker.absolute_percent());
        self.observer.update_progress(&self.state.snapshot());
    }

    fn enter_phase(&mut self, message: &str) {
        self.tracker.advance();
        self.state.set_message(message);
        tracing::debug!("engine: {} ({})", message, self.tracker);
        self.publish();
    }

    fn finish_phase(&mut self) {
        self.tracker.set_percent_in_phase(100);
        self.publish();
    }

    fn report_files(&mut self, done: usize, total: usize) {
        let percent = if total == 0 { 100 } else { done * 100 / total };
        self.tracker.set_percent_in_phase(percent as i64);
        self.publish();
    }

    fn fail(&mut self, message: String) {
        tracing::error!("engine: {}", message);
        if self.failure.is_some() {
            return;
        }
        let status_message = format!("error: {}", message);
        self.state.update(|s| {
            s.failed = true;
            s.message = Some(status_message.clone());
        });
        self.failure = Some(status_message);
        self.observer.handle_failure(&self.state.snapshot());
    }
}

impl JobEngine {
    pub fn new(reader: Box<dyn MetadataReader>) -> Self {
        JobEngine {
            reader,
            renderer: None,
        }
    }

    pub fn with_renderer(mut self, renderer: Box<dyn CatalogueRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    /// Run one job to its end and return the final status.
    ///
    /// Nothing escapes: errors and panics mark the run failed. Cleanup always
    /// runs, after which the state is completed at 100% and the observer's
    /// completion callback fires exactly once.
    pub fn run(
        &self,
        spec: &JobSpec,
        state: &JobRunState,
        observer: &dyn ProgressObserver,
    ) -> RunStatus {
        state.reset();
        state.start();

        let mut run = match Run::new(state, observer) {
            Ok(run) => run,
            Err(e) => {
                let message = format!("error: {}", e);
                state.update(|s| {
                    s.failed = true;
                    s.message = Some(message.clone());
                });
                observer.handle_failure(&state.snapshot());
                return Self::finish(state, observer, Some(message));
            }
        };

        let mut records: Vec<SourceFileRecord> = Vec::new();
        let mut transient = Transient::default();

        let result = std::panic::catch_unwind(AssertUnwindSafe(|| {
            self.execute(spec, &mut run, &mut records, &mut transient)
        }));
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => run.fail(e.to_string()),
            Err(_) => run.fail("unexpected panic while running the job".to_string()),
        }

        state.update(|s| {
            s.percentage = 100;
            s.message = Some(MSG_CLEANUP.to_string());
        });
        observer.update_progress(&state.snapshot());
        cleanup(&mut records, transient);

        Self::finish(state, observer, run.failure.take())
    }

    /// `failure` is the status message of a failed run; it replaces the
    /// cleanup message so the cause stays visible.
    fn finish(
        state: &JobRunState,
        observer: &dyn ProgressObserver,
        failure: Option<String>,
    ) -> RunStatus {
        state.update(|s| {
            s.completed = true;
            s.percentage = 100;
            s.message = Some(failure.unwrap_or_else(|| MSG_FINISHED.to_string()));
        });
        let status = state.snapshot();
        tracing::info!("engine: job ended as {:?}", status.phase());
        observer.handle_completion(&status);
        status
    }

    fn execute(
        &self,
        spec: &JobSpec,
        run: &mut Run<'_>,
        records: &mut Vec<SourceFileRecord>,
        transient: &mut Transient,
    ) -> Result<(), JobError> {
        let state = run.state;

        state.set_message(MSG_CHECKING);
        run.publish();
        spec.check()?;
        let template = spec
            .template
            .as_deref()
            .ok_or(ValidationError::MissingTemplate)?;
        *records = scanner::discover(&spec.source_dir, self.reader.as_ref())?;
        if records.is_empty() {
            return Err(ValidationError::NoSourceFiles.into());
        }
        tracing::info!(
            "engine: {} source files under {:?}",
            records.len(),
            spec.source_dir
        );
        run.finish_phase();
        if !state.is_running() {
            return Ok(());
        }

        run.enter_phase(MSG_PROCESSING_IMAGES);
        let scratch = make_scratch_dir(spec.scratch_dir.as_deref())?;
        let worker = Arc::new(ThumbnailWorker::new(
            spec.max_edge_px,
            scratch.path(),
            FrameExtractor::new(spec.ffmpeg_binary.clone(), spec.frame_timeout()),
        ));
        transient.scratch = Some(scratch);
        let pipeline = transient.pipeline.insert(Pipeline::new(spec.thread_count)?);
        let outcome = pipeline.run(
            records,
            worker,
            || !state.is_running(),
            |done, total| run.report_files(done, total),
        )?;
        if outcome.cancelled || !state.is_running() {
            return Ok(());
        }

        run.enter_phase(MSG_ASSEMBLING);
        let catalogue = catalogue::assemble(records, spec.missing_thumbnail);
        run.finish_phase();
        if !state.is_running() {
            return Ok(());
        }

        run.enter_phase(MSG_WRITING);
        if let Some(out) = &spec.catalogue_output {
            catalogue::write_json(&catalogue, out)?;
        }
        run.finish_phase();
        if !state.is_running() {
            return Ok(());
        }

        run.enter_phase(MSG_RENDERING);
        self.render(&catalogue, template, spec.render_output.as_deref())?;
        run.finish_phase();
        Ok(())
    }

    fn render(
        &self,
        catalogue: &Catalogue,
        template: &Path,
        output: Option<&Path>,
    ) -> Result<(), ExportError> {
        match &self.renderer {
            Some(renderer) => renderer
                .render(catalogue, template, output)
                .map_err(ExportError::Render),
            None => {
                tracing::debug!("engine: no renderer configured, skipping render");
                Ok(())
            }
        }
    }
}

fn make_scratch_dir(parent: Option<&Path>) -> Result<TempDir, JobError> {
    let mut builder = tempfile::Builder::new();
    builder.prefix("photocat-");
    match parent {
        Some(dir) => builder.tempdir_in(dir),
        None => builder.tempdir(),
    }
    .map_err(JobError::Scratch)
}

/// Let workers still running after a cancel finish, delete every generated
/// thumbnail, release the pool, then remove the scratch directory with
/// whatever late workers left behind. Failures are logged only.
fn cleanup(records: &mut [SourceFileRecord], transient: Transient) {
    if let Some(pipeline) = &transient.pipeline {
        pipeline.wait_idle(CLEANUP_GRACE);
    }

    let mut removed = 0;
    for record in records.iter_mut() {
        if let Some(thumb) = record.thumbnail.take() {
            match std::fs::remove_file(&thumb) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!("cleanup: unable to delete {:?}: {}", thumb, e),
            }
        }
    }
    tracing::debug!("cleanup: {} thumbnails deleted", removed);

    let Transient { scratch, pipeline } = transient;
    drop(pipeline);
    if let Some(dir) = scratch {
        let path = dir.path().to_path_buf();
        if let Err(e) = dir.close() {
            tracing::warn!("cleanup: unable to remove scratch directory {:?}: {}", path, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import::exif::ExifMetadataReader;
    use crate::import::test_support::write_jpeg;
    use crate::job::state::RunPhase;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        Update(u32, Option<String>),
        Failure(Option<String>),
        Completion(RunPhase),
    }

    #[derive(Default)]
    struct RecordingObserver {
        events: Mutex<Vec<Event>>,
        /// cancel this state when the nth status with this message is seen
        cancel_on: Option<(&'static str, usize, Arc<JobRunState>)>,
        matching: AtomicUsize,
    }

    impl RecordingObserver {
        fn events(&self) -> Vec<Event> {
            self.events.lock().unwrap().clone()
        }

        fn failures(&self) -> usize {
            self.events()
                .iter()
                .filter(|e| matches!(e, Event::Failure(_)))
                .count()
        }

        fn completions(&self) -> usize {
            self.events()
                .iter()
                .filter(|e| matches!(e, Event::Completion(_)))
                .count()
        }
    }

    impl ProgressObserver for RecordingObserver {
        fn update_progress(&self, status: &RunStatus) {
            if let Some((msg, nth, state)) = &self.cancel_on {
                if status.message.as_deref() == Some(*msg)
                    && self.matching.fetch_add(1, Ordering::SeqCst) + 1 == *nth
                {
                    state.cancel();
                }
            }
            self.events
                .lock()
                .unwrap()
                .push(Event::Update(status.percentage, status.message.clone()));
        }

        fn handle_failure(&self, status: &RunStatus) {
            self.events
                .lock()
                .unwrap()
                .push(Event::Failure(status.message.clone()));
        }

        fn handle_completion(&self, status: &RunStatus) {
            self.events
                .lock()
                .unwrap()
                .push(Event::Completion(status.phase()));
        }
    }

    struct FailingRenderer;

    impl CatalogueRenderer for FailingRenderer {
        fn render(&self, _: &Catalogue, _: &Path, _: Option<&Path>) -> anyhow::Result<()> {
            anyhow::bail!("template is broken")
        }
    }

    fn engine() -> JobEngine {
        JobEngine::new(Box::new(ExifMetadataReader))
    }

    fn spec_for(source: &Path, scratch: &Path) -> JobSpec {
        let mut spec = JobSpec::new(source);
        spec.template = Some(source.join("catalogue.tpl"));
        spec.scratch_dir = Some(scratch.to_path_buf());
        spec.thread_count = 2;
        spec.max_edge_px = 64;
        spec
    }

    fn photos(dir: &Path, n: usize) {
        for i in 0..n {
            write_jpeg(&dir.join(format!("img{}.jpg", i)), 120, 90);
        }
    }

    fn is_empty_dir(dir: &Path) -> bool {
        std::fs::read_dir(dir).unwrap().next().is_none()
    }

    #[test]
    fn test_zero_source_files_fails_once_and_still_completes() {
        let source = TempDir::new().unwrap();
        let scratch = TempDir::new().unwrap();
        let state = JobRunState::new();
        let observer = RecordingObserver::default();

        let status = engine().run(&spec_for(source.path(), scratch.path()), &state, &observer);

        assert!(status.failed);
        assert!(status.completed);
        assert_eq!(status.percentage, 100);
        assert_eq!(observer.failures(), 1);
        assert_eq!(observer.completions(), 1);
        assert!(matches!(observer.events().last(), Some(Event::Completion(_))));
        let msg = state.message().unwrap();
        assert!(msg.contains("no source files"), "{}", msg);
    }

    #[test]
    fn test_missing_template_fails_before_discovery() {
        let source = TempDir::new().unwrap();
        let scratch = TempDir::new().unwrap();
        photos(source.path(), 1);
        let mut spec = spec_for(source.path(), scratch.path());
        spec.template = None;
        let state = JobRunState::new();
        let observer = RecordingObserver::default();

        let status = engine().run(&spec, &state, &observer);

        assert!(status.failed);
        assert_eq!(observer.failures(), 1);
        assert!(state.message().unwrap().contains("template"));
        assert!(is_empty_dir(scratch.path()), "no scratch dir is created");
    }

    #[test]
    fn test_unreadable_source_is_a_failure() {
        let scratch = TempDir::new().unwrap();
        let spec = spec_for(&scratch.path().join("missing"), scratch.path());
        let state = JobRunState::new();
        let observer = RecordingObserver::default();

        let status = engine().run(&spec, &state, &observer);
        assert!(status.failed && status.completed);
        assert_eq!(observer.failures(), 1);
        assert_eq!(observer.completions(), 1);
    }

    #[test]
    fn test_successful_run_without_renderer() {
        let source = TempDir::new().unwrap();
        let scratch = TempDir::new().unwrap();
        photos(source.path(), 3);
        let state = JobRunState::new();
        let observer = RecordingObserver::default();

        let status = engine().run(&spec_for(source.path(), scratch.path()), &state, &observer);

        assert_eq!(status.phase(), RunPhase::Completed);
        assert!(!status.failed && !status.cancelled);
        assert_eq!(status.message.as_deref(), Some(MSG_FINISHED));
        assert_eq!(observer.failures(), 0);
        assert!(is_empty_dir(scratch.path()));

        let percents: Vec<u32> = observer
            .events()
            .iter()
            .filter_map(|e| match e {
                Event::Update(p, _) => Some(*p),
                _ => None,
            })
            .collect();
        assert!(percents.windows(2).all(|w| w[0] <= w[1]), "{:?}", percents);
        let messages: Vec<String> = observer
            .events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Update(_, m) => m,
                _ => None,
            })
            .collect();
        for expected in [
            MSG_CHECKING,
            MSG_PROCESSING_IMAGES,
            MSG_ASSEMBLING,
            MSG_WRITING,
            MSG_RENDERING,
            MSG_CLEANUP,
        ] {
            assert!(
                messages.iter().any(|m| m == expected),
                "missing status {:?}",
                expected
            );
        }
    }

    #[test]
    fn test_renderer_failure_marks_failed_and_cleans_up() {
        let source = TempDir::new().unwrap();
        let scratch = TempDir::new().unwrap();
        photos(source.path(), 2);
        let state = JobRunState::new();
        let observer = RecordingObserver::default();

        let status = engine()
            .with_renderer(Box::new(FailingRenderer))
            .run(&spec_for(source.path(), scratch.path()), &state, &observer);

        assert!(status.failed && status.completed);
        assert_eq!(status.percentage, 100);
        assert!(status.message.unwrap().contains("template is broken"));
        assert_eq!(observer.failures(), 1);
        assert_eq!(observer.completions(), 1);
        assert!(is_empty_dir(scratch.path()));
    }

    #[test]
    fn test_cancel_during_thumbnails_skips_later_phases() {
        let source = TempDir::new().unwrap();
        let scratch = TempDir::new().unwrap();
        photos(source.path(), 4);
        let state = Arc::new(JobRunState::new());
        let observer = RecordingObserver {
            cancel_on: Some((MSG_PROCESSING_IMAGES, 1, Arc::clone(&state))),
            ..Default::default()
        };

        let status = engine().run(&spec_for(source.path(), scratch.path()), &state, &observer);

        assert!(status.cancelled);
        assert!(!status.failed);
        assert!(status.completed);
        assert_eq!(observer.failures(), 0);
        assert_eq!(observer.completions(), 1);
        let saw_assembling = observer
            .events()
            .iter()
            .any(|e| matches!(e, Event::Update(_, Some(m)) if m == MSG_ASSEMBLING));
        assert!(!saw_assembling);
        assert!(is_empty_dir(scratch.path()), "cancelled run leaves nothing behind");
    }

    #[test]
    fn test_cancel_while_workers_are_busy_leaves_no_files() {
        let source = TempDir::new().unwrap();
        let scratch = TempDir::new().unwrap();
        for i in 0..8 {
            write_jpeg(&source.path().join(format!("big{}.jpg", i)), 1500, 1500);
        }
        let state = Arc::new(JobRunState::new());
        // the first update is entering the phase, the second is the first finished file
        let observer = RecordingObserver {
            cancel_on: Some((MSG_PROCESSING_IMAGES, 2, Arc::clone(&state))),
            ..Default::default()
        };
        let mut spec = spec_for(source.path(), scratch.path());
        spec.thread_count = 4;

        let status = engine().run(&spec, &state, &observer);

        assert!(status.cancelled && status.completed);
        assert!(!status.failed);
        assert!(is_empty_dir(scratch.path()), "late thumbnails are cleaned up too");
    }

    #[test]
    fn test_failed_run_keeps_its_error_after_cleanup() {
        let source = TempDir::new().unwrap();
        let scratch = TempDir::new().unwrap();
        let state = JobRunState::new();
        let observer = RecordingObserver::default();

        let status = engine().run(&spec_for(source.path(), scratch.path()), &state, &observer);

        let events = observer.events();
        let cleanup_at = events
            .iter()
            .position(|e| matches!(e, Event::Update(_, Some(m)) if m == MSG_CLEANUP))
            .expect("cleanup status is published");
        let failure_at = events
            .iter()
            .position(|e| matches!(e, Event::Failure(_)))
            .unwrap();
        assert!(failure_at < cleanup_at);
        assert_eq!(events[cleanup_at], Event::Update(100, Some(MSG_CLEANUP.to_string())));
        assert_eq!(
            status.message.as_deref(),
            Some("error: there are no source files to catalogue")
        );
        assert_eq!(state.message(), status.message);
    }

    #[test]
    fn test_rerun_resets_previous_state() {
        let source = TempDir::new().unwrap();
        let scratch = TempDir::new().unwrap();
        photos(source.path(), 1);
        let state = JobRunState::new();
        state.fail();
        state.cancel();

        let status = engine().run(
            &spec_for(source.path(), scratch.path()),
            &state,
            &RecordingObserver::default(),
        );
        assert!(!status.failed && !status.cancelled && status.completed);
    }
}
