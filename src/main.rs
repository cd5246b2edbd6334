use anyhow::{bail, Context, Result};
use photocat_lib::import::exif::ExifMetadataReader;
use photocat_lib::job::engine::JobEngine;
use photocat_lib::job::observer::TracingObserver;
use photocat_lib::job::spec::JobSpec;
use photocat_lib::job::state::JobRunState;
use std::path::PathBuf;

fn main() -> Result<()> {
    photocat_lib::init_tracing();

    let job_file: PathBuf = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .context("usage: photocat <job.json>")?;
    let spec = JobSpec::load(&job_file)?;

    let engine = JobEngine::new(Box::new(ExifMetadataReader));
    let state = JobRunState::new();
    let status = engine.run(&spec, &state, &TracingObserver);

    if status.failed {
        bail!(
            "{}",
            status.message.unwrap_or_else(|| "job failed".to_string())
        );
    }
    Ok(())
}
