use std::path::PathBuf;
use thiserror::Error;

/// The source root could not be listed at all.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("source directory not found: {0}")]
    NotFound(PathBuf),

    #[error("source path is not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("source directory is not accessible: {path}: {source}")]
    NotAccessible {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// The worker pool could not be built or accepted no work.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("cannot build worker pool with {threads} thread(s): {message}")]
    PoolBuild { threads: usize, message: String },

    #[error("worker pool stopped reporting before all work was collected ({completed}/{total})")]
    Disconnected { completed: usize, total: usize },
}

/// Preconditions that must hold before any work starts.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("no render template has been configured")]
    MissingTemplate,

    #[error("there are no source files to catalogue")]
    NoSourceFiles,

    #[error("source directory has not been configured")]
    MissingSourceDirectory,

    #[error("thread count must be at least 1")]
    BadThreadCount,

    #[error("maximum width or height must be between {min} and {max} pixels, got {value}")]
    BadMaximumEdge { value: u32, min: u32, max: u32 },
}

/// Writing or rendering the assembled catalogue failed.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("cannot write catalogue to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot serialize catalogue: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("renderer failed: {0}")]
    Render(#[source] anyhow::Error),
}

/// Job-level failure caught at the engine boundary.
#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Export(#[from] ExportError),

    #[error("cannot create scratch directory: {0}")]
    Scratch(#[source] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}
