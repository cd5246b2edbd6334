use crate::import::util::default_thread_count;
use crate::job::error::ValidationError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const MIN_EDGE_PX: u32 = 32;
pub const MAX_EDGE_PX: u32 = 1000;

fn default_ffmpeg_binary() -> PathBuf {
    PathBuf::from("/usr/bin/ffmpeg")
}

fn default_max_edge() -> u32 {
    200
}

/// What the catalogue says about a file whose thumbnail could not be made.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissingThumbnail {
    /// leave the thumbnail reference out
    #[default]
    Omit,
    /// flag the entry as `thumbnail_failed`
    Mark,
}

/// Settings for one catalogue job, usually read from a JSON file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    pub source_dir: PathBuf,
    #[serde(default = "default_ffmpeg_binary")]
    pub ffmpeg_binary: PathBuf,
    #[serde(default = "default_thread_count")]
    pub thread_count: usize,
    #[serde(default = "default_max_edge")]
    pub max_edge_px: u32,
    #[serde(default)]
    pub template: Option<PathBuf>,
    #[serde(default)]
    pub catalogue_output: Option<PathBuf>,
    #[serde(default)]
    pub render_output: Option<PathBuf>,
    /// parent of the per-job scratch directory; the system temp dir if unset
    #[serde(default)]
    pub scratch_dir: Option<PathBuf>,
    #[serde(default)]
    pub missing_thumbnail: MissingThumbnail,
    #[serde(default)]
    pub frame_timeout_secs: Option<u64>,
}

impl JobSpec {
    /// A spec for `source_dir` with every other field at its default.
    pub fn new(source_dir: impl Into<PathBuf>) -> Self {
        JobSpec {
            source_dir: source_dir.into(),
            ffmpeg_binary: default_ffmpeg_binary(),
            thread_count: default_thread_count(),
            max_edge_px: default_max_edge(),
            template: None,
            catalogue_output: None,
            render_output: None,
            scratch_dir: None,
            missing_thumbnail: MissingThumbnail::default(),
            frame_timeout_secs: None,
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read job file {}", path.display()))?;
        let spec = serde_json::from_str(&text)
            .with_context(|| format!("invalid job file {}", path.display()))?;
        Ok(spec)
    }

    /// Static checks that need no filesystem access. The template and the
    /// presence of source files are checked by the engine at run time.
    pub fn check(&self) -> Result<(), ValidationError> {
        if self.source_dir.as_os_str().is_empty() {
            return Err(ValidationError::MissingSourceDirectory);
        }
        if self.thread_count == 0 {
            return Err(ValidationError::BadThreadCount);
        }
        if !(MIN_EDGE_PX..=MAX_EDGE_PX).contains(&self.max_edge_px) {
            return Err(ValidationError::BadMaximumEdge {
                value: self.max_edge_px,
                min: MIN_EDGE_PX,
                max: MAX_EDGE_PX,
            });
        }
        Ok(())
    }

    pub fn frame_timeout(&self) -> Option<Duration> {
        self.frame_timeout_secs.map(Duration::from_secs)
    }
}
