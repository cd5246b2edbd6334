use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};
use thiserror::Error;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("cannot launch frame extractor {binary}: {source}")]
    Launch {
        binary: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("frame extractor exited with {0}")]
    Failed(ExitStatus),

    #[error("frame extractor did not finish within {0:?} and was killed")]
    TimedOut(Duration),

    #[error("cannot wait for frame extractor: {0}")]
    Wait(#[source] std::io::Error),

    #[error("frame extractor reported success but wrote nothing to {0}")]
    NoOutput(PathBuf),
}

/// Runs an ffmpeg-compatible binary to grab the first frame of a video.
#[derive(Debug, Clone)]
pub struct FrameExtractor {
    binary: PathBuf,
    /// `None` waits for as long as the process runs
    timeout: Option<Duration>,
}

/// The fixed argument list: first frame (timestamp zero), one frame, no audio,
/// overwrite the output.
pub fn frame_args(input: &Path, output: &Path) -> Vec<OsString> {
    vec![
        "-y".into(),
        "-i".into(),
        input.as_os_str().to_owned(),
        "-ss".into(),
        "00:00:00.000".into(),
        "-vframes".into(),
        "1".into(),
        "-an".into(),
        output.as_os_str().to_owned(),
    ]
}

impl FrameExtractor {
    pub fn new(binary: impl Into<PathBuf>, timeout: Option<Duration>) -> Self {
        FrameExtractor {
            binary: binary.into(),
            timeout,
        }
    }

    /// Write the first frame of `input` to `output` (format chosen by the
    /// output's extension). A non-zero exit means no frame was produced.
    pub fn extract_first_frame(&self, input: &Path, output: &Path) -> Result<(), FrameError> {
        tracing::info!(
            "frames: launching {:?} to grab a frame from {:?}",
            self.binary,
            input.file_name().unwrap_or_default()
        );

        let mut child = Command::new(&self.binary)
            .args(frame_args(input, output))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| FrameError::Launch {
                binary: self.binary.clone(),
                source,
            })?;

        let status = match self.timeout {
            None => child.wait().map_err(FrameError::Wait)?,
            Some(limit) => wait_with_timeout(&mut child, limit)?,
        };

        if !status.success() {
            return Err(FrameError::Failed(status));
        }
        match std::fs::metadata(output) {
            Ok(m) if m.len() > 0 => Ok(()),
            _ => Err(FrameError::NoOutput(output.to_path_buf())),
        }
    }
}

fn wait_with_timeout(child: &mut Child, limit: Duration) -> Result<ExitStatus, FrameError> {
    let started = Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(status),
            Ok(None) if started.elapsed() >= limit => {
                if let Err(e) = child.kill() {
                    tracing::warn!("frames: cannot kill frame extractor: {}", e);
                }
                // reap so no zombie is left behind
                let _ = child.wait();
                return Err(FrameError::TimedOut(limit));
            }
            Ok(None) => std::thread::sleep(POLL_INTERVAL),
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(FrameError::Wait(e));
            }
        }
    }
}
