use crate::import::frames::{FrameError, FrameExtractor};
use crate::import::jpeg::{self, SanitizeError};
use crate::photos::model::{MediaKind, SourceFileRecord};
use image::{DynamicImage, ImageFormat};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ThumbnailError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unable to strip metadata segments: {0}")]
    Sanitize(#[from] SanitizeError),

    #[error("unable to extract a frame: {0}")]
    Frame(#[from] FrameError),

    #[error("cannot create scratch file: {0}")]
    Scratch(#[source] std::io::Error),

    #[error("cannot decode image: {0}")]
    Decode(#[source] image::ImageError),

    #[error("cannot write thumbnail {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("no thumbnail can be made for media kind {0:?}")]
    Unsupported(MediaKind),
}

/// Turns one source file into a JPEG whose longer side is `max_edge` pixels.
///
/// Thumbnails and any intermediate files live in `out_dir`; intermediates
/// are removed before [`ThumbnailWorker::generate`] returns.
#[derive(Debug, Clone)]
pub struct ThumbnailWorker {
    max_edge: u32,
    out_dir: PathBuf,
    frames: FrameExtractor,
}

impl ThumbnailWorker {
    pub fn new(max_edge: u32, out_dir: impl Into<PathBuf>, frames: FrameExtractor) -> Self {
        ThumbnailWorker {
            max_edge,
            out_dir: out_dir.into(),
            frames,
        }
    }

    pub fn thumbnail_path(&self, record: &SourceFileRecord) -> PathBuf {
        self.out_dir.join(format!("{}-thumb.jpg", record.code))
    }

    /// Generate the thumbnail for `record`. Returns its path, or `None` on any
    /// failure (logged, never propagated).
    pub fn generate(&self, record: &SourceFileRecord) -> Option<PathBuf> {
        match std::panic::catch_unwind(|| self.try_generate(record)) {
            Ok(Ok(path)) => {
                tracing::debug!("thumbnail saved to {:?}", path);
                Some(path)
            }
            Ok(Err(e)) => {
                tracing::warn!("thumbnail: unable to convert {:?}: {}", record.name(), e);
                None
            }
            Err(_) => {
                tracing::warn!("thumbnail: panic while converting {:?}", record.path);
                remove_quietly(&self.thumbnail_path(record));
                None
            }
        }
    }

    pub fn try_generate(&self, record: &SourceFileRecord) -> Result<PathBuf, ThumbnailError> {
        let img = match record.kind {
            MediaKind::Still => self.decode_still(&record.path)?,
            MediaKind::Video => self.decode_first_frame(record)?,
            MediaKind::Unknown => return Err(ThumbnailError::Unsupported(record.kind)),
        };

        let out_path = self.thumbnail_path(record);
        write_thumbnail(scale_to_max_edge(&img, self.max_edge), &out_path)?;
        Ok(out_path)
    }

    /// Strip APPn segments in memory first; some camera JPEGs only decode
    /// once their metadata is gone.
    fn decode_still(&self, source_path: &Path) -> Result<DynamicImage, ThumbnailError> {
        let original = std::fs::read(source_path).map_err(|source| ThumbnailError::Read {
            path: source_path.to_path_buf(),
            source,
        })?;
        tracing::info!(
            "thumbnail: stripping unnecessary data from {:?}",
            source_path.file_name().unwrap_or_default()
        );
        let sanitized = jpeg::sanitize_bytes(&original)?;
        drop(original);
        image::load_from_memory_with_format(&sanitized, ImageFormat::Jpeg)
            .map_err(ThumbnailError::Decode)
    }

    fn decode_first_frame(&self, record: &SourceFileRecord) -> Result<DynamicImage, ThumbnailError> {
        // removed on drop, whichever way this function exits
        let frame = tempfile::Builder::new()
            .prefix(&format!("{}-frame", record.code))
            .suffix(".jpg")
            .tempfile_in(&self.out_dir)
            .map_err(ThumbnailError::Scratch)?;

        self.frames.extract_first_frame(&record.path, frame.path())?;
        image::open(frame.path()).map_err(ThumbnailError::Decode)
    }
}

/// Scale so the longer side equals `max_edge`, keeping the aspect ratio.
pub fn scale_to_max_edge(img: &DynamicImage, max_edge: u32) -> DynamicImage {
    img.resize(max_edge, max_edge, image::imageops::FilterType::Lanczos3)
}

fn write_thumbnail(img: DynamicImage, out_path: &Path) -> Result<(), ThumbnailError> {
    let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
    if let Err(source) = rgb.save_with_format(out_path, ImageFormat::Jpeg) {
        remove_quietly(out_path);
        return Err(ThumbnailError::Encode {
            path: out_path.to_path_buf(),
            source,
        });
    }
    Ok(())
}

fn remove_quietly(path: &Path) {
    if path.exists() {
        if let Err(e) = std::fs::remove_file(path) {
            tracing::warn!("thumbnail: unable to delete {:?}: {}", path, e);
        }
    }
}
