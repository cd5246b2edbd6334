use chrono::NaiveDateTime;
use std::path::Path;
use thiserror::Error;

/// Capture metadata for one still image. Either field may be absent.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ImageMetadata {
    pub capture_time: Option<NaiveDateTime>,
    pub description: Option<String>,
}

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("cannot open {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse metadata in {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: exif::Error,
    },
}

/// Reads capture metadata from a still image.
///
/// Failures are returned, never panicked; callers fall back to the file's
/// modification time.
pub trait MetadataReader: Send + Sync {
    fn read(&self, path: &Path) -> Result<ImageMetadata, MetadataError>;
}

/// [`MetadataReader`] backed by kamadak-exif.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExifMetadataReader;

impl MetadataReader for ExifMetadataReader {
    fn read(&self, path: &Path) -> Result<ImageMetadata, MetadataError> {
        match std::panic::catch_unwind(|| read_exif(path)) {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!("panic in exif reader for {:?}", path);
                Ok(ImageMetadata::default())
            }
        }
    }
}

fn read_exif(path: &Path) -> Result<ImageMetadata, MetadataError> {
    let file = std::fs::File::open(path).map_err(|source| MetadataError::Open {
        path: path.display().to_string(),
        source,
    })?;
    let mut buf_reader = std::io::BufReader::new(file);
    let exif = match exif::Reader::new().read_from_container(&mut buf_reader) {
        Ok(e) => e,
        // a JPEG without an EXIF block is not an error, just nothing to read
        Err(exif::Error::NotFound(_)) => {
            tracing::debug!("no EXIF in {:?}", path);
            return Ok(ImageMetadata::default());
        }
        Err(source) => {
            return Err(MetadataError::Parse {
                path: path.display().to_string(),
                source,
            })
        }
    };

    Ok(ImageMetadata {
        capture_time: read_datetime_original(&exif),
        description: read_ascii_tag(&exif, exif::Tag::ImageDescription),
    })
}

fn read_datetime_original(exif: &exif::Exif) -> Option<NaiveDateTime> {
    let field = exif.get_field(exif::Tag::DateTimeOriginal, exif::In::PRIMARY)?;
    match &field.value {
        exif::Value::Ascii(vecs) => vecs
            .first()
            .and_then(|v| std::str::from_utf8(v).ok())
            .and_then(parse_exif_datetime),
        _ => None,
    }
}

/// Parse the EXIF wall-clock format "YYYY:MM:DD HH:MM:SS".
pub fn parse_exif_datetime(s: &str) -> Option<NaiveDateTime> {
    let s = s.get(..19)?;
    NaiveDateTime::parse_from_str(s, "%Y:%m:%d %H:%M:%S").ok()
}

fn read_ascii_tag(exif: &exif::Exif, tag: exif::Tag) -> Option<String> {
    let field = exif.get_field(tag, exif::In::PRIMARY)?;
    match &field.value {
        exif::Value::Ascii(vecs) => {
            let s = vecs
                .first()
                .and_then(|v| std::str::from_utf8(v).ok())?
                .trim_end_matches('\0')
                .trim()
                .to_string();
            if s.is_empty() {
                None
            } else {
                Some(s)
            }
        }
        _ => None,
    }
}
