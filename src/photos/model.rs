use chrono::NaiveDateTime;
use std::cmp::Ordering;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Unknown,
    Still,
    Video,
}

/// One input file discovered under the job's source directory.
///
/// `thumbnail` is the only field that changes after discovery; the pipeline
/// fills it in once the worker for this record has finished.
#[derive(Debug, Clone)]
pub struct SourceFileRecord {
    pub path: PathBuf,
    /// unique per record, used to name transient files
    pub code: String,
    pub kind: MediaKind,
    /// EXIF DateTimeOriginal when readable, otherwise the file's mtime (local wall clock)
    pub timestamp: NaiveDateTime,
    pub description: Option<String>,
    pub thumbnail: Option<PathBuf>,
}

impl SourceFileRecord {
    pub fn new(
        path: PathBuf,
        kind: MediaKind,
        timestamp: NaiveDateTime,
        description: Option<String>,
    ) -> Self {
        SourceFileRecord {
            path,
            code: uuid::Uuid::new_v4().to_string(),
            kind,
            timestamp,
            description,
            thumbnail: None,
        }
    }

    /// File name without directories, used as the display name in the catalogue.
    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Total order used for chronological grouping: timestamp first, then path.
    pub fn chronological_cmp(&self, other: &Self) -> Ordering {
        self.timestamp
            .cmp(&other.timestamp)
            .then_with(|| self.path.cmp(&other.path))
    }
}

/// Sort records in place by `(timestamp, path)` ascending.
pub fn sort_chronologically(records: &mut [SourceFileRecord]) {
    records.sort_by(SourceFileRecord::chronological_cmp);
}
