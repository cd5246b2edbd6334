use crate::import::exif::MetadataReader;
use crate::job::error::DiscoveryError;
use crate::photos::model::{sort_chronologically, MediaKind, SourceFileRecord};
use chrono::NaiveDateTime;
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

const STILL_EXTENSIONS: &[&str] = &["jpg", "jpeg"];
const VIDEO_EXTENSIONS: &[&str] = &["avi", "mpeg", "mov", "ogg", "mp4", "m4v"];

/// A classified leaf file found during the walk.
pub struct ScannedPath {
    pub path: PathBuf,
    pub kind: MediaKind,
}

/// Detect the media kind from the file extension (case-insensitive).
pub fn detect_kind(path: &Path) -> MediaKind {
    let Some(ext) = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|s| s.to_lowercase())
    else {
        return MediaKind::Unknown;
    };

    if STILL_EXTENSIONS.contains(&ext.as_str()) {
        MediaKind::Still
    } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
        MediaKind::Video
    } else {
        MediaKind::Unknown
    }
}

/// Linux and macOS mark hidden files and directories with a leading '.'.
fn is_hidden(entry: &DirEntry) -> bool {
    entry.file_name().to_string_lossy().starts_with('.')
}

/// Check that `root` can be listed at all.
fn check_root(root: &Path) -> Result<(), DiscoveryError> {
    let meta = match std::fs::metadata(root) {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(DiscoveryError::NotFound(root.to_path_buf()))
        }
        Err(source) => {
            return Err(DiscoveryError::NotAccessible {
                path: root.to_path_buf(),
                source,
            })
        }
    };
    if !meta.is_dir() {
        return Err(DiscoveryError::NotADirectory(root.to_path_buf()));
    }
    std::fs::read_dir(root).map_err(|source| DiscoveryError::NotAccessible {
        path: root.to_path_buf(),
        source,
    })?;
    Ok(())
}

/// Lazily walk `root` and yield every still or video file.
///
/// Hidden entries below the root are filtered before descending, so hidden
/// directories are never entered. The walk keeps its own stack of open
/// directories, so deep trees do not grow the call stack. Symlinks are
/// skipped and unreadable subdirectories are logged and skipped.
pub fn scan_directory(root: &Path) -> impl Iterator<Item = ScannedPath> {
    WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(e))
        .filter_map(|entry| match entry {
            Err(e) => {
                tracing::warn!("scan error: {}", e);
                None
            }
            Ok(entry) => {
                if !entry.file_type().is_file() {
                    if entry.path_is_symlink() {
                        tracing::debug!("skipping symlink: {:?}", entry.path());
                    }
                    return None;
                }
                match detect_kind(entry.path()) {
                    MediaKind::Unknown => None,
                    kind => Some(ScannedPath {
                        path: entry.into_path(),
                        kind,
                    }),
                }
            }
        })
}

/// File modification time as local wall-clock time. Falls back to the Unix
/// epoch when the platform cannot report one, so a record always has a time.
pub fn modified_time(path: &Path) -> NaiveDateTime {
    match std::fs::metadata(path).and_then(|m| m.modified()) {
        Ok(t) => chrono::DateTime::<chrono::Local>::from(t).naive_local(),
        Err(e) => {
            tracing::warn!("cannot read modification time of {:?}: {}", path, e);
            NaiveDateTime::default()
        }
    }
}

fn build_record(scanned: ScannedPath, reader: &dyn MetadataReader) -> SourceFileRecord {
    let ScannedPath { path, kind } = scanned;
    let (capture_time, description) = match kind {
        MediaKind::Still => match reader.read(&path) {
            Ok(meta) => (meta.capture_time, meta.description),
            Err(e) => {
                tracing::warn!("unable to read the metadata on {:?}: {}", path, e);
                (None, None)
            }
        },
        _ => (None, None),
    };
    let timestamp = capture_time.unwrap_or_else(|| modified_time(&path));
    SourceFileRecord::new(path, kind, timestamp, description)
}

/// Walk `root`, classify files, derive their timestamps and return them in
/// `(timestamp, path)` order.
///
/// Only a root that cannot be listed is an error; metadata failures fall back
/// to the modification time and unknown file types are ignored.
pub fn discover(
    root: &Path,
    reader: &dyn MetadataReader,
) -> Result<Vec<SourceFileRecord>, DiscoveryError> {
    check_root(root)?;
    // records carry absolute paths whatever form the root was given in
    let root = std::path::absolute(root).map_err(|source| DiscoveryError::NotAccessible {
        path: root.to_path_buf(),
        source,
    })?;

    let mut records: Vec<SourceFileRecord> = scan_directory(&root)
        .map(|scanned| build_record(scanned, reader))
        .collect();
    sort_chronologically(&mut records);

    tracing::debug!("discover {:?}: {} files", root, records.len());
    Ok(records)
}
