use crate::job::error::ExportError;
use crate::job::spec::MissingThumbnail;
use crate::photos::model::{MediaKind, SourceFileRecord};
use chrono::{Datelike, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// The structured document handed to a renderer: records grouped into one
/// section per calendar month, oldest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Catalogue {
    /// timestamp of the oldest record
    pub start: Option<String>,
    /// timestamp of the newest record
    pub stop: Option<String>,
    pub sections: Vec<CatalogueSection>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogueSection {
    /// `<year>-<month>`, month 1-based and not zero padded
    pub label: String,
    /// unique per section
    pub code: String,
    pub files: Vec<CatalogueEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogueEntry {
    pub timestamp: String,
    pub file: PathBuf,
    pub name: String,
    pub datatype: MediaKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub thumbnail_failed: bool,
}

impl Catalogue {
    pub fn entry_count(&self) -> usize {
        self.sections.iter().map(|s| s.files.len()).sum()
    }
}

/// Turns a catalogue into the final artifact (a PDF, for instance) using a
/// template. Implementations live outside this crate.
pub trait CatalogueRenderer: Send + Sync {
    fn render(
        &self,
        catalogue: &Catalogue,
        template: &Path,
        output: Option<&Path>,
    ) -> anyhow::Result<()>;
}

fn format_timestamp(ts: &NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

fn thumbnail_url(path: &Path) -> Option<String> {
    match url::Url::from_file_path(path) {
        Ok(u) => Some(u.to_string()),
        Err(()) => {
            tracing::warn!("catalogue: thumbnail path {:?} is not absolute", path);
            None
        }
    }
}

fn entry(record: &SourceFileRecord, policy: MissingThumbnail) -> CatalogueEntry {
    let thumbnail_url = record.thumbnail.as_deref().and_then(thumbnail_url);
    CatalogueEntry {
        timestamp: format_timestamp(&record.timestamp),
        file: record.path.clone(),
        name: record.name(),
        datatype: record.kind,
        description: record.description.clone(),
        thumbnail_failed: policy == MissingThumbnail::Mark && thumbnail_url.is_none(),
        thumbnail_url,
    }
}

/// Group `records` (already in chronological order) by month and year.
pub fn assemble(records: &[SourceFileRecord], policy: MissingThumbnail) -> Catalogue {
    let mut sections: Vec<CatalogueSection> = Vec::new();
    let mut current: Option<(i32, u32)> = None;

    for record in records {
        let key = (record.timestamp.year(), record.timestamp.month());
        if current != Some(key) {
            current = Some(key);
            sections.push(CatalogueSection {
                label: format!("{}-{}", key.0, key.1),
                code: uuid::Uuid::new_v4().to_string(),
                files: Vec::new(),
            });
        }
        if let Some(section) = sections.last_mut() {
            section.files.push(entry(record, policy));
        }
    }

    Catalogue {
        start: records.first().map(|r| format_timestamp(&r.timestamp)),
        stop: records.last().map(|r| format_timestamp(&r.timestamp)),
        sections,
    }
}

/// Write the catalogue as pretty JSON. The file is replaced atomically, so a
/// reader never sees a half-written catalogue.
pub fn write_json(catalogue: &Catalogue, path: &Path) -> Result<(), ExportError> {
    let write_err = |source| ExportError::Write {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(write_err)?;
    }
    let json = serde_json::to_string_pretty(catalogue)?;

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp = PathBuf::from(tmp_name);

    std::fs::write(&tmp, json).map_err(write_err)?;
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(write_err(e));
    }
    tracing::info!(
        "catalogue: wrote {} entries to {:?}",
        catalogue.entry_count(),
        path
    );
    Ok(())
}
