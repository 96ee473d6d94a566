use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// Column order of the final dataset metadata table.
pub const DATASET_ENTRY_COLUMNS: [&str; 3] = ["filename", "canonical_label", "absolute_path"];

/// Closed taxonomy used to organize the final dataset.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalLabel {
    Dayan,
    Bayan,
    Set,
    PlayingHands,
    TablaPerformance,
    NotTabla,
    /// Fallback when no keyword matches. A valid terminal classification.
    Unknown,
}

impl CanonicalLabel {
    pub const ALL: [CanonicalLabel; 7] = [
        CanonicalLabel::Dayan,
        CanonicalLabel::Bayan,
        CanonicalLabel::Set,
        CanonicalLabel::PlayingHands,
        CanonicalLabel::TablaPerformance,
        CanonicalLabel::NotTabla,
        CanonicalLabel::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CanonicalLabel::Dayan => "dayan",
            CanonicalLabel::Bayan => "bayan",
            CanonicalLabel::Set => "set",
            CanonicalLabel::PlayingHands => "playing_hands",
            CanonicalLabel::TablaPerformance => "tabla_performance",
            CanonicalLabel::NotTabla => "not_tabla",
            CanonicalLabel::Unknown => "unknown",
        }
    }
}

impl fmt::Display for CanonicalLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CanonicalLabel {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        CanonicalLabel::ALL
            .into_iter()
            .find(|label| label.as_str().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| ValidationError::UnrecognizedLabel(trimmed.to_string()))
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("unrecognized canonical label: {0:?}")]
    UnrecognizedLabel(String),
    #[error("record has neither a label nor a path")]
    MissingLabelAndPath,
    #[error("dataset entry has an empty filename")]
    EmptyFilename,
    #[error("dataset entry path is not absolute: {0}")]
    RelativePath(PathBuf),
    #[error("dataset entry filename {filename:?} does not match path {path}")]
    FilenameMismatch { filename: String, path: PathBuf },
}

/// One row from an acquisition metadata table, after schema alignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRecord {
    pub raw_label: String,
    pub source_path_hint: String,
    pub source_url: Option<String>,
}

impl RawRecord {
    pub fn has_label(&self) -> bool {
        !self.raw_label.trim().is_empty()
    }

    pub fn has_path(&self) -> bool {
        !self.source_path_hint.trim().is_empty()
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if !self.has_label() && !self.has_path() {
            return Err(ValidationError::MissingLabelAndPath);
        }
        Ok(())
    }

    /// Final path component of the hint, used to search raw storage roots.
    pub fn file_name(&self) -> Option<&str> {
        let hint = self.source_path_hint.trim();
        // Hints come from tables written on either platform.
        hint.rsplit(['/', '\\']).find(|part| !part.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciledRecord {
    pub raw: RawRecord,
    pub canonical_label: CanonicalLabel,
    /// Filled in by the assembler once the file is found under a raw root.
    pub resolved_file_path: Option<PathBuf>,
}

impl ReconciledRecord {
    pub fn new(raw: RawRecord, canonical_label: CanonicalLabel) -> Self {
        Self {
            raw,
            canonical_label,
            resolved_file_path: None,
        }
    }
}

/// One row of the final metadata table. Written only after its image exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetEntry {
    pub filename: String,
    pub canonical_label: CanonicalLabel,
    pub absolute_path: PathBuf,
}

impl DatasetEntry {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.filename.trim().is_empty() {
            return Err(ValidationError::EmptyFilename);
        }
        if !self.absolute_path.is_absolute() {
            return Err(ValidationError::RelativePath(self.absolute_path.clone()));
        }
        let matches = self
            .absolute_path
            .file_name()
            .and_then(|s| s.to_str())
            .is_some_and(|name| name == self.filename);
        if !matches {
            return Err(ValidationError::FilenameMismatch {
                filename: self.filename.clone(),
                path: self.absolute_path.clone(),
            });
        }
        Ok(())
    }

    pub fn exists_on_disk(&self) -> bool {
        Path::new(&self.absolute_path).is_file()
    }
}
