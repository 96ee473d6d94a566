//! Core types, error definitions, and run summaries for tabla_dataset.

use data_contracts::CanonicalLabel;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

pub type CurateResult<T> = Result<T, CurateError>;

#[derive(Debug, Error)]
pub enum CurateError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("csv error at {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("json error at {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("toml parse error at {path}: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("image decode error at {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("image encode error at {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("schema mismatch in table {table}: {msg}")]
    SchemaMismatch { table: String, msg: String },
    #[error("failed to load enhancement model {path}: {msg}")]
    ModelLoad { path: PathBuf, msg: String },
    #[error("invalid taxonomy: {0}")]
    Taxonomy(String),
    #[error("{0}")]
    Other(String),
}

impl CurateError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CurateError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Why an image was kept out of the unique set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    ExactDuplicate,
    NearDuplicate,
    DecodeError,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::ExactDuplicate => "exact_duplicate",
            RejectReason::NearDuplicate => "near_duplicate",
            RejectReason::DecodeError => "decode_error",
        }
    }
}

/// Why a metadata row never became a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    MissingLabelAndPath,
    MalformedRow,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::MissingLabelAndPath => "missing_label_and_path",
            DropReason::MalformedRow => "malformed_row",
        }
    }
}

/// End-of-run report: every skip or reject event is counted here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurationSummary {
    /// Rows dropped during reconciliation, by reason.
    pub dropped_rows: BTreeMap<DropReason, usize>,
    /// Records handed to file resolution.
    pub records_considered: usize,
    pub records_resolved: usize,
    /// Records whose file was not found under any raw root.
    pub misses: usize,
    pub exact_duplicates: usize,
    pub near_duplicates: usize,
    pub decode_errors: usize,
    pub unique_images: usize,
    /// Unique images whose transform stage failed.
    pub transform_failures: usize,
    /// Variants whose file could not be written.
    pub write_failures: usize,
    pub variants_written: usize,
    /// Written variants by canonical label.
    pub images_by_label: BTreeMap<CanonicalLabel, usize>,
}

impl CurationSummary {
    pub fn duplicates_rejected(&self) -> usize {
        self.exact_duplicates + self.near_duplicates
    }

    pub fn dropped_total(&self) -> usize {
        self.dropped_rows.values().sum()
    }

    pub fn record_reject(&mut self, reason: RejectReason) {
        match reason {
            RejectReason::ExactDuplicate => self.exact_duplicates += 1,
            RejectReason::NearDuplicate => self.near_duplicates += 1,
            RejectReason::DecodeError => self.decode_errors += 1,
        }
    }

    /// Multi-line operator report.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "records: considered={} resolved={} unresolved={} dropped_rows={}\n",
            self.records_considered,
            self.records_resolved,
            self.misses,
            self.dropped_total()
        ));
        for (reason, count) in &self.dropped_rows {
            out.push_str(&format!("  dropped {}: {}\n", reason.as_str(), count));
        }
        out.push_str(&format!(
            "images: unique={} exact_duplicates={} near_duplicates={} decode_errors={}\n",
            self.unique_images, self.exact_duplicates, self.near_duplicates, self.decode_errors
        ));
        out.push_str(&format!(
            "variants: written={} transform_failures={} write_failures={}\n",
            self.variants_written, self.transform_failures, self.write_failures
        ));
        for (label, count) in &self.images_by_label {
            out.push_str(&format!("  {}: {}\n", label, count));
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationOutcome {
    Pass,
    Warn,
    Fail,
}

impl ValidationOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationOutcome::Pass => "pass",
            ValidationOutcome::Warn => "warn",
            ValidationOutcome::Fail => "fail",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationThresholds {
    pub max_unresolved: Option<usize>,
    pub max_decode_errors: Option<usize>,
    pub max_transform_failures: Option<usize>,
    pub max_unresolved_ratio: Option<f32>,
    pub max_decode_error_ratio: Option<f32>,
    pub max_transform_failure_ratio: Option<f32>,
}

impl ValidationThresholds {
    pub fn from_env() -> Self {
        fn parse_usize(key: &str) -> Option<usize> {
            std::env::var(key).ok()?.parse().ok()
        }
        fn parse_ratio(key: &str) -> Option<f32> {
            std::env::var(key).ok()?.parse().ok()
        }
        ValidationThresholds {
            max_unresolved: parse_usize("TABLA_DATASET_MAX_UNRESOLVED"),
            max_decode_errors: parse_usize("TABLA_DATASET_MAX_DECODE_ERRORS"),
            max_transform_failures: parse_usize("TABLA_DATASET_MAX_TRANSFORM_FAILURES"),
            max_unresolved_ratio: parse_ratio("TABLA_DATASET_MAX_UNRESOLVED_RATIO"),
            max_decode_error_ratio: parse_ratio("TABLA_DATASET_MAX_DECODE_ERROR_RATIO"),
            max_transform_failure_ratio: parse_ratio(
                "TABLA_DATASET_MAX_TRANSFORM_FAILURE_RATIO",
            ),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub outcome: ValidationOutcome,
    pub reasons: Vec<String>,
    pub summary: CurationSummary,
}
