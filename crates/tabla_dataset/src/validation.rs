//! Run validation and read-back checks on the final metadata table.

use crate::types::{
    CurateError, CurateResult, CurationSummary, ValidationOutcome, ValidationReport,
    ValidationThresholds,
};
use data_contracts::{CanonicalLabel, DATASET_ENTRY_COLUMNS};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

fn apply_thresholds(
    label: &str,
    count: usize,
    ratio: f32,
    max_count: Option<usize>,
    max_ratio: Option<f32>,
    outcome: &mut ValidationOutcome,
    reasons: &mut Vec<String>,
) {
    if let Some(max) = max_count {
        if count > max {
            *outcome = ValidationOutcome::Fail;
            reasons.push(format!("{label}: {count} exceeds max {max}"));
        }
    }
    if let Some(max_r) = max_ratio {
        if ratio > max_r {
            *outcome = ValidationOutcome::Fail;
            reasons.push(format!(
                "{label}: ratio {:.3} exceeds max {:.3}",
                ratio, max_r
            ));
        }
    }
    if count > 0 {
        if *outcome == ValidationOutcome::Pass {
            *outcome = ValidationOutcome::Warn;
        }
        reasons.push(format!("{label}: {count} observed"));
    }
}

fn ratio(count: usize, of: usize) -> f32 {
    count as f32 / of.max(1) as f32
}

/// Grade a run summary. Any observed miss or failure warns; exceeding a
/// threshold fails, as does a run that indexed nothing.
pub fn validate_summary(
    summary: CurationSummary,
    thresholds: &ValidationThresholds,
) -> ValidationReport {
    let mut outcome = ValidationOutcome::Pass;
    let mut reasons = Vec::new();

    apply_thresholds(
        "unresolved records",
        summary.misses,
        ratio(summary.misses, summary.records_considered),
        thresholds.max_unresolved,
        thresholds.max_unresolved_ratio,
        &mut outcome,
        &mut reasons,
    );
    apply_thresholds(
        "decode errors",
        summary.decode_errors,
        ratio(summary.decode_errors, summary.records_resolved),
        thresholds.max_decode_errors,
        thresholds.max_decode_error_ratio,
        &mut outcome,
        &mut reasons,
    );
    apply_thresholds(
        "transform failures",
        summary.transform_failures,
        ratio(summary.transform_failures, summary.unique_images),
        thresholds.max_transform_failures,
        thresholds.max_transform_failure_ratio,
        &mut outcome,
        &mut reasons,
    );
    if summary.write_failures > 0 {
        if outcome == ValidationOutcome::Pass {
            outcome = ValidationOutcome::Warn;
        }
        reasons.push(format!("write failures: {} observed", summary.write_failures));
    }
    if summary.variants_written == 0 {
        outcome = ValidationOutcome::Fail;
        reasons.push("no variants written".to_string());
    }

    ValidationReport {
        outcome,
        reasons,
        summary,
    }
}

/// Pretty JSON, the same shape operators read from the console.
pub fn write_report_json(path: &Path, report: &ValidationReport) -> CurateResult<()> {
    let json = serde_json::to_string_pretty(report).map_err(|e| CurateError::Json {
        path: path.to_path_buf(),
        source: e,
    })?;
    fs::write(path, json).map_err(|e| CurateError::io(path, e))
}

/// Read-back of a final metadata table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetadataAudit {
    pub rows: usize,
    pub by_label: BTreeMap<CanonicalLabel, usize>,
    /// Rows whose `absolute_path` is not a file.
    pub missing_files: Vec<PathBuf>,
    /// Rows with an unparseable label or the wrong number of fields.
    pub invalid_rows: usize,
}

impl MetadataAudit {
    pub fn is_clean(&self) -> bool {
        self.missing_files.is_empty() && self.invalid_rows == 0
    }
}

pub fn audit_metadata(path: &Path) -> CurateResult<MetadataAudit> {
    let csv_err = |e| CurateError::Csv {
        path: path.to_path_buf(),
        source: e,
    };
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .map_err(csv_err)?;
    let headers = rdr.headers().map_err(csv_err)?.clone();
    if headers.iter().ne(DATASET_ENTRY_COLUMNS.iter().copied()) {
        return Err(CurateError::SchemaMismatch {
            table: path.display().to_string(),
            msg: format!(
                "expected columns {:?}, found {:?}",
                DATASET_ENTRY_COLUMNS,
                headers.iter().collect::<Vec<_>>()
            ),
        });
    }

    let mut audit = MetadataAudit::default();
    for row in rdr.records() {
        let row = row.map_err(csv_err)?;
        audit.rows += 1;
        let (Some(label), Some(abs)) = (row.get(1), row.get(2)) else {
            audit.invalid_rows += 1;
            continue;
        };
        match CanonicalLabel::from_str(label) {
            Ok(label) => *audit.by_label.entry(label).or_insert(0) += 1,
            Err(_) => audit.invalid_rows += 1,
        }
        let abs = PathBuf::from(abs);
        if !abs.is_file() {
            audit.missing_files.push(abs);
        }
    }
    Ok(audit)
}
