//! Schema alignment and label normalization across metadata tables.
//!
//! Each table is projected onto the label / path / URL fields through a
//! declared [`SchemaMapping`] before anything is concatenated. A table that
//! cannot be aligned aborts the whole reconciliation.

use crate::labels::LabelNormalizer;
use crate::types::{CurateError, CurateResult, DropReason};
use data_contracts::{CanonicalLabel, RawRecord, ReconciledRecord};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;
use tracing::{info, warn};

/// Ordered header aliases per semantic field; the first alias present wins.
/// Header comparison is case-insensitive and ignores surrounding whitespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaMapping {
    pub label: Vec<String>,
    pub path: Vec<String>,
    pub url: Vec<String>,
}

impl Default for SchemaMapping {
    fn default() -> Self {
        fn owned(v: &[&str]) -> Vec<String> {
            v.iter().map(|s| s.to_string()).collect()
        }
        Self {
            // scraper: "Search Term"; pre-canonical: "category"; final: "canonical_label"
            label: owned(&["category", "search term", "canonical_label", "label"]),
            path: owned(&[
                "image_path",
                "image path",
                "file_path",
                "absolute_path",
                "filename",
                "path",
            ]),
            url: owned(&["source_url", "source url", "url"]),
        }
    }
}

/// Column positions of one table after alignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnBinding {
    pub label: usize,
    pub path: usize,
    pub url: Option<usize>,
}

impl SchemaMapping {
    pub fn bind(&self, table: &RawTable) -> CurateResult<ColumnBinding> {
        let headers: Vec<String> = table
            .headers
            .iter()
            .map(|h| h.trim().to_lowercase())
            .collect();
        let mismatch = |msg: String| CurateError::SchemaMismatch {
            table: table.name.clone(),
            msg,
        };
        let find = |aliases: &[String]| -> CurateResult<Option<usize>> {
            for alias in aliases {
                let alias = alias.trim().to_lowercase();
                let hits: Vec<usize> = headers
                    .iter()
                    .enumerate()
                    .filter(|(_, h)| **h == alias)
                    .map(|(i, _)| i)
                    .collect();
                match hits.len() {
                    0 => continue,
                    1 => return Ok(Some(hits[0])),
                    _ => return Err(mismatch(format!("column {alias:?} appears more than once"))),
                }
            }
            Ok(None)
        };
        let label = find(&self.label)?.ok_or_else(|| {
            mismatch(format!(
                "no label column (expected one of {:?}, found {:?})",
                self.label, table.headers
            ))
        })?;
        let path = find(&self.path)?.ok_or_else(|| {
            mismatch(format!(
                "no path column (expected one of {:?}, found {:?})",
                self.path, table.headers
            ))
        })?;
        let url = find(&self.url)?;
        if label == path {
            return Err(mismatch(format!(
                "label and path resolve to the same column {:?}",
                table.headers[label]
            )));
        }
        Ok(ColumnBinding { label, path, url })
    }
}

/// A metadata table as read, before alignment.
#[derive(Debug, Clone, Default)]
pub struct RawTable {
    pub name: String,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
    /// Rows the CSV reader could not parse.
    pub malformed_rows: usize,
}

impl RawTable {
    pub fn from_csv_path(path: &Path) -> CurateResult<Self> {
        let file = std::fs::File::open(path).map_err(|e| CurateError::io(path, e))?;
        Self::from_reader(&path.display().to_string(), file).map_err(|e| match e {
            CurateError::Csv { source, .. } => CurateError::Csv {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })
    }

    pub fn from_reader<R: Read>(name: &str, reader: R) -> CurateResult<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .flexible(true)
            .has_headers(true)
            .from_reader(reader);
        let headers = rdr
            .headers()
            .map_err(|e| CurateError::Csv {
                path: name.into(),
                source: e,
            })?
            .iter()
            .map(|h| h.trim_start_matches('\u{feff}').to_string())
            .collect();
        let mut rows = Vec::new();
        let mut malformed_rows = 0usize;
        for record in rdr.records() {
            match record {
                Ok(rec) => rows.push(rec.iter().map(|s| s.to_string()).collect()),
                Err(err) => {
                    warn!("{name}: skipping malformed row: {err}");
                    malformed_rows += 1;
                }
            }
        }
        Ok(Self {
            name: name.to_string(),
            headers,
            rows,
            malformed_rows,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct TableReport {
    pub name: String,
    pub rows_read: usize,
    pub records: usize,
    pub dropped: BTreeMap<DropReason, usize>,
}

#[derive(Debug, Clone, Default)]
pub struct ReconcileOutcome {
    pub records: Vec<ReconciledRecord>,
    pub tables: Vec<TableReport>,
}

impl ReconcileOutcome {
    pub fn dropped(&self) -> BTreeMap<DropReason, usize> {
        let mut total = BTreeMap::new();
        for table in &self.tables {
            for (reason, count) in &table.dropped {
                *total.entry(*reason).or_insert(0) += count;
            }
        }
        total
    }

    pub fn label_counts(&self) -> BTreeMap<CanonicalLabel, usize> {
        let mut counts = BTreeMap::new();
        for rec in &self.records {
            *counts.entry(rec.canonical_label).or_insert(0) += 1;
        }
        counts
    }
}

#[derive(Debug, Clone, Default)]
pub struct MetadataReconciler {
    mapping: SchemaMapping,
    normalizer: LabelNormalizer,
}

impl MetadataReconciler {
    pub fn new(mapping: SchemaMapping, normalizer: LabelNormalizer) -> Self {
        Self {
            mapping,
            normalizer,
        }
    }

    /// Align every table, then normalize labels row by row. All tables are
    /// bound before any row is converted, so a bad table aborts with no output.
    pub fn reconcile(&self, tables: &[RawTable]) -> CurateResult<ReconcileOutcome> {
        let bindings = tables
            .iter()
            .map(|t| self.mapping.bind(t))
            .collect::<CurateResult<Vec<_>>>()?;

        let mut outcome = ReconcileOutcome::default();
        for (table, binding) in tables.iter().zip(bindings) {
            let mut report = TableReport {
                name: table.name.clone(),
                rows_read: table.rows.len() + table.malformed_rows,
                ..Default::default()
            };
            if table.malformed_rows > 0 {
                report
                    .dropped
                    .insert(DropReason::MalformedRow, table.malformed_rows);
            }
            for row in &table.rows {
                let cell = |idx: usize| row.get(idx).map(|s| s.trim()).unwrap_or("");
                let raw = RawRecord {
                    raw_label: cell(binding.label).to_string(),
                    source_path_hint: cell(binding.path).to_string(),
                    source_url: binding
                        .url
                        .map(cell)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string),
                };
                if raw.validate().is_err() {
                    *report
                        .dropped
                        .entry(DropReason::MissingLabelAndPath)
                        .or_insert(0) += 1;
                    continue;
                }
                let label = self.normalizer.normalize(&raw.raw_label);
                outcome.records.push(ReconciledRecord::new(raw, label));
                report.records += 1;
            }
            let dropped: usize = report.dropped.values().sum();
            if dropped > 0 {
                warn!(
                    "{}: dropped {} of {} rows",
                    report.name, dropped, report.rows_read
                );
            }
            info!("{}: {} records", report.name, report.records);
            outcome.tables.push(report);
        }
        Ok(outcome)
    }
}

/// Read every table from disk and reconcile them.
pub fn reconcile_paths(
    reconciler: &MetadataReconciler,
    paths: &[impl AsRef<Path>],
) -> CurateResult<ReconcileOutcome> {
    let tables = paths
        .iter()
        .map(|p| RawTable::from_csv_path(p.as_ref()))
        .collect::<CurateResult<Vec<_>>>()?;
    reconciler.reconcile(&tables)
}

/// Export reconciled records with their canonical labels.
pub fn write_reconciled_csv(path: &Path, records: &[ReconciledRecord]) -> CurateResult<()> {
    let csv_err = |e| CurateError::Csv {
        path: path.to_path_buf(),
        source: e,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| CurateError::io(parent, e))?;
    }
    let mut wtr = csv::Writer::from_path(path).map_err(csv_err)?;
    wtr.write_record(["raw_label", "canonical_label", "source_path_hint", "source_url"])
        .map_err(csv_err)?;
    for rec in records {
        wtr.write_record([
            rec.raw.raw_label.as_str(),
            rec.canonical_label.as_str(),
            rec.raw.source_path_hint.as_str(),
            rec.raw.source_url.as_deref().unwrap_or(""),
        ])
        .map_err(csv_err)?;
    }
    wtr.flush().map_err(|e| CurateError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCRAPER: &str = "Image Path,Source URL,Search Term\n\
        images/tabla_pair/img_1.jpg,https://a.example/1.jpg,tabla pair\n\
        images/bayan/img_2.jpg,https://a.example/2.jpg,Bayan drum\n\
        ,,\n";

    const PRE_CANONICAL: &str = "image_path,source_url,category\n\
        images/x/img_3.jpg,,snare drum kit\n\
        images/x/img_4.jpg,,xylophone\n";

    const FINAL: &str = "filename,canonical_label,absolute_path\n\
        tabla_0001.jpg,tabla_performance,/data/tabla_performance/tabla_0001.jpg\n\
        ,,\n\
        tabla_0002.jpg,,/data/unknown/tabla_0002.jpg\n";

    fn table(name: &str, body: &str) -> RawTable {
        RawTable::from_reader(name, body.as_bytes()).unwrap()
    }

    #[test]
    fn aligns_divergent_schemas() {
        let outcome = MetadataReconciler::default()
            .reconcile(&[
                table("scraper", SCRAPER),
                table("pre", PRE_CANONICAL),
                table("final", FINAL),
            ])
            .unwrap();
        let labels: Vec<_> = outcome.records.iter().map(|r| r.canonical_label).collect();
        assert_eq!(
            labels,
            vec![
                CanonicalLabel::Set,
                CanonicalLabel::Bayan,
                CanonicalLabel::NotTabla,
                CanonicalLabel::Unknown,
                CanonicalLabel::TablaPerformance,
                CanonicalLabel::Unknown,
            ]
        );
        assert_eq!(
            outcome.records[0].raw.source_url.as_deref(),
            Some("https://a.example/1.jpg")
        );
        assert_eq!(outcome.records[2].raw.source_url, None);
        // "absolute_path" outranks "filename" in the default alias order.
        assert_eq!(
            outcome.records[4].raw.source_path_hint,
            "/data/tabla_performance/tabla_0001.jpg"
        );
        assert!(outcome.records.iter().all(|r| r.resolved_file_path.is_none()));
    }

    #[test]
    fn dropped_rows_are_counted_per_reason() {
        let outcome = MetadataReconciler::default()
            .reconcile(&[table("scraper", SCRAPER), table("final", FINAL)])
            .unwrap();
        assert_eq!(outcome.tables[0].dropped[&DropReason::MissingLabelAndPath], 1);
        assert_eq!(outcome.tables[1].dropped[&DropReason::MissingLabelAndPath], 1);
        assert_eq!(outcome.dropped()[&DropReason::MissingLabelAndPath], 2);
        let rows_read: usize = outcome.tables.iter().map(|t| t.rows_read).sum();
        assert_eq!(rows_read, outcome.records.len() + 2);
    }

    #[test]
    fn table_without_label_column_is_fatal() {
        let bad = table("bad", "Image Path,Source URL\nimg.jpg,http://x\n");
        let err = MetadataReconciler::default()
            .reconcile(&[table("scraper", SCRAPER), bad])
            .unwrap_err();
        assert!(matches!(err, CurateError::SchemaMismatch { ref table, .. } if table == "bad"));
    }

    #[test]
    fn duplicated_header_is_fatal() {
        let bad = table("dup", "category,Category,image_path\na,b,c.jpg\n");
        assert!(matches!(
            MetadataReconciler::default().reconcile(&[bad]),
            Err(CurateError::SchemaMismatch { .. })
        ));
    }

    #[test]
    fn custom_mapping_binds_renamed_columns() {
        let mapping = SchemaMapping {
            label: vec!["Tag".into()],
            path: vec!["File".into()],
            url: vec![],
        };
        let reconciler = MetadataReconciler::new(mapping, LabelNormalizer::default());
        let outcome = reconciler
            .reconcile(&[table("custom", "File,Tag\nd.jpg,dayan close up\n")])
            .unwrap();
        assert_eq!(outcome.records[0].canonical_label, CanonicalLabel::Dayan);
        assert_eq!(outcome.records[0].raw.source_path_hint, "d.jpg");
    }

    #[test]
    fn short_rows_are_padded_not_dropped() {
        let outcome = MetadataReconciler::default()
            .reconcile(&[table("short", "image_path,category,source_url\nonly_path.jpg\n")])
            .unwrap();
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.records[0].canonical_label, CanonicalLabel::Unknown);
    }

    #[test]
    fn reconciled_export_has_stable_header() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("refined/metadata_refined.csv");
        let outcome = MetadataReconciler::default()
            .reconcile(&[table("pre", PRE_CANONICAL)])
            .unwrap();
        write_reconciled_csv(&out, &outcome.records).unwrap();
        let text = std::fs::read_to_string(&out).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next(),
            Some("raw_label,canonical_label,source_path_hint,source_url")
        );
        assert_eq!(lines.next(), Some("snare drum kit,not_tabla,images/x/img_3.jpg,"));
    }
}
