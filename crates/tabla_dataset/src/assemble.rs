//! Dataset assembly: resolve records to raw files, deduplicate, expand each
//! unique image into variants, and write images plus the metadata table.

use crate::aug::{mix_seed, TransformPipeline};
use crate::dedup::{DedupConfig, Deduplicator};
use crate::hash::Fingerprint;
use crate::types::{CurateError, CurateResult, CurationSummary};
use data_contracts::{CanonicalLabel, DatasetEntry, ReconciledRecord, DATASET_ENTRY_COLUMNS};
use rayon::prelude::*;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Two workers per available core.
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get() * 2)
        .unwrap_or(4)
}

#[derive(Debug, Clone)]
pub struct AssembleConfig {
    pub output_root: PathBuf,
    /// Images land in `<output_root>/<images_dir>/<canonical_label>/`.
    pub images_dir: String,
    /// Relative paths are taken from `output_root`.
    pub metadata_file: PathBuf,
    pub filename_prefix: String,
    /// Output extension; selects the encoder.
    pub extension: String,
    pub seed: u64,
    pub workers: usize,
    pub dedup: DedupConfig,
}

impl Default for AssembleConfig {
    fn default() -> Self {
        Self {
            output_root: PathBuf::from("data_training"),
            images_dir: "images".to_string(),
            metadata_file: PathBuf::from("metadata.csv"),
            filename_prefix: "tabla".to_string(),
            extension: "jpg".to_string(),
            seed: 0,
            workers: default_workers(),
            dedup: DedupConfig::default(),
        }
    }
}

impl AssembleConfig {
    pub fn metadata_path(&self) -> PathBuf {
        if self.metadata_file.is_absolute() {
            self.metadata_file.clone()
        } else {
            self.output_root.join(&self.metadata_file)
        }
    }

    pub fn label_dir(&self, label: CanonicalLabel) -> PathBuf {
        self.output_root.join(&self.images_dir).join(label.as_str())
    }
}

fn is_readable_file(path: &Path) -> bool {
    path.is_file() && File::open(path).is_ok()
}

/// Raw storage roots with their immediate subdirectories, scanned once.
#[derive(Debug, Clone, Default)]
pub struct RawStorage {
    roots: Vec<(PathBuf, Vec<PathBuf>)>,
}

impl RawStorage {
    pub fn scan(raw_roots: &[PathBuf]) -> Self {
        let roots = raw_roots
            .iter()
            .map(|root| {
                let mut subdirs: Vec<PathBuf> = match fs::read_dir(root) {
                    Ok(entries) => entries
                        .filter_map(Result::ok)
                        .map(|e| e.path())
                        .filter(|p| p.is_dir())
                        .collect(),
                    Err(err) => {
                        warn!("raw root {} is not readable: {err}", root.display());
                        Vec::new()
                    }
                };
                subdirs.sort();
                (root.clone(), subdirs)
            })
            .collect();
        Self { roots }
    }

    /// A record that already carries a resolved path keeps it only while the
    /// file is readable; it is never searched again. Otherwise the first
    /// readable candidate wins: the hint as an absolute path, then per root
    /// `root/hint`, `root/<file>`, `root/<subdir>/<file>`.
    pub fn resolve(&self, record: &ReconciledRecord) -> Option<PathBuf> {
        if let Some(p) = &record.resolved_file_path {
            return is_readable_file(p).then(|| p.clone());
        }
        let hint = record.raw.source_path_hint.trim();
        if hint.is_empty() {
            return None;
        }
        let hint_path = Path::new(hint);
        if hint_path.is_absolute() && is_readable_file(hint_path) {
            return Some(hint_path.to_path_buf());
        }
        let file_name = record.raw.file_name()?;
        for (root, subdirs) in &self.roots {
            if !hint_path.is_absolute() {
                let candidate = root.join(hint_path);
                if is_readable_file(&candidate) {
                    return Some(candidate);
                }
            }
            let candidate = root.join(file_name);
            if is_readable_file(&candidate) {
                return Some(candidate);
            }
            for sub in subdirs {
                let candidate = sub.join(file_name);
                if is_readable_file(&candidate) {
                    return Some(candidate);
                }
            }
        }
        None
    }
}

#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub resolved: Vec<ReconciledRecord>,
    pub unresolved: Vec<ReconciledRecord>,
}

impl Resolution {
    pub fn misses(&self) -> usize {
        self.unresolved.len()
    }
}

/// Resolve every record against `raw_roots`, preserving input order.
pub fn resolve_records(records: &[ReconciledRecord], raw_roots: &[PathBuf]) -> Resolution {
    let storage = RawStorage::scan(raw_roots);
    let found: Vec<Option<PathBuf>> = records.par_iter().map(|r| storage.resolve(r)).collect();
    let mut out = Resolution::default();
    for (record, path) in records.iter().zip(found) {
        let mut record = record.clone();
        match path {
            Some(p) => {
                record.resolved_file_path = Some(p);
                out.resolved.push(record);
            }
            None => {
                warn!(
                    "unresolved file for record {:?} (hint {:?})",
                    record.raw.raw_label, record.raw.source_path_hint
                );
                record.resolved_file_path = None;
                out.unresolved.push(record);
            }
        }
    }
    out
}

/// A record whose file survived deduplication.
#[derive(Debug, Clone)]
pub struct UniqueImage {
    /// Position in the kept sequence; keys output names and the transform seed.
    pub source_index: usize,
    pub record: ReconciledRecord,
    pub path: PathBuf,
    pub fingerprint: Fingerprint,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variant {
    pub source_index: usize,
    pub source_path: PathBuf,
    pub canonical_label: CanonicalLabel,
    pub variant_index: usize,
    pub transform_ops: Vec<String>,
    pub output_path: PathBuf,
}

#[derive(Debug, Clone, Default)]
pub struct AssembleOutcome {
    pub entries: Vec<DatasetEntry>,
    pub misses: usize,
    pub variants: Vec<Variant>,
    pub summary: CurationSummary,
    pub metadata_path: PathBuf,
}

/// Append-only writer for the final metadata table.
pub struct MetadataWriter {
    path: PathBuf,
    wtr: csv::Writer<File>,
}

impl MetadataWriter {
    pub fn create(path: &Path) -> CurateResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| CurateError::io(parent, e))?;
        }
        let csv_err = |e| CurateError::Csv {
            path: path.to_path_buf(),
            source: e,
        };
        let mut wtr = csv::Writer::from_path(path).map_err(csv_err)?;
        wtr.write_record(DATASET_ENTRY_COLUMNS).map_err(csv_err)?;
        wtr.flush().map_err(|e| CurateError::io(path, e))?;
        Ok(Self {
            path: path.to_path_buf(),
            wtr,
        })
    }

    /// Append one row. Refuses entries whose file is not on disk.
    pub fn append(&mut self, entry: &DatasetEntry) -> CurateResult<()> {
        if !entry.exists_on_disk() {
            return Err(CurateError::Other(format!(
                "refusing to index missing file {}",
                entry.absolute_path.display()
            )));
        }
        let path_str = entry.absolute_path.to_string_lossy();
        self.wtr
            .write_record([
                entry.filename.as_str(),
                entry.canonical_label.as_str(),
                path_str.as_ref(),
            ])
            .map_err(|e| CurateError::Csv {
                path: self.path.clone(),
                source: e,
            })
    }

    pub fn flush(&mut self) -> CurateResult<()> {
        self.wtr.flush().map_err(|e| CurateError::io(&self.path, e))
    }
}

fn install<T: Send>(pool: &Option<rayon::ThreadPool>, op: impl FnOnce() -> T + Send) -> T {
    match pool {
        Some(pool) => pool.install(op),
        None => op(),
    }
}

struct ImageResult {
    written: Vec<Variant>,
    write_failures: usize,
    transform_failed: bool,
}

pub struct DatasetAssembler {
    config: AssembleConfig,
    pipeline: TransformPipeline,
    deduplicator: Deduplicator,
}

impl DatasetAssembler {
    pub fn new(config: AssembleConfig, pipeline: TransformPipeline) -> Self {
        let deduplicator = Deduplicator::new(config.dedup);
        Self {
            config,
            pipeline,
            deduplicator,
        }
    }

    pub fn config(&self) -> &AssembleConfig {
        &self.config
    }

    pub fn pipeline(&self) -> &TransformPipeline {
        &self.pipeline
    }

    /// Deterministic, collision-free name for one variant of one source.
    pub fn variant_file_name(&self, source_index: usize, variant_index: usize) -> String {
        format!(
            "{}_{:05}_v{}.{}",
            self.config.filename_prefix, source_index, variant_index, self.config.extension
        )
    }

    pub fn assemble(
        &self,
        reconciled: &[ReconciledRecord],
        raw_roots: &[PathBuf],
    ) -> CurateResult<AssembleOutcome> {
        let pool = match rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.workers.max(1))
            .build()
        {
            Ok(pool) => Some(pool),
            Err(err) => {
                warn!("worker pool unavailable ({err}); using the global pool");
                None
            }
        };

        let mut summary = CurationSummary {
            records_considered: reconciled.len(),
            ..Default::default()
        };

        let resolution = install(&pool, || resolve_records(reconciled, raw_roots));
        summary.records_resolved = resolution.resolved.len();
        summary.misses = resolution.misses();
        info!(
            "resolved {} of {} records ({} unresolved)",
            summary.records_resolved, summary.records_considered, summary.misses
        );

        let paths: Vec<PathBuf> = resolution
            .resolved
            .iter()
            .filter_map(|r| r.resolved_file_path.clone())
            .collect();
        let dedup = install(&pool, || self.deduplicator.dedupe(&paths));
        for rejection in &dedup.rejected {
            summary.record_reject(rejection.reason);
        }
        let unique: Vec<UniqueImage> = dedup
            .kept
            .into_iter()
            .enumerate()
            .map(|(source_index, kept)| UniqueImage {
                source_index,
                record: resolution.resolved[kept.input_index].clone(),
                path: kept.path,
                fingerprint: kept.fingerprint,
            })
            .collect();
        summary.unique_images = unique.len();
        info!(
            "{} unique images ({} exact, {} near duplicates, {} unreadable)",
            summary.unique_images,
            summary.exact_duplicates,
            summary.near_duplicates,
            summary.decode_errors
        );

        let metadata_path = self.config.metadata_path();
        fs::create_dir_all(&self.config.output_root)
            .map_err(|e| CurateError::io(&self.config.output_root, e))?;
        // The metadata table is rewritten, so images from a previous run go too.
        let images_root = self.config.output_root.join(&self.config.images_dir);
        if images_root.exists() {
            info!("clearing previous images under {}", images_root.display());
            fs::remove_dir_all(&images_root).map_err(|e| CurateError::io(&images_root, e))?;
        }
        let mut writer = MetadataWriter::create(&metadata_path)?;

        info!("transforming with {}", self.pipeline.describe());
        let results: Vec<ImageResult> =
            install(&pool, || unique.par_iter().map(|u| self.process(u)).collect());

        // Single writer: rows go out in (source, variant) order, each after its file.
        let mut outcome = AssembleOutcome {
            misses: summary.misses,
            metadata_path: metadata_path.clone(),
            ..Default::default()
        };
        for result in results {
            if result.transform_failed {
                summary.transform_failures += 1;
            }
            summary.write_failures += result.write_failures;
            for variant in result.written {
                let absolute_path = match fs::canonicalize(&variant.output_path) {
                    Ok(p) => p,
                    Err(err) => {
                        warn!("{} vanished before indexing: {err}", variant.output_path.display());
                        summary.write_failures += 1;
                        continue;
                    }
                };
                let entry = DatasetEntry {
                    filename: self.variant_file_name(variant.source_index, variant.variant_index),
                    canonical_label: variant.canonical_label,
                    absolute_path,
                };
                if let Err(err) = writer.append(&entry) {
                    warn!("{err}");
                    summary.write_failures += 1;
                    continue;
                }
                *summary
                    .images_by_label
                    .entry(entry.canonical_label)
                    .or_insert(0) += 1;
                summary.variants_written += 1;
                outcome.entries.push(entry);
                outcome.variants.push(variant);
            }
            writer.flush()?;
        }
        info!(
            "wrote {} variants to {} ({} transform failures, {} write failures)",
            summary.variants_written,
            metadata_path.display(),
            summary.transform_failures,
            summary.write_failures
        );
        outcome.summary = summary;
        Ok(outcome)
    }

    fn process(&self, unique: &UniqueImage) -> ImageResult {
        let seed = mix_seed(self.config.seed, unique.source_index as u64);
        let variants = match self.pipeline.transform_path(&unique.path, seed) {
            Ok(v) => v,
            Err(err) => {
                warn!("transform failed for {}: {err}", unique.path.display());
                return ImageResult {
                    written: Vec::new(),
                    write_failures: 0,
                    transform_failed: true,
                };
            }
        };
        let label = unique.record.canonical_label;
        let dir = self.config.label_dir(label);
        if let Err(err) = fs::create_dir_all(&dir) {
            warn!("cannot create {}: {err}", dir.display());
            return ImageResult {
                written: Vec::new(),
                write_failures: variants.len(),
                transform_failed: false,
            };
        }
        let mut written = Vec::with_capacity(variants.len());
        let mut write_failures = 0;
        for v in variants {
            let output_path = dir.join(self.variant_file_name(unique.source_index, v.variant_index));
            if let Err(source) = v.image.save(&output_path) {
                let err = CurateError::Encode {
                    path: output_path,
                    source,
                };
                warn!("{err}");
                write_failures += 1;
                continue;
            }
            debug!("{} <- {}", output_path.display(), v.ops.join(","));
            written.push(Variant {
                source_index: unique.source_index,
                source_path: unique.path.clone(),
                canonical_label: label,
                variant_index: v.variant_index,
                transform_ops: v.ops,
                output_path,
            });
        }
        ImageResult {
            written,
            write_failures,
            transform_failed: false,
        }
    }
}
