use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{bail, Context, Result};
use clap::Parser;
use cli_support::{DatasetOutputArgs, MetadataInputArgs, RawStorageArgs, RunArgs};
use data_contracts::{CurationManifest, CurationManifestSchemaVersion};
use tabla_dataset::{
    load_upscaler, reconcile_paths, validate_summary, write_reconciled_csv, write_report_json,
    AssembleConfig, DatasetAssembler, MetadataReconciler, TransformPipeline, ValidationOutcome,
    ValidationThresholds,
};
use tabla_tools::{init_tracing, load_normalizer, write_json, ToolConfig};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "curate",
    about = "Reconcile metadata, deduplicate, transform and assemble the tabla dataset"
)]
struct Args {
    #[command(flatten)]
    inputs: MetadataInputArgs,
    #[command(flatten)]
    raw: RawStorageArgs,
    #[command(flatten)]
    output: DatasetOutputArgs,
    #[command(flatten)]
    run: RunArgs,
    /// Enhancement model artifact (defaults to config `model_path`).
    #[arg(long)]
    model: Option<PathBuf>,
    /// Build the pipeline without the enhancement stage.
    #[arg(long, default_value_t = false)]
    skip_enhancement: bool,
    /// Hamming distance at or below which two images are near duplicates.
    #[arg(long)]
    near_duplicate_threshold: Option<u32>,
    /// Also export the reconciled records to this CSV.
    #[arg(long)]
    reconciled_out: Option<PathBuf>,
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let cfg = ToolConfig::load();
    let started_at_unix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0);

    let tables = args.inputs.tables_or(&cfg.metadata_tables);
    let raw_roots = args.raw.roots_or(&cfg.raw_roots);
    let output_root = args.output.output_root.clone().unwrap_or(cfg.output_root.clone());
    let metadata_file = args
        .output
        .metadata_file
        .clone()
        .unwrap_or(cfg.metadata_file.clone());
    let seed = args.run.seed.unwrap_or(cfg.seed);
    let workers = args.run.workers.unwrap_or(cfg.workers).max(1);
    let mut dedup = cfg.dedup;
    if let Some(t) = args.near_duplicate_threshold {
        dedup.near_duplicate_threshold = t;
    }
    if tables.is_empty() {
        bail!("no metadata tables given (use --metadata or config metadata_tables)");
    }

    // Everything that can abort the run happens before the first write.
    let normalizer = load_normalizer(args.inputs.taxonomy_or(cfg.taxonomy_path.as_ref()).as_deref())?;
    let upscaler = if args.skip_enhancement {
        warn!("enhancement disabled by --skip-enhancement");
        None
    } else {
        let model = args.model.clone().unwrap_or(cfg.model_path.clone());
        Some(load_upscaler(&model).with_context(|| format!("load model {}", model.display()))?)
    };
    let pipeline = TransformPipeline::new(cfg.pipeline.clone(), upscaler.clone())
        .context("build transform pipeline")?;
    let reconciler = MetadataReconciler::new(cfg.schema.clone(), normalizer);
    let reconciled = reconcile_paths(&reconciler, &tables).context("reconcile metadata")?;

    let manifest = CurationManifest {
        schema_version: CurationManifestSchemaVersion::V1,
        seed,
        raw_roots: raw_roots.clone(),
        metadata_tables: tables.clone(),
        output_root: output_root.clone(),
        canonical_size: cfg.pipeline.canonical_size,
        near_duplicate_threshold: dedup.near_duplicate_threshold,
        enhancement_model: upscaler.as_ref().map(|u| u.name().to_string()),
        enhancement_scale: upscaler.as_ref().map(|u| u.scale()),
        workers,
        started_at_unix,
    };
    if let Err(msg) = manifest.validate() {
        bail!("invalid run manifest: {msg}");
    }

    if let Some(path) = &args.reconciled_out {
        write_reconciled_csv(path, &reconciled.records)
            .with_context(|| format!("write {}", path.display()))?;
        info!("reconciled records -> {}", path.display());
    }

    let assembler = DatasetAssembler::new(
        AssembleConfig {
            output_root: output_root.clone(),
            metadata_file,
            seed,
            workers,
            dedup,
            ..Default::default()
        },
        pipeline,
    );
    let mut outcome = assembler
        .assemble(&reconciled.records, &raw_roots)
        .context("assemble dataset")?;
    outcome.summary.dropped_rows = reconciled.dropped();

    let report = validate_summary(outcome.summary, &ValidationThresholds::from_env());
    println!("{}", report.summary.render());
    println!("validation: {}", report.outcome.as_str());
    for reason in &report.reasons {
        println!("  - {reason}");
    }
    println!("metadata: {}", outcome.metadata_path.display());

    let summary_path = outcome
        .metadata_path
        .parent()
        .map(|p| p.join("curation_summary.json"))
        .unwrap_or_else(|| output_root.join("curation_summary.json"));
    write_report_json(&summary_path, &report)
        .with_context(|| format!("write {}", summary_path.display()))?;
    write_json(&output_root.join("curation_manifest.json"), &manifest)?;

    if report.outcome == ValidationOutcome::Fail {
        bail!("dataset validation failed");
    }
    Ok(())
}
