use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use cli_support::MetadataInputArgs;
use tabla_dataset::{reconcile_paths, write_reconciled_csv, MetadataReconciler};
use tabla_tools::{init_tracing, load_normalizer, ToolConfig};

#[derive(Parser, Debug)]
#[command(
    name = "reconcile_metadata",
    about = "Merge metadata tables and map their labels onto the canonical taxonomy"
)]
struct Args {
    #[command(flatten)]
    inputs: MetadataInputArgs,
    /// Output CSV with raw and canonical labels.
    #[arg(long, default_value = "refined_metadata.csv")]
    output: PathBuf,
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let cfg = ToolConfig::load();

    let tables = args.inputs.tables_or(&cfg.metadata_tables);
    let normalizer = load_normalizer(args.inputs.taxonomy_or(cfg.taxonomy_path.as_ref()).as_deref())?;
    let reconciler = MetadataReconciler::new(cfg.schema.clone(), normalizer);
    let outcome = reconcile_paths(&reconciler, &tables).context("reconcile metadata")?;
    write_reconciled_csv(&args.output, &outcome.records)
        .with_context(|| format!("write {}", args.output.display()))?;

    for table in &outcome.tables {
        let dropped: usize = table.dropped.values().sum();
        println!(
            "{}: rows={} records={} dropped={}",
            table.name, table.rows_read, table.records, dropped
        );
    }
    println!("records: {}", outcome.records.len());
    for (label, count) in outcome.label_counts() {
        println!("  {label}: {count}");
    }
    println!("written: {}", args.output.display());
    Ok(())
}
