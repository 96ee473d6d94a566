use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tabla_dataset::audit_metadata;
use tabla_tools::{init_tracing, ToolConfig};

#[derive(Parser, Debug)]
#[command(
    name = "audit_metadata",
    about = "Read back a final metadata table and check that every row's file exists"
)]
struct Args {
    /// Metadata table (defaults to the configured output metadata file).
    #[arg(long)]
    metadata: Option<PathBuf>,
    /// Number of missing paths to list.
    #[arg(long, default_value_t = 10)]
    show_missing: usize,
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let path = match args.metadata {
        Some(p) => p,
        None => ToolConfig::load().metadata_path(),
    };
    let audit = audit_metadata(&path).with_context(|| format!("audit {}", path.display()))?;

    println!("rows: {}", audit.rows);
    for (label, count) in &audit.by_label {
        println!("  {label}: {count}");
    }
    println!("invalid rows: {}", audit.invalid_rows);
    println!("missing files: {}", audit.missing_files.len());
    for missing in audit.missing_files.iter().take(args.show_missing) {
        println!("  {}", missing.display());
    }
    if !audit.is_clean() {
        bail!("metadata table {} has problems", path.display());
    }
    Ok(())
}
