use clap::Args;
use std::path::PathBuf;

/// Metadata tables and taxonomy shared by the curation binaries.
#[derive(Debug, Clone, Args)]
pub struct MetadataInputArgs {
    /// Metadata table to reconcile; repeat for several (defaults to config `metadata_tables`).
    #[arg(long = "metadata", value_name = "CSV")]
    pub metadata_tables: Vec<PathBuf>,
    /// Taxonomy TOML replacing the built-in label priority order.
    #[arg(long)]
    pub taxonomy: Option<PathBuf>,
}

impl MetadataInputArgs {
    /// Tables from the command line, or `fallback` when none were given.
    pub fn tables_or(&self, fallback: &[PathBuf]) -> Vec<PathBuf> {
        if self.metadata_tables.is_empty() {
            fallback.to_vec()
        } else {
            self.metadata_tables.clone()
        }
    }

    pub fn taxonomy_or(&self, fallback: Option<&PathBuf>) -> Option<PathBuf> {
        self.taxonomy.clone().or_else(|| fallback.cloned())
    }
}

/// Raw image storage searched when resolving records, in priority order.
#[derive(Debug, Clone, Args)]
pub struct RawStorageArgs {
    /// Raw image root; repeat for several (defaults to config `raw_roots`).
    #[arg(long = "raw-root", value_name = "DIR")]
    pub raw_roots: Vec<PathBuf>,
}

impl RawStorageArgs {
    pub fn roots_or(&self, fallback: &[PathBuf]) -> Vec<PathBuf> {
        if self.raw_roots.is_empty() {
            fallback.to_vec()
        } else {
            self.raw_roots.clone()
        }
    }
}

/// Dataset output location.
#[derive(Debug, Clone, Args)]
pub struct DatasetOutputArgs {
    /// Output root for label directories and the metadata table.
    #[arg(long)]
    pub output_root: Option<PathBuf>,
    /// Metadata table path; relative paths are taken from the output root.
    #[arg(long)]
    pub metadata_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// Run seed; the same seed and inputs reproduce the dataset.
    #[arg(long)]
    pub seed: Option<u64>,
    /// Worker threads for hashing and transforms.
    #[arg(long)]
    pub workers: Option<usize>,
}
