use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CurationManifestSchemaVersion {
    V1,
}

/// Inputs that determine a curation run's output, persisted next to the
/// metadata table so a run can be reproduced from its seed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurationManifest {
    pub schema_version: CurationManifestSchemaVersion,
    pub seed: u64,
    pub raw_roots: Vec<PathBuf>,
    pub metadata_tables: Vec<PathBuf>,
    pub output_root: PathBuf,
    pub canonical_size: (u32, u32),
    pub near_duplicate_threshold: u32,
    /// `None` only when enhancement was explicitly disabled.
    pub enhancement_model: Option<String>,
    pub enhancement_scale: Option<u32>,
    pub workers: usize,
    pub started_at_unix: f64,
}

impl CurationManifest {
    pub fn validate(&self) -> Result<(), String> {
        if self.started_at_unix.is_nan() || self.started_at_unix < 0.0 {
            return Err("started_at_unix must be non-negative".into());
        }
        if self.canonical_size.0 == 0 || self.canonical_size.1 == 0 {
            return Err("canonical_size must be non-zero".into());
        }
        if self.workers == 0 {
            return Err("workers cannot be zero".into());
        }
        if self.raw_roots.is_empty() {
            return Err("at least one raw root is required".into());
        }
        if self.enhancement_model.is_some() != self.enhancement_scale.is_some() {
            return Err("enhancement model and scale must be set together".into());
        }
        Ok(())
    }
}
