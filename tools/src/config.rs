use std::path::{Path, PathBuf};

use serde::Deserialize;
use tabla_dataset::{default_workers, DedupConfig, IndexKind, SchemaMapping, TransformConfig};
use tracing::warn;

const DEFAULT_CONFIG_NAME: &str = "tabla-tools.toml";
const CONFIG_ENV: &str = "TABLA_TOOLS_CONFIG";

#[derive(Debug, Clone)]
pub struct ToolConfig {
    pub raw_roots: Vec<PathBuf>,
    pub metadata_tables: Vec<PathBuf>,
    pub output_root: PathBuf,
    /// Relative paths are taken from `output_root`.
    pub metadata_file: PathBuf,
    pub model_path: PathBuf,
    pub taxonomy_path: Option<PathBuf>,
    pub seed: u64,
    pub workers: usize,
    pub pipeline: TransformConfig,
    pub dedup: DedupConfig,
    pub schema: SchemaMapping,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            raw_roots: vec![PathBuf::from("data/raw")],
            metadata_tables: vec![PathBuf::from("data/metadata.csv")],
            output_root: PathBuf::from("data_training"),
            metadata_file: PathBuf::from("metadata.csv"),
            model_path: PathBuf::from("models/ESPCN_x2.json"),
            taxonomy_path: None,
            seed: 0,
            workers: default_workers(),
            pipeline: TransformConfig::default(),
            dedup: DedupConfig::default(),
            schema: SchemaMapping::default(),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct ToolConfigFile {
    raw_roots: Option<Vec<String>>,
    metadata_tables: Option<Vec<String>>,
    output_root: Option<String>,
    metadata_file: Option<String>,
    model_path: Option<String>,
    taxonomy_path: Option<String>,
    seed: Option<u64>,
    workers: Option<usize>,
    pipeline: Option<PipelineSection>,
    dedup: Option<DedupSection>,
    schema: Option<SchemaMapping>,
}

#[derive(Debug, Deserialize, Default)]
struct PipelineSection {
    canonical_size: Option<[u32; 2]>,
    crop_size: Option<[u32; 2]>,
    jitter_prob: Option<f32>,
    jitter_strength: Option<f32>,
    noise_prob: Option<f32>,
    noise_weight: Option<f32>,
    crop_prob: Option<f32>,
    denoise: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct DedupSection {
    near_duplicate_threshold: Option<u32>,
    index: Option<IndexKind>,
}

impl PipelineSection {
    fn apply(self, mut cfg: TransformConfig) -> TransformConfig {
        if let Some([w, h]) = self.canonical_size {
            cfg.canonical_size = (w, h);
        }
        if let Some([w, h]) = self.crop_size {
            cfg.crop_size = (w, h);
        }
        cfg.jitter_prob = self.jitter_prob.unwrap_or(cfg.jitter_prob);
        cfg.jitter_strength = self.jitter_strength.unwrap_or(cfg.jitter_strength);
        cfg.noise_prob = self.noise_prob.unwrap_or(cfg.noise_prob);
        cfg.noise_weight = self.noise_weight.unwrap_or(cfg.noise_weight);
        cfg.crop_prob = self.crop_prob.unwrap_or(cfg.crop_prob);
        if self.denoise == Some(false) {
            cfg.denoise = None;
        }
        cfg
    }
}

impl ToolConfig {
    pub fn load() -> Self {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            let mut cfg = Self::from_path(Path::new(&path)).unwrap_or_default();
            cfg.warn_if_invalid();
            return cfg;
        }
        let mut cfg = Self::from_path(Path::new(DEFAULT_CONFIG_NAME)).unwrap_or_default();
        cfg.warn_if_invalid();
        cfg
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }
        let raw = std::fs::read_to_string(path).ok()?;
        match toml::from_str::<ToolConfigFile>(&raw) {
            Ok(file) => Some(Self::from_file(file)),
            Err(err) => {
                warn!("tools config {}: {err}; using defaults", path.display());
                None
            }
        }
    }

    fn from_file(file: ToolConfigFile) -> Self {
        let defaults = ToolConfig::default();
        let paths = |v: Vec<String>| v.iter().map(|p| expand_path(p)).collect::<Vec<_>>();
        let dedup = match file.dedup {
            Some(d) => DedupConfig {
                near_duplicate_threshold: d
                    .near_duplicate_threshold
                    .unwrap_or(defaults.dedup.near_duplicate_threshold),
                index: d.index.unwrap_or(defaults.dedup.index),
            },
            None => defaults.dedup,
        };

        ToolConfig {
            raw_roots: file.raw_roots.map(paths).unwrap_or(defaults.raw_roots),
            metadata_tables: file
                .metadata_tables
                .map(paths)
                .unwrap_or(defaults.metadata_tables),
            output_root: file
                .output_root
                .map(|v| expand_path(&v))
                .unwrap_or(defaults.output_root),
            metadata_file: file
                .metadata_file
                .map(|v| expand_path(&v))
                .unwrap_or(defaults.metadata_file),
            model_path: file
                .model_path
                .map(|v| expand_path(&v))
                .unwrap_or(defaults.model_path),
            taxonomy_path: file.taxonomy_path.map(|v| expand_path(&v)),
            seed: file.seed.unwrap_or(defaults.seed),
            workers: file.workers.unwrap_or(defaults.workers),
            pipeline: file
                .pipeline
                .map(|p| p.apply(TransformConfig::default()))
                .unwrap_or(defaults.pipeline),
            dedup,
            schema: file.schema.unwrap_or(defaults.schema),
        }
    }

    /// Report bad values and fall back to defaults for them.
    pub fn warn_if_invalid(&mut self) {
        if self.raw_roots.is_empty() {
            warn!("tools config: raw_roots is empty; every record will be unresolved");
        }
        if self.workers == 0 {
            warn!("tools config: workers = 0; using {}", default_workers());
            self.workers = default_workers();
        }
        if let Err(err) = self.pipeline.validate() {
            warn!("tools config: {err}; using default pipeline settings");
            self.pipeline = TransformConfig::default();
        }
        if self.schema.label.is_empty() || self.schema.path.is_empty() {
            warn!("tools config: schema aliases for label/path are empty; using defaults");
            self.schema = SchemaMapping::default();
        }
    }

    /// Metadata table path resolved against `output_root`.
    pub fn metadata_path(&self) -> PathBuf {
        if self.metadata_file.is_absolute() {
            self.metadata_file.clone()
        } else {
            self.output_root.join(&self.metadata_file)
        }
    }
}

pub(crate) fn expand_path(raw: &str) -> PathBuf {
    let mut out = raw.to_string();
    if let Some(stripped) = out.strip_prefix("~") {
        if let Ok(home) = std::env::var("HOME") {
            out = format!("{home}{stripped}");
        }
    }
    PathBuf::from(expand_env(&out))
}

fn expand_env(input: &str) -> String {
    let mut out = String::new();
    let mut rest = input;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let key = &after[..end];
                match std::env::var(key) {
                    Ok(val) => out.push_str(&val),
                    Err(_) => out.push_str(&format!("${{{key}}}")),
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}
