use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use tabla_dataset::{LabelNormalizer, Taxonomy};
use tracing::info;

/// Log to stderr; `RUST_LOG` overrides the `info` default.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// Normalizer over the taxonomy at `path`, or the built-in one.
pub fn load_normalizer(path: Option<&Path>) -> Result<LabelNormalizer> {
    let taxonomy = match path {
        Some(p) => {
            let t = Taxonomy::from_path(p)
                .with_context(|| format!("load taxonomy {}", p.display()))?;
            info!("taxonomy {} ({} categories)", p.display(), t.categories().len());
            t
        }
        None => Taxonomy::default(),
    };
    Ok(LabelNormalizer::new(taxonomy))
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    let json = serde_json::to_vec_pretty(value).context("serialize json")?;
    std::fs::write(path, json).with_context(|| format!("write {}", path.display()))
}
