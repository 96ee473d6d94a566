//! Curation pipeline for the tabla image dataset.
//!
//! This crate provides utilities for:
//! - Content fingerprinting and duplicate rejection
//! - Mapping free-text labels onto the canonical taxonomy
//! - Reconciling heterogeneous metadata tables
//! - Canonicalization, augmentation and enhancement of images
//! - Assembling label-organized output with a metadata table

// Module declarations
pub mod assemble;
pub mod aug;
pub mod dedup;
pub mod hash;
pub mod labels;
pub mod reconcile;
pub mod types;
pub mod upscale;
pub mod validation;

// Re-export public API
pub use assemble::{
    default_workers, resolve_records, AssembleConfig, AssembleOutcome, DatasetAssembler,
    MetadataWriter, Variant,
};
pub use aug::{mix_seed, TransformConfig, TransformPipeline, TransformPipelineBuilder};
pub use dedup::{DedupConfig, DedupOutcome, Deduplicator, IndexKind};
pub use hash::{distance, ContentHasher, ExactDigest, Fingerprint, PerceptualHash};
pub use labels::{LabelNormalizer, Taxonomy};
pub use reconcile::{
    reconcile_paths, write_reconciled_csv, MetadataReconciler, RawTable, ReconcileOutcome,
    SchemaMapping,
};
pub use types::*;
pub use upscale::{load_upscaler, ResampleFilter, Upscaler, UpscalerArtifact};
pub use validation::{audit_metadata, validate_summary, write_report_json, MetadataAudit};
