//! Shared data contracts for raw metadata rows, reconciled records, dataset
//! entries, and curation run manifests.

pub mod manifest;
pub mod metadata;

pub use manifest::{CurationManifest, CurationManifestSchemaVersion};
pub use metadata::{
    CanonicalLabel, DatasetEntry, RawRecord, ReconciledRecord, ValidationError,
    DATASET_ENTRY_COLUMNS,
};
