use data_contracts::{
    CanonicalLabel, CurationManifest, CurationManifestSchemaVersion, DatasetEntry, RawRecord,
    ValidationError,
};
use std::path::PathBuf;

#[test]
fn record_without_label_or_path_rejected() {
    let rec = RawRecord {
        raw_label: "  ".into(),
        source_path_hint: "".into(),
        source_url: Some("https://example.com/a.jpg".into()),
    };
    assert_eq!(rec.validate(), Err(ValidationError::MissingLabelAndPath));
}

#[test]
fn record_with_only_path_passes() {
    let rec = RawRecord {
        raw_label: "".into(),
        source_path_hint: "images/tabla/tabla_1.jpg".into(),
        source_url: None,
    };
    assert!(rec.validate().is_ok());
}

#[test]
fn relative_entry_path_rejected() {
    let entry = DatasetEntry {
        filename: "tabla_00000_v0.jpg".into(),
        canonical_label: CanonicalLabel::Set,
        absolute_path: PathBuf::from("images/set/tabla_00000_v0.jpg"),
    };
    let err = entry.validate().unwrap_err();
    assert!(matches!(err, ValidationError::RelativePath(_)));
}

#[test]
fn entry_filename_must_match_path() {
    let root = std::env::temp_dir();
    let entry = DatasetEntry {
        filename: "tabla_00000_v1.jpg".into(),
        canonical_label: CanonicalLabel::Dayan,
        absolute_path: root.join("tabla_00000_v0.jpg"),
    };
    let err = entry.validate().unwrap_err();
    assert!(matches!(err, ValidationError::FilenameMismatch { .. }));
}

#[test]
fn labels_serialize_snake_case() {
    let json = serde_json::to_string(&CanonicalLabel::TablaPerformance).unwrap();
    assert_eq!(json, "\"tabla_performance\"");
}

#[test]
fn manifest_requires_paired_enhancement_fields() {
    let manifest = CurationManifest {
        schema_version: CurationManifestSchemaVersion::V1,
        seed: 7,
        raw_roots: vec![PathBuf::from("raw")],
        metadata_tables: vec![],
        output_root: PathBuf::from("out"),
        canonical_size: (256, 256),
        near_duplicate_threshold: 0,
        enhancement_model: Some("espcn".into()),
        enhancement_scale: None,
        workers: 4,
        started_at_unix: 0.0,
    };
    assert!(manifest.validate().is_err());
    let manifest = CurationManifest {
        enhancement_scale: Some(2),
        ..manifest
    };
    assert!(manifest.validate().is_ok());
}
