//! Integration tests for end-to-end tabla_dataset workflows.
//!
//! These tests drive the stages together:
//! 1. Metadata tables → reconciled records
//! 2. Records → resolution → dedup → transform → dataset on disk
//! 3. Dataset on disk → validation and read-back audit

use data_contracts::CanonicalLabel;
use image::{Rgb, RgbImage};
use std::fs;
use std::path::{Path, PathBuf};
use tabla_dataset::{
    audit_metadata, load_upscaler, reconcile_paths, validate_summary, AssembleConfig,
    DatasetAssembler, MetadataReconciler, TransformPipelineBuilder, ValidationOutcome,
    ValidationThresholds,
};

/// 36x32 image of 4x4 blocks with pseudo-random shades; distinct seeds give
/// distinct perceptual hashes.
fn block_image(seed: u64) -> RgbImage {
    let mut state = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
    let mut shades = [[0u8; 9]; 8];
    for row in shades.iter_mut() {
        for cell in row.iter_mut() {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            *cell = (state >> 56) as u8;
        }
    }
    RgbImage::from_fn(36, 32, |x, y| {
        let v = shades[(y / 4) as usize][(x / 4) as usize];
        Rgb([v, v / 2, 255 - v])
    })
}

fn save(path: &Path, img: &RgbImage) -> anyhow::Result<()> {
    fs::create_dir_all(path.parent().unwrap())?;
    img.save(path)?;
    Ok(())
}

struct Fixture {
    _tmp: tempfile::TempDir,
    raw: PathBuf,
    tables: Vec<PathBuf>,
    model: PathBuf,
    out: PathBuf,
}

fn fixture() -> anyhow::Result<Fixture> {
    let tmp = tempfile::tempdir()?;
    let raw = tmp.path().join("raw");
    save(&raw.join("dayan/d1.png"), &block_image(1))?;
    save(&raw.join("bayan/b1.png"), &block_image(2))?;
    save(&raw.join("set/s1.png"), &block_image(3))?;
    save(&raw.join("set/s1_copy.png"), &block_image(3))?;
    fs::create_dir_all(raw.join("misc"))?;
    fs::write(raw.join("misc/broken.png"), b"definitely not a png")?;

    let scraped = tmp.path().join("scraped.csv");
    fs::write(
        &scraped,
        "category,image_path,source_url\n\
         Dayan right hand drum,dayan/d1.png,https://example.org/d1\n\
         bayan,b1.png,\n\
         tabla drum,set/s1.png,\n\
         tabla drum,set/s1_copy.png,\n\
         ,,\n",
    )?;
    let manual = tmp.path().join("manual.csv");
    fs::write(
        &manual,
        "label,filename\n\
         snare drum,broken.png\n\
         tabla,missing.png\n",
    )?;

    let model = tmp.path().join("enhance_x2.json");
    fs::write(
        &model,
        r#"{"name":"catmull_x2","scale":2,"filter":"catmull_rom"}"#,
    )?;

    let out = tmp.path().join("out");
    Ok(Fixture {
        _tmp: tmp,
        raw,
        tables: vec![scraped, manual],
        model,
        out,
    })
}

fn run(fx: &Fixture, out: &Path, seed: u64) -> anyhow::Result<tabla_dataset::AssembleOutcome> {
    let reconciled = reconcile_paths(&MetadataReconciler::default(), &fx.tables)?;
    let pipeline = TransformPipelineBuilder::new()
        .canonical_size((32, 32))
        .crop(0.5, (24, 24))
        .upscaler(load_upscaler(&fx.model)?)
        .build()?;
    let assembler = DatasetAssembler::new(
        AssembleConfig {
            output_root: out.to_path_buf(),
            extension: "png".into(),
            seed,
            workers: 3,
            ..Default::default()
        },
        pipeline,
    );
    let mut outcome = assembler.assemble(&reconciled.records, &[fx.raw.clone()])?;
    outcome.summary.dropped_rows = reconciled.dropped();
    Ok(outcome)
}

#[test]
fn workflow_tables_to_dataset() -> anyhow::Result<()> {
    let fx = fixture()?;
    let outcome = run(&fx, &fx.out, 7)?;
    let s = &outcome.summary;

    assert_eq!(s.dropped_total(), 1);
    assert_eq!(s.records_considered, 6);
    assert_eq!(s.misses, 1);
    assert_eq!(s.records_resolved + s.misses, s.records_considered);
    assert_eq!(s.exact_duplicates, 1);
    assert_eq!(s.decode_errors, 1);
    assert_eq!(s.unique_images, 3);
    assert_eq!(s.variants_written, 18);
    assert_eq!(outcome.entries.len(), 18);
    assert_eq!(s.images_by_label[&CanonicalLabel::Dayan], 6);
    assert_eq!(s.images_by_label[&CanonicalLabel::Bayan], 6);
    assert_eq!(s.images_by_label[&CanonicalLabel::Set], 6);

    for variant in &outcome.variants {
        let last = variant.transform_ops.last().unwrap();
        assert!(variant.transform_ops.iter().any(|op| op == "enhance_catmull_x2_x2"));
        assert!(["identity", "flip_h", "flip_v", "rot90", "rot180", "rot270"].contains(&last.as_str()));
    }
    for entry in &outcome.entries {
        entry.validate()?;
        let dims = image::image_dimensions(&entry.absolute_path)?;
        // Crop is 24x24 when drawn, otherwise the 32x32 canonical size; both double.
        assert!(dims == (48, 48) || dims == (64, 64), "{dims:?}");
    }
    Ok(())
}

#[test]
fn workflow_dataset_validation_and_audit() -> anyhow::Result<()> {
    let fx = fixture()?;
    let outcome = run(&fx, &fx.out, 7)?;

    let report = validate_summary(outcome.summary.clone(), &ValidationThresholds::default());
    assert_eq!(report.outcome, ValidationOutcome::Warn);

    let strict = ValidationThresholds {
        max_unresolved: Some(0),
        ..Default::default()
    };
    assert_eq!(
        validate_summary(outcome.summary.clone(), &strict).outcome,
        ValidationOutcome::Fail
    );

    let audit = audit_metadata(&outcome.metadata_path)?;
    assert_eq!(audit.rows, 18);
    assert!(audit.is_clean());
    assert_eq!(audit.by_label.values().sum::<usize>(), 18);
    Ok(())
}

#[test]
fn workflow_is_reproducible_for_a_seed() -> anyhow::Result<()> {
    let fx = fixture()?;
    let first = run(&fx, &fx.out.join("a"), 99)?;
    let second = run(&fx, &fx.out.join("b"), 99)?;

    assert_eq!(first.entries.len(), second.entries.len());
    for (a, b) in first.variants.iter().zip(&second.variants) {
        assert_eq!(a.transform_ops, b.transform_ops);
        assert_eq!(
            a.output_path.file_name(),
            b.output_path.file_name()
        );
        assert_eq!(fs::read(&a.output_path)?, fs::read(&b.output_path)?);
    }
    Ok(())
}

#[test]
fn workflow_schema_mismatch_writes_nothing() -> anyhow::Result<()> {
    let fx = fixture()?;
    let bad = fx.out.with_file_name("bad.csv");
    fs::write(&bad, "title,notes\nfoo,bar\n")?;
    let tables = vec![fx.tables[0].clone(), bad];
    let err = reconcile_paths(&MetadataReconciler::default(), &tables).unwrap_err();
    assert!(matches!(err, tabla_dataset::CurateError::SchemaMismatch { .. }));
    assert!(!fx.out.exists());
    Ok(())
}
