//! Exact and near-duplicate filtering with first-occurrence-wins semantics.
//!
//! Fingerprints are computed in parallel; admission into the [`DedupIndex`]
//! happens on one thread in input order, so the kept set never depends on
//! worker scheduling.

use crate::hash::{distance, ContentHasher, ExactDigest, Fingerprint, PerceptualHash};
use crate::types::RejectReason;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{debug, warn};

/// Identical perceptual hashes only.
pub const DEFAULT_NEAR_DUPLICATE_THRESHOLD: u32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexKind {
    #[default]
    Linear,
    #[serde(alias = "bktree")]
    BkTree,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DedupConfig {
    /// Images whose perceptual distance to a kept image is `<=` this are near duplicates.
    pub near_duplicate_threshold: u32,
    pub index: IndexKind,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            near_duplicate_threshold: DEFAULT_NEAR_DUPLICATE_THRESHOLD,
            index: IndexKind::Linear,
        }
    }
}

/// Lookup structure over kept perceptual hashes. Implementations must return a
/// match whenever any stored hash lies within `threshold`.
pub trait PerceptualIndex: Send {
    fn find_within(&self, hash: PerceptualHash, threshold: u32) -> Option<usize>;
    fn insert(&mut self, hash: PerceptualHash, id: usize);
}

/// O(kept) scan; the reference behaviour.
#[derive(Debug, Default)]
pub struct LinearIndex {
    entries: Vec<(PerceptualHash, usize)>,
}

impl PerceptualIndex for LinearIndex {
    fn find_within(&self, hash: PerceptualHash, threshold: u32) -> Option<usize> {
        self.entries
            .iter()
            .find(|(h, _)| distance(*h, hash) <= threshold)
            .map(|(_, id)| *id)
    }

    fn insert(&mut self, hash: PerceptualHash, id: usize) {
        self.entries.push((hash, id));
    }
}

#[derive(Debug)]
struct BkNode {
    hash: PerceptualHash,
    id: usize,
    children: Vec<(u32, usize)>,
}

/// Burkhard-Keller tree over Hamming distance.
#[derive(Debug, Default)]
pub struct BkTreeIndex {
    nodes: Vec<BkNode>,
}

impl PerceptualIndex for BkTreeIndex {
    fn find_within(&self, hash: PerceptualHash, threshold: u32) -> Option<usize> {
        if self.nodes.is_empty() {
            return None;
        }
        // Returns the earliest inserted match so results agree with LinearIndex.
        let mut best: Option<usize> = None;
        let mut stack = vec![0usize];
        while let Some(idx) = stack.pop() {
            let node = &self.nodes[idx];
            let d = distance(node.hash, hash);
            if d <= threshold {
                best = Some(best.map_or(node.id, |b| b.min(node.id)));
            }
            let lo = d.saturating_sub(threshold);
            let hi = d + threshold;
            for &(edge, child) in &node.children {
                if edge >= lo && edge <= hi {
                    stack.push(child);
                }
            }
        }
        best
    }

    fn insert(&mut self, hash: PerceptualHash, id: usize) {
        let new_idx = self.nodes.len();
        self.nodes.push(BkNode {
            hash,
            id,
            children: Vec::new(),
        });
        if new_idx == 0 {
            return;
        }
        let mut cur = 0usize;
        loop {
            let d = distance(self.nodes[cur].hash, hash);
            match self.nodes[cur].children.iter().find(|(edge, _)| *edge == d) {
                Some(&(_, child)) => cur = child,
                None => {
                    self.nodes[cur].children.push((d, new_idx));
                    return;
                }
            }
        }
    }
}

/// Hash index owned by one run. `check_and_insert` takes `&mut self`, so a
/// check and the matching insert can never interleave with another admission.
pub struct DedupIndex {
    threshold: u32,
    exact: HashMap<ExactDigest, usize>,
    perceptual: Box<dyn PerceptualIndex>,
}

impl DedupIndex {
    pub fn new(config: &DedupConfig) -> Self {
        let perceptual: Box<dyn PerceptualIndex> = match config.index {
            IndexKind::Linear => Box::new(LinearIndex::default()),
            IndexKind::BkTree => Box::new(BkTreeIndex::default()),
        };
        Self {
            threshold: config.near_duplicate_threshold,
            exact: HashMap::new(),
            perceptual,
        }
    }

    /// Admit `fp` under `id`, or report which kept id it duplicates.
    pub fn check_and_insert(
        &mut self,
        id: usize,
        fp: &Fingerprint,
    ) -> Result<(), (RejectReason, usize)> {
        if let Some(&first) = self.exact.get(&fp.exact) {
            return Err((RejectReason::ExactDuplicate, first));
        }
        if let Some(first) = self.perceptual.find_within(fp.perceptual, self.threshold) {
            return Err((RejectReason::NearDuplicate, first));
        }
        self.exact.insert(fp.exact, id);
        self.perceptual.insert(fp.perceptual, id);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.exact.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exact.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct KeptImage {
    /// Position in the input sequence.
    pub input_index: usize,
    pub path: PathBuf,
    pub fingerprint: Fingerprint,
}

#[derive(Debug, Clone)]
pub struct Rejection {
    pub input_index: usize,
    pub path: PathBuf,
    pub reason: RejectReason,
    /// Kept image this one duplicates; `None` for decode errors.
    pub duplicate_of: Option<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct DedupOutcome {
    pub kept: Vec<KeptImage>,
    pub rejected: Vec<Rejection>,
}

impl DedupOutcome {
    pub fn count(&self, reason: RejectReason) -> usize {
        self.rejected.iter().filter(|r| r.reason == reason).count()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Deduplicator {
    config: DedupConfig,
    hasher: ContentHasher,
}

impl Deduplicator {
    pub fn new(config: DedupConfig) -> Self {
        Self {
            config,
            hasher: ContentHasher::new(),
        }
    }

    pub fn config(&self) -> &DedupConfig {
        &self.config
    }

    /// Filter `paths` down to a unique set, preserving input order.
    ///
    /// Runs on the current rayon pool; callers install their own pool to bound
    /// parallelism.
    pub fn dedupe(&self, paths: &[PathBuf]) -> DedupOutcome {
        let fingerprints: Vec<_> = paths
            .par_iter()
            .map(|p| self.hasher.fingerprint_path(p))
            .collect();

        let mut index = DedupIndex::new(&self.config);
        let mut outcome = DedupOutcome::default();
        for (input_index, (path, fp)) in paths.iter().zip(fingerprints).enumerate() {
            let fp = match fp {
                Ok(fp) => fp,
                Err(err) => {
                    warn!("skipping unreadable image: {err}");
                    outcome.rejected.push(Rejection {
                        input_index,
                        path: path.clone(),
                        reason: RejectReason::DecodeError,
                        duplicate_of: None,
                    });
                    continue;
                }
            };
            match index.check_and_insert(outcome.kept.len(), &fp) {
                Ok(()) => outcome.kept.push(KeptImage {
                    input_index,
                    path: path.clone(),
                    fingerprint: fp,
                }),
                Err((reason, kept_idx)) => {
                    let original = outcome.kept[kept_idx].path.clone();
                    debug!(
                        "{} rejected as {} of {}",
                        path.display(),
                        reason.as_str(),
                        original.display()
                    );
                    outcome.rejected.push(Rejection {
                        input_index,
                        path: path.clone(),
                        reason,
                        duplicate_of: Some(original),
                    });
                }
            }
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use std::path::Path;

    fn write_pattern(dir: &Path, name: &str, seed: u32) -> PathBuf {
        let img = RgbImage::from_fn(32, 32, |x, y| {
            let v = ((x * 7 + y * 13 + seed * 31) % 251) as u8;
            Rgb([v, v.wrapping_mul(3), 255 - v])
        });
        let path = dir.join(name);
        img.save(&path).unwrap();
        path
    }

    #[test]
    fn byte_identical_images_keep_first() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_pattern(dir.path(), "a.png", 1);
        let b = dir.path().join("copy_of_a.png");
        std::fs::copy(&a, &b).unwrap();
        let c = write_pattern(dir.path(), "c.png", 9);

        let out = Deduplicator::default().dedupe(&[a.clone(), b.clone(), c.clone()]);
        let kept: Vec<_> = out.kept.iter().map(|k| k.path.clone()).collect();
        assert_eq!(kept, vec![a.clone(), c]);
        assert_eq!(out.rejected.len(), 1);
        assert_eq!(out.rejected[0].path, b);
        assert_eq!(out.rejected[0].reason, RejectReason::ExactDuplicate);
        assert_eq!(out.rejected[0].duplicate_of.as_deref(), Some(a.as_path()));
    }

    #[test]
    fn same_pixels_in_different_containers_are_exact_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let png = write_pattern(dir.path(), "a.png", 4);
        let img = image::open(&png).unwrap().to_rgb8();
        let bmp = dir.path().join("a.bmp");
        img.save(&bmp).unwrap();
        let out = Deduplicator::default().dedupe(&[png, bmp]);
        assert_eq!(out.kept.len(), 1);
        assert_eq!(out.count(RejectReason::ExactDuplicate), 1);
    }

    #[test]
    fn decode_errors_never_count_as_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let bad1 = dir.path().join("bad1.jpg");
        let bad2 = dir.path().join("bad2.jpg");
        std::fs::write(&bad1, b"junk").unwrap();
        std::fs::write(&bad2, b"junk").unwrap();
        let good = write_pattern(dir.path(), "good.png", 2);
        let out = Deduplicator::default().dedupe(&[bad1, good, bad2]);
        assert_eq!(out.kept.len(), 1);
        assert_eq!(out.count(RejectReason::DecodeError), 2);
        assert_eq!(out.count(RejectReason::ExactDuplicate), 0);
    }

    fn fp(exact_byte: u8, hash: u64) -> Fingerprint {
        Fingerprint {
            exact: ExactDigest([exact_byte; 32]),
            perceptual: PerceptualHash(hash),
        }
    }

    #[test]
    fn threshold_controls_near_duplicates() {
        let strict = DedupConfig::default();
        let mut index = DedupIndex::new(&strict);
        assert!(index.check_and_insert(0, &fp(1, 0b0000)).is_ok());
        assert!(index.check_and_insert(1, &fp(2, 0b0011)).is_ok());
        assert_eq!(
            index.check_and_insert(2, &fp(3, 0b0011)),
            Err((RejectReason::NearDuplicate, 1))
        );

        let loose = DedupConfig {
            near_duplicate_threshold: 2,
            ..DedupConfig::default()
        };
        let mut index = DedupIndex::new(&loose);
        assert!(index.check_and_insert(0, &fp(1, 0b0000)).is_ok());
        assert_eq!(
            index.check_and_insert(1, &fp(2, 0b0011)),
            Err((RejectReason::NearDuplicate, 0))
        );
    }

    #[test]
    fn exact_match_takes_precedence_over_near_match() {
        let mut index = DedupIndex::new(&DedupConfig::default());
        index.check_and_insert(0, &fp(1, 42)).unwrap();
        assert_eq!(
            index.check_and_insert(1, &fp(1, 42)),
            Err((RejectReason::ExactDuplicate, 0))
        );
    }

    #[test]
    fn bk_tree_agrees_with_linear_scan() {
        let mut state = 0x2545_f491_4f6c_dd1du64;
        let mut hashes = Vec::new();
        for _ in 0..300 {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            // Cluster hashes so thresholds actually bite.
            hashes.push(state & 0x0000_0000_0000_ffff);
        }
        for threshold in [0, 1, 3, 6] {
            let run = |kind: IndexKind| {
                let cfg = DedupConfig {
                    near_duplicate_threshold: threshold,
                    index: kind,
                };
                let mut index = DedupIndex::new(&cfg);
                let mut kept = 0usize;
                hashes
                    .iter()
                    .enumerate()
                    .map(|(i, h)| {
                        let mut exact = [0u8; 32];
                        exact[..8].copy_from_slice(&(i as u64).to_le_bytes());
                        let fp = Fingerprint {
                            exact: ExactDigest(exact),
                            perceptual: PerceptualHash(*h),
                        };
                        let res = index.check_and_insert(kept, &fp);
                        if res.is_ok() {
                            kept += 1;
                        }
                        res
                    })
                    .collect::<Vec<_>>()
            };
            assert_eq!(run(IndexKind::Linear), run(IndexKind::BkTree));
        }
    }

    #[test]
    fn kept_images_respect_threshold_pairwise() {
        let dir = tempfile::tempdir().unwrap();
        let paths: Vec<_> = (0..6)
            .map(|i| write_pattern(dir.path(), &format!("p{i}.png"), i % 4))
            .collect();
        let cfg = DedupConfig {
            near_duplicate_threshold: 4,
            index: IndexKind::BkTree,
        };
        let out = Deduplicator::new(cfg).dedupe(&paths);
        for (i, a) in out.kept.iter().enumerate() {
            for b in &out.kept[i + 1..] {
                assert_ne!(a.fingerprint.exact, b.fingerprint.exact);
                assert!(distance(a.fingerprint.perceptual, b.fingerprint.perceptual) > 4);
            }
        }
        assert_eq!(out.kept.len() + out.rejected.len(), paths.len());
    }
}
