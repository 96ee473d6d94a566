//! Exact and perceptual fingerprints of decoded images.

use crate::types::{CurateError, CurateResult};
use image::imageops::FilterType;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::Path;

/// SHA-256 over the decoded pixel buffer and its dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExactDigest(pub [u8; 32]);

impl fmt::Display for ExactDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

/// 64-bit difference hash; bit `i` is set when pixel `i` is brighter than its
/// right neighbour in a 9x8 grayscale thumbnail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PerceptualHash(pub u64);

impl PerceptualHash {
    pub fn distance(&self, other: &PerceptualHash) -> u32 {
        distance(*self, *other)
    }
}

impl fmt::Display for PerceptualHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Hamming distance between two perceptual hashes.
pub fn distance(a: PerceptualHash, b: PerceptualHash) -> u32 {
    (a.0 ^ b.0).count_ones()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fingerprint {
    pub exact: ExactDigest,
    pub perceptual: PerceptualHash,
}

const DHASH_WIDTH: u32 = 9;
const DHASH_HEIGHT: u32 = 8;

#[derive(Debug, Clone, Copy, Default)]
pub struct ContentHasher;

impl ContentHasher {
    pub fn new() -> Self {
        Self
    }

    pub fn exact_hash(&self, img: &RgbImage) -> ExactDigest {
        let mut hasher = Sha256::new();
        hasher.update(img.width().to_le_bytes());
        hasher.update(img.height().to_le_bytes());
        hasher.update(img.as_raw());
        ExactDigest(hasher.finalize().into())
    }

    pub fn perceptual_hash(&self, img: &RgbImage) -> PerceptualHash {
        let gray = image::imageops::grayscale(img);
        let thumb = image::imageops::resize(&gray, DHASH_WIDTH, DHASH_HEIGHT, FilterType::Triangle);
        let mut bits = 0u64;
        let mut bit = 0;
        for y in 0..DHASH_HEIGHT {
            for x in 0..DHASH_WIDTH - 1 {
                let left = thumb.get_pixel(x, y)[0];
                let right = thumb.get_pixel(x + 1, y)[0];
                if left > right {
                    bits |= 1 << bit;
                }
                bit += 1;
            }
        }
        PerceptualHash(bits)
    }

    pub fn fingerprint(&self, img: &RgbImage) -> Fingerprint {
        Fingerprint {
            exact: self.exact_hash(img),
            perceptual: self.perceptual_hash(img),
        }
    }

    /// Decode a file and fingerprint it. Undecodable files yield `CurateError::Decode`.
    pub fn fingerprint_path(&self, path: &Path) -> CurateResult<Fingerprint> {
        let img = decode_rgb(path)?;
        Ok(self.fingerprint(&img))
    }
}

/// Decode any supported format into 8-bit RGB.
pub fn decode_rgb(path: &Path) -> CurateResult<RgbImage> {
    let img = image::open(path).map_err(|e| CurateError::Decode {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(img.to_rgb8())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn gradient(w: u32, h: u32) -> RgbImage {
        RgbImage::from_fn(w, h, |x, y| {
            Rgb([(x * 255 / w) as u8, (y * 255 / h) as u8, 128])
        })
    }

    #[test]
    fn identical_buffers_share_exact_digest() {
        let hasher = ContentHasher::new();
        let a = gradient(32, 32);
        let b = a.clone();
        assert_eq!(hasher.exact_hash(&a), hasher.exact_hash(&b));
    }

    #[test]
    fn dimensions_feed_exact_digest() {
        let hasher = ContentHasher::new();
        let wide = RgbImage::new(4, 2);
        let tall = RgbImage::new(2, 4);
        assert_eq!(wide.as_raw(), tall.as_raw());
        assert_ne!(hasher.exact_hash(&wide), hasher.exact_hash(&tall));
    }

    #[test]
    fn perceptual_hash_survives_small_brightness_shift() {
        let hasher = ContentHasher::new();
        let a = gradient(64, 64);
        let mut b = a.clone();
        for p in b.pixels_mut() {
            p[2] = p[2].saturating_add(3);
        }
        assert_ne!(hasher.exact_hash(&a), hasher.exact_hash(&b));
        let d = distance(hasher.perceptual_hash(&a), hasher.perceptual_hash(&b));
        assert!(d <= 2, "distance {d}");
    }

    #[test]
    fn mirrored_image_changes_perceptual_hash() {
        let hasher = ContentHasher::new();
        let a = gradient(64, 64);
        let b = image::imageops::flip_horizontal(&a);
        assert!(distance(hasher.perceptual_hash(&a), hasher.perceptual_hash(&b)) > 8);
    }

    #[test]
    fn distance_is_symmetric_and_zero_on_equal() {
        let a = PerceptualHash(0b1011);
        let b = PerceptualHash(0b0110);
        assert_eq!(distance(a, b), distance(b, a));
        assert_eq!(distance(a, b), 3);
        assert_eq!(distance(a, a), 0);
    }

    #[test]
    fn undecodable_file_is_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.jpg");
        std::fs::write(&path, b"not an image").unwrap();
        let err = ContentHasher::new().fingerprint_path(&path).unwrap_err();
        assert!(matches!(err, CurateError::Decode { .. }));
    }
}
