//! Preprocessing and augmentation pipeline.
//!
//! Stages run in a fixed order per image:
//! canonicalize -> seeded photometric/noise/crop augmentation -> enhancement
//! -> fixed geometric expansion into [`GeometricOp::ALL`] variants.

use crate::hash::decode_rgb;
use crate::types::{CurateError, CurateResult};
use crate::upscale::{ResampleFilter, Upscaler};
use image::{DynamicImage, RgbImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BilateralParams {
    /// Window diameter in pixels.
    pub diameter: u32,
    pub sigma_color: f32,
    pub sigma_space: f32,
}

impl Default for BilateralParams {
    fn default() -> Self {
        Self {
            diameter: 9,
            sigma_color: 75.0,
            sigma_space: 75.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransformConfig {
    /// Every image is resized to exactly this (width, height).
    pub canonical_size: (u32, u32),
    pub resize_filter: ResampleFilter,
    /// Edge-preserving smoothing after resize; `None` skips it.
    pub denoise: Option<BilateralParams>,
    /// Probability of brightness/contrast/saturation jitter.
    pub jitter_prob: f32,
    /// Each factor is drawn from `[1 - strength, 1 + strength]`.
    pub jitter_strength: f32,
    /// Probability of blending in uniform noise.
    pub noise_prob: f32,
    /// Blend weight of the noise layer.
    pub noise_weight: f32,
    /// Probability of a random crop to `crop_size`.
    pub crop_prob: f32,
    pub crop_size: (u32, u32),
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            canonical_size: (256, 256),
            resize_filter: ResampleFilter::Lanczos3,
            denoise: Some(BilateralParams::default()),
            jitter_prob: 0.5,
            jitter_strength: 0.2,
            noise_prob: 0.25,
            noise_weight: 0.05,
            crop_prob: 0.25,
            crop_size: (224, 224),
        }
    }
}

impl TransformConfig {
    pub fn validate(&self) -> CurateResult<()> {
        let bad = |msg: String| Err(CurateError::Other(format!("invalid transform config: {msg}")));
        let (w, h) = self.canonical_size;
        if w == 0 || h == 0 {
            return bad("canonical_size must be non-zero".into());
        }
        for (name, p) in [
            ("jitter_prob", self.jitter_prob),
            ("noise_prob", self.noise_prob),
            ("crop_prob", self.crop_prob),
            ("noise_weight", self.noise_weight),
        ] {
            if !(0.0..=1.0).contains(&p) {
                return bad(format!("{name} {p} outside [0, 1]"));
            }
        }
        if !(0.0..1.0).contains(&self.jitter_strength) {
            return bad(format!(
                "jitter_strength {} outside [0, 1)",
                self.jitter_strength
            ));
        }
        let (cw, ch) = self.crop_size;
        if cw == 0 || ch == 0 || cw > w || ch > h {
            return bad(format!(
                "crop_size {cw}x{ch} must be non-zero and fit in {w}x{h}"
            ));
        }
        if let Some(d) = &self.denoise {
            if d.diameter == 0 || d.sigma_color <= 0.0 || d.sigma_space <= 0.0 {
                return bad(format!("denoise parameters {d:?} must be positive"));
            }
        }
        Ok(())
    }
}

/// Fixed geometric expansion; position in [`GeometricOp::ALL`] is the variant index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GeometricOp {
    Identity,
    FlipHorizontal,
    FlipVertical,
    Rotate90,
    Rotate180,
    Rotate270,
}

impl GeometricOp {
    pub const ALL: [GeometricOp; 6] = [
        GeometricOp::Identity,
        GeometricOp::FlipHorizontal,
        GeometricOp::FlipVertical,
        GeometricOp::Rotate90,
        GeometricOp::Rotate180,
        GeometricOp::Rotate270,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            GeometricOp::Identity => "identity",
            GeometricOp::FlipHorizontal => "flip_h",
            GeometricOp::FlipVertical => "flip_v",
            GeometricOp::Rotate90 => "rot90",
            GeometricOp::Rotate180 => "rot180",
            GeometricOp::Rotate270 => "rot270",
        }
    }

    pub fn apply(&self, img: &RgbImage) -> RgbImage {
        use image::imageops;
        match self {
            GeometricOp::Identity => img.clone(),
            GeometricOp::FlipHorizontal => imageops::flip_horizontal(img),
            GeometricOp::FlipVertical => imageops::flip_vertical(img),
            GeometricOp::Rotate90 => imageops::rotate90(img),
            GeometricOp::Rotate180 => imageops::rotate180(img),
            GeometricOp::Rotate270 => imageops::rotate270(img),
        }
    }
}

#[derive(Clone)]
pub struct TransformedVariant {
    pub variant_index: usize,
    /// Names of applied operations, in application order.
    pub ops: Vec<String>,
    pub image: RgbImage,
}

#[derive(Clone, Default)]
pub struct TransformPipeline {
    config: TransformConfig,
    upscaler: Option<Arc<dyn Upscaler>>,
}

impl fmt::Debug for TransformPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

/// Derive a per-image seed from the run seed (splitmix64 finalizer).
pub fn mix_seed(run_seed: u64, source_index: u64) -> u64 {
    let mut z = run_seed ^ source_index.wrapping_mul(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

impl TransformPipeline {
    pub fn new(config: TransformConfig, upscaler: Option<Arc<dyn Upscaler>>) -> CurateResult<Self> {
        config.validate()?;
        Ok(Self { config, upscaler })
    }

    pub fn config(&self) -> &TransformConfig {
        &self.config
    }

    pub fn upscaler(&self) -> Option<&Arc<dyn Upscaler>> {
        self.upscaler.as_ref()
    }

    pub fn variants_per_image(&self) -> usize {
        GeometricOp::ALL.len()
    }

    pub fn describe(&self) -> String {
        let c = &self.config;
        let denoise = c
            .denoise
            .map(|d| format!("d{} sc{:.0} ss{:.0}", d.diameter, d.sigma_color, d.sigma_space))
            .unwrap_or_else(|| "none".to_string());
        let enhance = self
            .upscaler
            .as_ref()
            .map(|u| format!("{} x{}", u.name(), u.scale()))
            .unwrap_or_else(|| "disabled".to_string());
        format!(
            "canonical={}x{} filter={:?} denoise={} jitter_p={:.2} strength={:.2} noise_p={:.2} weight={:.3} crop_p={:.2} crop={}x{} enhance={} variants={}",
            c.canonical_size.0,
            c.canonical_size.1,
            c.resize_filter,
            denoise,
            c.jitter_prob,
            c.jitter_strength,
            c.noise_prob,
            c.noise_weight,
            c.crop_prob,
            c.crop_size.0,
            c.crop_size.1,
            enhance,
            GeometricOp::ALL.len()
        )
    }

    pub fn transform_path(&self, path: &Path, rng_seed: u64) -> CurateResult<Vec<TransformedVariant>> {
        let img = decode_rgb(path)?;
        self.transform(DynamicImage::ImageRgb8(img), rng_seed)
    }

    /// Run every stage on one image. Output is fully determined by the
    /// image, the config, the upscaler and `rng_seed`.
    pub fn transform(&self, img: DynamicImage, rng_seed: u64) -> CurateResult<Vec<TransformedVariant>> {
        let mut ops = Vec::new();
        let mut img = self.canonicalize(img, &mut ops);

        let mut rng = StdRng::seed_from_u64(rng_seed);
        if maybe_jitter(&mut img, self.config.jitter_prob, self.config.jitter_strength, &mut rng) {
            ops.push("jitter".to_string());
        }
        if maybe_noise(&mut img, self.config.noise_prob, self.config.noise_weight, &mut rng) {
            ops.push("noise".to_string());
        }
        if maybe_crop(&mut img, self.config.crop_prob, self.config.crop_size, &mut rng) {
            let (w, h) = self.config.crop_size;
            ops.push(format!("crop_{w}x{h}"));
        }

        if let Some(up) = &self.upscaler {
            img = up.upsample(&img)?;
            ops.push(format!("enhance_{}_x{}", up.name(), up.scale()));
        }

        Ok(GeometricOp::ALL
            .iter()
            .enumerate()
            .map(|(variant_index, op)| {
                let mut variant_ops = ops.clone();
                variant_ops.push(op.as_str().to_string());
                TransformedVariant {
                    variant_index,
                    ops: variant_ops,
                    image: op.apply(&img),
                }
            })
            .collect())
    }

    fn canonicalize(&self, img: DynamicImage, ops: &mut Vec<String>) -> RgbImage {
        let rgb = img.to_rgb8();
        let (w, h) = self.config.canonical_size;
        let resized = if rgb.dimensions() == (w, h) {
            rgb
        } else {
            image::imageops::resize(&rgb, w, h, self.config.resize_filter.into())
        };
        ops.push(format!("resize_{w}x{h}"));
        match &self.config.denoise {
            Some(params) => {
                ops.push(format!("bilateral_d{}", params.diameter));
                bilateral_filter(&resized, params)
            }
            None => resized,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransformPipelineBuilder {
    config: TransformConfig,
    upscaler: Option<Arc<dyn Upscaler>>,
}

impl Default for TransformPipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TransformPipelineBuilder {
    pub fn new() -> Self {
        Self {
            config: TransformConfig::default(),
            upscaler: None,
        }
    }
    pub fn canonical_size(mut self, size: (u32, u32)) -> Self {
        self.config.canonical_size = size;
        self
    }
    pub fn resize_filter(mut self, filter: ResampleFilter) -> Self {
        self.config.resize_filter = filter;
        self
    }
    pub fn denoise(mut self, params: Option<BilateralParams>) -> Self {
        self.config.denoise = params;
        self
    }
    pub fn jitter(mut self, prob: f32, strength: f32) -> Self {
        self.config.jitter_prob = prob;
        self.config.jitter_strength = strength;
        self
    }
    pub fn noise(mut self, prob: f32, weight: f32) -> Self {
        self.config.noise_prob = prob;
        self.config.noise_weight = weight;
        self
    }
    pub fn crop(mut self, prob: f32, size: (u32, u32)) -> Self {
        self.config.crop_prob = prob;
        self.config.crop_size = size;
        self
    }
    /// Disable every stochastic stage.
    pub fn deterministic(self) -> Self {
        let size = self.config.canonical_size;
        self.jitter(0.0, 0.0).noise(0.0, 0.0).crop(0.0, size)
    }
    pub fn upscaler(mut self, upscaler: Arc<dyn Upscaler>) -> Self {
        self.upscaler = Some(upscaler);
        self
    }
    pub fn build(self) -> CurateResult<TransformPipeline> {
        TransformPipeline::new(self.config, self.upscaler)
    }
}

/// Edge-preserving smoothing. Colour distance is the L1 distance across
/// channels; pixels outside the image are skipped.
pub fn bilateral_filter(img: &RgbImage, params: &BilateralParams) -> RgbImage {
    let radius = (params.diameter / 2) as i64;
    let (w, h) = img.dimensions();
    let space_coeff = -0.5 / (params.sigma_space * params.sigma_space);
    let color_coeff = -0.5 / (params.sigma_color * params.sigma_color);

    let mut spatial = Vec::new();
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            let r2 = (dx * dx + dy * dy) as f32;
            if r2 > (radius * radius) as f32 {
                continue;
            }
            spatial.push((dx, dy, (r2 * space_coeff).exp()));
        }
    }
    let color_lut: Vec<f32> = (0..=3 * 255)
        .map(|d| ((d * d) as f32 * color_coeff).exp())
        .collect();

    let mut out = RgbImage::new(w, h);
    for (x, y, center) in img.enumerate_pixels() {
        let mut acc = [0f32; 3];
        let mut norm = 0f32;
        for &(dx, dy, sw) in &spatial {
            let nx = x as i64 + dx;
            let ny = y as i64 + dy;
            if nx < 0 || ny < 0 || nx >= w as i64 || ny >= h as i64 {
                continue;
            }
            let p = img.get_pixel(nx as u32, ny as u32);
            let diff: usize = (0..3)
                .map(|c| (p[c] as i32 - center[c] as i32).unsigned_abs() as usize)
                .sum();
            let weight = sw * color_lut[diff];
            for c in 0..3 {
                acc[c] += p[c] as f32 * weight;
            }
            norm += weight;
        }
        let px = out.get_pixel_mut(x, y);
        for c in 0..3 {
            px[c] = (acc[c] / norm).round().clamp(0.0, 255.0) as u8;
        }
    }
    out
}

pub(crate) fn maybe_jitter(img: &mut RgbImage, prob: f32, strength: f32, rng: &mut dyn rand::RngCore) -> bool {
    if prob <= 0.0 || strength <= 0.0 {
        return false;
    }
    if rng.random_range(0.0..1.0) >= prob {
        return false;
    }
    let bright = 1.0 + rng.random_range(-strength..strength);
    let contrast = 1.0 + rng.random_range(-strength..strength);
    let saturation = 1.0 + rng.random_range(-strength..strength);
    for pixel in img.pixels_mut() {
        let mut v = [0f32; 3];
        for c in 0..3 {
            let x = pixel[c] as f32 / 255.0 * bright;
            v[c] = (x - 0.5) * contrast + 0.5;
        }
        let gray = 0.299 * v[0] + 0.587 * v[1] + 0.114 * v[2];
        for c in 0..3 {
            let s = gray + (v[c] - gray) * saturation;
            pixel[c] = (s.clamp(0.0, 1.0) * 255.0).round() as u8;
        }
    }
    true
}

pub(crate) fn maybe_noise(img: &mut RgbImage, prob: f32, weight: f32, rng: &mut dyn rand::RngCore) -> bool {
    if prob <= 0.0 || weight <= 0.0 {
        return false;
    }
    if rng.random_range(0.0..1.0) >= prob {
        return false;
    }
    for pixel in img.pixels_mut() {
        for c in 0..3 {
            let noise: f32 = rng.random_range(0.0..255.0);
            let v = pixel[c] as f32 * (1.0 - weight) + noise * weight;
            pixel[c] = v.round().clamp(0.0, 255.0) as u8;
        }
    }
    true
}

pub(crate) fn maybe_crop(
    img: &mut RgbImage,
    prob: f32,
    size: (u32, u32),
    rng: &mut dyn rand::RngCore,
) -> bool {
    let (w, h) = img.dimensions();
    let (cw, ch) = size;
    if prob <= 0.0 || cw > w || ch > h || (cw, ch) == (w, h) {
        return false;
    }
    if rng.random_range(0.0..1.0) >= prob {
        return false;
    }
    let x0 = rng.random_range(0..=w - cw);
    let y0 = rng.random_range(0..=h - ch);
    *img = image::imageops::crop_imm(img, x0, y0, cw, ch).to_image();
    true
}
