//! Resolution enhancement boundary.
//!
//! The pretrained upsampler is an external collaborator: the pipeline only
//! needs something implementing [`Upscaler`]. [`load_upscaler`] reads a JSON
//! model artifact once at pipeline start; any failure there is fatal for the
//! run.

use crate::types::{CurateError, CurateResult};
use image::imageops::FilterType;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

pub const MAX_UPSCALE_FACTOR: u32 = 8;

pub trait Upscaler: Send + Sync {
    fn name(&self) -> &str;
    fn scale(&self) -> u32;
    fn upsample(&self, img: &RgbImage) -> CurateResult<RgbImage>;
}

impl fmt::Debug for dyn Upscaler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Upscaler({} x{})", self.name(), self.scale())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResampleFilter {
    Nearest,
    Triangle,
    CatmullRom,
    Lanczos3,
}

impl From<ResampleFilter> for FilterType {
    fn from(f: ResampleFilter) -> Self {
        match f {
            ResampleFilter::Nearest => FilterType::Nearest,
            ResampleFilter::Triangle => FilterType::Triangle,
            ResampleFilter::CatmullRom => FilterType::CatmullRom,
            ResampleFilter::Lanczos3 => FilterType::Lanczos3,
        }
    }
}

/// On-disk description of an enhancement model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpscalerArtifact {
    pub name: String,
    pub scale: u32,
    pub filter: ResampleFilter,
    /// Unsharp-mask sigma applied after resampling; 0 disables it.
    #[serde(default)]
    pub sharpen_sigma: f32,
    #[serde(default)]
    pub sharpen_threshold: i32,
}

impl UpscalerArtifact {
    fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("model name is empty".into());
        }
        if self.scale == 0 || self.scale > MAX_UPSCALE_FACTOR {
            return Err(format!(
                "scale {} outside 1..={MAX_UPSCALE_FACTOR}",
                self.scale
            ));
        }
        if !self.sharpen_sigma.is_finite() || self.sharpen_sigma < 0.0 {
            return Err(format!("sharpen_sigma {} invalid", self.sharpen_sigma));
        }
        Ok(())
    }
}

/// Resampling upscaler driven by an [`UpscalerArtifact`].
#[derive(Debug, Clone)]
pub struct ResamplingUpscaler {
    artifact: UpscalerArtifact,
}

impl ResamplingUpscaler {
    pub fn new(artifact: UpscalerArtifact) -> Self {
        Self { artifact }
    }
}

impl Upscaler for ResamplingUpscaler {
    fn name(&self) -> &str {
        &self.artifact.name
    }

    fn scale(&self) -> u32 {
        self.artifact.scale
    }

    fn upsample(&self, img: &RgbImage) -> CurateResult<RgbImage> {
        let (w, h) = img.dimensions();
        let scale = self.artifact.scale;
        let (Some(nw), Some(nh)) = (w.checked_mul(scale), h.checked_mul(scale)) else {
            return Err(CurateError::Other(format!(
                "{}: {w}x{h} overflows at scale {scale}",
                self.artifact.name
            )));
        };
        let mut out = image::imageops::resize(img, nw, nh, self.artifact.filter.into());
        if self.artifact.sharpen_sigma > 0.0 {
            out = image::imageops::unsharpen(
                &out,
                self.artifact.sharpen_sigma,
                self.artifact.sharpen_threshold,
            );
        }
        Ok(out)
    }
}

/// Load the enhancement model artifact at `path`.
pub fn load_upscaler(path: &Path) -> CurateResult<Arc<dyn Upscaler>> {
    let load_err = |msg: String| CurateError::ModelLoad {
        path: path.to_path_buf(),
        msg,
    };
    let raw = std::fs::read(path).map_err(|e| load_err(e.to_string()))?;
    let artifact: UpscalerArtifact =
        serde_json::from_slice(&raw).map_err(|e| load_err(e.to_string()))?;
    artifact.validate().map_err(load_err)?;
    info!(
        "loaded enhancement model {} (x{}, {:?})",
        artifact.name, artifact.scale, artifact.filter
    );
    Ok(Arc::new(ResamplingUpscaler::new(artifact)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_artifact_is_model_load_failure() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_upscaler(&dir.path().join("ESPCN_x2.json")).err().unwrap();
        assert!(matches!(err, CurateError::ModelLoad { .. }));
    }

    #[test]
    fn unreadable_artifact_is_model_load_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        std::fs::write(&path, b"\x00\x01binary weights").unwrap();
        assert!(matches!(
            load_upscaler(&path).err().unwrap(),
            CurateError::ModelLoad { .. }
        ));
        std::fs::write(&path, br#"{"name":"espcn","scale":0,"filter":"lanczos3"}"#).unwrap();
        assert!(matches!(
            load_upscaler(&path).err().unwrap(),
            CurateError::ModelLoad { .. }
        ));
    }

    #[test]
    fn loaded_upscaler_scales_dimensions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        std::fs::write(
            &path,
            br#"{"name":"espcn","scale":2,"filter":"lanczos3","sharpen_sigma":0.5,"sharpen_threshold":2}"#,
        )
        .unwrap();
        let up = load_upscaler(&path).unwrap();
        assert_eq!(up.name(), "espcn");
        let out = up.upsample(&RgbImage::new(10, 6)).unwrap();
        assert_eq!(out.dimensions(), (20, 12));
    }
}
