// THEORY:
// `RoiConfig` gathers every tunable number the ROI engine uses. The defaults are
// the values the dataset was originally tuned with, so a run without a config
// file behaves exactly like the historical tool. A JSON file (see
// `RoiConfig::from_json_file`) may override any subset of fields.
//
// Key architectural principles:
// 1.  **One owner per concern**: each section maps to one stage of the pipeline
//     (sampling, threshold segmentation, leaf solver, foreground extraction,
//     dispatch).
// 2.  **Validated once**: `validate` runs before any work is scheduled, so the
//     workers can trust every value they read.

use crate::core_modules::mask::ThresholdPolarity;
use crate::core_modules::organ::OrganTag;
use crate::core_modules::segmentation::RoiStrategy;
use crate::error::{RoiError, RoiResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_WORKER_COUNT: usize = 4;

/// Border-band sampling and palette normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Thickness of each sampled border strip, in pixels.
    pub band_width: u32,
    /// Buckets whose sampled fraction exceeds this are treated as background.
    pub noise_threshold: f64,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            band_width: 10,
            noise_threshold: 0.10,
        }
    }
}

/// Edge-contour strategy: light blur, Canny edges, large closed outlines filled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EdgeContourConfig {
    /// Blur before edge detection. 1.1 is the sigma of a 5x5 kernel.
    pub blur_sigma: f32,
    pub canny_low: f32,
    pub canny_high: f32,
    /// Outlines enclosing more than this many square pixels are filled.
    pub min_fill_area: f64,
}

impl Default for EdgeContourConfig {
    fn default() -> Self {
        Self {
            blur_sigma: 1.1,
            canny_low: 100.0,
            canny_high: 200.0,
            min_fill_area: 5000.0,
        }
    }
}

/// How one organ class is segmented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganSegmentation {
    pub strategy: RoiStrategy,
    pub polarity: ThresholdPolarity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentationConfig {
    /// Standard deviation of the Gaussian blur applied before thresholding.
    pub blur_sigma: f32,
    /// Contour counts above this escalate to the foreground extractor.
    pub contour_limit: usize,
    /// Margin of the inset rectangle that seeds foreground extraction.
    pub seed_margin: u32,
    pub edge: EdgeContourConfig,
    pub flower: OrganSegmentation,
    pub fruit: OrganSegmentation,
    pub leaf_scan: OrganSegmentation,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        let bright = OrganSegmentation {
            strategy: RoiStrategy::Threshold,
            polarity: ThresholdPolarity::BrightForeground,
        };
        Self {
            blur_sigma: 3.0,
            contour_limit: 50,
            seed_margin: 10,
            edge: EdgeContourConfig::default(),
            flower: bright,
            fruit: bright,
            leaf_scan: OrganSegmentation {
                strategy: RoiStrategy::Threshold,
                polarity: ThresholdPolarity::DarkForeground,
            },
        }
    }
}

impl SegmentationConfig {
    /// Segmentation settings for the organs that go through the threshold policy.
    pub fn for_organ(&self, organ: OrganTag) -> Option<OrganSegmentation> {
        match organ {
            OrganTag::Flower => Some(self.flower),
            OrganTag::Fruit => Some(self.fruit),
            OrganTag::LeafScan => Some(self.leaf_scan),
            _ => None,
        }
    }
}

/// Numeric controls forwarded to the Chan-Vese level-set tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChanVeseParams {
    pub mu: f64,
    pub nu: f64,
    pub lambda1: f64,
    pub lambda2: f64,
    pub tol: f64,
    pub dt: f64,
    pub maxiter: u32,
    pub iterperframe: u32,
}

impl Default for ChanVeseParams {
    fn default() -> Self {
        Self {
            mu: 0.0,
            nu: 0.0,
            lambda1: 1.0,
            lambda2: 1.0,
            tol: 1e-3,
            dt: 0.5,
            maxiter: 1000,
            iterperframe: 1000,
        }
    }
}

impl ChanVeseParams {
    /// `key:value` arguments in the order the tool documents them.
    pub fn to_args(&self) -> Vec<String> {
        vec![
            format!("mu:{}", self.mu),
            format!("nu:{}", self.nu),
            format!("lambda1:{}", self.lambda1),
            format!("lambda2:{}", self.lambda2),
            format!("tol:{}", self.tol),
            format!("dt:{}", self.dt),
            format!("maxiter:{}", self.maxiter),
            format!("iterperframe:{}", self.iterperframe),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeafSolverConfig {
    /// Path (or name on `PATH`) of the `chanvese` executable.
    pub program: PathBuf,
    /// Extra arguments placed before the tool's own, e.g. for a wrapper.
    pub leading_args: Vec<String>,
    pub timeout_secs: u64,
    /// Parent of the per-task scratch directories. Defaults to the system temp dir.
    pub scratch_root: Option<PathBuf>,
    pub params: ChanVeseParams,
}

impl Default for LeafSolverConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("chanvese"),
            leading_args: Vec::new(),
            timeout_secs: 120,
            scratch_root: None,
            params: ChanVeseParams::default(),
        }
    }
}

impl LeafSolverConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn scratch_root(&self) -> PathBuf {
        self.scratch_root.clone().unwrap_or_else(std::env::temp_dir)
    }
}

/// Which implementation backs the escalated (expensive) segmentation path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForegroundBackend {
    /// Native GrabCut, available when built with the `opencv` feature.
    GrabCut,
    /// An external program, see `ForegroundConfig::command`.
    Command,
    /// Escalation is disabled; escalated images fail with an external-tool error.
    Disabled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForegroundConfig {
    pub backend: ForegroundBackend,
    pub iterations: u32,
    pub command: Option<PathBuf>,
    pub leading_args: Vec<String>,
    pub timeout_secs: u64,
    pub scratch_root: Option<PathBuf>,
}

impl Default for ForegroundConfig {
    fn default() -> Self {
        Self {
            backend: if cfg!(feature = "opencv") {
                ForegroundBackend::GrabCut
            } else {
                ForegroundBackend::Command
            },
            iterations: 5,
            command: None,
            leading_args: Vec::new(),
            timeout_secs: 120,
            scratch_root: None,
        }
    }
}

impl ForegroundConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn scratch_root(&self) -> PathBuf {
        self.scratch_root.clone().unwrap_or_else(std::env::temp_dir)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub workers: usize,
    /// Output root. `None` means the sibling `<input>_output` directory.
    pub output_root: Option<PathBuf>,
    pub write_observation_index: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKER_COUNT,
            output_root: None,
            write_observation_index: true,
        }
    }
}

/// Top-level configuration for a run.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RoiConfig {
    pub sampling: SamplingConfig,
    pub segmentation: SegmentationConfig,
    pub leaf_solver: LeafSolverConfig,
    pub foreground: ForegroundConfig,
    pub dispatch: DispatchConfig,
}

impl RoiConfig {
    pub fn from_json_file(path: &Path) -> RoiResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| RoiError::io(format!("reading config {}", path.display()), e))?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| RoiError::config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json_file(&self, path: &Path) -> RoiResult<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| RoiError::config(e.to_string()))?;
        std::fs::write(path, json)
            .map_err(|e| RoiError::io(format!("writing config {}", path.display()), e))
    }

    pub fn validate(&self) -> RoiResult<()> {
        if self.dispatch.workers == 0 {
            return Err(RoiError::config("dispatch.workers must be at least 1"));
        }
        if self.sampling.band_width == 0 {
            return Err(RoiError::config("sampling.band_width must be at least 1"));
        }
        let threshold = self.sampling.noise_threshold;
        if !(threshold > 0.0 && threshold < 1.0) {
            return Err(RoiError::config(format!(
                "sampling.noise_threshold must lie in (0, 1), got {threshold}"
            )));
        }
        if !(self.segmentation.blur_sigma > 0.0) {
            return Err(RoiError::config("segmentation.blur_sigma must be positive"));
        }
        let edge = &self.segmentation.edge;
        if !(edge.blur_sigma > 0.0) {
            return Err(RoiError::config("segmentation.edge.blur_sigma must be positive"));
        }
        if !(edge.canny_low >= 0.0 && edge.canny_low <= edge.canny_high) {
            return Err(RoiError::config(format!(
                "segmentation.edge needs 0 <= canny_low <= canny_high, got {} and {}",
                edge.canny_low, edge.canny_high
            )));
        }
        if !(edge.min_fill_area >= 0.0) {
            return Err(RoiError::config("segmentation.edge.min_fill_area must not be negative"));
        }
        if self.leaf_solver.timeout_secs == 0 || self.foreground.timeout_secs == 0 {
            return Err(RoiError::config("tool timeouts must be positive"));
        }
        if self.foreground.iterations == 0 {
            return Err(RoiError::config("foreground.iterations must be at least 1"));
        }
        if self.leaf_solver.params.maxiter == 0 {
            return Err(RoiError::config("leaf_solver.params.maxiter must be at least 1"));
        }
        Ok(())
    }
}
