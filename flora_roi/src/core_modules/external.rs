// THEORY:
// The expensive segmenters are black boxes. The ROI engine only knows their
// contracts, expressed here as two capability traits:
//
// - `ForegroundExtractor`: given a color image and a seed rectangle that is known
//   to contain the organ, return a foreground mask (GrabCut-style).
// - `ExternalSegmenter`: given a grayscale image and an initial level-set mask,
//   return the converged region (Chan-Vese-style).
//
// The command-line implementations in this file exchange files with the tool
// through a per-task `ScratchDir` and run it as a child process with a hard
// timeout. A child that outlives its timeout is killed.
//
// Key architectural principles:
// 1.  **Capabilities, not call sites**: the policy holds `Arc<dyn Trait>`, so a
//     native backend (see `grabcut.rs`) or a test double can replace a command.
// 2.  **Bounded occupancy**: every tool invocation is wrapped in
//     `tokio::time::timeout`, so a stuck tool cannot pin a worker forever.
// 3.  **Validated output**: a missing output file, an undecodable one, or one
//     whose size differs from the input is a tool failure, not a crash.

use crate::config::{ChanVeseParams, ForegroundConfig, LeafSolverConfig};
use crate::core_modules::mask::Mask;
use crate::core_modules::scratch::ScratchDir;
use crate::core_modules::utils::task::blocking;
use crate::error::{RoiError, RoiResult};
use async_trait::async_trait;
use image::{GrayImage, RgbImage};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Rectangle, in pixels, that seeds foreground extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeedRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl SeedRect {
    /// The image shrunk by `margin` pixels on every side.
    pub fn inset(width: u32, height: u32, margin: u32) -> RoiResult<Self> {
        let inner_width = width.checked_sub(2 * margin).filter(|w| *w > 0);
        let inner_height = height.checked_sub(2 * margin).filter(|h| *h > 0);
        match (inner_width, inner_height) {
            (Some(inner_width), Some(inner_height)) => Ok(SeedRect {
                x: margin,
                y: margin,
                width: inner_width,
                height: inner_height,
            }),
            _ => Err(RoiError::DegenerateImage {
                width,
                height,
                reason: "too small for the inset seed rectangle",
            }),
        }
    }
}

/// Initial level set for the contour solver: `-1` outside a centered rectangle,
/// `1` on its one-pixel ring, `0` strictly inside.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelSetMask {
    width: u32,
    height: u32,
    values: Vec<i8>,
}

impl LevelSetMask {
    /// Rectangle spanning rows [H/6, 5H/6) and columns [W/6, 5W/6).
    pub fn centered_rectangle(width: u32, height: u32) -> Self {
        let (top, bottom) = (height / 6, height * 5 / 6);
        let (left, right) = (width / 6, width * 5 / 6);
        let mut values = vec![-1i8; (width * height) as usize];
        let mut set = |rows: std::ops::Range<u32>, cols: std::ops::Range<u32>, value: i8| {
            for y in rows {
                for x in cols.clone() {
                    values[(y * width + x) as usize] = value;
                }
            }
        };
        set(top..bottom, left..right, 1);
        set(top + 1..bottom.saturating_sub(1), left + 1..right.saturating_sub(1), 0);
        Self {
            width,
            height,
            values,
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn value(&self, x: u32, y: u32) -> i8 {
        self.values[(y * self.width + x) as usize]
    }

    /// Whitespace-separated rows, each value followed by a space.
    pub fn to_text(&self) -> String {
        let mut text = String::with_capacity(self.values.len() * 3);
        for row in self.values.chunks(self.width.max(1) as usize) {
            for value in row {
                text.push_str(&value.to_string());
                text.push(' ');
            }
            text.push('\n');
        }
        text
    }
}

#[async_trait]
pub trait ForegroundExtractor: Send + Sync {
    fn name(&self) -> &str;

    /// Foreground mask of `image`, seeded with `seed`. `label` names the task in
    /// scratch paths and logs.
    async fn extract(&self, label: &str, image: &RgbImage, seed: SeedRect) -> RoiResult<Mask>;
}

#[async_trait]
pub trait ExternalSegmenter: Send + Sync {
    fn name(&self) -> &str;

    /// Evolves `initial_mask` over `source` and returns the final region.
    async fn run(
        &self,
        label: &str,
        initial_mask: &LevelSetMask,
        source: &GrayImage,
        params: &ChanVeseParams,
    ) -> RoiResult<Mask>;
}

/// Runs `program` to completion, killing it after `timeout`.
pub async fn run_tool(tool: &str, program: &Path, args: &[OsString], timeout: Duration) -> RoiResult<()> {
    debug!(tool, program = %program.display(), ?args, "invoking external tool");
    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| RoiError::external(tool, format!("cannot start {}: {e}", program.display())))?;

    // Dropping the wait future on timeout drops the child, which kills it.
    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Err(_) => {
            return Err(RoiError::external(
                tool,
                format!("timed out after {:.1}s", timeout.as_secs_f64()),
            ));
        }
        Ok(result) => result.map_err(|e| RoiError::external(tool, format!("wait failed: {e}")))?,
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let last_line = stderr.lines().last().unwrap_or("").trim();
        return Err(RoiError::external(tool, format!("{}: {last_line}", output.status)));
    }
    Ok(())
}

/// Loads a tool's output mask and checks it matches the input size.
fn read_output_mask(tool: &str, path: &Path, width: u32, height: u32) -> RoiResult<Mask> {
    if !path.is_file() {
        return Err(RoiError::external(tool, format!("no output at {}", path.display())));
    }
    let mask = image::open(path)
        .map_err(|e| RoiError::external(tool, format!("unreadable output {}: {e}", path.display())))?
        .to_luma8();
    if mask.dimensions() != (width, height) {
        return Err(RoiError::external(
            tool,
            format!(
                "output is {}x{}, expected {width}x{height}",
                mask.width(),
                mask.height()
            ),
        ));
    }
    Ok(mask)
}

/// Chan-Vese level-set tool driven through its command line:
/// `chanvese phi0:<mask.txt> mu:.. nu:.. lambda1:.. lambda2:.. tol:.. dt:..
/// maxiter:.. iterperframe:.. <source.bmp> <animation.gif> <final.bmp>`.
#[derive(Debug, Clone)]
pub struct ChanVeseCommand {
    program: PathBuf,
    leading_args: Vec<String>,
    timeout: Duration,
    scratch_root: PathBuf,
}

impl ChanVeseCommand {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration, scratch_root: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            leading_args: Vec::new(),
            timeout,
            scratch_root: scratch_root.into(),
        }
    }

    pub fn from_config(config: &LeafSolverConfig) -> Self {
        Self::new(&config.program, config.timeout(), config.scratch_root())
            .with_leading_args(config.leading_args.clone())
    }

    /// Arguments placed before the tool's own, e.g. for an interpreter wrapper.
    pub fn with_leading_args(mut self, args: Vec<String>) -> Self {
        self.leading_args = args;
        self
    }
}

#[async_trait]
impl ExternalSegmenter for ChanVeseCommand {
    fn name(&self) -> &str {
        "chanvese"
    }

    async fn run(
        &self,
        label: &str,
        initial_mask: &LevelSetMask,
        source: &GrayImage,
        params: &ChanVeseParams,
    ) -> RoiResult<Mask> {
        let (width, height) = source.dimensions();
        if initial_mask.dimensions() != (width, height) {
            return Err(RoiError::external(self.name(), "initial mask does not match the source size"));
        }

        let scratch = ScratchDir::create(&self.scratch_root, label)?;
        let source_path = scratch.file("source.bmp");
        let mask_path = scratch.file("phi0.txt");
        let animation_path = scratch.file("animation.gif");
        let final_path = scratch.file("final.bmp");

        {
            let source = source.clone();
            let text = initial_mask.to_text();
            let (source_path, mask_path) = (source_path.clone(), mask_path.clone());
            blocking(self.name(), move || {
                source.save(&source_path).map_err(|e| RoiError::Encode {
                    path: source_path.clone(),
                    source: e,
                })?;
                std::fs::write(&mask_path, text)
                    .map_err(|e| RoiError::io(format!("writing {}", mask_path.display()), e))
            })
            .await?;
        }

        let mut args: Vec<OsString> = self.leading_args.iter().map(OsString::from).collect();
        let mut phi0 = OsString::from("phi0:");
        phi0.push(&mask_path);
        args.push(phi0);
        args.extend(params.to_args().into_iter().map(OsString::from));
        args.extend([
            source_path.into_os_string(),
            animation_path.into_os_string(),
            final_path.clone().into_os_string(),
        ]);

        run_tool(self.name(), &self.program, &args, self.timeout).await?;

        let tool = self.name().to_string();
        // `scratch` stays alive until the mask has been read back.
        let mask = blocking(self.name(), move || read_output_mask(&tool, &final_path, width, height)).await;
        drop(scratch);
        mask
    }
}

/// Foreground extraction delegated to an external program, invoked as
/// `<program> <input.png> <x> <y> <width> <height> <output_mask.png>`.
#[derive(Debug, Clone)]
pub struct CommandForegroundExtractor {
    program: PathBuf,
    leading_args: Vec<String>,
    timeout: Duration,
    scratch_root: PathBuf,
}

impl CommandForegroundExtractor {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration, scratch_root: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            leading_args: Vec::new(),
            timeout,
            scratch_root: scratch_root.into(),
        }
    }

    /// `None` when no command is configured.
    pub fn from_config(config: &ForegroundConfig) -> Option<Self> {
        config.command.as_ref().map(|program| {
            Self::new(program, config.timeout(), config.scratch_root())
                .with_leading_args(config.leading_args.clone())
        })
    }

    pub fn with_leading_args(mut self, args: Vec<String>) -> Self {
        self.leading_args = args;
        self
    }
}

#[async_trait]
impl ForegroundExtractor for CommandForegroundExtractor {
    fn name(&self) -> &str {
        "foreground-command"
    }

    async fn extract(&self, label: &str, image: &RgbImage, seed: SeedRect) -> RoiResult<Mask> {
        let (width, height) = image.dimensions();
        let scratch = ScratchDir::create(&self.scratch_root, label)?;
        let input_path = scratch.file("input.png");
        let output_path = scratch.file("mask.png");

        {
            let image = image.clone();
            let input_path = input_path.clone();
            blocking(self.name(), move || {
                image.save(&input_path).map_err(|e| RoiError::Encode {
                    path: input_path.clone(),
                    source: e,
                })
            })
            .await?;
        }

        let mut args: Vec<OsString> = self.leading_args.iter().map(OsString::from).collect();
        args.push(input_path.into_os_string());
        args.extend(
            [seed.x, seed.y, seed.width, seed.height]
                .iter()
                .map(|v| OsString::from(v.to_string())),
        );
        args.push(output_path.clone().into_os_string());

        run_tool(self.name(), &self.program, &args, self.timeout).await?;

        let tool = self.name().to_string();
        let mask = blocking(self.name(), move || read_output_mask(&tool, &output_path, width, height)).await;
        drop(scratch);
        mask
    }
}
