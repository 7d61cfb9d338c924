// THEORY:
// Every failure the ROI engine can produce is expressed as one `RoiError`.
// Almost all of them are local to a single image: the dispatcher logs them,
// counts them, and keeps going. Only a failure to build the output tree or to
// start the worker pool ends a run, see `RoiError::is_fatal_for_run`.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result alias used across the crate.
pub type RoiResult<T> = std::result::Result<T, RoiError>;

#[derive(Error, Debug)]
pub enum RoiError {
    /// The image file could not be read or decoded.
    #[error("failed to decode image {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// The cropped image could not be encoded or written.
    #[error("failed to encode image {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// An image has no side record, or a side record has no image.
    #[error("incomplete image/metadata pair: {path}")]
    MissingPair { path: PathBuf },

    /// The metadata record could not be read.
    #[error("unreadable metadata record {path}: {reason}")]
    Metadata { path: PathBuf, reason: String },

    /// The image is too small for the sampling or seeding geometry.
    #[error("degenerate image {width}x{height}: {reason}")]
    DegenerateImage {
        width: u32,
        height: u32,
        reason: &'static str,
    },

    /// No pixel matched the selection; there is nothing to crop.
    #[error("empty selection in {path}")]
    EmptySelection { path: PathBuf },

    /// An out-of-process or native segmenter failed, timed out, or is missing.
    #[error("{tool} failed: {reason}")]
    ExternalTool { tool: String, reason: String },

    #[error("I/O error while {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {reason}")]
    Config { reason: String },

    /// A worker task panicked, was cancelled, or a channel closed early.
    #[error("worker error: {reason}")]
    Worker { reason: String },

    /// Raised only while preparing the run; ends the whole run.
    #[error("cannot prepare output tree {path}: {source}")]
    OutputTree {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl RoiError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn external(tool: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ExternalTool {
            tool: tool.into(),
            reason: reason.into(),
        }
    }

    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    pub fn worker(reason: impl Into<String>) -> Self {
        Self::Worker {
            reason: reason.into(),
        }
    }

    /// Attaches `path` to errors raised by path-agnostic helpers such as `crop`.
    pub fn at(self, path: &Path) -> Self {
        match self {
            RoiError::EmptySelection { path: empty } if empty.as_os_str().is_empty() => {
                RoiError::EmptySelection {
                    path: path.to_path_buf(),
                }
            }
            other => other,
        }
    }

    /// Whether this error must stop the whole run rather than a single image.
    pub fn is_fatal_for_run(&self) -> bool {
        matches!(self, RoiError::OutputTree { .. } | RoiError::Config { .. })
    }

    /// Short, stable label used in logs and in the run report.
    pub fn kind(&self) -> &'static str {
        match self {
            RoiError::Decode { .. } => "decode",
            RoiError::Encode { .. } => "encode",
            RoiError::MissingPair { .. } => "missing-pair",
            RoiError::Metadata { .. } => "metadata",
            RoiError::DegenerateImage { .. } => "degenerate-image",
            RoiError::EmptySelection { .. } => "empty-selection",
            RoiError::ExternalTool { .. } => "external-tool",
            RoiError::Io { .. } => "io",
            RoiError::Config { .. } => "config",
            RoiError::Worker { .. } => "worker",
            RoiError::OutputTree { .. } => "output-tree",
        }
    }
}

#[cfg(feature = "opencv")]
impl From<opencv::Error> for RoiError {
    fn from(source: opencv::Error) -> Self {
        RoiError::external("grabcut", source.to_string())
    }
}
