// THEORY:
// This file is the entry point of the `flora_roi` library crate. It exposes the
// per-image `RoiPipeline` and the directory-level `DispatchPipeline` as the
// public interface, together with the configuration and error types they use.
//
// The image analysis building blocks (color buckets, background profiling,
// palette normalization, bounding boxes, segmentation and the external tool
// capabilities) live under `core_modules`. They are public so tools such as
// `roi_inspector` can drive individual stages, but most callers only need the
// two pipelines.

pub mod config;
pub mod core_modules;
pub mod error;
pub mod metadata;
pub mod parallel_pipeline;
pub mod pipeline;
