// THEORY:
// The `SegmentationPolicy` decides, per image, which pixels belong to the organ.
// It owns every strategy that produces a mask and hands the mask to the
// bounding extractor unchanged.
//
// Key architectural principles & algorithm steps (threshold strategy):
// 1.  **Cheap Heuristic**: grayscale, Gaussian blur, Otsu threshold with the
//     organ's polarity.
// 2.  **Complexity Signal**: the borders of the thresholded image are counted. A
//     clean separation between organ and background gives few borders.
// 3.  **Accept or Escalate**: with at most `contour_limit` borders the
//     thresholded image is the mask. Above it the image is considered cluttered
//     and the expensive `ForegroundExtractor` is run, seeded with an inset
//     rectangle.
// 4.  **One Output Shape**: every path ends in a `SegmentationResult`, a mask
//     plus the tier that produced it.
//
// The edge strategy blurs lightly, runs Canny, fills every large closed
// outline of the edge map and keeps the result as the mask. The color strategy
// profiles the border band, normalizes the palette, and
// selects the pixels of the dominant non-background color. The leaf strategy
// refines a coarse centered rectangle with the external contour solver and keeps
// the outline enclosing the largest area. Stems need no segmentation at all: the
// middle half of the frame is kept.

use crate::config::{ChanVeseParams, EdgeContourConfig, ForegroundBackend, RoiConfig};
use crate::core_modules::background::profile;
use crate::core_modules::bounds::BoundingBox;
use crate::core_modules::contours::{count_contours, fill_large_outlines, largest_contour};
use crate::core_modules::external::{
    ChanVeseCommand, CommandForegroundExtractor, ExternalSegmenter, ForegroundExtractor, LevelSetMask, SeedRect,
};
use crate::core_modules::foreground::locate;
use crate::core_modules::mask::{BACKGROUND, FOREGROUND, Mask, ThresholdPolarity, grayscale_blurred, otsu_binary};
use crate::core_modules::palette::normalize;
use crate::core_modules::pixel::pixel::Pixel;
use crate::core_modules::utils::task::blocking;
use crate::error::{RoiError, RoiResult};
use image::{GrayImage, Luma, RgbImage};
use imageproc::edges::canny;
use imageproc::point::Point;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// How an organ's ROI is found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoiStrategy {
    /// Otsu threshold, escalating to foreground extraction on cluttered images.
    Threshold,
    /// Dominant non-background color bucket.
    ColorHeuristic,
    /// Canny edges with large closed outlines filled.
    EdgeContour,
}

/// Which path produced a mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SegmentationTier {
    Cheap,
    Escalated,
    ColorHeuristic,
    EdgeContour,
    ContourSolver,
}

impl std::fmt::Display for SegmentationTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SegmentationTier::Cheap => "cheap",
            SegmentationTier::Escalated => "escalated",
            SegmentationTier::ColorHeuristic => "color-heuristic",
            SegmentationTier::EdgeContour => "edge-contour",
            SegmentationTier::ContourSolver => "contour-solver",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct SegmentationResult {
    pub mask: Mask,
    pub tier: SegmentationTier,
    /// Borders counted on the thresholded image, when the threshold path ran.
    pub contour_count: Option<usize>,
    /// Outline to bound instead of the mask (contour-solver path).
    pub outline: Option<Vec<Point<i32>>>,
}

impl SegmentationResult {
    fn from_mask(mask: Mask, tier: SegmentationTier) -> Self {
        Self {
            mask,
            tier,
            contour_count: None,
            outline: None,
        }
    }
}

/// Deterministic stem crop: full height, columns [W/4, 3W/4).
pub fn stem_bounds(width: u32, height: u32) -> BoundingBox {
    let (left, end) = (width / 4, width * 3 / 4);
    if end <= left || height == 0 {
        return BoundingBox::empty(width, height);
    }
    BoundingBox {
        top: 0,
        bottom: height - 1,
        left,
        right: end - 1,
    }
}

#[derive(Clone)]
pub struct SegmentationPolicy {
    blur_sigma: f32,
    contour_limit: usize,
    seed_margin: u32,
    band_width: u32,
    noise_threshold: f64,
    edge: EdgeContourConfig,
    solver_params: ChanVeseParams,
    extractor: Option<Arc<dyn ForegroundExtractor>>,
    solver: Option<Arc<dyn ExternalSegmenter>>,
}

impl SegmentationPolicy {
    /// Policy with no expensive capabilities attached.
    pub fn new(config: &RoiConfig) -> Self {
        Self {
            blur_sigma: config.segmentation.blur_sigma,
            contour_limit: config.segmentation.contour_limit,
            seed_margin: config.segmentation.seed_margin,
            band_width: config.sampling.band_width,
            noise_threshold: config.sampling.noise_threshold,
            edge: config.segmentation.edge.clone(),
            solver_params: config.leaf_solver.params.clone(),
            extractor: None,
            solver: None,
        }
    }

    /// Policy with the capabilities the configuration asks for.
    pub fn from_config(config: &RoiConfig) -> RoiResult<Self> {
        let extractor: Option<Arc<dyn ForegroundExtractor>> = match config.foreground.backend {
            ForegroundBackend::GrabCut => Some(grabcut_backend(config)?),
            ForegroundBackend::Command => CommandForegroundExtractor::from_config(&config.foreground)
                .map(|command| Arc::new(command) as Arc<dyn ForegroundExtractor>),
            ForegroundBackend::Disabled => None,
        };
        let solver: Arc<dyn ExternalSegmenter> = Arc::new(ChanVeseCommand::from_config(&config.leaf_solver));

        let mut policy = Self::new(config).with_segmenter(solver);
        if let Some(extractor) = extractor {
            policy = policy.with_extractor(extractor);
        }
        Ok(policy)
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn ForegroundExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    pub fn with_segmenter(mut self, solver: Arc<dyn ExternalSegmenter>) -> Self {
        self.solver = Some(solver);
        self
    }

    pub fn extractor_name(&self) -> Option<&str> {
        self.extractor.as_deref().map(|e| e.name())
    }

    /// Whether `contour_count` borders are too many for the cheap path.
    pub fn escalates(&self, contour_count: usize) -> bool {
        contour_count > self.contour_limit
    }

    /// Threshold strategy: blur, binarize with `polarity`, then accept or escalate.
    pub async fn segment_threshold(
        &self,
        label: &str,
        image: &RgbImage,
        polarity: ThresholdPolarity,
    ) -> RoiResult<SegmentationResult> {
        let sigma = self.blur_sigma;
        let source = image.clone();
        let (binary, level) = blocking("threshold", move || {
            let gray = grayscale_blurred(&source, sigma);
            Ok(otsu_binary(&gray, polarity))
        })
        .await?;
        debug!(label, level, ?polarity, "otsu threshold applied");
        self.segment_binary(label, image, binary).await
    }

    /// Accept-or-escalate decision on an already thresholded image.
    pub async fn segment_binary(&self, label: &str, image: &RgbImage, binary: Mask) -> RoiResult<SegmentationResult> {
        let (binary, contour_count) = blocking("contour count", move || {
            let count = count_contours(&binary);
            Ok((binary, count))
        })
        .await?;

        if !self.escalates(contour_count) {
            debug!(label, contour_count, "cheap path accepted");
            return Ok(SegmentationResult {
                mask: binary,
                tier: SegmentationTier::Cheap,
                contour_count: Some(contour_count),
                outline: None,
            });
        }

        let (width, height) = image.dimensions();
        let seed = SeedRect::inset(width, height, self.seed_margin)?;
        let extractor = self
            .extractor
            .as_ref()
            .ok_or_else(|| RoiError::external("foreground extraction", "no foreground extractor is configured"))?;
        info!(
            label,
            contour_count,
            limit = self.contour_limit,
            extractor = extractor.name(),
            "escalating to foreground extraction"
        );
        let mask = extractor.extract(label, image, seed).await?;
        if mask.dimensions() != (width, height) {
            return Err(RoiError::external(extractor.name(), "mask size differs from the image"));
        }
        Ok(SegmentationResult {
            mask,
            tier: SegmentationTier::Escalated,
            contour_count: Some(contour_count),
            outline: None,
        })
    }

    /// Color strategy. Yields an empty mask when no organ color stands out.
    pub fn segment_color_heuristic(&self, image: &RgbImage) -> RoiResult<SegmentationResult> {
        let background = profile(image, self.band_width)?;
        let normalized = normalize(image, &background, self.noise_threshold);
        let organ_color = locate(&normalized, background.predominant);
        debug!(
            predominant = %background.predominant,
            organ = organ_color.map(|b| b.name()).unwrap_or("unknown"),
            "color profile"
        );

        let (width, height) = image.dimensions();
        let mask = match organ_color {
            Some(bucket) => GrayImage::from_fn(width, height, |x, y| {
                let keep = bucket.matches(&Pixel::from(image.get_pixel(x, y)));
                Luma([if keep { FOREGROUND } else { BACKGROUND }])
            }),
            None => GrayImage::new(width, height),
        };
        Ok(SegmentationResult::from_mask(mask, SegmentationTier::ColorHeuristic))
    }

    /// Edge strategy. Yields an empty mask when the image has no edges.
    pub fn segment_edge_contour(&self, image: &RgbImage) -> RoiResult<SegmentationResult> {
        let gray = grayscale_blurred(image, self.edge.blur_sigma);
        let edges = canny(&gray, self.edge.canny_low, self.edge.canny_high);
        let (binary, _) = otsu_binary(&edges, ThresholdPolarity::BrightForeground);
        let mut mask = edges;
        let filled = fill_large_outlines(&mut mask, &binary, self.edge.min_fill_area);
        debug!(filled, min_area = self.edge.min_fill_area, "edge outlines filled");
        Ok(SegmentationResult::from_mask(mask, SegmentationTier::EdgeContour))
    }

    /// Leaf strategy: coarse rectangle, external contour solver, largest outline.
    pub async fn segment_leaf(&self, label: &str, image: &RgbImage) -> RoiResult<SegmentationResult> {
        let solver = self
            .solver
            .as_ref()
            .ok_or_else(|| RoiError::external("contour solver", "no contour solver is configured"))?;

        let sigma = self.blur_sigma;
        let source = image.clone();
        let gray = blocking("leaf preprocessing", move || Ok(grayscale_blurred(&source, sigma))).await?;
        let (width, height) = gray.dimensions();
        let initial = LevelSetMask::centered_rectangle(width, height);

        let final_mask = solver.run(label, &initial, &gray, &self.solver_params).await?;
        if final_mask.dimensions() != (width, height) {
            return Err(RoiError::external(solver.name(), "mask size differs from the image"));
        }
        let (mask, outline) = blocking("leaf outline", move || {
            let mask = GrayImage::from_fn(width, height, |x, y| {
                let inside = final_mask.get_pixel(x, y).0[0] != BACKGROUND;
                Luma([if inside { FOREGROUND } else { BACKGROUND }])
            });
            let outline = largest_contour(&mask).unwrap_or_default();
            Ok((mask, outline))
        })
        .await?;
        debug!(label, outline_points = outline.len(), "leaf outline selected");

        Ok(SegmentationResult {
            mask,
            tier: SegmentationTier::ContourSolver,
            contour_count: None,
            outline: Some(outline),
        })
    }
}

#[cfg(feature = "opencv")]
fn grabcut_backend(config: &RoiConfig) -> RoiResult<Arc<dyn ForegroundExtractor>> {
    Ok(Arc::new(crate::core_modules::grabcut::GrabCutExtractor::new(
        config.foreground.iterations,
    )))
}

#[cfg(not(feature = "opencv"))]
fn grabcut_backend(_config: &RoiConfig) -> RoiResult<Arc<dyn ForegroundExtractor>> {
    Err(RoiError::config(
        "foreground.backend is \"grab_cut\" but flora_roi was built without the `opencv` feature",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::bounds::bounding_extractor::{bounds_by_bucket, bounds_by_mask, bounds_of_points};
    use crate::core_modules::color_bucket::ColorBucket;
    use async_trait::async_trait;
    use image::Rgb;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Records calls and returns the seed rectangle as the mask.
    #[derive(Default)]
    struct SeedEcho {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ForegroundExtractor for SeedEcho {
        fn name(&self) -> &str {
            "seed-echo"
        }

        async fn extract(&self, _label: &str, image: &RgbImage, seed: SeedRect) -> RoiResult<Mask> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let (width, height) = image.dimensions();
            Ok(GrayImage::from_fn(width, height, |x, y| {
                let inside = x >= seed.x && x < seed.x + seed.width && y >= seed.y && y < seed.y + seed.height;
                Luma([if inside { FOREGROUND } else { BACKGROUND }])
            }))
        }
    }

    /// Returns a prepared final mask and keeps the initial level set it was given.
    struct PreparedSolver {
        result: Mask,
        seen: Mutex<Option<LevelSetMask>>,
    }

    #[async_trait]
    impl ExternalSegmenter for PreparedSolver {
        fn name(&self) -> &str {
            "prepared"
        }

        async fn run(
            &self,
            _label: &str,
            initial_mask: &LevelSetMask,
            _source: &GrayImage,
            _params: &ChanVeseParams,
        ) -> RoiResult<Mask> {
            if let Ok(mut seen) = self.seen.lock() {
                *seen = Some(initial_mask.clone());
            }
            Ok(self.result.clone())
        }
    }

    /// `count` disjoint 3x3 squares on a 10-column grid with 3 px gaps.
    fn blobs(count: u32) -> Mask {
        let mut mask = GrayImage::new(64, 40);
        for i in 0..count {
            let (col, row) = (i % 10, i / 10);
            for y in 0..3 {
                for x in 0..3 {
                    mask.put_pixel(2 + col * 6 + x, 2 + row * 6 + y, Luma([FOREGROUND]));
                }
            }
        }
        mask
    }

    fn policy_with(extractor: Arc<SeedEcho>) -> SegmentationPolicy {
        SegmentationPolicy::new(&RoiConfig::default()).with_extractor(extractor)
    }

    #[tokio::test]
    async fn fifty_blobs_stay_on_the_cheap_path() {
        let extractor = Arc::new(SeedEcho::default());
        let policy = policy_with(extractor.clone());
        let image = RgbImage::new(64, 40);
        let result = policy.segment_binary("fifty", &image, blobs(50)).await.expect("segment");
        assert_eq!(result.tier, SegmentationTier::Cheap);
        assert_eq!(result.contour_count, Some(50));
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn fifty_one_blobs_escalate() {
        let extractor = Arc::new(SeedEcho::default());
        let policy = policy_with(extractor.clone());
        let image = RgbImage::new(64, 40);
        let result = policy.segment_binary("fifty-one", &image, blobs(51)).await.expect("segment");
        assert_eq!(result.tier, SegmentationTier::Escalated);
        assert_eq!(result.contour_count, Some(51));
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 1);
        // The seed is inset by 10 px on every side.
        assert_eq!(result.mask.get_pixel(10, 10).0[0], FOREGROUND);
        assert_eq!(result.mask.get_pixel(9, 10).0[0], BACKGROUND);
        assert_eq!(result.mask.get_pixel(53, 29).0[0], FOREGROUND);
        assert_eq!(result.mask.get_pixel(54, 29).0[0], BACKGROUND);
    }

    #[tokio::test]
    async fn escalation_without_an_extractor_is_a_tool_error() {
        let policy = SegmentationPolicy::new(&RoiConfig::default());
        let result = policy.segment_binary("lonely", &RgbImage::new(64, 40), blobs(51)).await;
        assert!(matches!(result, Err(RoiError::ExternalTool { .. })));
    }

    #[tokio::test]
    async fn escalation_on_a_tiny_image_is_degenerate() {
        let policy = policy_with(Arc::new(SeedEcho::default()));
        let result = policy
            .segment_binary("tiny", &RgbImage::new(18, 40), GrayImage::new(18, 40))
            .await;
        // An empty binary image has no borders: cheap path, no seed needed.
        assert_eq!(result.expect("cheap").tier, SegmentationTier::Cheap);

        let mut busy = GrayImage::new(18, 40);
        for i in 0..60u32 {
            busy.put_pixel((i % 6) * 3, (i / 6) * 3 + 1, Luma([FOREGROUND]));
        }
        let result = policy.segment_binary("tiny", &RgbImage::new(18, 40), busy).await;
        assert!(matches!(result, Err(RoiError::DegenerateImage { width: 18, .. })));
    }

    #[tokio::test]
    async fn bright_flower_on_dark_field_takes_the_cheap_path() {
        let mut image = RgbImage::from_pixel(120, 90, Rgb([15, 40, 15]));
        for y in 30..60 {
            for x in 40..80 {
                image.put_pixel(x, y, Rgb([250, 240, 230]));
            }
        }
        let policy = policy_with(Arc::new(SeedEcho::default()));
        let result = policy
            .segment_threshold("flower", &image, ThresholdPolarity::BrightForeground)
            .await
            .expect("segment");
        assert_eq!(result.tier, SegmentationTier::Cheap);
        assert_eq!(result.mask.get_pixel(60, 45).0[0], FOREGROUND);
        assert_eq!(result.mask.get_pixel(5, 5).0[0], BACKGROUND);
    }

    #[test]
    fn color_heuristic_finds_the_yellow_square() {
        let mut image = RgbImage::from_pixel(20, 20, Rgb([0, 0, 0]));
        for y in 5..15 {
            for x in 5..15 {
                image.put_pixel(x, y, Rgb([255, 255, 0]));
            }
        }
        let background = profile(&image, 10).expect("profile");
        assert_eq!(background.predominant, ColorBucket::Black);
        let normalized = normalize(&image, &background, 0.10);
        assert_eq!(locate(&normalized, background.predominant), Some(ColorBucket::Yellow));

        let policy = SegmentationPolicy::new(&RoiConfig::default());
        let result = policy.segment_color_heuristic(&image).expect("segment");
        assert_eq!(result.tier, SegmentationTier::ColorHeuristic);
        let from_mask = bounds_by_mask(&result.mask);
        let by_predicate = bounds_by_bucket(&image, ColorBucket::Yellow);
        assert_eq!(from_mask, by_predicate);
        assert_eq!(
            by_predicate,
            BoundingBox {
                top: 5,
                bottom: 14,
                left: 5,
                right: 14
            }
        );
    }

    #[test]
    fn color_heuristic_without_an_organ_color_is_empty() {
        let image = RgbImage::from_pixel(30, 30, Rgb([0, 0, 0]));
        let policy = SegmentationPolicy::new(&RoiConfig::default());
        let result = policy.segment_color_heuristic(&image).expect("segment");
        assert!(result.mask.pixels().all(|p| p.0[0] == BACKGROUND));
    }

    #[tokio::test]
    async fn leaf_keeps_the_largest_outline() {
        let mut final_mask = GrayImage::new(90, 60);
        for y in 10..50 {
            for x in 20..70 {
                final_mask.put_pixel(x, y, Luma([255]));
            }
        }
        for y in 2..6 {
            for x in 2..6 {
                final_mask.put_pixel(x, y, Luma([255]));
            }
        }
        let solver = Arc::new(PreparedSolver {
            result: final_mask,
            seen: Mutex::new(None),
        });
        let policy = SegmentationPolicy::new(&RoiConfig::default()).with_segmenter(solver.clone());
        let image = RgbImage::from_pixel(90, 60, Rgb([100, 140, 90]));

        let result = policy.segment_leaf("leaf", &image).await.expect("segment");
        assert_eq!(result.tier, SegmentationTier::ContourSolver);
        let outline = result.outline.expect("outline");
        let bounds = bounds_of_points(&outline, 90, 60);
        assert_eq!(
            bounds,
            BoundingBox {
                top: 10,
                bottom: 49,
                left: 20,
                right: 69
            }
        );

        let seen = solver.seen.lock().expect("lock").clone().expect("initial mask");
        assert_eq!(seen.dimensions(), (90, 60));
        assert_eq!(seen.value(15, 10), 1);
        assert_eq!(seen.value(16, 11), 0);
        assert_eq!(seen.value(0, 0), -1);
    }

    #[test]
    fn stem_keeps_the_middle_half() {
        let bounds = stem_bounds(200, 100);
        assert_eq!(
            bounds,
            BoundingBox {
                top: 0,
                bottom: 99,
                left: 50,
                right: 149
            }
        );
        assert_eq!((bounds.width(), bounds.height()), (100, 100));
        assert!(stem_bounds(1, 10).is_empty());
    }

    #[test]
    fn color_heuristic_on_an_other_background_finds_the_organ() {
        let mut image = RgbImage::from_pixel(40, 40, Rgb([160, 100, 160]));
        for y in 10..30 {
            for x in 10..30 {
                image.put_pixel(x, y, Rgb([30, 200, 30]));
            }
        }
        let policy = SegmentationPolicy::new(&RoiConfig::default());
        let result = policy.segment_color_heuristic(&image).expect("segment");
        assert_eq!(
            bounds_by_mask(&result.mask),
            BoundingBox {
                top: 10,
                bottom: 29,
                left: 10,
                right: 29
            }
        );
    }

    #[test]
    fn edge_contour_bounds_a_bright_organ() {
        let mut image = RgbImage::from_pixel(160, 120, Rgb([20, 50, 20]));
        for y in 20..100 {
            for x in 30..130 {
                image.put_pixel(x, y, Rgb([250, 245, 240]));
            }
        }
        let policy = SegmentationPolicy::new(&RoiConfig::default());
        let result = policy.segment_edge_contour(&image).expect("segment");
        assert_eq!(result.tier, SegmentationTier::EdgeContour);

        let bounds = bounds_by_mask(&result.mask);
        assert!((18..=21).contains(&bounds.top), "{bounds:?}");
        assert!((98..=101).contains(&bounds.bottom), "{bounds:?}");
        assert!((28..=31).contains(&bounds.left), "{bounds:?}");
        assert!((128..=131).contains(&bounds.right), "{bounds:?}");
    }

    #[test]
    fn edge_contour_on_a_flat_image_is_empty() {
        let image = RgbImage::from_pixel(64, 48, Rgb([90, 90, 90]));
        let policy = SegmentationPolicy::new(&RoiConfig::default());
        let result = policy.segment_edge_contour(&image).expect("segment");
        assert!(bounds_by_mask(&result.mask).is_empty());
    }

    #[tokio::test]
    async fn undersized_solver_mask_is_a_tool_error() {
        let solver = Arc::new(PreparedSolver {
            result: GrayImage::new(10, 10),
            seen: Mutex::new(None),
        });
        let policy = SegmentationPolicy::new(&RoiConfig::default()).with_segmenter(solver);
        let image = RgbImage::from_pixel(90, 60, Rgb([100, 140, 90]));
        let result = policy.segment_leaf("leaf", &image).await;
        assert!(matches!(result, Err(RoiError::ExternalTool { .. })));
    }

    #[test]
    fn configured_backend_names_the_extractor() {
        let mut config = RoiConfig::default();
        config.foreground.backend = ForegroundBackend::Disabled;
        assert_eq!(SegmentationPolicy::from_config(&config).expect("policy").extractor_name(), None);

        config.foreground.backend = ForegroundBackend::Command;
        config.foreground.command = Some("segment-foreground".into());
        assert_eq!(
            SegmentationPolicy::from_config(&config).expect("policy").extractor_name(),
            Some("foreground-command")
        );
    }
}
