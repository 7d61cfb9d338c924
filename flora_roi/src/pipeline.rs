// THEORY:
// The `pipeline` module is the per-image API of the ROI engine. `RoiPipeline`
// takes one image job, routes it to the handler for its organ, and writes the
// result into that organ's output folder. It knows nothing about directories of
// jobs or worker pools; `parallel_pipeline` builds on top of it.
//
// Handler table:
//   Flower, Fruit, LeafScan -> threshold, edge or color segmentation, then crop
//   Leaf                    -> contour-solver segmentation, then crop
//   Stem                    -> fixed middle-half crop
//   Entire, Branch          -> verbatim copy
//   Unknown                 -> skipped
//
// A selection that matches no pixel is not an error for the run: the image is
// passed through unmodified and the outcome records that nothing was cropped.

use crate::config::{OrganSegmentation, RoiConfig};
use crate::core_modules::bounds::BoundingBox;
use crate::core_modules::bounds::bounding_extractor::{bounds_by_mask, bounds_of_points, crop};
use crate::core_modules::segmentation::{RoiStrategy, SegmentationPolicy, SegmentationResult, stem_bounds};
use crate::core_modules::utils::image_helper::image_helper;
use crate::core_modules::utils::task::blocking;
use crate::error::{RoiError, RoiResult};
use crate::metadata::ImageJob;
use image::RgbImage;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

// Re-export key data structures for the public API.
pub use crate::core_modules::organ::OrganTag;
pub use crate::core_modules::segmentation::SegmentationTier;

/// What a job is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handler {
    /// Flower, fruit and leaf-scan photographs.
    Segmented(OrganSegmentation),
    Leaf,
    Stem,
    CopyThrough,
    Skip,
}

/// The result of running one job's handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerOutcome {
    pub file_name: String,
    pub organ: OrganTag,
    /// Segmentation tier, for handlers that segment.
    pub tier: Option<SegmentationTier>,
    /// False for copy-throughs and for images passed through on an empty selection.
    pub cropped: bool,
    pub output_path: PathBuf,
}

/// Processes single images according to their organ tag.
pub struct RoiPipeline {
    config: Arc<RoiConfig>,
    policy: SegmentationPolicy,
    output_root: PathBuf,
}

impl RoiPipeline {
    pub fn new(config: Arc<RoiConfig>, policy: SegmentationPolicy, output_root: impl Into<PathBuf>) -> Self {
        Self {
            config,
            policy,
            output_root: output_root.into(),
        }
    }

    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    pub fn policy(&self) -> &SegmentationPolicy {
        &self.policy
    }

    /// Folder that receives the outputs of `organ`.
    pub fn output_dir(&self, organ: OrganTag) -> Option<PathBuf> {
        organ.folder_name().map(|name| self.output_root.join(name))
    }

    pub fn route(&self, organ: OrganTag) -> Handler {
        match organ {
            OrganTag::Flower | OrganTag::Fruit | OrganTag::LeafScan => self
                .config
                .segmentation
                .for_organ(organ)
                .map_or(Handler::Skip, Handler::Segmented),
            OrganTag::Leaf => Handler::Leaf,
            OrganTag::Stem => Handler::Stem,
            OrganTag::Entire | OrganTag::Branch => Handler::CopyThrough,
            OrganTag::Unknown => Handler::Skip,
        }
    }

    /// Runs the handler for `job` and writes its image output.
    pub async fn process(&self, job: &ImageJob) -> RoiResult<HandlerOutcome> {
        let organ = job.record.organ;
        let file_name = job.file_name();
        let folder = self.output_dir(organ).ok_or_else(|| RoiError::Metadata {
            path: job.metadata_path.clone(),
            reason: "no recognized <Content> tag".to_string(),
        })?;
        let target = folder.join(&file_name);
        let label = job
            .image_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| file_name.clone());

        let (tier, cropped) = match self.route(organ) {
            Handler::Skip => {
                return Err(RoiError::Metadata {
                    path: job.metadata_path.clone(),
                    reason: format!("no handler for organ {organ}"),
                });
            }
            Handler::CopyThrough => {
                copy_verbatim(&job.image_path, &target).await?;
                (None, false)
            }
            Handler::Stem => {
                let image = load(&job.image_path).await?;
                let (width, height) = image.dimensions();
                let cropped = self.write_crop(job, image, stem_bounds(width, height), &target).await?;
                (None, cropped)
            }
            Handler::Segmented(settings) => {
                let image = load(&job.image_path).await?;
                let result = match settings.strategy {
                    RoiStrategy::Threshold => {
                        self.policy
                            .segment_threshold(&label, &image, settings.polarity)
                            .await?
                    }
                    RoiStrategy::ColorHeuristic => {
                        let policy = self.policy.clone();
                        let source = image.clone();
                        blocking("color heuristic", move || policy.segment_color_heuristic(&source)).await?
                    }
                    RoiStrategy::EdgeContour => {
                        let policy = self.policy.clone();
                        let source = image.clone();
                        blocking("edge contour", move || policy.segment_edge_contour(&source)).await?
                    }
                };
                let tier = result.tier;
                let bounds = bounds_for(result).await?;
                let cropped = self.write_crop(job, image, bounds, &target).await?;
                (Some(tier), cropped)
            }
            Handler::Leaf => {
                let image = load(&job.image_path).await?;
                let result = self.policy.segment_leaf(&label, &image).await?;
                let tier = result.tier;
                let bounds = bounds_for(result).await?;
                let cropped = self.write_crop(job, image, bounds, &target).await?;
                (Some(tier), cropped)
            }
        };

        let media = job.record.media_id.as_deref().unwrap_or("-");
        match tier {
            Some(tier) => info!(file = %file_name, media, organ = %organ, %tier, cropped, "image processed"),
            None => info!(file = %file_name, media, organ = %organ, cropped, "image processed"),
        }
        Ok(HandlerOutcome {
            file_name,
            organ,
            tier,
            cropped,
            output_path: target,
        })
    }

    /// Crops `image` to `bounds` and saves it. An empty selection passes the
    /// original file through instead. Returns whether a crop was written.
    async fn write_crop(&self, job: &ImageJob, image: RgbImage, bounds: BoundingBox, target: &Path) -> RoiResult<bool> {
        let staged_target = target.to_path_buf();
        let outcome = blocking("crop and encode", move || match crop(&image, &bounds) {
            Ok(cropped) => image_helper::save_atomically(&cropped, &staged_target).map(|_| true),
            Err(RoiError::EmptySelection { .. }) => Ok(false),
            Err(e) => Err(e),
        })
        .await?;

        if !outcome {
            let err = RoiError::EmptySelection { path: PathBuf::new() }.at(&job.image_path);
            warn!(file = %job.image_path.display(), error = %err, "nothing to crop, passing the image through");
            copy_verbatim(&job.image_path, target).await?;
        } else {
            debug!(
                file = %job.image_path.display(),
                top = bounds.top,
                bottom = bounds.bottom,
                left = bounds.left,
                right = bounds.right,
                "crop written"
            );
        }
        Ok(outcome)
    }
}

async fn load(path: &Path) -> RoiResult<RgbImage> {
    let path = path.to_path_buf();
    blocking("decode", move || image_helper::load(&path)).await
}

async fn copy_verbatim(source: &Path, target: &Path) -> RoiResult<()> {
    let (source, target) = (source.to_path_buf(), target.to_path_buf());
    blocking("copy", move || image_helper::copy_atomically(&source, &target)).await
}

/// Box around the outline when there is one, otherwise around the mask.
async fn bounds_for(result: SegmentationResult) -> RoiResult<BoundingBox> {
    blocking("bounding box", move || {
        let (width, height) = result.mask.dimensions();
        Ok(match &result.outline {
            Some(outline) => bounds_of_points(outline, width, height),
            None => bounds_by_mask(&result.mask),
        })
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RoiConfig;
    use crate::metadata::ObservationRecord;
    use image::Rgb;

    struct Fixture {
        root: PathBuf,
        input: PathBuf,
        output: PathBuf,
    }

    impl Fixture {
        fn new() -> Self {
            let root = std::env::temp_dir().join(format!("flora-roi-pipeline-{}", uuid::Uuid::new_v4()));
            let input = root.join("input");
            let output = root.join("output");
            std::fs::create_dir_all(&input).expect("input dir");
            for organ in OrganTag::KNOWN {
                let folder = organ.folder_name().expect("folder");
                std::fs::create_dir_all(output.join(folder)).expect("output dir");
            }
            Self { root, input, output }
        }

        fn job(&self, stem: &str, organ: OrganTag, image: &RgbImage) -> ImageJob {
            let image_path = self.input.join(format!("{stem}.png"));
            image.save(&image_path).expect("save input");
            let metadata_path = self.input.join(format!("{stem}.xml"));
            std::fs::write(&metadata_path, "<Image/>").expect("save record");
            ImageJob {
                image_path,
                metadata_path,
                record: ObservationRecord {
                    organ,
                    observation_id: None,
                    media_id: None,
                },
            }
        }

        fn pipeline(&self, config: RoiConfig) -> RoiPipeline {
            let policy = SegmentationPolicy::new(&config);
            RoiPipeline::new(Arc::new(config), policy, &self.output)
        }
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            std::fs::remove_dir_all(&self.root).ok();
        }
    }

    #[test]
    fn handler_table_matches_organs() {
        let fixture = Fixture::new();
        let pipeline = fixture.pipeline(RoiConfig::default());
        assert!(matches!(pipeline.route(OrganTag::Flower), Handler::Segmented(_)));
        assert!(matches!(pipeline.route(OrganTag::Fruit), Handler::Segmented(_)));
        assert!(matches!(pipeline.route(OrganTag::LeafScan), Handler::Segmented(_)));
        assert_eq!(pipeline.route(OrganTag::Leaf), Handler::Leaf);
        assert_eq!(pipeline.route(OrganTag::Stem), Handler::Stem);
        assert_eq!(pipeline.route(OrganTag::Entire), Handler::CopyThrough);
        assert_eq!(pipeline.route(OrganTag::Branch), Handler::CopyThrough);
        assert_eq!(pipeline.route(OrganTag::Unknown), Handler::Skip);
    }

    #[tokio::test]
    async fn stem_is_cropped_to_the_middle_half() {
        let fixture = Fixture::new();
        let image = RgbImage::from_fn(200, 100, |x, _| Rgb([x as u8, 0, 0]));
        let job = fixture.job("stem-1", OrganTag::Stem, &image);

        let outcome = fixture.pipeline(RoiConfig::default()).process(&job).await.expect("process");
        assert!(outcome.cropped);
        assert_eq!(outcome.output_path, fixture.output.join("stem").join("stem-1.png"));

        let written = image::open(&outcome.output_path).expect("open").to_rgb8();
        assert_eq!(written.dimensions(), (100, 100));
        assert_eq!(written.get_pixel(0, 0).0[0], 50);
        assert_eq!(written.get_pixel(99, 99).0[0], 149);
    }

    #[tokio::test]
    async fn flower_is_cropped_to_its_bright_region() {
        let fixture = Fixture::new();
        let mut image = RgbImage::from_pixel(120, 90, Rgb([20, 50, 20]));
        for y in 30..60 {
            for x in 40..80 {
                image.put_pixel(x, y, Rgb([250, 245, 240]));
            }
        }
        let job = fixture.job("flower-1", OrganTag::Flower, &image);

        let outcome = fixture.pipeline(RoiConfig::default()).process(&job).await.expect("process");
        assert_eq!(outcome.tier, Some(SegmentationTier::Cheap));
        assert!(outcome.cropped);
        let (width, height) = image::image_dimensions(&outcome.output_path).expect("dimensions");
        // The blur widens the bright region by a few pixels at most.
        assert!((36..=52).contains(&width), "width {width}");
        assert!((26..=42).contains(&height), "height {height}");
    }

    #[tokio::test]
    async fn fruit_can_be_cropped_along_its_edges() {
        let fixture = Fixture::new();
        let mut config = RoiConfig::default();
        config.segmentation.fruit.strategy = RoiStrategy::EdgeContour;
        let mut image = RgbImage::from_pixel(160, 120, Rgb([20, 50, 20]));
        for y in 20..100 {
            for x in 30..130 {
                image.put_pixel(x, y, Rgb([250, 200, 60]));
            }
        }
        let job = fixture.job("fruit-edges", OrganTag::Fruit, &image);

        let outcome = fixture.pipeline(config).process(&job).await.expect("process");
        assert_eq!(outcome.tier, Some(SegmentationTier::EdgeContour));
        assert!(outcome.cropped);
        let (width, height) = image::image_dimensions(&outcome.output_path).expect("dimensions");
        assert!((98..=104).contains(&width), "width {width}");
        assert!((78..=84).contains(&height), "height {height}");
    }

    #[tokio::test]
    async fn empty_color_selection_passes_the_image_through() {
        let fixture = Fixture::new();
        let mut config = RoiConfig::default();
        config.segmentation.fruit.strategy = RoiStrategy::ColorHeuristic;
        let image = RgbImage::from_pixel(40, 40, Rgb([0, 0, 0]));
        let job = fixture.job("fruit-1", OrganTag::Fruit, &image);

        let outcome = fixture.pipeline(config).process(&job).await.expect("process");
        assert_eq!(outcome.tier, Some(SegmentationTier::ColorHeuristic));
        assert!(!outcome.cropped);
        assert_eq!(
            std::fs::read(&job.image_path).expect("read input"),
            std::fs::read(&outcome.output_path).expect("read output")
        );
    }

    #[tokio::test]
    async fn copy_through_is_verbatim() {
        let fixture = Fixture::new();
        let image = RgbImage::from_pixel(16, 16, Rgb([1, 2, 3]));
        let job = fixture.job("branch-1", OrganTag::Branch, &image);

        let outcome = fixture.pipeline(RoiConfig::default()).process(&job).await.expect("process");
        assert_eq!(outcome.tier, None);
        assert!(!outcome.cropped);
        assert_eq!(outcome.output_path, fixture.output.join("branch").join("branch-1.png"));
        assert_eq!(
            std::fs::read(&job.image_path).expect("read input"),
            std::fs::read(&outcome.output_path).expect("read output")
        );
    }

    #[tokio::test]
    async fn undecodable_image_fails_only_that_job() {
        let fixture = Fixture::new();
        let image = RgbImage::new(8, 8);
        let job = fixture.job("broken", OrganTag::Stem, &image);
        std::fs::write(&job.image_path, b"garbage").expect("corrupt");

        let result = fixture.pipeline(RoiConfig::default()).process(&job).await;
        assert!(matches!(result, Err(RoiError::Decode { .. })));
    }
}
