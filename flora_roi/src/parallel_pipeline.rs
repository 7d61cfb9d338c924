// THEORY:
// The `parallel_pipeline` module runs `RoiPipeline` over a whole input
// directory. Images are independent, so the only shared state is the output
// tree (created once, up front) and the run report (assembled on the main task
// after every job has been joined).
//
// Key architectural principles:
// 1. **Fixed Worker Pool**: a dispatcher task hands jobs round-robin to a fixed
//    number of worker tasks over per-worker unbounded channels. Each job carries
//    a oneshot sender for its result, so submitting never blocks.
// 2. **Failure Isolation**: every job runs in its own spawned task inside its
//    worker. A handler error or a panic becomes a per-image failure; siblings
//    and the pool carry on.
// 3. **Cheap Work Inline**: copy-through organs are a file copy and are handled
//    on the main task without touching the pool.
// 4. **Record Travels With Image**: the metadata record is copied into the same
//    organ folder as its image, whatever the handler's outcome.

use crate::config::{DEFAULT_WORKER_COUNT, RoiConfig};
use crate::core_modules::organ::OrganTag;
use crate::core_modules::segmentation::{SegmentationPolicy, SegmentationTier};
use crate::core_modules::utils::image_helper::image_helper;
use crate::core_modules::utils::task::blocking;
use crate::error::{RoiError, RoiResult};
use crate::metadata::{ImageJob, read_record};
use crate::pipeline::{Handler, HandlerOutcome, RoiPipeline};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Image extensions accepted next to a record, in order of preference.
pub const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];
pub const RECORD_EXTENSION: &str = "xml";
pub const OBSERVATION_INDEX: &str = "observations.txt";

pub struct ImageTask {
    pub job: ImageJob,
    pub result_sender: oneshot::Sender<RoiResult<HandlerOutcome>>,
}

pub struct WorkerPool {
    task_sender: Option<mpsc::UnboundedSender<ImageTask>>,
    dispatcher: JoinHandle<()>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Starts `size` workers that run jobs through `pipeline`. Must be called
    /// from within a Tokio runtime.
    pub fn new(pipeline: Arc<RoiPipeline>, size: usize) -> RoiResult<Self> {
        if size == 0 {
            return Err(RoiError::config("worker pool needs at least one worker"));
        }
        let (task_sender, mut task_receiver) = mpsc::unbounded_channel::<ImageTask>();

        let (worker_senders, worker_receivers): (Vec<_>, Vec<_>) =
            (0..size).map(|_| mpsc::unbounded_channel::<ImageTask>()).unzip();

        let dispatcher = tokio::spawn(async move {
            let mut worker_idx = 0;
            while let Some(task) = task_receiver.recv().await {
                if let Err(mpsc::error::SendError(task)) = worker_senders[worker_idx].send(task) {
                    let _ = task
                        .result_sender
                        .send(Err(RoiError::worker(format!("worker {worker_idx} is gone"))));
                }
                worker_idx = (worker_idx + 1) % size;
            }
        });

        let workers = worker_receivers
            .into_iter()
            .enumerate()
            .map(|(worker_idx, mut worker_receiver)| {
                let pipeline = Arc::clone(&pipeline);
                tokio::spawn(async move {
                    while let Some(task) = worker_receiver.recv().await {
                        let result = Self::run_isolated(Arc::clone(&pipeline), task.job).await;
                        if task.result_sender.send(result).is_err() {
                            debug!(worker = worker_idx, "result receiver dropped");
                        }
                    }
                })
            })
            .collect();

        debug!(workers = size, "worker pool started");
        Ok(Self {
            task_sender: Some(task_sender),
            dispatcher,
            workers,
        })
    }

    /// Runs one job in its own task so a panic stays with that image.
    async fn run_isolated(pipeline: Arc<RoiPipeline>, job: ImageJob) -> RoiResult<HandlerOutcome> {
        let image_path = job.image_path.clone();
        match tokio::spawn(async move { pipeline.process(&job).await }).await {
            Ok(result) => result,
            Err(e) => Err(RoiError::worker(format!(
                "handler for {} did not finish: {e}",
                image_path.display()
            ))),
        }
    }

    /// Queues `job` and returns the receiver its result will arrive on.
    pub fn submit(&self, job: ImageJob) -> RoiResult<oneshot::Receiver<RoiResult<HandlerOutcome>>> {
        let sender = self
            .task_sender
            .as_ref()
            .ok_or_else(|| RoiError::worker("worker pool is shut down"))?;
        let (result_sender, result_receiver) = oneshot::channel();
        sender
            .send(ImageTask { job, result_sender })
            .map_err(|_| RoiError::worker("failed to send task to worker pool"))?;
        Ok(result_receiver)
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Closes the submit side and waits for the dispatcher and every worker.
    pub async fn shutdown(mut self) -> RoiResult<()> {
        self.task_sender.take();
        self.dispatcher
            .await
            .map_err(|e| RoiError::worker(format!("dispatcher: {e}")))?;
        for (worker_idx, worker) in self.workers.into_iter().enumerate() {
            worker
                .await
                .map_err(|e| RoiError::worker(format!("worker {worker_idx}: {e}")))?;
        }
        Ok(())
    }
}

/// Record/image pairs found in an input directory.
#[derive(Debug, Default)]
pub struct InputScan {
    /// `(record, image)` pairs, sorted by stem.
    pub pairs: Vec<(PathBuf, PathBuf)>,
    /// Files whose counterpart is missing, as `MissingPair` errors.
    pub unpaired: Vec<RoiError>,
}

#[derive(Default)]
struct StemEntry {
    record: Option<PathBuf>,
    images: Vec<PathBuf>,
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension().map(|e| e.to_string_lossy().to_ascii_lowercase())
}

fn image_rank(path: &Path) -> usize {
    extension_of(path)
        .and_then(|ext| IMAGE_EXTENSIONS.iter().position(|known| *known == ext))
        .unwrap_or(IMAGE_EXTENSIONS.len())
}

/// Pairs every `.xml` record in `dir` with the image of the same stem.
/// Extensions match case-insensitively; files of other types are ignored.
pub fn scan_input(dir: &Path) -> RoiResult<InputScan> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| RoiError::io(format!("reading input directory {}", dir.display()), e))?;

    let mut stems: BTreeMap<String, StemEntry> = BTreeMap::new();
    for entry in entries {
        let path = entry
            .map_err(|e| RoiError::io(format!("reading input directory {}", dir.display()), e))?
            .path();
        if !path.is_file() {
            continue;
        }
        let (Some(ext), Some(stem)) = (extension_of(&path), path.file_stem()) else {
            continue;
        };
        let slot = stems.entry(stem.to_string_lossy().into_owned()).or_default();
        if ext == RECORD_EXTENSION {
            slot.record = Some(path);
        } else if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            slot.images.push(path);
        }
    }

    let mut scan = InputScan::default();
    for (_, mut entry) in stems {
        entry.images.sort_by_key(|p| (image_rank(p), p.clone()));
        let mut images = entry.images.into_iter();
        match (entry.record, images.next()) {
            (Some(record), Some(image)) => scan.pairs.push((record, image)),
            (Some(record), None) => scan.unpaired.push(RoiError::MissingPair { path: record }),
            (None, Some(image)) => scan.unpaired.push(RoiError::MissingPair { path: image }),
            (None, None) => {}
        }
        // A second image for the same stem has no record of its own.
        scan.unpaired
            .extend(images.map(|path| RoiError::MissingPair { path }));
    }
    Ok(scan)
}

/// Counters for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Images written by a cropping handler.
    pub processed: usize,
    /// Copy-through images.
    pub copied: usize,
    /// Images a cropping handler passed through on an empty selection.
    pub passed_through: usize,
    /// Records with no recognized organ tag.
    pub skipped: usize,
    /// Images or records with no counterpart.
    pub unpaired: usize,
    pub failed: usize,
    /// Successful outputs per organ.
    pub per_organ: BTreeMap<OrganTag, usize>,
    pub cheap: usize,
    pub escalated: usize,
    pub color_heuristic: usize,
    pub edge_contour: usize,
    pub contour_solver: usize,
    /// Offending file and error message of every failure.
    pub failures: Vec<(PathBuf, String)>,
}

impl DispatchReport {
    fn record(&mut self, job: &ImageJob, result: RoiResult<HandlerOutcome>) {
        match result {
            Ok(outcome) => {
                *self.per_organ.entry(outcome.organ).or_default() += 1;
                match outcome.tier {
                    Some(SegmentationTier::Cheap) => self.cheap += 1,
                    Some(SegmentationTier::Escalated) => self.escalated += 1,
                    Some(SegmentationTier::ColorHeuristic) => self.color_heuristic += 1,
                    Some(SegmentationTier::EdgeContour) => self.edge_contour += 1,
                    Some(SegmentationTier::ContourSolver) => self.contour_solver += 1,
                    None => {}
                }
                if outcome.organ.is_copy_through() {
                    self.copied += 1;
                } else if outcome.cropped {
                    self.processed += 1;
                } else {
                    self.passed_through += 1;
                }
            }
            Err(e) => self.fail(&job.image_path, &e),
        }
    }

    fn fail(&mut self, path: &Path, e: &RoiError) {
        error!(file = %path.display(), kind = e.kind(), error = %e, "image failed");
        self.failed += 1;
        self.failures.push((path.to_path_buf(), e.to_string()));
    }

    /// Total number of images that produced an output file.
    pub fn written(&self) -> usize {
        self.processed + self.copied + self.passed_through
    }

    pub fn log_summary(&self) {
        info!(
            processed = self.processed,
            copied = self.copied,
            passed_through = self.passed_through,
            skipped = self.skipped,
            unpaired = self.unpaired,
            failed = self.failed,
            cheap = self.cheap,
            escalated = self.escalated,
            "run complete"
        );
        for (organ, count) in &self.per_organ {
            info!(organ = %organ, count, "organ total");
        }
    }
}

/// Drives a directory of image/record pairs through `RoiPipeline`.
pub struct DispatchPipeline {
    config: Arc<RoiConfig>,
    pipeline: Arc<RoiPipeline>,
}

impl DispatchPipeline {
    pub fn new(config: Arc<RoiConfig>, policy: SegmentationPolicy, output_root: impl Into<PathBuf>) -> Self {
        let pipeline = Arc::new(RoiPipeline::new(Arc::clone(&config), policy, output_root));
        Self { config, pipeline }
    }

    /// Validates `config` and builds the policy it describes. The output root
    /// is taken from the configuration, or derived from `input_dir`.
    pub fn from_config(config: RoiConfig, input_dir: &Path) -> RoiResult<Self> {
        config.validate()?;
        let policy = SegmentationPolicy::from_config(&config)?;
        let output_root = config
            .dispatch
            .output_root
            .clone()
            .unwrap_or_else(|| default_output_root(input_dir));
        Ok(Self::new(Arc::new(config), policy, output_root))
    }

    pub fn output_root(&self) -> &Path {
        self.pipeline.output_root()
    }

    pub fn worker_count(&self) -> usize {
        match self.config.dispatch.workers {
            0 => DEFAULT_WORKER_COUNT,
            n => n,
        }
    }

    /// Creates the output root and one folder per known organ.
    pub fn prepare_output_tree(&self) -> RoiResult<()> {
        for organ in OrganTag::KNOWN {
            if let Some(folder) = self.pipeline.output_dir(organ) {
                std::fs::create_dir_all(&folder)
                    .map_err(|source| RoiError::OutputTree { path: folder, source })?;
            }
        }
        Ok(())
    }

    pub async fn run(&self, input_dir: &Path) -> RoiResult<DispatchReport> {
        self.prepare_output_tree()?;
        let scan = {
            let dir = input_dir.to_path_buf();
            blocking("input scan", move || scan_input(&dir)).await?
        };
        info!(
            input = %input_dir.display(),
            output = %self.output_root().display(),
            pairs = scan.pairs.len(),
            extractor = self.pipeline.policy().extractor_name().unwrap_or("none"),
            "starting run"
        );

        let mut report = DispatchReport::default();
        for missing in &scan.unpaired {
            warn!(error = %missing, "skipping incomplete pair");
            report.unpaired += 1;
        }

        let pool = WorkerPool::new(Arc::clone(&self.pipeline), self.worker_count())?;
        let mut observations: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut pending = Vec::new();

        for (metadata_path, image_path) in scan.pairs {
            let record = {
                let path = metadata_path.clone();
                blocking("record parse", move || read_record(&path)).await
            };
            let record = match record {
                Ok(record) => record,
                Err(e) => {
                    report.fail(&image_path, &e);
                    continue;
                }
            };
            let job = ImageJob {
                image_path,
                metadata_path,
                record,
            };
            if let Some(id) = &job.record.observation_id {
                observations.entry(id.clone()).or_default().push(job.record_stem());
            }

            match self.pipeline.route(job.record.organ) {
                Handler::Skip => {
                    info!(file = %job.file_name(), "no recognized organ tag, skipping");
                    report.skipped += 1;
                }
                Handler::CopyThrough => {
                    let result = self.pipeline.process(&job).await;
                    let result = finish(&self.pipeline, &job, result).await;
                    report.record(&job, result);
                }
                Handler::Segmented(_) | Handler::Leaf | Handler::Stem => match pool.submit(job.clone()) {
                    Ok(receiver) => pending.push((job, receiver)),
                    Err(e) => {
                        let result = finish(&self.pipeline, &job, Err(e)).await;
                        report.record(&job, result);
                    }
                },
            }
        }

        let joined = futures::future::join_all(pending.into_iter().map(|(job, receiver)| {
            let pipeline = Arc::clone(&self.pipeline);
            async move {
                let result = receiver
                    .await
                    .unwrap_or_else(|_| Err(RoiError::worker("worker dropped the result channel")));
                let result = finish(&pipeline, &job, result).await;
                (job, result)
            }
        }))
        .await;
        for (job, result) in joined {
            report.record(&job, result);
        }

        if let Err(e) = pool.shutdown().await {
            warn!(error = %e, "worker pool did not shut down cleanly");
        }

        if self.config.dispatch.write_observation_index {
            let target = self.output_root().join(OBSERVATION_INDEX);
            let index = observation_index(&observations);
            if let Err(e) = std::fs::write(&target, index) {
                warn!(file = %target.display(), error = %e, "could not write observation index");
            }
        }

        report.log_summary();
        Ok(report)
    }
}

/// Copies the job's record next to its output and merges both outcomes.
async fn finish(
    pipeline: &RoiPipeline,
    job: &ImageJob,
    result: RoiResult<HandlerOutcome>,
) -> RoiResult<HandlerOutcome> {
    let Some(folder) = pipeline.output_dir(job.record.organ) else {
        return result;
    };
    let source = job.metadata_path.clone();
    let target = folder.join(source.file_name().unwrap_or_default());
    let copied = blocking("record copy", move || image_helper::copy_atomically(&source, &target)).await;
    let outcome = result?;
    copied?;
    Ok(outcome)
}

/// Sibling `<input>_output` of the input directory.
pub fn default_output_root(input_dir: &Path) -> PathBuf {
    let resolved = std::fs::canonicalize(input_dir).unwrap_or_else(|_| input_dir.to_path_buf());
    match resolved.file_name() {
        Some(name) => resolved.with_file_name(format!("{}_output", name.to_string_lossy())),
        None => resolved.join("roi_output"),
    }
}

/// One line per observation: `<id>|<stem>, <stem>, ...`, ids and stems sorted.
pub fn observation_index(observations: &BTreeMap<String, Vec<String>>) -> String {
    let mut index = String::new();
    for (id, stems) in observations {
        let mut stems = stems.clone();
        stems.sort();
        index.push_str(id);
        index.push('|');
        index.push_str(&stems.join(", "));
        index.push('\n');
    }
    index
}
