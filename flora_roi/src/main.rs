// Command-line runner: crops every image/record pair of an input directory
// into per-organ output folders.

use clap::{CommandFactory, Parser};
use flora_roi::config::RoiConfig;
use flora_roi::error::{RoiError, RoiResult};
use flora_roi::parallel_pipeline::{DispatchPipeline, DispatchReport};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{Level, error, info};

#[derive(Parser, Debug)]
#[command(name = "flora_roi")]
#[command(about = "Crops plant-organ photographs to their region of interest")]
struct Cli {
    /// Directory of `<stem>.jpg` + `<stem>.xml` pairs.
    #[arg(value_name = "INPUT_DIR")]
    input_dir: Option<PathBuf>,

    /// Output root. Defaults to the sibling directory `<INPUT_DIR>_output`.
    #[arg(long, value_name = "DIR")]
    output: Option<PathBuf>,

    /// JSON configuration file; missing sections take their defaults.
    #[arg(long, value_name = "FILE.json")]
    config: Option<PathBuf>,

    /// Number of pool workers.
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u64).range(1..))]
    workers: Option<u64>,

    /// Write the effective configuration as JSON to this file and exit.
    #[arg(long, value_name = "FILE.json")]
    dump_config: Option<PathBuf>,

    /// Log at debug level.
    #[arg(long)]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt().with_max_level(level).with_target(false).init();
}

fn load_config(cli: &Cli) -> RoiResult<RoiConfig> {
    let mut config = match &cli.config {
        Some(path) => RoiConfig::from_json_file(path)?,
        None => RoiConfig::default(),
    };
    if let Some(workers) = cli.workers {
        config.dispatch.workers = workers as usize;
    }
    if let Some(output) = &cli.output {
        config.dispatch.output_root = Some(output.clone());
    }
    config.validate()?;
    Ok(config)
}

async fn run(config: RoiConfig, input_dir: &Path) -> RoiResult<DispatchReport> {
    let dispatch = DispatchPipeline::from_config(config, input_dir)?;
    dispatch.run(input_dir).await
}

/// Exit status for a run that stopped early: 1 when the run could not start
/// or write its output tree, 2 otherwise.
fn abort_status(e: &RoiError) -> ExitCode {
    if e.is_fatal_for_run() {
        error!(error = %e, kind = e.kind(), "run aborted");
        ExitCode::FAILURE
    } else {
        error!(error = %e, kind = e.kind(), "run stopped");
        ExitCode::from(2)
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if cli.input_dir.is_none() && cli.dump_config.is_none() {
        let _ = Cli::command().print_help();
        println!();
        return ExitCode::SUCCESS;
    }
    init_logging(cli.verbose);

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => return abort_status(&e),
    };
    if let Some(target) = &cli.dump_config {
        return match config.to_json_file(target) {
            Ok(()) => {
                info!(file = %target.display(), "configuration written");
                ExitCode::SUCCESS
            }
            Err(e) => abort_status(&e),
        };
    }
    let Some(input_dir) = cli.input_dir.clone() else {
        return ExitCode::SUCCESS;
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .max_blocking_threads(num_cpus::get().max(1))
        .build();
    let runtime = match runtime {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "could not start the async runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(config, &input_dir)) {
        Ok(report) => {
            info!(written = report.written(), failed = report.failed, "done");
            ExitCode::SUCCESS
        }
        Err(e) => abort_status(&e),
    }
}
