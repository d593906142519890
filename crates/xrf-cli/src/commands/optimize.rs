use super::{RunOptions, load_registry, resolve_detectors};
use crate::cli::OptimizeArgs;
use crate::config::PartialJobConfig;
use crate::error::{CliError, Result};
use tracing::{info, warn};
use xrfmaps::core::io::{CsvResultSink, CsvVolumeSource, FitResultSink};
use xrfmaps::engine::context::ProcessingContext;
use xrfmaps::engine::error::EngineError;
use xrfmaps::engine::progress::ProgressReporter;
use xrfmaps::engine::routines::FitRoutineKind;
use xrfmaps::workflows::optimize::{optimize_fit_params, select_largest_datasets};

/// Pseudo-dataset under the output directory receiving the averaged parameter sets.
pub const AVERAGE_DATASET: &str = "average";

pub fn run(args: OptimizeArgs, options: RunOptions) -> Result<()> {
    let partial_config = PartialJobConfig::from_file(&args.job.config)?;
    info!("Merging configuration from file and CLI arguments...");
    let job = partial_config.merge_with_cli(
        &args.job,
        options.threads,
        &[],
        Some(FitRoutineKind::ParamOptimized),
    )?;
    let registry = load_registry(&args.job.elements)?;

    let source = CsvVolumeSource::new(&args.job.input);
    let sink = CsvResultSink::new(&args.job.output);

    let progress_handler = options.progress_handler();
    let reporter = ProgressReporter::with_callback(progress_handler.callback());
    let context = ProcessingContext::new(&job.processing, &reporter)?;

    let datasets = match args.largest {
        Some(count) => select_largest_datasets(&context, &source, &args.datasets, count),
        None => args.datasets.clone(),
    };
    let Some(first) = datasets.first() else {
        return Err(CliError::Argument(
            "None of the candidate datasets could be read.".to_string(),
        ));
    };
    info!(datasets = ?datasets, "Datasets selected for optimization");
    let detectors = resolve_detectors(&args.job.detectors, &source, first)?;

    println!(
        "Optimizing fit parameters over {} dataset(s) with preset {}...",
        datasets.len(),
        job.processing.preset
    );

    let results = optimize_fit_params(
        &context,
        &source,
        &sink,
        &registry,
        &datasets,
        &detectors,
        &job.overrides,
    );

    let mut failures = 0usize;
    for result in &results {
        for (dataset, reason) in &result.skipped {
            warn!(detector = result.detector, dataset = %dataset, reason = %reason, "Skipped");
            println!("  skipped {} for detector {}: {}", dataset, result.detector, reason);
        }
        let not_converged = result.fits.iter().filter(|f| !f.converged).count();
        if not_converged > 0 {
            warn!(
                detector = result.detector,
                count = not_converged,
                "Fits hit the iteration limit"
            );
        }

        match (&result.error, &result.average) {
            (Some(e), _) => {
                println!("✗ detector {}: {}", result.detector, e);
                failures += 1;
            }
            (None, None) => {
                println!("✗ detector {}: no dataset could be fitted", result.detector);
                failures += 1;
            }
            (None, Some(average)) => {
                context
                    .io
                    .run(|| sink.write_fit_parameters(AVERAGE_DATASET, result.detector, average))
                    .map_err(EngineError::from)?;
                println!(
                    "✓ detector {}: average of {} fit(s) written to {}",
                    result.detector,
                    result.fits.len(),
                    sink.detector_dir(AVERAGE_DATASET, result.detector)
                        .join("fit_parameters.toml")
                        .display()
                );
            }
        }
    }

    if failures > 0 {
        return Err(CliError::Other(anyhow::anyhow!(
            "{} detector(s) produced no parameter set",
            failures
        )));
    }
    Ok(())
}
