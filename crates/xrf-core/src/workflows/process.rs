use super::fit_range;
use super::overrides::DetectorOverrides;
use crate::core::calibration::EnergyCalibration;
use crate::core::elements::ElementLineTable;
use crate::core::io::{FitResultSink, VolumeSource};
use crate::engine::context::ProcessingContext;
use crate::engine::error::EngineError;
use crate::engine::progress::Progress;
use crate::engine::routines::FitRoutineKind;
use crate::engine::scheduler;
use tracing::{error, info, instrument};

/// Result of one fit type over one detector volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FitSummary {
    pub kind: FitRoutineKind,
    pub failed_pixels: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectorOutcome {
    pub detector: usize,
    /// Fit types that were computed and written, in processing order.
    pub fits: Vec<FitSummary>,
    /// Set when the detector was abandoned; `fits` then holds the work done before the error.
    pub error: Option<String>,
}

impl DetectorOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Per-dataset summary handed back to the driver.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetOutcome {
    pub dataset: String,
    pub detectors: Vec<DetectorOutcome>,
}

impl DatasetOutcome {
    pub fn is_success(&self) -> bool {
        self.detectors.iter().all(DetectorOutcome::is_success)
    }

    pub fn failed_detectors(&self) -> impl Iterator<Item = &DetectorOutcome> {
        self.detectors.iter().filter(|d| !d.is_success())
    }
}

/// Fits every requested detector of `dataset` for each configured fit type and writes
/// one result group per fit type through `sink`.
///
/// A detector that cannot be loaded, configured or written is logged and skipped; the
/// remaining detectors are still processed.
#[instrument(skip_all, name = "process_dataset", fields(dataset = %dataset))]
pub fn process_dataset(
    context: &ProcessingContext<'_>,
    source: &dyn VolumeSource,
    sink: &dyn FitResultSink,
    table: &dyn ElementLineTable,
    dataset: &str,
    detectors: &[usize],
    overrides: &DetectorOverrides,
) -> DatasetOutcome {
    info!(detectors = detectors.len(), "Processing dataset");
    let mut outcome = DatasetOutcome {
        dataset: dataset.to_string(),
        detectors: Vec::with_capacity(detectors.len()),
    };

    for &detector in detectors {
        let mut fits = Vec::new();
        let result =
            process_detector(context, source, sink, table, dataset, detector, overrides, &mut fits);
        let error = match result {
            Ok(()) => None,
            Err(e) => {
                error!(detector, error = %e, "Detector skipped");
                Some(e.to_string())
            }
        };
        outcome.detectors.push(DetectorOutcome {
            detector,
            fits,
            error,
        });
    }

    info!(success = outcome.is_success(), "Dataset finished");
    outcome
}

/// Runs [`process_dataset`] for each dataset in order.
pub fn process_datasets<S: AsRef<str>>(
    context: &ProcessingContext<'_>,
    source: &dyn VolumeSource,
    sink: &dyn FitResultSink,
    table: &dyn ElementLineTable,
    datasets: &[S],
    detectors: &[usize],
    overrides: &DetectorOverrides,
) -> Vec<DatasetOutcome> {
    datasets
        .iter()
        .map(|dataset| {
            process_dataset(
                context,
                source,
                sink,
                table,
                dataset.as_ref(),
                detectors,
                overrides,
            )
        })
        .collect()
}

#[allow(clippy::too_many_arguments)]
fn process_detector(
    context: &ProcessingContext<'_>,
    source: &dyn VolumeSource,
    sink: &dyn FitResultSink,
    table: &dyn ElementLineTable,
    dataset: &str,
    detector: usize,
    overrides: &DetectorOverrides,
    fits: &mut Vec<FitSummary>,
) -> Result<(), EngineError> {
    let config = context.config;
    let settings = overrides.for_detector(detector);
    let elements = settings.fit_element_maps(table)?;
    let model = settings.model(config.preset);

    let mut volume = context.io.run(|| source.load_volume(dataset, detector))?;
    if config.recalc_livetime {
        volume.recalc_elapsed_livetime();
    }
    let calibration = EnergyCalibration::from_params(model.fit_parameters());
    let range = fit_range(config, &calibration, volume.channels())?;
    info!(
        detector,
        rows = volume.rows(),
        cols = volume.cols(),
        channels = volume.channels(),
        elements = elements.len(),
        "Volume loaded"
    );

    for kind in &config.fit_kinds {
        context.reporter.report(Progress::PhaseStart {
            name: kind.group_name(),
        });
        let mut routine = kind.build(context);
        routine.initialize(&model, &elements, range)?;
        let fit = scheduler::fit_volume(context, routine.as_ref(), &model, &elements, &volume)?;
        context.io.run(|| {
            sink.write_fit_counts(dataset, detector, kind.group_name(), &fit.counts, &calibration)
        })?;
        context.reporter.report(Progress::PhaseFinish);
        fits.push(FitSummary {
            kind: *kind,
            failed_pixels: fit.failed_pixels,
        });
    }
    Ok(())
}
