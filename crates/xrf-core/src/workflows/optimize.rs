//! Derivation of one representative parameter set per detector from integrated spectra.
//!
//! Each dataset volume is summed into a single spectrum, the parameter-optimized routine is
//! run once on every such spectrum in parallel, and the fitted sets are folded into a
//! running average in dataset order once all fits have joined.

use super::fit_range;
use super::overrides::DetectorOverrides;
use crate::core::calibration::EnergyCalibration;
use crate::core::elements::ElementLineTable;
use crate::core::io::{FitResultSink, VolumeSource};
use crate::core::models::params::{FitParameters, FitParamsAverage};
use crate::core::models::spectrum::Spectrum;
use crate::engine::context::ProcessingContext;
use crate::engine::error::EngineError;
use crate::engine::progress::Progress;
use crate::engine::routines::{FitRoutine, ParamOptimizedRoutine, ParameterFit};
use rayon::prelude::*;
use tracing::{info, instrument, warn};

/// Parameters fitted to the integrated spectrum of one dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetFit {
    pub dataset: String,
    pub params: FitParameters,
    pub iterations: usize,
    pub converged: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectorOptimization {
    pub detector: usize,
    /// Running average over every successful dataset fit, `None` when none succeeded.
    pub average: Option<FitParameters>,
    pub fits: Vec<DatasetFit>,
    /// Datasets that could not be loaded or fitted, with the reason.
    pub skipped: Vec<(String, String)>,
    /// Set when the detector could not be configured at all.
    pub error: Option<String>,
}

impl DetectorOptimization {
    fn failed(detector: usize, error: &EngineError) -> Self {
        Self {
            detector,
            average: None,
            fits: Vec::new(),
            skipped: Vec::new(),
            error: Some(error.to_string()),
        }
    }
}

/// Picks the `count` datasets with the most pixels, largest first. Ties keep input order;
/// datasets whose size cannot be read are skipped.
pub fn select_largest_datasets<S: AsRef<str>>(
    context: &ProcessingContext<'_>,
    source: &dyn VolumeSource,
    datasets: &[S],
    count: usize,
) -> Vec<String> {
    let mut sized: Vec<(String, usize)> = datasets
        .iter()
        .filter_map(|dataset| {
            let dataset = dataset.as_ref();
            match context.io.run(|| source.volume_size(dataset)) {
                Ok(size) => Some((dataset.to_string(), size.pixels())),
                Err(e) => {
                    warn!(dataset, error = %e, "Cannot read dataset size");
                    None
                }
            }
        })
        .collect();
    sized.sort_by(|a, b| b.1.cmp(&a.1));
    sized.into_iter().take(count).map(|(name, _)| name).collect()
}

/// Optimizes the fit parameters of every detector in `detectors` over `datasets`.
///
/// Per-dataset results are written through `sink`; the averages are returned. A detector
/// whose element set cannot be built is reported and skipped.
#[instrument(skip_all, name = "optimize_fit_params")]
pub fn optimize_fit_params<S: AsRef<str>>(
    context: &ProcessingContext<'_>,
    source: &dyn VolumeSource,
    sink: &dyn FitResultSink,
    table: &dyn ElementLineTable,
    datasets: &[S],
    detectors: &[usize],
    overrides: &DetectorOverrides,
) -> Vec<DetectorOptimization> {
    let datasets: Vec<&str> = datasets.iter().map(|d| d.as_ref()).collect();
    detectors
        .iter()
        .map(|&detector| {
            optimize_detector(context, source, sink, table, &datasets, detector, overrides)
                .unwrap_or_else(|e| {
                    warn!(detector, error = %e, "Detector skipped");
                    DetectorOptimization::failed(detector, &e)
                })
        })
        .collect()
}

fn optimize_detector(
    context: &ProcessingContext<'_>,
    source: &dyn VolumeSource,
    sink: &dyn FitResultSink,
    table: &dyn ElementLineTable,
    datasets: &[&str],
    detector: usize,
    overrides: &DetectorOverrides,
) -> Result<DetectorOptimization, EngineError> {
    let config = context.config;
    let settings = overrides.for_detector(detector);
    let elements = settings.fit_element_maps(table)?;
    let model = settings.model(config.preset);
    let calibration = EnergyCalibration::from_params(model.fit_parameters());
    let mut skipped = Vec::new();

    context.reporter.report(Progress::PhaseStart { name: "Integrate" });
    let mut integrated: Vec<(&str, Spectrum)> = Vec::with_capacity(datasets.len());
    for &dataset in datasets {
        match context.io.run(|| source.load_volume(dataset, detector)) {
            Ok(volume) => {
                let mut spectrum = volume.integrate();
                spectrum.recalc_elapsed_livetime();
                integrated.push((dataset, spectrum));
            }
            Err(e) => {
                warn!(dataset, detector, error = %e, "Dataset skipped");
                skipped.push((dataset.to_string(), e.to_string()));
            }
        }
    }
    context.reporter.report(Progress::PhaseFinish);

    context.reporter.report(Progress::PhaseStart { name: "Optimize" });
    context.reporter.report(Progress::TaskStart {
        total_steps: integrated.len() as u64,
    });
    let results: Vec<Result<ParameterFit, EngineError>> = context.install(|| {
        integrated
            .par_iter()
            .map(|(_, spectrum)| {
                let range = fit_range(config, &calibration, spectrum.len())?;
                let mut routine =
                    ParamOptimizedRoutine::new(config.background, context.optimizer.clone());
                routine.initialize(&model, &elements, range)?;
                let fit = routine.fit_spectrum_parameters(&model, spectrum, &elements);
                context.reporter.step();
                fit
            })
            .collect()
    });
    context.reporter.report(Progress::TaskFinish);
    context.reporter.report(Progress::PhaseFinish);

    let mut average = FitParamsAverage::new();
    let mut fits = Vec::with_capacity(results.len());
    for ((dataset, _), result) in integrated.iter().zip(results) {
        match result {
            Ok(fit) => {
                average.fold(&fit.params);
                if let Err(e) =
                    context.io.run(|| sink.write_fit_parameters(dataset, detector, &fit.params))
                {
                    warn!(dataset, detector, error = %e, "Could not write fit parameters");
                }
                fits.push(DatasetFit {
                    dataset: dataset.to_string(),
                    params: fit.params,
                    iterations: fit.iterations,
                    converged: fit.converged,
                });
            }
            Err(e) => {
                warn!(dataset, detector, error = %e, "Dataset fit failed");
                skipped.push((dataset.to_string(), e.to_string()));
            }
        }
    }

    info!(
        detector,
        fitted = fits.len(),
        skipped = skipped.len(),
        "Parameter optimization finished"
    );
    Ok(DetectorOptimization {
        detector,
        average: average.into_average(),
        fits,
        skipped,
        error: None,
    })
}
