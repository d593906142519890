use super::context::ProcessingContext;
use super::error::EngineError;
use super::progress::Progress;
use super::routines::FitRoutine;
use crate::core::model::GaussianModel;
use crate::core::models::counts::FitCountDict;
use crate::core::models::element::FitElementMapDict;
use crate::core::models::volume::SpectraVolume;
use rayon::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{info, instrument, warn};

/// Per-element maps of one volume plus the number of pixels whose fit failed.
#[derive(Debug, Clone)]
pub struct VolumeFit {
    pub counts: FitCountDict,
    pub failed_pixels: usize,
}

/// Fits every pixel of `volume` with an initialized `routine` on the context's worker pool.
///
/// Each pixel writes only its own cell of the pre-sized output; counts are divided by the
/// pixel's elapsed live time when it is positive. A pixel whose fit fails is logged and
/// left at zero. The call returns after every pixel has finished.
///
/// # Errors
///
/// Returns [`EngineError::RoutineNotInitialized`] if `routine` was not initialized.
#[instrument(skip_all, name = "fit_volume", fields(kind = %routine.kind()))]
pub fn fit_volume(
    context: &ProcessingContext<'_>,
    routine: &dyn FitRoutine,
    model: &GaussianModel,
    elements: &FitElementMapDict,
    volume: &SpectraVolume,
) -> Result<VolumeFit, EngineError> {
    if !routine.is_initialized() {
        return Err(EngineError::RoutineNotInitialized(routine.kind().group_name()));
    }

    let rows = volume.rows();
    let cols = volume.cols();
    let mut counts = FitCountDict::new(rows, cols, elements.keys().map(String::as_str));
    let keys = counts.keys().to_vec();
    let stride = counts.key_count();
    let failures = AtomicUsize::new(0);
    let reporter = context.reporter;

    reporter.report(Progress::TaskStart {
        total_steps: volume.pixel_count() as u64,
    });
    context.install(|| {
        counts
            .cells_mut()
            .par_chunks_mut(stride)
            .zip(volume.spectra().par_iter())
            .enumerate()
            .for_each(|(index, (cell, spectrum))| {
                match routine.fit_spectrum(model, spectrum, elements) {
                    Ok(result) => FitCountDict::store_pixel(
                        &keys,
                        cell,
                        &result,
                        spectrum.elapsed_livetime(),
                    ),
                    Err(e) => {
                        let (row, col) = (index / cols, index % cols);
                        warn!(row, col, error = %e, "Pixel fit failed");
                        failures.fetch_add(1, Ordering::Relaxed);
                    }
                }
                reporter.step();
            });
    });
    reporter.report(Progress::TaskFinish);

    let failed_pixels = failures.into_inner();
    info!(rows, cols, failed_pixels, "Volume fitted");
    Ok(VolumeFit {
        counts,
        failed_pixels,
    })
}
