//! # Workflows Module
//!
//! Top-level procedures that drive the engine from loaded data to persisted results.
//!
//! ## Overview
//!
//! Each workflow takes a [`ProcessingContext`](crate::engine::context::ProcessingContext),
//! the loader and serializer collaborators, and the per-detector overrides. Errors are
//! resolved at the smallest affected unit: a failing pixel is left at zero, a failing
//! detector or dataset is logged and skipped, and the caller receives a per-dataset summary.
//!
//! ## Architecture
//!
//! - **Volume Processing** ([`process`]) - Fits every pixel of each detector volume for the
//!   configured fit types and hands each result group to the serializer.
//! - **Parameter Optimization** ([`optimize`]) - Fits the integrated spectrum of whole
//!   datasets and averages the resulting parameters per detector.
//! - **Quantification** ([`quantify`]) - Derives calibration curves from a standard with
//!   known element weights.
//! - **Overrides** ([`overrides`]) - Per-detector analysis settings.

pub mod optimize;
pub mod overrides;
pub mod process;
pub mod quantify;

use crate::core::calibration::EnergyCalibration;
use crate::core::models::range::Range;
use crate::engine::config::ProcessingConfig;
use crate::engine::error::EngineError;

/// Channel window fitted for spectra of `channels` length under `calibration`.
pub(crate) fn fit_range(
    config: &ProcessingConfig,
    calibration: &EnergyCalibration,
    channels: usize,
) -> Result<Range, EngineError> {
    let range = match config.energy_range {
        Some((lo, hi)) => Range::from_energy(lo, hi, calibration, channels)?,
        None => Range::full(channels)?,
    };
    Ok(range)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::config::ProcessingConfigBuilder;
    use crate::engine::routines::FitRoutineKind;

    #[test]
    fn energy_window_selects_channels_and_defaults_to_all() {
        let calibration = EnergyCalibration::new(0.0, 0.5, 0.0);
        let full = ProcessingConfigBuilder::new()
            .fit_kinds(vec![FitRoutineKind::Roi])
            .build()
            .unwrap();
        assert_eq!(fit_range(&full, &calibration, 64).unwrap(), Range::full(64).unwrap());

        let windowed = ProcessingConfigBuilder::new()
            .fit_kinds(vec![FitRoutineKind::Roi])
            .energy_range(1.0, 11.0)
            .build()
            .unwrap();
        let range = fit_range(&windowed, &calibration, 64).unwrap();
        assert_eq!(range, Range::new(2, 22, 64).unwrap());
    }
}
