use super::error::IoError;
use crate::core::calibration::EnergyCalibration;
use crate::core::models::counts::FitCountDict;
use crate::core::models::params::FitParameters;
use crate::core::models::volume::SpectraVolume;

/// Dimensions of the volume stored for one dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeSize {
    pub rows: usize,
    pub cols: usize,
    pub channels: usize,
}

impl VolumeSize {
    pub fn pixels(&self) -> usize {
        self.rows * self.cols
    }
}

/// Supplies spectra volumes for (dataset, detector) pairs.
///
/// Implementations wrap file libraries that are not assumed to be thread-safe; callers
/// route every call through an [`IoGate`](super::gate::IoGate).
pub trait VolumeSource: Send + Sync {
    /// Loads the full volume recorded by `detector` in `dataset`.
    ///
    /// # Errors
    ///
    /// Returns [`IoError`] if the dataset or detector is missing or malformed.
    fn load_volume(&self, dataset: &str, detector: usize) -> Result<SpectraVolume, IoError>;

    /// Reports the dimensions of `dataset` without loading every spectrum.
    ///
    /// # Errors
    ///
    /// Returns [`IoError`] if the dataset cannot be read.
    fn volume_size(&self, dataset: &str) -> Result<VolumeSize, IoError>;
}

/// Persists fitted maps and parameter sets.
pub trait FitResultSink: Send + Sync {
    /// Writes the per-element maps of one fit type under the group name `group`,
    /// together with the energy calibration used to produce them.
    ///
    /// # Errors
    ///
    /// Returns [`IoError`] if the destination cannot be written.
    fn write_fit_counts(
        &self,
        dataset: &str,
        detector: usize,
        group: &str,
        counts: &FitCountDict,
        calibration: &EnergyCalibration,
    ) -> Result<(), IoError>;

    /// Writes an optimized parameter set.
    ///
    /// # Errors
    ///
    /// Returns [`IoError`] if the destination cannot be written.
    fn write_fit_parameters(
        &self,
        dataset: &str,
        detector: usize,
        params: &FitParameters,
    ) -> Result<(), IoError>;
}
