//! # Fit Routines
//!
//! Strategies that turn one spectrum into per-element intensities.
//!
//! Every routine is initialized once, single-threaded, against the model, the element set
//! and the fitted channel range. After that it is shared read-only and
//! [`FitRoutine::fit_spectrum`] is called concurrently for every pixel.
//!
//! - [`roi::RoiRoutine`] - Raw counts summed in a window around each element's energy
//! - [`svd::SvdRoutine`] - Linear least squares through a precomputed SVD of the basis
//! - [`nnls::NnlsRoutine`] - Non-negative least squares on the same basis
//! - [`matrix_optimized::MatrixOptimizedRoutine`] - Log-amplitudes of a fixed basis
//!   optimized by the nonlinear back-end
//! - [`param_optimized::ParamOptimizedRoutine`] - Amplitudes and the preset's free model
//!   parameters optimized together

mod basis;
pub mod matrix_optimized;
pub mod nnls;
pub mod param_optimized;
pub mod roi;
pub mod svd;

pub use matrix_optimized::MatrixOptimizedRoutine;
pub use nnls::NnlsRoutine;
pub use param_optimized::{ParamOptimizedRoutine, ParameterFit};
pub use roi::RoiRoutine;
pub use svd::SvdRoutine;

use super::config::{BackgroundConfig, BackgroundMode};
use super::context::ProcessingContext;
use super::error::EngineError;
use crate::core::model::{GaussianModel, SnipBackground};
use crate::core::models::counts::FitCounts;
use crate::core::models::element::FitElementMapDict;
use crate::core::models::params::FitParameters;
use crate::core::models::range::Range;
use crate::core::models::spectrum::Spectrum;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub trait FitRoutine: Send + Sync {
    fn kind(&self) -> FitRoutineKind;

    /// Precomputes whatever the routine needs for `range`. Must be called before
    /// [`fit_spectrum`](FitRoutine::fit_spectrum) and again whenever the model or the
    /// element set changes.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] if the precomputation fails.
    fn initialize(
        &mut self,
        model: &GaussianModel,
        elements: &FitElementMapDict,
        range: Range,
    ) -> Result<(), EngineError>;

    fn is_initialized(&self) -> bool;

    /// Fits one spectrum. The result maps every element name to its intensity and holds
    /// the iteration count under `Num_Iter`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::RoutineNotInitialized`] before initialization, or the error of
    /// the underlying solver.
    fn fit_spectrum(
        &self,
        model: &GaussianModel,
        spectrum: &Spectrum,
        elements: &FitElementMapDict,
    ) -> Result<FitCounts, EngineError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FitRoutineKind {
    Roi,
    #[serde(rename = "params")]
    ParamOptimized,
    #[serde(rename = "fitted")]
    MatrixOptimized,
    Svd,
    Nnls,
}

impl FitRoutineKind {
    pub const ALL: [FitRoutineKind; 5] = [
        FitRoutineKind::Roi,
        FitRoutineKind::ParamOptimized,
        FitRoutineKind::MatrixOptimized,
        FitRoutineKind::Svd,
        FitRoutineKind::Nnls,
    ];

    /// Name of the output group holding this routine's maps.
    pub fn group_name(&self) -> &'static str {
        match self {
            FitRoutineKind::Roi => "ROI",
            FitRoutineKind::ParamOptimized => "Params",
            FitRoutineKind::MatrixOptimized => "Fitted",
            FitRoutineKind::Svd => "SVD",
            FitRoutineKind::Nnls => "NNLS",
        }
    }

    pub fn is_iterative(&self) -> bool {
        matches!(
            self,
            FitRoutineKind::ParamOptimized | FitRoutineKind::MatrixOptimized
        )
    }

    /// A fresh, uninitialized routine using the context's background settings and optimizer.
    pub fn build(&self, context: &ProcessingContext<'_>) -> Box<dyn FitRoutine> {
        let background = context.config.background;
        match self {
            FitRoutineKind::Roi => Box::new(RoiRoutine::new()),
            FitRoutineKind::Svd => Box::new(SvdRoutine::new(background)),
            FitRoutineKind::Nnls => Box::new(NnlsRoutine::new(background)),
            FitRoutineKind::MatrixOptimized => Box::new(MatrixOptimizedRoutine::new(
                background,
                context.optimizer.clone(),
            )),
            FitRoutineKind::ParamOptimized => Box::new(ParamOptimizedRoutine::new(
                background,
                context.optimizer.clone(),
            )),
        }
    }
}

impl fmt::Display for FitRoutineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.group_name())
    }
}

impl FromStr for FitRoutineKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "roi" => Ok(FitRoutineKind::Roi),
            "params" | "gauss-tails" => Ok(FitRoutineKind::ParamOptimized),
            "fitted" | "gauss-matrix" => Ok(FitRoutineKind::MatrixOptimized),
            "svd" => Ok(FitRoutineKind::Svd),
            "nnls" => Ok(FitRoutineKind::Nnls),
            _ => Err(format!(
                "unknown fit type '{s}' (expected roi, params, fitted, svd or nnls)"
            )),
        }
    }
}

/// The counts of `spectrum` inside `range`, or an error when the spectrum is too short.
pub(crate) fn windowed(spectrum: &Spectrum, range: Range) -> Result<&[f64], EngineError> {
    if spectrum.len() <= range.max() {
        return Err(EngineError::ChannelMismatch {
            expected: range.max() + 1,
            found: spectrum.len(),
        });
    }
    Ok(spectrum.sub_range(range))
}

/// Continuum under `spectrum` restricted to `range`, or `None` when the background is
/// disabled.
pub(crate) fn estimate_background(
    config: &BackgroundConfig,
    params: &FitParameters,
    spectrum: &Spectrum,
    range: Range,
) -> Option<Vec<f64>> {
    match config.mode {
        BackgroundMode::Disabled => None,
        BackgroundMode::Snip => {
            let snip =
                SnipBackground::from_params(params, config.snip_scaling, config.spectral_binning);
            let full = snip.estimate(spectrum.counts(), range);
            Some(full[range.channels()].to_vec())
        }
    }
}

/// `data - background`, the right-hand side of the linear routines.
pub(crate) fn subtract_background(data: &[f64], background: Option<&[f64]>) -> Vec<f64> {
    match background {
        Some(bg) => data.iter().zip(bg).map(|(d, b)| d - b).collect(),
        None => data.to_vec(),
    }
}
