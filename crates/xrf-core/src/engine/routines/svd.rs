use super::basis::Basis;
use super::{FitRoutine, FitRoutineKind, estimate_background, subtract_background, windowed};
use crate::core::model::GaussianModel;
use crate::core::models::counts::FitCounts;
use crate::core::models::element::FitElementMapDict;
use crate::core::models::params::FitParameters;
use crate::core::models::range::Range;
use crate::core::models::spectrum::Spectrum;
use crate::engine::config::BackgroundConfig;
use crate::engine::error::EngineError;
use nalgebra::{DVector, Dyn, SVD};

struct SvdState {
    range: Range,
    params: FitParameters,
    basis: Basis,
    svd: SVD<f64, Dyn, Dyn>,
    tolerance: f64,
}

/// Unconstrained linear least squares against the single-element basis. The basis is
/// decomposed once; each pixel costs one pseudo-inverse application.
pub struct SvdRoutine {
    background: BackgroundConfig,
    state: Option<SvdState>,
}

impl SvdRoutine {
    pub fn new(background: BackgroundConfig) -> Self {
        Self {
            background,
            state: None,
        }
    }
}

impl FitRoutine for SvdRoutine {
    fn kind(&self) -> FitRoutineKind {
        FitRoutineKind::Svd
    }

    fn initialize(
        &mut self,
        model: &GaussianModel,
        elements: &FitElementMapDict,
        range: Range,
    ) -> Result<(), EngineError> {
        if elements.is_empty() {
            return Err(EngineError::EmptyBasis(FitRoutineKind::Svd.group_name()));
        }
        let params = model.fit_parameters().clone();
        let basis = Basis::build(model, &params, elements, range);
        let svd = SVD::new(basis.matrix().clone(), true, true);
        let largest = svd.singular_values.iter().fold(0.0_f64, |m, s| m.max(*s));
        let dim = basis.matrix().nrows().max(basis.matrix().ncols()) as f64;
        self.state = Some(SvdState {
            range,
            params,
            basis,
            svd,
            tolerance: largest * dim * f64::EPSILON,
        });
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.state.is_some()
    }

    fn fit_spectrum(
        &self,
        _model: &GaussianModel,
        spectrum: &Spectrum,
        _elements: &FitElementMapDict,
    ) -> Result<FitCounts, EngineError> {
        let state = self
            .state
            .as_ref()
            .ok_or(EngineError::RoutineNotInitialized(FitRoutineKind::Svd.group_name()))?;
        let data = windowed(spectrum, state.range)?;
        let background =
            estimate_background(&self.background, &state.params, spectrum, state.range);
        let rhs = DVector::from_vec(subtract_background(data, background.as_deref()));
        let x = state
            .svd
            .solve(&rhs, state.tolerance)
            .map_err(|e| EngineError::LinearSolve(e.to_string()))?;
        Ok(state.basis.counts_from_solution(&x))
    }
}
