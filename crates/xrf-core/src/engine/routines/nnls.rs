use super::basis::Basis;
use super::{FitRoutine, FitRoutineKind, estimate_background, subtract_background, windowed};
use crate::core::math::Nnls;
use crate::core::model::GaussianModel;
use crate::core::models::counts::FitCounts;
use crate::core::models::element::FitElementMapDict;
use crate::core::models::params::FitParameters;
use crate::core::models::range::Range;
use crate::core::models::spectrum::Spectrum;
use crate::engine::config::BackgroundConfig;
use crate::engine::error::EngineError;
use nalgebra::DVector;

struct NnlsState {
    range: Range,
    params: FitParameters,
    basis: Basis,
    solver: Nnls,
}

/// Non-negative least squares against the single-element basis, sharing one precomputed
/// Gram matrix across all pixels.
pub struct NnlsRoutine {
    background: BackgroundConfig,
    state: Option<NnlsState>,
}

impl NnlsRoutine {
    pub fn new(background: BackgroundConfig) -> Self {
        Self {
            background,
            state: None,
        }
    }
}

impl FitRoutine for NnlsRoutine {
    fn kind(&self) -> FitRoutineKind {
        FitRoutineKind::Nnls
    }

    fn initialize(
        &mut self,
        model: &GaussianModel,
        elements: &FitElementMapDict,
        range: Range,
    ) -> Result<(), EngineError> {
        let params = model.fit_parameters().clone();
        let basis = Basis::build(model, &params, elements, range);
        let solver = Nnls::new(basis.matrix());
        self.state = Some(NnlsState {
            range,
            params,
            basis,
            solver,
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
            .ok_or(EngineError::RoutineNotInitialized(FitRoutineKind::Nnls.group_name()))?;
        let data = windowed(spectrum, state.range)?;
        let background =
            estimate_background(&self.background, &state.params, spectrum, state.range);
        let rhs = DVector::from_vec(subtract_background(data, background.as_deref()));
        let solution = state.solver.solve(&rhs)?;
        Ok(state.basis.counts_from_solution(&solution.x))
    }
}
