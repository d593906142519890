use super::basis::{Basis, poisson_weights};
use super::{FitRoutine, FitRoutineKind, estimate_background, subtract_background, windowed};
use crate::core::math::Nnls;
use crate::core::model::GaussianModel;
use crate::core::models::counts::{FitCounts, NUM_ITERATIONS_KEY};
use crate::core::models::element::FitElementMapDict;
use crate::core::models::params::{AMPLITUDE_MAX, AMPLITUDE_MIN, FitParameters};
use crate::core::models::range::Range;
use crate::core::models::spectrum::Spectrum;
use crate::engine::config::BackgroundConfig;
use crate::engine::error::EngineError;
use crate::engine::optimizer::{FreeParameter, Optimizer, OptimizerError};
use nalgebra::DVector;
use std::sync::Arc;
use tracing::warn;

struct MatrixState {
    range: Range,
    params: FitParameters,
    basis: Basis,
    solver: Nnls,
    /// Basis columns that take part in the optimization.
    active: Vec<usize>,
}

/// Nonlinear fit of log10 element amplitudes against a basis that is fixed at
/// initialization. Peak shapes, calibration and widths do not move.
pub struct MatrixOptimizedRoutine {
    background: BackgroundConfig,
    optimizer: Arc<dyn Optimizer>,
    state: Option<MatrixState>,
}

impl MatrixOptimizedRoutine {
    pub fn new(background: BackgroundConfig, optimizer: Arc<dyn Optimizer>) -> Self {
        Self {
            background,
            optimizer,
            state: None,
        }
    }
}

impl FitRoutine for MatrixOptimizedRoutine {
    fn kind(&self) -> FitRoutineKind {
        FitRoutineKind::MatrixOptimized
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
        let active = (0..basis.names().len())
            .filter(|&j| basis.in_range(j))
            .collect();
        self.state = Some(MatrixState {
            range,
            params,
            basis,
            solver,
            active,
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
        let state = self.state.as_ref().ok_or(EngineError::RoutineNotInitialized(
            FitRoutineKind::MatrixOptimized.group_name(),
        ))?;
        let data = windowed(spectrum, state.range)?;
        let background =
            estimate_background(&self.background, &state.params, spectrum, state.range)
                .unwrap_or_else(|| vec![0.0; data.len()]);
        let rhs = DVector::from_vec(subtract_background(data, Some(&background)));
        let seeds = state.basis.seed_log_amplitudes(&state.solver, &rhs);

        let mut free: Vec<FreeParameter> = state
            .active
            .iter()
            .map(|&j| {
                FreeParameter::new(state.basis.names()[j].clone(), seeds[j])
                    .bounded(Some(AMPLITUDE_MIN), Some(AMPLITUDE_MAX))
            })
            .collect();

        let mut iterations = 0;
        if !free.is_empty() {
            let columns = state.basis.names().len();
            let weights = poisson_weights(data);
            let residual = |x: &[f64]| -> Vec<f64> {
                let mut amplitudes = DVector::zeros(columns);
                for (&j, &log_amp) in state.active.iter().zip(x) {
                    amplitudes[j] = 10f64.powf(log_amp);
                }
                let modeled = state.basis.matrix() * amplitudes;
                modeled
                    .iter()
                    .zip(&background)
                    .zip(data)
                    .zip(&weights)
                    .map(|(((m, b), d), w)| (m + b - d) * w)
                    .collect()
            };
            iterations = match self.optimizer.minimize(&residual, &mut free) {
                Ok(outcome) => outcome.iterations,
                Err(OptimizerError::ConvergenceFailure { iterations, .. }) => {
                    warn!(iterations, "Amplitude fit did not converge; keeping the last iterate");
                    iterations
                }
                Err(e) => return Err(e.into()),
            };
        }

        let mut counts: FitCounts = state
            .basis
            .names()
            .iter()
            .map(|name| (name.clone(), 0.0))
            .collect();
        for p in &free {
            counts.insert(p.name.clone(), 10f64.powf(p.value));
        }
        counts.insert(NUM_ITERATIONS_KEY.to_string(), iterations as f64);
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::element::{EmissionLine, FitElementMap, LineKind, Shell};
    use crate::engine::config::BackgroundMode;
    use crate::engine::optimizer::{OptimizerKind, OptimizerSettings};

    fn elements() -> FitElementMapDict {
        [("Ca", 3.69), ("Fe", 6.40), ("Zn", 12.0)]
            .into_iter()
            .map(|(name, energy)| {
                let line = EmissionLine {
                    label: "Ka1".to_string(),
                    kind: LineKind::KAlpha,
                    energy,
                    ratio: 1.0,
                };
                (
                    name.to_string(),
                    FitElementMap::element(name, name, Shell::K, vec![line]),
                )
            })
            .collect()
    }

    #[test]
    fn recovers_amplitudes_of_fixed_basis() {
        let model = GaussianModel::new();
        let elements = elements();
        let range = Range::full(1000).unwrap();
        let params = model.fit_parameters();
        let ca = model.model_spectrum_element(params, &elements["Ca"], range);
        let fe = model.model_spectrum_element(params, &elements["Fe"], range);
        let counts: Vec<f64> = ca.iter().zip(&fe).map(|(a, b)| 2500.0 * a + 80.0 * b).collect();
        let spectrum = Spectrum::from_counts(counts);

        for kind in [
            OptimizerKind::LevenbergMarquardt,
            OptimizerKind::BoundedLevenbergMarquardt,
        ] {
            let mut routine = MatrixOptimizedRoutine::new(
                BackgroundConfig {
                    mode: BackgroundMode::Disabled,
                    ..BackgroundConfig::default()
                },
                Arc::from(kind.build(OptimizerSettings::default())),
            );
            routine.initialize(&model, &elements, range).unwrap();
            let counts = routine.fit_spectrum(&model, &spectrum, &elements).unwrap();
            assert!((counts["Ca"] - 2500.0).abs() / 2500.0 < 1e-3, "{kind}: {counts:?}");
            assert!((counts["Fe"] - 80.0).abs() / 80.0 < 1e-3, "{kind}: {counts:?}");
            assert_eq!(counts["Zn"], 0.0);
            assert!(counts.contains_key(NUM_ITERATIONS_KEY));
        }
    }
}
