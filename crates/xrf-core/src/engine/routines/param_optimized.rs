use super::basis::{Basis, poisson_weights};
use super::{FitRoutine, FitRoutineKind, estimate_background, subtract_background, windowed};
use crate::core::math::Nnls;
use crate::core::model::GaussianModel;
use crate::core::models::counts::{FitCounts, NUM_ITERATIONS_KEY};
use crate::core::models::element::{FitElementMap, FitElementMapDict};
use crate::core::models::params::{AMPLITUDE_MIN, FitParameters, names};
use crate::core::models::range::Range;
use crate::core::models::spectrum::Spectrum;
use crate::engine::config::{BackgroundConfig, BackgroundMode};
use crate::engine::error::EngineError;
use crate::engine::optimizer::{Optimizer, OptimizerError, free_parameters};
use nalgebra::DVector;
use std::sync::Arc;
use tracing::warn;

/// Parameters that only shape the scatter peaks.
const SCATTER_SHAPE_PARAMS: &[&str] = &[
    names::COHERENT_SCT_ENERGY,
    names::COMPTON_ANGLE,
    names::COMPTON_FWHM_CORR,
];

/// Result of a full parameter fit of one spectrum.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterFit {
    /// The model parameters plus one log10 amplitude per element, at the final iterate.
    pub params: FitParameters,
    pub iterations: usize,
    pub converged: bool,
}

struct ParamState {
    range: Range,
    basis: Basis,
    solver: Nnls,
}

/// Nonlinear fit of element amplitudes together with every model parameter the active
/// preset frees. Each residual evaluation rebuilds the full model spectrum.
pub struct ParamOptimizedRoutine {
    background: BackgroundConfig,
    optimizer: Arc<dyn Optimizer>,
    state: Option<ParamState>,
}

impl ParamOptimizedRoutine {
    pub fn new(background: BackgroundConfig, optimizer: Arc<dyn Optimizer>) -> Self {
        Self {
            background,
            optimizer,
            state: None,
        }
    }

    fn state(&self) -> Result<&ParamState, EngineError> {
        self.state.as_ref().ok_or(EngineError::RoutineNotInitialized(
            FitRoutineKind::ParamOptimized.group_name(),
        ))
    }

    /// Fits `spectrum` and returns the complete fitted parameter set.
    ///
    /// Starting amplitudes come from a non-negative solve against the basis built at
    /// initialization. When the optimizer runs out of iterations the last iterate is
    /// accepted and `converged` is false.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] before initialization, for a spectrum shorter than the range,
    /// or when the residual is not finite at the starting point.
    pub fn fit_spectrum_parameters(
        &self,
        model: &GaussianModel,
        spectrum: &Spectrum,
        elements: &FitElementMapDict,
    ) -> Result<ParameterFit, EngineError> {
        let state = self.state()?;
        let range = state.range;
        let data = windowed(spectrum, range)?;

        let mut params = model.fit_parameters().clone();
        let amplitude_names: Vec<&str> = elements.keys().map(String::as_str).collect();
        params.add_amplitudes(amplitude_names.iter().copied());
        params.apply_preset(model.preset(), &amplitude_names);
        let mut pinned: Vec<&str> = Vec::new();
        if !elements.values().any(FitElementMap::is_scatter) {
            pinned.extend(SCATTER_SHAPE_PARAMS);
        }
        if self.background.mode == BackgroundMode::Disabled {
            pinned.push(names::SNIP_WIDTH);
        }
        for name in pinned {
            if let Some(p) = params.get_mut(name) {
                p.fixed = true;
            }
        }

        let background = estimate_background(&self.background, &params, spectrum, range)
            .unwrap_or_else(|| vec![0.0; data.len()]);
        let rhs = DVector::from_vec(subtract_background(data, Some(&background)));
        let seeds = state.basis.seed_log_amplitudes(&state.solver, &rhs);
        for (j, name) in state.basis.names().iter().enumerate() {
            if let Some(p) = params.get_mut(name) {
                if state.basis.in_range(j) {
                    p.value = seeds[j];
                } else {
                    p.value = AMPLITUDE_MIN;
                    p.fixed = true;
                }
            }
        }

        let mut free = free_parameters(&params);
        if free.is_empty() {
            return Ok(ParameterFit {
                params,
                iterations: 0,
                converged: true,
            });
        }

        let weights = poisson_weights(data);
        let template = params.clone();
        let background_config = &self.background;
        // The continuum follows the trial widths and calibration.
        let residual = |x: &[f64]| -> Vec<f64> {
            let mut trial = template.clone();
            trial.set_free_values(x);
            let background = estimate_background(background_config, &trial, spectrum, range)
                .unwrap_or_else(|| vec![0.0; data.len()]);
            model
                .model_spectrum(&trial, elements, range)
                .iter()
                .zip(&background)
                .zip(data)
                .zip(&weights)
                .map(|(((m, b), d), w)| (m + b - d) * w)
                .collect()
        };

        let (iterations, converged) = match self.optimizer.minimize(&residual, &mut free) {
            Ok(outcome) => (outcome.iterations, true),
            Err(OptimizerError::ConvergenceFailure { iterations, .. }) => {
                warn!(iterations, "Parameter fit did not converge; keeping the last iterate");
                (iterations, false)
            }
            Err(e) => return Err(e.into()),
        };
        let values: Vec<f64> = free.iter().map(|p| p.value).collect();
        params.set_free_values(&values);

        Ok(ParameterFit {
            params,
            iterations,
            converged,
        })
    }
}

impl FitRoutine for ParamOptimizedRoutine {
    fn kind(&self) -> FitRoutineKind {
        FitRoutineKind::ParamOptimized
    }

    fn initialize(
        &mut self,
        model: &GaussianModel,
        elements: &FitElementMapDict,
        range: Range,
    ) -> Result<(), EngineError> {
        let basis = Basis::build(model, model.fit_parameters(), elements, range);
        let solver = Nnls::new(basis.matrix());
        self.state = Some(ParamState {
            range,
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
        model: &GaussianModel,
        spectrum: &Spectrum,
        elements: &FitElementMapDict,
    ) -> Result<FitCounts, EngineError> {
        let fit = self.fit_spectrum_parameters(model, spectrum, elements)?;
        let state = self.state()?;
        let mut counts: FitCounts = state
            .basis
            .names()
            .iter()
            .enumerate()
            .map(|(j, name)| {
                let value = if state.basis.in_range(j) {
                    10f64.powf(fit.params.value_or(name, AMPLITUDE_MIN))
                } else {
                    0.0
                };
                (name.clone(), value)
            })
            .collect();
        counts.insert(NUM_ITERATIONS_KEY.to_string(), fit.iterations as f64);
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::element::{EmissionLine, LineKind, Shell};
    use crate::core::models::params::{FitParam, FitParamsPreset};
    use crate::engine::optimizer::{OptimizerKind, OptimizerSettings};

    fn k_element(symbol: &str, lines: &[(&str, f64, f64)]) -> (String, FitElementMap) {
        let lines = lines
            .iter()
            .map(|&(label, energy, ratio)| EmissionLine {
                label: label.to_string(),
                kind: LineKind::classify(Shell::K, label),
                energy,
                ratio,
            })
            .collect();
        (
            symbol.to_string(),
            FitElementMap::element(symbol, symbol, Shell::K, lines),
        )
    }

    fn ca_fe() -> FitElementMapDict {
        [
            k_element(
                "Ca",
                &[("Ka1", 3.6917, 1.0), ("Ka2", 3.6881, 0.5), ("Kb1", 4.0127, 0.13)],
            ),
            k_element(
                "Fe",
                &[("Ka1", 6.4039, 1.0), ("Ka2", 6.3908, 0.5), ("Kb1", 7.058, 0.17)],
            ),
        ]
        .into_iter()
        .collect()
    }

    fn routine(settings: OptimizerSettings) -> ParamOptimizedRoutine {
        ParamOptimizedRoutine::new(
            BackgroundConfig {
                mode: BackgroundMode::Disabled,
                ..BackgroundConfig::default()
            },
            Arc::from(OptimizerKind::LevenbergMarquardt.build(settings)),
        )
    }

    /// Noise-free spectrum of Ca and Fe with widths that differ from the model defaults.
    fn synthetic(model: &GaussianModel, elements: &FitElementMapDict, range: Range) -> Spectrum {
        let mut truth = model.fit_parameters().clone();
        truth.set_value(names::FWHM_OFFSET, 0.13);
        truth.set_value(names::FWHM_FANOPRIME, 0.03);
        truth.add_amplitudes(["Ca", "Fe"]);
        truth.set_value("Ca", 4.0);
        truth.set_value("Fe", 5.0);
        Spectrum::from_counts(model.model_spectrum(&truth, elements, range))
    }

    #[test]
    fn recovers_synthetic_widths_and_amplitudes() {
        let model = GaussianModel::new();
        let elements = ca_fe();
        let range = Range::full(1000).unwrap();
        let spectrum = synthetic(&model, &elements, range);

        let mut routine = routine(OptimizerSettings::default());
        routine.initialize(&model, &elements, range).unwrap();
        let fit = routine
            .fit_spectrum_parameters(&model, &spectrum, &elements)
            .unwrap();

        let rel = |name: &str, truth: f64| (fit.params.value(name).unwrap() - truth).abs() / truth;
        assert!(fit.converged);
        assert!(rel(names::FWHM_OFFSET, 0.13) < 0.01, "{:?}", fit.params);
        assert!(rel(names::FWHM_FANOPRIME, 0.03) < 0.01, "{:?}", fit.params);
        assert!(rel("Ca", 4.0) < 0.01);
        assert!(rel("Fe", 5.0) < 0.01);
        assert_eq!(
            fit.params.value(names::COHERENT_SCT_ENERGY),
            model.fit_parameters().value(names::COHERENT_SCT_ENERGY)
        );

        let counts = routine.fit_spectrum(&model, &spectrum, &elements).unwrap();
        assert!((counts["Fe"] - 1e5).abs() / 1e5 < 0.01);
        assert!(counts[NUM_ITERATIONS_KEY] > 0.0);
    }

    /// Ca and Fe on a continuum that falls with energy.
    fn on_falling_continuum(elements: &FitElementMapDict, range: Range) -> Spectrum {
        let model = GaussianModel::new();
        let mut truth = model.fit_parameters().clone();
        truth.add_amplitudes(["Ca", "Fe"]);
        truth.set_value("Ca", 4.0);
        truth.set_value("Fe", 5.0);
        let counts = model
            .model_spectrum(&truth, elements, range)
            .iter()
            .enumerate()
            .map(|(i, peaks)| peaks + 200.0 * (-0.01 * i as f64 / 3.0).exp() + 20.0)
            .collect();
        Spectrum::from_counts(counts)
    }

    #[test]
    fn background_width_converges_from_either_side() {
        let elements = ca_fe();
        let range = Range::full(1000).unwrap();
        let spectrum = on_falling_continuum(&elements, range);

        let fit_from = |start_width: f64| {
            let mut model = GaussianModel::new();
            model.set_fit_params_preset(FitParamsPreset::BatchFitWithTails);
            let mut start = FitParameters::new();
            start.insert(names::SNIP_WIDTH, FitParam::new(start_width));
            model.update_fit_params_values(&start);

            let optimizer =
                OptimizerKind::BoundedLevenbergMarquardt.build(OptimizerSettings::default());
            let mut routine = ParamOptimizedRoutine::new(
                BackgroundConfig {
                    mode: BackgroundMode::Snip,
                    ..BackgroundConfig::default()
                },
                Arc::from(optimizer),
            );
            routine.initialize(&model, &elements, range).unwrap();
            routine
                .fit_spectrum_parameters(&model, &spectrum, &elements)
                .unwrap()
                .params
        };

        let from_narrow = fit_from(0.7);
        let from_wide = fit_from(1.6);
        let width = |p: &FitParameters| p.value(names::SNIP_WIDTH).unwrap();

        for params in [&from_narrow, &from_wide] {
            assert!(width(params) > 1.0 && width(params) < 1.4, "{}", width(params));
            let fe = 10f64.powf(params.value("Fe").unwrap());
            assert!((fe - 1e5).abs() / 1e5 < 0.01, "{fe}");
        }
        assert!((width(&from_narrow) - width(&from_wide)).abs() < 0.05);
    }

    #[test]
    fn background_width_stays_fixed_without_background() {
        let mut model = GaussianModel::new();
        model.set_fit_params_preset(FitParamsPreset::BatchFitWithTails);
        let elements = ca_fe();
        let range = Range::full(1000).unwrap();
        let spectrum = synthetic(&model, &elements, range);

        let settings = OptimizerSettings {
            max_iterations: 3,
            ..OptimizerSettings::default()
        };
        let mut routine = routine(settings);
        routine.initialize(&model, &elements, range).unwrap();
        let fit = routine
            .fit_spectrum_parameters(&model, &spectrum, &elements)
            .unwrap();
        let width = fit.params.get(names::SNIP_WIDTH).unwrap();
        assert!(width.fixed);
        assert_eq!(Some(width.value), model.fit_parameters().value(names::SNIP_WIDTH));
    }

    #[test]
    fn exhausted_budget_keeps_last_iterate_and_records_iterations() {
        let model = GaussianModel::new();
        let elements = ca_fe();
        let range = Range::full(1000).unwrap();
        let spectrum = synthetic(&model, &elements, range);

        let settings = OptimizerSettings {
            max_iterations: 1,
            ..OptimizerSettings::default()
        };
        let mut routine = routine(settings);
        routine.initialize(&model, &elements, range).unwrap();

        let fit = routine
            .fit_spectrum_parameters(&model, &spectrum, &elements)
            .unwrap();
        assert!(!fit.converged);
        assert_eq!(fit.iterations, 1);

        let counts = routine.fit_spectrum(&model, &spectrum, &elements).unwrap();
        assert_eq!(counts[NUM_ITERATIONS_KEY], 1.0);
        assert!(counts["Ca"] > 0.0);
    }

    #[test]
    fn requires_initialization() {
        let routine = routine(OptimizerSettings::default());
        let result = routine.fit_spectrum_parameters(
            &GaussianModel::new(),
            &Spectrum::new(16),
            &ca_fe(),
        );
        assert!(matches!(result, Err(EngineError::RoutineNotInitialized("Params"))));
    }
}
