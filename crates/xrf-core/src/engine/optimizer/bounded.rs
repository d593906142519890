use super::solver::{BoxProjection, levenberg_marquardt};
use super::{
    FreeParameter, Optimizer, OptimizerError, OptimizerOutcome, OptimizerSettings, Residual,
};

const MAX_STEP_HALVINGS: usize = 8;

/// Levenberg–Marquardt in the original parameter space with box-projected trial steps.
///
/// Rejected steps are halved up to eight times before the damping grows.
#[derive(Debug, Clone, Default)]
pub struct BoundedLevenbergMarquardt {
    settings: OptimizerSettings,
}

impl BoundedLevenbergMarquardt {
    pub fn new(settings: OptimizerSettings) -> Self {
        Self { settings }
    }
}

impl Optimizer for BoundedLevenbergMarquardt {
    fn minimize(
        &self,
        residual: &Residual<'_>,
        params: &mut [FreeParameter],
    ) -> Result<OptimizerOutcome, OptimizerError> {
        if params.is_empty() {
            return Err(OptimizerError::NoFreeParameters);
        }
        let bounds: Vec<(Option<f64>, Option<f64>)> =
            params.iter().map(|p| (p.lower, p.upper)).collect();
        let start: Vec<f64> = params.iter().map(|p| p.clamp(p.value)).collect();

        let initial = residual(&start);
        if initial.is_empty() {
            return Err(OptimizerError::EmptyResidual);
        }
        if initial.iter().any(|v| !v.is_finite()) {
            return Err(OptimizerError::NonFiniteStart);
        }

        let projection = BoxProjection {
            bounds: &bounds,
            max_halvings: MAX_STEP_HALVINGS,
        };
        let run = levenberg_marquardt(residual, start, &self.settings, Some(&projection));

        for (p, &v) in params.iter_mut().zip(&run.x) {
            p.value = v;
        }
        if run.converged {
            Ok(OptimizerOutcome {
                values: run.x,
                iterations: run.iterations,
                cost: run.cost,
            })
        } else {
            Err(OptimizerError::ConvergenceFailure {
                iterations: run.iterations,
                last_values: run.x,
            })
        }
    }

    fn settings(&self) -> &OptimizerSettings {
        &self.settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starting_point_outside_box_is_clamped() {
        let residual = |x: &[f64]| vec![x[0] - 10.0];
        let optimizer = BoundedLevenbergMarquardt::default();
        let mut params = [FreeParameter::new("x", -5.0).bounded(Some(0.0), Some(4.0))];
        let values = match optimizer.minimize(&residual, &mut params) {
            Ok(o) => o.values,
            Err(OptimizerError::ConvergenceFailure { last_values, .. }) => last_values,
            Err(e) => panic!("{e}"),
        };
        assert!((values[0] - 4.0).abs() < 1e-9);
    }

    #[test]
    fn recovers_quadratic_minimum_from_far_start() {
        let residual = |x: &[f64]| vec![x[0] - 3.0, 2.0 * (x[1] + 1.0), x[0] * x[1] + 3.0];
        let optimizer = BoundedLevenbergMarquardt::default();
        let mut params = [
            FreeParameter::new("a", 1000.0),
            FreeParameter::new("b", -500.0).bounded(Some(-10.0), Some(10.0)),
        ];
        let outcome = optimizer.minimize(&residual, &mut params).unwrap();
        assert!((outcome.values[0] - 3.0).abs() < 1e-6);
        assert!((outcome.values[1] + 1.0).abs() < 1e-6);
    }
}
