use super::solver::levenberg_marquardt;
use super::{
    FreeParameter, Optimizer, OptimizerError, OptimizerOutcome, OptimizerSettings, Residual,
};

/// Levenberg–Marquardt with bounds enforced through smooth variable transforms.
///
/// A parameter bounded on both sides is mapped through `lo + (hi - lo)(sin u + 1)/2`,
/// one bounded on a single side through `lo - 1 + √(u² + 1)` (or its mirror). The solver
/// then runs unconstrained in `u`.
#[derive(Debug, Clone, Default)]
pub struct LevenbergMarquardt {
    settings: OptimizerSettings,
}

impl LevenbergMarquardt {
    pub fn new(settings: OptimizerSettings) -> Self {
        Self { settings }
    }
}

fn to_external(p: &FreeParameter, u: f64) -> f64 {
    match (p.lower, p.upper) {
        (Some(lo), Some(hi)) => lo + (hi - lo) * (u.sin() + 1.0) / 2.0,
        (Some(lo), None) => lo - 1.0 + (u * u + 1.0).sqrt(),
        (None, Some(hi)) => hi + 1.0 - (u * u + 1.0).sqrt(),
        (None, None) => u,
    }
}

fn to_internal(p: &FreeParameter, x: f64) -> f64 {
    let x = p.clamp(x);
    match (p.lower, p.upper) {
        (Some(lo), Some(hi)) if hi > lo => {
            (2.0 * (x - lo) / (hi - lo) - 1.0).clamp(-1.0, 1.0).asin()
        }
        (Some(_), Some(_)) => 0.0,
        (Some(lo), None) => ((x - lo + 1.0).powi(2) - 1.0).max(0.0).sqrt(),
        (None, Some(hi)) => ((hi - x + 1.0).powi(2) - 1.0).max(0.0).sqrt(),
        (None, None) => x,
    }
}

impl Optimizer for LevenbergMarquardt {
    fn minimize(
        &self,
        residual: &Residual<'_>,
        params: &mut [FreeParameter],
    ) -> Result<OptimizerOutcome, OptimizerError> {
        if params.is_empty() {
            return Err(OptimizerError::NoFreeParameters);
        }
        let start: Vec<f64> = params.iter().map(|p| to_internal(p, p.value)).collect();

        let bounds: &[FreeParameter] = params;
        let external = |u: &[f64]| -> Vec<f64> {
            bounds.iter().zip(u).map(|(p, &u)| to_external(p, u)).collect()
        };
        let wrapped = |u: &[f64]| residual(&external(u));

        let initial = wrapped(&start);
        if initial.is_empty() {
            return Err(OptimizerError::EmptyResidual);
        }
        if initial.iter().any(|v| !v.is_finite()) {
            return Err(OptimizerError::NonFiniteStart);
        }

        let run = levenberg_marquardt(&wrapped, start, &self.settings, None);
        let values = external(&run.x);
        for (p, &v) in params.iter_mut().zip(&values) {
            p.value = v;
        }
        if run.converged {
            Ok(OptimizerOutcome {
                values,
                iterations: run.iterations,
                cost: run.cost,
            })
        } else {
            Err(OptimizerError::ConvergenceFailure {
                iterations: run.iterations,
                last_values: values,
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
    fn transforms_round_trip_inside_bounds() {
        let cases = [
            FreeParameter::new("both", 0.3).bounded(Some(0.0), Some(1.0)),
            FreeParameter::new("lo", 4.0).bounded(Some(2.0), None),
            FreeParameter::new("hi", -4.0).bounded(None, Some(-2.0)),
            FreeParameter::new("free", 7.5),
        ];
        for p in &cases {
            let back = to_external(p, to_internal(p, p.value));
            assert!((back - p.value).abs() < 1e-12, "{}: {back}", p.name);
        }
    }

    #[test]
    fn external_values_never_leave_bounds() {
        let p = FreeParameter::new("x", 0.5).bounded(Some(-1.0), Some(2.0));
        for u in [-100.0, -3.0, 0.0, 1.7, 55.0] {
            let x = to_external(&p, u);
            assert!((-1.0..=2.0).contains(&x));
        }
    }
}
