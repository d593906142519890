use super::OptimizerSettings;
use nalgebra::{DMatrix, DVector};

const LAMBDA_START: f64 = 1e-3;
const LAMBDA_UP: f64 = 10.0;
const LAMBDA_DOWN: f64 = 10.0;
const LAMBDA_MAX: f64 = 1e16;
const LAMBDA_MIN: f64 = 1e-16;

/// Box constraints applied to trial points. `None` on either side means unbounded.
pub(super) struct BoxProjection<'a> {
    pub bounds: &'a [(Option<f64>, Option<f64>)],
    pub max_halvings: usize,
}

impl BoxProjection<'_> {
    fn project(&self, x: &mut [f64]) {
        for (v, (lo, hi)) in x.iter_mut().zip(self.bounds) {
            if let Some(lo) = lo {
                *v = v.max(*lo);
            }
            if let Some(hi) = hi {
                *v = v.min(*hi);
            }
        }
    }

    /// Finite-difference step pointing into the box.
    fn fd_step(&self, i: usize, x: f64, h: f64) -> f64 {
        match self.bounds.get(i) {
            Some((_, Some(hi))) if x + h > *hi => -h,
            _ => h,
        }
    }
}

pub(super) struct SolverRun {
    pub x: Vec<f64>,
    pub iterations: usize,
    pub cost: f64,
    pub converged: bool,
}

fn cost_of(r: &[f64]) -> f64 {
    0.5 * r.iter().map(|v| v * v).sum::<f64>()
}

fn is_finite(r: &[f64]) -> bool {
    r.iter().all(|v| v.is_finite())
}

fn jacobian(
    residual: &dyn Fn(&[f64]) -> Vec<f64>,
    x: &[f64],
    r: &[f64],
    settings: &OptimizerSettings,
    projection: Option<&BoxProjection<'_>>,
) -> DMatrix<f64> {
    let m = r.len();
    let n = x.len();
    let mut jac = DMatrix::zeros(m, n);
    let mut nudged = x.to_vec();
    for j in 0..n {
        let base = settings.fd_step * x[j].abs().max(1.0);
        let h = projection.map_or(base, |p| p.fd_step(j, x[j], base));
        nudged[j] = x[j] + h;
        let shifted = residual(&nudged);
        nudged[j] = x[j];
        if shifted.len() != m || !is_finite(&shifted) {
            continue;
        }
        for i in 0..m {
            jac[(i, j)] = (shifted[i] - r[i]) / h;
        }
    }
    jac
}

fn damped_step(
    jtj: &DMatrix<f64>,
    gradient: &DVector<f64>,
    lambda: f64,
) -> Option<DVector<f64>> {
    let mut a = jtj.clone();
    for k in 0..a.nrows() {
        let d = jtj[(k, k)].max(1e-12);
        a[(k, k)] += lambda * d;
    }
    let rhs = -gradient;
    match a.clone().cholesky() {
        Some(chol) => Some(chol.solve(&rhs)),
        None => a.lu().solve(&rhs),
    }
}

/// Levenberg–Marquardt iteration on `x`. When `projection` is given, every trial point is
/// clipped into the box and rejected steps are halved before the damping is increased.
pub(super) fn levenberg_marquardt(
    residual: &dyn Fn(&[f64]) -> Vec<f64>,
    mut x: Vec<f64>,
    settings: &OptimizerSettings,
    projection: Option<&BoxProjection<'_>>,
) -> SolverRun {
    let n = x.len();
    if let Some(p) = projection {
        p.project(&mut x);
    }
    let mut r = residual(&x);
    let mut cost = cost_of(&r);
    let mut lambda = LAMBDA_START;
    let mut iterations = 0;

    while iterations < settings.max_iterations {
        iterations += 1;

        let jac = jacobian(residual, &x, &r, settings, projection);
        let r_vec = DVector::from_column_slice(&r);
        let gradient = jac.transpose() * &r_vec;
        if gradient.amax() <= settings.gtol {
            return SolverRun {
                x,
                iterations,
                cost,
                converged: true,
            };
        }
        let jtj = jac.transpose() * &jac;

        let mut accepted = false;
        while lambda <= LAMBDA_MAX {
            let Some(step) = damped_step(&jtj, &gradient, lambda) else {
                lambda *= LAMBDA_UP;
                continue;
            };

            let halvings = projection.map_or(0, |p| p.max_halvings);
            let mut scale = 1.0;
            let mut trial = None;
            for _ in 0..=halvings {
                let mut candidate: Vec<f64> = (0..n).map(|k| x[k] + scale * step[k]).collect();
                if let Some(p) = projection {
                    p.project(&mut candidate);
                }
                let r_new = residual(&candidate);
                let cost_new = cost_of(&r_new);
                if r_new.len() == r.len() && is_finite(&r_new) && cost_new < cost {
                    trial = Some((candidate, r_new, cost_new));
                    break;
                }
                scale *= 0.5;
            }

            if let Some((candidate, r_new, cost_new)) = trial {
                let step_norm = candidate
                    .iter()
                    .zip(&x)
                    .map(|(a, b)| (a - b) * (a - b))
                    .sum::<f64>()
                    .sqrt();
                let x_norm = x.iter().map(|v| v * v).sum::<f64>().sqrt();
                let reduction = cost - cost_new;

                x = candidate;
                r = r_new;
                cost = cost_new;
                lambda = (lambda / LAMBDA_DOWN).max(LAMBDA_MIN);
                accepted = true;

                if reduction <= settings.ftol * cost.max(f64::MIN_POSITIVE)
                    || step_norm <= settings.xtol * (x_norm + settings.xtol)
                    || cost == 0.0
                {
                    return SolverRun {
                        x,
                        iterations,
                        cost,
                        converged: true,
                    };
                }
                break;
            }
            lambda *= LAMBDA_UP;
        }

        if !accepted {
            // No downhill step exists at any damping: stationary within precision.
            return SolverRun {
                x,
                iterations,
                cost,
                converged: true,
            };
        }
    }

    SolverRun {
        x,
        iterations,
        cost,
        converged: false,
    }
}
