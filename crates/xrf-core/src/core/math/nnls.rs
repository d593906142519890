use nalgebra::{DMatrix, DVector};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum NnlsError {
    #[error("Right-hand side has {found} rows, expected {expected}")]
    DimensionMismatch { expected: usize, found: usize },
    #[error("Active-set solve did not converge within {0} iterations")]
    MaxIterations(usize),
    #[error("Passive subproblem could not be solved: {0}")]
    Singular(&'static str),
}

#[derive(Debug, Clone, PartialEq)]
pub struct NnlsSolution {
    pub x: DVector<f64>,
    pub iterations: usize,
}

/// Lawson–Hanson non-negative least squares against a fixed design matrix.
///
/// The Gram matrix `AᵀA` is formed once; each solve only needs `Aᵀb`. Columns enter the
/// passive set by largest gradient, ties going to the lowest column index. A column whose
/// first passive solve comes back non-positive is held out until the iterate moves.
#[derive(Debug, Clone)]
pub struct Nnls {
    a_t: DMatrix<f64>,
    gram: DMatrix<f64>,
    max_iterations: usize,
    tolerance: f64,
}

impl Nnls {
    pub fn new(a: &DMatrix<f64>) -> Self {
        let a_t = a.transpose();
        let gram = &a_t * a;
        let n = a.ncols();
        let scale = gram.iter().fold(0.0_f64, |m, v| m.max(v.abs())).max(1.0);
        Self {
            a_t,
            gram,
            max_iterations: 3 * n.max(1) + 10,
            tolerance: 1e-12 * scale,
        }
    }

    pub fn gram(&self) -> &DMatrix<f64> {
        &self.gram
    }

    pub fn columns(&self) -> usize {
        self.gram.ncols()
    }

    pub fn solve(&self, b: &DVector<f64>) -> Result<NnlsSolution, NnlsError> {
        if b.len() != self.a_t.ncols() {
            return Err(NnlsError::DimensionMismatch {
                expected: self.a_t.ncols(),
                found: b.len(),
            });
        }
        let atb = &self.a_t * b;
        self.solve_normal(&atb)
    }

    /// Solves given `Aᵀb` directly.
    pub fn solve_normal(&self, atb: &DVector<f64>) -> Result<NnlsSolution, NnlsError> {
        let n = self.columns();
        let mut x = DVector::<f64>::zeros(n);
        let mut passive = vec![false; n];
        let mut stalled = vec![false; n];
        let mut iterations = 0;

        loop {
            let w = atb - &self.gram * &x;
            let mut entering: Option<usize> = None;
            for j in 0..n {
                if passive[j] || stalled[j] || w[j] <= self.tolerance {
                    continue;
                }
                if entering.is_none_or(|best| w[j] > w[best]) {
                    entering = Some(j);
                }
            }
            let Some(j) = entering else {
                break;
            };
            passive[j] = true;

            let mut first = true;
            loop {
                iterations += 1;
                if iterations > self.max_iterations {
                    return Err(NnlsError::MaxIterations(self.max_iterations));
                }
                let z = self.solve_passive(atb, &passive)?;
                // Rounding in a near-singular passive set; re-entering would repeat the step.
                if first && z[j] <= 0.0 {
                    passive[j] = false;
                    stalled[j] = true;
                    break;
                }
                first = false;
                let feasible = (0..n).filter(|&i| passive[i]).all(|i| z[i] > 0.0);
                if feasible {
                    x = z;
                    stalled.fill(false);
                    break;
                }
                let mut alpha = 0.0;
                let mut limiting = None;
                for i in (0..n).filter(|&i| passive[i] && z[i] <= 0.0) {
                    let denom = x[i] - z[i];
                    let step = if denom > 0.0 { x[i] / denom } else { 0.0 };
                    if limiting.is_none() || step < alpha {
                        alpha = step;
                        limiting = Some(i);
                    }
                }
                for i in 0..n {
                    x[i] += alpha * (z[i] - x[i]);
                }
                let floor = 1e-14 * x.amax();
                for i in 0..n {
                    if passive[i] && (Some(i) == limiting || x[i] <= floor) {
                        x[i] = 0.0;
                        passive[i] = false;
                    }
                }
            }
        }

        Ok(NnlsSolution { x, iterations })
    }

    /// Unconstrained solve restricted to the passive columns; inactive entries are zero.
    fn solve_passive(
        &self,
        atb: &DVector<f64>,
        passive: &[bool],
    ) -> Result<DVector<f64>, NnlsError> {
        let idx: Vec<usize> = (0..passive.len()).filter(|&i| passive[i]).collect();
        let k = idx.len();
        let sub = DMatrix::from_fn(k, k, |r, c| self.gram[(idx[r], idx[c])]);
        let rhs = DVector::from_fn(k, |r, _| atb[idx[r]]);
        let solved = sub
            .svd(true, true)
            .solve(&rhs, 1e-14)
            .map_err(NnlsError::Singular)?;
        let mut z = DVector::zeros(passive.len());
        for (r, &i) in idx.iter().enumerate() {
            z[i] = solved[r];
        }
        Ok(z)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recovers_exact_non_negative_combination() {
        let a = DMatrix::from_row_slice(4, 2, &[1.0, 0.0, 1.0, 1.0, 0.0, 1.0, 2.0, 0.5]);
        let truth = DVector::from_vec(vec![3.0, 2.0]);
        let b = &a * &truth;
        let solution = Nnls::new(&a).solve(&b).unwrap();
        assert!((solution.x[0] - 3.0).abs() < 1e-9);
        assert!((solution.x[1] - 2.0).abs() < 1e-9);
    }

    #[test]
    fn clamps_negative_coefficients_to_zero() {
        let a = DMatrix::from_row_slice(3, 2, &[1.0, 1.0, 1.0, 0.0, 0.0, 1.0]);
        let b = DVector::from_vec(vec![1.0, 2.0, -1.0]);
        let solution = Nnls::new(&a).solve(&b).unwrap();
        assert!(solution.x.iter().all(|&v| v >= 0.0));
        assert_eq!(solution.x[1], 0.0);
        assert!((solution.x[0] - 1.5).abs() < 1e-9);
    }

    #[test]
    fn identical_columns_favor_lowest_index() {
        let a = DMatrix::from_row_slice(2, 2, &[1.0, 1.0, 1.0, 1.0]);
        let b = DVector::from_vec(vec![2.0, 2.0]);
        let solution = Nnls::new(&a).solve(&b).unwrap();
        assert!((solution.x[0] - 2.0).abs() < 1e-9);
        assert_eq!(solution.x[1], 0.0);
    }

    #[test]
    fn nearly_collinear_columns_converge() {
        let a = DMatrix::from_row_slice(
            3,
            3,
            &[1.0, 1.0 - 1e-7, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0 + 1e-7, 1.0 + 1e-7],
        );
        let b = DVector::from_vec(vec![1.0, 2.0, 1.0]);
        let solution = Nnls::new(&a).solve(&b).unwrap();
        assert!(solution.x.iter().all(|&v| v >= 0.0));
        assert!((solution.x.sum() - 4.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn rejects_wrong_rhs_length() {
        let a = DMatrix::<f64>::identity(3, 3);
        let b = DVector::from_vec(vec![1.0, 2.0]);
        assert!(matches!(
            Nnls::new(&a).solve(&b),
            Err(NnlsError::DimensionMismatch { expected: 3, found: 2 })
        ));
    }
}
