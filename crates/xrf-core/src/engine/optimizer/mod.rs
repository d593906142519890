//! Nonlinear least-squares back-ends used by the iterative fit routines.
//!
//! Both back-ends share one damped Gauss-Newton loop ([`solver`]) and differ in how
//! parameter bounds are honoured: [`LevenbergMarquardt`] optimizes in a smoothly
//! transformed, unbounded space, [`BoundedLevenbergMarquardt`] works in the original space
//! and projects trial steps back into the box, halving them when they fail to improve.
//!
//! Optimizers hold only their settings. Every call owns its residual closure and parameter
//! copy, so one optimizer can be shared by all worker threads.

mod bounded;
mod levenberg_marquardt;
mod solver;

pub use bounded::BoundedLevenbergMarquardt;
pub use levenberg_marquardt::LevenbergMarquardt;

use crate::core::models::params::FitParameters;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Maps a free-parameter vector to residuals `model - data`.
pub type Residual<'a> = dyn Fn(&[f64]) -> Vec<f64> + Sync + 'a;

#[derive(Debug, Clone, PartialEq)]
pub struct FreeParameter {
    pub name: String,
    pub value: f64,
    pub lower: Option<f64>,
    pub upper: Option<f64>,
}

impl FreeParameter {
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
            lower: None,
            upper: None,
        }
    }

    pub fn bounded(mut self, lower: Option<f64>, upper: Option<f64>) -> Self {
        self.lower = lower;
        self.upper = upper;
        self
    }

    pub(crate) fn clamp(&self, value: f64) -> f64 {
        let mut v = value;
        if let Some(lo) = self.lower {
            v = v.max(lo);
        }
        if let Some(hi) = self.upper {
            v = v.min(hi);
        }
        v
    }
}

/// The free parameters of `params` in name order, with their active bounds.
pub fn free_parameters(params: &FitParameters) -> Vec<FreeParameter> {
    params
        .iter()
        .filter(|(_, p)| p.is_free())
        .map(|(name, p)| {
            FreeParameter::new(name, p.value).bounded(p.lower(), p.upper())
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct OptimizerSettings {
    pub max_iterations: usize,
    /// Relative reduction of the cost below which the fit is converged.
    pub ftol: f64,
    /// Relative step length below which the fit is converged.
    pub xtol: f64,
    /// Gradient infinity-norm below which the fit is converged.
    pub gtol: f64,
    /// Relative finite-difference step for the Jacobian.
    pub fd_step: f64,
}

impl Default for OptimizerSettings {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            ftol: 1e-10,
            xtol: 1e-10,
            gtol: 1e-12,
            fd_step: 1e-6,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OptimizerOutcome {
    pub values: Vec<f64>,
    pub iterations: usize,
    pub cost: f64,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum OptimizerError {
    #[error("No convergence after {iterations} iterations")]
    ConvergenceFailure {
        iterations: usize,
        last_values: Vec<f64>,
    },
    #[error("Nothing to optimize: no free parameters")]
    NoFreeParameters,
    #[error("Residual function returned no values")]
    EmptyResidual,
    #[error("Residual is not finite at the starting point")]
    NonFiniteStart,
}

pub trait Optimizer: Send + Sync {
    /// Minimizes `½‖residual(x)‖²` starting from the parameter values. On return the
    /// parameter values hold the final iterate, also when the iteration budget ran out.
    ///
    /// # Errors
    ///
    /// Returns [`OptimizerError::ConvergenceFailure`] when the budget is exhausted, carrying
    /// the last iterate.
    fn minimize(
        &self,
        residual: &Residual<'_>,
        params: &mut [FreeParameter],
    ) -> Result<OptimizerOutcome, OptimizerError>;

    fn settings(&self) -> &OptimizerSettings;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OptimizerKind {
    #[default]
    LevenbergMarquardt,
    BoundedLevenbergMarquardt,
}

impl OptimizerKind {
    pub fn build(&self, settings: OptimizerSettings) -> Box<dyn Optimizer> {
        match self {
            OptimizerKind::LevenbergMarquardt => Box::new(LevenbergMarquardt::new(settings)),
            OptimizerKind::BoundedLevenbergMarquardt => {
                Box::new(BoundedLevenbergMarquardt::new(settings))
            }
        }
    }
}

impl fmt::Display for OptimizerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptimizerKind::LevenbergMarquardt => f.write_str("levenberg-marquardt"),
            OptimizerKind::BoundedLevenbergMarquardt => f.write_str("bounded-levenberg-marquardt"),
        }
    }
}
