//! # Spectral Model
//!
//! Evaluation of modeled XRF spectra and estimation of the continuum under them.
//!
//! - [`peaks`] - Normalized Gaussian, step and tail line shapes
//! - [`gaussian`] - [`gaussian::GaussianModel`], summing line shapes of every fitted element,
//!   scatter peaks and escape peaks over a channel range
//! - [`snip`] - The SNIP log-log clipping background estimator
//!
//! Elements are always visited in name order, so evaluation is bit-reproducible.

pub mod gaussian;
pub mod peaks;
pub mod snip;

pub use gaussian::GaussianModel;
pub use snip::{SnipBackground, SnipWidthScaling};
