//! # Core Models Module
//!
//! Data structures shared by every stage of the fitting engine.
//!
//! - [`spectrum`] - One pixel's channel counts plus acquisition metadata
//! - [`volume`] - A rows × cols grid of spectra from one scan and detector
//! - [`range`] - Inclusive channel windows restricting a fit
//! - [`params`] - Named, bounded fit parameters, presets and running averages
//! - [`element`] - Emission-line data and the per-element fit maps
//! - [`counts`] - The pre-sized, pixel-major output arena written by the scheduler

pub mod counts;
pub mod element;
pub mod params;
pub mod range;
pub mod spectrum;
pub mod volume;
