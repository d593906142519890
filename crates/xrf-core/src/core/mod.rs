//! # Core Module
//!
//! The fundamental building blocks of the fitting engine.
//!
//! ## Architecture
//!
//! - **Data Models** ([`models`]) - Spectra, volumes, channel ranges, fit parameters,
//!   fit element maps and the per-pixel output arena
//! - **Energy Calibration** ([`calibration`]) - Quadratic channel ↔ energy mapping
//! - **Element Data** ([`elements`]) - The emission-line lookup boundary and a TOML-backed registry
//! - **Spectral Model** ([`model`]) - Peak shapes, scatter, escape peaks and SNIP background
//! - **Numerics** ([`math`]) - Non-negative least squares
//! - **Quantification** ([`quantification`]) - Absorption and transmission factors behind a
//!   model trait, with a tabulated implementation
//! - **File I/O** ([`io`]) - Loader and serializer traits, CSV implementations and the I/O gate

pub mod calibration;
pub mod elements;
pub mod io;
pub mod math;
pub mod model;
pub mod models;
pub mod quantification;
