//! # XRF Maps Core Library
//!
//! A high-performance library for turning X-ray fluorescence spectra volumes, collected
//! pixel by pixel over a 2-D scan, into per-element intensity maps.
//!
//! ## Architectural Philosophy
//!
//! The library follows a strict three-layer architecture so that each layer can be tested
//! and replaced on its own.
//!
//! - **[`core`]: The Foundation.** Stateless data models (`Spectrum`, `SpectraVolume`,
//!   `FitParameters`), the energy calibration, the spectral model with its SNIP background
//!   estimator, numerical kernels (NNLS) and the I/O boundary (loader and serializer traits).
//!
//! - **[`engine`]: The Logic Core.** The pluggable optimizer back-ends, the family of fit
//!   routines (ROI, SVD, NNLS, matrix-optimized, parameter-optimized) and the parallel
//!   per-pixel scheduler that fans a routine out across a volume.
//!
//! - **[`workflows`]: The Public API.** Complete procedures built on the engine: processing
//!   a volume for several fit types, deriving representative fit parameters from integrated
//!   spectra, and quantification against a calibration standard.

pub mod core;
pub mod engine;
pub mod workflows;
