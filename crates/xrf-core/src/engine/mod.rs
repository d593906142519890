//! # Engine Module
//!
//! Turns the stateless building blocks of [`crate::core`] into per-pixel fits over whole
//! spectra volumes.
//!
//! ## Overview
//!
//! A run starts from a [`config::ProcessingConfig`], which is turned into a
//! [`context::ProcessingContext`] owning the worker pool, the shared optimizer back-end and
//! the I/O gate. Fit routines are built from [`routines::FitRoutineKind`], initialized once
//! against the model and the element set, and then fanned out across a volume by
//! [`scheduler::fit_volume`].
//!
//! ## Architecture
//!
//! - **Configuration** ([`config`]) - Processing options and their builder
//! - **Context** ([`context`]) - Per-run resources passed by reference to every stage
//! - **Optimizers** ([`optimizer`]) - Nonlinear least-squares back-ends
//! - **Fit Routines** ([`routines`]) - ROI, SVD, NNLS, matrix- and parameter-optimized fits
//! - **Scheduling** ([`scheduler`]) - The parallel per-pixel driver
//! - **Progress Monitoring** ([`progress`]) - Callback-based progress events
//! - **Error Handling** ([`error`]) - Engine error type aggregating every layer below

pub mod config;
pub mod context;
pub mod error;
pub mod optimizer;
pub mod progress;
pub mod routines;
pub mod scheduler;
