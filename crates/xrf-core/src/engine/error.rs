use thiserror::Error;

use super::config::ConfigError;
use super::optimizer::OptimizerError;
use crate::core::elements::RegistryError;
use crate::core::io::IoError;
use crate::core::math::NnlsError;
use crate::core::models::range::RangeError;
use crate::core::models::spectrum::SpectrumError;
use crate::core::quantification::QuantError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Configuration error: {source}")]
    Config {
        #[from]
        source: ConfigError,
    },

    #[error("Element table error: {source}")]
    Registry {
        #[from]
        source: RegistryError,
    },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: IoError,
    },

    #[error("Invalid channel range: {source}")]
    Range {
        #[from]
        source: RangeError,
    },

    #[error("Spectrum error: {source}")]
    Spectrum {
        #[from]
        source: SpectrumError,
    },

    #[error("Optimizer failed: {source}")]
    Optimizer {
        #[from]
        source: OptimizerError,
    },

    #[error("Non-negative least squares failed: {source}")]
    Nnls {
        #[from]
        source: NnlsError,
    },

    #[error("Quantification failed: {source}")]
    Quantification {
        #[from]
        source: QuantError,
    },

    #[error("Fit routine '{0}' was used before it was initialized")]
    RoutineNotInitialized(&'static str),

    #[error("Fit routine '{0}' needs at least one fit element")]
    EmptyBasis(&'static str),

    #[error("Spectrum has {found} channels but the routine was initialized for {expected}")]
    ChannelMismatch { expected: usize, found: usize },

    #[error("Linear solve failed: {0}")]
    LinearSolve(String),

    #[error("Failed to build worker pool: {0}")]
    ThreadPool(String),

    #[error("Internal logic error: {0}")]
    Internal(String),
}
