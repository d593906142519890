//! Input/output boundary of the engine.
//!
//! The loader and serializer are traits ([`traits::VolumeSource`], [`traits::FitResultSink`])
//! so that scan-format readers and HDF5 writers can be supplied from outside. CSV/TOML
//! implementations are provided for standalone use. Every call into them is serialized
//! through a single [`gate::IoGate`].

pub mod csv_results;
pub mod csv_volume;
pub mod error;
pub mod gate;
pub mod traits;

pub use csv_results::CsvResultSink;
pub use csv_volume::CsvVolumeSource;
pub use error::IoError;
pub use gate::IoGate;
pub use traits::{FitResultSink, VolumeSize, VolumeSource};
