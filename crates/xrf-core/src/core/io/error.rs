use crate::core::models::spectrum::SpectrumError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IoError {
    #[error("File I/O error for '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("CSV error for '{path}': {source}")]
    Csv { path: String, source: csv::Error },
    #[error("TOML parsing error for '{path}': {source}")]
    Toml {
        path: String,
        source: toml::de::Error,
    },
    #[error("TOML serialization error for '{path}': {source}")]
    TomlWrite {
        path: String,
        source: toml::ser::Error,
    },
    #[error("Malformed record in '{path}' at line {line}: {message}")]
    Format {
        path: String,
        line: u64,
        message: String,
    },
    #[error("Dataset '{dataset}' has no data for detector {detector}")]
    MissingDetector { dataset: String, detector: usize },
    #[error("Inconsistent spectrum: {0}")]
    Spectrum(#[from] SpectrumError),
}
