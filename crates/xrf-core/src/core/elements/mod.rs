//! # Element Line Data
//!
//! Read-only lookup of emission lines per element and shell, with per-detector
//! ratio corrections, and the construction of the [`FitElementMapDict`] a job fits.
//!
//! The lookup itself is a trait so that alternative reference tables can be plugged in;
//! [`registry::ElementRegistry`] is the TOML-backed implementation shipped here.

pub mod registry;

use crate::core::models::element::{
    ElementName, EmissionLine, FitElementMap, FitElementMapDict, Shell,
};
use thiserror::Error;

pub trait ElementLineTable: Send + Sync {
    /// Lines of `symbol` in `shell`, or `None` when the element is unknown.
    fn lines(&self, symbol: &str, shell: Shell) -> Option<Vec<EmissionLine>>;

    /// Multiplier applied to a line's ratio for the given detector material.
    fn detector_ratio(&self, detector: &str, element: &str, label: &str) -> f64;
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("File I/O error for '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("TOML parsing error for '{path}': {source}")]
    Toml {
        path: String,
        source: toml::de::Error,
    },
    #[error("Invalid fit element name '{0}'")]
    InvalidName(String),
    #[error("Element '{0}' not found in the line table")]
    UnknownElement(String),
    #[error("Element '{name}' has no {shell} lines")]
    NoLines { name: String, shell: Shell },
    #[error("No elements configured for fitting")]
    NoElements,
}

/// Builds the fit map of every requested element for a detector of the given material.
///
/// Names are canonicalized (`Compton_Amplitude` → `COMPTON_AMPLITUDE`).
pub fn build_fit_element_maps<S: AsRef<str>>(
    names: &[S],
    table: &dyn ElementLineTable,
    detector: &str,
    roi_width_ev: Option<f64>,
) -> Result<FitElementMapDict, RegistryError> {
    if names.is_empty() {
        return Err(RegistryError::NoElements);
    }
    let mut dict = FitElementMapDict::new();
    for raw in names {
        let raw = raw.as_ref();
        let parsed =
            ElementName::parse(raw).ok_or_else(|| RegistryError::InvalidName(raw.to_string()))?;
        let canonical = parsed.canonical();
        let mut map = match parsed {
            ElementName::Compton => FitElementMap::compton(),
            ElementName::Coherent => FitElementMap::coherent(),
            ElementName::Element { symbol, shell } => {
                let lines = table
                    .lines(&symbol, shell)
                    .ok_or_else(|| RegistryError::UnknownElement(symbol.clone()))?;
                if lines.is_empty() {
                    return Err(RegistryError::NoLines {
                        name: canonical,
                        shell,
                    });
                }
                let adjustments: Vec<f64> = lines
                    .iter()
                    .map(|l| table.detector_ratio(detector, &canonical, &l.label))
                    .collect();
                let mut map = FitElementMap::element(canonical.clone(), symbol, shell, lines);
                map.apply_detector_ratios(&adjustments);
                map
            }
        };
        if let Some(width) = roi_width_ev {
            map = map.with_width_ev(width);
        }
        dict.insert(canonical, map);
    }
    Ok(dict)
}
