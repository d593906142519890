use super::{ElementLineTable, RegistryError};
use crate::core::models::element::{EmissionLine, LineKind, Shell};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct LineRecord {
    pub shell: Shell,
    pub label: String,
    pub energy: f64,
    pub ratio: f64,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ElementRecord {
    pub atomic_number: u32,
    #[serde(default)]
    pub lines: Vec<LineRecord>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct RegistryFile {
    #[serde(default)]
    elements: BTreeMap<String, ElementRecord>,
    /// detector material → fit element name → line label → ratio multiplier
    #[serde(default)]
    detector_ratios: BTreeMap<String, BTreeMap<String, BTreeMap<String, f64>>>,
}

/// Element line table loaded from TOML.
///
/// ```toml
/// [elements.Fe]
/// atomic_number = 26
/// lines = [
///     { shell = "K", label = "Ka1", energy = 6.404, ratio = 1.0 },
///     { shell = "K", label = "Kb1", energy = 7.058, ratio = 0.17 },
/// ]
///
/// [detector_ratios.Si.Fe]
/// Kb1 = 0.98
/// ```
#[derive(Debug, Clone, Default)]
pub struct ElementRegistry {
    elements: BTreeMap<String, ElementRecord>,
    detector_ratios: BTreeMap<String, BTreeMap<String, BTreeMap<String, f64>>>,
}

impl ElementRegistry {
    pub fn load(path: &Path) -> Result<Self, RegistryError> {
        let content = std::fs::read_to_string(path).map_err(|e| RegistryError::Io {
            path: path.to_string_lossy().to_string(),
            source: e,
        })?;
        Self::from_toml_str(&content).map_err(|source| RegistryError::Toml {
            path: path.to_string_lossy().to_string(),
            source,
        })
    }

    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        let file: RegistryFile = toml::from_str(content)?;
        Ok(Self {
            elements: file.elements,
            detector_ratios: file.detector_ratios,
        })
    }

    pub fn insert(&mut self, symbol: impl Into<String>, record: ElementRecord) {
        self.elements.insert(symbol.into(), record);
    }

    pub fn set_detector_ratio(&mut self, detector: &str, element: &str, label: &str, ratio: f64) {
        self.detector_ratios
            .entry(detector.to_string())
            .or_default()
            .entry(element.to_string())
            .or_default()
            .insert(label.to_string(), ratio);
    }

    pub fn get(&self, symbol: &str) -> Option<&ElementRecord> {
        self.elements.get(symbol)
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}

impl ElementLineTable for ElementRegistry {
    fn lines(&self, symbol: &str, shell: Shell) -> Option<Vec<EmissionLine>> {
        let record = self.elements.get(symbol)?;
        Some(
            record
                .lines
                .iter()
                .filter(|l| l.shell == shell)
                .map(|l| EmissionLine {
                    label: l.label.clone(),
                    kind: LineKind::classify(shell, &l.label),
                    energy: l.energy,
                    ratio: l.ratio,
                })
                .collect(),
        )
    }

    fn detector_ratio(&self, detector: &str, element: &str, label: &str) -> f64 {
        self.detector_ratios
            .get(detector)
            .and_then(|by_element| by_element.get(element))
            .and_then(|by_line| by_line.get(label))
            .copied()
            .unwrap_or(1.0)
    }
}
