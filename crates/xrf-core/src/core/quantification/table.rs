use super::{
    ElementQuant, QuantError, QuantGeometry, QuantificationModel, absorption, shell_factor,
    transmission, wavelength_nm,
};
use crate::core::models::element::Shell;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Offset in keV above the incident energy at which self-absorption is evaluated, keeping
/// standards clear of an absorption edge sitting exactly at the beam energy.
const EDGE_MARGIN_KEV: f64 = 0.1;

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct MaterialRecord {
    /// g/cm³
    pub density: f64,
    /// `(photon energy in eV, beta)` samples, sorted by energy.
    pub beta: Vec<(f64, f64)>,
}

impl MaterialRecord {
    /// Beta at `energy_ev`, interpolated log-log between samples and held constant past the
    /// first and last sample.
    pub fn beta_at(&self, energy_ev: f64) -> f64 {
        let samples = &self.beta;
        let Some(&(first_e, first_b)) = samples.first() else {
            return 0.0;
        };
        if energy_ev <= first_e {
            return first_b;
        }
        for pair in samples.windows(2) {
            let ((e0, b0), (e1, b1)) = (pair[0], pair[1]);
            if energy_ev <= e1 {
                if b0 <= 0.0 || b1 <= 0.0 || e0 <= 0.0 {
                    let t = (energy_ev - e0) / (e1 - e0);
                    return b0 + t * (b1 - b0);
                }
                let t = (energy_ev.ln() - e0.ln()) / (e1.ln() - e0.ln());
                return (b0.ln() + t * (b1.ln() - b0.ln())).exp();
            }
        }
        samples.last().map_or(first_b, |&(_, b)| b)
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ShellRecord {
    /// Principal line energy, keV.
    pub line_energy: f64,
    #[serde(rename = "yield")]
    pub fluorescence_yield: f64,
    /// Binding energy of the shell, keV.
    pub edge: f64,
    pub jump: f64,
    /// Product of the jumps of the higher subshells, when they are excited.
    #[serde(default)]
    pub total_jump: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct QuantFile {
    #[serde(default)]
    materials: BTreeMap<String, MaterialRecord>,
    /// element symbol → shell ("K", "L", "M") → record
    #[serde(default)]
    shells: BTreeMap<String, BTreeMap<String, ShellRecord>>,
}

/// Quantification model backed by tabulated optical constants.
///
/// ```toml
/// [materials.Fe]
/// density = 7.874
/// beta = [[5000.0, 4.0e-6], [15000.0, 9.0e-7]]
///
/// [materials.Be]
/// density = 1.848
/// beta = [[1000.0, 1.0e-6], [20000.0, 2.0e-10]]
///
/// [shells.Fe.K]
/// line_energy = 6.404
/// yield = 0.35
/// edge = 7.112
/// jump = 8.1
/// ```
///
/// Window and dead-layer materials are looked up as `Be`, `Ge`, `Si` and `air`.
#[derive(Debug, Clone, Default)]
pub struct QuantTable {
    materials: BTreeMap<String, MaterialRecord>,
    shells: BTreeMap<String, BTreeMap<String, ShellRecord>>,
}

impl QuantTable {
    pub fn load(path: &Path) -> Result<Self, QuantError> {
        let content = std::fs::read_to_string(path).map_err(|e| QuantError::Io {
            path: path.to_string_lossy().to_string(),
            source: e,
        })?;
        Self::from_toml_str(&content).map_err(|source| QuantError::Toml {
            path: path.to_string_lossy().to_string(),
            source,
        })
    }

    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        let file: QuantFile = toml::from_str(content)?;
        Ok(Self {
            materials: file.materials,
            shells: file.shells,
        })
    }

    pub fn material(&self, name: &str) -> Option<&MaterialRecord> {
        self.materials.get(name)
    }

    fn shell(&self, symbol: &str, shell: Shell) -> Option<&ShellRecord> {
        self.shells.get(symbol)?.get(&shell.to_string())
    }

    /// Transmission of a `thickness_um` layer of `material` at `energy_ev`; a layer of zero
    /// thickness needs no table entry.
    fn layer(&self, material: &str, thickness_um: f64, energy_ev: f64) -> Result<f64, QuantError> {
        if thickness_um <= 0.0 {
            return Ok(1.0);
        }
        let record = self
            .material(material)
            .ok_or_else(|| QuantError::UnknownMaterial(material.to_string()))?;
        Ok(transmission(
            thickness_um * 1000.0,
            record.beta_at(energy_ev),
            wavelength_nm(energy_ev),
        ))
    }
}

impl QuantificationModel for QuantTable {
    fn element_quant(
        &self,
        symbol: &str,
        shell: Shell,
        geometry: &QuantGeometry,
    ) -> Result<Option<ElementQuant>, QuantError> {
        let Some(record) = self.shell(symbol, shell) else {
            return Ok(None);
        };
        let material = self
            .material(symbol)
            .ok_or_else(|| QuantError::UnknownMaterial(symbol.to_string()))?;

        let jump = if geometry.incident_energy > record.edge {
            record.jump
        } else {
            0.0
        };
        let excitation_ev = (geometry.incident_energy + EDGE_MARGIN_KEV) * 1000.0;
        // Thickness of a 1 µg/cm² layer of the element.
        let thickness = 1.0 / (material.density * 10.0) * 1000.0;
        let line_ev = record.line_energy * 1000.0;

        let transmission_through_si_detector =
            if geometry.detector_element == "Si" && geometry.det_chip_thickness > 0.0 {
                self.layer("Si", geometry.det_chip_thickness, line_ev)?
            } else {
                0.0
            };

        Ok(Some(ElementQuant {
            absorption: absorption(
                thickness,
                material.beta_at(excitation_ev),
                wavelength_nm(excitation_ev),
                shell_factor(jump, record.total_jump),
            ),
            transmission_be: self.layer("Be", geometry.be_window_thickness, line_ev)?,
            transmission_ge: self.layer("Ge", geometry.ge_dead_layer, line_ev)?,
            yield_: record.fluorescence_yield,
            transmission_through_si_detector,
            transmission_through_air: self.layer("air", geometry.airpath, line_ev)?,
        }))
    }

    fn elements(&self, shell: Shell) -> Vec<String> {
        let key = shell.to_string();
        self.shells
            .iter()
            .filter(|(_, shells)| shells.contains_key(&key))
            .map(|(symbol, _)| symbol.clone())
            .collect()
    }
}
