//! # Quantification Physics
//!
//! Per-element factors that turn fitted counts per second into areal concentrations.
//!
//! The physics itself (absorption edges, fluorescence yields, optical constants) is an
//! external collaborator behind [`QuantificationModel`]. [`table::QuantTable`] is a
//! TOML-backed implementation; the formulas shared by every model live here.

pub mod table;

use crate::core::models::element::Shell;
use std::f64::consts::PI;
use thiserror::Error;

/// `h·c` in eV·nm, converting photon energy to wavelength.
pub const HC_EV_NM: f64 = 1239.852;

#[derive(Debug, Error)]
pub enum QuantError {
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
    #[error("Material '{0}' has no optical constants")]
    UnknownMaterial(String),
}

/// Wavelength in nm of a photon of `energy_ev`.
#[inline]
pub fn wavelength_nm(energy_ev: f64) -> f64 {
    HC_EV_NM / energy_ev
}

/// Fraction of photons of wavelength `lambda` (nm) passing `thickness` nm of a material
/// with absorptive index `beta`.
pub fn transmission(thickness: f64, beta: f64, lambda: f64) -> f64 {
    (-4.0 * PI * thickness * beta / lambda).exp().abs()
}

/// Fraction absorbed by one subshell, `shell_factor` being the share of the total
/// absorption that subshell accounts for.
pub fn absorption(thickness: f64, beta: f64, lambda: f64, shell_factor: f64) -> f64 {
    1.0 - (-4.0 * PI * thickness * shell_factor * beta / lambda).exp().abs()
}

/// Share of absorption taken by a subshell with edge jump `jump`, divided by the product of
/// the jumps of the shells above it when there are any. Zero when no edge is crossed.
pub fn shell_factor(jump: f64, total_jump: Option<f64>) -> f64 {
    if jump == 0.0 {
        return 0.0;
    }
    let factor = (jump - 1.0) / jump;
    match total_jump {
        Some(total) if total != 0.0 => factor / total,
        _ => factor,
    }
}

/// Detector and beam geometry a standard was measured with.
#[derive(Debug, Clone, PartialEq)]
pub struct QuantGeometry {
    /// keV
    pub incident_energy: f64,
    pub detector_element: String,
    /// µm
    pub be_window_thickness: f64,
    /// µm
    pub ge_dead_layer: f64,
    /// µm
    pub det_chip_thickness: f64,
    /// µm
    pub airpath: f64,
}

/// Physical factors of one element's principal line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ElementQuant {
    pub absorption: f64,
    pub transmission_be: f64,
    pub transmission_ge: f64,
    pub yield_: f64,
    pub transmission_through_si_detector: f64,
    pub transmission_through_air: f64,
}

impl Default for ElementQuant {
    fn default() -> Self {
        Self {
            absorption: 0.0,
            transmission_be: 1.0,
            transmission_ge: 1.0,
            yield_: 0.0,
            transmission_through_si_detector: 0.0,
            transmission_through_air: 1.0,
        }
    }
}

impl ElementQuant {
    /// Detected fraction per unit of element, before the instrument scale.
    pub fn factor(&self) -> f64 {
        self.absorption
            * self.transmission_be
            * self.transmission_ge
            * self.yield_
            * (1.0 - self.transmission_through_si_detector)
            * self.transmission_through_air
    }
}

pub trait QuantificationModel: Send + Sync {
    /// Factors of `symbol`'s `shell` line, or `None` when the element is not tabulated.
    fn element_quant(
        &self,
        symbol: &str,
        shell: Shell,
        geometry: &QuantGeometry,
    ) -> Result<Option<ElementQuant>, QuantError>;

    /// Every element symbol with data for `shell`, in a fixed order.
    fn elements(&self, shell: Shell) -> Vec<String>;
}
