use crate::core::elements::{ElementLineTable, RegistryError, build_fit_element_maps};
use crate::core::model::GaussianModel;
use crate::core::models::element::FitElementMapDict;
use crate::core::models::params::{FitParam, FitParameters, FitParamsPreset, names};
use crate::core::quantification::QuantGeometry;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

fn default_detector_element() -> String {
    "Si".to_string()
}

/// Per-detector analysis settings: which elements to fit, starting parameter values and
/// the detector geometry used for quantification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ParamsOverride {
    /// Detector material, used for per-detector line ratio adjustments.
    #[serde(default = "default_detector_element")]
    pub detector_element: String,
    #[serde(default)]
    pub fit_params: FitParameters,
    pub elements_to_fit: Vec<String>,
    /// ROI integration width in eV applied to every element.
    #[serde(default)]
    pub roi_width_ev: Option<f64>,
    /// Element → line label → multiplier on the tabulated ratio.
    #[serde(default)]
    pub line_ratios: BTreeMap<String, BTreeMap<String, f64>>,
    /// µm
    #[serde(default)]
    pub be_window_thickness: f64,
    /// µm
    #[serde(default)]
    pub ge_dead_layer: f64,
    /// µm
    #[serde(default)]
    pub det_chip_thickness: f64,
    /// µm of air between sample and detector.
    #[serde(default)]
    pub airpath: f64,
    /// keV; sets the elastic scatter energy when given.
    #[serde(default)]
    pub incident_energy: Option<f64>,
}

impl ParamsOverride {
    pub fn new<S: Into<String>>(elements_to_fit: impl IntoIterator<Item = S>) -> Self {
        Self {
            detector_element: default_detector_element(),
            fit_params: FitParameters::new(),
            elements_to_fit: elements_to_fit.into_iter().map(Into::into).collect(),
            roi_width_ev: None,
            line_ratios: BTreeMap::new(),
            be_window_thickness: 0.0,
            ge_dead_layer: 0.0,
            det_chip_thickness: 0.0,
            airpath: 0.0,
            incident_energy: None,
        }
    }

    /// Incident beam energy: the explicit value, else the elastic scatter energy.
    pub fn incident_energy(&self) -> f64 {
        let default = || FitParameters::defaults().value_or(names::COHERENT_SCT_ENERGY, 0.0);
        self.incident_energy
            .or_else(|| self.fit_params.value(names::COHERENT_SCT_ENERGY))
            .unwrap_or_else(default)
    }

    pub fn quant_geometry(&self) -> QuantGeometry {
        QuantGeometry {
            incident_energy: self.incident_energy(),
            detector_element: self.detector_element.clone(),
            be_window_thickness: self.be_window_thickness,
            ge_dead_layer: self.ge_dead_layer,
            det_chip_thickness: self.det_chip_thickness,
            airpath: self.airpath,
        }
    }

    /// Default model with these overrides applied and `preset` active.
    pub fn model(&self, preset: FitParamsPreset) -> GaussianModel {
        let mut model = GaussianModel::new();
        model.update_fit_params_values(&self.fit_params);
        if let Some(energy) = self.incident_energy {
            let mut incident = FitParameters::new();
            incident.insert(names::COHERENT_SCT_ENERGY, FitParam::new(energy));
            model.update_fit_params_values(&incident);
        }
        model.set_fit_params_preset(preset);
        model
    }

    /// Fit maps of every configured element with custom line ratios applied.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] if an element name is invalid or missing from `table`.
    pub fn fit_element_maps(
        &self,
        table: &dyn ElementLineTable,
    ) -> Result<FitElementMapDict, RegistryError> {
        let mut maps = build_fit_element_maps(
            &self.elements_to_fit,
            table,
            &self.detector_element,
            self.roi_width_ev,
        )?;
        for (element, ratios) in &self.line_ratios {
            let Some(map) = maps.get_mut(element) else {
                warn!(element = %element, "Line ratio override for an unfitted element");
                continue;
            };
            for (label, &multiplier) in ratios {
                match map.lines().iter().position(|l| &l.label == label) {
                    Some(index) => map.set_custom_multiply_ratio(index, multiplier),
                    None => {
                        warn!(element = %element, line = %label, "Unknown line in ratio override")
                    }
                }
            }
        }
        Ok(maps)
    }
}

/// Overrides for every detector of a scan, falling back to a shared default.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorOverrides {
    pub default: ParamsOverride,
    pub detectors: BTreeMap<usize, ParamsOverride>,
}

impl DetectorOverrides {
    pub fn new(default: ParamsOverride) -> Self {
        Self {
            default,
            detectors: BTreeMap::new(),
        }
    }

    pub fn with_detector(mut self, detector: usize, params: ParamsOverride) -> Self {
        self.detectors.insert(detector, params);
        self
    }

    pub fn for_detector(&self, detector: usize) -> &ParamsOverride {
        self.detectors.get(&detector).unwrap_or(&self.default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::elements::registry::ElementRegistry;

    fn registry() -> ElementRegistry {
        ElementRegistry::from_toml_str(
            r#"
[elements.Fe]
atomic_number = 26
lines = [
    { shell = "K", label = "Ka1", energy = 6.404, ratio = 1.0 },
    { shell = "K", label = "Kb1", energy = 7.058, ratio = 0.2 },
]
"#,
        )
        .unwrap()
    }

    #[test]
    fn deserializes_from_kebab_case_toml() {
        let parsed: ParamsOverride = toml::from_str(
            r#"
detector-element = "Ge"
elements-to-fit = ["Fe", "COMPTON_AMPLITUDE"]
be-window-thickness = 24.0
incident-energy = 12.0

[fit-params.fwhm_offset]
value = 0.14

[line-ratios.Fe]
Kb1 = 0.5
"#,
        )
        .unwrap();
        assert_eq!(parsed.detector_element, "Ge");
        assert_eq!(parsed.elements_to_fit.len(), 2);
        assert_eq!(parsed.fit_params.value(names::FWHM_OFFSET), Some(0.14));
        assert_eq!(parsed.incident_energy(), 12.0);
        assert_eq!(parsed.quant_geometry().be_window_thickness, 24.0);
        assert!(toml::from_str::<ParamsOverride>("elements-to-fit = []\nbogus = 1").is_err());
    }

    #[test]
    fn model_applies_values_and_incident_energy() {
        let mut over = ParamsOverride::new(["Fe"]);
        over.fit_params.insert(names::FWHM_OFFSET, FitParam::new(0.2));
        over.incident_energy = Some(15.0);
        let model = over.model(FitParamsPreset::BatchFitWithTails);
        assert_eq!(model.fit_parameters().value(names::FWHM_OFFSET), Some(0.2));
        assert_eq!(model.fit_parameters().value(names::COHERENT_SCT_ENERGY), Some(15.0));
        assert_eq!(model.preset(), FitParamsPreset::BatchFitWithTails);
    }

    #[test]
    fn line_ratio_overrides_scale_named_lines() {
        let mut over = ParamsOverride::new(["Fe"]);
        over.line_ratios
            .entry("Fe".to_string())
            .or_default()
            .insert("Kb1".to_string(), 0.5);
        let maps = over.fit_element_maps(&registry()).unwrap();
        let fe = &maps["Fe"];
        assert!((fe.effective_ratio(1) - 0.1).abs() < 1e-12);
        assert_eq!(fe.effective_ratio(0), 1.0);
    }

    #[test]
    fn detector_specific_overrides_win_over_default() {
        let overrides = DetectorOverrides::new(ParamsOverride::new(["Fe"]))
            .with_detector(2, ParamsOverride::new(["Ca"]));
        assert_eq!(overrides.for_detector(0).elements_to_fit, vec!["Fe"]);
        assert_eq!(overrides.for_detector(2).elements_to_fit, vec!["Ca"]);
    }
}
