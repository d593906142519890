use super::fit_range;
use super::overrides::ParamsOverride;
use crate::core::calibration::EnergyCalibration;
use crate::core::elements::ElementLineTable;
use crate::core::io::VolumeSource;
use crate::core::models::counts::{FitCounts, NUM_ITERATIONS_KEY};
use crate::core::models::element::{ElementName, Shell};
use crate::core::models::spectrum::Spectrum;
use crate::core::quantification::{QuantGeometry, QuantificationModel};
use crate::engine::config::ConfigError;
use crate::engine::context::ProcessingContext;
use crate::engine::error::EngineError;
use crate::engine::routines::FitRoutineKind;
use std::collections::BTreeMap;
use tracing::{debug, info, instrument, warn};

const SHELLS: [Shell; 3] = [Shell::K, Shell::L, Shell::M];

/// Counts-per-second produced by one µg/cm² of each element, for one fit type and shell.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationCurve {
    /// Instrument scale fitted to the standard.
    pub quantifier: f64,
    /// Number of standard elements the scale was fitted to.
    pub points: usize,
    /// Fit element name → counts per second per µg/cm².
    pub factors: BTreeMap<String, f64>,
}

impl CalibrationCurve {
    /// Areal concentration in µg/cm² for `counts_per_second` of `element`.
    pub fn concentration(&self, element: &str, counts_per_second: f64) -> Option<f64> {
        let factor = *self.factors.get(element)?;
        (factor > 0.0).then(|| counts_per_second / factor)
    }
}

/// Reference sample with known element weights (µg/cm²).
#[derive(Debug, Clone)]
pub struct QuantificationStandard {
    pub name: String,
    element_weights: BTreeMap<String, f64>,
    integrated_spectrum: Option<Spectrum>,
    fitted_counts: BTreeMap<FitRoutineKind, FitCounts>,
    calibration_curves: BTreeMap<FitRoutineKind, BTreeMap<Shell, CalibrationCurve>>,
}

impl QuantificationStandard {
    pub fn new(name: impl Into<String>, element_weights: BTreeMap<String, f64>) -> Self {
        Self {
            name: name.into(),
            element_weights,
            integrated_spectrum: None,
            fitted_counts: BTreeMap::new(),
            calibration_curves: BTreeMap::new(),
        }
    }

    pub fn with_spectrum(mut self, spectrum: Spectrum) -> Self {
        self.integrated_spectrum = Some(spectrum);
        self
    }

    pub fn element_weights(&self) -> &BTreeMap<String, f64> {
        &self.element_weights
    }

    pub fn integrated_spectrum(&self) -> Option<&Spectrum> {
        self.integrated_spectrum.as_ref()
    }

    /// Counts per second of every element fitted with `kind`.
    pub fn fitted_counts(&self, kind: FitRoutineKind) -> Option<&FitCounts> {
        self.fitted_counts.get(&kind)
    }

    pub fn calibration_curve(
        &self,
        kind: FitRoutineKind,
        shell: Shell,
    ) -> Option<&CalibrationCurve> {
        self.calibration_curves.get(&kind)?.get(&shell)
    }

    pub fn calibration_curves(
        &self,
    ) -> impl Iterator<Item = (FitRoutineKind, Shell, &CalibrationCurve)> {
        self.calibration_curves
            .iter()
            .flat_map(|(kind, shells)| shells.iter().map(|(shell, c)| (*kind, *shell, c)))
    }
}

/// Loads the standard's volume through the I/O gate and sums it into one spectrum.
///
/// # Errors
///
/// Returns [`EngineError::Io`] if the volume cannot be loaded.
pub fn load_standard_spectrum(
    context: &ProcessingContext<'_>,
    source: &dyn VolumeSource,
    dataset: &str,
    detector: usize,
) -> Result<Spectrum, EngineError> {
    let volume = context.io.run(|| source.load_volume(dataset, detector))?;
    let mut spectrum = volume.integrate();
    spectrum.recalc_elapsed_livetime();
    Ok(spectrum)
}

/// Fits the standard's integrated spectrum with every configured fit type and derives one
/// calibration curve per fit type and shell.
///
/// The instrument scale `p` is the least-squares solution of
/// `p · factor(e) ≈ cps(e) / weight(e)` over the standard's elements of that shell.
/// Shells without usable standard elements get no curve.
///
/// # Errors
///
/// Returns [`EngineError`] if the standard has no spectrum, an element cannot be resolved,
/// a routine fails or the quantification model lacks a required material.
#[instrument(skip_all, name = "perform_quantification", fields(standard = %standard.name))]
pub fn perform_quantification(
    context: &ProcessingContext<'_>,
    standard: &mut QuantificationStandard,
    table: &dyn ElementLineTable,
    quant_model: &dyn QuantificationModel,
    settings: &ParamsOverride,
) -> Result<(), EngineError> {
    let spectrum = standard
        .integrated_spectrum
        .as_ref()
        .ok_or(ConfigError::MissingParameter("integrated_spectrum"))?;

    let mut settings = settings.clone();
    for name in standard.element_weights.keys() {
        if !settings.elements_to_fit.contains(name) {
            settings.elements_to_fit.push(name.clone());
        }
    }
    let elements = settings.fit_element_maps(table)?;
    let model = settings.model(context.config.preset);
    let calibration = EnergyCalibration::from_params(model.fit_parameters());
    let range = fit_range(context.config, &calibration, spectrum.len())?;
    let geometry = settings.quant_geometry();
    let livetime = spectrum.elapsed_livetime();

    let mut fitted_counts = BTreeMap::new();
    let mut curves = BTreeMap::new();
    for &kind in &context.config.fit_kinds {
        let mut routine = kind.build(context);
        routine.initialize(&model, &elements, range)?;
        let mut counts = routine.fit_spectrum(&model, spectrum, &elements)?;
        counts.remove(NUM_ITERATIONS_KEY);
        if livetime > 0.0 {
            counts.values_mut().for_each(|c| *c /= livetime);
        }

        let mut by_shell = BTreeMap::new();
        for shell in SHELLS {
            if let Some(curve) = calibration_curve(
                &standard.element_weights,
                &counts,
                quant_model,
                shell,
                &geometry,
            )? {
                debug!(%kind, %shell, quantifier = curve.quantifier, "Calibration curve fitted");
                by_shell.insert(shell, curve);
            }
        }
        curves.insert(kind, by_shell);
        fitted_counts.insert(kind, counts);
    }

    info!(fit_kinds = curves.len(), "Quantification finished");
    standard.fitted_counts = fitted_counts;
    standard.calibration_curves = curves;
    Ok(())
}

fn calibration_curve(
    weights: &BTreeMap<String, f64>,
    counts: &FitCounts,
    quant_model: &dyn QuantificationModel,
    shell: Shell,
    geometry: &QuantGeometry,
) -> Result<Option<CalibrationCurve>, EngineError> {
    let mut sum_fr = 0.0;
    let mut sum_ff = 0.0;
    let mut points = 0;
    for (name, &weight) in weights {
        let Some(ElementName::Element { symbol, shell: s }) = ElementName::parse(name) else {
            continue;
        };
        if s != shell || weight <= 0.0 {
            continue;
        }
        let canonical = ElementName::Element {
            symbol: symbol.clone(),
            shell,
        }
        .canonical();
        let Some(&cps) = counts.get(&canonical) else {
            continue;
        };
        let Some(quant) = quant_model.element_quant(&symbol, shell, geometry)? else {
            warn!(element = %canonical, "No quantification data for standard element");
            continue;
        };
        let factor = quant.factor();
        if factor > 0.0 {
            sum_fr += factor * cps / weight;
            sum_ff += factor * factor;
            points += 1;
        }
    }
    if points == 0 {
        return Ok(None);
    }
    let quantifier = sum_fr / sum_ff;

    let mut factors = BTreeMap::new();
    for symbol in quant_model.elements(shell) {
        if let Some(quant) = quant_model.element_quant(&symbol, shell, geometry)? {
            factors.insert(format!("{symbol}{}", shell.suffix()), quantifier * quant.factor());
        }
    }
    Ok(Some(CalibrationCurve {
        quantifier,
        points,
        factors,
    }))
}
