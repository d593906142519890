use super::peaks::{self, FWHM_TO_SIGMA};
use crate::core::calibration::EnergyCalibration;
use crate::core::models::element::{
    EmissionLine, FitElementKind, FitElementMap, FitElementMapDict, LineKind, compton_energy,
};
use crate::core::models::params::{FitParameters, FitParamsPreset, names};
use crate::core::models::range::Range;

const SI_ESCAPE_ENERGY: f64 = 1.73998;
const SI_K_EDGE: f64 = 1.839;
const GE_ESCAPE_ENERGY: f64 = 9.88;
const GE_K_EDGE: f64 = 11.103;

/// Peak-shape parameters resolved once per evaluation.
#[derive(Debug, Clone, Copy)]
struct ShapeTerms {
    calibration: EnergyCalibration,
    fwhm_offset: f64,
    fwhm_fanoprime: f64,
    tails: bool,
}

impl ShapeTerms {
    fn resolve(params: &FitParameters, preset: FitParamsPreset) -> Self {
        Self {
            calibration: EnergyCalibration::from_params(params),
            fwhm_offset: params.value_or(names::FWHM_OFFSET, 0.0),
            fwhm_fanoprime: params.value_or(names::FWHM_FANOPRIME, 0.0),
            tails: preset.includes_tails(),
        }
    }

    #[inline]
    fn sigma(&self, energy: f64) -> f64 {
        (self.fwhm_offset + self.fwhm_fanoprime * energy.max(0.0).sqrt()) / FWHM_TO_SIGMA
    }
}

/// Emission-line model of a fluorescence spectrum: Gaussian peaks with optional step and
/// tail corrections, elastic and Compton scatter, and detector escape peaks.
///
/// The model owns the current parameter set and active preset; evaluation functions take
/// the parameters explicitly so concurrent fits can each work on their own copy.
#[derive(Debug, Clone)]
pub struct GaussianModel {
    fit_parameters: FitParameters,
    preset: FitParamsPreset,
}

impl Default for GaussianModel {
    fn default() -> Self {
        Self::new()
    }
}

impl GaussianModel {
    pub fn new() -> Self {
        Self {
            fit_parameters: FitParameters::defaults(),
            preset: FitParamsPreset::default(),
        }
    }

    pub fn fit_parameters(&self) -> &FitParameters {
        &self.fit_parameters
    }

    pub fn preset(&self) -> FitParamsPreset {
        self.preset
    }

    pub fn reset_to_default_fit_params(&mut self) {
        self.fit_parameters = FitParameters::defaults();
    }

    pub fn update_fit_params_values(&mut self, overrides: &FitParameters) {
        self.fit_parameters.update_values(overrides);
    }

    pub fn set_fit_params_preset(&mut self, preset: FitParamsPreset) {
        self.preset = preset;
    }

    /// Energy (keV) that identifies `element` in a spectrum: its dominant line, or the
    /// scatter energy for the scatter pseudo-elements.
    pub fn element_energy(params: &FitParameters, element: &FitElementMap) -> Option<f64> {
        let coherent = params.value_or(names::COHERENT_SCT_ENERGY, 0.0);
        match element.kind() {
            FitElementKind::Coherent => Some(coherent),
            FitElementKind::Compton => Some(compton_energy(
                coherent,
                params.value_or(names::COMPTON_ANGLE, 90.0),
            )),
            FitElementKind::Element { .. } => element.center_energy(),
        }
    }

    /// Modeled counts over `range` of every element at its log10 amplitude in `params`.
    /// Elements without an amplitude parameter contribute nothing.
    pub fn model_spectrum(
        &self,
        params: &FitParameters,
        elements: &FitElementMapDict,
        range: Range,
    ) -> Vec<f64> {
        let shape = ShapeTerms::resolve(params, self.preset);
        let energies = shape.calibration.energies(range.channels());
        let mut spectrum = vec![0.0; energies.len()];
        for (name, element) in elements {
            let Some(log_amp) = params.value(name) else {
                continue;
            };
            let gain = 10f64.powf(log_amp);
            self.accumulate_element(params, &shape, element, &energies, gain, &mut spectrum);
        }
        spectrum
    }

    /// Modeled counts over `range` of a single element at unit amplitude.
    pub fn model_spectrum_element(
        &self,
        params: &FitParameters,
        element: &FitElementMap,
        range: Range,
    ) -> Vec<f64> {
        let shape = ShapeTerms::resolve(params, self.preset);
        let energies = shape.calibration.energies(range.channels());
        let mut spectrum = vec![0.0; energies.len()];
        self.accumulate_element(params, &shape, element, &energies, 1.0, &mut spectrum);
        spectrum
    }

    fn accumulate_element(
        &self,
        params: &FitParameters,
        shape: &ShapeTerms,
        element: &FitElementMap,
        energies: &[f64],
        gain: f64,
        out: &mut [f64],
    ) {
        let bin = shape.calibration.slope;
        match element.kind() {
            FitElementKind::Element { .. } => {
                let si_escape = params.value_or(names::SI_ESCAPE, 0.0);
                let ge_escape = params.value_or(names::GE_ESCAPE, 0.0);
                for (idx, line) in element.lines().iter().enumerate() {
                    let line_gain = gain * element.effective_ratio(idx) * bin;
                    if line_gain == 0.0 {
                        continue;
                    }
                    self.add_line(params, shape, line, line_gain, energies, out);
                    if si_escape > 0.0 && line.energy > SI_K_EDGE {
                        add_gaussian(
                            shape,
                            line.energy - SI_ESCAPE_ENERGY,
                            line_gain * si_escape,
                            energies,
                            out,
                        );
                    }
                    if ge_escape > 0.0 && line.energy > GE_K_EDGE {
                        add_gaussian(
                            shape,
                            line.energy - GE_ESCAPE_ENERGY,
                            line_gain * ge_escape,
                            energies,
                            out,
                        );
                    }
                }
            }
            FitElementKind::Coherent => {
                let e0 = params.value_or(names::COHERENT_SCT_ENERGY, 0.0);
                add_gaussian(shape, e0, gain * bin, energies, out);
            }
            FitElementKind::Compton => {
                self.add_compton(params, shape, gain * bin, energies, out);
            }
        }
    }

    fn add_line(
        &self,
        params: &FitParameters,
        shape: &ShapeTerms,
        line: &EmissionLine,
        gain: f64,
        energies: &[f64],
        out: &mut [f64],
    ) {
        let e0 = line.energy;
        let sigma = shape.sigma(e0);
        let (f_step, f_tail, gamma) = if shape.tails {
            let poly = |c0: &str, c1: &str, c2: &str| {
                peaks::energy_polynomial(
                    params.value_or(c0, 0.0),
                    params.value_or(c1, 0.0),
                    params.value_or(c2, 0.0),
                    e0,
                )
            };
            let f_step = poly(names::F_STEP_OFFSET, names::F_STEP_LINEAR, names::F_STEP_QUADRATIC);
            let f_tail = match line.kind {
                LineKind::KBeta => poly(
                    names::KB_F_TAIL_OFFSET,
                    names::KB_F_TAIL_LINEAR,
                    names::KB_F_TAIL_QUADRATIC,
                ),
                _ => poly(names::F_TAIL_OFFSET, names::F_TAIL_LINEAR, names::F_TAIL_QUADRATIC),
            };
            let gamma = poly(names::GAMMA_OFFSET, names::GAMMA_LINEAR, names::GAMMA_QUADRATIC);
            (f_step, f_tail, gamma)
        } else {
            (0.0, 0.0, 0.0)
        };

        for (value, &e) in out.iter_mut().zip(energies) {
            let delta = e - e0;
            let mut v = peaks::gaussian(gain, sigma, delta);
            if f_step > 0.0 {
                v += peaks::step(gain * f_step, sigma, delta, e0);
            }
            if f_tail > 0.0 {
                v += peaks::low_tail(gain * f_tail, sigma, delta, gamma);
            }
            *value += v;
        }
    }

    fn add_compton(
        &self,
        params: &FitParameters,
        shape: &ShapeTerms,
        gain: f64,
        energies: &[f64],
        out: &mut [f64],
    ) {
        let coherent = params.value_or(names::COHERENT_SCT_ENERGY, 0.0);
        let e0 = compton_energy(coherent, params.value_or(names::COMPTON_ANGLE, 90.0));
        let sigma = shape.sigma(e0) * params.value_or(names::COMPTON_FWHM_CORR, 1.0);
        let (f_step, f_tail, gamma, hi_f_tail, hi_gamma) = if shape.tails {
            (
                params.value_or(names::COMPTON_F_STEP, 0.0),
                params.value_or(names::COMPTON_F_TAIL, 0.0),
                params.value_or(names::COMPTON_GAMMA, 1.0),
                params.value_or(names::COMPTON_HI_F_TAIL, 0.0),
                params.value_or(names::COMPTON_HI_GAMMA, 1.0),
            )
        } else {
            (0.0, 0.0, 1.0, 0.0, 1.0)
        };

        for (value, &e) in out.iter_mut().zip(energies) {
            let delta = e - e0;
            let mut v = peaks::gaussian(gain, sigma, delta);
            if f_step > 0.0 {
                v += peaks::step(gain * f_step, sigma, delta, e0);
            }
            if f_tail > 0.0 {
                v += peaks::low_tail(gain * f_tail, sigma, delta, gamma);
            }
            if hi_f_tail > 0.0 {
                v += peaks::high_tail(gain * hi_f_tail, sigma, delta, hi_gamma);
            }
            *value += v;
        }
    }
}

fn add_gaussian(shape: &ShapeTerms, e0: f64, gain: f64, energies: &[f64], out: &mut [f64]) {
    let sigma = shape.sigma(e0);
    for (value, &e) in out.iter_mut().zip(energies) {
        *value += peaks::gaussian(gain, sigma, e - e0);
    }
}
