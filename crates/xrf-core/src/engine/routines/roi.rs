use super::{FitRoutine, FitRoutineKind};
use crate::core::calibration::EnergyCalibration;
use crate::core::model::GaussianModel;
use crate::core::models::counts::{FitCounts, NUM_ITERATIONS_KEY};
use crate::core::models::element::FitElementMapDict;
use crate::core::models::range::Range;
use crate::core::models::spectrum::Spectrum;
use crate::engine::error::EngineError;

/// Channel window `[lo, hi]` of one element; `hi` is clamped to the spectrum at fit time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RoiWindow {
    lo: usize,
    hi: usize,
}

/// Region-of-interest integration: sums raw counts within ±width/2 of each element's
/// identifying energy. Elements whose energy lies outside the fitted range report zero.
#[derive(Debug, Clone, Default)]
pub struct RoiRoutine {
    windows: Option<Vec<(String, Option<RoiWindow>)>>,
}

impl RoiRoutine {
    pub fn new() -> Self {
        Self::default()
    }
}

fn roi_window(
    calibration: &EnergyCalibration,
    center: f64,
    width_ev: f64,
    range: Range,
) -> Option<RoiWindow> {
    let center_channel = calibration.energy_to_channel(center);
    if !center_channel.is_finite()
        || center_channel < range.min() as f64
        || center_channel > range.max() as f64
    {
        return None;
    }
    let half_kev = width_ev / 2000.0;
    let lo = calibration.energy_to_channel(center - half_kev);
    let hi = calibration.energy_to_channel(center + half_kev);
    if !(lo.is_finite() && hi.is_finite()) {
        return None;
    }
    let lo = lo.trunc().max(0.0) as usize;
    let hi = hi.trunc().max(0.0) as usize;
    (lo <= hi).then_some(RoiWindow { lo, hi })
}

impl FitRoutine for RoiRoutine {
    fn kind(&self) -> FitRoutineKind {
        FitRoutineKind::Roi
    }

    fn initialize(
        &mut self,
        model: &GaussianModel,
        elements: &FitElementMapDict,
        range: Range,
    ) -> Result<(), EngineError> {
        let params = model.fit_parameters();
        let calibration = EnergyCalibration::from_params(params);
        let windows = elements
            .iter()
            .map(|(name, element)| {
                let window = GaussianModel::element_energy(params, element).and_then(|center| {
                    roi_window(&calibration, center, element.width_ev(), range)
                });
                (name.clone(), window)
            })
            .collect();
        self.windows = Some(windows);
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.windows.is_some()
    }

    fn fit_spectrum(
        &self,
        _model: &GaussianModel,
        spectrum: &Spectrum,
        _elements: &FitElementMapDict,
    ) -> Result<FitCounts, EngineError> {
        let windows = self
            .windows
            .as_ref()
            .ok_or(EngineError::RoutineNotInitialized(FitRoutineKind::Roi.group_name()))?;
        let counts = spectrum.counts();
        let mut result = FitCounts::new();
        for (name, window) in windows {
            let sum = match window {
                Some(w) if !counts.is_empty() && w.lo < counts.len() => {
                    let hi = w.hi.min(counts.len() - 1);
                    counts[w.lo..=hi].iter().sum()
                }
                _ => 0.0,
            };
            result.insert(name.clone(), sum);
        }
        result.insert(NUM_ITERATIONS_KEY.to_string(), 0.0);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::element::{EmissionLine, FitElementMap, LineKind, Shell};
    use crate::core::models::params::{FitParam, FitParameters, names};

    fn unit_model() -> GaussianModel {
        let mut overrides = FitParameters::new();
        overrides.insert(names::ENERGY_OFFSET, FitParam::new(0.0));
        overrides.insert(names::ENERGY_SLOPE, FitParam::new(1.0));
        overrides.insert(names::ENERGY_QUADRATIC, FitParam::new(0.0));
        let mut model = GaussianModel::new();
        model.update_fit_params_values(&overrides);
        model
    }

    fn element(name: &str, energy: f64, width_ev: f64) -> FitElementMap {
        let line = EmissionLine {
            label: "Ka1".to_string(),
            kind: LineKind::KAlpha,
            energy,
            ratio: 1.0,
        };
        FitElementMap::element(name, name, Shell::K, vec![line]).with_width_ev(width_ev)
    }

    fn elements(entries: &[(&str, f64, f64)]) -> FitElementMapDict {
        entries
            .iter()
            .map(|&(n, e, w)| (n.to_string(), element(n, e, w)))
            .collect()
    }

    #[test]
    fn fit_before_initialize_is_an_error() {
        let routine = RoiRoutine::new();
        let result = routine.fit_spectrum(
            &unit_model(),
            &Spectrum::new(10),
            &FitElementMapDict::new(),
        );
        assert!(matches!(result, Err(EngineError::RoutineNotInitialized("ROI"))));
    }

    #[test]
    fn sums_counts_in_window_around_line_energy() {
        let model = unit_model();
        let elements = elements(&[("Fe", 4.0, 2000.0)]);
        let mut routine = RoiRoutine::new();
        routine
            .initialize(&model, &elements, Range::full(10).unwrap())
            .unwrap();

        let spectrum = Spectrum::from_counts(vec![0., 0., 0., 5., 5., 5., 0., 0., 0., 0.]);
        let counts = routine.fit_spectrum(&model, &spectrum, &elements).unwrap();
        assert_eq!(counts["Fe"], 15.0);
        assert_eq!(counts[NUM_ITERATIONS_KEY], 0.0);
    }

    #[test]
    fn roi_is_linear_in_the_counts() {
        let model = unit_model();
        let elements = elements(&[("Fe", 4.0, 2000.0), ("Ca", 7.0, 3000.0)]);
        let mut routine = RoiRoutine::new();
        routine
            .initialize(&model, &elements, Range::full(10).unwrap())
            .unwrap();

        let a = Spectrum::from_counts((0..10).map(|i| i as f64).collect());
        let b = Spectrum::from_counts((0..10).map(|i| (i * i) as f64 * 0.5).collect());
        let fa = routine.fit_spectrum(&model, &a, &elements).unwrap();
        let fb = routine.fit_spectrum(&model, &b, &elements).unwrap();
        let combined = a.scaled(2.0) + &b.scaled(3.0);
        let fc = routine.fit_spectrum(&model, &combined, &elements).unwrap();
        for name in ["Fe", "Ca"] {
            let expected = 2.0 * fa[name] + 3.0 * fb[name];
            assert!((fc[name] - expected).abs() < 1e-9, "{name}");
        }
    }

    #[test]
    fn windows_clamp_to_spectrum_and_out_of_range_lines_yield_zero() {
        let model = unit_model();
        let elements = elements(&[("Fe", 9.0, 4000.0), ("Zn", 12.0, 1000.0)]);
        let mut routine = RoiRoutine::new();
        routine
            .initialize(&model, &elements, Range::full(10).unwrap())
            .unwrap();

        let spectrum = Spectrum::from_counts(vec![1.0; 10]);
        let counts = routine.fit_spectrum(&model, &spectrum, &elements).unwrap();
        assert_eq!(counts["Fe"], 3.0);
        assert_eq!(counts["Zn"], 0.0);
    }
}
