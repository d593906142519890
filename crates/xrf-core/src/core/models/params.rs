use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Canonical parameter names.
pub mod names {
    pub const ENERGY_OFFSET: &str = "energy_offset";
    pub const ENERGY_SLOPE: &str = "energy_slope";
    pub const ENERGY_QUADRATIC: &str = "energy_quadratic";

    pub const FWHM_OFFSET: &str = "fwhm_offset";
    pub const FWHM_FANOPRIME: &str = "fwhm_fanoprime";

    pub const COHERENT_SCT_ENERGY: &str = "coherent_sct_energy";
    pub const COMPTON_ANGLE: &str = "compton_angle";
    pub const COMPTON_FWHM_CORR: &str = "compton_fwhm_corr";
    pub const COMPTON_F_STEP: &str = "compton_f_step";
    pub const COMPTON_F_TAIL: &str = "compton_f_tail";
    pub const COMPTON_GAMMA: &str = "compton_gamma";
    pub const COMPTON_HI_F_TAIL: &str = "compton_hi_f_tail";
    pub const COMPTON_HI_GAMMA: &str = "compton_hi_gamma";

    pub const SNIP_WIDTH: &str = "snip_width";

    pub const F_STEP_OFFSET: &str = "f_step_offset";
    pub const F_STEP_LINEAR: &str = "f_step_linear";
    pub const F_STEP_QUADRATIC: &str = "f_step_quadratic";
    pub const F_TAIL_OFFSET: &str = "f_tail_offset";
    pub const F_TAIL_LINEAR: &str = "f_tail_linear";
    pub const F_TAIL_QUADRATIC: &str = "f_tail_quadratic";
    pub const KB_F_TAIL_OFFSET: &str = "kb_f_tail_offset";
    pub const KB_F_TAIL_LINEAR: &str = "kb_f_tail_linear";
    pub const KB_F_TAIL_QUADRATIC: &str = "kb_f_tail_quadratic";
    pub const GAMMA_OFFSET: &str = "gamma_offset";
    pub const GAMMA_LINEAR: &str = "gamma_linear";
    pub const GAMMA_QUADRATIC: &str = "gamma_quadratic";

    pub const SI_ESCAPE: &str = "si_escape";
    pub const GE_ESCAPE: &str = "ge_escape";
}

/// Limits on log10 element amplitudes.
pub const AMPLITUDE_MIN: f64 = -11.0;
pub const AMPLITUDE_MAX: f64 = 20.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BoundType {
    #[default]
    Unbounded,
    LimitedLo,
    LimitedHi,
    LimitedLoHi,
}

impl BoundType {
    pub fn lower(&self, min: f64) -> Option<f64> {
        match self {
            BoundType::LimitedLo | BoundType::LimitedLoHi => Some(min),
            _ => None,
        }
    }

    pub fn upper(&self, max: f64) -> Option<f64> {
        match self {
            BoundType::LimitedHi | BoundType::LimitedLoHi => Some(max),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitParam {
    pub value: f64,
    #[serde(default = "neg_infinity")]
    pub min: f64,
    #[serde(default = "infinity")]
    pub max: f64,
    #[serde(default)]
    pub bound: BoundType,
    #[serde(default)]
    pub fixed: bool,
}

fn neg_infinity() -> f64 {
    f64::NEG_INFINITY
}

fn infinity() -> f64 {
    f64::INFINITY
}

impl FitParam {
    pub fn new(value: f64) -> Self {
        Self {
            value,
            min: f64::NEG_INFINITY,
            max: f64::INFINITY,
            bound: BoundType::Unbounded,
            fixed: false,
        }
    }

    pub fn bounded(value: f64, min: f64, max: f64) -> Self {
        Self {
            value,
            min,
            max,
            bound: BoundType::LimitedLoHi,
            fixed: false,
        }
    }

    pub fn fixed(value: f64) -> Self {
        Self {
            fixed: true,
            ..Self::new(value)
        }
    }

    #[inline]
    pub fn is_free(&self) -> bool {
        !self.fixed
    }

    pub fn lower(&self) -> Option<f64> {
        self.bound.lower(self.min)
    }

    pub fn upper(&self) -> Option<f64> {
        self.bound.upper(self.max)
    }

    /// Pulls `value` inside the active bounds.
    pub fn clamp_to_bounds(&mut self) {
        if let Some(lo) = self.lower() {
            self.value = self.value.max(lo);
        }
        if let Some(hi) = self.upper() {
            self.value = self.value.min(hi);
        }
    }
}

/// Which parameters are free during nonlinear optimization. Element amplitudes are free
/// under every preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FitParamsPreset {
    MatrixBatchFit,
    #[default]
    BatchFitNoTails,
    BatchFitWithTails,
    BatchFitWithFreeEnergy,
}

const WIDTH_PARAMS: &[&str] = &[names::FWHM_OFFSET, names::FWHM_FANOPRIME];

const SCATTER_PARAMS: &[&str] = &[
    names::COHERENT_SCT_ENERGY,
    names::COMPTON_ANGLE,
    names::COMPTON_FWHM_CORR,
];

const TAIL_PARAMS: &[&str] = &[
    names::F_STEP_OFFSET,
    names::F_STEP_LINEAR,
    names::F_STEP_QUADRATIC,
    names::F_TAIL_OFFSET,
    names::F_TAIL_LINEAR,
    names::F_TAIL_QUADRATIC,
    names::KB_F_TAIL_OFFSET,
    names::KB_F_TAIL_LINEAR,
    names::KB_F_TAIL_QUADRATIC,
    names::GAMMA_OFFSET,
    names::GAMMA_LINEAR,
    names::GAMMA_QUADRATIC,
    names::COMPTON_F_STEP,
    names::COMPTON_F_TAIL,
    names::COMPTON_GAMMA,
    names::COMPTON_HI_F_TAIL,
    names::COMPTON_HI_GAMMA,
];

const BACKGROUND_PARAMS: &[&str] = &[names::SNIP_WIDTH];

const ENERGY_PARAMS: &[&str] = &[
    names::ENERGY_OFFSET,
    names::ENERGY_SLOPE,
    names::ENERGY_QUADRATIC,
];

impl FitParamsPreset {
    pub fn frees(&self, name: &str) -> bool {
        let in_set = |set: &[&str]| set.contains(&name);
        match self {
            FitParamsPreset::MatrixBatchFit => false,
            FitParamsPreset::BatchFitNoTails => in_set(WIDTH_PARAMS) || in_set(SCATTER_PARAMS),
            FitParamsPreset::BatchFitWithTails => {
                in_set(WIDTH_PARAMS)
                    || in_set(SCATTER_PARAMS)
                    || in_set(TAIL_PARAMS)
                    || in_set(BACKGROUND_PARAMS)
            }
            FitParamsPreset::BatchFitWithFreeEnergy => {
                in_set(WIDTH_PARAMS)
                    || in_set(SCATTER_PARAMS)
                    || in_set(TAIL_PARAMS)
                    || in_set(BACKGROUND_PARAMS)
                    || in_set(ENERGY_PARAMS)
            }
        }
    }

    pub fn includes_tails(&self) -> bool {
        matches!(
            self,
            FitParamsPreset::BatchFitWithTails | FitParamsPreset::BatchFitWithFreeEnergy
        )
    }
}

impl fmt::Display for FitParamsPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FitParamsPreset::MatrixBatchFit => "matrix-batch-fit",
            FitParamsPreset::BatchFitNoTails => "batch-fit-no-tails",
            FitParamsPreset::BatchFitWithTails => "batch-fit-with-tails",
            FitParamsPreset::BatchFitWithFreeEnergy => "batch-fit-with-free-energy",
        };
        f.write_str(name)
    }
}

/// Ordered name → parameter table. Ordering fixes the layout of optimizer vectors.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FitParameters {
    params: BTreeMap<String, FitParam>,
}

impl FitParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn defaults() -> Self {
        use names::*;
        let mut p = Self::new();
        let table: &[(&str, f64, f64, f64)] = &[
            (ENERGY_OFFSET, 0.0, -0.2, 0.2),
            (ENERGY_SLOPE, 0.01, 0.001, 0.1),
            (ENERGY_QUADRATIC, 0.0, -1e-5, 1e-5),
            (FWHM_OFFSET, 0.12, 0.005, 0.5),
            (FWHM_FANOPRIME, 0.025, 0.0, 0.2),
            (COHERENT_SCT_ENERGY, 10.0, 1.0, 100.0),
            (COMPTON_ANGLE, 90.0, 70.0, 170.0),
            (COMPTON_FWHM_CORR, 1.0, 0.5, 4.0),
            (COMPTON_F_STEP, 0.0, 0.0, 1.0),
            (COMPTON_F_TAIL, 0.0, 0.0, 1.0),
            (COMPTON_GAMMA, 1.0, 0.1, 10.0),
            (COMPTON_HI_F_TAIL, 0.0, 0.0, 1.0),
            (COMPTON_HI_GAMMA, 1.0, 0.1, 10.0),
            (SNIP_WIDTH, 0.5, 0.1, 2.0),
            (F_STEP_OFFSET, 0.0, 0.0, 1.0),
            (F_STEP_LINEAR, 0.0, 0.0, 1.0),
            (F_STEP_QUADRATIC, 0.0, 0.0, 1.0),
            (F_TAIL_OFFSET, 0.0, 0.0, 1.0),
            (F_TAIL_LINEAR, 0.0, 0.0, 1.0),
            (F_TAIL_QUADRATIC, 0.0, 0.0, 1.0),
            (KB_F_TAIL_OFFSET, 0.0, 0.0, 1.0),
            (KB_F_TAIL_LINEAR, 0.0, 0.0, 1.0),
            (KB_F_TAIL_QUADRATIC, 0.0, 0.0, 1.0),
            (GAMMA_OFFSET, 2.0, 0.1, 10.0),
            (GAMMA_LINEAR, 0.0, 0.0, 1.0),
            (GAMMA_QUADRATIC, 0.0, 0.0, 1.0),
            (SI_ESCAPE, 0.0, 0.0, 0.1),
            (GE_ESCAPE, 0.0, 0.0, 0.1),
        ];
        for &(name, value, min, max) in table {
            p.insert(name, FitParam::bounded(value, min, max));
        }
        p
    }

    pub fn insert(&mut self, name: impl Into<String>, param: FitParam) {
        self.params.insert(name.into(), param);
    }

    pub fn get(&self, name: &str) -> Option<&FitParam> {
        self.params.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut FitParam> {
        self.params.get_mut(name)
    }

    pub fn value(&self, name: &str) -> Option<f64> {
        self.params.get(name).map(|p| p.value)
    }

    /// Value of `name`, or `default` when the parameter is absent.
    #[inline]
    pub fn value_or(&self, name: &str, default: f64) -> f64 {
        self.value(name).unwrap_or(default)
    }

    pub fn set_value(&mut self, name: &str, value: f64) -> bool {
        match self.params.get_mut(name) {
            Some(p) => {
                p.value = value;
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.params.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FitParam)> {
        self.params.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Applies override values. Bounds are taken from an override only when it declares
    /// a bound kind; parameters absent here are inserted.
    pub fn update_values(&mut self, overrides: &FitParameters) {
        for (name, incoming) in &overrides.params {
            match self.params.get_mut(name) {
                Some(existing) => {
                    existing.value = incoming.value;
                    if incoming.bound != BoundType::Unbounded {
                        existing.min = incoming.min;
                        existing.max = incoming.max;
                        existing.bound = incoming.bound;
                    }
                }
                None => {
                    self.params.insert(name.clone(), incoming.clone());
                }
            }
        }
    }

    /// Ensures an amplitude parameter exists for each name and marks it free.
    pub fn add_amplitudes<'a>(&mut self, element_names: impl IntoIterator<Item = &'a str>) {
        for name in element_names {
            let param = self
                .params
                .entry(name.to_string())
                .or_insert_with(|| FitParam::bounded(0.0, AMPLITUDE_MIN, AMPLITUDE_MAX));
            param.fixed = false;
        }
    }

    /// Fixes every parameter the preset does not free. Names in `amplitudes` stay free.
    pub fn apply_preset(&mut self, preset: FitParamsPreset, amplitudes: &[&str]) {
        for (name, param) in self.params.iter_mut() {
            param.fixed = !(amplitudes.contains(&name.as_str()) || preset.frees(name));
        }
    }

    pub fn free_names(&self) -> Vec<&str> {
        self.params
            .iter()
            .filter(|(_, p)| p.is_free())
            .map(|(k, _)| k.as_str())
            .collect()
    }

    /// Writes `values` into the free parameters in name order.
    pub fn set_free_values(&mut self, values: &[f64]) {
        for (param, &v) in self
            .params
            .values_mut()
            .filter(|p| p.is_free())
            .zip(values)
        {
            param.value = v;
        }
    }

    pub fn free_values(&self) -> Vec<f64> {
        self.params
            .values()
            .filter(|p| p.is_free())
            .map(|p| p.value)
            .collect()
    }
}

/// Running average of parameter sets, one observation per processed dataset.
#[derive(Debug, Clone, Default)]
pub struct FitParamsAverage {
    average: Option<FitParameters>,
    observations: usize,
}

impl FitParamsAverage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fold(&mut self, params: &FitParameters) {
        match &mut self.average {
            None => {
                self.average = Some(params.clone());
            }
            Some(avg) => {
                let n = self.observations as f64;
                for (name, incoming) in &params.params {
                    match avg.params.get_mut(name) {
                        Some(current) => {
                            current.value = (current.value * n + incoming.value) / (n + 1.0);
                            if current.min.is_finite() && incoming.min.is_finite() {
                                current.min = (current.min * n + incoming.min) / (n + 1.0);
                            }
                            if current.max.is_finite() && incoming.max.is_finite() {
                                current.max = (current.max * n + incoming.max) / (n + 1.0);
                            }
                        }
                        None => {
                            avg.params.insert(name.clone(), incoming.clone());
                        }
                    }
                }
            }
        }
        self.observations += 1;
    }

    pub fn observations(&self) -> usize {
        self.observations
    }

    pub fn average(&self) -> Option<&FitParameters> {
        self.average.as_ref()
    }

    pub fn into_average(self) -> Option<FitParameters> {
        self.average
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single(value: f64) -> FitParameters {
        let mut p = FitParameters::new();
        p.insert("x", FitParam::new(value));
        p
    }

    #[test]
    fn moving_average_of_one_and_three_is_two() {
        let mut avg = FitParamsAverage::new();
        avg.fold(&single(1.0));
        avg.fold(&single(3.0));
        assert_eq!(avg.observations(), 2);
        assert_eq!(avg.average().unwrap().value("x"), Some(2.0));
    }

    #[test]
    fn moving_average_weights_each_observation_equally() {
        let mut avg = FitParamsAverage::new();
        for v in [1.0, 2.0, 6.0] {
            avg.fold(&single(v));
        }
        assert!((avg.average().unwrap().value("x").unwrap() - 3.0).abs() < 1e-12);
    }

    #[test]
    fn moving_average_of_identical_sets_is_unchanged() {
        let defaults = FitParameters::defaults();
        let mut avg = FitParamsAverage::new();
        for _ in 0..3 {
            avg.fold(&defaults);
        }
        assert_eq!(avg.into_average().unwrap(), defaults);
    }

    #[test]
    fn update_values_keeps_bounds_unless_override_declares_them() {
        let mut params = FitParameters::defaults();
        let mut overrides = FitParameters::new();
        overrides.insert(names::FWHM_OFFSET, FitParam::new(0.2));
        overrides.insert(names::ENERGY_SLOPE, FitParam::bounded(0.02, 0.015, 0.025));
        overrides.insert("custom", FitParam::new(7.0));

        params.update_values(&overrides);

        let fwhm = params.get(names::FWHM_OFFSET).unwrap();
        assert_eq!(fwhm.value, 0.2);
        assert_eq!(fwhm.min, 0.005);
        let slope = params.get(names::ENERGY_SLOPE).unwrap();
        assert_eq!((slope.value, slope.min, slope.max), (0.02, 0.015, 0.025));
        assert_eq!(params.value("custom"), Some(7.0));
    }

    #[test]
    fn presets_free_expected_parameter_groups() {
        let mut params = FitParameters::defaults();
        params.add_amplitudes(["Fe"]);

        params.apply_preset(FitParamsPreset::MatrixBatchFit, &["Fe"]);
        assert_eq!(params.free_names(), vec!["Fe"]);

        params.apply_preset(FitParamsPreset::BatchFitNoTails, &["Fe"]);
        let free = params.free_names();
        assert!(free.contains(&names::FWHM_OFFSET));
        assert!(!free.contains(&names::F_TAIL_OFFSET));
        assert!(!free.contains(&names::ENERGY_SLOPE));
        assert!(!free.contains(&names::SNIP_WIDTH));

        params.apply_preset(FitParamsPreset::BatchFitWithTails, &["Fe"]);
        assert!(params.free_names().contains(&names::F_TAIL_OFFSET));
        assert!(params.free_names().contains(&names::SNIP_WIDTH));

        params.apply_preset(FitParamsPreset::BatchFitWithFreeEnergy, &["Fe"]);
        assert!(params.free_names().contains(&names::ENERGY_SLOPE));
        assert!(params.free_names().contains(&names::SNIP_WIDTH));
    }

    #[test]
    fn free_values_round_trip_in_name_order() {
        let mut params = FitParameters::new();
        params.insert("b", FitParam::new(2.0));
        params.insert("a", FitParam::new(1.0));
        params.insert("c", FitParam::fixed(3.0));
        assert_eq!(params.free_values(), vec![1.0, 2.0]);

        params.set_free_values(&[10.0, 20.0]);
        assert_eq!(params.value("a"), Some(10.0));
        assert_eq!(params.value("b"), Some(20.0));
        assert_eq!(params.value("c"), Some(3.0));
    }
}
