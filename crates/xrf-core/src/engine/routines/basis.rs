use crate::core::calibration::EnergyCalibration;
use crate::core::math::Nnls;
use crate::core::model::GaussianModel;
use crate::core::models::counts::{FitCounts, NUM_ITERATIONS_KEY};
use crate::core::models::element::FitElementMapDict;
use crate::core::models::params::{AMPLITUDE_MAX, FitParameters};
use crate::core::models::range::Range;
use nalgebra::{DMatrix, DVector};
use tracing::debug;

/// Design matrix of single-element spectra over a channel range.
///
/// Column `j` is the model of the `j`-th element (in name order) at unit amplitude, every
/// other element absent. Columns of elements whose identifying energy lies outside the range
/// are left at zero, so every solver reports zero for them.
#[derive(Debug, Clone)]
pub(crate) struct Basis {
    matrix: DMatrix<f64>,
    names: Vec<String>,
    in_range: Vec<bool>,
}

impl Basis {
    pub fn build(
        model: &GaussianModel,
        params: &FitParameters,
        elements: &FitElementMapDict,
        range: Range,
    ) -> Self {
        let calibration = EnergyCalibration::from_params(params);
        let mut matrix = DMatrix::zeros(range.count(), elements.len());
        let mut names = Vec::with_capacity(elements.len());
        let mut in_range = Vec::with_capacity(elements.len());

        for (j, (name, element)) in elements.iter().enumerate() {
            let inside = GaussianModel::element_energy(params, element)
                .is_some_and(|e| energy_in_range(&calibration, e, range));
            if inside {
                let column = model.model_spectrum_element(params, element, range);
                matrix.set_column(j, &DVector::from_vec(column));
            } else {
                debug!(element = %name, "Element energy outside the fitted range");
            }
            names.push(name.clone());
            in_range.push(inside);
        }
        Self {
            matrix,
            names,
            in_range,
        }
    }

    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.matrix
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn in_range(&self, column: usize) -> bool {
        self.in_range.get(column).copied().unwrap_or(false)
    }

    /// Element → intensity map for the linear solution `x`; `Num_Iter` is zero.
    pub fn counts_from_solution(&self, x: &DVector<f64>) -> FitCounts {
        let mut counts: FitCounts = self
            .names
            .iter()
            .enumerate()
            .map(|(j, name)| {
                let value = if self.in_range(j) { x[j] } else { 0.0 };
                (name.clone(), value)
            })
            .collect();
        counts.insert(NUM_ITERATIONS_KEY.to_string(), 0.0);
        counts
    }

    /// Starting log10 amplitudes from a non-negative solve against `rhs`. Amplitudes below
    /// one count start at zero so the optimizer does not begin on a bound.
    pub fn seed_log_amplitudes(&self, nnls: &Nnls, rhs: &DVector<f64>) -> Vec<f64> {
        match nnls.solve(rhs) {
            Ok(solution) => solution
                .x
                .iter()
                .map(|a| a.max(1.0).log10().min(AMPLITUDE_MAX))
                .collect(),
            Err(e) => {
                debug!(error = %e, "Amplitude seeding failed; starting from unit amplitudes");
                vec![0.0; self.names.len()]
            }
        }
    }
}

fn energy_in_range(calibration: &EnergyCalibration, energy: f64, range: Range) -> bool {
    let channel = calibration.energy_to_channel(energy);
    channel.is_finite() && channel >= range.min() as f64 && channel <= range.max() as f64
}

/// Residual weights `1/√max(counts, 1)` for Poisson-distributed counts.
pub(crate) fn poisson_weights(data: &[f64]) -> Vec<f64> {
    data.iter().map(|c| 1.0 / c.max(1.0).sqrt()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::element::{EmissionLine, FitElementMap, LineKind, Shell};
    use crate::core::models::params::names;

    fn line(energy: f64) -> EmissionLine {
        EmissionLine {
            label: "Ka1".to_string(),
            kind: LineKind::KAlpha,
            energy,
            ratio: 1.0,
        }
    }

    #[test]
    fn columns_outside_the_range_stay_zero() {
        let model = GaussianModel::new();
        let mut params = model.fit_parameters().clone();
        params.set_value(names::ENERGY_SLOPE, 0.01);
        let mut elements = FitElementMapDict::new();
        elements.insert(
            "Ca".to_string(),
            FitElementMap::element("Ca", "Ca", Shell::K, vec![line(3.69)]),
        );
        elements.insert(
            "Zn".to_string(),
            FitElementMap::element("Zn", "Zn", Shell::K, vec![line(8.63)]),
        );
        let range = Range::new(0, 499, 500).unwrap();

        let basis = Basis::build(&model, &params, &elements, range);
        assert_eq!(basis.names(), &["Ca".to_string(), "Zn".to_string()]);
        assert!(basis.in_range(0));
        assert!(!basis.in_range(1));
        assert!(basis.matrix().column(0).sum() > 0.5);
        assert_eq!(basis.matrix().column(1).sum(), 0.0);

        let counts = basis.counts_from_solution(&DVector::from_vec(vec![4.0, 9.0]));
        assert_eq!(counts["Ca"], 4.0);
        assert_eq!(counts["Zn"], 0.0);
        assert_eq!(counts[NUM_ITERATIONS_KEY], 0.0);
    }

    #[test]
    fn poisson_weights_floor_at_one_count() {
        assert_eq!(poisson_weights(&[0.0, 4.0, 100.0]), vec![1.0, 0.5, 0.1]);
    }
}
