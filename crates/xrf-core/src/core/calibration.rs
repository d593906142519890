use crate::core::models::params::{FitParameters, names};
use serde::{Deserialize, Serialize};
use std::iter::FusedIterator;

/// Quadratic mapping between detector channel index and photon energy (keV).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnergyCalibration {
    pub offset: f64,
    pub slope: f64,
    pub quadratic: f64,
}

impl EnergyCalibration {
    pub fn new(offset: f64, slope: f64, quadratic: f64) -> Self {
        Self {
            offset,
            slope,
            quadratic,
        }
    }

    /// Reads the three calibration terms, treating missing parameters as zero.
    pub fn from_params(params: &FitParameters) -> Self {
        Self {
            offset: params.value(names::ENERGY_OFFSET).unwrap_or(0.0),
            slope: params.value(names::ENERGY_SLOPE).unwrap_or(0.0),
            quadratic: params.value(names::ENERGY_QUADRATIC).unwrap_or(0.0),
        }
    }

    #[inline]
    pub fn channel_to_energy(&self, channel: f64) -> f64 {
        self.offset + self.slope * channel + self.quadratic * channel * channel
    }

    /// Fractional channel at which `energy` is observed. Uses the non-negative root of the
    /// quadratic when a quadratic term is present.
    pub fn energy_to_channel(&self, energy: f64) -> f64 {
        let c = self.offset - energy;
        if self.quadratic.abs() < f64::EPSILON {
            if self.slope == 0.0 {
                return 0.0;
            }
            return -c / self.slope;
        }
        let disc = self.slope * self.slope - 4.0 * self.quadratic * c;
        if disc < 0.0 {
            return -self.slope / (2.0 * self.quadratic);
        }
        (-self.slope + disc.sqrt()) / (2.0 * self.quadratic)
    }

    pub fn energy_axis(&self, channels: usize) -> EnergyAxis {
        EnergyAxis {
            calibration: *self,
            next: 0,
            end: channels,
        }
    }

    pub fn energies(&self, channels: std::ops::RangeInclusive<usize>) -> Vec<f64> {
        channels
            .map(|i| self.channel_to_energy(i as f64))
            .collect()
    }
}

/// Lazily evaluated energy of every channel. Clone it to restart.
#[derive(Debug, Clone)]
pub struct EnergyAxis {
    calibration: EnergyCalibration,
    next: usize,
    end: usize,
}

impl Iterator for EnergyAxis {
    type Item = f64;

    fn next(&mut self) -> Option<f64> {
        if self.next >= self.end {
            return None;
        }
        let e = self.calibration.channel_to_energy(self.next as f64);
        self.next += 1;
        Some(e)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.end - self.next;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for EnergyAxis {}

impl FusedIterator for EnergyAxis {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_to_energy_evaluates_polynomial() {
        let cal = EnergyCalibration::new(0.5, 0.01, 1e-6);
        assert!((cal.channel_to_energy(100.0) - (0.5 + 1.0 + 0.01)).abs() < 1e-12);
    }

    #[test]
    fn energy_axis_is_monotone_for_positive_slope_and_non_negative_quad() {
        for &(offset, slope, quad) in &[(0.0, 0.01, 0.0), (-0.2, 0.005, 1e-7), (1.0, 2.0, 0.5)] {
            let cal = EnergyCalibration::new(offset, slope, quad);
            let axis: Vec<f64> = cal.energy_axis(4096).collect();
            assert_eq!(axis.len(), 4096);
            assert!(axis.windows(2).all(|w| w[1] >= w[0]));
        }
    }

    #[test]
    fn energy_axis_can_be_restarted() {
        let axis = EnergyCalibration::new(0.0, 1.0, 0.0).energy_axis(3);
        let first: Vec<f64> = axis.clone().collect();
        let second: Vec<f64> = axis.collect();
        assert_eq!(first, vec![0.0, 1.0, 2.0]);
        assert_eq!(first, second);
    }

    #[test]
    fn energy_to_channel_inverts_linear_and_quadratic_calibrations() {
        let linear = EnergyCalibration::new(0.1, 0.02, 0.0);
        assert!((linear.energy_to_channel(linear.channel_to_energy(321.0)) - 321.0).abs() < 1e-9);

        let quad = EnergyCalibration::new(0.1, 0.02, 3e-6);
        assert!((quad.energy_to_channel(quad.channel_to_energy(1500.0)) - 1500.0).abs() < 1e-6);
    }
}
