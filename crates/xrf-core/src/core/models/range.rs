use crate::core::calibration::EnergyCalibration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum RangeError {
    #[error("Invalid channel range [{min}, {max}]: min must not exceed max")]
    Inverted { min: usize, max: usize },
    #[error("Channel range [{min}, {max}] exceeds spectrum length {len}")]
    OutOfBounds { min: usize, max: usize, len: usize },
    #[error("Cannot build a channel range for an empty spectrum")]
    Empty,
}

/// Inclusive `[min, max]` channel window. Construction guarantees `min <= max < len`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Range {
    min: usize,
    max: usize,
}

impl Range {
    pub fn new(min: usize, max: usize, len: usize) -> Result<Self, RangeError> {
        if min > max {
            return Err(RangeError::Inverted { min, max });
        }
        if max >= len {
            return Err(RangeError::OutOfBounds { min, max, len });
        }
        Ok(Self { min, max })
    }

    pub fn full(len: usize) -> Result<Self, RangeError> {
        if len == 0 {
            return Err(RangeError::Empty);
        }
        Ok(Self { min: 0, max: len - 1 })
    }

    /// Channel window covering `[min_energy, max_energy]` keV, clamped to the spectrum.
    pub fn from_energy(
        min_energy: f64,
        max_energy: f64,
        calibration: &EnergyCalibration,
        len: usize,
    ) -> Result<Self, RangeError> {
        if len == 0 {
            return Err(RangeError::Empty);
        }
        let last = (len - 1) as f64;
        let lo = calibration.energy_to_channel(min_energy).clamp(0.0, last).floor() as usize;
        let hi = calibration.energy_to_channel(max_energy).clamp(0.0, last).ceil() as usize;
        Self::new(lo, hi, len)
    }

    #[inline]
    pub fn min(&self) -> usize {
        self.min
    }

    #[inline]
    pub fn max(&self) -> usize {
        self.max
    }

    #[inline]
    pub fn count(&self) -> usize {
        self.max - self.min + 1
    }

    #[inline]
    pub fn contains(&self, channel: usize) -> bool {
        channel >= self.min && channel <= self.max
    }

    pub fn channels(&self) -> std::ops::RangeInclusive<usize> {
        self.min..=self.max
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_accepts_valid_window() {
        let r = Range::new(2, 5, 10).unwrap();
        assert_eq!(r.count(), 4);
        assert!(r.contains(2));
        assert!(r.contains(5));
        assert!(!r.contains(6));
    }

    #[test]
    fn new_rejects_inverted_and_out_of_bounds() {
        assert_eq!(Range::new(5, 2, 10), Err(RangeError::Inverted { min: 5, max: 2 }));
        assert_eq!(
            Range::new(0, 10, 10),
            Err(RangeError::OutOfBounds {
                min: 0,
                max: 10,
                len: 10
            })
        );
    }

    #[test]
    fn full_covers_every_channel() {
        assert_eq!(Range::full(8).unwrap(), Range::new(0, 7, 8).unwrap());
        assert_eq!(Range::full(0), Err(RangeError::Empty));
    }

    #[test]
    fn from_energy_clamps_to_spectrum() {
        let calibration = EnergyCalibration::new(0.0, 0.01, 0.0);
        let r = Range::from_energy(1.0, 50.0, &calibration, 2048).unwrap();
        assert_eq!(r.min(), 100);
        assert_eq!(r.max(), 2047);
    }

    #[test]
    fn from_energy_rejects_inverted_window() {
        let calibration = EnergyCalibration::new(0.0, 0.01, 0.0);
        assert_eq!(
            Range::from_energy(5.0, 1.0, &calibration, 2048),
            Err(RangeError::Inverted { min: 500, max: 100 })
        );
    }
}
