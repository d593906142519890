use crate::core::calibration::EnergyCalibration;
use crate::core::models::params::{FitParameters, names};
use crate::core::models::range::Range;
use serde::{Deserialize, Serialize};
use std::f64::consts::SQRT_2;

/// How the clipping half-width is normalized to channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SnipWidthScaling {
    /// Raw channel axis: 5-channel boxcar, two passes at full width.
    #[default]
    Channel,
    /// Binned channel axis: energies scaled by the binning factor, half-widths halved,
    /// 3-channel boxcar, three passes at full width.
    Binned,
}

impl SnipWidthScaling {
    fn boxcar(&self) -> usize {
        match self {
            SnipWidthScaling::Channel => 5,
            SnipWidthScaling::Binned => 3,
        }
    }

    fn initial_passes(&self) -> usize {
        match self {
            SnipWidthScaling::Channel => 2,
            SnipWidthScaling::Binned => 3,
        }
    }
}

/// SNIP continuum estimator for one spectrum.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SnipBackground {
    pub calibration: EnergyCalibration,
    pub fwhm_offset: f64,
    pub fwhm_fanoprime: f64,
    pub width: f64,
    pub scaling: SnipWidthScaling,
    pub spectral_binning: f64,
}

impl SnipBackground {
    pub fn from_params(
        params: &FitParameters,
        scaling: SnipWidthScaling,
        spectral_binning: f64,
    ) -> Self {
        Self {
            calibration: EnergyCalibration::from_params(params),
            fwhm_offset: params.value_or(names::FWHM_OFFSET, 0.0),
            fwhm_fanoprime: params.value_or(names::FWHM_FANOPRIME, 0.0),
            width: params.value_or(names::SNIP_WIDTH, 0.5),
            scaling,
            spectral_binning,
        }
    }

    /// Clipping half-width of every channel, in channels, capped at the spectrum length.
    /// Widths that are not finite collapse to the cap when positive and to zero otherwise.
    fn half_widths(&self, len: usize) -> Vec<f64> {
        let slope = self.calibration.slope;
        if slope <= 0.0 {
            return vec![0.0; len];
        }
        let binning = match self.scaling {
            SnipWidthScaling::Binned if self.spectral_binning > 0.0 => self.spectral_binning,
            _ => 1.0,
        };
        let cap = len as f64;
        (0..len)
            .map(|i| {
                let energy = self.calibration.channel_to_energy(i as f64 * binning);
                let fwhm =
                    (self.fwhm_offset + self.fwhm_fanoprime * energy.max(0.0).sqrt()).max(0.0);
                let w = match self.scaling {
                    SnipWidthScaling::Channel => self.width * fwhm / slope,
                    SnipWidthScaling::Binned => self.width * fwhm / slope / 2.0,
                };
                if w.is_finite() {
                    w.clamp(0.0, cap)
                } else if w > 0.0 {
                    cap
                } else {
                    0.0
                }
            })
            .collect()
    }

    /// Estimates the smooth background under `counts`. Clipping neighbours are confined to
    /// `window`; the returned vector covers every channel.
    pub fn estimate(&self, counts: &[f64], window: Range) -> Vec<f64> {
        let len = counts.len();
        if len == 0 {
            return Vec::new();
        }
        let mut background = boxcar_smooth(counts, self.scaling.boxcar());
        for b in background.iter_mut() {
            *b = ((b.max(0.0) + 1.0).ln() + 1.0).ln();
        }

        let mut widths = self.half_widths(len);
        let xmax = window.max().min(len - 1) as f64;
        let xmin = (window.min() as f64).min(xmax);

        for _ in 0..self.scaling.initial_passes() {
            clip_pass(&mut background, &widths, xmin, xmax);
        }
        while widths.iter().copied().fold(0.0_f64, f64::max) >= 0.5 {
            clip_pass(&mut background, &widths, xmin, xmax);
            widths.iter_mut().for_each(|w| *w /= SQRT_2);
        }

        for b in background.iter_mut() {
            let v = (b.exp() - 1.0).exp() - 1.0;
            *b = if v.is_nan() { 0.0 } else { v };
        }
        background
    }
}

/// Centered moving average; edge windows average the channels they cover.
fn boxcar_smooth(counts: &[f64], size: usize) -> Vec<f64> {
    let half = size / 2;
    let len = counts.len();
    (0..len)
        .map(|i| {
            let lo = i.saturating_sub(half);
            let hi = (i + half).min(len - 1);
            let window = &counts[lo..=hi];
            window.iter().sum::<f64>() / window.len() as f64
        })
        .collect()
}

/// One in-place clipping pass: each channel is lowered to the mean of its neighbours at
/// ±width when that mean is smaller. Neighbours between channels are interpolated, which
/// keeps the estimate continuous in the width.
fn clip_pass(background: &mut [f64], widths: &[f64], xmin: f64, xmax: f64) {
    for k in 0..background.len() {
        let lo = (k as f64 - widths[k]).clamp(xmin, xmax);
        let hi = (k as f64 + widths[k]).clamp(xmin, xmax);
        let mean = (sample(background, lo) + sample(background, hi)) / 2.0;
        if background[k] > mean {
            background[k] = mean;
        }
    }
}

/// Linear interpolation of `values` at a fractional, in-bounds position.
#[inline]
fn sample(values: &[f64], x: f64) -> f64 {
    let i = x as usize;
    let frac = x - i as f64;
    match values.get(i + 1) {
        Some(&next) if frac > 0.0 => values[i] + (next - values[i]) * frac,
        _ => values[i],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snip(scaling: SnipWidthScaling) -> SnipBackground {
        SnipBackground {
            calibration: EnergyCalibration::new(0.0, 0.01, 0.0),
            fwhm_offset: 0.12,
            fwhm_fanoprime: 0.025,
            width: 0.5,
            scaling,
            spectral_binning: 2.0,
        }
    }

    const BASELINE: f64 = 10.0;

    fn peak_on_baseline() -> Vec<f64> {
        (0..1000)
            .map(|i| {
                let d = (i as f64 - 500.0) / 8.0;
                BASELINE + 5000.0 * (-0.5 * d * d).exp()
            })
            .collect()
    }

    #[test]
    fn constant_spectrum_is_its_own_background() {
        let counts = vec![40.0; 512];
        let window = Range::full(counts.len()).unwrap();
        for scaling in [SnipWidthScaling::Channel, SnipWidthScaling::Binned] {
            let bg = snip(scaling).estimate(&counts, window);
            assert!(bg.iter().all(|b| (b - 40.0).abs() < 1e-9));
        }
    }

    #[test]
    fn peak_is_removed_from_background() {
        let counts = peak_on_baseline();
        let window = Range::full(counts.len()).unwrap();
        let estimator = SnipBackground {
            width: 2.0,
            ..snip(SnipWidthScaling::Channel)
        };
        let bg = estimator.estimate(&counts, window);

        assert_eq!(bg.len(), counts.len());
        assert!(bg.iter().all(|b| b.is_finite() && *b >= 0.0));
        assert!(bg[500] < 0.1 * counts[500]);
        assert!((bg[100] - BASELINE).abs() < 1.0);
    }

    #[test]
    fn background_of_background_is_stable() {
        let counts = peak_on_baseline();
        let window = Range::full(counts.len()).unwrap();
        let estimator = SnipBackground {
            width: 2.0,
            ..snip(SnipWidthScaling::Channel)
        };
        let first = estimator.estimate(&counts, window);
        let second = estimator.estimate(&first, window);

        assert!(first[500] < BASELINE + 0.5, "{}", first[500]);
        let max_change = first
            .iter()
            .zip(&second)
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f64::max);
        assert!(max_change < 0.01 * BASELINE, "{max_change}");
    }

    #[test]
    fn estimate_varies_continuously_with_width() {
        let counts = peak_on_baseline();
        let window = Range::full(counts.len()).unwrap();
        let at = |width: f64| {
            SnipBackground {
                width,
                ..snip(SnipWidthScaling::Channel)
            }
            .estimate(&counts, window)
        };
        let narrow = at(0.61);
        let nudged = at(0.61 + 1e-4);
        let wide = at(0.9);

        let diff = |a: &[f64], b: &[f64]| {
            a.iter().zip(b).map(|(x, y)| (x - y).abs()).fold(0.0, f64::max)
        };
        assert!(diff(&narrow, &nudged) < 1.0);
        assert!(narrow[500] > nudged[500]);
        assert!(nudged[500] > wide[500]);
    }

    #[test]
    fn unbounded_widths_still_terminate() {
        let counts = vec![10.0; 64];
        let window = Range::full(counts.len()).unwrap();
        let tiny_slope = SnipBackground {
            calibration: EnergyCalibration::new(0.0, 1e-320, 0.0),
            ..snip(SnipWidthScaling::Channel)
        };
        let infinite_width = SnipBackground {
            width: f64::INFINITY,
            ..snip(SnipWidthScaling::Binned)
        };
        let nan_width = SnipBackground {
            width: f64::NAN,
            ..snip(SnipWidthScaling::Channel)
        };

        for estimator in [tiny_slope, infinite_width, nan_width] {
            let bg = estimator.estimate(&counts, window);
            assert_eq!(bg.len(), counts.len());
            assert!(bg.iter().all(|b| (b - 10.0).abs() < 1e-9), "{bg:?}");
        }
    }

    #[test]
    fn empty_spectrum_has_empty_background() {
        let estimator = snip(SnipWidthScaling::Channel);
        let window = Range::full(1).unwrap();
        assert!(estimator.estimate(&[], window).is_empty());
    }
}
