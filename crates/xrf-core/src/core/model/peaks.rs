use libm::erfc;
use std::f64::consts::{PI, SQRT_2};

/// FWHM → σ for a Gaussian.
pub const FWHM_TO_SIGMA: f64 = 2.3548;

const MAX_EXP_ARG: f64 = 700.0;

/// Area-normalized Gaussian: integrates to `gain` over energy.
#[inline]
pub fn gaussian(gain: f64, sigma: f64, delta: f64) -> f64 {
    if sigma <= 0.0 {
        return 0.0;
    }
    let z = delta / sigma;
    gain / (sigma * (2.0 * PI).sqrt()) * (-0.5 * z * z).exp()
}

/// Step (incomplete charge collection) term below the peak.
#[inline]
pub fn step(gain: f64, sigma: f64, delta: f64, peak_energy: f64) -> f64 {
    if sigma <= 0.0 || peak_energy <= 0.0 {
        return 0.0;
    }
    gain / 2.0 / peak_energy * erfc(delta / (SQRT_2 * sigma))
}

/// Low-energy exponential tail. `delta` is `energy - peak_energy`.
#[inline]
pub fn low_tail(gain: f64, sigma: f64, delta: f64, gamma: f64) -> f64 {
    if sigma <= 0.0 || gamma <= 0.0 {
        return 0.0;
    }
    let arg = delta / (gamma * sigma);
    if arg > MAX_EXP_ARG {
        return 0.0;
    }
    let norm = gain / 2.0 / gamma / sigma / (-0.5 / (gamma * gamma)).exp();
    if !norm.is_finite() {
        return 0.0;
    }
    norm * arg.exp() * erfc(delta / (SQRT_2 * sigma) + 1.0 / (SQRT_2 * gamma))
}

/// High-energy tail, the mirror of [`low_tail`].
#[inline]
pub fn high_tail(gain: f64, sigma: f64, delta: f64, gamma: f64) -> f64 {
    low_tail(gain, sigma, -delta, gamma)
}

/// `c0 + c1·E + c2·E²`
#[inline]
pub fn energy_polynomial(c0: f64, c1: f64, c2: f64, energy: f64) -> f64 {
    c0 + c1 * energy + c2 * energy * energy
}
