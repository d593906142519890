use super::range::Range;
use std::ops::{Add, AddAssign, Index, IndexMut};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum SpectrumError {
    #[error("Spectrum length mismatch: expected {expected} channels, found {found}")]
    LengthMismatch { expected: usize, found: usize },
}

/// Photon counts for every detector channel of one pixel, with the acquisition
/// metadata needed to normalize them.
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrum {
    counts: Vec<f64>,
    elapsed_livetime: f64,
    elapsed_realtime: f64,
    input_counts: f64,
    output_counts: f64,
}

impl Spectrum {
    pub fn new(channels: usize) -> Self {
        Self::from_counts(vec![0.0; channels])
    }

    pub fn from_counts(counts: Vec<f64>) -> Self {
        Self {
            counts,
            elapsed_livetime: 1.0,
            elapsed_realtime: 1.0,
            input_counts: 1.0,
            output_counts: 1.0,
        }
    }

    pub fn with_metadata(
        mut self,
        elapsed_livetime: f64,
        elapsed_realtime: f64,
        input_counts: f64,
        output_counts: f64,
    ) -> Self {
        self.elapsed_livetime = elapsed_livetime;
        self.elapsed_realtime = elapsed_realtime;
        self.input_counts = input_counts;
        self.output_counts = output_counts;
        self
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    #[inline]
    pub fn counts(&self) -> &[f64] {
        &self.counts
    }

    #[inline]
    pub fn counts_mut(&mut self) -> &mut [f64] {
        &mut self.counts
    }

    /// The channels inside `range`. The range must have been validated against this length.
    pub fn sub_range(&self, range: Range) -> &[f64] {
        &self.counts[range.min()..=range.max()]
    }

    pub fn elapsed_livetime(&self) -> f64 {
        self.elapsed_livetime
    }

    pub fn elapsed_realtime(&self) -> f64 {
        self.elapsed_realtime
    }

    pub fn input_counts(&self) -> f64 {
        self.input_counts
    }

    pub fn output_counts(&self) -> f64 {
        self.output_counts
    }

    pub fn set_elapsed_livetime(&mut self, value: f64) {
        self.elapsed_livetime = value;
    }

    pub fn set_elapsed_realtime(&mut self, value: f64) {
        self.elapsed_realtime = value;
    }

    pub fn set_input_counts(&mut self, value: f64) {
        self.input_counts = value;
    }

    pub fn set_output_counts(&mut self, value: f64) {
        self.output_counts = value;
    }

    /// Live time derived from the dead-time ratio. Keeps the stored value when either
    /// count rate is not positive.
    pub fn recalc_elapsed_livetime(&mut self) {
        if self.input_counts > 0.0 && self.output_counts > 0.0 {
            self.elapsed_livetime =
                self.elapsed_realtime * (self.output_counts / self.input_counts);
        }
    }

    pub fn total_counts(&self) -> f64 {
        self.counts.iter().sum()
    }

    pub fn checked_add(&self, other: &Spectrum) -> Result<Spectrum, SpectrumError> {
        let mut sum = self.clone();
        sum.try_accumulate(other)?;
        Ok(sum)
    }

    pub fn try_accumulate(&mut self, other: &Spectrum) -> Result<(), SpectrumError> {
        if self.len() != other.len() {
            return Err(SpectrumError::LengthMismatch {
                expected: self.len(),
                found: other.len(),
            });
        }
        for (a, b) in self.counts.iter_mut().zip(&other.counts) {
            *a += b;
        }
        self.elapsed_livetime += other.elapsed_livetime;
        self.elapsed_realtime += other.elapsed_realtime;
        self.input_counts += other.input_counts;
        self.output_counts += other.output_counts;
        Ok(())
    }

    pub fn scaled(&self, factor: f64) -> Spectrum {
        let mut scaled = self.clone();
        scaled.counts.iter_mut().for_each(|c| *c *= factor);
        scaled
    }
}

impl Index<usize> for Spectrum {
    type Output = f64;

    fn index(&self, index: usize) -> &f64 {
        &self.counts[index]
    }
}

impl IndexMut<usize> for Spectrum {
    fn index_mut(&mut self, index: usize) -> &mut f64 {
        &mut self.counts[index]
    }
}

/// # Panics
///
/// Panics if the spectra have different channel counts.
impl AddAssign<&Spectrum> for Spectrum {
    fn add_assign(&mut self, rhs: &Spectrum) {
        if let Err(e) = self.try_accumulate(rhs) {
            panic!("cannot add spectra: {e}");
        }
    }
}

impl Add<&Spectrum> for &Spectrum {
    type Output = Spectrum;

    fn add(self, rhs: &Spectrum) -> Spectrum {
        let mut sum = self.clone();
        sum += rhs;
        sum
    }
}

impl Add<&Spectrum> for Spectrum {
    type Output = Spectrum;

    fn add(mut self, rhs: &Spectrum) -> Spectrum {
        self += rhs;
        self
    }
}
