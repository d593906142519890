use super::spectrum::{Spectrum, SpectrumError};

/// Rows × cols grid of spectra sharing one channel count, stored row-major.
#[derive(Debug, Clone)]
pub struct SpectraVolume {
    rows: usize,
    cols: usize,
    channels: usize,
    spectra: Vec<Spectrum>,
}

impl SpectraVolume {
    pub fn new(rows: usize, cols: usize, channels: usize) -> Self {
        Self {
            rows,
            cols,
            channels,
            spectra: vec![Spectrum::new(channels); rows * cols],
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn pixel_count(&self) -> usize {
        self.spectra.len()
    }

    #[inline]
    fn index(&self, row: usize, col: usize) -> Option<usize> {
        (row < self.rows && col < self.cols).then(|| row * self.cols + col)
    }

    pub fn get(&self, row: usize, col: usize) -> Option<&Spectrum> {
        self.index(row, col).map(|i| &self.spectra[i])
    }

    pub fn get_mut(&mut self, row: usize, col: usize) -> Option<&mut Spectrum> {
        self.index(row, col).map(move |i| &mut self.spectra[i])
    }

    /// Stores `spectrum` at (row, col). Out-of-grid coordinates are ignored and
    /// returned as `Ok(false)`.
    pub fn insert(
        &mut self,
        row: usize,
        col: usize,
        spectrum: Spectrum,
    ) -> Result<bool, SpectrumError> {
        if spectrum.len() != self.channels {
            return Err(SpectrumError::LengthMismatch {
                expected: self.channels,
                found: spectrum.len(),
            });
        }
        match self.index(row, col) {
            Some(i) => {
                self.spectra[i] = spectrum;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Spectra in row-major order.
    pub fn spectra(&self) -> &[Spectrum] {
        &self.spectra
    }

    /// Pixels with their coordinates, row-major.
    pub fn iter(&self) -> impl Iterator<Item = ((usize, usize), &Spectrum)> {
        let cols = self.cols.max(1);
        self.spectra
            .iter()
            .enumerate()
            .map(move |(i, s)| ((i / cols, i % cols), s))
    }

    /// Channel-wise sum of every pixel with plainly summed metadata.
    pub fn integrate(&self) -> Spectrum {
        let mut total = Spectrum::new(self.channels).with_metadata(0.0, 0.0, 0.0, 0.0);
        for spectrum in &self.spectra {
            total += spectrum;
        }
        total
    }

    pub fn recalc_elapsed_livetime(&mut self) {
        self.spectra
            .iter_mut()
            .for_each(Spectrum::recalc_elapsed_livetime);
    }
}
