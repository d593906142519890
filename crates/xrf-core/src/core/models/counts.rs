use std::collections::BTreeMap;

/// Reserved key recording how many optimizer iterations a pixel took.
pub const NUM_ITERATIONS_KEY: &str = "Num_Iter";

/// Fitted intensities of one spectrum keyed by element name, plus [`NUM_ITERATIONS_KEY`].
pub type FitCounts = BTreeMap<String, f64>;

/// Per-element rows × cols result maps for one fit type.
///
/// Storage is a pre-sized pixel-major arena: pixel (r, c) owns the contiguous cell slice
/// `[(r * cols + c) * keys, (r * cols + c + 1) * keys)`. Chunking [`FitCountDict::cells_mut`]
/// by [`FitCountDict::key_count`] hands each pixel task exactly its own slice.
#[derive(Debug, Clone, PartialEq)]
pub struct FitCountDict {
    rows: usize,
    cols: usize,
    keys: Vec<String>,
    cells: Vec<f64>,
}

impl FitCountDict {
    pub fn new<'a>(
        rows: usize,
        cols: usize,
        element_names: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        let mut keys: Vec<String> = element_names.into_iter().map(str::to_string).collect();
        keys.push(NUM_ITERATIONS_KEY.to_string());
        keys.sort();
        keys.dedup();
        let cells = vec![0.0; rows * cols * keys.len()];
        Self {
            rows,
            cols,
            keys,
            cells,
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn key_count(&self) -> usize {
        self.keys.len()
    }

    pub fn key_index(&self, key: &str) -> Option<usize> {
        self.keys.binary_search_by(|k| k.as_str().cmp(key)).ok()
    }

    pub fn get(&self, key: &str, row: usize, col: usize) -> Option<f64> {
        let k = self.key_index(key)?;
        if row >= self.rows || col >= self.cols {
            return None;
        }
        Some(self.cells[(row * self.cols + col) * self.keys.len() + k])
    }

    pub fn pixel(&self, row: usize, col: usize) -> Option<&[f64]> {
        if row >= self.rows || col >= self.cols {
            return None;
        }
        let n = self.keys.len();
        let start = (row * self.cols + col) * n;
        Some(&self.cells[start..start + n])
    }

    /// The whole arena, pixel-major. Use `chunks_mut(key_count())` to split by pixel.
    pub fn cells_mut(&mut self) -> &mut [f64] {
        &mut self.cells
    }

    /// Row-major rows × cols map of one key.
    pub fn map(&self, key: &str) -> Option<Vec<f64>> {
        let k = self.key_index(key)?;
        Some(
            self.cells
                .chunks_exact(self.keys.len())
                .map(|cell| cell[k])
                .collect(),
        )
    }

    /// Writes one pixel's fitted counts into its cell slice. Intensities are divided by
    /// `livetime` when it is positive; the iteration count is stored as is. Keys that are
    /// not part of the dictionary are ignored.
    pub fn store_pixel(keys: &[String], cell: &mut [f64], counts: &FitCounts, livetime: f64) {
        for (slot, key) in cell.iter_mut().zip(keys) {
            let Some(&value) = counts.get(key) else {
                continue;
            };
            *slot = if key != NUM_ITERATIONS_KEY && livetime > 0.0 {
                value / livetime
            } else {
                value
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_includes_iteration_key_in_sorted_order() {
        let dict = FitCountDict::new(2, 2, ["Fe", "Ca", "Fe"]);
        assert_eq!(dict.keys(), &["Ca", "Fe", NUM_ITERATIONS_KEY]);
        assert_eq!(dict.get("Fe", 1, 1), Some(0.0));
        assert_eq!(dict.get("Zn", 0, 0), None);
    }

    #[test]
    fn store_pixel_divides_intensities_but_not_iterations() {
        let mut dict = FitCountDict::new(1, 2, ["Fe"]);
        let keys = dict.keys().to_vec();
        let counts: FitCounts = [
            ("Fe".to_string(), 30.0),
            (NUM_ITERATIONS_KEY.to_string(), 7.0),
        ]
        .into_iter()
        .collect();
        let n = dict.key_count();
        let cell = &mut dict.cells_mut()[n..2 * n];
        FitCountDict::store_pixel(&keys, cell, &counts, 2.0);

        assert_eq!(dict.get("Fe", 0, 1), Some(15.0));
        assert_eq!(dict.get(NUM_ITERATIONS_KEY, 0, 1), Some(7.0));
        assert_eq!(dict.get("Fe", 0, 0), Some(0.0));
        assert_eq!(dict.map("Fe"), Some(vec![0.0, 15.0]));
    }
}
