use super::error::IoError;
use super::traits::FitResultSink;
use crate::core::calibration::EnergyCalibration;
use crate::core::models::counts::FitCountDict;
use crate::core::models::params::FitParameters;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Serialize)]
struct CalibrationRecord<'a> {
    group: &'a str,
    calibration: &'a EnergyCalibration,
}

/// Writes results under `<root>/<dataset>/detector_<n>/`: one `<group>.csv` per fit type
/// (columns `row,col,<keys...>`), `<group>_calibration.toml`, and `fit_parameters.toml`.
#[derive(Debug, Clone)]
pub struct CsvResultSink {
    root: PathBuf,
}

impl CsvResultSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn detector_dir(&self, dataset: &str, detector: usize) -> PathBuf {
        self.root.join(dataset).join(format!("detector_{detector}"))
    }

    fn ensure_dir(path: &Path) -> Result<(), IoError> {
        std::fs::create_dir_all(path).map_err(|e| IoError::Io {
            path: path.to_string_lossy().to_string(),
            source: e,
        })
    }

    fn write_toml<T: Serialize>(path: &Path, value: &T) -> Result<(), IoError> {
        let content = toml::to_string_pretty(value).map_err(|e| IoError::TomlWrite {
            path: path.to_string_lossy().to_string(),
            source: e,
        })?;
        std::fs::write(path, content).map_err(|e| IoError::Io {
            path: path.to_string_lossy().to_string(),
            source: e,
        })
    }

    /// Reads back a parameter file written by [`FitResultSink::write_fit_parameters`].
    pub fn read_fit_parameters(path: &Path) -> Result<FitParameters, IoError> {
        let content = std::fs::read_to_string(path).map_err(|e| IoError::Io {
            path: path.to_string_lossy().to_string(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| IoError::Toml {
            path: path.to_string_lossy().to_string(),
            source: e,
        })
    }
}

impl FitResultSink for CsvResultSink {
    fn write_fit_counts(
        &self,
        dataset: &str,
        detector: usize,
        group: &str,
        counts: &FitCountDict,
        calibration: &EnergyCalibration,
    ) -> Result<(), IoError> {
        let dir = self.detector_dir(dataset, detector);
        Self::ensure_dir(&dir)?;

        let path = dir.join(format!("{group}.csv"));
        let csv_err = |e: csv::Error| IoError::Csv {
            path: path.to_string_lossy().to_string(),
            source: e,
        };
        let mut writer = csv::Writer::from_path(&path).map_err(csv_err)?;
        let mut header = vec!["row".to_string(), "col".to_string()];
        header.extend(counts.keys().iter().cloned());
        writer.write_record(&header).map_err(csv_err)?;

        for row in 0..counts.rows() {
            for col in 0..counts.cols() {
                let mut record = vec![row.to_string(), col.to_string()];
                if let Some(cell) = counts.pixel(row, col) {
                    record.extend(cell.iter().map(f64::to_string));
                }
                writer.write_record(&record).map_err(csv_err)?;
            }
        }
        writer.flush().map_err(|e| IoError::Io {
            path: path.to_string_lossy().to_string(),
            source: e,
        })?;

        Self::write_toml(
            &dir.join(format!("{group}_calibration.toml")),
            &CalibrationRecord { group, calibration },
        )?;
        info!(dataset, detector, group, path = %path.display(), "Wrote fit counts");
        Ok(())
    }

    fn write_fit_parameters(
        &self,
        dataset: &str,
        detector: usize,
        params: &FitParameters,
    ) -> Result<(), IoError> {
        let dir = self.detector_dir(dataset, detector);
        Self::ensure_dir(&dir)?;
        let path = dir.join("fit_parameters.toml");
        Self::write_toml(&path, params)?;
        info!(dataset, detector, path = %path.display(), "Wrote fit parameters");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::counts::{FitCounts, NUM_ITERATIONS_KEY};
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn write_fit_counts_emits_one_row_per_pixel() {
        let dir = tempdir().unwrap();
        let sink = CsvResultSink::new(dir.path());
        let mut dict = FitCountDict::new(1, 2, ["Fe"]);
        let keys = dict.keys().to_vec();
        let counts: FitCounts = [("Fe".to_string(), 4.0)].into_iter().collect();
        let n = dict.key_count();
        FitCountDict::store_pixel(&keys, &mut dict.cells_mut()[..n], &counts, 2.0);

        sink.write_fit_counts("scan", 0, "ROI", &dict, &EnergyCalibration::new(0.0, 0.01, 0.0))
            .unwrap();

        let out = sink.detector_dir("scan", 0);
        let csv = fs::read_to_string(out.join("ROI.csv")).unwrap();
        let lines: Vec<_> = csv.lines().collect();
        assert_eq!(lines[0], format!("row,col,Fe,{NUM_ITERATIONS_KEY}"));
        assert_eq!(lines[1], "0,0,2,0");
        assert_eq!(lines[2], "0,1,0,0");
        assert!(out.join("ROI_calibration.toml").is_file());
    }

    #[test]
    fn fit_parameters_survive_a_round_trip() {
        let dir = tempdir().unwrap();
        let sink = CsvResultSink::new(dir.path());
        let params = FitParameters::defaults();
        sink.write_fit_parameters("scan", 1, &params).unwrap();

        let path = sink.detector_dir("scan", 1).join("fit_parameters.toml");
        let loaded = CsvResultSink::read_fit_parameters(&path).unwrap();
        assert_eq!(loaded, params);
    }
}
