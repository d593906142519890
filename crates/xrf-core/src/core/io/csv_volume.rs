use super::error::IoError;
use super::traits::{VolumeSize, VolumeSource};
use crate::core::models::spectrum::Spectrum;
use crate::core::models::volume::SpectraVolume;
use std::path::{Path, PathBuf};
use tracing::debug;

const META_COLUMNS: [&str; 6] = [
    "row",
    "col",
    "elapsed_livetime",
    "elapsed_realtime",
    "input_counts",
    "output_counts",
];

struct PixelRecord {
    row: usize,
    col: usize,
    spectrum: Spectrum,
}

/// Reads volumes laid out as `<root>/<dataset>/detector_<n>.csv`.
///
/// Each file has a header row followed by one record per pixel:
/// `row,col,elapsed_livetime,elapsed_realtime,input_counts,output_counts,<channel counts...>`.
#[derive(Debug, Clone)]
pub struct CsvVolumeSource {
    root: PathBuf,
}

impl CsvVolumeSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn detector_path(&self, dataset: &str, detector: usize) -> PathBuf {
        self.root.join(dataset).join(format!("detector_{detector}.csv"))
    }

    /// Detector indices present for `dataset`, ascending.
    pub fn detectors(&self, dataset: &str) -> Result<Vec<usize>, IoError> {
        let dir = self.root.join(dataset);
        let entries = std::fs::read_dir(&dir).map_err(|e| IoError::Io {
            path: dir.to_string_lossy().to_string(),
            source: e,
        })?;
        let mut detectors: Vec<usize> = entries
            .filter_map(Result::ok)
            .filter_map(|entry| {
                let name = entry.file_name();
                let name = name.to_str()?;
                name.strip_prefix("detector_")?
                    .strip_suffix(".csv")?
                    .parse()
                    .ok()
            })
            .collect();
        detectors.sort_unstable();
        Ok(detectors)
    }

    /// Writes `volume` in the layout [`CsvVolumeSource::load_volume`] reads.
    pub fn save_volume(
        &self,
        dataset: &str,
        detector: usize,
        volume: &SpectraVolume,
    ) -> Result<(), IoError> {
        let path = self.detector_path(dataset, detector);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| IoError::Io {
                path: parent.to_string_lossy().to_string(),
                source: e,
            })?;
        }
        let csv_err = |e: csv::Error| IoError::Csv {
            path: path.to_string_lossy().to_string(),
            source: e,
        };
        let mut writer = csv::Writer::from_path(&path).map_err(csv_err)?;

        let mut header: Vec<String> = META_COLUMNS.iter().map(|s| s.to_string()).collect();
        header.extend((0..volume.channels()).map(|i| format!("ch{i}")));
        writer.write_record(&header).map_err(csv_err)?;

        for ((row, col), spectrum) in volume.iter() {
            let mut record = vec![
                row.to_string(),
                col.to_string(),
                spectrum.elapsed_livetime().to_string(),
                spectrum.elapsed_realtime().to_string(),
                spectrum.input_counts().to_string(),
                spectrum.output_counts().to_string(),
            ];
            record.extend(spectrum.counts().iter().map(f64::to_string));
            writer.write_record(&record).map_err(csv_err)?;
        }
        writer.flush().map_err(|e| IoError::Io {
            path: path.to_string_lossy().to_string(),
            source: e,
        })
    }

    fn read_records(&self, path: &Path) -> Result<(Vec<PixelRecord>, usize), IoError> {
        let path_str = path.to_string_lossy().to_string();
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(path)
            .map_err(|e| IoError::Csv {
                path: path_str.clone(),
                source: e,
            })?;
        let header_len = reader
            .headers()
            .map_err(|e| IoError::Csv {
                path: path_str.clone(),
                source: e,
            })?
            .len();
        if header_len < META_COLUMNS.len() {
            return Err(IoError::Format {
                path: path_str,
                line: 1,
                message: format!(
                    "expected at least {} columns, found {header_len}",
                    META_COLUMNS.len()
                ),
            });
        }
        let channels = header_len - META_COLUMNS.len();

        let mut records = Vec::new();
        for result in reader.records() {
            let record = result.map_err(|e| IoError::Csv {
                path: path_str.clone(),
                source: e,
            })?;
            let line = record.position().map_or(0, |p| p.line());
            let field = |i: usize| -> Result<f64, IoError> {
                let raw = record.get(i).unwrap_or_default();
                raw.parse::<f64>().map_err(|e| IoError::Format {
                    path: path_str.clone(),
                    line,
                    message: format!("column {i} ('{raw}'): {e}"),
                })
            };
            let index = |i: usize| -> Result<usize, IoError> {
                let raw = record.get(i).unwrap_or_default();
                raw.parse::<usize>().map_err(|e| IoError::Format {
                    path: path_str.clone(),
                    line,
                    message: format!("column {i} ('{raw}'): {e}"),
                })
            };
            let counts = (META_COLUMNS.len()..header_len)
                .map(&field)
                .collect::<Result<Vec<f64>, IoError>>()?;
            let spectrum = Spectrum::from_counts(counts).with_metadata(
                field(2)?,
                field(3)?,
                field(4)?,
                field(5)?,
            );
            records.push(PixelRecord {
                row: index(0)?,
                col: index(1)?,
                spectrum,
            });
        }
        Ok((records, channels))
    }

    fn existing_path(&self, dataset: &str, detector: usize) -> Result<PathBuf, IoError> {
        let path = self.detector_path(dataset, detector);
        if path.is_file() {
            Ok(path)
        } else {
            Err(IoError::MissingDetector {
                dataset: dataset.to_string(),
                detector,
            })
        }
    }
}

impl VolumeSource for CsvVolumeSource {
    fn load_volume(&self, dataset: &str, detector: usize) -> Result<SpectraVolume, IoError> {
        let path = self.existing_path(dataset, detector)?;
        let (records, channels) = self.read_records(&path)?;
        let rows = records.iter().map(|r| r.row + 1).max().unwrap_or(0);
        let cols = records.iter().map(|r| r.col + 1).max().unwrap_or(0);

        let mut volume = SpectraVolume::new(rows, cols, channels);
        for record in records {
            volume.insert(record.row, record.col, record.spectrum)?;
        }
        debug!(dataset, detector, rows, cols, channels, "Loaded spectra volume");
        Ok(volume)
    }

    fn volume_size(&self, dataset: &str) -> Result<VolumeSize, IoError> {
        let detector = self
            .detectors(dataset)?
            .first()
            .copied()
            .ok_or_else(|| IoError::MissingDetector {
                dataset: dataset.to_string(),
                detector: 0,
            })?;
        let path = self.existing_path(dataset, detector)?;
        let (records, channels) = self.read_records(&path)?;
        Ok(VolumeSize {
            rows: records.iter().map(|r| r.row + 1).max().unwrap_or(0),
            cols: records.iter().map(|r| r.col + 1).max().unwrap_or(0),
            channels,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn sample_volume() -> SpectraVolume {
        let mut volume = SpectraVolume::new(2, 2, 3);
        for r in 0..2 {
            for c in 0..2 {
                let v = (r * 2 + c) as f64;
                let spectrum = Spectrum::from_counts(vec![v, v + 1.0, v + 2.0])
                    .with_metadata(0.5, 1.0, 100.0, 90.0);
                volume.insert(r, c, spectrum).unwrap();
            }
        }
        volume
    }

    #[test]
    fn save_then_load_preserves_volume() {
        let dir = tempdir().unwrap();
        let source = CsvVolumeSource::new(dir.path());
        let volume = sample_volume();
        source.save_volume("scan_1", 0, &volume).unwrap();

        let loaded = source.load_volume("scan_1", 0).unwrap();
        assert_eq!(loaded.rows(), 2);
        assert_eq!(loaded.cols(), 2);
        assert_eq!(loaded.spectra(), volume.spectra());

        let size = source.volume_size("scan_1").unwrap();
        assert_eq!(
            size,
            VolumeSize {
                rows: 2,
                cols: 2,
                channels: 3
            }
        );
        assert_eq!(source.detectors("scan_1").unwrap(), vec![0]);
    }

    #[test]
    fn load_reports_missing_detector() {
        let dir = tempdir().unwrap();
        let source = CsvVolumeSource::new(dir.path());
        assert!(matches!(
            source.load_volume("scan_1", 3),
            Err(IoError::MissingDetector { detector: 3, .. })
        ));
    }

    #[test]
    fn load_reports_malformed_numbers() {
        let dir = tempdir().unwrap();
        let source = CsvVolumeSource::new(dir.path());
        let path = source.detector_path("scan_1", 0);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(
            &path,
            concat!(
                "row,col,elapsed_livetime,elapsed_realtime,input_counts,output_counts,ch0\n",
                "0,0,1,1,1,1,abc\n",
            ),
        )
        .unwrap();
        assert!(matches!(
            source.load_volume("scan_1", 0),
            Err(IoError::Format { line: 2, .. })
        ));
    }
}
