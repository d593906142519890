use super::{RunOptions, load_registry, resolve_detectors};
use crate::cli::QuantifyArgs;
use crate::config::PartialJobConfig;
use crate::error::{CliError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};
use xrfmaps::core::io::CsvVolumeSource;
use xrfmaps::core::quantification::table::QuantTable;
use xrfmaps::engine::context::ProcessingContext;
use xrfmaps::engine::error::EngineError;
use xrfmaps::engine::progress::ProgressReporter;
use xrfmaps::workflows::quantify::{
    QuantificationStandard, load_standard_spectrum, perform_quantification,
};

/// A measured reference sample.
///
/// ```toml
/// name = "axo"
/// dataset = "axo_std_scan"
///
/// [weights]
/// Ca = 1.93
/// Fe = 0.5
/// ```
#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct StandardFile {
    name: String,
    dataset: String,
    /// µg/cm²
    weights: BTreeMap<String, f64>,
}

impl StandardFile {
    fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let standard: Self = toml::from_str(&content).map_err(|e| CliError::FileParsing {
            path: path.to_path_buf(),
            source: e.into(),
        })?;
        if standard.weights.is_empty() {
            return Err(CliError::Config(format!(
                "Standard '{}' lists no element weights.",
                standard.name
            )));
        }
        Ok(standard)
    }
}

#[derive(Serialize, Debug)]
struct CurveRecord {
    fit: String,
    shell: String,
    quantifier: f64,
    points: usize,
    factors: BTreeMap<String, f64>,
}

#[derive(Serialize, Debug)]
struct CalibrationFile {
    standard: String,
    detector: usize,
    curves: Vec<CurveRecord>,
}

impl CalibrationFile {
    fn new(standard: &QuantificationStandard, detector: usize) -> Self {
        Self {
            standard: standard.name.clone(),
            detector,
            curves: standard
                .calibration_curves()
                .map(|(kind, shell, curve)| CurveRecord {
                    fit: kind.group_name().to_string(),
                    shell: shell.to_string(),
                    quantifier: curve.quantifier,
                    points: curve.points,
                    factors: curve.factors.clone(),
                })
                .collect(),
        }
    }

    fn write(&self, output: &Path) -> Result<PathBuf> {
        let dir = output.join(&self.standard);
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(format!("detector_{}_calibration.toml", self.detector));
        let content = toml::to_string_pretty(self).map_err(|e| CliError::Other(e.into()))?;
        std::fs::write(&path, content)?;
        Ok(path)
    }
}

pub fn run(args: QuantifyArgs, options: RunOptions) -> Result<()> {
    let partial_config = PartialJobConfig::from_file(&args.job.config)?;
    info!("Merging configuration from file and CLI arguments...");
    let job = partial_config.merge_with_cli(&args.job, options.threads, &args.fit_kinds, None)?;
    let registry = load_registry(&args.job.elements)?;
    let standard_file = StandardFile::from_file(&args.standard)?;
    let quant_table = QuantTable::load(&args.quant_table).map_err(|e| CliError::FileParsing {
        path: args.quant_table.clone(),
        source: e.into(),
    })?;

    let source = CsvVolumeSource::new(&args.job.input);

    let progress_handler = options.progress_handler();
    let reporter = ProgressReporter::with_callback(progress_handler.callback());
    let context = ProcessingContext::new(&job.processing, &reporter)?;

    let detectors = resolve_detectors(&args.job.detectors, &source, &standard_file.dataset)?;
    println!(
        "Calibrating against standard '{}' ({} element(s))...",
        standard_file.name,
        standard_file.weights.len()
    );

    let mut failures = 0usize;
    for &detector in &detectors {
        let quantify = || -> std::result::Result<QuantificationStandard, EngineError> {
            let spectrum =
                load_standard_spectrum(&context, &source, &standard_file.dataset, detector)?;
            let mut standard =
                QuantificationStandard::new(&standard_file.name, standard_file.weights.clone())
                    .with_spectrum(spectrum);
            perform_quantification(
                &context,
                &mut standard,
                &registry,
                &quant_table,
                job.overrides.for_detector(detector),
            )?;
            Ok(standard)
        };

        match quantify() {
            Ok(standard) => {
                let file = CalibrationFile::new(&standard, detector);
                debug!(detector, curves = file.curves.len(), "Calibration curves derived");
                let path = file.write(&args.job.output)?;
                println!("✓ detector {}: calibration written to {}", detector, path.display());
            }
            Err(e) => {
                error!(detector, error = %e, "Quantification failed");
                println!("✗ detector {}: {}", detector, e);
                failures += 1;
            }
        }
    }

    if failures > 0 {
        return Err(CliError::Other(anyhow::anyhow!(
            "{} detector(s) could not be calibrated",
            failures
        )));
    }
    Ok(())
}
