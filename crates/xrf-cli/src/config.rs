use crate::cli::JobArgs;
use crate::error::{CliError, Result};
use crate::utils::parser;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use tracing::debug;
use xrfmaps::core::models::params::FitParamsPreset;
use xrfmaps::engine::config::{
    BackgroundMode, ProcessingConfig, ProcessingConfigBuilder, SnipWidthScaling,
};
use xrfmaps::engine::optimizer::{OptimizerKind, OptimizerSettings};
use xrfmaps::engine::routines::FitRoutineKind;
use xrfmaps::workflows::overrides::{DetectorOverrides, ParamsOverride};

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct PartialProcessingConfig {
    threads: Option<usize>,
    optimizer: Option<OptimizerKind>,
    preset: Option<FitParamsPreset>,
    background: Option<BackgroundMode>,
    snip_scaling: Option<SnipWidthScaling>,
    spectral_binning: Option<f64>,
    /// keV
    energy_range: Option<(f64, f64)>,
    recalc_livetime: Option<bool>,
    fit: Option<Vec<String>>,
}

/// Job file as written by the user; every section is optional until merged.
///
/// ```toml
/// [processing]
/// threads = 8
/// preset = "batch-fit-no-tails"
/// fit = ["roi", "nnls"]
///
/// [optimizer-settings]
/// max-iterations = 500
///
/// [overrides]
/// elements-to-fit = ["Ca", "Fe", "Compton_Amplitude"]
/// be-window-thickness = 24.0
///
/// [detectors.1]
/// elements-to-fit = ["Fe"]
/// ```
#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct PartialJobConfig {
    processing: Option<PartialProcessingConfig>,
    optimizer_settings: Option<OptimizerSettings>,
    overrides: Option<ParamsOverride>,
    /// Detector index → complete replacement of `overrides` for that detector.
    #[serde(default)]
    detectors: BTreeMap<String, ParamsOverride>,
}

/// Fully resolved settings of one command invocation.
#[derive(Debug, Clone)]
pub struct JobConfig {
    pub processing: ProcessingConfig,
    pub overrides: DetectorOverrides,
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| CliError::Config(format!("Invalid value for {}: {}", key, value)))
}

fn parse_fit_kinds<S: AsRef<str>>(names: &[S]) -> Result<Vec<FitRoutineKind>> {
    names
        .iter()
        .map(|name| FitRoutineKind::from_str(name.as_ref()).map_err(CliError::Config))
        .collect()
}

impl PartialJobConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        debug!("Loading job configuration from file: {:?}", path);
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| CliError::FileParsing {
            path: path.to_path_buf(),
            source: e.into(),
        })
    }

    /// Resolves the job with precedence command line > `--set` > file > built-in defaults.
    ///
    /// `fit_kinds` are the fit types given on the command line; `fallback_fit` is used when
    /// neither the command line nor the file name any.
    pub fn merge_with_cli(
        mut self,
        args: &JobArgs,
        threads: Option<usize>,
        fit_kinds: &[FitRoutineKind],
        fallback_fit: Option<FitRoutineKind>,
    ) -> Result<JobConfig> {
        self.apply_set_values(&args.set_values)?;

        let processing = self.processing.take().unwrap_or_default();

        let fit_kinds = if !fit_kinds.is_empty() {
            fit_kinds.to_vec()
        } else if let Some(names) = &processing.fit {
            parse_fit_kinds(names)?
        } else if let Some(kind) = fallback_fit {
            vec![kind]
        } else {
            return Err(CliError::Config(
                "`processing.fit` is required either in the config file or via --fit."
                    .to_string(),
            ));
        };

        let mut builder = ProcessingConfigBuilder::new()
            .fit_kinds(fit_kinds)
            .optimizer(args.optimizer.or(processing.optimizer).unwrap_or_default())
            .optimizer_settings(self.optimizer_settings.unwrap_or_default())
            .preset(processing.preset.unwrap_or_default())
            .background(processing.background.unwrap_or_default())
            .snip_scaling(processing.snip_scaling.unwrap_or_default())
            .spectral_binning(processing.spectral_binning.unwrap_or(1.0))
            .recalc_livetime(processing.recalc_livetime.unwrap_or(false));
        if let Some(threads) = threads.or(processing.threads) {
            builder = builder.threads(threads);
        }
        if let Some((lo, hi)) = processing.energy_range {
            builder = builder.energy_range(lo, hi);
        }
        let processing = builder
            .build()
            .map_err(|e| CliError::Config(e.to_string()))?;

        let overrides = Self::merge_overrides(self.overrides, self.detectors)?;
        Ok(JobConfig {
            processing,
            overrides,
        })
    }

    fn merge_overrides(
        default: Option<ParamsOverride>,
        detectors: BTreeMap<String, ParamsOverride>,
    ) -> Result<DetectorOverrides> {
        let default = default.ok_or_else(|| {
            CliError::Config("`overrides` section with `elements-to-fit` is required.".to_string())
        })?;
        detectors
            .into_iter()
            .try_fold(DetectorOverrides::new(default), |acc, (key, params)| {
                let detector =
                    parser::parse_detector(&key).map_err(|e| CliError::Config(e.to_string()))?;
                Ok(acc.with_detector(detector, params))
            })
    }

    fn apply_set_values(&mut self, set_values: &[String]) -> Result<()> {
        for kv_pair in set_values {
            let (key, value_str) = parser::parse_assignment(kv_pair)
                .map_err(|e| CliError::Config(format!("Invalid --set format: {}", e)))?;

            match key {
                "processing.threads" => {
                    self.processing_mut().threads = Some(parse_value(key, value_str)?);
                }
                "processing.optimizer" => {
                    self.processing_mut().optimizer = Some(
                        parser::parse_optimizer(value_str)
                            .map_err(|e| CliError::Config(e.to_string()))?,
                    );
                }
                "processing.preset" => {
                    self.processing_mut().preset = Some(
                        parser::parse_preset(value_str)
                            .map_err(|e| CliError::Config(e.to_string()))?,
                    );
                }
                "processing.background" => {
                    self.processing_mut().background = Some(
                        parser::parse_background(value_str)
                            .map_err(|e| CliError::Config(e.to_string()))?,
                    );
                }
                "processing.spectral-binning" => {
                    self.processing_mut().spectral_binning = Some(parse_value(key, value_str)?);
                }
                "processing.recalc-livetime" => {
                    self.processing_mut().recalc_livetime = Some(parse_value(key, value_str)?);
                }
                "processing.fit" => {
                    let names: Vec<&str> = value_str.split(',').map(str::trim).collect();
                    parse_fit_kinds(&names)?;
                    self.processing_mut().fit =
                        Some(names.into_iter().map(String::from).collect());
                }
                "optimizer-settings.max-iterations" => {
                    self.optimizer_settings
                        .get_or_insert_with(Default::default)
                        .max_iterations = parse_value(key, value_str)?;
                }
                "overrides.incident-energy" => {
                    self.overrides_mut(key)?.incident_energy = Some(parse_value(key, value_str)?);
                }
                "overrides.detector-element" => {
                    self.overrides_mut(key)?.detector_element = value_str.to_string();
                }
                _ => {
                    return Err(CliError::Config(format!(
                        "Unknown or unsupported key for --set: {}",
                        key
                    )));
                }
            }
        }
        Ok(())
    }

    fn processing_mut(&mut self) -> &mut PartialProcessingConfig {
        self.processing.get_or_insert_with(Default::default)
    }

    fn overrides_mut(&mut self, key: &str) -> Result<&mut ParamsOverride> {
        self.overrides.as_mut().ok_or_else(|| {
            CliError::Config(format!(
                "Cannot set {}: the config file has no `overrides` section.",
                key
            ))
        })
    }
}
