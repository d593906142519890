use super::optimizer::{OptimizerKind, OptimizerSettings};
use super::routines::FitRoutineKind;
use crate::core::models::params::FitParamsPreset;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub use crate::core::model::SnipWidthScaling;

#[derive(Debug, Error, PartialEq, Clone)]
pub enum ConfigError {
    #[error("Missing required parameter: {0}")]
    MissingParameter(&'static str),
    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackgroundMode {
    Disabled,
    #[default]
    Snip,
}

impl fmt::Display for BackgroundMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackgroundMode::Disabled => f.write_str("disabled"),
            BackgroundMode::Snip => f.write_str("snip"),
        }
    }
}

/// How the continuum under each spectrum is handled by the fit routines.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackgroundConfig {
    pub mode: BackgroundMode,
    pub snip_scaling: SnipWidthScaling,
    pub spectral_binning: f64,
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            mode: BackgroundMode::default(),
            snip_scaling: SnipWidthScaling::default(),
            spectral_binning: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProcessingConfig {
    /// Worker threads; `None` uses the available parallelism.
    pub threads: Option<usize>,
    pub optimizer: OptimizerKind,
    pub optimizer_settings: OptimizerSettings,
    pub preset: FitParamsPreset,
    pub background: BackgroundConfig,
    /// Fitted energy window in keV; `None` fits every channel.
    pub energy_range: Option<(f64, f64)>,
    /// Derive each pixel's live time from real time and the count-rate ratio after loading.
    pub recalc_livetime: bool,
    pub fit_kinds: Vec<FitRoutineKind>,
}

#[derive(Default)]
pub struct ProcessingConfigBuilder {
    threads: Option<usize>,
    optimizer: Option<OptimizerKind>,
    optimizer_settings: Option<OptimizerSettings>,
    preset: Option<FitParamsPreset>,
    background: Option<BackgroundMode>,
    snip_scaling: Option<SnipWidthScaling>,
    spectral_binning: Option<f64>,
    energy_range: Option<(f64, f64)>,
    recalc_livetime: Option<bool>,
    fit_kinds: Option<Vec<FitRoutineKind>>,
}

impl ProcessingConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = Some(threads);
        self
    }
    pub fn optimizer(mut self, kind: OptimizerKind) -> Self {
        self.optimizer = Some(kind);
        self
    }
    pub fn optimizer_settings(mut self, settings: OptimizerSettings) -> Self {
        self.optimizer_settings = Some(settings);
        self
    }
    pub fn preset(mut self, preset: FitParamsPreset) -> Self {
        self.preset = Some(preset);
        self
    }
    pub fn background(mut self, mode: BackgroundMode) -> Self {
        self.background = Some(mode);
        self
    }
    pub fn snip_scaling(mut self, scaling: SnipWidthScaling) -> Self {
        self.snip_scaling = Some(scaling);
        self
    }
    pub fn spectral_binning(mut self, binning: f64) -> Self {
        self.spectral_binning = Some(binning);
        self
    }
    pub fn energy_range(mut self, min_kev: f64, max_kev: f64) -> Self {
        self.energy_range = Some((min_kev, max_kev));
        self
    }
    pub fn recalc_livetime(mut self, enabled: bool) -> Self {
        self.recalc_livetime = Some(enabled);
        self
    }
    pub fn fit_kinds(mut self, kinds: Vec<FitRoutineKind>) -> Self {
        self.fit_kinds = Some(kinds);
        self
    }

    pub fn build(self) -> Result<ProcessingConfig, ConfigError> {
        let mut fit_kinds = self
            .fit_kinds
            .ok_or(ConfigError::MissingParameter("fit_kinds"))?;
        if fit_kinds.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "fit_kinds",
                reason: "at least one fit type is required".to_string(),
            });
        }
        let mut seen = Vec::with_capacity(fit_kinds.len());
        fit_kinds.retain(|k| {
            if seen.contains(k) {
                false
            } else {
                seen.push(*k);
                true
            }
        });

        if self.threads == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: "threads",
                reason: "must be at least 1".to_string(),
            });
        }
        let spectral_binning = self.spectral_binning.unwrap_or(1.0);
        if !(spectral_binning.is_finite() && spectral_binning > 0.0) {
            return Err(ConfigError::InvalidValue {
                field: "spectral_binning",
                reason: format!("{spectral_binning} is not a positive factor"),
            });
        }
        if let Some((lo, hi)) = self.energy_range {
            if !(lo.is_finite() && hi.is_finite() && lo < hi) {
                return Err(ConfigError::InvalidValue {
                    field: "energy_range",
                    reason: format!("[{lo}, {hi}] keV is empty"),
                });
            }
        }

        Ok(ProcessingConfig {
            threads: self.threads,
            optimizer: self.optimizer.unwrap_or_default(),
            optimizer_settings: self.optimizer_settings.unwrap_or_default(),
            preset: self.preset.unwrap_or_default(),
            background: BackgroundConfig {
                mode: self.background.unwrap_or_default(),
                snip_scaling: self.snip_scaling.unwrap_or_default(),
                spectral_binning,
            },
            energy_range: self.energy_range,
            recalc_livetime: self.recalc_livetime.unwrap_or(false),
            fit_kinds,
        })
    }
}
