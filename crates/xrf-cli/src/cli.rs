use crate::utils::parser;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use xrfmaps::engine::optimizer::OptimizerKind;
use xrfmaps::engine::routines::FitRoutineKind;

const HELP_TEMPLATE: &str = "\
{before-help}{name} {version}
{author-with-newline}{about-with-newline}
{usage-heading} {usage}

{all-args}{after-help}
";

#[derive(Parser, Debug)]
#[command(
    author = "XRF Maps Developers",
    version,
    about = "XRF Maps CLI - Fits X-ray fluorescence spectra volumes into per-element maps.",
    help_template = HELP_TEMPLATE,
)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity level (-v for INFO, -vv for DEBUG, -vvv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all log output and progress bars except for errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Write logs to a specified file in addition to the console output
    #[arg(long, global = true, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Size of the worker pool used for per-pixel fitting.
    /// Defaults to the number of available logical cores.
    #[arg(short = 'j', long, global = true, value_name = "NUM")]
    pub threads: Option<usize>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fit every pixel of one or more datasets and write per-element maps.
    Fit(FitArgs),
    /// Optimize fit parameters on integrated spectra and write the averaged set.
    Optimize(OptimizeArgs),
    /// Derive calibration curves from a standard with known element weights.
    Quantify(QuantifyArgs),
}

/// Inputs shared by every processing command.
#[derive(Args, Debug)]
pub struct JobArgs {
    /// Directory holding one sub-directory of detector CSV files per dataset.
    #[arg(short, long, required = true, value_name = "DIR")]
    pub input: PathBuf,

    /// Directory receiving the results.
    #[arg(short, long, required = true, value_name = "DIR")]
    pub output: PathBuf,

    /// Path to the job configuration file in TOML format.
    #[arg(short, long, required = true, value_name = "PATH")]
    pub config: PathBuf,

    /// Path to the element line table in TOML format.
    #[arg(short, long, required = true, value_name = "PATH")]
    pub elements: PathBuf,

    /// Detectors to process, comma separated. Defaults to every detector found.
    #[arg(short, long, value_name = "LIST", value_delimiter = ',')]
    pub detectors: Vec<usize>,

    /// Override the nonlinear optimizer back-end from the config file.
    #[arg(long, value_name = "NAME", value_parser = parser::parse_optimizer)]
    pub optimizer: Option<OptimizerKind>,

    /// Set a specific configuration value, overriding the config file.
    /// Can be used multiple times. Example: -S processing.preset=batch-fit-with-tails
    #[arg(short = 'S', long = "set", value_name = "KEY=VALUE")]
    pub set_values: Vec<String>,
}

/// Arguments for the `fit` subcommand.
#[derive(Args, Debug)]
pub struct FitArgs {
    #[command(flatten)]
    pub job: JobArgs,

    /// Datasets to process, by directory name under the input directory.
    #[arg(required = true, value_name = "DATASET")]
    pub datasets: Vec<String>,

    /// Override the fit types from the config file, comma separated
    /// (roi, params, fitted, svd, nnls).
    #[arg(short, long = "fit", value_name = "LIST", value_delimiter = ',')]
    pub fit_kinds: Vec<FitRoutineKind>,
}

/// Arguments for the `optimize` subcommand.
#[derive(Args, Debug)]
pub struct OptimizeArgs {
    #[command(flatten)]
    pub job: JobArgs,

    /// Candidate datasets to optimize over.
    #[arg(required = true, value_name = "DATASET")]
    pub datasets: Vec<String>,

    /// Only use the N candidate datasets with the most pixels.
    #[arg(short = 'n', long, value_name = "N")]
    pub largest: Option<usize>,
}

/// Arguments for the `quantify` subcommand.
#[derive(Args, Debug)]
pub struct QuantifyArgs {
    #[command(flatten)]
    pub job: JobArgs,

    /// Standard description in TOML format: name, dataset and element weights.
    #[arg(short, long, required = true, value_name = "PATH")]
    pub standard: PathBuf,

    /// Optical constants and shell data in TOML format.
    #[arg(short = 't', long, required = true, value_name = "PATH")]
    pub quant_table: PathBuf,

    /// Override the fit types from the config file, comma separated.
    #[arg(short, long = "fit", value_name = "LIST", value_delimiter = ',')]
    pub fit_kinds: Vec<FitRoutineKind>,
}
