pub mod fit;
pub mod optimize;
pub mod quantify;

use crate::error::{CliError, Result};
use crate::utils::progress::CliProgressHandler;
use std::path::Path;
use tracing::{debug, info};
use xrfmaps::core::elements::registry::ElementRegistry;
use xrfmaps::core::io::CsvVolumeSource;
use xrfmaps::engine::error::EngineError;

/// Flags given before the subcommand that affect how a command runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    pub threads: Option<usize>,
    pub quiet: bool,
}

impl RunOptions {
    pub fn progress_handler(&self) -> CliProgressHandler {
        if self.quiet {
            CliProgressHandler::hidden()
        } else {
            CliProgressHandler::new()
        }
    }
}

pub(crate) fn load_registry(path: &Path) -> Result<ElementRegistry> {
    info!("Loading element line table from {:?}", path);
    let registry = ElementRegistry::load(path).map_err(|e| CliError::FileParsing {
        path: path.to_path_buf(),
        source: e.into(),
    })?;
    debug!(elements = registry.len(), "Element line table loaded");
    Ok(registry)
}

/// The requested detectors, or every detector stored for `dataset` when none were named.
pub(crate) fn resolve_detectors(
    requested: &[usize],
    source: &CsvVolumeSource,
    dataset: &str,
) -> Result<Vec<usize>> {
    if !requested.is_empty() {
        return Ok(requested.to_vec());
    }
    let found = source.detectors(dataset).map_err(EngineError::from)?;
    if found.is_empty() {
        return Err(CliError::Argument(format!(
            "No detector files found for dataset '{}'.",
            dataset
        )));
    }
    debug!(dataset, detectors = ?found, "Discovered detectors");
    Ok(found)
}
