use crate::error::{CliError, Result};
use std::fs::File;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing_subscriber::{filter::LevelFilter, fmt, prelude::*};

fn level_filter(verbosity: u8, quiet: bool) -> LevelFilter {
    if quiet {
        return LevelFilter::OFF;
    }
    match verbosity {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

/// Installs the global subscriber: compact stderr output plus an optional plain-text file
/// that also records thread ids, since pixel fits run on the worker pool.
pub fn setup_logging(verbosity: u8, quiet: bool, log_file: Option<PathBuf>) -> Result<()> {
    let console = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .with_target(false)
        .compact();
    let registry = tracing_subscriber::registry()
        .with(level_filter(verbosity, quiet))
        .with(console);

    match log_file {
        Some(path) => {
            let file = File::create(&path).map_err(CliError::Io)?;
            let file_layer = fmt::layer()
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .with_thread_ids(true)
                .with_target(true);
            registry.with(file_layer).init();
        }
        None => registry.init(),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::sync::Once;
    use tracing::{debug, info, trace, warn};

    static GLOBAL: Once = Once::new();

    #[test]
    fn verbosity_maps_to_levels() {
        assert_eq!(level_filter(0, false), LevelFilter::WARN);
        assert_eq!(level_filter(1, false), LevelFilter::INFO);
        assert_eq!(level_filter(2, false), LevelFilter::DEBUG);
        assert_eq!(level_filter(7, false), LevelFilter::TRACE);
        assert_eq!(level_filter(3, true), LevelFilter::OFF);
    }

    #[test]
    #[serial]
    fn global_subscriber_accepts_structured_events() {
        GLOBAL.call_once(|| {
            setup_logging(3, false, None).expect("global subscriber should install once");
        });

        warn!(detector = 0, failed_pixels = 3, "Some pixels were left at zero");
        info!(dataset = "scan_1", "Processing dataset");
        debug!(threads = 4, "Processing context ready");
        trace!("trace level reaches the subscriber");
    }

    #[test]
    #[serial]
    fn file_layer_records_fields_level_and_thread() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("fit.log");

        let file = File::create(&log_path).unwrap();
        let file_layer = fmt::layer()
            .with_writer(Mutex::new(file))
            .with_ansi(false)
            .with_thread_ids(true);
        let subscriber = tracing_subscriber::registry().with(file_layer);

        tracing::subscriber::with_default(subscriber, || {
            debug!(dataset = "scan_1", "Loaded volume");
        });

        let content = std::fs::read_to_string(log_path).unwrap();
        assert!(content.contains("Loaded volume"), "{content}");
        assert!(content.contains("dataset=\"scan_1\""), "{content}");
        assert!(content.contains("DEBUG"));
        assert!(content.contains("ThreadId"));
    }

    #[test]
    #[serial]
    fn unwritable_log_path_is_an_io_error() {
        let directory = PathBuf::from("/");
        if cfg!(unix) && directory.is_dir() {
            let result = setup_logging(0, false, Some(directory));
            assert!(matches!(result, Err(CliError::Io(_))));
        }
    }
}
