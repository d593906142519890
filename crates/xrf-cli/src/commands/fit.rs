use super::{RunOptions, load_registry, resolve_detectors};
use crate::cli::FitArgs;
use crate::config::PartialJobConfig;
use crate::error::{CliError, Result};
use tracing::{error, info, warn};
use xrfmaps::core::io::{CsvResultSink, CsvVolumeSource};
use xrfmaps::engine::context::ProcessingContext;
use xrfmaps::engine::progress::ProgressReporter;
use xrfmaps::workflows::process::process_dataset;

pub fn run(args: FitArgs, options: RunOptions) -> Result<()> {
    let partial_config = PartialJobConfig::from_file(&args.job.config)?;
    info!("Merging configuration from file and CLI arguments...");
    let job = partial_config.merge_with_cli(&args.job, options.threads, &args.fit_kinds, None)?;
    let registry = load_registry(&args.job.elements)?;

    let source = CsvVolumeSource::new(&args.job.input);
    let sink = CsvResultSink::new(&args.job.output);

    let progress_handler = options.progress_handler();
    let reporter = ProgressReporter::with_callback(progress_handler.callback());
    let context = ProcessingContext::new(&job.processing, &reporter)?;

    let groups: Vec<&str> = job
        .processing
        .fit_kinds
        .iter()
        .map(|k| k.group_name())
        .collect();
    println!(
        "Fitting {} dataset(s) [{}] on {} thread(s)...",
        args.datasets.len(),
        groups.join(", "),
        context.threads()
    );

    let mut failures = 0usize;
    for dataset in &args.datasets {
        let detectors = match resolve_detectors(&args.job.detectors, &source, dataset) {
            Ok(detectors) => detectors,
            Err(e) => {
                error!(dataset = %dataset, error = %e, "Dataset skipped");
                println!("✗ {}: {}", dataset, e);
                failures += 1;
                continue;
            }
        };

        let outcome = process_dataset(
            &context,
            &source,
            &sink,
            &registry,
            dataset,
            &detectors,
            &job.overrides,
        );

        for detector in &outcome.detectors {
            for fit in detector.fits.iter().filter(|f| f.failed_pixels > 0) {
                warn!(
                    dataset = %dataset,
                    detector = detector.detector,
                    fit = %fit.kind,
                    failed_pixels = fit.failed_pixels,
                    "Some pixels were left at zero"
                );
            }
            match &detector.error {
                None => println!(
                    "✓ {} detector {}: maps written to {}",
                    dataset,
                    detector.detector,
                    sink.detector_dir(dataset, detector.detector).display()
                ),
                Some(e) => {
                    println!("✗ {} detector {}: {}", dataset, detector.detector, e);
                    failures += 1;
                }
            }
        }
    }

    if failures > 0 {
        return Err(CliError::Other(anyhow::anyhow!(
            "{} dataset/detector pair(s) could not be processed",
            failures
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{Cli, Commands};
    use clap::Parser;
    use std::fs;
    use xrfmaps::core::models::spectrum::Spectrum;
    use xrfmaps::core::models::volume::SpectraVolume;

    const LINES: &str = r#"
[elements.Fe]
atomic_number = 26
lines = [{ shell = "K", label = "Ka1", energy = 4.0, ratio = 1.0 }]
"#;

    const JOB: &str = r#"
[processing]
threads = 2
background = "disabled"
fit = ["roi"]

[overrides]
elements-to-fit = ["Fe"]
roi-width-ev = 2000.0

[overrides.fit-params.energy_offset]
value = 0.0

[overrides.fit-params.energy_slope]
value = 1.0
"#;

    #[test]
    fn roi_job_writes_maps_for_every_discovered_detector() {
        let root = tempfile::tempdir().unwrap();
        let input = root.path().join("in");
        let output = root.path().join("out");
        let source = CsvVolumeSource::new(&input);
        let mut volume = SpectraVolume::new(1, 2, 10);
        for c in 0..2 {
            let counts = vec![0.0, 0.0, 0.0, 5.0, 5.0, 5.0, 0.0, 0.0, 0.0, 0.0];
            volume.insert(0, c, Spectrum::from_counts(counts)).unwrap();
        }
        source.save_volume("scan_1", 0, &volume).unwrap();
        source.save_volume("scan_1", 1, &volume).unwrap();

        let job = root.path().join("job.toml");
        let lines = root.path().join("lines.toml");
        fs::write(&job, JOB).unwrap();
        fs::write(&lines, LINES).unwrap();

        let path = |p: &std::path::Path| p.to_string_lossy().to_string();
        let cli = Cli::parse_from([
            "xrf-maps".to_string(),
            "fit".to_string(),
            "-i".to_string(),
            path(&input),
            "-o".to_string(),
            path(&output),
            "-c".to_string(),
            path(&job),
            "-e".to_string(),
            path(&lines),
            "scan_1".to_string(),
        ]);
        let Commands::Fit(args) = cli.command else {
            panic!("Expected 'fit' subcommand");
        };
        let options = RunOptions {
            threads: None,
            quiet: true,
        };
        run(args, options).unwrap();

        let sink = CsvResultSink::new(&output);
        for detector in [0, 1] {
            let csv = fs::read_to_string(sink.detector_dir("scan_1", detector).join("ROI.csv"))
                .unwrap();
            let rows: Vec<&str> = csv.lines().collect();
            assert_eq!(rows.len(), 3, "{csv}");
            assert!(rows[0].starts_with("row,col,Fe"));
            assert!(rows[1].starts_with("0,0,15"), "{csv}");
        }
    }

    #[test]
    fn missing_dataset_fails_the_command() {
        let root = tempfile::tempdir().unwrap();
        let job = root.path().join("job.toml");
        let lines = root.path().join("lines.toml");
        fs::write(&job, JOB).unwrap();
        fs::write(&lines, LINES).unwrap();
        let job = job.to_string_lossy().to_string();
        let lines = lines.to_string_lossy().to_string();
        let input = root.path().join("in").to_string_lossy().to_string();

        let cli = Cli::parse_from([
            "xrf-maps",
            "fit",
            "-i",
            input.as_str(),
            "-o",
            input.as_str(),
            "-c",
            job.as_str(),
            "-e",
            lines.as_str(),
            "nope",
        ]);
        let Commands::Fit(args) = cli.command else {
            panic!("Expected 'fit' subcommand");
        };
        let options = RunOptions {
            threads: None,
            quiet: true,
        };
        let result = run(args, options);
        assert!(matches!(result, Err(CliError::Other(_))));
    }
}
