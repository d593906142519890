use std::collections::BTreeMap;
use std::fs;
use tempfile::tempdir;
use xrfmaps::core::elements::registry::ElementRegistry;
use xrfmaps::core::io::{CsvResultSink, CsvVolumeSource, VolumeSource};
use xrfmaps::core::models::params::{FitParam, names};
use xrfmaps::core::models::spectrum::Spectrum;
use xrfmaps::core::models::volume::SpectraVolume;
use xrfmaps::engine::config::{BackgroundMode, ProcessingConfigBuilder};
use xrfmaps::engine::context::ProcessingContext;
use xrfmaps::engine::progress::{Progress, ProgressReporter};
use xrfmaps::engine::routines::FitRoutineKind;
use xrfmaps::workflows::overrides::{DetectorOverrides, ParamsOverride};
use xrfmaps::workflows::process::process_dataset;

const REGISTRY: &str = r#"
[elements.Fe]
atomic_number = 26
lines = [{ shell = "K", label = "Ka1", energy = 4.0, ratio = 1.0 }]
"#;

fn small_volume() -> SpectraVolume {
    let mut volume = SpectraVolume::new(2, 2, 10);
    for r in 0..2 {
        for c in 0..2 {
            let counts = vec![0.0, 0.0, 0.0, 5.0, 5.0, 5.0, 0.0, 0.0, 0.0, 0.0];
            volume.insert(r, c, Spectrum::from_counts(counts)).unwrap();
        }
    }
    volume
}

fn unit_calibration_overrides() -> DetectorOverrides {
    let mut over = ParamsOverride::new(["Fe", "Compton_Amplitude"]);
    over.detector_element = "Si".to_string();
    over.roi_width_ev = Some(2000.0);
    over.fit_params.insert(names::ENERGY_OFFSET, FitParam::new(0.0));
    over.fit_params.insert(names::ENERGY_SLOPE, FitParam::new(1.0));
    DetectorOverrides::new(over)
}

/// Parses `<group>.csv` into (row, col) → column → value.
fn read_group(path: &std::path::Path) -> BTreeMap<(usize, usize), BTreeMap<String, f64>> {
    let mut reader = csv::Reader::from_path(path).unwrap();
    let headers: Vec<String> = reader.headers().unwrap().iter().map(String::from).collect();
    let mut cells = BTreeMap::new();
    for record in reader.records() {
        let record = record.unwrap();
        let row: usize = record[0].parse().unwrap();
        let col: usize = record[1].parse().unwrap();
        let values = headers[2..]
            .iter()
            .zip(record.iter().skip(2))
            .map(|(h, v)| (h.clone(), v.parse::<f64>().unwrap()))
            .collect();
        cells.insert((row, col), values);
    }
    cells
}

#[test]
fn roi_scenario_round_trips_through_csv_files() {
    let input = tempdir().unwrap();
    let output = tempdir().unwrap();
    let source = CsvVolumeSource::new(input.path());
    source.save_volume("scan_7", 0, &small_volume()).unwrap();
    let sink = CsvResultSink::new(output.path());
    let registry = ElementRegistry::from_toml_str(REGISTRY).unwrap();

    let config = ProcessingConfigBuilder::new()
        .threads(2)
        .background(BackgroundMode::Disabled)
        .fit_kinds(vec![FitRoutineKind::Roi])
        .build()
        .unwrap();
    let phases = std::sync::Mutex::new(Vec::new());
    let reporter = ProgressReporter::with_callback(Box::new(|event| {
        if let Progress::PhaseStart { name } = event {
            phases.lock().unwrap().push(name);
        }
    }));
    let context = ProcessingContext::new(&config, &reporter).unwrap();

    let outcome = process_dataset(
        &context,
        &source,
        &sink,
        &registry,
        "scan_7",
        &[0],
        &unit_calibration_overrides(),
    );
    assert!(outcome.is_success(), "{outcome:?}");
    drop(context);
    drop(reporter);
    assert_eq!(phases.into_inner().unwrap(), vec!["ROI"]);

    let dir = sink.detector_dir("scan_7", 0);
    let cells = read_group(&dir.join("ROI.csv"));
    assert_eq!(cells.len(), 4);
    for values in cells.values() {
        assert_eq!(values["Fe"], 15.0);
        assert_eq!(values["Num_Iter"], 0.0);
    }
    let calibration = fs::read_to_string(dir.join("ROI_calibration.toml")).unwrap();
    assert!(calibration.contains("slope = 1.0"), "{calibration}");
}

#[test]
fn loaded_volume_integrates_to_pixel_sums() {
    let input = tempdir().unwrap();
    let source = CsvVolumeSource::new(input.path());
    let mut volume = SpectraVolume::new(3, 2, 4);
    for r in 0..3 {
        for c in 0..2 {
            let v = (r * 2 + c) as f64;
            let spectrum = Spectrum::from_counts(vec![v, 2.0 * v, 0.0, 1.0])
                .with_metadata(0.5, 1.0, 10.0, 8.0);
            volume.insert(r, c, spectrum).unwrap();
        }
    }
    source.save_volume("scan", 3, &volume).unwrap();

    let loaded = source.load_volume("scan", 3).unwrap();
    let total = loaded.integrate();
    assert_eq!(total.counts(), &[15.0, 30.0, 0.0, 6.0]);
    assert_eq!(total.elapsed_livetime(), 3.0);
    assert_eq!(total.elapsed_realtime(), 6.0);
    assert_eq!(total.input_counts(), 60.0);
    assert_eq!(total.output_counts(), 48.0);

    let mut recalculated = total.clone();
    recalculated.recalc_elapsed_livetime();
    assert!((recalculated.elapsed_livetime() - 4.8).abs() < 1e-12);
    assert_eq!(source.detectors("scan").unwrap(), vec![3]);
}

#[test]
fn spectrum_addition_is_associative_and_commutative() {
    let a = Spectrum::from_counts(vec![1.0, 2.0, 3.0]).with_metadata(1.0, 2.0, 3.0, 4.0);
    let b = Spectrum::from_counts(vec![0.5, 0.0, 7.0]).with_metadata(0.5, 0.5, 0.5, 0.5);
    let c = Spectrum::from_counts(vec![4.0, 4.0, 4.0]).with_metadata(2.0, 1.0, 0.0, 3.0);

    let left = (a.clone() + &b) + &c;
    let right = a.clone() + &(b.clone() + &c);
    let swapped = c + &b + &a;
    assert_eq!(left, right);
    assert_eq!(left, swapped);
    assert_eq!(left.counts(), &[5.5, 6.0, 14.0]);
    assert_eq!(left.elapsed_livetime(), 3.5);
}
