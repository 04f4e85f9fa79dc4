//! Runs of the `fieldwatch` binary.

use fieldwatch::archive::{write_band, write_scenes};
use fieldwatch::pipeline::FieldAnalysis;
use fieldwatch::{ConfigStorage, CurrentConditions, NdviSource, Season};
use ndarray::Array2;
use shared::indices::{chirps, sentinel2};
use shared::{FieldBoundary, Scene};
use std::path::Path;
use std::process::Command;
use test_helpers::{at_noon, bell_curve, optical_scene, spaced_dates};

fn fieldwatch(config_dir: &std::path::Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_fieldwatch"));
    cmd.arg("--config-dir").arg(config_dir);
    cmd
}

#[test]
fn test_seasons_command_fills_null_gaps() {
    let dir = tempfile::tempdir().unwrap();
    let start = chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
    let points: Vec<String> = spaced_dates(start, 70, 5)
        .into_iter()
        .zip(bell_curve(70, 0.1, 0.8, 35.0, 9.0))
        .enumerate()
        .map(|(i, (date, value))| match i {
            10 | 33 | 34 => format!(r#"{{"date": "{date}", "value": null}}"#),
            _ => format!(r#"{{"date": "{date}", "value": {value}}}"#),
        })
        .collect();
    let input = dir.path().join("series.json");
    std::fs::write(&input, format!("[{}]", points.join(","))).unwrap();

    let output = fieldwatch(dir.path())
        .arg("seasons")
        .arg(&input)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "{}",
        String::from_utf8_lossy(&output.stderr)
    );
    let seasons: Vec<Season> = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(seasons.len(), 1);
    assert!(seasons[0].peak_value > 0.7);
}

#[test]
fn test_seasons_command_rejects_malformed_series() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("series.json");
    std::fs::write(&input, r#"[{"date": "2024-01-01", "value": "high"}]"#).unwrap();

    let output = fieldwatch(dir.path())
        .arg("seasons")
        .arg(&input)
        .output()
        .unwrap();
    assert!(!output.status.success());
}

/// Two clear Sentinel-2 scenes and a week of rain on an 8x8 grid.
fn write_archive(root: &Path) {
    let start = chrono::NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
    let mut scenes = Vec::new();
    for (i, date) in spaced_dates(start, 2, 5).into_iter().enumerate() {
        let id = format!("S2_{i}");
        scenes.push(optical_scene(&id, date));
        let ndvi = 0.4 + 0.2 * i as f64;
        let red = 1000.0;
        let nir = red * (1.0 + ndvi) / (1.0 - ndvi);
        for (band, value) in [(sentinel2::RED, red), (sentinel2::NIR, nir), (sentinel2::SCL, 4.0)] {
            write_band(root, &id, band, &Array2::from_elem((8, 8), value)).unwrap();
        }
    }
    for (i, date) in spaced_dates(start, 7, 1).into_iter().enumerate() {
        let id = format!("chirps_{i}");
        scenes.push(Scene::new(&id, chirps::COLLECTION, at_noon(date)).with_assets([chirps::RAINFALL]));
        write_band(root, &id, chirps::RAINFALL, &Array2::from_elem((4, 4), 3.0)).unwrap();
    }
    write_scenes(root, &scenes).unwrap();
}

#[test]
fn test_conditions_command_for_saved_field() {
    let dir = tempfile::tempdir().unwrap();
    let archive = dir.path().join("archive");
    write_archive(&archive);
    let storage = ConfigStorage::with_path(dir.path().to_path_buf());
    let field = FieldBoundary::circular(-1.2921, 36.8219, 300.0).unwrap();
    storage.save_field("north_plot", &field).unwrap();

    let output = fieldwatch(dir.path())
        .args(["conditions", "--saved", "north_plot", "--archive"])
        .arg(&archive)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "{}",
        String::from_utf8_lossy(&output.stderr)
    );
    let conditions: CurrentConditions = serde_json::from_slice(&output.stdout).unwrap();
    let vegetation = conditions.vegetation.unwrap();
    assert_eq!(vegetation.source, NdviSource::Sentinel2);
    assert_eq!(vegetation.scene_id, "S2_1");
    assert!((vegetation.ndvi().unwrap() - 0.6).abs() < 1e-9);
    let rainfall = conditions.rainfall.unwrap();
    assert_eq!(rainfall.days, 7);
    assert!((rainfall.short_total_mm.unwrap() - 21.0).abs() < 1e-9);
    assert!(conditions.temperature.is_none());
    assert!(conditions.flood.is_none());
}

#[test]
fn test_conditions_command_unknown_field() {
    let dir = tempfile::tempdir().unwrap();
    write_archive(dir.path());

    let output = fieldwatch(dir.path())
        .args(["conditions", "--saved", "nowhere", "--archive"])
        .arg(dir.path())
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("no field named 'nowhere'"));
}

#[test]
fn test_analyze_command_reads_archive() {
    let dir = tempfile::tempdir().unwrap();
    write_archive(dir.path());

    let output = fieldwatch(dir.path())
        .args([
            "analyze",
            "--lat=-1.2921",
            "--lon=36.8219",
            "--radius=300",
            "--signal=ndvi",
            "--start=2024-06-01",
            "--end=2024-06-30",
            "--archive",
        ])
        .arg(dir.path())
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "{}",
        String::from_utf8_lossy(&output.stderr)
    );
    let analysis: FieldAnalysis = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(analysis.scenes_found, 2);
    let values: Vec<f64> = analysis.points.iter().map(|p| p.value).collect();
    assert_eq!(values.len(), 2);
    assert!((values[0] - 0.4).abs() < 1e-9 && (values[1] - 0.6).abs() < 1e-9);
}
