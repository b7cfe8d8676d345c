use std::path::PathBuf;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

use stand_projector::{
    estimators::density,
    models::{Layer, LayerType, Polygon, SpeciesRecord, UtilizationClass, UtilizationRecord},
};

/// Write a two-species polygon to a JSON file in the given directory.
fn create_polygon_json(dir: &TempDir) -> PathBuf {
    let path = dir.path().join("polygon.json");
    let json = serde_json::to_string_pretty(&sample_polygon()).unwrap();
    std::fs::write(&path, json).unwrap();
    path
}

fn species(genus: &str, percent: f32, ba: f32, dq: f32) -> SpeciesRecord {
    SpeciesRecord {
        genus: genus.into(),
        site_species: None,
        percent_forested: percent,
        site_index: Some(18.0),
        dominant_height: Some(25.0),
        total_age: Some(60.0),
        years_to_breast_height: Some(8.0),
        years_at_breast_height: None,
        site_curve_number: None,
        utilizations: vec![UtilizationRecord {
            class: UtilizationClass::All,
            basal_area: ba,
            trees_per_hectare: density::trees_per_hectare(ba, dq),
            quad_mean_diameter: dq,
            lorey_height: Some(22.0),
            whole_stem_volume: ba * 9.0,
            close_utilization_volume: ba * 8.0,
            volume_net_decay: ba * 7.5,
            volume_net_decay_waste: ba * 7.2,
        }],
    }
}

fn sample_polygon() -> Polygon {
    Polygon {
        id: "093C090-1".to_string(),
        reference_year: 1985,
        bec_zone: "IDF".to_string(),
        percent_forest_land: 100.0,
        target_year: Some(1990),
        layers: vec![Layer {
            layer_type: LayerType::Primary,
            species: vec![species("F", 70.0, 28.0, 26.0), species("S", 30.0, 12.0, 22.0)],
            default_utilization: None,
        }],
    }
}

fn cmd() -> Command {
    Command::cargo_bin("stand-projector").unwrap()
}

// --- Project subcommand ---

#[test]
fn test_project_prints_tables_when_no_output_given() {
    let dir = TempDir::new().unwrap();
    let input = create_polygon_json(&dir);

    cmd()
        .args(["project", "--input", input.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("093C090-1"))
        .stdout(predicate::str::contains("1985"))
        .stdout(predicate::str::contains("1990"));
}

#[test]
fn test_project_writes_csv_output() {
    let dir = TempDir::new().unwrap();
    let input = create_polygon_json(&dir);
    let output = dir.path().join("snapshots.csv");

    cmd()
        .args([
            "project",
            "--input",
            input.to_str().unwrap(),
            "--output",
            output.to_str().unwrap(),
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Success:"))
        .stdout(predicate::str::contains("6 snapshot years"));

    let contents = std::fs::read_to_string(&output).unwrap();
    assert!(contents.starts_with("polygon_id,year,species,utilization_class"));
}

#[test]
fn test_project_writes_json_output() {
    let dir = TempDir::new().unwrap();
    let input = create_polygon_json(&dir);
    let output = dir.path().join("snapshots.json");

    cmd()
        .args([
            "project",
            "--input",
            input.to_str().unwrap(),
            "--output",
            output.to_str().unwrap(),
            "--format",
            "json",
        ])
        .assert()
        .success();

    let doc: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&output).unwrap()).unwrap();
    assert_eq!(doc["polygon_id"], "093C090-1");
    assert_eq!(doc["reference_year"], 1985);
    assert_eq!(doc["target_year"], 1990);
    assert!(doc["rows"].as_array().unwrap().len() > 0);
}

#[test]
fn test_project_years_flag_overrides_target() {
    let dir = TempDir::new().unwrap();
    let input = create_polygon_json(&dir);
    let output = dir.path().join("snapshots.csv");

    cmd()
        .args([
            "project",
            "--input",
            input.to_str().unwrap(),
            "--output",
            output.to_str().unwrap(),
            "--years",
            "2",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("3 snapshot years"));
}

#[test]
fn test_project_array_input_writes_one_file_per_polygon() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("polygons.json");
    let mut second = sample_polygon();
    second.id = "082F012-2".to_string();
    let json = serde_json::to_string_pretty(&vec![sample_polygon(), second]).unwrap();
    std::fs::write(&input, json).unwrap();
    let output = dir.path().join("snapshots.csv");

    cmd()
        .args([
            "project",
            "--input",
            input.to_str().unwrap(),
            "--output",
            output.to_str().unwrap(),
        ])
        .assert()
        .success();

    assert!(dir.path().join("snapshots-093C090-1.csv").exists());
    assert!(dir.path().join("snapshots-082F012-2.csv").exists());
}

#[test]
fn test_project_with_config_file() {
    let dir = TempDir::new().unwrap();
    let input = create_polygon_json(&dir);
    let config = dir.path().join("settings.toml");
    std::fs::write(&config, "species_dynamics = \"proportional\"\n").unwrap();

    cmd()
        .args([
            "project",
            "--input",
            input.to_str().unwrap(),
            "--config",
            config.to_str().unwrap(),
        ])
        .assert()
        .success();
}

#[test]
fn test_project_missing_input_fails() {
    cmd()
        .args(["project", "--input", "/nonexistent/polygon.json"])
        .assert()
        .failure();
}

#[test]
fn test_project_rejects_malformed_json() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("broken.json");
    std::fs::write(&input, "{ not json").unwrap();

    cmd()
        .args(["project", "--input", input.to_str().unwrap()])
        .assert()
        .failure();
}

// --- Inspect subcommand ---

#[test]
fn test_inspect_after_rankings() {
    let dir = TempDir::new().unwrap();
    let input = create_polygon_json(&dir);

    cmd()
        .args([
            "inspect",
            "--input",
            input.to_str().unwrap(),
            "--step",
            "determine_polygon_rankings",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("determine_polygon_rankings"))
        .stdout(predicate::str::contains("Primary species:    F"))
        .stdout(predicate::str::contains("Secondary species:  S"))
        .stdout(predicate::str::contains("Inventory group:    4"))
        .stdout(predicate::str::contains("Compatibility:      not set"));
}

#[test]
fn test_inspect_full_run_reports_snapshots() {
    let dir = TempDir::new().unwrap();
    let input = create_polygon_json(&dir);

    cmd()
        .args([
            "inspect",
            "--input",
            input.to_str().unwrap(),
            "--step",
            "grow",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Compatibility:      set"))
        .stdout(predicate::str::contains("Snapshot years:     6"));
}

#[test]
fn test_inspect_unknown_step_fails() {
    let dir = TempDir::new().unwrap();
    let input = create_polygon_json(&dir);

    cmd()
        .args([
            "inspect",
            "--input",
            input.to_str().unwrap(),
            "--step",
            "grow_backwards",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("grow_backwards"));
}

// --- Summary subcommand ---

#[test]
fn test_summary_lists_polygon_fields() {
    let dir = TempDir::new().unwrap();
    let input = create_polygon_json(&dir);

    cmd()
        .args(["summary", "--input", input.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("093C090-1"))
        .stdout(predicate::str::contains("IDF"));
}

// --- Help and errors ---

#[test]
fn test_no_subcommand_shows_usage() {
    cmd().assert().failure().stderr(predicate::str::contains("Usage"));
}

#[test]
fn test_help_lists_subcommands() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("project"))
        .stdout(predicate::str::contains("inspect"))
        .stdout(predicate::str::contains("summary"));
}
