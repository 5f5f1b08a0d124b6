#![allow(missing_docs)]

use std::fs;
use std::path::PathBuf;

use assert_cmd::cargo::cargo_bin_cmd;
use serde_json::Value;
use sombra_linkbag::storage::{ENV_EMBEDDED_TO_TREE, ENV_TREE_TO_EMBEDDED};
use tempfile::TempDir;

fn write_config(contents: &str) -> (TempDir, PathBuf) {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("linkbag.toml");
    fs::write(&path, contents).expect("write config");
    (dir, path)
}

fn run_json(args: &[&str]) -> Value {
    let output = cargo_bin_cmd!("sombra-linkbag")
        .env_remove(ENV_EMBEDDED_TO_TREE)
        .env_remove(ENV_TREE_TO_EMBEDDED)
        .arg("--format")
        .arg("json")
        .args(args)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    serde_json::from_slice(&output).expect("valid json")
}

#[test]
fn simulate_reports_both_conversions() {
    let json = run_json(&[
        "simulate", "--links", "100", "--removes", "100", "--top", "16", "--bottom", "4",
        "--page-size", "512",
    ]);
    assert_eq!(json["embedded_to_tree_threshold"], 16);
    assert_eq!(json["tree_to_embedded_threshold"], 4);
    assert_eq!(json["final_size"], 0);
    assert_eq!(json["final_representation"], "embedded");
    assert_eq!(json["persisted_size"], 0);
    assert!(json["conversions_to_tree"].as_u64().unwrap_or(0) >= 1);
    assert!(json["conversions_to_embedded"].as_u64().unwrap_or(0) >= 1);

    let transitions = json["transitions"].as_array().expect("transitions array");
    let first = &transitions[0];
    assert_eq!(first["from"], "embedded");
    assert_eq!(first["to"], "tree");
    assert_eq!(first["size"], 16);
    assert!(json["btree"]["inserts"].as_u64().unwrap_or(0) > 0);
    assert!(json["pager"]["commits"].as_u64().unwrap_or(0) >= 2);
}

#[test]
fn simulate_is_deterministic_per_seed() {
    let args = ["simulate", "--links", "60", "--removes", "20", "--seed", "42"];
    assert_eq!(run_json(&args), run_json(&args));
}

#[test]
fn negative_top_keeps_bag_embedded() {
    let json = run_json(&["simulate", "--links", "80", "--removes", "0", "--top", "-1"]);
    assert_eq!(json["final_representation"], "embedded");
    assert_eq!(json["final_size"], 80);
    assert_eq!(json["conversions_to_tree"], 0);
    assert!(json["transitions"].as_array().is_some_and(|t| t.is_empty()));
}

#[test]
fn config_file_and_environment_are_layered() {
    let (_dir, path) = write_config(
        "[linkbag]\nembedded_to_tree_threshold = 25\ntree_to_embedded_threshold = 5\n",
    );
    let path = path.to_str().expect("utf-8 path");
    let json = run_json(&["--config", path, "config"]);
    assert_eq!(json["embedded_to_tree_threshold"], 25);
    assert_eq!(json["tree_to_embedded_threshold"], 5);
    assert_eq!(json["source"], path);

    let output = cargo_bin_cmd!("sombra-linkbag")
        .env(ENV_EMBEDDED_TO_TREE, "50")
        .env_remove(ENV_TREE_TO_EMBEDDED)
        .args(["--format", "json", "--config", path, "config"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json: Value = serde_json::from_slice(&output).expect("valid json");
    assert_eq!(json["embedded_to_tree_threshold"], 50);
    assert_eq!(json["tree_to_embedded_threshold"], 5);
}

#[test]
fn contradictory_config_is_rejected() {
    let (_dir, path) = write_config(
        "[linkbag]\nembedded_to_tree_threshold = 10\ntree_to_embedded_threshold = 10\n",
    );
    let output = cargo_bin_cmd!("sombra-linkbag")
        .env_remove(ENV_EMBEDDED_TO_TREE)
        .env_remove(ENV_TREE_TO_EMBEDDED)
        .arg("--config")
        .arg(&path)
        .arg("config")
        .assert()
        .failure()
        .get_output()
        .stderr
        .clone();
    let stderr = String::from_utf8_lossy(&output);
    assert!(stderr.contains("configuration error"), "stderr: {stderr}");
}

#[test]
fn text_output_lists_transitions() {
    let output = cargo_bin_cmd!("sombra-linkbag")
        .env_remove(ENV_EMBEDDED_TO_TREE)
        .env_remove(ENV_TREE_TO_EMBEDDED)
        .args(["simulate", "--links", "30", "--removes", "30", "--top", "10", "--bottom", "2"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let stdout = String::from_utf8_lossy(&output);
    assert!(stdout.contains("embedded -> tree"), "stdout: {stdout}");
    assert!(stdout.contains("final: embedded size=0"), "stdout: {stdout}");
}
