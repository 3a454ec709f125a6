use std::fs;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::tempdir;

const STREAM: &str = r#"{"type": "topologies", "topologies": [{"url": "/api/topology/hosts", "name": "Hosts"}]}
{"type": "select_topology", "topology_id": "hosts"}
{"type": "open"}
{"type": "snapshot", "nodes": {"web": {"label_major": "web", "adjacency": ["db"]}, "db": {"label_major": "db"}}}

this line is not json
{"type": "delta", "delta": {"add": [{"id": "cache", "adjacency": ["db"]}]}}
{"type": "select_node", "node_id": "web"}
"#;

#[test]
fn replays_stream_into_chart_file() -> Result<(), Box<dyn std::error::Error>> {
    let tmp = tempdir()?;
    let input_path = tmp.path().join("events.ndjson");
    let output_path = tmp.path().join("chart.json");
    fs::write(&input_path, STREAM)?;

    let mut cmd = Command::cargo_bin("topoview")?;
    cmd.arg("--input")
        .arg(&input_path)
        .arg("--output")
        .arg(&output_path);

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("chart.json"));

    let chart: serde_json::Value = serde_json::from_str(&fs::read_to_string(&output_path)?)?;
    assert_eq!(chart["topology_url"], "/api/topology/hosts");
    assert_eq!(chart["selected_node_id"], "web");
    assert_eq!(chart["connection_closed"], false);
    assert_eq!(
        chart["nodes"].as_array().map(Vec::len),
        Some(3),
        "the delta should add a third node"
    );
    assert!(
        chart["bounding_box"]["height"].as_f64().unwrap_or_default() > 0.0,
        "the chart should be laid out"
    );

    Ok(())
}

#[test]
fn reads_stdin_and_writes_stdout() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::cargo_bin("topoview")?;
    cmd.arg("--input").arg("-").arg("--output").arg("-").write_stdin(STREAM);

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("\"web---db\""));

    Ok(())
}

#[test]
fn missing_input_file_fails() -> Result<(), Box<dyn std::error::Error>> {
    let tmp = tempdir()?;
    let mut cmd = Command::cargo_bin("topoview")?;
    cmd.arg("--input").arg(tmp.path().join("nope.ndjson"));

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("does not exist"));

    Ok(())
}

#[test]
fn config_file_lowers_node_ceiling() -> Result<(), Box<dyn std::error::Error>> {
    let tmp = tempdir()?;
    let config_path = tmp.path().join("chart.json");
    fs::write(&config_path, r#"{"max_nodes": 1}"#)?;

    let mut cmd = Command::cargo_bin("topoview")?;
    cmd.arg("--config")
        .arg(&config_path)
        .arg("--pretty")
        .write_stdin(STREAM);

    let output = cmd.assert().success().get_output().stdout.clone();
    let chart: serde_json::Value = serde_json::from_slice(&output)?;
    assert_eq!(chart["bounding_box"]["width"], 0.0);
    assert_eq!(chart["bounding_box"]["height"], 0.0);

    Ok(())
}
