#![allow(missing_docs)]

use std::fs;

use assert_cmd::cargo::cargo_bin_cmd;
use serde_json::Value;
use tempfile::TempDir;

fn failure_stderr(args: &[&str]) -> String {
    let output = cargo_bin_cmd!("sombra-ids")
        .args(args)
        .assert()
        .failure()
        .get_output()
        .stderr
        .clone();
    String::from_utf8(output).expect("utf8 stderr")
}

fn json_output(args: &[&str]) -> Value {
    let output = cargo_bin_cmd!("sombra-ids")
        .args(args)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    serde_json::from_slice(&output).expect("valid json")
}

#[test]
fn allocate_prints_adjacent_blocks() {
    let json = json_output(&[
        "--format",
        "json",
        "allocate",
        "--count",
        "3",
        "--block-size",
        "100",
        "--upper-bound",
        "100000",
        "--cav-bits",
        "0",
        "--wait-ms",
        "5",
    ]);
    let blocks = json["blocks"].as_array().expect("blocks array");
    assert_eq!(blocks.len(), 3);
    assert_eq!(blocks[0]["start"], 0);
    assert_eq!(blocks[1]["start"], 100);
    assert_eq!(blocks[2]["last_id"], 299);
    assert_eq!(json["metrics"]["claims_won"], 3);
}

#[test]
fn allocate_reports_exhaustion() {
    let stderr = failure_stderr(&[
        "allocate",
        "--count",
        "3",
        "--block-size",
        "50",
        "--upper-bound",
        "100",
        "--cav-bits",
        "0",
    ]);
    assert!(stderr.contains("exhausted"), "{stderr}");
}

#[test]
fn stress_reports_disjoint_blocks() {
    let json = json_output(&[
        "--format",
        "json",
        "stress",
        "--instances",
        "4",
        "--blocks",
        "20",
        "--block-size",
        "50",
        "--wait-ms",
        "10",
        "--cav-bits",
        "0",
    ]);
    assert_eq!(json["blocks"], 80);
    assert_eq!(json["ids"], 4000);
    assert_eq!(json["disjoint"], true);
}

#[test]
fn show_config_reads_toml_file() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("ids.toml");
    fs::write(
        &path,
        r#"
unique_instance_id = "from-file"
wait_ms = 40
conflict_avoidance = "global_manual"
cav_tag = 3

[sizer]
block_size = 500
upper_bound = 1048576

[[sizer.namespace]]
id = 2
block_size = 10
upper_bound = 4096
"#,
    )
    .expect("write config");

    let json = json_output(&[
        "--format",
        "json",
        "show-config",
        "--config",
        path.to_str().expect("utf8 path"),
    ]);
    assert_eq!(json["options"]["unique_instance_id"], "from-file");
    assert_eq!(json["options"]["wait_ms"], 40);
    assert_eq!(json["options"]["conflict_avoidance"], "global_manual");
    assert_eq!(json["sizer"]["block_size"], 500);
    assert_eq!(json["sizer"]["namespace"][0]["id"], 2);

    let text = cargo_bin_cmd!("sombra-ids")
        .args(["show-config", "--instance", "override", "--config"])
        .arg(&path)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let text = String::from_utf8(text).expect("utf8 output");
    assert!(text.contains("unique_instance_id = \"override\""));
}

#[test]
fn show_config_rejects_invalid_options() {
    let stderr = failure_stderr(&["show-config", "--mode", "local-manual"]);
    assert!(stderr.contains("local_manual requires cav_tag"), "{stderr}");
}
