//! Black-box tests for the `cadence` binary.

use std::io::Write;

use assert_cmd::Command;
use predicates::prelude::*;

fn snapshot_file(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    file.write_all(content.as_bytes()).expect("write snapshot");
    file
}

fn valid_snapshot() -> String {
    serde_json::json!({
        "fsm": {
            "versions": [{
                "id": 1,
                "name": "v1",
                "isActive": true,
                "states": [
                    { "name": "NEW", "isInitial": true },
                    { "name": "ACTIVATING" }
                ],
                "transitions": [
                    {
                        "from": "NEW", "to": "ACTIVATING",
                        "triggerType": "EVENT", "triggerEvent": "GENERATION_COMPLETED",
                        "conditions": [
                            { "field": "totalGenerations", "operator": "GTE", "value": "1" }
                        ]
                    }
                ]
            }]
        },
        "rules": [
            {
                "code": "LOG-1",
                "trigger": "GENERATION_COMPLETED",
                "actions": [ { "type": "LOG_EVENT", "params": { "message": "gen" } } ]
            }
        ],
        "overlays": []
    })
    .to_string()
}

#[test]
fn validate_accepts_a_well_formed_snapshot() {
    let file = snapshot_file(&valid_snapshot());
    Command::cargo_bin("cadence")
        .unwrap()
        .args(["validate"])
        .arg(file.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("snapshot OK"));
}

#[test]
fn validate_json_output_reports_counts() {
    let file = snapshot_file(&valid_snapshot());
    Command::cargo_bin("cadence")
        .unwrap()
        .args(["--output", "json", "validate"])
        .arg(file.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("\"valid\": true"))
        .stdout(predicate::str::contains("\"rules\": 1"));
}

#[test]
fn validate_rejects_missing_initial_state() {
    let broken = valid_snapshot().replace("\"isInitial\":true", "\"isInitial\":false");
    let file = snapshot_file(&broken);
    Command::cargo_bin("cadence")
        .unwrap()
        .args(["validate"])
        .arg(file.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("no initial state"));
}

#[test]
fn validate_rejects_unparseable_document() {
    let file = snapshot_file("{ not json");
    Command::cargo_bin("cadence")
        .unwrap()
        .args(["validate"])
        .arg(file.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid snapshot"));
}

#[test]
fn simulate_processes_a_single_event() {
    let file = snapshot_file(&valid_snapshot());
    Command::cargo_bin("cadence")
        .unwrap()
        .args(["simulate"])
        .arg(file.path())
        .args([
            "--user",
            "u1",
            "--event",
            "GENERATION_COMPLETED",
            "--payload",
            "{\"totalGenerations\": 1}",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"to_state\": \"ACTIVATING\""))
        .stdout(predicate::str::contains("\"rule_code\": \"LOG-1\""));
}

#[test]
fn simulate_rejects_unknown_event_tag() {
    let file = snapshot_file(&valid_snapshot());
    Command::cargo_bin("cadence")
        .unwrap()
        .args(["simulate"])
        .arg(file.path())
        .args(["--event", "NOT_AN_EVENT"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown event tag"));
}

#[test]
fn simulate_runs_a_script_of_steps() {
    let file = snapshot_file(&valid_snapshot());
    let script = snapshot_file(
        &serde_json::json!([
            { "event": "BOT_START" },
            { "event": "GENERATION_COMPLETED", "payload": { "totalGenerations": 1 } }
        ])
        .to_string(),
    );
    Command::cargo_bin("cadence")
        .unwrap()
        .args(["simulate"])
        .arg(file.path())
        .args(["--script"])
        .arg(script.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("\"state\": \"ACTIVATING\""));
}
