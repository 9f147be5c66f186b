//! Integration tests for the `geonl` binary.
//!
//! These tests use `assert_cmd` to verify:
//! - coordinate conversion in text and JSON form
//! - argument validation and exit codes
//! - location search against a faked Locatieserver
//! - the MCP subcommand speaking JSON-RPC over stdio

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::{json, Value};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn geonl() -> Command {
    let mut cmd = Command::cargo_bin("geonl").expect("binary exists");
    cmd.env_remove("RUST_LOG");
    cmd
}

#[test]
fn convert_rd_prints_both_systems() {
    geonl()
        .args(["convert", "--x", "121000", "--y", "487000"])
        .assert()
        .success()
        .stdout(predicate::str::contains("RD (EPSG:28992)"))
        .stdout(predicate::str::contains("lat=52.3698"))
        .stdout(predicate::str::contains("lon=4.8879"));
}

#[test]
fn convert_json_outside_envelope_flags_confidence() {
    let output = geonl()
        .args(["convert", "--lat", "48.8566", "--lon", "2.3522", "--json"])
        .output()
        .expect("run geonl");
    assert!(output.status.success());

    let report: Value = serde_json::from_slice(&output.stdout).expect("JSON report");
    assert_eq!(report["input"]["system"], "wgs84");
    assert_eq!(report["output"]["system"], "rd");
    assert_eq!(report["validation"]["in_bounds"], false);
    assert_eq!(report["validation"]["confidence"], "outside_envelope");
}

#[test]
fn convert_requires_a_coordinate_pair() {
    geonl()
        .arg("convert")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--lat and --lon"));

    geonl()
        .args(["convert", "--x", "121000"])
        .assert()
        .failure();

    geonl()
        .args(["convert", "--x", "1", "--y", "2", "--lat", "52"])
        .assert()
        .failure();
}

#[tokio::test(flavor = "multi_thread")]
async fn search_prints_aggregation_result() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/bzk/locatieserver/search/v3_1/free"))
        .and(query_param("q", "Damrak"))
        .and(query_param("rows", "5"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "response": {
                "docs": [{
                    "id": "weg-1",
                    "type": "weg",
                    "weergavenaam": "Damrak, Amsterdam",
                    "centroide_ll": "POINT(4.8960 52.3759)"
                }]
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let output = geonl()
        .args(["search", "Damrak", "--limit", "5"])
        .env("GEONL_LOCATION_SEARCH_URL", server.uri())
        .output()
        .expect("run geonl");
    assert!(output.status.success());

    let result: Value = serde_json::from_slice(&output.stdout).expect("JSON result");
    assert_eq!(result["outcome"], "succeeded");
    assert_eq!(result["features"][0]["id"], "weg-1");
    assert!(result["features"][0]["rd"]["x"].as_f64().unwrap() > 120_000.0);
}

#[test]
fn search_fails_when_upstream_is_down() {
    geonl()
        .args(["search", "Damrak"])
        .env("GEONL_LOCATION_SEARCH_URL", "http://127.0.0.1:1")
        .env("GEONL_LOCATION_SEARCH_RETRIES", "0")
        .assert()
        .failure()
        .stdout(predicate::str::contains("\"unreachable\""));
}

#[test]
fn mcp_subcommand_speaks_json_rpc() {
    let input = [
        json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}}),
        json!({"jsonrpc": "2.0", "id": 2, "method": "ping"}),
    ]
    .iter()
    .map(|message| format!("{message}\n"))
    .collect::<String>();

    let output = geonl()
        .args(["mcp", "--log-level", "warn"])
        .write_stdin(input)
        .output()
        .expect("run geonl mcp");
    assert!(output.status.success());

    let replies: Vec<Value> = String::from_utf8(output.stdout)
        .expect("utf-8 stdout")
        .lines()
        .map(|line| serde_json::from_str(line).expect("JSON line"))
        .collect();
    assert_eq!(replies.len(), 2);
    assert_eq!(replies[0]["result"]["protocolVersion"], "2024-11-05");
    assert_eq!(replies[1]["id"], 2);
}
