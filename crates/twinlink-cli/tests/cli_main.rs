//! Basic CLI tests for the twinlink command-line interface.

use std::io::{Read, Write};
use std::net::TcpListener;
use std::thread;

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::json;
use tempfile::NamedTempFile;

fn twinlink() -> Command {
    let mut cmd = Command::cargo_bin("twinlink").unwrap();
    cmd.env_remove("TWINLINK_LOG_JSON").env_remove("RUST_LOG");
    cmd
}

fn json_file(value: serde_json::Value) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{value}").unwrap();
    file
}

fn mapping_file(rate: &str, url: &str) -> NamedTempFile {
    json_file(json!({
        "models": {
            "org.apache.plc4x.examples.VirtualMachine:1.0.0": {
                "configurationProperties": [{
                    "name": "temp",
                    "type": "DOUBLE",
                    "stereotypes": [{
                        "name": "plc4x",
                        "attributes": { "address": "RANDOM/temp:REAL", "rate": rate, "url": url }
                    }]
                }]
            }
        }
    }))
}

fn thing_file() -> NamedTempFile {
    json_file(json!({
        "definition": "org.apache.plc4x.examples:VirtualMachine:1.0.0",
        "features": { "virtualmachine": { "properties": { "configuration": {} } } }
    }))
}

/// Serve one HTTP request with the given status, on a background thread.
fn http_status_server(status: u16) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = stream.read(&mut chunk).unwrap_or(0);
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buf).to_string();
            if let Some(head_end) = text.find("\r\n\r\n") {
                let content_length = text[..head_end]
                    .lines()
                    .filter_map(|l| l.split_once(':'))
                    .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
                    .and_then(|(_, v)| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if buf.len() >= head_end + 4 + content_length {
                    break;
                }
            }
        }
        let body = "internal error";
        let response = format!(
            "HTTP/1.1 {status} Error\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
            body.len()
        );
        let _ = stream.write_all(response.as_bytes());
    });
    format!("http://127.0.0.1:{port}")
}

/// Test that the CLI binary exists and shows help.
#[test]
fn test_cli_help() {
    twinlink()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Eclipse Ditto"))
        .stdout(predicate::str::contains("--namespace"))
        .stdout(predicate::str::contains("--model-name"))
        .stdout(predicate::str::contains("--model-version"))
        .stdout(predicate::str::contains("--mapping"))
        .stdout(predicate::str::contains("--ditto-endpoint"))
        .stdout(predicate::str::contains("--twin-id"))
        .stdout(predicate::str::contains("[default: org.apache.plc4x.examples]"));
}

/// Test that the CLI shows version information.
#[test]
fn test_cli_version() {
    twinlink()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("twinlink"));
}

/// Malformed arguments exit with clap's usage error code.
#[test]
fn test_malformed_arguments() {
    twinlink()
        .args(["--workers", "many"])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("Usage"));

    twinlink()
        .arg("--no-such-flag")
        .assert()
        .failure()
        .code(2);
}

/// A rejected provisioning request stops startup before polling begins.
#[test]
fn test_provisioning_failure_exits_non_zero() {
    let mapping = mapping_file("1000", "simulated://vm");
    let thing = thing_file();
    let endpoint = http_status_server(500);

    twinlink()
        .arg("--ditto-endpoint")
        .arg(&endpoint)
        .arg("--twin-id")
        .arg("abc")
        .arg("--mapping-file")
        .arg(mapping.path())
        .arg("--thing-file")
        .arg(thing.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to provision the twin"))
        .stderr(predicate::str::contains("HTTP 500"))
        .stdout(predicate::str::contains("Polling started").not());
}

/// A non-numeric rate is a fatal mapping error.
#[test]
fn test_bad_rate_exits_non_zero() {
    let mapping = mapping_file("fast", "simulated://vm");
    let thing = thing_file();

    twinlink()
        .arg("--ditto-endpoint")
        .arg("http://127.0.0.1:9")
        .arg("--mapping-file")
        .arg(mapping.path())
        .arg("--thing-file")
        .arg(thing.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to resolve the property mapping"));
}

/// A source URL without a driver is rejected at startup.
#[test]
fn test_unknown_source_scheme_exits_non_zero() {
    let mapping = mapping_file("1000", "opcua://10.0.0.1:4840");
    let thing = thing_file();

    twinlink()
        .arg("--ditto-endpoint")
        .arg("http://127.0.0.1:9")
        .arg("--mapping-file")
        .arg(mapping.path())
        .arg("--thing-file")
        .arg(thing.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("unusable source"));
}
