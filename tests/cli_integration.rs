// CLI integration tests for write, route, stat, and mutex-name flows.
use std::io::Write;
use std::path::Path;
use std::process::{Command, Output, Stdio};

use serde_json::Value;

fn cmd() -> Command {
    let exe = env!("CARGO_BIN_EXE_appendcache");
    let mut command = Command::new(exe);
    command.env_remove("APPENDCACHE_CONFIG").env_remove("RUST_LOG");
    command
}

fn parse_json(value: &[u8]) -> Value {
    serde_json::from_str(std::str::from_utf8(value).expect("utf8")).expect("valid json")
}

fn run_with_stdin(mut command: Command, input: &str) -> Output {
    let mut child = command
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn");
    child
        .stdin
        .take()
        .expect("stdin")
        .write_all(input.as_bytes())
        .expect("write stdin");
    child.wait_with_output().expect("wait")
}

fn path_arg(path: &Path) -> &str {
    path.to_str().expect("utf8 path")
}

#[test]
fn write_appends_lines_round_robin() {
    let temp = tempfile::tempdir().expect("tempdir");
    let a = temp.path().join("a.log");
    let b = temp.path().join("nested").join("b.log");

    let output = cmd()
        .args([
            "write",
            path_arg(&a),
            path_arg(&b),
            "--line",
            "one",
            "--line",
            "two",
            "--line",
            "three",
        ])
        .output()
        .expect("write");
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let value = parse_json(&output.stdout);
    let written = value["written"].as_array().expect("written array");
    assert_eq!(written.len(), 2);
    assert_eq!(written[0]["lines"], 2);
    assert_eq!(written[0]["bytes"], 10);
    assert_eq!(written[0]["length"], 10);
    assert_eq!(written[1]["lines"], 1);
    assert_eq!(value["cache"]["stats"]["opens"], 2);
    assert_eq!(value["cache"]["stats"]["hits"], 1);

    assert_eq!(std::fs::read_to_string(&a).expect("a"), "one\nthree\n");
    assert_eq!(std::fs::read_to_string(&b).expect("b"), "two\n");
}

#[test]
fn write_reads_stdin_and_appends_to_existing_file() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("app.log");
    std::fs::write(&path, "existing\n").expect("seed");

    let mut command = cmd();
    command.args(["write", path_arg(&path)]);
    let output = run_with_stdin(command, "first\nsecond\n");
    assert!(output.status.success());

    let value = parse_json(&output.stdout);
    assert_eq!(value["written"][0]["lines"], 2);
    assert_eq!(value["written"][0]["length"], 22);
    assert_eq!(
        std::fs::read_to_string(&path).expect("read"),
        "existing\nfirst\nsecond\n"
    );
}

#[test]
fn route_evicts_least_recently_used_file() {
    let temp = tempfile::tempdir().expect("tempdir");
    let dir = temp.path().join("logs");

    let mut command = cmd();
    command.args(["--cache-size", "2", "route", path_arg(&dir)]);
    let output = run_with_stdin(command, "web\tGET /\ndb\tslow\napi\tPOST\nweb\tGET /x\n");
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let value = parse_json(&output.stdout);
    let files = value["files"].as_array().expect("files");
    let names: Vec<&str> = files
        .iter()
        .map(|file| file["name"].as_str().expect("name"))
        .collect();
    assert_eq!(names, vec!["api", "db", "web"]);
    assert_eq!(value["cache"]["size"], 2);
    assert_eq!(value["cache"]["open"], 2);
    assert_eq!(value["cache"]["stats"]["opens"], 4);
    assert_eq!(value["cache"]["stats"]["evictions"], 2);
    assert_eq!(value["archive_reopens"], 0);

    assert_eq!(
        std::fs::read_to_string(dir.join("web.log")).expect("web"),
        "GET /\nGET /x\n"
    );
    assert_eq!(std::fs::read_to_string(dir.join("db.log")).expect("db"), "slow\n");
}

#[test]
fn route_rejects_lines_without_a_target() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut command = cmd();
    command.args(["route", path_arg(temp.path())]);
    let output = run_with_stdin(command, "no tab here\n");
    assert_eq!(output.status.code(), Some(2));
    let err = parse_json(&output.stderr);
    assert_eq!(err["error"]["kind"], "Usage");
}

#[test]
fn stat_reports_missing_and_existing_files() {
    let temp = tempfile::tempdir().expect("tempdir");
    let present = temp.path().join("present.log");
    let missing = temp.path().join("missing.log");
    std::fs::write(&present, "abc").expect("seed");

    let output = cmd()
        .args(["stat", path_arg(&present), path_arg(&missing)])
        .output()
        .expect("stat");
    assert!(output.status.success());

    let value = parse_json(&output.stdout);
    assert_eq!(value["files"][0]["exists"], true);
    assert_eq!(value["files"][0]["length"], 3);
    assert!(value["files"][0]["last_write"].is_string());
    assert_eq!(value["files"][1]["exists"], false);
    assert!(value["files"][1]["length"].is_null());
    assert!(value["files"][1]["created"].is_null());
}

#[test]
fn missing_directory_without_create_dirs_is_not_found() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("absent").join("app.log");

    let output = cmd()
        .args(["--no-create-dirs", "write", path_arg(&path), "--line", "x"])
        .output()
        .expect("write");
    assert_eq!(output.status.code(), Some(3));
    let err = parse_json(&output.stderr);
    assert_eq!(err["error"]["kind"], "NotFound");
    assert!(err["error"]["hint"].is_string());
    assert!(!path.exists());
}

#[test]
fn config_file_with_unknown_field_is_usage_error() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = temp.path().join("params.json");
    std::fs::write(&config, r#"{"bogus": true}"#).expect("config");

    let output = cmd()
        .env("APPENDCACHE_CONFIG", &config)
        .args(["write", path_arg(&temp.path().join("a.log")), "--line", "x"])
        .output()
        .expect("write");
    assert_eq!(output.status.code(), Some(2));
    let err = parse_json(&output.stderr);
    assert_eq!(err["error"]["kind"], "Usage");
}

#[test]
fn mutex_name_is_bounded_and_stable() {
    let temp = tempfile::tempdir().expect("tempdir");
    let long = temp.path().join("x".repeat(200)).join("y".repeat(200)).join("app.log");

    let first = cmd()
        .args(["mutex-name", path_arg(&long)])
        .output()
        .expect("mutex-name");
    assert!(first.status.success());
    let first = parse_json(&first.stdout);
    let name = first["name"].as_str().expect("name");
    assert!(name.starts_with("acarc-"));
    assert_eq!(first["len"].as_u64(), Some(name.len() as u64));
    assert!(name.len() <= 250);

    let second = cmd()
        .args(["mutex-name", path_arg(&long)])
        .output()
        .expect("mutex-name");
    assert_eq!(parse_json(&second.stdout)["name"], name);
}

#[test]
fn version_reports_package() {
    let output = cmd().arg("version").output().expect("version");
    assert!(output.status.success());
    let value = parse_json(&output.stdout);
    assert_eq!(value["name"], "appendcache");
    assert_eq!(value["version"], env!("CARGO_PKG_VERSION"));
}

#[test]
fn unknown_flag_exits_with_usage_code() {
    let output = cmd().args(["write", "--bogus"]).output().expect("run");
    assert_eq!(output.status.code(), Some(2));
}
