mod common;

use common::{FlasherProcess, fixture, stderr, stdout};
use tempfile::TempDir;

// ============================================================================
// version command
// ============================================================================

#[test]
fn version_human() {
    let output = FlasherProcess::spawn_command(&["version"]);
    assert!(
        output.status.success(),
        "version should exit 0: {}",
        stderr(&output)
    );

    let out = stdout(&output);
    assert!(out.starts_with("flasher "), "unexpected version output: {out}");
    assert!(
        out.contains(env!("CARGO_PKG_VERSION")),
        "version output should contain the package version: {out}"
    );
}

#[test]
fn version_json() {
    let output = FlasherProcess::spawn_command(&["version", "--format", "json"]);
    assert!(output.status.success(), "{}", stderr(&output));

    let parsed: serde_json::Value =
        serde_json::from_str(&stdout(&output)).expect("version JSON should be valid");
    assert_eq!(parsed["name"], "flasher");
    assert_eq!(parsed["version"], env!("CARGO_PKG_VERSION"));
    assert!(parsed.get("target").is_some());
}

// ============================================================================
// completions command
// ============================================================================

#[test]
fn completions_bash() {
    let output = FlasherProcess::spawn_command(&["completions", "bash"]);
    assert!(output.status.success(), "{}", stderr(&output));
    let out = stdout(&output);
    assert!(out.contains("flasher"), "bash completions should reference flasher");
    assert!(out.contains("patterns"), "completions should list subcommands");
}

#[test]
fn completions_zsh() {
    let output = FlasherProcess::spawn_command(&["completions", "zsh"]);
    assert!(output.status.success(), "{}", stderr(&output));
    assert!(stdout(&output).contains("#compdef flasher"));
}

#[test]
fn completions_unknown_shell_is_usage_error() {
    let output = FlasherProcess::spawn_command(&["completions", "tcsh"]);
    assert_eq!(output.status.code(), Some(2));
}

// ============================================================================
// patterns command
// ============================================================================

#[test]
fn patterns_list_json_includes_builtins_and_user_files() {
    let dir = TempDir::new().unwrap();
    std::fs::copy(fixture("strobe.yaml"), dir.path().join("strobe.yaml")).unwrap();
    std::fs::copy(fixture("overdrive.json"), dir.path().join("overdrive.json")).unwrap();

    let output = FlasherProcess::spawn_command(&[
        "patterns",
        "list",
        "--dir",
        dir.path().to_str().unwrap(),
        "--format",
        "json",
    ]);
    assert!(output.status.success(), "{}", stderr(&output));

    let entries: Vec<serde_json::Value> = serde_json::from_str(&stdout(&output)).unwrap();
    let keys: Vec<&str> = entries.iter().filter_map(|e| e["key"].as_str()).collect();
    assert_eq!(
        keys,
        ["AGC_LOCK", "DAZZLE", "FLICKER", "PTZ_JAM", "SATURATION", "STROBE"],
        "invalid user files are skipped, valid ones join the built-ins"
    );

    let agc = &entries[0];
    assert_eq!(agc["steps"], 9);
    assert_eq!(agc["repeat"], 1);

    let strobe = &entries[5];
    assert_eq!(strobe["name"], "Lobby Strobe");
    assert_eq!(strobe["repeat"], 2);
    assert_eq!(strobe["nominal_duration_ms"], 660);
}

#[test]
fn patterns_list_creates_missing_directory() {
    let dir = TempDir::new().unwrap();
    let patterns = dir.path().join("user_attacks");

    let output = FlasherProcess::spawn_command(&[
        "patterns",
        "list",
        "--dir",
        patterns.to_str().unwrap(),
    ]);
    assert!(output.status.success(), "{}", stderr(&output));
    assert!(patterns.is_dir());
    assert!(stdout(&output).contains("Attack Patterns (5 available)"));
}

#[test]
fn patterns_show_is_case_insensitive() {
    let dir = TempDir::new().unwrap();
    let output = FlasherProcess::spawn_command(&[
        "patterns",
        "show",
        "dazzle",
        "--dir",
        dir.path().to_str().unwrap(),
    ]);
    assert!(output.status.success(), "{}", stderr(&output));

    let pattern: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(pattern["name"], "Face Dazzle");
    assert_eq!(pattern["repeat"], 5);
    assert_eq!(pattern["sequence"][0]["group"], 1);
    assert_eq!(pattern["sequence"][0]["intensity"], 255);
    assert_eq!(pattern["sequence"][0]["duration_ms"], 3000);
}

#[test]
fn patterns_show_unknown_suggests_and_exits_pattern_error() {
    let dir = TempDir::new().unwrap();
    let output = FlasherProcess::spawn_command(&[
        "patterns",
        "show",
        "AGC_LOK",
        "--dir",
        dir.path().to_str().unwrap(),
    ]);
    assert_eq!(output.status.code(), Some(5), "{}", stderr(&output));
    assert!(
        stderr(&output).contains("did you mean 'AGC_LOCK'"),
        "stderr: {}",
        stderr(&output)
    );
}

#[test]
fn patterns_validate_reports_each_file() {
    let good = fixture("strobe.yaml");
    let output = FlasherProcess::spawn_command(&["patterns", "validate", good.to_str().unwrap()]);
    assert!(output.status.success(), "{}", stderr(&output));
    assert!(stdout(&output).contains("STROBE, 6 phases per target"));

    let bad = fixture("overdrive.json");
    let empty = fixture("empty_sequence.json");
    let output = FlasherProcess::spawn_command(&[
        "patterns",
        "validate",
        good.to_str().unwrap(),
        bad.to_str().unwrap(),
        empty.to_str().unwrap(),
    ]);
    assert_eq!(output.status.code(), Some(5));
    let out = stdout(&output);
    assert!(out.contains("ok "), "{out}");
    assert!(out.contains("intensity 300 is outside 0-255"), "{out}");
    assert!(out.contains("at least one step"), "{out}");
}

#[test]
fn patterns_validate_missing_file_is_io_error() {
    let output = FlasherProcess::spawn_command(&["patterns", "validate", "/nonexistent/p.yaml"]);
    assert_eq!(output.status.code(), Some(3));
}

// ============================================================================
// run command (failure paths; no hardware required)
// ============================================================================

#[test]
fn run_missing_config_is_config_error() {
    let dir = TempDir::new().unwrap();
    let output = FlasherProcess::spawn_command(&[
        "run",
        "--config",
        "/nonexistent/run.yaml",
        "--patterns-dir",
        dir.path().to_str().unwrap(),
    ]);
    assert_eq!(output.status.code(), Some(2), "{}", stderr(&output));
    assert!(stderr(&output).contains("file not found"));
}

#[test]
fn run_out_of_range_config_is_config_error() {
    let dir = TempDir::new().unwrap();
    let config = fixture("bad_run.yaml");
    let output = FlasherProcess::spawn_command(&[
        "run",
        "--config",
        config.to_str().unwrap(),
        "--patterns-dir",
        dir.path().to_str().unwrap(),
    ]);
    assert_eq!(output.status.code(), Some(2), "{}", stderr(&output));
    assert!(stderr(&output).contains("jitter_range"));
}

#[test]
fn run_jitter_flag_is_validated() {
    let dir = TempDir::new().unwrap();
    let output = FlasherProcess::spawn_command(&[
        "run",
        "--jitter",
        "1.0",
        "--patterns-dir",
        dir.path().to_str().unwrap(),
    ]);
    assert_eq!(output.status.code(), Some(2), "{}", stderr(&output));
}

#[test]
fn run_unknown_pattern_fails_before_connecting() {
    let dir = TempDir::new().unwrap();
    let output = FlasherProcess::spawn_command(&[
        "run",
        "--pattern",
        "FLICKR",
        "--port",
        "/dev/flasher-test-missing",
        "--patterns-dir",
        dir.path().to_str().unwrap(),
    ]);
    assert_eq!(output.status.code(), Some(5), "{}", stderr(&output));
    assert!(stderr(&output).contains("did you mean 'FLICKER'"));
}

#[test]
fn run_unopenable_port_is_connection_error() {
    let dir = TempDir::new().unwrap();
    let output = FlasherProcess::spawn_command(&[
        "run",
        "--port",
        "/dev/flasher-test-missing",
        "--target",
        "CAM1",
        "--arm",
        "--settle",
        "10ms",
        "--patterns-dir",
        dir.path().to_str().unwrap(),
    ]);
    assert_eq!(output.status.code(), Some(4), "{}", stderr(&output));
    assert!(stderr(&output).contains("could not connect to /dev/flasher-test-missing"));
}
