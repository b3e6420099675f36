use std::path::Path;
use std::process::{Command, Output};

fn stdiocap(config_home: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_stdiocap"))
        .args(args)
        .env("XDG_CONFIG_HOME", config_home)
        .env_remove("RUST_LOG")
        .env("NO_COLOR", "1")
        .output()
        .expect("failed to run stdiocap")
}

#[test]
fn run_captures_child_output_into_log_file() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("capture.log");

    let output = stdiocap(
        dir.path(),
        &[
            "run",
            "--log-file",
            log.to_str().unwrap(),
            "--",
            "sh",
            "-c",
            "echo hello out; echo oops >&2; exit 3",
        ],
    );
    assert_eq!(output.status.code(), Some(3));
    // Everything the child wrote went to the log, not to our pipes.
    assert!(output.stdout.is_empty(), "{:?}", String::from_utf8_lossy(&output.stdout));

    let content = std::fs::read_to_string(&log).unwrap();
    assert!(content.contains("hello out"), "{content}");
    assert!(content.contains("oops"), "{content}");
    assert!(content.contains("native.stdout"), "{content}");
    assert!(content.contains("native.stderr"), "{content}");
    assert!(content.contains("WARN"), "{content}");
}

#[test]
fn run_with_line_framing() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("lines.log");

    let output = stdiocap(
        dir.path(),
        &[
            "run",
            "--framing",
            "lines",
            "--log-file",
            log.to_str().unwrap(),
            "--",
            "sh",
            "-c",
            "printf 'first\\nsecond\\n'",
        ],
    );
    assert!(output.status.success());

    let content = std::fs::read_to_string(&log).unwrap();
    let captured: Vec<&str> = content
        .lines()
        .filter(|l| l.contains("stdiocap::capture"))
        .collect();
    assert_eq!(captured.len(), 2, "{content}");
    assert!(captured[0].contains("first"));
    assert!(captured[1].contains("second"));
}

#[test]
fn run_reports_missing_program() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("missing.log");

    let output = stdiocap(
        dir.path(),
        &["run", "--log-file", log.to_str().unwrap(), "--", "definitely-not-a-real-program-xyz"],
    );
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Failed to run"), "{stderr}");
}

#[test]
fn streams_lists_configured_tags() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("stdiocap/config.toml");
    std::fs::create_dir_all(config.parent().unwrap()).unwrap();
    std::fs::write(
        &config,
        r#"
[capture]
framing = "lines"

[[streams]]
fd = 2
tag = "engine.err"
severity = "error"
"#,
    )
    .unwrap();

    let output = stdiocap(dir.path(), &["streams"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("engine.err"), "{stdout}");
    assert!(stdout.contains("framing lines"), "{stdout}");
    assert!(!stdout.contains("native.stdout"), "{stdout}");
}

#[test]
fn streams_rejects_invalid_config() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("bad.toml");
    std::fs::write(&config, "[capture]\nbuffer_size = 1\n").unwrap();

    let output = stdiocap(dir.path(), &["streams", "--config", config.to_str().unwrap()]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("buffer_size"));
}
