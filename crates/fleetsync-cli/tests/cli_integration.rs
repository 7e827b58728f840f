//! CLI integration tests.
//!
//! These run the `fleetsync` binary against a temporary configuration and
//! database. None of them reach the network.

use std::path::Path;
use std::process::{Command, Output};

use tempfile::TempDir;

fn fleetsync(config: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_fleetsync"))
        .args(args)
        .env("FLEETSYNC_CONFIG", config)
        .env_remove("FLEETSYNC_TOKEN")
        .env("NO_COLOR", "1")
        .output()
        .expect("failed to run fleetsync")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

/// A config file whose database lives in the temp dir.
fn write_config(dir: &TempDir) -> std::path::PathBuf {
    let config = dir.path().join("config.toml");
    let db = dir.path().join("data.db");
    std::fs::write(
        &config,
        format!(
            "[cloud]\nbase_url = \"http://127.0.0.1:9\"\n\n[storage]\npath = {:?}\n",
            db.display().to_string()
        ),
    )
    .unwrap();
    config
}

#[test]
fn test_help_lists_commands() {
    let dir = TempDir::new().unwrap();
    let output = fleetsync(&dir.path().join("config.toml"), &["--help"]);
    assert!(output.status.success());

    let text = stdout(&output);
    for command in ["sync", "watch", "status", "pending", "config"] {
        assert!(text.contains(command), "missing {command} in help");
    }
}

#[test]
fn test_config_path_honours_override() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("custom.toml");
    let output = fleetsync(&path, &["config", "path"]);
    assert!(output.status.success());
    assert_eq!(stdout(&output).trim(), path.display().to_string());
}

#[test]
fn test_no_color_accepts_conventional_values() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    for value in ["1", "yes", "true", "0"] {
        let output = Command::new(env!("CARGO_BIN_EXE_fleetsync"))
            .args(["config", "path"])
            .env("FLEETSYNC_CONFIG", &path)
            .env("NO_COLOR", value)
            .output()
            .expect("failed to run fleetsync");
        assert!(
            output.status.success(),
            "NO_COLOR={value}: {}",
            stderr(&output)
        );
    }
}

#[test]
fn test_config_init_then_show() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("config.toml");

    let output = fleetsync(&path, &["config", "init"]);
    assert!(output.status.success(), "{}", stderr(&output));
    assert!(path.exists());

    let again = fleetsync(&path, &["config", "init"]);
    assert!(!again.status.success());

    let show = fleetsync(&path, &["config", "show"]);
    assert!(show.status.success());
    assert!(stdout(&show).contains("[sync]"));
}

#[test]
fn test_status_on_empty_database() {
    let dir = TempDir::new().unwrap();
    let config = write_config(&dir);

    let output = fleetsync(&config, &["status"]);
    assert!(output.status.success(), "{}", stderr(&output));
    assert!(stdout(&output).contains("No sensors"));

    let json = fleetsync(&config, &["status", "--format", "json"]);
    assert!(json.status.success());
    let value: serde_json::Value = serde_json::from_str(&stdout(&json)).unwrap();
    assert_eq!(value, serde_json::json!([]));
}

#[test]
fn test_sync_without_token_fails() {
    let dir = TempDir::new().unwrap();
    let config = write_config(&dir);

    let output = fleetsync(&config, &["sync"]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("FLEETSYNC_TOKEN"));
}

#[test]
fn test_invalid_config_is_rejected() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("config.toml");
    std::fs::write(&config, "[sync]\nqueue_capacity = 0\n").unwrap();

    let output = fleetsync(&config, &["status"]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("sync.queue_capacity"));
}
