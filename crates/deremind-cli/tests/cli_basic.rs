//! Basic CLI E2E tests.
//!
//! Tests run the built binary against a temporary home directory and verify
//! outputs.

use std::path::Path;
use std::process::Command;

/// Run a CLI command and return output.
fn run_cli(home: &Path, args: &[&str]) -> (i32, String, String) {
    let output = Command::new(env!("CARGO_BIN_EXE_deremind-cli"))
        .args(args)
        .env("HOME", home)
        .env_remove("DEREMIND_ENV")
        .env("RUST_LOG", "warn")
        .output()
        .expect("Failed to execute CLI command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let code = output.status.code().unwrap_or(-1);

    (code, stdout, stderr)
}

fn listed(home: &Path, args: &[&str]) -> Vec<serde_json::Value> {
    let (code, stdout, _) = run_cli(home, args);
    assert_eq!(code, 0, "list failed");
    serde_json::from_str::<serde_json::Value>(&stdout)
        .unwrap()
        .as_array()
        .unwrap()
        .clone()
}

#[test]
fn test_reminder_add_and_list() {
    let home = tempfile::TempDir::new().unwrap();
    let (code, stdout, _) = run_cli(home.path(), &["reminder", "add", "Water plants", "--in", "30"]);
    assert_eq!(code, 0, "reminder add failed");
    assert!(stdout.contains("Reminder created:"));

    let reminders = listed(home.path(), &["reminder", "list", "--json"]);
    assert_eq!(reminders.len(), 1);
    assert_eq!(reminders[0]["title"], "Water plants");
    assert_eq!(reminders[0]["is_repeating"], false);
}

#[test]
fn test_reminder_add_repeating() {
    let home = tempfile::TempDir::new().unwrap();
    let (code, _, _) = run_cli(
        home.path(),
        &["reminder", "add", "Stand up", "--at", "2030-01-01T09:00:00Z", "--every", "60"],
    );
    assert_eq!(code, 0);

    let reminders = listed(home.path(), &["reminder", "list", "--json"]);
    assert_eq!(reminders[0]["repeat_interval"], 3_600_000);
}

#[test]
fn test_reminder_add_rejects_bad_input() {
    let home = tempfile::TempDir::new().unwrap();
    let (code, _, stderr) = run_cli(home.path(), &["reminder", "add", " ", "--in", "5"]);
    assert_eq!(code, 1);
    assert!(stderr.contains("error:"));

    let (code, _, _) = run_cli(home.path(), &["reminder", "add", "Tea", "--at", "soon"]);
    assert_eq!(code, 1);

    let (code, _, stderr) = run_cli(
        home.path(),
        &["reminder", "add", "Tea", "--in", "9223372036854775807"],
    );
    assert_eq!(code, 1);
    assert!(stderr.contains("out of range"));

    let (code, _, stderr) = run_cli(
        home.path(),
        &["reminder", "add", "Tea", "--in", "5", "--every", "9223372036854775807"],
    );
    assert_eq!(code, 1);
    assert!(stderr.contains("out of range"));
}

#[test]
fn test_reminder_complete_and_delete() {
    let home = tempfile::TempDir::new().unwrap();
    run_cli(home.path(), &["reminder", "add", "Pay rent", "--in", "10"]);
    let id = listed(home.path(), &["reminder", "list", "--json"])[0]["id"]
        .as_i64()
        .unwrap()
        .to_string();

    let (code, stdout, _) = run_cli(home.path(), &["reminder", "complete", &id]);
    assert_eq!(code, 0);
    assert!(stdout.contains("Reminder completed:"));
    assert!(listed(home.path(), &["reminder", "list", "--json"]).is_empty());
    assert_eq!(listed(home.path(), &["reminder", "list", "--all", "--json"]).len(), 1);

    let (code, stdout, _) = run_cli(home.path(), &["reminder", "delete", &id]);
    assert_eq!(code, 0);
    assert!(stdout.contains("Reminder deleted:"));
    assert!(listed(home.path(), &["reminder", "list", "--all", "--json"]).is_empty());
}

#[test]
fn test_config_get_set_reset() {
    let home = tempfile::TempDir::new().unwrap();
    let (code, stdout, _) = run_cli(home.path(), &["config", "get", "batch_size"]);
    assert_eq!(code, 0);
    assert_eq!(stdout.trim(), "100");

    let (code, _, _) = run_cli(home.path(), &["config", "set", "batch_size", "25"]);
    assert_eq!(code, 0);
    let (_, stdout, _) = run_cli(home.path(), &["config", "get", "batch_size"]);
    assert_eq!(stdout.trim(), "25");

    let (code, _, _) = run_cli(home.path(), &["config", "set", "batch_size", "0"]);
    assert_eq!(code, 1);

    let (code, _, _) = run_cli(home.path(), &["config", "reset"]);
    assert_eq!(code, 0);
    let (_, stdout, _) = run_cli(home.path(), &["config", "get", "batch_size"]);
    assert_eq!(stdout.trim(), "100");
}

#[test]
fn test_config_get_unknown_key() {
    let home = tempfile::TempDir::new().unwrap();
    let (code, _, stderr) = run_cli(home.path(), &["config", "get", "nope"]);
    assert_eq!(code, 1);
    assert!(stderr.contains("unknown key"));
}
