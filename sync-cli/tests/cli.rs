//! Drive the `linkmirror` binary end to end.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;

fn linkmirror(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("linkmirror").unwrap();
    cmd.current_dir(dir).env_remove("RUST_LOG");
    cmd
}

/// Config with one task `media` mirroring `in/` to `out/`.
fn write_config(dir: &Path) {
    fs::create_dir_all(dir.join("in")).unwrap();
    let config = format!(
        r#"
[engine]
watcher = "poll"
workers = 2

[cache]
dir = "{root}/cache"

[logging]
dir = "{root}/logs"
level = "warn"

[[tasks]]
id = "media"
name = "Media"
input_dir = "{root}/in"
output_dir = "{root}/out"
extensions = ["jpg"]
"#,
        root = dir.display()
    );
    fs::write(dir.join("linkmirror.toml"), config).unwrap();
}

#[test]
fn help_lists_commands() {
    let dir = tempfile::tempdir().unwrap();
    linkmirror(dir.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("sync"))
        .stdout(predicate::str::contains("status"))
        .stdout(predicate::str::contains("logs"));
}

#[test]
fn init_then_refuse_overwrite() {
    let dir = tempfile::tempdir().unwrap();
    linkmirror(dir.path())
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration written"));
    assert!(dir.path().join("linkmirror.toml").is_file());

    linkmirror(dir.path())
        .arg("init")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--force"));
}

#[test]
fn missing_config_fails() {
    let dir = tempfile::tempdir().unwrap();
    linkmirror(dir.path())
        .arg("status")
        .assert()
        .failure()
        .stderr(predicate::str::contains("linkmirror init"));
}

#[cfg(unix)]
#[test]
fn sync_mirrors_and_logs() {
    let dir = tempfile::tempdir().unwrap();
    write_config(dir.path());
    fs::write(dir.path().join("in/a.jpg"), b"jpeg bytes").unwrap();
    fs::write(dir.path().join("in/a.nfo"), b"nfo").unwrap();

    linkmirror(dir.path())
        .args(["sync", "media"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Copied:       1"))
        .stdout(predicate::str::contains("Linked:       1"));

    assert_eq!(fs::read(dir.path().join("out/a.jpg")).unwrap(), b"jpeg bytes");
    let link = fs::read_link(dir.path().join("out/a.nfo")).unwrap();
    assert!(link.ends_with("in/a.nfo"));
    assert!(dir.path().join("cache/media.json").is_file());

    linkmirror(dir.path())
        .args(["logs", "media"])
        .assert()
        .success()
        .stdout(predicate::str::contains(" - INFO - Copied a.jpg"))
        .stdout(predicate::str::contains(" - INFO - Linked a.nfo"));

    linkmirror(dir.path())
        .args(["logs", "media", "--list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("file_sync_media_"));

    linkmirror(dir.path())
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("[media] Media"))
        .stdout(predicate::str::contains("2 entries"));

    // Second run is a no-op.
    linkmirror(dir.path())
        .args(["sync", "media"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Unchanged:    2"));
}

#[test]
fn unknown_task_fails() {
    let dir = tempfile::tempdir().unwrap();
    write_config(dir.path());
    linkmirror(dir.path())
        .args(["sync", "nope"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn logs_for_empty_day() {
    let dir = tempfile::tempdir().unwrap();
    write_config(dir.path());
    linkmirror(dir.path())
        .args(["logs", "media", "--date", "2020-01-01"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No log for task media on 2020-01-01"));

    linkmirror(dir.path())
        .args(["logs", "media", "--date", "yesterday"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("YYYY-MM-DD"));
}
