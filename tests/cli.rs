use std::path::{Path, PathBuf};

use predicates::prelude::*;

fn write_config(dir: &Path) -> PathBuf {
    let config = dir.join("reviewdigest.yaml");
    let yaml = format!(
        "store:\n  backend: local\n  data_dir: {}\nfreshness:\n  cooldown_days: 7\n",
        dir.join("data").display()
    );
    std::fs::write(&config, yaml).expect("write config");
    config
}

fn cmd(config: &Path) -> assert_cmd::Command {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("reviewdigest");
    cmd.env_remove("REVIEWDIGEST_CONFIG")
        .env_remove("REVIEWDIGEST_STORE")
        .env_remove("REVIEWDIGEST_DATA_DIR")
        .arg("--config")
        .arg(config);
    cmd
}

#[test]
fn reviews_for_unknown_subject_is_an_empty_list() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());
    cmd(&config)
        .args(["reviews", "--subject", "Example Bistro"])
        .assert()
        .success()
        .stdout(predicate::str::diff("[]\n"));
}

#[test]
fn check_reports_never_analyzed_subject_as_due() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());
    cmd(&config)
        .args(["check", "--subject", "  Example Bistro "])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""due": true"#))
        .stdout(predicate::str::contains(r#""subject": "Example Bistro""#));
}

#[test]
fn analysis_for_unknown_subject_fails() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());
    cmd(&config)
        .args(["analysis", "--subject", "Example Bistro"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no analysis stored for Example Bistro"));
}

#[test]
fn blank_subject_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());
    cmd(&config)
        .args(["check", "--subject", "   "])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--subject must not be empty"));
}

#[test]
fn missing_config_file_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    cmd(&dir.path().join("absent.yaml"))
        .args(["reviews", "--subject", "Example Bistro"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("load config"));
}

#[test]
fn rust_log_debug_emits_parsed_cli_to_stderr() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());
    cmd(&config)
        .env("RUST_LOG", "debug")
        .args(["reviews", "--subject", "Example Bistro"])
        .assert()
        .success()
        .stderr(predicate::str::contains("parsed cli"));
}
