//! CLI tests for the `ss` binary

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

fn ss(home: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("ss").expect("ss binary");
    cmd.current_dir(home.path())
        .env("HOME", home.path())
        .env("XDG_DATA_HOME", home.path().join("data"))
        .env("XDG_CONFIG_HOME", home.path().join("config"));
    cmd
}

#[test]
fn test_demo_prints_document() {
    let home = TempDir::new().unwrap();
    ss(&home)
        .arg("demo")
        .assert()
        .success()
        .stdout(predicate::str::contains(r#"<p id="a">1</p><p id="b">2</p>"#))
        .stdout(predicate::str::contains("__NEXT_DATA_PROMISE__"))
        .stdout(predicate::str::contains("__REMIX_HEAD_VALUE__"));
}

#[test]
fn test_demo_client_fetches_nothing() {
    let home = TempDir::new().unwrap();
    ss(&home)
        .args(["demo", "--client"])
        .assert()
        .success()
        .stdout(predicate::str::contains("fetches: 0"));
}

#[test]
fn test_inspect_rendered_page() {
    let home = TempDir::new().unwrap();
    let page = home.path().join("page.html");
    fs::write(
        &page,
        r#"<script id="__NEXT_DATA_PROMISE__" type="application/json">{"A":{"data":1,"isLoading":false},"C":{"error":"boom","isLoading":false}}</script>"#,
    )
    .unwrap();
    ss(&home)
        .arg("inspect")
        .arg(&page)
        .assert()
        .success()
        .stdout(predicate::str::contains("boom"))
        .stdout(predicate::str::contains("no head payload"));
}

#[test]
fn test_inspect_missing_file_fails() {
    let home = TempDir::new().unwrap();
    ss(&home)
        .args(["inspect", "does-not-exist.html"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read"));
}

#[test]
fn test_config_overrides_anchor() {
    let home = TempDir::new().unwrap();
    let config = home.path().join("custom.yml");
    fs::write(&config, "hydration:\n  data-anchor: __CUSTOM_DATA__\n").unwrap();
    ss(&home)
        .arg("--config")
        .arg(&config)
        .arg("demo")
        .assert()
        .success()
        .stdout(predicate::str::contains("__CUSTOM_DATA__"))
        .stdout(predicate::str::contains("__NEXT_DATA_PROMISE__").not());
}

#[test]
fn test_local_config_file_is_picked_up() {
    let home = TempDir::new().unwrap();
    fs::write(home.path().join(".ssrsync.yml"), "hydration:\n  head-anchor: __LOCAL_HEAD__\n").unwrap();
    ss(&home)
        .arg("demo")
        .assert()
        .success()
        .stdout(predicate::str::contains("__LOCAL_HEAD__"));
}
