//! End-to-end tests against the `bartleby` binary itself, not the library.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn bartleby() -> Command {
    Command::cargo_bin("bartleby").expect("bartleby binary builds")
}

#[test]
fn init_writes_config_and_graph_file_into_an_empty_directory() {
    let dir = TempDir::new().unwrap();

    bartleby()
        .current_dir(dir.path())
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("wrote .bartleby.yml"))
        .stdout(predicate::str::contains("bartleby.graph.puml"));

    assert!(dir.path().join(".bartleby.yml").exists());
    assert!(dir.path().join("bartleby.graph.puml").exists());
}

#[test]
fn init_run_twice_leaves_existing_files_untouched() {
    let dir = TempDir::new().unwrap();
    bartleby().current_dir(dir.path()).arg("init").assert().success();

    bartleby()
        .current_dir(dir.path())
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("already exists, leaving it untouched"));
}

#[test]
fn items_list_on_a_freshly_initialised_store_is_empty() {
    let dir = TempDir::new().unwrap();
    bartleby().current_dir(dir.path()).arg("init").assert().success();

    bartleby().current_dir(dir.path()).args(["items", "list"]).assert().success().stdout(predicate::str::is_empty());
}

#[test]
fn graph_show_on_an_empty_graph_reports_no_ready_or_blocked_items() {
    let dir = TempDir::new().unwrap();
    bartleby().current_dir(dir.path()).arg("init").assert().success();

    bartleby()
        .current_dir(dir.path())
        .args(["graph", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("ready:"))
        .stdout(predicate::str::contains("blocked:"));
}

#[test]
fn items_show_on_an_unknown_id_fails() {
    let dir = TempDir::new().unwrap();
    bartleby().current_dir(dir.path()).arg("init").assert().success();

    bartleby().current_dir(dir.path()).args(["items", "show", "no-such-item"]).assert().failure();
}
