//! End-to-end scenarios across the store, runner and orchestrator

use mesh_common::command_exec::ScriptedRunner;
use mesh_common::maintenance::{STEP_INSTALL, STEP_LOCATE, STEP_SYSTEM_UPDATE, STEP_VERIFY};
use mesh_common::wizard::Editor;
use mesh_common::{
    CommandRunner, CommandSpec, ConfigStore, FailureReason, Orchestrator, ScriptedPrompter,
    Session, Settings, SystemRunner, FIXED_SECTIONS,
};
use std::fs;
use std::time::{Duration, Instant};

fn isolated_settings() -> Settings {
    let mut settings = Settings::default();
    settings.repository.candidate_dirs = Vec::new();
    settings.repository.search_roots = Vec::new();
    settings
}

#[test]
fn serial_port_survives_save_and_reload() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.ini");

    let mut store = ConfigStore::new();
    store.set("interface", "type", "serial").unwrap();
    store.set("interface", "port", "/dev/ttyUSB0").unwrap();
    store.save(&path).unwrap();

    let reloaded = ConfigStore::load(&path).unwrap();
    assert_eq!(reloaded.get("interface", "port"), Some("/dev/ttyUSB0"));
    assert_eq!(reloaded, store);
    for name in FIXED_SECTIONS {
        assert!(reloaded.has_section(name), "missing [{}]", name);
    }
}

#[test]
fn missing_binary_reports_not_found() {
    let runner = SystemRunner::unprivileged();
    let result = runner.run(&CommandSpec::new(["nonexistent-binary-xyz"]).capture());
    assert_eq!(result.exit_code, -1);
    assert_eq!(result.failure, FailureReason::NotFound);
}

#[test]
fn long_running_command_times_out() {
    let runner = SystemRunner::unprivileged();
    let start = Instant::now();
    let result = runner.run(
        &CommandSpec::new(["sleep", "30"])
            .timeout(Duration::from_millis(300))
            .capture(),
    );
    assert_eq!(result.failure, FailureReason::Timeout);
    assert_eq!(result.exit_code, -1);
    assert!(start.elapsed() < Duration::from_secs(5));
}

#[test]
fn full_maintenance_survives_update_and_locate_failures() {
    let dir = tempfile::tempdir().unwrap();
    let settings = isolated_settings();
    let runner = ScriptedRunner::new()
        .fail(&["update"], 100, "Temporary failure resolving 'deb.debian.org'")
        .fail(&["upgrade"], 100, "Temporary failure resolving 'deb.debian.org'");
    // "Skip" when asked how to find the checkout
    let prompter = ScriptedPrompter::new(["3"]);
    let orchestrator = Orchestrator::new(&settings, &runner, &prompter);

    let mut session = Session::new(dir.path().join("config.ini"), ConfigStore::new());
    let run = orchestrator.full_maintenance(&mut session);

    let failed: Vec<&str> = run.failures().iter().map(|f| f.name.as_str()).collect();
    assert_eq!(failed, vec![STEP_SYSTEM_UPDATE, STEP_LOCATE]);
    assert!(run.entry(STEP_INSTALL).is_none());
    assert!(run.entry(STEP_VERIFY).is_none());
    assert!(!run.succeeded());
    assert!(session.checkout.is_none());
    assert_eq!(runner.count(&["pip"]), 0);
    assert_eq!(runner.count(&["py_compile"]), 0);
}

#[test]
fn wizard_edit_then_deploy() {
    let config_dir = tempfile::tempdir().unwrap();
    let checkout = tempfile::tempdir().unwrap();
    let settings = isolated_settings();
    let runner = ScriptedRunner::new();

    let mut session = Session::new(config_dir.path().join("config.ini"), ConfigStore::new())
        .with_checkout(Some(checkout.path().to_path_buf()));

    let prompter = ScriptedPrompter::new(["2", "meshnode.local"]);
    Editor::Interface.run(&mut session, &prompter).unwrap();
    session.save().unwrap();

    let orchestrator = Orchestrator::new(&settings, &runner, &prompter);
    let run = orchestrator.deploy(&mut session);
    assert!(run.succeeded(), "{}", run.summary());

    let deployed = fs::read_to_string(checkout.path().join("config.ini")).unwrap();
    assert!(deployed.contains("hostname = meshnode.local"));
}
