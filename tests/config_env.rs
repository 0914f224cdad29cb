use std::env;

use serial_test::serial;

use pagesync::{load_config, load_config_with_options, ConfigError, LoadOptions};

#[test]
#[serial]
fn env_overrides_beat_file_values() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pagesync.yaml");
    std::fs::write(&path, "reconciler:\n  max_urls_per_tab: 4\nbridge:\n  request_ms: 2000\n")
        .unwrap();

    env::set_var("PAGESYNC__RECONCILER__MAX_URLS_PER_TAB", "3");
    let loaded = load_config(Some(path.as_path()));
    env::remove_var("PAGESYNC__RECONCILER__MAX_URLS_PER_TAB");

    let config = loaded.unwrap();
    assert_eq!(config.reconciler.max_urls_per_tab, 3);
    assert_eq!(config.bridge.request_ms, 2000);
}

#[test]
#[serial]
fn unknown_env_paths_are_rejected() {
    env::set_var("PAGESYNC__RECONCILER__MAX_TABS", "3");
    let loaded = load_config_with_options(&LoadOptions {
        paths: Vec::new(),
        include_env: true,
    });
    env::remove_var("PAGESYNC__RECONCILER__MAX_TABS");

    match loaded {
        Err(ConfigError::UnsupportedPath(path)) => assert_eq!(path, "reconciler.max_tabs"),
        other => panic!("expected unsupported path, got {other:?}"),
    }
}

#[test]
#[serial]
fn missing_file_falls_back_to_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = load_config(Some(dir.path().join("absent.yaml").as_path())).unwrap();
    assert_eq!(config.detector.idle_check_delay_ms, 1500);
    assert_eq!(config.bridge.status_check_ms, 5000);
}
