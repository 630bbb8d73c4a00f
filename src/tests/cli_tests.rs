//! Argument parsing and the config file the binary starts from.

use crate::parse_args;
use flood_watch_lib::config::{Config, DEFAULT_CONFIG_PATH};
use std::fs;
use std::path::PathBuf;
use tempfile::tempdir;

fn args(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

#[test]
fn no_arguments_uses_defaults() {
    let parsed = parse_args(args(&[])).unwrap();
    assert_eq!(parsed.config, PathBuf::from(DEFAULT_CONFIG_PATH));
    assert!(!parsed.once && !parsed.json && !parsed.rain && !parsed.reading_only);
}

#[test]
fn flags_are_recognized() {
    let parsed = parse_args(args(&["--once", "--json", "--rain", "--config", "/tmp/fw.toml"])).unwrap();
    assert!(parsed.once);
    assert!(parsed.json);
    assert!(parsed.rain);
    assert_eq!(parsed.config, PathBuf::from("/tmp/fw.toml"));
}

#[test]
fn config_flag_without_path_is_rejected() {
    assert!(parse_args(args(&["--config"])).is_err());
}

#[test]
fn unknown_flag_is_rejected() {
    let err = parse_args(args(&["--verbose"])).unwrap_err();
    assert!(err.to_string().contains("--verbose"));
}

#[test]
fn config_file_selects_profile_and_interval() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("flood-watch.toml");
    fs::write(
        &path,
        r#"
[calibration]
preset = "piecewise-2pt"

[poll]
interval_secs = 60
rain_advisory = true
"#,
    )
    .unwrap();

    let config = Config::load_from_path(&path).unwrap();
    let engine = config.engine().unwrap();
    assert_eq!(engine.profile.name, "piecewise-2pt");
    assert_eq!(engine.zones.len(), 3);
    assert_eq!(config.poll_interval().as_secs(), 60);
    assert!(config.poll_settings().rain_advisory);
}

#[test]
fn bad_threshold_in_config_fails_startup() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("flood-watch.toml");
    fs::write(
        &path,
        r#"
[[zones]]
name = "Manzanita (Hwy 1)"
closure_level = 7.2
warning_level = 7.5
"#,
    )
    .unwrap();

    assert!(Config::load_from_path(&path).is_err());
}
