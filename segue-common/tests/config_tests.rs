//! Configuration resolution and graceful degradation
//!
//! Tests that touch SEGUE_CONFIG are marked #[serial] so they never race on
//! the process environment.

use segue_common::config::{EngineConfig, CONFIG_ENV_VAR};
use segue_common::{Error, FadeCurve};
use serial_test::serial;
use std::env;
use std::io::Write;
use tempfile::{NamedTempFile, TempDir};

fn write_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
#[serial]
fn test_cli_path_wins_over_env() {
    let cli = write_config("crossfade_ms = 1000\n");
    let from_env = write_config("crossfade_ms = 3000\n");
    env::set_var(CONFIG_ENV_VAR, from_env.path());

    let config = EngineConfig::load(Some(cli.path())).unwrap();
    assert_eq!(config.crossfade_ms, 1000);

    env::remove_var(CONFIG_ENV_VAR);
}

#[test]
#[serial]
fn test_env_var_used_without_cli_path() {
    let from_env = write_config("crossfade_ms = 3000\nfade_curve = \"s_curve\"\n");
    env::set_var(CONFIG_ENV_VAR, from_env.path());

    let config = EngineConfig::load(None).unwrap();
    assert_eq!(config.crossfade_ms, 3000);
    assert_eq!(config.fade_curve, FadeCurve::SCurve);

    env::remove_var(CONFIG_ENV_VAR);
}

#[test]
#[serial]
fn test_missing_explicit_path_is_error() {
    env::remove_var(CONFIG_ENV_VAR);
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("nope.toml");

    let err = EngineConfig::load(Some(&missing)).unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

#[test]
#[serial]
fn test_invalid_file_reports_validation_error() {
    let file = write_config("crossfade_tick_ms = 0\n");
    let err = EngineConfig::load(Some(file.path())).unwrap_err();
    assert!(err.to_string().contains("crossfade_tick_ms"));
}

#[test]
fn test_round_trip_through_toml() {
    let mut config = EngineConfig::default();
    config.crossfade_ms = 750;
    config.preamp_db = -3.0;

    let text = toml::to_string(&config).unwrap();
    let back = EngineConfig::from_toml_str(&text).unwrap();
    assert_eq!(back, config);
}
