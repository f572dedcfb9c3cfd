// Integration test for configuration file support

use foreman::config::ForemanConfig;
use foreman::runtime::SignalPolicy;
use foreman::{Foreman, ForemanError};
use nix::sys::signal::Signal;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;

#[test]
fn test_load_toml_config() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("foreman.toml");

    let toml_content = r#"
        stop_timeout_secs = 20
        shutdown_signals = ["SIGINT", "SIGTERM"]
        quit_signal = "SIGINT"
        reload_signal = "SIGUSR2"
        pid_file = "/tmp/foreman-test.pid"
        disable_banner = true
        log_level = "debug"

        [health]
        timeout_secs = 3
        initial_delay_ms = 50
        max_delay_ms = 500
    "#;

    fs::write(&config_path, toml_content).unwrap();

    let config = ForemanConfig::from_file(&config_path).unwrap();
    assert_eq!(config.stop_timeout(), Duration::from_secs(20));
    assert_eq!(config.pid_file, Some(PathBuf::from("/tmp/foreman-test.pid")));
    assert!(config.disable_banner);
    assert_eq!(config.log_level, "debug");

    let policy = SignalPolicy::from_config(&config).unwrap();
    assert_eq!(policy.quit, Signal::SIGINT);
    assert_eq!(policy.reload, Signal::SIGUSR2);
    assert!(!policy.is_trigger(Signal::SIGQUIT));

    let retry = config.health_retry_policy();
    assert_eq!(retry.timeout, Duration::from_secs(3));
    assert_eq!(retry.initial_delay, Duration::from_millis(50));
}

#[test]
fn test_load_json_config() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("foreman.json");

    let json_content = r#"
        {
            "stop_timeout_secs": 5,
            "health": { "max_attempts": 10 }
        }
    "#;

    fs::write(&config_path, json_content).unwrap();

    let config = ForemanConfig::from_file(&config_path).unwrap();
    assert_eq!(config.stop_timeout_secs, 5);
    assert_eq!(config.health.max_attempts, Some(10));
    assert_eq!(config.reload_signal, "SIGHUP");
}

#[test]
fn test_invalid_config_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("foreman.toml");

    fs::write(
        &config_path,
        "quit_signal = \"SIGHUP\"\nreload_signal = \"SIGHUP\"\n",
    )
    .unwrap();

    let result = ForemanConfig::from_file(&config_path);
    assert!(matches!(result, Err(ForemanError::ConfigValidationError(_))));
}

#[test]
fn test_malformed_toml_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("foreman.toml");

    fs::write(&config_path, "stop_timeout_secs = \"ten\"").unwrap();

    let result = ForemanConfig::from_file(&config_path);
    assert!(matches!(result, Err(ForemanError::InvalidConfig(_))));
}

#[test]
fn test_builder_applies_config() {
    let config = ForemanConfig {
        stop_timeout_secs: 42,
        ..Default::default()
    };

    let foreman = Foreman::builder().config(config).build().unwrap();
    assert_eq!(foreman.stop_timeout(), Duration::from_secs(42));
    assert!(foreman.components().is_empty());
}

#[test]
fn test_builder_rejects_invalid_config() {
    let config = ForemanConfig {
        shutdown_signals: vec!["SIGBOGUS".to_string()],
        ..Default::default()
    };

    assert!(Foreman::builder().config(config).build().is_err());
}
