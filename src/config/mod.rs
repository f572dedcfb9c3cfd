use crate::error::{ForemanError, Result};
use crate::retry::RetryPolicy;
use nix::sys::signal::Signal;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Orchestrator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForemanConfig {
    /// Time allowed for the stop procedure before exit proceeds anyway (in seconds)
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_secs: u64,

    /// Signals that start a shutdown
    #[serde(default = "default_shutdown_signals")]
    pub shutdown_signals: Vec<String>,

    /// Shutdown signal that skips draining (forced stop)
    #[serde(default = "default_quit_signal")]
    pub quit_signal: String,

    /// Signal that starts a zero-downtime reload
    #[serde(default = "default_reload_signal")]
    pub reload_signal: String,

    /// Health polling of ordered servers
    #[serde(default)]
    pub health: HealthCheckConfig,

    /// Optional PID file, kept pointing at the serving process
    #[serde(default)]
    pub pid_file: Option<PathBuf>,

    /// Skip the startup banner
    #[serde(default)]
    pub disable_banner: bool,

    /// Default log level when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Retry budget for ordered-server health checks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    /// Give up after this long (in seconds)
    #[serde(default = "default_health_timeout")]
    pub timeout_secs: u64,

    /// First backoff delay (in milliseconds)
    #[serde(default = "default_health_initial_delay")]
    pub initial_delay_ms: u64,

    /// Backoff cap (in milliseconds)
    #[serde(default = "default_health_max_delay")]
    pub max_delay_ms: u64,

    /// Optional cap on probe attempts
    #[serde(default)]
    pub max_attempts: Option<usize>,
}

// Default value functions for serde
fn default_stop_timeout() -> u64 {
    10
}

fn default_shutdown_signals() -> Vec<String> {
    vec![
        "SIGQUIT".to_string(),
        "SIGINT".to_string(),
        "SIGTERM".to_string(),
    ]
}

fn default_quit_signal() -> String {
    "SIGQUIT".to_string()
}

fn default_reload_signal() -> String {
    "SIGHUP".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_health_timeout() -> u64 {
    10
}

fn default_health_initial_delay() -> u64 {
    10
}

fn default_health_max_delay() -> u64 {
    1000
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_health_timeout(),
            initial_delay_ms: default_health_initial_delay(),
            max_delay_ms: default_health_max_delay(),
            max_attempts: None,
        }
    }
}

impl Default for ForemanConfig {
    fn default() -> Self {
        Self {
            stop_timeout_secs: default_stop_timeout(),
            shutdown_signals: default_shutdown_signals(),
            quit_signal: default_quit_signal(),
            reload_signal: default_reload_signal(),
            health: HealthCheckConfig::default(),
            pid_file: None,
            disable_banner: false,
            log_level: default_log_level(),
        }
    }
}

impl ForemanConfig {
    /// Load configuration from a file (supports TOML and JSON)
    pub fn from_file(path: &Path) -> Result<ForemanConfig> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ForemanError::ConfigError(format!("Failed to read config file: {}", e)))?;

        let extension = path.extension().and_then(|s| s.to_str()).unwrap_or("");

        let mut config = match extension {
            "toml" => Self::parse_toml(&contents)?,
            "json" => Self::parse_json(&contents)?,
            _ => {
                return Err(ForemanError::InvalidConfig(format!(
                    "Unsupported file format: {}. Use .toml or .json",
                    extension
                )))
            }
        };

        config.expand_env_vars();
        config.validate()?;

        Ok(config)
    }

    /// Parse a TOML document; settings may sit at the top level or under `[foreman]`
    fn parse_toml(contents: &str) -> Result<ForemanConfig> {
        #[derive(Deserialize)]
        struct ConfigFile {
            foreman: Option<ForemanConfig>,
            #[serde(flatten)]
            top_level: ForemanConfig,
        }

        let file: ConfigFile = toml::from_str(contents)
            .map_err(|e| ForemanError::InvalidConfig(format!("Failed to parse TOML: {}", e)))?;

        Ok(file.foreman.unwrap_or(file.top_level))
    }

    fn parse_json(contents: &str) -> Result<ForemanConfig> {
        serde_json::from_str(contents)
            .map_err(|e| ForemanError::InvalidConfig(format!("Failed to parse JSON: {}", e)))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.stop_timeout_secs == 0 {
            return Err(ForemanError::ConfigValidationError(
                "stop_timeout_secs must be at least 1".to_string(),
            ));
        }

        if self.shutdown_signals.is_empty() {
            return Err(ForemanError::ConfigValidationError(
                "shutdown_signals must not be empty".to_string(),
            ));
        }

        let shutdown = self.shutdown_signal_set()?;
        let quit = parse_signal(&self.quit_signal)?;
        let reload = parse_signal(&self.reload_signal)?;

        if quit == reload {
            return Err(ForemanError::ConfigValidationError(format!(
                "quit_signal and reload_signal must differ (both are {})",
                quit.as_str()
            )));
        }

        if shutdown.contains(&reload) {
            return Err(ForemanError::ConfigValidationError(format!(
                "reload_signal {} must not also be a shutdown signal",
                reload.as_str()
            )));
        }

        if matches!(reload, Signal::SIGKILL | Signal::SIGSTOP)
            || shutdown.iter().any(|s| matches!(s, Signal::SIGKILL | Signal::SIGSTOP))
        {
            return Err(ForemanError::ConfigValidationError(
                "SIGKILL and SIGSTOP cannot be handled".to_string(),
            ));
        }

        if self.health.timeout_secs == 0 {
            return Err(ForemanError::ConfigValidationError(
                "health.timeout_secs must be at least 1".to_string(),
            ));
        }

        if self.health.max_delay_ms < self.health.initial_delay_ms {
            return Err(ForemanError::ConfigValidationError(
                "health.max_delay_ms must not be below health.initial_delay_ms".to_string(),
            ));
        }

        if self.health.max_attempts == Some(0) {
            return Err(ForemanError::ConfigValidationError(
                "health.max_attempts must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// Parsed shutdown signals
    pub fn shutdown_signal_set(&self) -> Result<Vec<Signal>> {
        self.shutdown_signals
            .iter()
            .map(|s| parse_signal(s))
            .collect()
    }

    /// Expand environment variables in path fields
    fn expand_env_vars(&mut self) {
        if let Some(ref pid_file) = self.pid_file {
            self.pid_file = Some(Self::expand_env_in_path(pid_file));
        }
    }

    /// Expand `$VAR` and `${VAR}` in a string
    fn expand_env_in_string(s: &str) -> String {
        let mut result = s.to_string();

        for (key, value) in std::env::vars() {
            result = result.replace(&format!("${{{}}}", key), &value);
            result = result.replace(&format!("${}", key), &value);
        }

        result
    }

    fn expand_env_in_path(path: &Path) -> PathBuf {
        let path_str = path.to_string_lossy();
        PathBuf::from(Self::expand_env_in_string(&path_str))
    }

    /// Get stop timeout as Duration
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    /// Retry policy for ordered-server health checks
    pub fn health_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from_config(
            Duration::from_secs(self.health.timeout_secs),
            Duration::from_millis(self.health.initial_delay_ms),
            Duration::from_millis(self.health.max_delay_ms),
            self.health.max_attempts,
        )
    }
}

/// Parse a signal name such as `SIGTERM` (the `SIG` prefix is optional)
pub fn parse_signal(name: &str) -> Result<Signal> {
    let upper = name.trim().to_ascii_uppercase();
    let full = if upper.starts_with("SIG") {
        upper
    } else {
        format!("SIG{}", upper)
    };

    Signal::from_str(&full).map_err(|_| {
        ForemanError::ConfigValidationError(format!("Invalid signal name: {}", name))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = ForemanConfig::default();

        assert_eq!(config.stop_timeout_secs, 10);
        assert_eq!(config.shutdown_signals, vec!["SIGQUIT", "SIGINT", "SIGTERM"]);
        assert_eq!(config.quit_signal, "SIGQUIT");
        assert_eq!(config.reload_signal, "SIGHUP");
        assert_eq!(config.health.timeout_secs, 10);
        assert!(config.pid_file.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_signal() {
        assert_eq!(parse_signal("SIGTERM").unwrap(), Signal::SIGTERM);
        assert_eq!(parse_signal("hup").unwrap(), Signal::SIGHUP);
        assert_eq!(parse_signal(" usr2 ").unwrap(), Signal::SIGUSR2);
        assert!(parse_signal("SIGNOPE").is_err());
    }

    #[test]
    fn test_validate_zero_stop_timeout() {
        let config = ForemanConfig {
            stop_timeout_secs: 0,
            ..Default::default()
        };

        assert!(matches!(
            config.validate(),
            Err(ForemanError::ConfigValidationError(_))
        ));
    }

    #[test]
    fn test_validate_reload_signal_in_shutdown_set() {
        let config = ForemanConfig {
            shutdown_signals: vec!["SIGTERM".to_string(), "SIGHUP".to_string()],
            ..Default::default()
        };

        assert!(matches!(
            config.validate(),
            Err(ForemanError::ConfigValidationError(_))
        ));
    }

    #[test]
    fn test_validate_invalid_signal() {
        let config = ForemanConfig {
            quit_signal: "INVALID".to_string(),
            ..Default::default()
        };

        assert!(matches!(
            config.validate(),
            Err(ForemanError::ConfigValidationError(_))
        ));
    }

    #[test]
    fn test_validate_uncatchable_signal() {
        let config = ForemanConfig {
            shutdown_signals: vec!["SIGKILL".to_string()],
            ..Default::default()
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_toml_top_level() {
        let toml_content = r#"
            stop_timeout_secs = 30
            reload_signal = "SIGUSR2"

            [health]
            timeout_secs = 5
            max_attempts = 20
        "#;

        let config = ForemanConfig::parse_toml(toml_content).unwrap();
        assert_eq!(config.stop_timeout_secs, 30);
        assert_eq!(config.reload_signal, "SIGUSR2");
        assert_eq!(config.health.timeout_secs, 5);
        assert_eq!(config.health.max_attempts, Some(20));
        assert_eq!(config.health.max_delay_ms, 1000);
    }

    #[test]
    fn test_parse_toml_section() {
        let toml_content = r#"
            [foreman]
            stop_timeout_secs = 3
            disable_banner = true
        "#;

        let config = ForemanConfig::parse_toml(toml_content).unwrap();
        assert_eq!(config.stop_timeout_secs, 3);
        assert!(config.disable_banner);
    }

    #[test]
    fn test_parse_json() {
        let json_content = r#"
            {
                "stop_timeout_secs": 15,
                "shutdown_signals": ["SIGINT", "SIGTERM"],
                "pid_file": "/tmp/app.pid"
            }
        "#;

        let config = ForemanConfig::parse_json(json_content).unwrap();
        assert_eq!(config.stop_timeout_secs, 15);
        assert_eq!(config.shutdown_signals.len(), 2);
        assert_eq!(config.pid_file, Some(PathBuf::from("/tmp/app.pid")));
    }

    #[test]
    fn test_from_file_expands_env() {
        std::env::set_var("FOREMAN_TEST_RUN_DIR", "/var/run/foreman");
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("foreman.toml");

        fs::write(&config_path, "pid_file = \"${FOREMAN_TEST_RUN_DIR}/app.pid\"\n").unwrap();

        let config = ForemanConfig::from_file(&config_path).unwrap();
        assert_eq!(
            config.pid_file,
            Some(PathBuf::from("/var/run/foreman/app.pid"))
        );
    }

    #[test]
    fn test_from_file_unsupported_format() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("foreman.yaml");

        fs::write(&config_path, "stop_timeout_secs: 1").unwrap();

        let result = ForemanConfig::from_file(&config_path);
        assert!(matches!(result, Err(ForemanError::InvalidConfig(_))));
    }

    #[test]
    fn test_health_retry_policy() {
        let config = ForemanConfig::default();
        let policy = config.health_retry_policy();
        assert_eq!(policy.timeout, Duration::from_secs(10));
        assert_eq!(policy.initial_delay, Duration::from_millis(10));
    }
}
