use thiserror::Error;

/// Main error type for the foreman orchestrator
#[derive(Debug, Error)]
pub enum ForemanError {
    // Component errors
    #[error("Component {name} failed: {source}")]
    Component {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Failed to initialize component {name}: {source}")]
    ComponentInit {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Task {task} panicked")]
    TaskPanicked { task: String },

    #[error("Ordered server {server} never became healthy")]
    Unhealthy { server: String },

    // Registry errors
    #[error("Registry error: {0}")]
    RegistryError(String),

    // Shutdown errors
    #[error("Stop hook #{index} failed: {source}")]
    Hook {
        index: usize,
        #[source]
        source: anyhow::Error,
    },

    #[error("Stop deadline of {0:?} exceeded")]
    StopTimeout(std::time::Duration),

    #[error("Signal error: {0}")]
    SignalError(String),

    #[error("Forced exit with status {0}")]
    ForcedExit(i32),

    // Reload errors
    #[error("Failed to export listener for {server}: {reason}")]
    ListenerExport { server: String, reason: String },

    #[error("Reload failed: {0}")]
    Reload(String),

    #[error("Invalid inherited listener state: {0}")]
    InheritError(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid configuration file: {0}")]
    InvalidConfig(String),

    #[error("Configuration validation failed: {0}")]
    ConfigValidationError(String),

    // PID file errors
    #[error("PID file error: {0}")]
    PidFileError(String),

    // IO errors (automatically converted from std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl ForemanError {
    /// Wrap an error returned by a user component
    pub fn component(name: impl Into<String>, source: anyhow::Error) -> Self {
        Self::Component {
            name: name.into(),
            source,
        }
    }
}

/// Result type alias for foreman operations
pub type Result<T> = std::result::Result<T, ForemanError>;
