use thiserror::Error;

/// Reasons the controller refuses to start or to run.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to parse startup configuration: {0}")]
    ConfigParse(String),

    #[error("invalid application mode '{0}'")]
    InvalidMode(String),

    #[error("invalid severity filter '{0}'")]
    InvalidSeverity(String),

    /// A custom logger needs both a class and a module path.
    #[error("incomplete custom logger definition: {0}")]
    LoggerDefinition(String),

    #[error("instance already running")]
    InstanceAlreadyRunning,

    #[error("operation invalid in the current state")]
    InvalidState,

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("failed to start the core services: {0}")]
    CoreServices(String),

    #[error("failed to start the logger: {0}")]
    Logger(String),

    #[error("application settings: {0}")]
    Settings(String),

    #[error("cannot load configuration '{0}'")]
    ConfigLoad(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
