//! Application controller of the component runtime: startup configuration,
//! mode selection, instance locking, core services, persisted
//! configurations and the run loop.

pub mod app_control;
pub mod config;
pub mod error;
pub mod logger;
pub mod mode;
pub mod services;
pub mod shutdown;

pub use crate::app_control::{
    AppContext, AppControl, AppEvent, AppEventSink, AppOperation, AppOperationState,
};
pub use crate::config::{
    parse_startup_config, ConfigControl, ConfigProcessResult, Settings, StartupOptions,
    SETTINGS_VERSION,
};
pub use crate::error::StartupError;
pub use crate::logger::{LogSeverity, Logger, LoggerConfig};
pub use crate::mode::{AppMode, ConsoleReport, ModeProfile};
pub use crate::services::{
    ModuleControl, ModuleInfoAccess, RepositoryControl, CORE_SERVICE_CLASSES, DEFAULT_LOGGER_CLASS,
};
pub use crate::shutdown::{AppShutdownRequest, ShutdownRequestListener};
