//! Startup configuration, the settings file and persisted-configuration
//! processing.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{info, warn};
use sdv_object::declare_interface;
use sdv_runtime::{ModuleHost, Repository};
use sdv_toml::{Document, NodeType};

use crate::error::StartupError;
use crate::logger::LogSeverity;
use crate::mode::{AppMode, ConsoleReport};

/// Compiled settings-file version; the file must match.
pub const SETTINGS_VERSION: i64 = 100;

/// Template written when a main application starts without a settings file.
pub const SETTINGS_TEMPLATE: &str = r#"# Settings file
[Settings]
Version = 100

# The system config array can contain zero or more configurations that are
# loaded at the time the system is started. It is advisable to split the
# configurations in:
#  platform config     - the components interacting with the OS, middleware
#                        and vehicle bus.
#  vehicle interface   - the vehicle bus interpretation components.
#  vehicle abstraction - the basic services.
# A relative path is relative to the installation directory.
#
# Example:
#   SystemConfig = [ "platform.toml", "vehicle_ifc.toml", "vehicle_abstract.toml" ]

# The application config is updated when services and apps are added to or
# removed from the system. Providing it enables the automatic configuration
# save. A relative path is relative to the installation directory.
#
# Example:
#   AppConfig = "app_config.toml"
"#;

/// Values read from the startup configuration text.
#[derive(Debug, Clone)]
pub struct StartupOptions {
    pub mode: AppMode,
    pub instance: u32,
    pub retries: u32,
    pub console: ConsoleReport,
    pub logger_class: String,
    pub logger_module: Option<PathBuf>,
    pub program_tag: String,
    pub severity_filter: LogSeverity,
    pub view_filter: LogSeverity,
    pub install_dir: Option<PathBuf>,
    pub app_config: Option<PathBuf>,
}

impl Default for StartupOptions {
    fn default() -> Self {
        StartupOptions {
            mode: AppMode::Standalone,
            instance: 1000,
            retries: 3,
            console: ConsoleReport::Normal,
            logger_class: "DefaultLoggerService".to_string(),
            logger_module: None,
            program_tag: String::new(),
            severity_filter: LogSeverity::Info,
            view_filter: LogSeverity::Error,
            install_dir: None,
            app_config: None,
        }
    }
}

fn string_at(doc: &Document, path: &str) -> Option<String> {
    doc.get(path)
        .and_then(|n| doc.value(n).as_str().map(str::to_string))
}

fn int_at(doc: &Document, path: &str) -> Option<i64> {
    doc.get(path).and_then(|n| doc.value(n).as_int())
}

/// Parse the `[LogHandler]`/`[Application]`/`[Console]` startup text.
pub fn parse_startup_config(text: &str) -> Result<StartupOptions, StartupError> {
    let doc = Document::parse(text).map_err(|e| StartupError::ConfigParse(e.to_string()))?;
    let mut options = StartupOptions::default();

    if let Some(report) = string_at(&doc, "Console.Report") {
        options.console = ConsoleReport::parse(&report)
            .ok_or_else(|| StartupError::ConfigParse(format!("invalid console report '{report}'")))?;
    }

    let logger_path = string_at(&doc, "LogHandler.Path");
    let logger_class = string_at(&doc, "LogHandler.Class");
    match (logger_path, logger_class) {
        (Some(_), None) => {
            return Err(StartupError::LoggerDefinition(
                "module path supplied, but no class defined".into(),
            ));
        }
        (None, Some(_)) => {
            return Err(StartupError::LoggerDefinition(
                "class supplied, but no module defined".into(),
            ));
        }
        (Some(path), Some(class)) => {
            options.logger_module = Some(PathBuf::from(path));
            options.logger_class = class;
        }
        (None, None) => {}
    }
    if let Some(tag) = string_at(&doc, "LogHandler.Tag") {
        options.program_tag = tag;
    }

    if let Some(mode) = string_at(&doc, "Application.Mode") {
        options.mode = AppMode::parse(&mode).ok_or(StartupError::InvalidMode(mode))?;
    }

    // The default view filter is stricter outside main and isolated runs.
    options.view_filter = if matches!(options.mode, AppMode::Main | AppMode::Isolated) {
        LogSeverity::Info
    } else {
        LogSeverity::Error
    };
    if let Some(filter) = string_at(&doc, "LogHandler.Filter") {
        options.severity_filter =
            LogSeverity::parse(&filter).ok_or(StartupError::InvalidSeverity(filter))?;
    }
    if let Some(filter) = string_at(&doc, "LogHandler.ViewFilter") {
        options.view_filter =
            LogSeverity::parse(&filter).ok_or(StartupError::InvalidSeverity(filter))?;
    }

    if let Some(instance) = int_at(&doc, "Application.Instance") {
        options.instance = instance as u32;
    }
    if let Some(retries) = int_at(&doc, "Application.Retries") {
        options.retries = (retries as u32).clamp(3, 30);
    }
    if matches!(options.mode, AppMode::Main | AppMode::Isolated) {
        if let Some(dir) = string_at(&doc, "Application.InstallDir") {
            options.install_dir = Some(PathBuf::from(dir));
        }
    }
    // Maintenance and isolated applications cannot carry a dedicated config.
    if !matches!(options.mode, AppMode::Maintenance | AppMode::Isolated) {
        if let Some(config) = string_at(&doc, "Application.Config") {
            options.app_config = Some(PathBuf::from(config));
        }
    }

    Ok(options)
}

/// Content of the settings file of a main application.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub system_configs: Vec<PathBuf>,
    pub app_config: Option<PathBuf>,
    /// Set when the settings supplied the application config; enables the
    /// periodic configuration save.
    pub auto_save: bool,
}

/// Read `settings.toml` from the installation root, creating it from the
/// template when missing.
pub fn load_or_create_settings(root: &Path) -> Result<Settings, StartupError> {
    let path = root.join("settings.toml");
    if !path.exists() {
        std::fs::write(&path, SETTINGS_TEMPLATE)
            .map_err(|e| StartupError::Settings(format!("cannot store the template: {e}")))?;
        info!("created settings template at {}", path.display());
        return Ok(Settings::default());
    }

    let text = std::fs::read_to_string(&path)
        .map_err(|e| StartupError::Settings(format!("cannot read {}: {e}", path.display())))?;
    let doc =
        Document::parse(&text).map_err(|e| StartupError::Settings(format!("parse error: {e}")))?;

    let version = int_at(&doc, "Settings.Version")
        .ok_or_else(|| StartupError::Settings("missing version".into()))?;
    if version != SETTINGS_VERSION {
        return Err(StartupError::Settings(format!(
            "expected version {SETTINGS_VERSION}, but found version {version}"
        )));
    }

    let mut settings = Settings::default();
    if let Some(configs) = doc.get("Settings.SystemConfig") {
        for i in 0..doc.count(configs) {
            let entry = doc.child(configs, i).expect("counted child");
            if let Some(path) = doc.value(entry).as_str() {
                settings.system_configs.push(PathBuf::from(path));
            }
        }
    }
    if let Some(app_config) = string_at(&doc, "Settings.AppConfig") {
        settings.app_config = Some(PathBuf::from(app_config));
        settings.auto_save = true;
    }
    Ok(settings)
}

/// Outcome of loading a persisted configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigProcessResult {
    Successful,
    PartiallySuccessful,
    Failed,
}

/// Replay a persisted configuration: `[[Module]]` blocks load modules, every
/// other top-level table creates one object whose configuration is the
/// re-emitted table body.
pub fn apply_config_text(
    modules: &Arc<ModuleHost>,
    repository: &Repository,
    text: &str,
) -> ConfigProcessResult {
    let doc = match Document::parse(text) {
        Ok(doc) => doc,
        Err(err) => {
            warn!("configuration parse error: {err}");
            return ConfigProcessResult::Failed;
        }
    };

    let mut attempted = 0usize;
    let mut failed = 0usize;
    let root = doc.root();
    for i in 0..doc.count(root) {
        let child = doc.child(root, i).expect("counted child");
        match doc.node_type(child) {
            NodeType::Array if doc.name(child) == "Module" => {
                for j in 0..doc.count(child) {
                    let element = doc.child(child, j).expect("counted element");
                    let Some(path) = doc
                        .direct(element, "Path")
                        .and_then(|n| doc.value(n).as_str().map(str::to_string))
                    else {
                        failed += 1;
                        attempted += 1;
                        continue;
                    };
                    attempted += 1;
                    match modules.load(&path) {
                        Ok(id) => modules.mark_config_module(id),
                        Err(err) => {
                            warn!("configured module '{path}' failed to load: {err}");
                            failed += 1;
                        }
                    }
                }
            }
            NodeType::Table => {
                attempted += 1;
                let class = doc.name(child).to_string();
                let body = doc.generate_table_body(child);
                if let Err(err) = repository.create(&class, "", &body) {
                    warn!("configured object of class '{class}' failed: {err}");
                    failed += 1;
                }
            }
            _ => {}
        }
    }

    if failed == 0 {
        ConfigProcessResult::Successful
    } else if failed < attempted {
        ConfigProcessResult::PartiallySuccessful
    } else {
        ConfigProcessResult::Failed
    }
}

/// Capability of the configuration service.
pub trait ConfigControl: Send + Sync {
    /// Load a configuration file and replay it into the repository.
    fn load_config(&self, path: &str) -> ConfigProcessResult;

    /// Persist the current module and object configuration.
    fn save_config(&self, path: &str) -> bool;
}

declare_interface!(ConfigControl, "sdv.core.ConfigControl");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_to_an_empty_config() {
        let options = parse_startup_config("").unwrap();
        assert_eq!(options.mode, AppMode::Standalone);
        assert_eq!(options.instance, 1000);
        assert_eq!(options.logger_class, "DefaultLoggerService");
        assert_eq!(options.severity_filter, LogSeverity::Info);
        assert_eq!(options.view_filter, LogSeverity::Error);
    }

    #[test]
    fn full_startup_config() {
        let options = parse_startup_config(
            r#"[LogHandler]
Tag = "demo"
Filter = "Debug"
ViewFilter = "Warning"

[Application]
Mode = "Main"
Instance = 1234
Retries = 50

[Console]
Report = "Verbose"
"#,
        )
        .unwrap();
        assert_eq!(options.mode, AppMode::Main);
        assert_eq!(options.instance, 1234);
        // Retries clamp to [3, 30].
        assert_eq!(options.retries, 30);
        assert_eq!(options.console, ConsoleReport::Verbose);
        assert_eq!(options.program_tag, "demo");
        assert_eq!(options.severity_filter, LogSeverity::Debug);
        assert_eq!(options.view_filter, LogSeverity::Warning);
    }

    #[test]
    fn logger_definition_must_be_complete() {
        assert!(matches!(
            parse_startup_config("[LogHandler]\nPath = \"logger.sdv\"\n"),
            Err(StartupError::LoggerDefinition(_))
        ));
        assert!(matches!(
            parse_startup_config("[LogHandler]\nClass = \"MyLogger\"\n"),
            Err(StartupError::LoggerDefinition(_))
        ));
    }

    #[test]
    fn invalid_mode_is_refused() {
        assert!(matches!(
            parse_startup_config("[Application]\nMode = \"Sideways\"\n"),
            Err(StartupError::InvalidMode(_))
        ));
    }

    #[test]
    fn view_filter_defaults_to_info_for_main() {
        let options = parse_startup_config("[Application]\nMode = \"Main\"\n").unwrap();
        assert_eq!(options.view_filter, LogSeverity::Info);
    }

    #[test]
    fn settings_template_is_created_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_or_create_settings(dir.path()).unwrap();
        assert!(settings.system_configs.is_empty());
        assert!(settings.app_config.is_none());
        assert!(dir.path().join("settings.toml").exists());

        // The created template is itself a valid settings file.
        let settings = load_or_create_settings(dir.path()).unwrap();
        assert!(!settings.auto_save);
    }

    #[test]
    fn settings_version_is_checked() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("settings.toml"),
            "[Settings]\nVersion = 99\n",
        )
        .unwrap();
        assert!(matches!(
            load_or_create_settings(dir.path()),
            Err(StartupError::Settings(_))
        ));
    }

    #[test]
    fn settings_lists_configs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("settings.toml"),
            "[Settings]\nVersion = 100\nSystemConfig = [ \"platform.toml\", \"vehicle.toml\" ]\nAppConfig = \"app.toml\"\n",
        )
        .unwrap();
        let settings = load_or_create_settings(dir.path()).unwrap();
        assert_eq!(settings.system_configs.len(), 2);
        assert_eq!(settings.app_config.as_deref(), Some(Path::new("app.toml")));
        assert!(settings.auto_save);
    }
}
