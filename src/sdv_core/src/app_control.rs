//! The application controller.
//!
//! Owns the process-wide state machine, the instance lock, the run loop and
//! the startup/shutdown choreography: parse the startup configuration,
//! select the mode profile, bring up the core services and the logger,
//! replay the persisted configurations, then hand the repository to running
//! mode. Shutdown reverses the order, preserving the logger to the very
//! end.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use fs2::FileExt;
use log::{error, info, warn};
use sdv_object::{
    declare_interface, AttributeFlags, Attributes, Value,
};
use sdv_runtime::{LoadPolicy, ModuleHost, ModuleId, Repository};

use crate::config::{
    apply_config_text, load_or_create_settings, parse_startup_config, ConfigProcessResult,
};
use crate::error::StartupError;
use crate::logger::{LogSeverity, Logger, LoggerConfig, StartupLogBuffer};
use crate::mode::{AppMode, ConsoleReport};
use crate::services::{register_core_services, CORE_SERVICE_CLASSES, DEFAULT_LOGGER_CLASS};
use crate::shutdown::{AppShutdownRequest, ShutdownRequestListener};

/// States of the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppOperationState {
    NotStarted,
    Initializing,
    Initialized,
    Configuring,
    Running,
    ShuttingDown,
}

/// Events delivered to a registered sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEvent {
    OperationStateChanged(AppOperationState),
    RunningLoop,
}

/// Receiver of application events.
pub trait AppEventSink: Send + Sync {
    fn process_event(&self, event: AppEvent);
}

/// Operation-mode capability of the application.
pub trait AppOperation: Send + Sync {
    fn operation_state(&self) -> AppOperationState;
    fn set_config_mode(&self);
    fn set_running_mode(&self);
}

declare_interface!(AppOperation, "sdv.app.AppOperation");

/// Context capability: how the process was started.
pub trait AppContext: Send + Sync {
    fn mode(&self) -> AppMode;
    fn instance_id(&self) -> u32;
    fn retries(&self) -> u32;
}

declare_interface!(AppContext, "sdv.app.AppContext");

/// Host-wide exclusive lock permitting one main application per instance
/// id. A stale lock file (present without a live lock) is reacquired.
struct InstanceLock {
    file: File,
    path: PathBuf,
}

impl InstanceLock {
    fn acquire(dir: &Path, instance: u32) -> Result<InstanceLock, StartupError> {
        let path = dir.join(format!("sdv_core_{instance}.lock"));
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)?;
        file.try_lock_exclusive()
            .map_err(|_| StartupError::InstanceAlreadyRunning)?;
        Ok(InstanceLock { file, path })
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
        let _ = std::fs::remove_file(&self.path);
    }
}

struct ControlState {
    op_state: AppOperationState,
    mode: AppMode,
    instance: u32,
    retries: u32,
    console: ConsoleReport,
    logger_class: String,
    logger_module: ModuleId,
    install_dir: Option<PathBuf>,
    app_config: Option<PathBuf>,
    system_configs: Vec<PathBuf>,
    /// The settings enabled the automatic configuration save.
    auto_save_config: bool,
    /// Runtime gate on top of `auto_save_config`.
    enable_auto_save: bool,
    lock: Option<InstanceLock>,
    listener: Option<ShutdownRequestListener>,
    event: Option<Arc<dyn AppEventSink>>,
    tick: Duration,
}

impl ControlState {
    fn fresh() -> ControlState {
        ControlState {
            op_state: AppOperationState::NotStarted,
            mode: AppMode::Standalone,
            instance: 0,
            retries: 3,
            console: ConsoleReport::Normal,
            logger_class: String::new(),
            logger_module: 0,
            install_dir: None,
            app_config: None,
            system_configs: Vec::new(),
            auto_save_config: false,
            enable_auto_save: false,
            lock: None,
            listener: None,
            event: None,
            tick: Duration::from_millis(2),
        }
    }
}

/// The application controller. One per process; the services it creates
/// reach back through weak references.
pub struct AppControl {
    modules: Arc<ModuleHost>,
    repository: Arc<Repository>,
    base_dir: PathBuf,
    state: Mutex<ControlState>,
    run_flag: AtomicBool,
    startup_log: StartupLogBuffer,
}

impl AppControl {
    /// `base_dir` plays the role of the executable directory: search root
    /// for modules, home of the instance lock and of installations.
    pub fn new(base_dir: impl Into<PathBuf>) -> Arc<AppControl> {
        let base_dir = base_dir.into();
        let modules = Arc::new(ModuleHost::new(&base_dir, &base_dir));
        let repository = Arc::new(Repository::new(modules.clone()));
        Arc::new(AppControl {
            modules,
            repository,
            base_dir,
            state: Mutex::new(ControlState::fresh()),
            run_flag: AtomicBool::new(false),
            startup_log: StartupLogBuffer::new(256),
        })
    }

    pub fn modules(&self) -> &Arc<ModuleHost> {
        &self.modules
    }

    pub fn repository(&self) -> &Arc<Repository> {
        &self.repository
    }

    pub fn is_console_silent(&self) -> bool {
        self.state.lock().unwrap().console == ConsoleReport::Silent
    }

    pub fn is_console_verbose(&self) -> bool {
        self.state.lock().unwrap().console == ConsoleReport::Verbose
    }

    /// Interval of the run-loop poll.
    pub fn set_loop_tick(&self, tick: Duration) {
        self.state.lock().unwrap().tick = tick;
    }

    fn broadcast(&self, state: AppOperationState) {
        let sink = {
            let mut guard = self.state.lock().unwrap();
            guard.op_state = state;
            guard.event.clone()
        };
        if let Some(sink) = sink {
            sink.process_event(AppEvent::OperationStateChanged(state));
        }
    }

    fn report_failure(&self, reason: &str) {
        if !self.is_console_silent() {
            eprintln!("ERROR: {reason}");
        }
        error!("startup failed: {reason}");
    }

    /// Start the application from the supplied configuration text. On
    /// failure everything already brought up is torn down again.
    pub fn startup(
        self: &Arc<Self>,
        config: &str,
        event_sink: Option<Arc<dyn AppEventSink>>,
    ) -> Result<(), StartupError> {
        {
            let mut state = self.state.lock().unwrap();
            if state.op_state != AppOperationState::NotStarted {
                return Err(StartupError::InvalidState);
            }
            state.event = event_sink;
        }
        self.broadcast(AppOperationState::Initializing);
        self.startup_log
            .push(LogSeverity::Info, "application start".to_string());

        match self.startup_inner(config) {
            Ok(()) => Ok(()),
            Err(err) => {
                self.report_failure(&err.to_string());
                self.shutdown(true);
                Err(err)
            }
        }
    }

    fn startup_inner(self: &Arc<Self>, config: &str) -> Result<(), StartupError> {
        let options = parse_startup_config(config)?;
        let mode = options.mode;
        let profile = mode.profile();

        // Resolve the installation root for main and isolated runs.
        let install_dir = if matches!(mode, AppMode::Main | AppMode::Isolated) {
            let root = match &options.install_dir {
                Some(dir) if dir.is_absolute() => dir.clone(),
                Some(dir) => self.base_dir.join(dir),
                None => self.base_dir.join(options.instance.to_string()),
            };
            std::fs::create_dir_all(&root)?;
            Some(root)
        } else {
            None
        };

        // Settings of the main application, created from the template when
        // missing.
        let mut settings = crate::config::Settings::default();
        if mode == AppMode::Main {
            settings = load_or_create_settings(install_dir.as_deref().expect("main has a root"))?;
        }

        {
            let mut state = self.state.lock().unwrap();
            state.mode = mode;
            state.instance = options.instance;
            state.retries = options.retries;
            state.console = options.console;
            state.logger_class = options.logger_class.clone();
            state.install_dir = install_dir.clone();
            state.system_configs = settings.system_configs.clone();
            // A dedicated startup config overrides the settings and
            // disables the automatic save.
            if let Some(app_config) = &options.app_config {
                state.app_config = Some(app_config.clone());
                state.auto_save_config = false;
            } else {
                state.app_config = settings.app_config.clone();
                state.auto_save_config = settings.auto_save;
            }
            state.enable_auto_save = true;
        }

        // One main application per host and instance.
        if mode.takes_instance_lock() {
            let lock = InstanceLock::acquire(&self.base_dir, options.instance)?;
            self.state.lock().unwrap().lock = Some(lock);
        }
        if mode.listens_for_shutdown_requests() {
            let listener = ShutdownRequestListener::new(&self.base_dir, options.instance)?;
            self.state.lock().unwrap().listener = Some(listener);
        }

        // The core services module is builtin and fatal when unavailable.
        register_core_services(self);
        for class in CORE_SERVICE_CLASSES {
            self.repository
                .create(class, "", "")
                .map_err(|e| StartupError::CoreServices(e.to_string()))?;
        }

        // Bring up the logger: a custom one from its module, or the default
        // logger service from the core module.
        if let Some(module) = &options.logger_module {
            let id = self
                .modules
                .load(module)
                .map_err(|e| StartupError::Logger(e.to_string()))?;
            self.state.lock().unwrap().logger_module = id;
        }
        self.repository
            .create(&options.logger_class, "", "")
            .map_err(|e| StartupError::Logger(e.to_string()))?;
        let logger_object = self
            .repository
            .object(&options.logger_class)
            .ok_or_else(|| StartupError::Logger("logger object missing".into()))?;
        {
            let config = sdv_object::query::<dyn LoggerConfig, _>(&*logger_object)
                .ok_or_else(|| StartupError::Logger("no configuration capability".into()))?;
            if !options.program_tag.is_empty() {
                config.set_program_tag(&options.program_tag);
            }
            config.set_log_filter(options.severity_filter, options.view_filter);
            let logger = sdv_object::query::<dyn Logger, _>(&*logger_object)
                .ok_or_else(|| StartupError::Logger("no record capability".into()))?;
            // Records retained from before the logger was up.
            self.startup_log.replay(logger);
        }

        // Module loading restrictions of the mode apply from here on.
        self.modules.set_load_policy(profile.load_policy);
        if !profile.load_manifests {
            self.modules.set_manifest_resolver(None);
        }
        info!(
            "application context: mode {}, instance {}, rpc client {}, rpc server {}",
            mode.as_str(),
            options.instance,
            profile.rpc_client,
            profile.rpc_server
        );

        self.broadcast(AppOperationState::Initialized);
        self.set_config_mode();

        // System configurations must load completely; the application
        // configuration may be partial.
        if mode == AppMode::Main {
            let root = install_dir.clone().expect("main has a root");
            let system_configs = self.state.lock().unwrap().system_configs.clone();
            for config_path in &system_configs {
                let path = resolve_config_path(&root, config_path);
                let outcome = self.load_config_file(&path);
                if outcome != ConfigProcessResult::Successful {
                    return Err(StartupError::ConfigLoad(path.display().to_string()));
                }
            }
            self.modules.reset_config_baseline();
        }
        let app_config = self.state.lock().unwrap().app_config.clone();
        if let Some(config_path) = app_config {
            let root = install_dir.clone().unwrap_or_else(|| self.base_dir.clone());
            let path = resolve_config_path(&root, &config_path);
            match self.load_config_file(&path) {
                ConfigProcessResult::Successful => {}
                ConfigProcessResult::PartiallySuccessful => {
                    warn!(
                        "application configuration '{}' loaded partially; automatic save disabled",
                        path.display()
                    );
                    self.disable_auto_config_update();
                }
                ConfigProcessResult::Failed => {
                    return Err(StartupError::ConfigLoad(path.display().to_string()));
                }
            }
        }

        self.set_running_mode();
        Ok(())
    }

    /// Load one configuration file into modules and repository.
    pub fn load_config_file(&self, path: &Path) -> ConfigProcessResult {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) => {
                warn!("cannot read configuration '{}': {err}", path.display());
                return ConfigProcessResult::Failed;
            }
        };
        apply_config_text(&self.modules, &self.repository, &text)
    }

    /// The run loop: poll for shutdown requests in small sleeps, emitting a
    /// loop event per tick. Returns when a shutdown was requested.
    pub fn run_loop(&self) -> Result<(), StartupError> {
        let (mode, tick) = {
            let state = self.state.lock().unwrap();
            match state.op_state {
                AppOperationState::Configuring | AppOperationState::Running => {}
                _ => return Err(StartupError::InvalidState),
            }
            (state.mode, state.tick)
        };
        if mode == AppMode::Maintenance {
            return Err(StartupError::AccessDenied(
                "the run loop is not available to maintenance applications".into(),
            ));
        }

        if self.is_console_verbose() {
            println!("Entering loop");
        }
        self.run_flag.store(true, Ordering::SeqCst);
        while self.run_flag.load(Ordering::SeqCst) {
            std::thread::sleep(tick);
            let (triggered, sink) = {
                let state = self.state.lock().unwrap();
                (
                    state
                        .listener
                        .as_ref()
                        .map(|l| l.triggered())
                        .unwrap_or(false),
                    state.event.clone(),
                )
            };
            if triggered {
                info!("shutdown request received");
                break;
            }
            if let Some(sink) = sink {
                sink.process_event(AppEvent::RunningLoop);
            }
        }
        self.run_flag.store(false, Ordering::SeqCst);
        if self.is_console_verbose() {
            println!("Leaving loop");
        }
        Ok(())
    }

    /// Signal the run loop to exit.
    pub fn request_shutdown(&self) {
        info!("shutdown requested");
        self.run_flag.store(false, Ordering::SeqCst);
    }

    /// Tear the application down. `force` overrides the active-object
    /// checks and is the path the drop guard takes.
    pub fn shutdown(&self, force: bool) {
        {
            let state = self.state.lock().unwrap();
            if state.op_state == AppOperationState::NotStarted {
                return;
            }
        }
        if self.run_flag.swap(false, Ordering::SeqCst) {
            // Give a loop stuck in its sleep a moment to leave.
            std::thread::sleep(Duration::from_millis(10));
        }
        if force {
            info!("forced shutdown of the application");
        }
        self.broadcast(AppOperationState::ShuttingDown);

        // Objects release their connections in config mode before dying.
        self.repository.set_config_mode();

        let (logger_class, logger_module) = {
            let mut state = self.state.lock().unwrap();
            state.auto_save_config = false;
            (state.logger_class.clone(), state.logger_module)
        };

        // Everything except the logger, in reverse creation order.
        self.repository.destroy_all(&[logger_class]);
        self.modules.unload_all(&[logger_module]);

        // Now the logger itself.
        info!("application end");
        self.repository.destroy_all(&[]);
        self.modules.unload_all(&[]);
        self.modules.set_load_policy(LoadPolicy::Unrestricted);
        self.modules.set_manifest_resolver(None);

        self.broadcast(AppOperationState::NotStarted);
        let (lock, listener, sink) = {
            let mut state = self.state.lock().unwrap();
            let lock = state.lock.take();
            let listener = state.listener.take();
            let sink = state.event.take();
            *state = ControlState::fresh();
            (lock, listener, sink)
        };
        // Dropping releases the instance lock file and the request listener.
        drop(listener);
        drop(lock);
        drop(sink);
    }

    pub fn disable_auto_config_update(&self) {
        self.state.lock().unwrap().enable_auto_save = false;
    }

    pub fn enable_auto_config_update(&self) {
        self.state.lock().unwrap().enable_auto_save = true;
    }

    /// Write the mutable configuration if the automatic save is active.
    pub fn trigger_config_update(&self) {
        let (path, root) = {
            let state = self.state.lock().unwrap();
            if !state.auto_save_config || !state.enable_auto_save {
                return;
            }
            let Some(path) = state.app_config.clone() else {
                return;
            };
            (path, state.install_dir.clone())
        };
        let root = root.unwrap_or_else(|| self.base_dir.clone());
        let target = resolve_config_path(&root, &path);
        let mut text = self.modules.save_config(&[]);
        let ignore: Vec<String> = CORE_SERVICE_CLASSES
            .iter()
            .map(|c| c.to_string())
            .chain([DEFAULT_LOGGER_CLASS.to_string()])
            .collect();
        text.push_str(&self.repository.save_config(&ignore));
        if let Err(err) = std::fs::write(&target, text) {
            error!(
                "failed to automatically save the configuration '{}': {err}",
                target.display()
            );
        }
    }

    pub fn install_dir(&self) -> Option<PathBuf> {
        self.state.lock().unwrap().install_dir.clone()
    }
}

fn resolve_config_path(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

impl AppOperation for AppControl {
    fn operation_state(&self) -> AppOperationState {
        self.state.lock().unwrap().op_state
    }

    fn set_config_mode(&self) {
        self.repository.set_config_mode();
        let current = self.operation_state();
        if matches!(
            current,
            AppOperationState::Running | AppOperationState::Initialized
        ) {
            self.broadcast(AppOperationState::Configuring);
        }
    }

    fn set_running_mode(&self) {
        self.repository.set_running_mode();
        let current = self.operation_state();
        if matches!(
            current,
            AppOperationState::Configuring | AppOperationState::Initialized
        ) {
            self.broadcast(AppOperationState::Running);
        }
    }
}

impl AppContext for AppControl {
    fn mode(&self) -> AppMode {
        self.state.lock().unwrap().mode
    }

    fn instance_id(&self) -> u32 {
        self.state.lock().unwrap().instance
    }

    fn retries(&self) -> u32 {
        self.state.lock().unwrap().retries
    }
}

impl AppShutdownRequest for AppControl {
    fn request_shutdown(&self) {
        AppControl::request_shutdown(self);
    }
}

impl Attributes for AppControl {
    fn attribute_names(&self) -> Vec<String> {
        vec!["app.instance_id".to_string(), "console.info_level".to_string()]
    }

    fn attribute(&self, name: &str) -> Value {
        match name {
            "app.instance_id" => Value::Int(self.instance_id() as i64),
            "console.info_level" => Value::Str(
                match self.state.lock().unwrap().console {
                    ConsoleReport::Silent => "silent",
                    ConsoleReport::Normal => "normal",
                    ConsoleReport::Verbose => "verbose",
                }
                .to_string(),
            ),
            _ => Value::None,
        }
    }

    fn set_attribute(&self, _name: &str, _value: Value) -> bool {
        // All application attributes are read-only.
        false
    }

    fn attribute_flags(&self, name: &str) -> AttributeFlags {
        match name {
            "app.instance_id" | "console.info_level" => AttributeFlags::READ_ONLY,
            _ => AttributeFlags::empty(),
        }
    }
}

/// The at-exit guarantee: a controller dropped while the application still
/// runs performs a forced shutdown, releasing the instance lock.
impl Drop for AppControl {
    fn drop(&mut self) {
        let running = {
            let state = self.state.lock().unwrap();
            !matches!(
                state.op_state,
                AppOperationState::NotStarted | AppOperationState::ShuttingDown
            )
        };
        if running {
            warn!("application dropped while running; forcing shutdown");
            self.shutdown(true);
        }
    }
}
