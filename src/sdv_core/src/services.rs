//! The builtin core services module.
//!
//! Registered with the module host under the reserved configured path, so
//! the repository can instantiate the platform service objects like any
//! other class. The services reach back to the controller through weak
//! references; mode-restricted control surfaces sit in conditional
//! interface-map sections.

use std::path::PathBuf;
use std::sync::{Arc, LazyLock, Mutex, Weak};

use log::{log, Level};
use sdv_object::{
    iid, Attributes, ClassInfo, InterfaceAccess, InterfaceId, InterfaceMap, InterfaceRef,
    ObjectControl, ObjectKind, ObjectStatus, OperationMode, ServiceObject, Value,
};
use sdv_runtime::{
    BoxedFactory, ModuleError, ModuleFactory, ModuleHost, ModuleId, ModuleInfo, ModuleSummary,
    Repository, RepositoryError, CORE_SERVICES_MODULE,
};

use crate::app_control::{AppContext, AppControl, AppOperation, AppOperationState};
use crate::config::{ConfigControl, ConfigProcessResult};
use crate::logger::{LogSeverity, Logger, LoggerConfig};
use crate::mode::AppMode;
use crate::shutdown::AppShutdownRequest;

/// Classes instantiated right after the core module is registered.
pub const CORE_SERVICE_CLASSES: &[&str] = &[
    "AppControlService",
    "RepositoryService",
    "ModuleControlService",
    "ConfigService",
];

pub const DEFAULT_LOGGER_CLASS: &str = "DefaultLoggerService";

/// Module information capability.
pub trait ModuleInfoAccess: Send + Sync {
    fn module_list(&self) -> Vec<ModuleSummary>;
    fn class_list(&self, id: ModuleId) -> Vec<ClassInfo>;
}

sdv_object::declare_interface!(ModuleInfoAccess, "sdv.core.ModuleInfoAccess");

/// Module control capability; only open outside managed modes.
pub trait ModuleControl: Send + Sync {
    fn load(&self, path: &str) -> Result<ModuleId, ModuleError>;
    fn unload(&self, id: ModuleId) -> Result<(), ModuleError>;
    fn add_search_dir(&self, dir: &str) -> bool;
    fn search_dirs(&self) -> Vec<PathBuf>;
}

sdv_object::declare_interface!(ModuleControl, "sdv.core.ModuleControl");

/// Repository access capability.
pub trait RepositoryControl: Send + Sync {
    fn create_object(&self, class: &str, name: &str, config: &str) -> Result<(), RepositoryError>;
    fn destroy_object(&self, name: &str);
    fn object_names(&self) -> Vec<String>;
}

sdv_object::declare_interface!(RepositoryControl, "sdv.core.RepositoryControl");

/// Shared lifecycle bookkeeping of the service objects.
struct ServiceState(Mutex<ObjectStatus>);

impl ServiceState {
    fn new() -> ServiceState {
        ServiceState(Mutex::new(ObjectStatus::InitializationPending))
    }

    fn initialize(&self) {
        *self.0.lock().unwrap() = ObjectStatus::Initialized;
    }

    fn status(&self) -> ObjectStatus {
        *self.0.lock().unwrap()
    }

    fn set_mode(&self, mode: OperationMode) {
        let mut status = self.0.lock().unwrap();
        if status.is_live() {
            *status = match mode {
                OperationMode::Configuring => ObjectStatus::Configuring,
                OperationMode::Running => ObjectStatus::Running,
            };
        }
    }

    fn shutdown(&self) {
        *self.0.lock().unwrap() = ObjectStatus::DestructionPending;
    }
}

macro_rules! forward_object_control {
    ($ty:ty) => {
        impl ObjectControl for $ty {
            fn initialize(&self, _config: &str) {
                self.state.initialize();
            }
            fn object_status(&self) -> ObjectStatus {
                self.state.status()
            }
            fn set_operation_mode(&self, mode: OperationMode) {
                self.state.set_mode(mode);
            }
            fn shutdown(&self) {
                self.state.shutdown();
            }
        }
    };
}

// --- AppControlService ------------------------------------------------------

/// Service facade of the application controller.
pub struct AppControlService {
    app: Weak<AppControl>,
    state: ServiceState,
}

forward_object_control!(AppControlService);

impl AppControlService {
    fn shutdown_request_access(&self) -> bool {
        // The external shutdown request surface only exists for main and
        // isolated applications.
        self.app
            .upgrade()
            .map(|app| matches!(app.mode(), AppMode::Main | AppMode::Isolated))
            .unwrap_or(false)
    }
}

impl AppOperation for AppControlService {
    fn operation_state(&self) -> AppOperationState {
        self.app
            .upgrade()
            .map(|app| app.operation_state())
            .unwrap_or(AppOperationState::NotStarted)
    }

    fn set_config_mode(&self) {
        if let Some(app) = self.app.upgrade() {
            app.set_config_mode();
        }
    }

    fn set_running_mode(&self) {
        if let Some(app) = self.app.upgrade() {
            app.set_running_mode();
        }
    }
}

impl AppContext for AppControlService {
    fn mode(&self) -> AppMode {
        self.app
            .upgrade()
            .map(|app| app.mode())
            .unwrap_or(AppMode::Standalone)
    }

    fn instance_id(&self) -> u32 {
        self.app.upgrade().map(|app| app.instance_id()).unwrap_or(0)
    }

    fn retries(&self) -> u32 {
        self.app.upgrade().map(|app| app.retries()).unwrap_or(0)
    }
}

impl AppShutdownRequest for AppControlService {
    fn request_shutdown(&self) {
        if let Some(app) = self.app.upgrade() {
            app.request_shutdown();
        }
    }
}

impl sdv_object::Attributes for AppControlService {
    fn attribute_names(&self) -> Vec<String> {
        self.app
            .upgrade()
            .map(|app| app.attribute_names())
            .unwrap_or_default()
    }

    fn attribute(&self, name: &str) -> Value {
        self.app
            .upgrade()
            .map(|app| app.attribute(name))
            .unwrap_or(Value::None)
    }

    fn set_attribute(&self, name: &str, value: Value) -> bool {
        self.app
            .upgrade()
            .map(|app| app.set_attribute(name, value))
            .unwrap_or(false)
    }

    fn attribute_flags(&self, name: &str) -> sdv_object::AttributeFlags {
        self.app
            .upgrade()
            .map(|app| app.attribute_flags(name))
            .unwrap_or(sdv_object::AttributeFlags::empty())
    }
}

impl InterfaceAccess for AppControlService {
    fn get_interface(&self, id: InterfaceId) -> Option<InterfaceRef<'_>> {
        static MAP: LazyLock<InterfaceMap<AppControlService>> = LazyLock::new(|| {
            InterfaceMap::builder()
                .entry(iid::<dyn ObjectControl>(), |o| {
                    InterfaceRef::new::<dyn ObjectControl>(o)
                })
                .entry(iid::<dyn AppOperation>(), |o| {
                    InterfaceRef::new::<dyn AppOperation>(o)
                })
                .entry(iid::<dyn AppContext>(), |o| {
                    InterfaceRef::new::<dyn AppContext>(o)
                })
                .entry(iid::<dyn sdv_object::Attributes>(), |o| {
                    InterfaceRef::new::<dyn sdv_object::Attributes>(o)
                })
                .section_condition(1, AppControlService::shutdown_request_access)
                .section(1)
                .entry(iid::<dyn AppShutdownRequest>(), |o| {
                    InterfaceRef::new::<dyn AppShutdownRequest>(o)
                })
                .default_section()
                .build()
        });
        MAP.resolve(self, id)
    }
}

impl ServiceObject for AppControlService {
    fn class_info(&self) -> ClassInfo {
        ClassInfo::new(ObjectKind::SystemObject, "AppControlService").singleton()
    }
}

// --- RepositoryService ------------------------------------------------------

pub struct RepositoryService {
    repository: Weak<Repository>,
    state: ServiceState,
}

forward_object_control!(RepositoryService);

impl RepositoryControl for RepositoryService {
    fn create_object(&self, class: &str, name: &str, config: &str) -> Result<(), RepositoryError> {
        match self.repository.upgrade() {
            Some(repository) => repository.create(class, name, config),
            None => Err(RepositoryError::ClassNotFound(class.to_string())),
        }
    }

    fn destroy_object(&self, name: &str) {
        if let Some(repository) = self.repository.upgrade() {
            repository.destroy(name);
        }
    }

    fn object_names(&self) -> Vec<String> {
        self.repository
            .upgrade()
            .map(|r| r.object_names())
            .unwrap_or_default()
    }
}

impl InterfaceAccess for RepositoryService {
    fn get_interface(&self, id: InterfaceId) -> Option<InterfaceRef<'_>> {
        static MAP: LazyLock<InterfaceMap<RepositoryService>> = LazyLock::new(|| {
            InterfaceMap::builder()
                .entry(iid::<dyn ObjectControl>(), |o| {
                    InterfaceRef::new::<dyn ObjectControl>(o)
                })
                .entry(iid::<dyn RepositoryControl>(), |o| {
                    InterfaceRef::new::<dyn RepositoryControl>(o)
                })
                .build()
        });
        MAP.resolve(self, id)
    }
}

impl ServiceObject for RepositoryService {
    fn class_info(&self) -> ClassInfo {
        ClassInfo::new(ObjectKind::SystemObject, "RepositoryService").singleton()
    }
}

// --- ModuleControlService ---------------------------------------------------

pub struct ModuleControlService {
    app: Weak<AppControl>,
    modules: Arc<ModuleHost>,
    state: ServiceState,
}

forward_object_control!(ModuleControlService);

impl ModuleControlService {
    fn control_access(&self) -> bool {
        // Standalone and essential applications manage their own modules;
        // all other modes keep the control surface closed.
        self.app
            .upgrade()
            .map(|app| matches!(app.mode(), AppMode::Standalone | AppMode::Essential))
            .unwrap_or(false)
    }
}

impl ModuleInfoAccess for ModuleControlService {
    fn module_list(&self) -> Vec<ModuleSummary> {
        self.modules.module_list()
    }

    fn class_list(&self, id: ModuleId) -> Vec<ClassInfo> {
        self.modules.class_list(id)
    }
}

impl ModuleControl for ModuleControlService {
    fn load(&self, path: &str) -> Result<ModuleId, ModuleError> {
        self.modules.load(path)
    }

    fn unload(&self, id: ModuleId) -> Result<(), ModuleError> {
        self.modules.unload(id, false)
    }

    fn add_search_dir(&self, dir: &str) -> bool {
        self.modules.add_search_dir(dir)
    }

    fn search_dirs(&self) -> Vec<PathBuf> {
        self.modules.search_dirs()
    }
}

impl InterfaceAccess for ModuleControlService {
    fn get_interface(&self, id: InterfaceId) -> Option<InterfaceRef<'_>> {
        static MAP: LazyLock<InterfaceMap<ModuleControlService>> = LazyLock::new(|| {
            InterfaceMap::builder()
                .entry(iid::<dyn ObjectControl>(), |o| {
                    InterfaceRef::new::<dyn ObjectControl>(o)
                })
                .entry(iid::<dyn ModuleInfoAccess>(), |o| {
                    InterfaceRef::new::<dyn ModuleInfoAccess>(o)
                })
                .section_condition(1, ModuleControlService::control_access)
                .section(1)
                .entry(iid::<dyn ModuleControl>(), |o| {
                    InterfaceRef::new::<dyn ModuleControl>(o)
                })
                .default_section()
                .build()
        });
        MAP.resolve(self, id)
    }
}

impl ServiceObject for ModuleControlService {
    fn class_info(&self) -> ClassInfo {
        ClassInfo::new(ObjectKind::SystemObject, "ModuleControlService").singleton()
    }
}

// --- ConfigService ----------------------------------------------------------

pub struct ConfigService {
    app: Weak<AppControl>,
    state: ServiceState,
}

forward_object_control!(ConfigService);

impl ConfigControl for ConfigService {
    fn load_config(&self, path: &str) -> ConfigProcessResult {
        match self.app.upgrade() {
            Some(app) => app.load_config_file(std::path::Path::new(path)),
            None => ConfigProcessResult::Failed,
        }
    }

    fn save_config(&self, path: &str) -> bool {
        let Some(app) = self.app.upgrade() else {
            return false;
        };
        let mut text = app.modules().save_config(&[]);
        let ignore: Vec<String> = CORE_SERVICE_CLASSES
            .iter()
            .map(|c| c.to_string())
            .chain([DEFAULT_LOGGER_CLASS.to_string()])
            .collect();
        text.push_str(&app.repository().save_config(&ignore));
        std::fs::write(path, text).is_ok()
    }
}

impl InterfaceAccess for ConfigService {
    fn get_interface(&self, id: InterfaceId) -> Option<InterfaceRef<'_>> {
        static MAP: LazyLock<InterfaceMap<ConfigService>> = LazyLock::new(|| {
            InterfaceMap::builder()
                .entry(iid::<dyn ObjectControl>(), |o| {
                    InterfaceRef::new::<dyn ObjectControl>(o)
                })
                .entry(iid::<dyn ConfigControl>(), |o| {
                    InterfaceRef::new::<dyn ConfigControl>(o)
                })
                .build()
        });
        MAP.resolve(self, id)
    }
}

impl ServiceObject for ConfigService {
    fn class_info(&self) -> ClassInfo {
        ClassInfo::new(ObjectKind::SystemObject, "ConfigService").singleton()
    }
}

// --- DefaultLoggerService ---------------------------------------------------

/// Forwards records to the process logging facade.
pub struct DefaultLoggerService {
    state: ServiceState,
    tag: Mutex<String>,
    filter: Mutex<(LogSeverity, LogSeverity)>,
}

forward_object_control!(DefaultLoggerService);

impl Logger for DefaultLoggerService {
    fn log(&self, severity: LogSeverity, message: &str) {
        let (filter, _view) = *self.filter.lock().unwrap();
        if severity < filter {
            return;
        }
        let tag = self.tag.lock().unwrap();
        let level = match severity {
            LogSeverity::Trace => Level::Trace,
            LogSeverity::Debug => Level::Debug,
            LogSeverity::Info => Level::Info,
            LogSeverity::Warning => Level::Warn,
            LogSeverity::Error | LogSeverity::Fatal => Level::Error,
        };
        if tag.is_empty() {
            log!(level, "{message}");
        } else {
            log!(level, "[{tag}] {message}");
        }
    }
}

impl LoggerConfig for DefaultLoggerService {
    fn set_program_tag(&self, tag: &str) {
        *self.tag.lock().unwrap() = tag.to_string();
    }

    fn set_log_filter(&self, filter: LogSeverity, view_filter: LogSeverity) {
        *self.filter.lock().unwrap() = (filter, view_filter);
    }
}

impl InterfaceAccess for DefaultLoggerService {
    fn get_interface(&self, id: InterfaceId) -> Option<InterfaceRef<'_>> {
        static MAP: LazyLock<InterfaceMap<DefaultLoggerService>> = LazyLock::new(|| {
            InterfaceMap::builder()
                .entry(iid::<dyn ObjectControl>(), |o| {
                    InterfaceRef::new::<dyn ObjectControl>(o)
                })
                .entry(iid::<dyn Logger>(), |o| InterfaceRef::new::<dyn Logger>(o))
                .entry(iid::<dyn LoggerConfig>(), |o| {
                    InterfaceRef::new::<dyn LoggerConfig>(o)
                })
                .build()
        });
        MAP.resolve(self, id)
    }
}

impl ServiceObject for DefaultLoggerService {
    fn class_info(&self) -> ClassInfo {
        ClassInfo::new(ObjectKind::SystemObject, DEFAULT_LOGGER_CLASS).singleton()
    }
}

// --- the factory ------------------------------------------------------------

struct CoreServicesFactory {
    app: Weak<AppControl>,
    modules: Arc<ModuleHost>,
    repository: Weak<Repository>,
}

impl ModuleFactory for CoreServicesFactory {
    fn module_info(&self) -> ModuleInfo {
        ModuleInfo {
            name: "SDV core services".into(),
            version: env!("CARGO_PKG_VERSION").into(),
            build_id: "builtin".into(),
        }
    }

    fn class_list(&self) -> Vec<ClassInfo> {
        vec![
            ClassInfo::new(ObjectKind::SystemObject, "AppControlService").singleton(),
            ClassInfo::new(ObjectKind::SystemObject, "RepositoryService").singleton(),
            ClassInfo::new(ObjectKind::SystemObject, "ModuleControlService").singleton(),
            ClassInfo::new(ObjectKind::SystemObject, "ConfigService").singleton(),
            ClassInfo::new(ObjectKind::SystemObject, DEFAULT_LOGGER_CLASS).singleton(),
        ]
    }

    fn has_active_objects(&self) -> bool {
        // Lifetimes of the core service objects are tracked by the
        // repository itself.
        false
    }

    fn create_object(
        &self,
        class: &str,
        _instance: &str,
        _config: &str,
    ) -> Option<Arc<dyn ServiceObject>> {
        match class {
            "AppControlService" => Some(Arc::new(AppControlService {
                app: self.app.clone(),
                state: ServiceState::new(),
            })),
            "RepositoryService" => Some(Arc::new(RepositoryService {
                repository: self.repository.clone(),
                state: ServiceState::new(),
            })),
            "ModuleControlService" => Some(Arc::new(ModuleControlService {
                app: self.app.clone(),
                modules: self.modules.clone(),
                state: ServiceState::new(),
            })),
            "ConfigService" => Some(Arc::new(ConfigService {
                app: self.app.clone(),
                state: ServiceState::new(),
            })),
            DEFAULT_LOGGER_CLASS => Some(Arc::new(DefaultLoggerService {
                state: ServiceState::new(),
                tag: Mutex::new(String::new()),
                filter: Mutex::new((LogSeverity::Info, LogSeverity::Error)),
            })),
            _ => None,
        }
    }
}

/// Register the builtin core services module with the controller's module
/// host.
pub fn register_core_services(app: &Arc<AppControl>) -> ModuleId {
    let factory: BoxedFactory = Box::new(CoreServicesFactory {
        app: Arc::downgrade(app),
        modules: app.modules().clone(),
        repository: Arc::downgrade(app.repository()),
    });
    app.modules().register_builtin(CORE_SERVICES_MODULE, factory)
}
