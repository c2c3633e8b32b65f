//! Controller behavior: startup and shutdown choreography, instance
//! locking, events, run loop and configuration replay.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, LazyLock, Mutex};
use std::time::Duration;

use sdv_core::{
    AppControl, AppEvent, AppEventSink, AppOperation, AppOperationState, ShutdownRequestListener,
    StartupError,
};
use sdv_object::{
    iid, ClassInfo, InterfaceAccess, InterfaceId, InterfaceMap, InterfaceRef, ObjectControl,
    ObjectKind, ObjectStatus, OperationMode, ServiceObject,
};
use sdv_runtime::{ModuleFactory, ModuleInfo};

struct RecordingSink(Mutex<Vec<AppEvent>>);

impl AppEventSink for RecordingSink {
    fn process_event(&self, event: AppEvent) {
        self.0.lock().unwrap().push(event);
    }
}

#[test]
fn standalone_startup_brings_up_the_core_services() {
    let dir = tempfile::tempdir().unwrap();
    let app = AppControl::new(dir.path());
    app.startup("", None).unwrap();
    assert_eq!(app.operation_state(), AppOperationState::Running);

    // Every repository object is live and running (startup switches the
    // repository to running mode).
    let names = app.repository().object_names();
    for name in [
        "AppControlService",
        "RepositoryService",
        "ModuleControlService",
        "ConfigService",
        "DefaultLoggerService",
    ] {
        assert!(names.contains(&name.to_string()), "missing {name}");
        assert_eq!(
            app.repository().object_status(name),
            Some(ObjectStatus::Running)
        );
    }

    app.shutdown(false);
    assert_eq!(app.operation_state(), AppOperationState::NotStarted);
    assert!(app.repository().object_names().is_empty());
}

#[test]
fn startup_twice_is_an_invalid_state() {
    let dir = tempfile::tempdir().unwrap();
    let app = AppControl::new(dir.path());
    app.startup("", None).unwrap();
    assert!(matches!(
        app.startup("", None),
        Err(StartupError::InvalidState)
    ));
    app.shutdown(false);
}

#[test]
fn invalid_mode_fails_startup() {
    let dir = tempfile::tempdir().unwrap();
    let app = AppControl::new(dir.path());
    let result = app.startup("[Application]\nMode = \"Sideways\"\n[Console]\nReport = \"Silent\"\n", None);
    assert!(matches!(result, Err(StartupError::InvalidMode(_))));
    assert_eq!(app.operation_state(), AppOperationState::NotStarted);
}

#[test]
fn events_follow_the_state_machine() {
    let dir = tempfile::tempdir().unwrap();
    let sink = Arc::new(RecordingSink(Mutex::new(Vec::new())));
    let app = AppControl::new(dir.path());
    app.startup("", Some(sink.clone())).unwrap();
    app.shutdown(false);

    let states: Vec<AppOperationState> = sink
        .0
        .lock()
        .unwrap()
        .iter()
        .filter_map(|e| match e {
            AppEvent::OperationStateChanged(state) => Some(*state),
            AppEvent::RunningLoop => None,
        })
        .collect();
    assert_eq!(
        states,
        vec![
            AppOperationState::Initializing,
            AppOperationState::Initialized,
            AppOperationState::Configuring,
            AppOperationState::Running,
            AppOperationState::ShuttingDown,
            AppOperationState::NotStarted,
        ]
    );
}

#[test]
fn main_mode_takes_the_instance_lock() {
    let dir = tempfile::tempdir().unwrap();
    let config = "[Application]\nMode = \"Main\"\nInstance = 42\n[Console]\nReport = \"Silent\"\n";

    let first = AppControl::new(dir.path());
    first.startup(config, None).unwrap();
    assert!(dir.path().join("sdv_core_42.lock").exists());
    // The settings template was created under the installation root.
    assert!(dir.path().join("42").join("settings.toml").exists());

    // A second main application with the same instance id is refused.
    let second = AppControl::new(dir.path());
    match second.startup(config, None) {
        Err(StartupError::InstanceAlreadyRunning) => {}
        other => panic!("expected the instance lock to hold, got {other:?}"),
    }

    // Graceful shutdown releases and removes the lock file.
    first.shutdown(false);
    assert!(!dir.path().join("sdv_core_42.lock").exists());
    second.startup(config, None).unwrap();
    second.shutdown(false);
}

#[test]
fn stale_lock_files_are_reacquired() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("sdv_core_43.lock"), b"stale").unwrap();

    let app = AppControl::new(dir.path());
    app.startup(
        "[Application]\nMode = \"Main\"\nInstance = 43\n[Console]\nReport = \"Silent\"\n",
        None,
    )
    .unwrap();
    app.shutdown(false);
}

#[test]
fn run_loop_requires_a_started_application() {
    let dir = tempfile::tempdir().unwrap();
    let app = AppControl::new(dir.path());
    assert!(matches!(app.run_loop(), Err(StartupError::InvalidState)));
}

#[test]
fn run_loop_is_denied_in_maintenance_mode() {
    let dir = tempfile::tempdir().unwrap();
    let app = AppControl::new(dir.path());
    app.startup(
        "[Application]\nMode = \"Maintenance\"\n[Console]\nReport = \"Silent\"\n",
        None,
    )
    .unwrap();
    assert!(matches!(app.run_loop(), Err(StartupError::AccessDenied(_))));
    app.shutdown(false);
}

#[test]
fn run_loop_exits_on_request_and_emits_tick_events() {
    let dir = tempfile::tempdir().unwrap();
    let sink = Arc::new(RecordingSink(Mutex::new(Vec::new())));
    let app = AppControl::new(dir.path());
    app.startup("", Some(sink.clone())).unwrap();
    app.set_loop_tick(Duration::from_millis(1));

    let runner = {
        let app = app.clone();
        std::thread::spawn(move || app.run_loop())
    };
    std::thread::sleep(Duration::from_millis(50));
    app.request_shutdown();
    runner.join().unwrap().unwrap();

    let ticks = sink
        .0
        .lock()
        .unwrap()
        .iter()
        .filter(|e| matches!(e, AppEvent::RunningLoop))
        .count();
    assert!(ticks > 0, "expected running-loop events");
    app.shutdown(false);
}

#[test]
fn external_shutdown_request_stops_the_loop() {
    let dir = tempfile::tempdir().unwrap();
    let app = AppControl::new(dir.path());
    app.startup(
        "[Application]\nMode = \"Isolated\"\nInstance = 77\n[Console]\nReport = \"Silent\"\n",
        None,
    )
    .unwrap();
    app.set_loop_tick(Duration::from_millis(1));

    let runner = {
        let app = app.clone();
        std::thread::spawn(move || app.run_loop())
    };
    std::thread::sleep(Duration::from_millis(20));
    ShutdownRequestListener::trigger(dir.path(), 77).unwrap();
    runner.join().unwrap().unwrap();
    app.shutdown(false);
}

// --- configuration replay ---------------------------------------------------

struct SensorObject {
    status: Mutex<ObjectStatus>,
}

impl ObjectControl for SensorObject {
    fn initialize(&self, _config: &str) {
        *self.status.lock().unwrap() = ObjectStatus::Initialized;
    }
    fn object_status(&self) -> ObjectStatus {
        *self.status.lock().unwrap()
    }
    fn set_operation_mode(&self, mode: OperationMode) {
        let mut status = self.status.lock().unwrap();
        if status.is_live() {
            *status = match mode {
                OperationMode::Configuring => ObjectStatus::Configuring,
                OperationMode::Running => ObjectStatus::Running,
            };
        }
    }
    fn shutdown(&self) {
        *self.status.lock().unwrap() = ObjectStatus::DestructionPending;
    }
}

impl InterfaceAccess for SensorObject {
    fn get_interface(&self, id: InterfaceId) -> Option<InterfaceRef<'_>> {
        static MAP: LazyLock<InterfaceMap<SensorObject>> = LazyLock::new(|| {
            InterfaceMap::builder()
                .entry(iid::<dyn ObjectControl>(), |o| {
                    InterfaceRef::new::<dyn ObjectControl>(o)
                })
                .build()
        });
        MAP.resolve(self, id)
    }
}

impl ServiceObject for SensorObject {
    fn class_info(&self) -> ClassInfo {
        ClassInfo::new(ObjectKind::Device, "TestSensor")
    }
}

struct SensorModule {
    configs: Arc<Mutex<Vec<String>>>,
    live: Arc<AtomicUsize>,
}

impl ModuleFactory for SensorModule {
    fn module_info(&self) -> ModuleInfo {
        ModuleInfo {
            name: "sensor test module".into(),
            version: "1.0".into(),
            build_id: "test".into(),
        }
    }
    fn class_list(&self) -> Vec<ClassInfo> {
        vec![ClassInfo::new(ObjectKind::Device, "TestSensor")]
    }
    fn has_active_objects(&self) -> bool {
        self.live.load(Ordering::SeqCst) > 0
    }
    fn create_object(
        &self,
        class: &str,
        _instance: &str,
        config: &str,
    ) -> Option<Arc<dyn ServiceObject>> {
        if class != "TestSensor" {
            return None;
        }
        self.configs.lock().unwrap().push(config.to_string());
        self.live.fetch_add(1, Ordering::SeqCst);
        Some(Arc::new(SensorObject {
            status: Mutex::new(ObjectStatus::InitializationPending),
        }))
    }
}

#[test]
fn application_config_creates_objects_with_their_table_bodies() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("app.toml"),
        "[TestSensor]\nrate = 10\nbus = \"CAN0\"\n",
    )
    .unwrap();

    let app = AppControl::new(dir.path());
    let configs = Arc::new(Mutex::new(Vec::new()));
    app.modules().register_builtin(
        "sensor_module.sdv",
        Box::new(SensorModule {
            configs: configs.clone(),
            live: Arc::new(AtomicUsize::new(0)),
        }),
    );

    app.startup(
        "[Application]\nConfig = \"app.toml\"\n[Console]\nReport = \"Silent\"\n",
        None,
    )
    .unwrap();

    assert!(app.repository().object("TestSensor").is_some());
    let seen = configs.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert!(seen[0].contains("rate = 10"));
    assert!(seen[0].contains("bus = \"CAN0\""));
    drop(seen);
    app.shutdown(false);
}

#[test]
fn missing_application_config_fails_startup() {
    let dir = tempfile::tempdir().unwrap();
    let app = AppControl::new(dir.path());
    let result = app.startup(
        "[Application]\nConfig = \"absent.toml\"\n[Console]\nReport = \"Silent\"\n",
        None,
    );
    assert!(matches!(result, Err(StartupError::ConfigLoad(_))));
    assert_eq!(app.operation_state(), AppOperationState::NotStarted);
}
