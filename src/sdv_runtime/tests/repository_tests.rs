//! Repository and module host behavior, driven through an in-process test
//! module.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, LazyLock, Mutex};

use sdv_object::{
    iid, ClassInfo, InterfaceAccess, InterfaceId, InterfaceMap, InterfaceRef, ObjectControl,
    ObjectKind, ObjectStatus, OperationMode, ServiceObject,
};
use sdv_runtime::{
    LoadPolicy, ModuleError, ModuleFactory, ModuleHost, ModuleInfo, Repository, RepositoryError,
};

/// Object driven by the repository lifecycle. Shutdowns are appended to the
/// shared journal so teardown ordering is observable.
struct TestObject {
    class: ClassInfo,
    name: String,
    fail_init: bool,
    status: Mutex<ObjectStatus>,
    active: Arc<AtomicUsize>,
    journal: Arc<Mutex<Vec<String>>>,
}

impl ObjectControl for TestObject {
    fn initialize(&self, _config: &str) {
        let mut status = self.status.lock().unwrap();
        *status = if self.fail_init {
            ObjectStatus::InitializationFailure
        } else {
            ObjectStatus::Initialized
        };
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
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.journal.lock().unwrap().push(self.name.clone());
    }
}

impl InterfaceAccess for TestObject {
    fn get_interface(&self, id: InterfaceId) -> Option<InterfaceRef<'_>> {
        static MAP: LazyLock<InterfaceMap<TestObject>> = LazyLock::new(|| {
            InterfaceMap::builder()
                .entry(iid::<dyn ObjectControl>(), |o| {
                    InterfaceRef::new::<dyn ObjectControl>(o)
                })
                .build()
        });
        MAP.resolve(self, id)
    }
}

impl ServiceObject for TestObject {
    fn class_info(&self) -> ClassInfo {
        self.class.clone()
    }
}

struct TestModule {
    classes: Vec<ClassInfo>,
    active: Arc<AtomicUsize>,
    journal: Arc<Mutex<Vec<String>>>,
}

impl ModuleFactory for TestModule {
    fn module_info(&self) -> ModuleInfo {
        ModuleInfo {
            name: "repository test module".into(),
            version: "1.0".into(),
            build_id: "test".into(),
        }
    }

    fn class_list(&self) -> Vec<ClassInfo> {
        self.classes.clone()
    }

    fn has_active_objects(&self) -> bool {
        self.active.load(Ordering::SeqCst) > 0
    }

    fn create_object(
        &self,
        class: &str,
        instance: &str,
        _config: &str,
    ) -> Option<Arc<dyn ServiceObject>> {
        let info = self.classes.iter().find(|c| c.answers_to(class))?;
        self.active.fetch_add(1, Ordering::SeqCst);
        Some(Arc::new(TestObject {
            class: info.clone(),
            name: instance.to_string(),
            fail_init: class == "FailingObject",
            status: Mutex::new(ObjectStatus::InitializationPending),
            active: self.active.clone(),
            journal: self.journal.clone(),
        }))
    }
}

struct Fixture {
    host: Arc<ModuleHost>,
    repository: Repository,
    active: Arc<AtomicUsize>,
    journal: Arc<Mutex<Vec<String>>>,
    module_id: sdv_runtime::ModuleId,
}

fn fixture() -> Fixture {
    let dir = std::env::temp_dir();
    let host = Arc::new(ModuleHost::new(&dir, &dir));
    let active = Arc::new(AtomicUsize::new(0));
    let journal = Arc::new(Mutex::new(Vec::new()));
    let classes = vec![
        ClassInfo::new(ObjectKind::BasicService, "Foo")
            .singleton()
            .with_default_instance("MyFoo"),
        ClassInfo::new(ObjectKind::Device, "Dev").with_default_instance("MyDev"),
        ClassInfo::new(ObjectKind::ComplexService, "Svc")
            .with_dependencies(["Dev".to_string()]),
        ClassInfo::new(ObjectKind::Utility, "FailingObject"),
        ClassInfo::new(ObjectKind::BasicService, "CycleA")
            .with_dependencies(["CycleB".to_string()]),
        ClassInfo::new(ObjectKind::BasicService, "CycleB")
            .with_dependencies(["CycleA".to_string()]),
    ];
    let module_id = host.register_builtin(
        "repository_test_module.sdv",
        Box::new(TestModule {
            classes,
            active: active.clone(),
            journal: journal.clone(),
        }),
    );
    let repository = Repository::new(host.clone());
    Fixture {
        host,
        repository,
        active,
        journal,
        module_id,
    }
}

#[test]
fn loading_a_nonexistent_module_fails_and_is_retained() {
    let fx = fixture();
    let missing = std::env::temp_dir().join("no_such_module.sdv");
    let first = fx.host.load(&missing);
    assert!(matches!(first, Err(ModuleError::NotFound(_))));
    // The invalid record is retained: the second load observes the same
    // failure without a fresh mapping attempt.
    let second = fx.host.load(&missing);
    assert!(matches!(second, Err(ModuleError::NotFound(_))));
    let invalid: Vec<_> = fx
        .host
        .module_list()
        .into_iter()
        .filter(|m| !m.valid)
        .collect();
    assert_eq!(invalid.len(), 1);
}

#[test]
fn creating_a_nonexistent_class_fails() {
    let fx = fixture();
    match fx.repository.create("TestFooBar", "", "") {
        Err(RepositoryError::ClassNotFound(class)) => assert_eq!(class, "TestFooBar"),
        other => panic!("expected class-not-found, got {other:?}"),
    }
}

#[test]
fn getting_a_nonexistent_object_yields_none() {
    let fx = fixture();
    fx.repository.create("Dev", "Example_Object", "").unwrap();
    assert!(fx.repository.object("TestFooBar").is_none());
    assert!(fx.repository.object("Example_Object").is_some());
    fx.repository.destroy("Example_Object");
    assert!(fx.repository.object("Example_Object").is_none());
}

#[test]
fn create_uses_the_default_instance_name() {
    let fx = fixture();
    fx.repository.create("Foo", "", "").unwrap();
    assert_eq!(
        fx.repository.object_status("MyFoo"),
        Some(ObjectStatus::Initialized)
    );

    fx.repository.destroy("Foo");
    assert!(fx.repository.object("MyFoo").is_none());
    assert!(!fx.host.has_active_objects(fx.module_id));
    fx.host.unload(fx.module_id, false).unwrap();
}

#[test]
fn singleton_violation_leaves_the_repository_unchanged() {
    let fx = fixture();
    fx.repository.create("Foo", "a", "").unwrap();
    match fx.repository.create("Foo", "b", "") {
        Err(RepositoryError::SingletonViolated(class)) => assert_eq!(class, "Foo"),
        other => panic!("expected singleton violation, got {other:?}"),
    }
    assert_eq!(fx.repository.object_names(), vec!["a".to_string()]);
}

#[test]
fn dependencies_are_created_automatically_and_torn_down_in_reverse() {
    let fx = fixture();
    fx.repository.create("Svc", "", "").unwrap();
    assert!(fx.repository.object("MyDev").is_some());
    assert!(fx.repository.object("Svc").is_some());

    fx.repository.destroy_all(&[]);
    let journal = fx.journal.lock().unwrap();
    assert_eq!(*journal, vec!["Svc".to_string(), "MyDev".to_string()]);
}

#[test]
fn dependency_cycles_are_detected() {
    let fx = fixture();
    match fx.repository.create("CycleA", "", "") {
        Err(RepositoryError::DependencyCycle(_)) => {}
        other => panic!("expected a dependency cycle, got {other:?}"),
    }
    assert!(fx.repository.object_names().is_empty());
}

#[test]
fn failed_initialization_destroys_the_object() {
    let fx = fixture();
    match fx.repository.create("FailingObject", "", "") {
        Err(RepositoryError::InitializationFailed(_)) => {}
        other => panic!("expected initialization failure, got {other:?}"),
    }
    assert!(fx.repository.object("FailingObject").is_none());
    // The factory saw the shutdown of the half-constructed object.
    assert_eq!(fx.active.load(Ordering::SeqCst), 0);
}

#[test]
fn unload_refuses_while_objects_are_live() {
    let fx = fixture();
    fx.repository.create("Foo", "", "").unwrap();
    assert!(fx.host.has_active_objects(fx.module_id));
    match fx.host.unload(fx.module_id, false) {
        Err(ModuleError::ActiveObjects(id)) => assert_eq!(id, fx.module_id),
        other => panic!("expected active-objects refusal, got {other:?}"),
    }
    // The record is intact.
    assert!(fx
        .host
        .module_list()
        .iter()
        .any(|m| m.id == fx.module_id && m.valid));

    fx.repository.destroy("Foo");
    fx.host.unload(fx.module_id, false).unwrap();
    assert!(!fx.host.module_list().iter().any(|m| m.id == fx.module_id));
}

#[test]
fn destroy_all_is_reverse_creation_order() {
    let fx = fixture();
    fx.repository.create("Dev", "one", "").unwrap();
    fx.repository.create("Dev", "two", "").unwrap();
    fx.repository.create("Dev", "three", "").unwrap();
    fx.repository.destroy_all(&[]);
    assert_eq!(
        *fx.journal.lock().unwrap(),
        vec!["three".to_string(), "two".to_string(), "one".to_string()]
    );
}

#[test]
fn destroy_all_preserves_the_ignore_list() {
    let fx = fixture();
    fx.repository.create("Dev", "keep", "").unwrap();
    fx.repository.create("Dev", "drop", "").unwrap();
    fx.repository.destroy_all(&["keep".to_string()]);
    assert_eq!(fx.repository.object_names(), vec!["keep".to_string()]);
}

#[test]
fn running_repository_drives_new_objects_to_running() {
    let fx = fixture();
    fx.repository.create("Dev", "early", "").unwrap();
    assert_eq!(
        fx.repository.object_status("early"),
        Some(ObjectStatus::Initialized)
    );

    fx.repository.set_running_mode();
    assert_eq!(
        fx.repository.object_status("early"),
        Some(ObjectStatus::Running)
    );
    fx.repository.create("Dev", "late", "").unwrap();
    assert_eq!(
        fx.repository.object_status("late"),
        Some(ObjectStatus::Running)
    );

    fx.repository.set_config_mode();
    assert_eq!(
        fx.repository.object_status("early"),
        Some(ObjectStatus::Configuring)
    );
}

#[test]
fn load_policy_gates_further_modules() {
    let fx = fixture();
    fx.host.set_load_policy(LoadPolicy::Forbidden);
    let missing = std::env::temp_dir().join("gated_module.sdv");
    assert!(matches!(
        fx.host.load(&missing),
        Err(ModuleError::LoadingForbidden)
    ));
}

#[test]
fn config_save_lists_configuration_modules() {
    let fx = fixture();
    fx.host.mark_config_module(fx.module_id);
    let saved = fx.host.save_config(&[]);
    assert!(saved.contains("[[Module]]"));
    assert!(saved.contains("Path = \"repository_test_module.sdv\""));

    fx.host.reset_config_baseline();
    assert!(fx.host.save_config(&[]).is_empty());
}
