//! The process-global object repository.
//!
//! Maps instance names to live objects, drives their lifecycle, enforces
//! singleton and default-naming policies, auto-creates declared
//! dependencies, and tears objects down in the exact reverse of their
//! creation order. All mutations serialize on one internal lock; dependency
//! auto-creation recurses with the lock held, passing the guarded state
//! down instead of re-locking.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use log::{debug, info, warn};
use sdv_object::{query, ClassInfo, ObjectControl, ObjectStatus, OperationMode, ServiceObject};

use crate::error::RepositoryError;
use crate::module_host::{ModuleHost, ModuleId};

struct RepoEntry {
    name: String,
    class: ClassInfo,
    module: ModuleId,
    object: Arc<dyn ServiceObject>,
    /// Creation order; teardown walks it backwards.
    index: u64,
    /// Configuration string the object was initialized with; written back
    /// by the configuration save.
    config: String,
}

struct RepoState {
    entries: Vec<RepoEntry>,
    next_index: u64,
    /// Whether freshly created objects are driven straight to running.
    running: bool,
}

/// The repository. Holds the objects it created; consumers receive
/// `Arc<dyn ServiceObject>` clones and query capabilities from them.
pub struct Repository {
    modules: Arc<ModuleHost>,
    inner: Mutex<RepoState>,
}

impl Repository {
    pub fn new(modules: Arc<ModuleHost>) -> Self {
        Repository {
            modules,
            inner: Mutex::new(RepoState {
                entries: Vec::new(),
                next_index: 0,
                running: false,
            }),
        }
    }

    /// Create an object of `class` under `instance_name` (empty: the
    /// class's default instance name, falling back to the class name) and
    /// initialize it with `config`.
    pub fn create(
        &self,
        class: &str,
        instance_name: &str,
        config: &str,
    ) -> Result<(), RepositoryError> {
        let mut state = self.inner.lock().unwrap();
        let mut creating = HashSet::new();
        self.create_locked(&mut state, class, instance_name, config, &mut creating)
    }

    fn create_locked(
        &self,
        state: &mut RepoState,
        class: &str,
        instance_name: &str,
        config: &str,
        creating: &mut HashSet<String>,
    ) -> Result<(), RepositoryError> {
        let (module_id, class_info) = self
            .modules
            .find_class(class)
            .ok_or_else(|| RepositoryError::ClassNotFound(class.to_string()))?;

        if !creating.insert(class_info.class_name.clone()) {
            return Err(RepositoryError::DependencyCycle(
                class_info.class_name.clone(),
            ));
        }

        let effective_name = if !instance_name.is_empty() {
            instance_name.to_string()
        } else if !class_info.default_instance.is_empty() {
            class_info.default_instance.clone()
        } else {
            class_info.class_name.clone()
        };

        if state.entries.iter().any(|e| e.name == effective_name) {
            return Err(RepositoryError::InstanceExists(effective_name));
        }
        if class_info.singleton
            && state
                .entries
                .iter()
                .any(|e| e.class.class_name == class_info.class_name)
        {
            return Err(RepositoryError::SingletonViolated(
                class_info.class_name.clone(),
            ));
        }

        // Declared dependencies must exist and be at least initialized;
        // missing ones are created on the fly.
        for dependency in class_info.dependencies.clone() {
            let satisfied = state.entries.iter().any(|e| {
                e.class.answers_to(&dependency)
                    && query::<dyn ObjectControl, _>(&*e.object)
                        .map(|c| c.object_status() >= ObjectStatus::Initialized)
                        .unwrap_or(false)
            });
            if satisfied {
                continue;
            }
            debug!(
                "auto-creating dependency '{dependency}' of class '{}'",
                class_info.class_name
            );
            self.create_locked(state, &dependency, "", "", creating)?;
        }

        let object = self
            .modules
            .create_object(module_id, &class_info.class_name, &effective_name, config)
            .ok_or_else(|| RepositoryError::ClassNotFound(class_info.class_name.clone()))?;

        let control = query::<dyn ObjectControl, _>(&*object);
        match control {
            Some(control) => {
                control.initialize(config);
                if control.object_status() != ObjectStatus::Initialized {
                    warn!(
                        "object '{effective_name}' of class '{}' did not reach the initialized state",
                        class_info.class_name
                    );
                    control.shutdown();
                    return Err(RepositoryError::InitializationFailed(
                        class_info.class_name.clone(),
                    ));
                }
            }
            None => {
                return Err(RepositoryError::InitializationFailed(
                    class_info.class_name.clone(),
                ));
            }
        }

        let index = state.next_index;
        state.next_index += 1;
        info!(
            "created object '{effective_name}' of class '{}' (index {index})",
            class_info.class_name
        );
        let running = state.running;
        let class_name = class_info.class_name.clone();
        state.entries.push(RepoEntry {
            name: effective_name,
            class: class_info,
            module: module_id,
            object: object.clone(),
            index,
            config: config.to_string(),
        });
        self.modules.add_live_object(module_id);
        creating.remove(&class_name);

        if running {
            if let Some(control) = query::<dyn ObjectControl, _>(&*object) {
                control.set_operation_mode(OperationMode::Running);
            }
        }
        Ok(())
    }

    /// Get a live object by instance name.
    pub fn object(&self, name: &str) -> Option<Arc<dyn ServiceObject>> {
        let state = self.inner.lock().unwrap();
        state
            .entries
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.object.clone())
    }

    /// Instance names in creation order.
    pub fn object_names(&self) -> Vec<String> {
        let state = self.inner.lock().unwrap();
        state.entries.iter().map(|e| e.name.clone()).collect()
    }

    /// Destroy an object addressed by instance name or class name. A miss
    /// succeeds silently.
    pub fn destroy(&self, name: &str) {
        let mut state = self.inner.lock().unwrap();
        let pos = state
            .entries
            .iter()
            .position(|e| e.name == name)
            .or_else(|| {
                state
                    .entries
                    .iter()
                    .position(|e| e.class.answers_to(name))
            });
        if let Some(pos) = pos {
            let entry = state.entries.remove(pos);
            Self::shut_down_entry(&entry);
            self.modules.release_live_object(entry.module);
        }
    }

    fn shut_down_entry(entry: &RepoEntry) {
        info!("destroying object '{}'", entry.name);
        if let Some(control) = query::<dyn ObjectControl, _>(&*entry.object) {
            control.shutdown();
        }
    }

    /// Destroy every object in reverse creation order, preserving the
    /// instances named in `ignore` (by instance or class name).
    pub fn destroy_all(&self, ignore: &[String]) {
        let mut state = self.inner.lock().unwrap();
        let mut keep = Vec::new();
        let mut entries = std::mem::take(&mut state.entries);
        entries.sort_by_key(|e| e.index);
        while let Some(entry) = entries.pop() {
            let ignored = ignore
                .iter()
                .any(|name| entry.name == *name || entry.class.answers_to(name));
            if ignored {
                keep.push(entry);
                continue;
            }
            Self::shut_down_entry(&entry);
            self.modules.release_live_object(entry.module);
        }
        keep.reverse();
        state.entries = keep;
    }

    /// Switch every live object to configuration mode.
    pub fn set_config_mode(&self) {
        self.sweep_operation_mode(OperationMode::Configuring, false);
    }

    /// Switch every live object to running mode.
    pub fn set_running_mode(&self) {
        self.sweep_operation_mode(OperationMode::Running, true);
    }

    fn sweep_operation_mode(&self, mode: OperationMode, running: bool) {
        let mut state = self.inner.lock().unwrap();
        state.running = running;
        for entry in &state.entries {
            if let Some(control) = query::<dyn ObjectControl, _>(&*entry.object) {
                // Objects whose current status does not admit the switch
                // ignore the call themselves.
                if control.object_status().is_live() {
                    control.set_operation_mode(mode);
                }
            }
        }
    }

    /// One `[ClassName]` block per persistent object, bodies as stored at
    /// creation. Objects of transient classes in `ignore_classes` are
    /// skipped.
    pub fn save_config(&self, ignore_classes: &[String]) -> String {
        let state = self.inner.lock().unwrap();
        let mut out = String::new();
        for entry in &state.entries {
            if ignore_classes
                .iter()
                .any(|c| entry.class.answers_to(c))
            {
                continue;
            }
            out.push_str(&format!("\n[{}]\n", entry.class.class_name));
            if !entry.config.is_empty() {
                out.push_str(&entry.config);
                if !entry.config.ends_with('\n') {
                    out.push('\n');
                }
            }
        }
        out
    }

    /// Status of the named object, if it is live.
    pub fn object_status(&self, name: &str) -> Option<ObjectStatus> {
        let object = self.object(name)?;
        query::<dyn ObjectControl, _>(&*object).map(|c| c.object_status())
    }
}
