//! Loading, tracking and unloading of modules.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use log::{debug, error, info, warn};
use sdv_object::ClassInfo;
use serde::Serialize;

use crate::error::ModuleError;
use crate::module_abi::{BoxedFactory, ModuleEntryFn, ModuleInfo, MODULE_ENTRY_SYMBOL};

pub type ModuleId = u64;

/// Reserved id of the core services module; it is never unloaded by the
/// normal path.
pub const CORE_MODULE_ID: ModuleId = 1;

/// How many further modules the current application mode admits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadPolicy {
    /// No restriction.
    Unrestricted,
    /// A bounded number of additional modules (isolated applications load a
    /// single context module).
    Limited(usize),
    /// No further modules at all (maintenance applications).
    Forbidden,
}

/// Resolves class names to module paths from the installation manifests.
/// Consulted only when the application runs in main or isolated mode; the
/// controller installs it accordingly.
pub trait ManifestResolver: Send + Sync {
    fn resolve_class(&self, class: &str) -> Option<PathBuf>;
}

enum Backing {
    /// Registered in-process; no library mapping.
    Builtin,
    /// Mapped shared library. Kept alive as long as the factory lives.
    Dynamic(libloading::Library),
    /// Retained record of a failed load, so repeated loads observe the same
    /// failure without re-mapping.
    Invalid(ModuleError),
}

struct ModuleRecord {
    id: ModuleId,
    /// Path as configured by the caller.
    configured_path: PathBuf,
    /// Resolved absolute path (or the configured path for builtins).
    resolved_path: PathBuf,
    backing: Backing,
    factory: Option<BoxedFactory>,
    /// Repository-tracked objects owned by this module.
    live_objects: usize,
}

impl ModuleRecord {
    fn is_valid(&self) -> bool {
        self.factory.is_some()
    }
}

/// Summary row for module listings.
#[derive(Debug, Clone, Serialize)]
pub struct ModuleSummary {
    pub id: ModuleId,
    pub configured_path: PathBuf,
    pub resolved_path: PathBuf,
    pub valid: bool,
    pub live_objects: usize,
    pub info: Option<ModuleInfo>,
}

struct HostState {
    /// Load order is preserved; unload-all walks it backwards.
    modules: Vec<ModuleRecord>,
    search_dirs: Vec<PathBuf>,
    next_id: ModuleId,
    /// Modules that belong in the persisted configuration.
    config_modules: BTreeSet<ModuleId>,
    policy: LoadPolicy,
}

/// The process-wide module table.
pub struct ModuleHost {
    inner: Mutex<HostState>,
    core_dir: PathBuf,
    exec_dir: PathBuf,
    resolver: Mutex<Option<Box<dyn ManifestResolver>>>,
}

impl ModuleHost {
    /// `core_dir` is the directory of the core library, `exec_dir` the
    /// directory of the running executable. Both head the search order.
    pub fn new(core_dir: impl Into<PathBuf>, exec_dir: impl Into<PathBuf>) -> Self {
        ModuleHost {
            inner: Mutex::new(HostState {
                modules: Vec::new(),
                search_dirs: Vec::new(),
                next_id: CORE_MODULE_ID + 1,
                config_modules: BTreeSet::new(),
                policy: LoadPolicy::Unrestricted,
            }),
            core_dir: core_dir.into(),
            exec_dir: exec_dir.into(),
            resolver: Mutex::new(None),
        }
    }

    pub fn set_load_policy(&self, policy: LoadPolicy) {
        self.inner.lock().unwrap().policy = policy;
    }

    pub fn set_manifest_resolver(&self, resolver: Option<Box<dyn ManifestResolver>>) {
        *self.resolver.lock().unwrap() = resolver;
    }

    /// Add a directory modules may be found in. Relative directories are
    /// taken relative to the executable directory.
    pub fn add_search_dir(&self, dir: impl AsRef<Path>) -> bool {
        let mut dir = dir.as_ref().to_path_buf();
        if dir.is_relative() {
            dir = self.exec_dir.join(dir);
        }
        if !dir.is_dir() {
            return false;
        }
        let mut state = self.inner.lock().unwrap();
        if !state.search_dirs.contains(&dir) {
            state.search_dirs.push(dir);
        }
        true
    }

    pub fn search_dirs(&self) -> Vec<PathBuf> {
        let state = self.inner.lock().unwrap();
        let mut dirs = vec![self.core_dir.clone(), self.exec_dir.clone()];
        dirs.extend(state.search_dirs.iter().cloned());
        dirs
    }

    /// Register an in-process factory under a reserved configured path.
    /// `core_services.sdv` receives the reserved core module id.
    pub fn register_builtin(&self, name: &str, factory: BoxedFactory) -> ModuleId {
        let mut state = self.inner.lock().unwrap();
        if let Some(existing) = state
            .modules
            .iter()
            .find(|m| m.configured_path == Path::new(name))
        {
            return existing.id;
        }
        let id = if name == crate::CORE_SERVICES_MODULE {
            CORE_MODULE_ID
        } else {
            let id = state.next_id;
            state.next_id += 1;
            id
        };
        info!("registering builtin module '{name}' as id {id}");
        state.modules.push(ModuleRecord {
            id,
            configured_path: PathBuf::from(name),
            resolved_path: PathBuf::from(name),
            backing: Backing::Builtin,
            factory: Some(factory),
            live_objects: 0,
        });
        id
    }

    fn resolve_path(&self, state: &HostState, configured: &Path) -> PathBuf {
        if configured.is_absolute() {
            return configured.to_path_buf();
        }
        let mut candidates: Vec<PathBuf> = vec![self.core_dir.clone(), self.exec_dir.clone()];
        candidates.extend(state.search_dirs.iter().cloned());
        for dir in candidates {
            let candidate = dir.join(configured);
            if candidate.exists() {
                return candidate;
            }
        }
        // Defer to the OS loader search as the last resort.
        configured.to_path_buf()
    }

    /// Load a module. Loading the same resolved path twice returns the
    /// existing id. A failed load leaves a retained invalid record behind
    /// and reports the failure.
    pub fn load(&self, path: impl AsRef<Path>) -> Result<ModuleId, ModuleError> {
        let configured = path.as_ref().to_path_buf();
        if configured.as_os_str().is_empty() {
            return Err(ModuleError::NotFound(String::new()));
        }
        let mut state = self.inner.lock().unwrap();

        let resolved = self.resolve_path(&state, &configured);
        if let Some(existing) = state.modules.iter().find(|m| {
            m.resolved_path == resolved || m.configured_path == configured
        }) {
            return match &existing.backing {
                Backing::Invalid(err) => Err(clone_error(err)),
                _ => Ok(existing.id),
            };
        }

        match state.policy {
            LoadPolicy::Unrestricted => {}
            LoadPolicy::Forbidden => return Err(ModuleError::LoadingForbidden),
            LoadPolicy::Limited(0) => return Err(ModuleError::LoadingForbidden),
            LoadPolicy::Limited(n) => state.policy = LoadPolicy::Limited(n - 1),
        }

        let id = state.next_id;
        state.next_id += 1;

        let loaded = self.map_library(&resolved);
        let record = match loaded {
            Ok((library, factory)) => {
                info!(
                    "loaded module '{}' as id {id}",
                    resolved.display()
                );
                ModuleRecord {
                    id,
                    configured_path: configured,
                    resolved_path: resolved,
                    backing: Backing::Dynamic(library),
                    factory: Some(factory),
                    live_objects: 0,
                }
            }
            Err(err) => {
                error!("failed to load module '{}': {err}", resolved.display());
                let failure = clone_error(&err);
                state.modules.push(ModuleRecord {
                    id,
                    configured_path: configured,
                    resolved_path: resolved,
                    backing: Backing::Invalid(err),
                    factory: None,
                    live_objects: 0,
                });
                return Err(failure);
            }
        };
        state.modules.push(record);
        Ok(id)
    }

    fn map_library(&self, path: &Path) -> Result<(libloading::Library, BoxedFactory), ModuleError> {
        if !path.exists() {
            return Err(ModuleError::NotFound(path.display().to_string()));
        }
        // SAFETY: loading a shared library runs its initializers; the module
        // contract limits these to registration work.
        let library = unsafe { libloading::Library::new(path) }
            .map_err(|e| ModuleError::LoadFailed(path.display().to_string(), e.to_string()))?;
        let entry: libloading::Symbol<'_, ModuleEntryFn> =
            unsafe { library.get(MODULE_ENTRY_SYMBOL) }
                .map_err(|_| ModuleError::FactoryMissing(path.display().to_string()))?;
        // SAFETY: the symbol signature is fixed by the module ABI; the
        // returned pointer is a heap allocation the host now owns.
        let factory = unsafe { *Box::from_raw(entry()) };
        Ok((library, factory))
    }

    /// Mark a module as configuration-sourced, to be written by the next
    /// configuration save.
    pub fn mark_config_module(&self, id: ModuleId) {
        self.inner.lock().unwrap().config_modules.insert(id);
    }

    /// Snapshot the current config set as the baseline: these modules will
    /// not be written again.
    pub fn reset_config_baseline(&self) {
        self.inner.lock().unwrap().config_modules.clear();
    }

    /// `[[Module]]` blocks for every configuration-sourced module, skipping
    /// `ignore_paths`.
    pub fn save_config(&self, ignore_paths: &[PathBuf]) -> String {
        let state = self.inner.lock().unwrap();
        let mut out = String::new();
        for record in &state.modules {
            if !state.config_modules.contains(&record.id) {
                continue;
            }
            if ignore_paths.contains(&record.configured_path) {
                continue;
            }
            out.push_str("\n[[Module]]\n");
            out.push_str(&format!(
                "Path = \"{}\"\n",
                record.configured_path.display()
            ));
        }
        out
    }

    pub fn module_list(&self) -> Vec<ModuleSummary> {
        let state = self.inner.lock().unwrap();
        state
            .modules
            .iter()
            .map(|m| ModuleSummary {
                id: m.id,
                configured_path: m.configured_path.clone(),
                resolved_path: m.resolved_path.clone(),
                valid: m.is_valid(),
                live_objects: m.live_objects,
                info: m.factory.as_ref().map(|f| f.module_info()),
            })
            .collect()
    }

    pub fn class_list(&self, id: ModuleId) -> Vec<ClassInfo> {
        let state = self.inner.lock().unwrap();
        state
            .modules
            .iter()
            .find(|m| m.id == id)
            .and_then(|m| m.factory.as_ref())
            .map(|f| f.class_list())
            .unwrap_or_default()
    }

    pub fn has_active_objects(&self, id: ModuleId) -> bool {
        let state = self.inner.lock().unwrap();
        state
            .modules
            .iter()
            .find(|m| m.id == id)
            .map(|m| {
                m.live_objects > 0
                    || m.factory
                        .as_ref()
                        .map(|f| f.has_active_objects())
                        .unwrap_or(false)
            })
            .unwrap_or(false)
    }

    /// Find the first loaded module exposing `class` (by name, default
    /// instance name or alias), in load order. On a miss the installation
    /// manifest resolver is consulted and the referenced module loaded.
    pub fn find_class(&self, class: &str) -> Option<(ModuleId, ClassInfo)> {
        if let Some(found) = self.find_loaded_class(class) {
            return Some(found);
        }
        let module_path = {
            let resolver = self.resolver.lock().unwrap();
            resolver.as_ref()?.resolve_class(class)?
        };
        debug!(
            "class '{class}' resolved to module '{}' through the installation manifest",
            module_path.display()
        );
        match self.load(&module_path) {
            Ok(_) => self.find_loaded_class(class),
            Err(err) => {
                warn!("manifest module '{}' failed: {err}", module_path.display());
                None
            }
        }
    }

    fn find_loaded_class(&self, class: &str) -> Option<(ModuleId, ClassInfo)> {
        let state = self.inner.lock().unwrap();
        for record in &state.modules {
            let Some(factory) = record.factory.as_ref() else {
                continue;
            };
            for info in factory.class_list() {
                if info.answers_to(class) || info.default_instance == class {
                    return Some((record.id, info));
                }
            }
        }
        None
    }

    /// Instantiate a class through the owning module's factory. Returns
    /// `None` when the factory refuses.
    pub fn create_object(
        &self,
        id: ModuleId,
        class: &str,
        instance: &str,
        config: &str,
    ) -> Option<std::sync::Arc<dyn sdv_object::ServiceObject>> {
        let state = self.inner.lock().unwrap();
        let record = state.modules.iter().find(|m| m.id == id)?;
        record
            .factory
            .as_ref()?
            .create_object(class, instance, config)
    }

    pub(crate) fn add_live_object(&self, id: ModuleId) {
        let mut state = self.inner.lock().unwrap();
        if let Some(record) = state.modules.iter_mut().find(|m| m.id == id) {
            record.live_objects += 1;
        }
    }

    pub(crate) fn release_live_object(&self, id: ModuleId) {
        let mut state = self.inner.lock().unwrap();
        if let Some(record) = state.modules.iter_mut().find(|m| m.id == id) {
            record.live_objects = record.live_objects.saturating_sub(1);
        }
    }

    /// Unload a module. The core services module refuses silently; a module
    /// with active objects refuses unless `force` is set. A forced unload
    /// leaks the library mapping rather than risking a use-after-free; it
    /// is the last resort of the shutdown path.
    pub fn unload(&self, id: ModuleId, force: bool) -> Result<(), ModuleError> {
        if id == CORE_MODULE_ID && !force {
            return Ok(());
        }
        let mut state = self.inner.lock().unwrap();
        let pos = match state.modules.iter().position(|m| m.id == id) {
            Some(pos) => pos,
            // Unloading an unknown module is not an error.
            None => return Ok(()),
        };
        let active = state.modules[pos].live_objects > 0
            || state.modules[pos]
                .factory
                .as_ref()
                .map(|f| f.has_active_objects())
                .unwrap_or(false);
        if active && !force {
            return Err(ModuleError::ActiveObjects(id));
        }
        state.config_modules.remove(&id);
        let mut record = state.modules.remove(pos);
        debug!("unloading module id {id} ('{}')", record.resolved_path.display());
        record.factory = None;
        if let Backing::Dynamic(library) = record.backing {
            if active {
                warn!("module id {id} forcibly unloaded with active objects; leaking the mapping");
                std::mem::forget(library);
            }
            // Otherwise the library drops here and unmaps.
        }
        Ok(())
    }

    /// Unload every module in reverse load order, skipping `ignore`.
    /// Used by the controller's shutdown; forces.
    pub fn unload_all(&self, ignore: &[ModuleId]) {
        let ids: Vec<ModuleId> = {
            let state = self.inner.lock().unwrap();
            state.modules.iter().map(|m| m.id).collect()
        };
        for id in ids.into_iter().rev() {
            if ignore.contains(&id) {
                continue;
            }
            if let Err(err) = self.unload(id, true) {
                warn!("unload of module id {id} failed: {err}");
            }
        }
    }
}

fn clone_error(err: &ModuleError) -> ModuleError {
    match err {
        ModuleError::NotFound(p) => ModuleError::NotFound(p.clone()),
        ModuleError::LoadFailed(p, m) => ModuleError::LoadFailed(p.clone(), m.clone()),
        ModuleError::FactoryMissing(p) => ModuleError::FactoryMissing(p.clone()),
        ModuleError::UnknownModule(id) => ModuleError::UnknownModule(*id),
        ModuleError::ActiveObjects(id) => ModuleError::ActiveObjects(*id),
        ModuleError::LoadingForbidden => ModuleError::LoadingForbidden,
    }
}
