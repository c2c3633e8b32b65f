use thiserror::Error;

/// Failures reported by the module host. The host never panics across the
/// module boundary; every failure is a result code.
#[derive(Debug, Error)]
pub enum ModuleError {
    /// The module could not be found in any search path. The failure is
    /// retained, so repeated loads observe it without touching the loader
    /// again.
    #[error("module not found: {0}")]
    NotFound(String),

    /// The OS loader rejected the library.
    #[error("module load failed: {0}: {1}")]
    LoadFailed(String, String),

    /// The library loaded but does not export the factory entry point.
    #[error("module factory missing: {0}")]
    FactoryMissing(String),

    /// No such module id.
    #[error("unknown module id {0}")]
    UnknownModule(u64),

    /// Unload refused: the module still owns live objects.
    #[error("module {0} has active objects")]
    ActiveObjects(u64),

    /// The current application mode forbids loading further modules.
    #[error("module loading is not permitted in this mode")]
    LoadingForbidden,
}

/// Failures reported by the repository.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("no loaded module exposes class '{0}'")]
    ClassNotFound(String),

    #[error("class '{0}' is a singleton and already has a live instance")]
    SingletonViolated(String),

    #[error("an object named '{0}' already exists")]
    InstanceExists(String),

    #[error("dependency cycle while creating '{0}'")]
    DependencyCycle(String),

    #[error("object of class '{0}' failed to initialize")]
    InitializationFailed(String),

    #[error(transparent)]
    Module(#[from] ModuleError),
}
