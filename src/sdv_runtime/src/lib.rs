//! Module host and object repository of the component runtime.

pub mod error;
pub mod module_abi;
pub mod module_host;
pub mod repository;

pub use crate::error::{ModuleError, RepositoryError};
pub use crate::module_abi::{BoxedFactory, ModuleEntryFn, ModuleFactory, ModuleInfo};
pub use crate::module_host::{
    LoadPolicy, ManifestResolver, ModuleHost, ModuleId, ModuleSummary, CORE_MODULE_ID,
};
pub use crate::repository::Repository;

/// Configured name of the builtin core services module.
pub const CORE_SERVICES_MODULE: &str = "core_services.sdv";
