//! The contract between the core and a loadable module.
//!
//! A module is a shared library exporting exactly one symbol,
//! [`MODULE_ENTRY_SYMBOL`], which hands out the module's factory. The factory
//! enumerates the classes the module implements and instantiates objects.
//! Builtin modules (the core services, test fixtures) register the same
//! factory type in-process without going through the OS loader.

use std::sync::Arc;

use sdv_object::{ClassInfo, ServiceObject};
use serde::{Deserialize, Serialize};

/// Identification of a loaded module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleInfo {
    pub name: String,
    pub version: String,
    pub build_id: String,
}

/// Factory exposed by every module.
pub trait ModuleFactory: Send + Sync {
    fn module_info(&self) -> ModuleInfo;

    /// Descriptors of every class the module can instantiate.
    fn class_list(&self) -> Vec<ClassInfo>;

    /// Whether objects created by this factory are still alive. A module
    /// with active objects refuses a regular unload.
    fn has_active_objects(&self) -> bool;

    /// Instantiate a class. Returns `None` when the factory does not know
    /// the class or refuses the instantiation.
    fn create_object(
        &self,
        class: &str,
        instance: &str,
        config: &str,
    ) -> Option<Arc<dyn ServiceObject>>;
}

pub type BoxedFactory = Box<dyn ModuleFactory>;

/// The single symbol a module library exports. The name is fixed across the
/// project.
pub const MODULE_ENTRY_SYMBOL: &[u8] = b"sdv_module_entry";

/// Signature of the exported entry point: returns a heap-allocated
/// [`BoxedFactory`] the host takes ownership of.
pub type ModuleEntryFn = unsafe extern "C" fn() -> *mut BoxedFactory;

/// Export the module entry point for a factory value.
///
/// ```ignore
/// struct VehicleModule;
/// impl ModuleFactory for VehicleModule { /* ... */ }
/// sdv_runtime::declare_module!(VehicleModule);
/// ```
#[macro_export]
macro_rules! declare_module {
    ($factory:expr) => {
        #[no_mangle]
        pub extern "C" fn sdv_module_entry() -> *mut $crate::module_abi::BoxedFactory {
            Box::into_raw(Box::new(
                Box::new($factory) as $crate::module_abi::BoxedFactory
            ))
        }
    };
}
