//! Object base: lifecycle and attribute capabilities.

use crate::class_info::ClassInfo;
use crate::interface::InterfaceAccess;
use crate::value::Value;

/// Status an object moves through during its life.
///
/// Transitions are monotonic through this set; the only backward step is the
/// explicit configuring/running toggle driven by the repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ObjectStatus {
    InitializationPending,
    Initializing,
    InitializationFailure,
    Initialized,
    Configuring,
    Running,
    ShutdownInProgress,
    DestructionPending,
}

impl ObjectStatus {
    /// Whether the object counts as operational for repository bookkeeping.
    pub fn is_live(self) -> bool {
        matches!(
            self,
            ObjectStatus::Initialized | ObjectStatus::Configuring | ObjectStatus::Running
        )
    }
}

/// Operation mode selected by the repository sweeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationMode {
    Configuring,
    Running,
}

/// Lifecycle capability every repository-managed object exposes.
pub trait ObjectControl: Send + Sync {
    /// Drive the object from `InitializationPending` to `Initialized` (or
    /// `InitializationFailure`). `config` carries the object's TOML
    /// configuration body, possibly empty.
    fn initialize(&self, config: &str);

    fn object_status(&self) -> ObjectStatus;

    /// Toggle between configuring and running. Objects ignore the call when
    /// their current status does not support the transition.
    fn set_operation_mode(&self, mode: OperationMode);

    /// Release resources before destruction; ends in `DestructionPending`.
    fn shutdown(&self);
}

crate::declare_interface!(ObjectControl, "sdv.core.ObjectControl");

bitflags::bitflags! {
    /// Behavior flags of a single attribute.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AttributeFlags: u32 {
        const READ_ONLY = 0x1;
        /// Written back by the configuration save.
        const PERSISTENT = 0x2;
        /// Never written back by the configuration save.
        const TRANSIENT = 0x4;
    }
}

/// Optional attribute capability. Attribute presence is declared by the
/// object, not discovered by reflection.
pub trait Attributes: Send + Sync {
    fn attribute_names(&self) -> Vec<String>;

    /// Empty [`Value::None`] when the attribute does not exist or carries no
    /// value.
    fn attribute(&self, name: &str) -> Value;

    /// Returns false for unknown or read-only attributes.
    fn set_attribute(&self, name: &str, value: Value) -> bool;

    /// Empty flags when the attribute does not exist.
    fn attribute_flags(&self, name: &str) -> AttributeFlags;
}

crate::declare_interface!(Attributes, "sdv.core.Attributes");

/// Base contract of every class instantiable through the repository: a
/// capability query entry point plus the class descriptor.
pub trait ServiceObject: InterfaceAccess + Send + Sync {
    fn class_info(&self) -> ClassInfo;
}
