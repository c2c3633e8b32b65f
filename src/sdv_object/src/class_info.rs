//! Class descriptors fixed per class and published through module factories.

use serde::{Deserialize, Serialize};

/// Role of a class within the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectKind {
    SystemObject,
    Device,
    BasicService,
    ComplexService,
    Proxy,
    Stub,
    Application,
    Utility,
}

/// Descriptor of an instantiable class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassInfo {
    pub kind: ObjectKind,
    pub class_name: String,
    /// Alternative names the class answers to during lookup.
    #[serde(default)]
    pub aliases: Vec<String>,
    /// At most one live instance per repository.
    #[serde(default)]
    pub singleton: bool,
    /// Instance name used when the caller supplies none; empty means the
    /// class name itself is used.
    #[serde(default)]
    pub default_instance: String,
    /// Classes that must exist and be initialized before an instance of this
    /// class can leave `InitializationPending`.
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl ClassInfo {
    /// Plain descriptor with just a kind and a name.
    pub fn new(kind: ObjectKind, class_name: impl Into<String>) -> Self {
        ClassInfo {
            kind,
            class_name: class_name.into(),
            aliases: Vec::new(),
            singleton: false,
            default_instance: String::new(),
            dependencies: Vec::new(),
        }
    }

    pub fn singleton(mut self) -> Self {
        self.singleton = true;
        self
    }

    pub fn with_default_instance(mut self, name: impl Into<String>) -> Self {
        self.default_instance = name.into();
        self
    }

    pub fn with_aliases(mut self, aliases: impl IntoIterator<Item = String>) -> Self {
        self.aliases = aliases.into_iter().collect();
        self
    }

    pub fn with_dependencies(mut self, deps: impl IntoIterator<Item = String>) -> Self {
        self.dependencies = deps.into_iter().collect();
        self
    }

    /// Whether `name` matches the class name or one of its aliases.
    pub fn answers_to(&self, name: &str) -> bool {
        self.class_name == name || self.aliases.iter().any(|a| a == name)
    }
}
