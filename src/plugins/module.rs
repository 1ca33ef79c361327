//! Binaries that may contain plugins, and the loaders that open them.

use super::contract::{TrayPlugin, CONTRACT_INTERFACE};
use anyhow::Result;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

pub type PluginConstructor = Arc<dyn Fn() -> Box<dyn TrayPlugin> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Public,
    Internal,
}

/// A type declared by a module, as seen before instantiation.
#[derive(Clone)]
pub struct PluginType {
    pub name: String,
    pub visibility: Visibility,
    pub is_abstract: bool,
    pub interfaces: Vec<String>,
    pub constructor: Option<PluginConstructor>,
}

impl PluginType {
    /// A public concrete type implementing the plugin contract.
    pub fn plugin<F>(name: impl Into<String>, constructor: F) -> Self
    where
        F: Fn() -> Box<dyn TrayPlugin> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            visibility: Visibility::Public,
            is_abstract: false,
            interfaces: vec![CONTRACT_INTERFACE.to_string()],
            constructor: Some(Arc::new(constructor)),
        }
    }

    pub fn implements(&self, interface: &str) -> bool {
        self.interfaces.iter().any(|i| i == interface)
    }

    /// `None` for types without a default constructor.
    pub fn instantiate(&self) -> Option<Box<dyn TrayPlugin>> {
        self.constructor.as_ref().map(|construct| construct())
    }
}

impl fmt::Debug for PluginType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginType")
            .field("name", &self.name)
            .field("visibility", &self.visibility)
            .field("is_abstract", &self.is_abstract)
            .field("interfaces", &self.interfaces)
            .field("constructible", &self.constructor.is_some())
            .finish()
    }
}

#[derive(Debug)]
pub enum TypeEnumerationError {
    /// Some types could not be loaded; the rest are still usable.
    Partial {
        loaded: Vec<PluginType>,
        errors: Vec<String>,
    },
    Failed(String),
}

/// Keeps the code behind plugin instances mapped for as long as they live.
#[derive(Clone, Default)]
pub struct ModuleRetainer(Option<Arc<dyn Any + Send + Sync>>);

impl ModuleRetainer {
    pub fn new(inner: Arc<dyn Any + Send + Sync>) -> Self {
        Self(Some(inner))
    }

    pub fn none() -> Self {
        Self(None)
    }
}

pub trait PluginModule: Send {
    fn identity(&self) -> &str;
    fn references_contract(&self) -> bool;
    fn types(&self) -> Result<Vec<PluginType>, TypeEnumerationError>;

    fn retainer(&self) -> ModuleRetainer {
        ModuleRetainer::none()
    }
}

pub trait ModuleLoader: Send {
    /// Resolve a statically linked module.
    fn load_by_name(&self, name: &str) -> Result<Box<dyn PluginModule>>;

    /// Check, without executing anything from it, whether a binary references
    /// the plugin contract.
    fn probe(&self, path: &Path) -> std::io::Result<bool>;

    fn load_by_path(&self, path: &Path) -> Result<Box<dyn PluginModule>>;
}

/// A module compiled into the host.
#[derive(Debug, Clone)]
pub struct StaticModule {
    name: String,
    types: Vec<PluginType>,
}

impl StaticModule {
    pub fn new(name: impl Into<String>, types: Vec<PluginType>) -> Self {
        Self {
            name: name.into(),
            types,
        }
    }
}

impl PluginModule for StaticModule {
    fn identity(&self) -> &str {
        &self.name
    }

    fn references_contract(&self) -> bool {
        true
    }

    fn types(&self) -> Result<Vec<PluginType>, TypeEnumerationError> {
        Ok(self.types.clone())
    }
}

/// Statically linked modules, resolvable by name.
#[derive(Debug, Clone, Default)]
pub struct EmbeddedCatalog {
    modules: HashMap<String, StaticModule>,
}

impl EmbeddedCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, module: StaticModule) -> Self {
        self.register(module);
        self
    }

    pub fn register(&mut self, module: StaticModule) {
        self.modules.insert(module.name.clone(), module);
    }

    pub fn resolve(&self, name: &str) -> Option<StaticModule> {
        self.modules.get(name).cloned()
    }
}
