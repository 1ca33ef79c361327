//! Plugin discovery, lifecycle and the aggregated UI model.

pub mod contract;
pub mod descriptor;
pub mod dispatch;
mod guid;
pub mod instance_guard;
pub mod manager;
pub mod module;
pub mod native;
pub mod registry;
pub mod scanner;
pub mod settings;
pub mod type_filter;

#[cfg(test)]
pub(crate) mod testing;

pub use contract::{
    CommandId, IconError, IconImage, MenuCommand, PluginContext, PluginLogger, SettingsStore,
    TrayPlugin, UiContext, CONTRACT_INTERFACE, CONTRACT_VERSION,
};
pub use guid::Guid;
pub use instance_guard::{FileLockProvider, InstanceGuard, InstanceLock, LockProvider};
pub use manager::{LoadReport, ManagerDeps, PluginManager};
pub use module::{EmbeddedCatalog, ModuleLoader, PluginModule, PluginType, StaticModule};
pub use native::NativeLoader;
pub use registry::{CommandKey, CommandState, PluginGroup, Registry, SelectablePlugin};
pub use scanner::ScanOptions;
pub use settings::JsonSettingsStore;
