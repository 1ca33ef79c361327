//! Native plugin libraries (`.so` / `.dylib` / `.dll`).
//!
//! A plugin library exports two symbols, generated by [`export_plugins!`]:
//! - `tray_host_contract_v1`: the contract marker, returning
//!   [`CONTRACT_VERSION`]. Its name in the dynamic symbol table is what the
//!   scanner probes for before anything is loaded.
//! - `tray_host_plugin_types`: returns a boxed [`PluginRegistration`].
//!
//! Plugin libraries must be built with the same toolchain and the same
//! `tray-host` version as the host, since trait objects cross the boundary.

use super::contract::CONTRACT_VERSION;
use super::module::{
    EmbeddedCatalog, ModuleLoader, ModuleRetainer, PluginModule, PluginType, TypeEnumerationError,
};
use anyhow::{Context, Result};
use libloading::{Library, Symbol};
use std::path::Path;
use std::sync::Arc;

pub const CONTRACT_SYMBOL: &str = "tray_host_contract_v1";
pub const TYPES_SYMBOL: &str = "tray_host_plugin_types";

#[cfg(target_os = "linux")]
pub const DEFAULT_EXTENSIONS: &[&str] = &["so"];

#[cfg(target_os = "macos")]
pub const DEFAULT_EXTENSIONS: &[&str] = &["dylib"];

#[cfg(target_os = "windows")]
pub const DEFAULT_EXTENSIONS: &[&str] = &["dll"];

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
pub const DEFAULT_EXTENSIONS: &[&str] = &["so"];

/// What a plugin library hands to the host.
pub struct PluginRegistration {
    pub contract_version: u32,
    pub types: Vec<PluginType>,
    /// Types the library declared but could not describe.
    pub errors: Vec<String>,
}

impl PluginRegistration {
    pub fn new(types: Vec<PluginType>) -> Self {
        Self {
            contract_version: CONTRACT_VERSION,
            types,
            errors: Vec::new(),
        }
    }
}

/// Declare the plugin types exported by a native plugin library.
///
/// ```ignore
/// #[derive(Default)]
/// struct Clock { /* ... */ }
/// impl tray_host::plugins::TrayPlugin for Clock { /* ... */ }
///
/// tray_host::export_plugins!(Clock);
/// ```
#[macro_export]
macro_rules! export_plugins {
    ($($plugin:ty),+ $(,)?) => {
        #[no_mangle]
        pub extern "C" fn tray_host_contract_v1() -> u32 {
            $crate::plugins::CONTRACT_VERSION
        }

        #[no_mangle]
        #[allow(improper_ctypes_definitions)]
        pub extern "C" fn tray_host_plugin_types() -> *mut $crate::plugins::native::PluginRegistration {
            let types = vec![$(
                $crate::plugins::PluginType::plugin(
                    stringify!($plugin),
                    || -> Box<dyn $crate::plugins::TrayPlugin> {
                        Box::new(<$plugin as ::std::default::Default>::default())
                    },
                ),
            )+];
            Box::into_raw(Box::new($crate::plugins::native::PluginRegistration::new(types)))
        }
    };
}

pub struct NativeLoader {
    embedded: EmbeddedCatalog,
}

impl NativeLoader {
    pub fn new(embedded: EmbeddedCatalog) -> Self {
        Self { embedded }
    }
}

impl ModuleLoader for NativeLoader {
    fn load_by_name(&self, name: &str) -> Result<Box<dyn PluginModule>> {
        let module = self
            .embedded
            .resolve(name)
            .with_context(|| format!("No embedded module named '{}'", name))?;
        Ok(Box::new(module))
    }

    fn probe(&self, path: &Path) -> std::io::Result<bool> {
        let bytes = std::fs::read(path)?;
        Ok(contains_symbol(&bytes, CONTRACT_SYMBOL.as_bytes()))
    }

    fn load_by_path(&self, path: &Path) -> Result<Box<dyn PluginModule>> {
        // SAFETY: the binary passed signature validation before reaching here;
        // its initialisers are trusted from this point on.
        let library = unsafe {
            Library::new(path)
                .with_context(|| format!("Failed to open shared library: {}", path.display()))?
        };

        Ok(Box::new(NativeModule {
            identity: path.display().to_string(),
            library: Arc::new(library),
        }))
    }
}

struct NativeModule {
    identity: String,
    library: Arc<Library>,
}

impl PluginModule for NativeModule {
    fn identity(&self) -> &str {
        &self.identity
    }

    fn references_contract(&self) -> bool {
        let marker: Result<Symbol<unsafe extern "C" fn() -> u32>, _> =
            unsafe { self.library.get(CONTRACT_SYMBOL.as_bytes()) };

        match marker {
            Ok(marker) => {
                let version = unsafe { marker() };
                if version != CONTRACT_VERSION {
                    log::warn!(
                        "{} implements contract v{}, host expects v{}",
                        self.identity,
                        version,
                        CONTRACT_VERSION
                    );
                }
                version == CONTRACT_VERSION
            }
            Err(_) => false,
        }
    }

    fn types(&self) -> Result<Vec<PluginType>, TypeEnumerationError> {
        let entry: Symbol<unsafe extern "C" fn() -> *mut PluginRegistration> =
            unsafe { self.library.get(TYPES_SYMBOL.as_bytes()) }
                .map_err(|e| TypeEnumerationError::Failed(format!("missing {}: {}", TYPES_SYMBOL, e)))?;

        let registration_ptr = unsafe { entry() };
        if registration_ptr.is_null() {
            return Err(TypeEnumerationError::Failed(format!("{} returned null", TYPES_SYMBOL)));
        }

        // SAFETY: produced by Box::into_raw in export_plugins!
        let registration = unsafe { Box::from_raw(registration_ptr) };

        if registration.contract_version != CONTRACT_VERSION {
            return Err(TypeEnumerationError::Failed(format!(
                "registration targets contract v{}, host expects v{}",
                registration.contract_version, CONTRACT_VERSION
            )));
        }

        let PluginRegistration { types, errors, .. } = *registration;
        if errors.is_empty() {
            Ok(types)
        } else {
            Err(TypeEnumerationError::Partial { loaded: types, errors })
        }
    }

    fn retainer(&self) -> ModuleRetainer {
        ModuleRetainer::new(self.library.clone())
    }
}

fn contains_symbol(haystack: &[u8], needle: &[u8]) -> bool {
    !needle.is_empty() && haystack.windows(needle.len()).any(|window| window == needle)
}
