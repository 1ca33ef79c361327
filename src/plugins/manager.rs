//! Drives plugins from discovery to drain.

use super::contract::{PluginContext, PluginLogger, SettingsStore, UiContext};
use super::descriptor::PluginDescriptor;
use super::dispatch::PluginHandle;
use super::instance_guard::{GuardOutcome, InstanceGuard, LockProvider};
use super::module::ModuleLoader;
use super::registry::Registry;
use super::scanner::{Candidate, CandidateScanner, ScanOptions};
use super::Guid;
use crate::daemon::EventBus;
use crate::error::{ErrorCode, InitError, LoadError};
use crate::signature::SignatureValidator;
use crate::sleeper::Sleeper;
use crate::HOST_GUID;
use std::sync::Arc;
use std::time::Duration;

pub const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

const PREFERRED_KEY: &str = "preferred_plugin";

/// Outcome of [`PluginManager::load_plugins`].
#[derive(Debug, Default)]
pub struct LoadReport {
    pub assemblies: usize,
    pub compatible_types: usize,
    pub loaded: usize,
    pub errors: Vec<LoadError>,
    pub bad_signature: bool,
}

impl LoadReport {
    /// The code reported when nothing loaded: the last recorded failure.
    pub fn failure_code(&self) -> ErrorCode {
        self.errors.last().map(LoadError::code).unwrap_or(ErrorCode::NoPluginsFound)
    }
}

/// Everything the manager needs from the outside world.
pub struct ManagerDeps {
    pub loader: Box<dyn ModuleLoader>,
    pub locks: Box<dyn LockProvider>,
    /// `None` loads unsigned binaries.
    pub validator: Option<SignatureValidator>,
    pub settings: Arc<dyn SettingsStore>,
    pub events: Arc<EventBus>,
    pub sleeper: Arc<dyn Sleeper>,
}

pub struct PluginManager {
    registry: Registry,
    loader: Box<dyn ModuleLoader>,
    guard: InstanceGuard,
    validator: Option<SignatureValidator>,
    settings: Arc<dyn SettingsStore>,
    events: Arc<EventBus>,
    sleeper: Arc<dyn Sleeper>,
    options: ScanOptions,
    is_elevated: bool,
    drain_timeout: Option<Duration>,
    report: LoadReport,
}

impl PluginManager {
    pub fn new(deps: ManagerDeps, options: ScanOptions) -> Self {
        Self {
            registry: Registry::new(),
            loader: deps.loader,
            guard: InstanceGuard::new(deps.locks),
            validator: deps.validator,
            settings: deps.settings,
            events: deps.events,
            sleeper: deps.sleeper,
            options,
            is_elevated: false,
            drain_timeout: None,
            report: LoadReport::default(),
        }
    }

    pub fn with_elevation(mut self, is_elevated: bool) -> Self {
        self.is_elevated = is_elevated;
        self
    }

    pub fn with_drain_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.drain_timeout = timeout;
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn report(&self) -> &LoadReport {
        &self.report
    }

    pub fn load_plugins(&mut self) -> Result<&LoadReport, InitError> {
        let scan = CandidateScanner::new(self.loader.as_ref(), self.validator.as_ref()).scan(&self.options);
        // The validator may own a blocking HTTP client; it is not needed again.
        self.validator = None;

        let mut report = LoadReport {
            assemblies: scan.assemblies,
            compatible_types: scan.compatible_types(),
            loaded: 0,
            errors: scan.errors,
            bad_signature: scan.bad_signature,
        };

        for candidate in scan.candidates {
            self.instantiate(candidate);
        }

        for descriptor in self.registry.descriptors() {
            descriptor.handle().initialize(PluginContext {
                is_elevated: self.is_elevated,
                ui: UiContext::new(Arc::clone(&self.events)),
                settings: Arc::clone(&self.settings),
                logger: PluginLogger::new(&descriptor.name),
            });
        }
        if self.registry.any_requires_elevation() && !self.is_elevated {
            log::warn!("At least one plugin requires elevation but the host is not elevated");
        }

        self.registry.aggregate();
        self.restore_preferred();

        report.loaded = self.registry.len();
        log::info!(
            "Loaded {} plugins from {} binaries ({} compatible types, {} errors)",
            report.loaded,
            report.assemblies,
            report.compatible_types,
            report.errors.len()
        );

        if report.loaded == 0 {
            let error = InitError::NothingLoaded {
                code: report.failure_code(),
                assemblies: report.assemblies,
                compatible: report.compatible_types,
            };
            self.report = report;
            return Err(error);
        }

        self.report = report;
        Ok(&self.report)
    }

    fn instantiate(&mut self, candidate: Candidate) {
        let retainer = candidate.module.retainer();

        for ty in &candidate.types {
            let Some(plugin) = ty.instantiate() else { continue };
            let handle = PluginHandle::new(plugin, retainer.clone());
            let name = handle.name();
            let guid = handle.guid();

            if name.trim().is_empty() || guid.is_nil() {
                log::debug!("Discarding {} from {}: empty name or nil GUID", ty.name, candidate.origin);
                continue;
            }
            if candidate.origin.is_embedded() {
                self.guard.exempt(guid);
            }
            if self.registry.contains(guid) {
                log::warn!("Plugin {} ({}) is already loaded, ignoring {}", name, guid, candidate.origin);
                continue;
            }

            let lock = match self.guard.claim(guid) {
                Ok(GuardOutcome::Acquired(lock)) => Some(lock),
                Ok(GuardOutcome::Exempt) => None,
                Ok(GuardOutcome::Held) => {
                    log::warn!("Plugin {} ({}) is running in another process, skipping", name, guid);
                    continue;
                }
                Err(e) => {
                    log::warn!("Could not claim instance lock for {} ({}): {}", name, guid, e);
                    continue;
                }
            };

            log::info!("Loaded plugin: {} ({}) from {}", name, guid, candidate.origin);
            if let Err(rejected) = self.registry.insert(PluginDescriptor::new(handle, lock)) {
                log::warn!("Plugin {} ({}) registered twice", rejected.name, rejected.guid);
            }
        }
    }

    fn restore_preferred(&mut self) {
        let Some(value) = self.settings.get(HOST_GUID, PREFERRED_KEY) else { return };
        let Some(guid) = value.as_str().and_then(|s| Guid::parse(s).ok()) else {
            log::warn!("Ignoring malformed preferred plugin setting: {}", value);
            return;
        };
        if !self.registry.set_preferred(guid) {
            log::debug!("Saved preferred plugin {} is not available", guid);
        }
    }

    /// Make `guid` drive the tray icon and remember the choice.
    pub fn set_preferred(&mut self, guid: Guid) -> bool {
        if !self.registry.set_preferred(guid) {
            return false;
        }
        if let Err(e) = self.settings.set(HOST_GUID, PREFERRED_KEY, guid.canonical().into()) {
            log::warn!("Failed to persist preferred plugin: {}", e);
        }
        true
    }

    /// Ask, close and wait for every plugin, then empty the registry.
    /// Returns whether every plugin agreed to close.
    pub fn shutdown(&mut self) -> bool {
        let mut vetoed = false;
        for descriptor in self.registry.descriptors() {
            if !descriptor.can_close(vetoed) {
                log::info!("Plugin {} asked to stay open", descriptor.name);
                vetoed = true;
            }
        }

        for descriptor in self.registry.descriptors_mut() {
            descriptor.begin_close();
        }

        let mut waited = Duration::ZERO;
        loop {
            let pending: Vec<String> = self
                .registry
                .descriptors_mut()
                .iter_mut()
                .filter_map(|d| (!d.poll_closed()).then(|| d.name.clone()))
                .collect();
            if pending.is_empty() {
                break;
            }
            if self.drain_timeout.is_some_and(|limit| waited >= limit) {
                log::warn!("Abandoning plugins that did not close in time: {}", pending.join(", "));
                break;
            }
            self.sleeper.sleep(DRAIN_POLL_INTERVAL);
            waited += DRAIN_POLL_INTERVAL;
        }

        log::info!("Drained {} plugins", self.registry.len());
        self.registry.clear();
        !vetoed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::instance_guard::FileLockProvider;
    use crate::plugins::contract::TrayPlugin;
    use crate::plugins::module::{
        EmbeddedCatalog, ModuleRetainer, PluginModule, PluginType, StaticModule, TypeEnumerationError,
    };
    use crate::plugins::settings::JsonSettingsStore;
    use crate::plugins::testing::{FakePlugin, FakeSpec, Probe};
    use crate::sleeper::testing::RecordingSleeper;
    use anyhow::{anyhow, Result};
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Only serves embedded modules; the plugin directory is empty.
    struct CatalogLoader(EmbeddedCatalog);

    impl ModuleLoader for CatalogLoader {
        fn load_by_name(&self, name: &str) -> Result<Box<dyn PluginModule>> {
            let module = self.0.resolve(name).ok_or_else(|| anyhow!("unknown module {}", name))?;
            Ok(Box::new(module))
        }

        fn probe(&self, _path: &Path) -> std::io::Result<bool> {
            Ok(false)
        }

        fn load_by_path(&self, _path: &Path) -> Result<Box<dyn PluginModule>> {
            Err(anyhow!("no files"))
        }
    }

    struct Fixture {
        temp_dir: TempDir,
        sleeper: Arc<RecordingSleeper>,
        settings: Arc<JsonSettingsStore>,
    }

    impl Fixture {
        fn new() -> Self {
            let temp_dir = TempDir::new().unwrap();
            let settings = Arc::new(JsonSettingsStore::open(temp_dir.path().join("settings.json")).unwrap());
            Self {
                temp_dir,
                sleeper: Arc::new(RecordingSleeper::default()),
                settings,
            }
        }

        fn manager(&self, types: Vec<PluginType>) -> PluginManager {
            let loader = CatalogLoader(EmbeddedCatalog::new().with(StaticModule::new("fakes", types)));
            self.manager_with(Box::new(loader), Some("fakes"))
        }

        fn manager_with(&self, loader: Box<dyn ModuleLoader>, embedded: Option<&str>) -> PluginManager {
            let deps = ManagerDeps {
                loader,
                locks: Box::new(FileLockProvider::new(self.temp_dir.path().join("locks"))),
                validator: None,
                settings: self.settings.clone(),
                events: Arc::new(EventBus::new()),
                sleeper: self.sleeper.clone(),
            };
            let options = ScanOptions {
                app_dir: self.temp_dir.path().join("plugins"),
                extensions: vec!["so".into()],
                embedded: embedded.map(String::from),
            };
            PluginManager::new(deps, options)
        }
    }

    fn fakes(specs: Vec<FakeSpec>) -> (Vec<PluginType>, Vec<Arc<Probe>>) {
        specs.into_iter().map(FakePlugin::factory).unzip()
    }

    #[test]
    fn load_initializes_and_aggregates() {
        let fixture = Fixture::new();
        let (types, probes) = fakes(vec![
            FakeSpec::new("Clock", 1).commands(&[Some("sync")]),
            FakeSpec::new("Weather", 2).click(),
        ]);
        let mut manager = fixture.manager(types);

        let report = manager.load_plugins().unwrap();

        assert_eq!(report.loaded, 2);
        assert_eq!(report.assemblies, 1);
        assert_eq!(report.compatible_types, 2);
        assert!(probes.iter().all(|p| p.initialized.load(Ordering::SeqCst)));
        assert_eq!(manager.registry().preferred().unwrap().name, "Weather");
        assert_eq!(manager.registry().command_count(), 1);
    }

    #[test]
    fn invalid_identities_are_discarded_silently() {
        let fixture = Fixture::new();
        let (types, _) = fakes(vec![
            FakeSpec::new("", 1),
            FakeSpec::new("Nil", 0),
            FakeSpec::new("Clock", 2),
        ]);
        let mut manager = fixture.manager(types);

        let report = manager.load_plugins().unwrap();

        assert_eq!(report.loaded, 1);
        assert!(report.errors.is_empty());
    }

    /// Stands in for a mapped library: flags when its code goes away.
    struct MappedCode(Arc<AtomicBool>);

    impl Drop for MappedCode {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    /// Captured by a constructor; records whether it outlived the code.
    struct ConstructorState {
        unmapped: Arc<AtomicBool>,
        dropped_after_unmap: Arc<AtomicBool>,
    }

    impl Drop for ConstructorState {
        fn drop(&mut self) {
            if self.unmapped.load(Ordering::SeqCst) {
                self.dropped_after_unmap.store(true, Ordering::SeqCst);
            }
        }
    }

    struct MappedModule {
        types: Vec<PluginType>,
        code: Arc<MappedCode>,
    }

    impl PluginModule for MappedModule {
        fn identity(&self) -> &str {
            "mapped"
        }

        fn references_contract(&self) -> bool {
            true
        }

        fn types(&self) -> Result<Vec<PluginType>, TypeEnumerationError> {
            Ok(self.types.clone())
        }

        fn retainer(&self) -> ModuleRetainer {
            ModuleRetainer::new(self.code.clone())
        }
    }

    struct MappedLoader(Mutex<Option<MappedModule>>);

    impl ModuleLoader for MappedLoader {
        fn load_by_name(&self, _name: &str) -> Result<Box<dyn PluginModule>> {
            let module = self.0.lock().unwrap().take().ok_or_else(|| anyhow!("already loaded"))?;
            Ok(Box::new(module))
        }

        fn probe(&self, _path: &Path) -> std::io::Result<bool> {
            Ok(false)
        }

        fn load_by_path(&self, _path: &Path) -> Result<Box<dyn PluginModule>> {
            Err(anyhow!("no files"))
        }
    }

    #[test]
    fn discarded_candidate_drops_constructors_before_its_code() {
        let fixture = Fixture::new();
        let unmapped = Arc::new(AtomicBool::new(false));
        let dropped_after_unmap = Arc::new(AtomicBool::new(false));
        let state = ConstructorState {
            unmapped: unmapped.clone(),
            dropped_after_unmap: dropped_after_unmap.clone(),
        };
        let spec = FakeSpec::new("Nil", 0);
        let ty = PluginType::plugin("Nil", move || -> Box<dyn TrayPlugin> {
            let _captured = &state;
            Box::new(FakePlugin::new(spec.clone()).0)
        });
        let module = MappedModule {
            types: vec![ty],
            code: Arc::new(MappedCode(unmapped.clone())),
        };
        let mut manager = fixture.manager_with(Box::new(MappedLoader(Mutex::new(Some(module)))), Some("mapped"));

        assert!(manager.load_plugins().is_err());

        assert!(unmapped.load(Ordering::SeqCst));
        assert!(!dropped_after_unmap.load(Ordering::SeqCst));
    }

    #[test]
    fn duplicate_guid_in_one_module_loads_once() {
        let fixture = Fixture::new();
        let (types, _) = fakes(vec![FakeSpec::new("Clock", 1), FakeSpec::new("Clock copy", 1)]);
        let mut manager = fixture.manager(types);

        manager.load_plugins().unwrap();

        assert_eq!(manager.registry().len(), 1);
        assert_eq!(manager.registry().descriptors()[0].name, "Clock");
    }

    #[test]
    fn nothing_loaded_reports_failure_code() {
        let fixture = Fixture::new();
        let mut manager = fixture.manager_with(Box::new(CatalogLoader(EmbeddedCatalog::new())), None);

        let err = manager.load_plugins().unwrap_err();

        assert_eq!(err.exit_code(), ErrorCode::NoPluginsFound.exit_code());
    }

    #[test]
    fn missing_embedded_module_reports_load_by_name() {
        let fixture = Fixture::new();
        let mut manager = fixture.manager_with(Box::new(CatalogLoader(EmbeddedCatalog::new())), Some("builtin"));

        let err = manager.load_plugins().unwrap_err();

        assert_eq!(err.exit_code(), -3);
        assert!(matches!(err, InitError::NothingLoaded { assemblies: 0, compatible: 0, .. }));
    }

    #[test]
    fn preferred_choice_is_persisted_and_restored() {
        let fixture = Fixture::new();
        let specs = vec![FakeSpec::new("P1", 1).click(), FakeSpec::new("P2", 2).click()];

        let (types, _) = fakes(specs.clone());
        let mut first = fixture.manager(types);
        first.load_plugins().unwrap();
        assert!(first.set_preferred(Guid::from_u128(2)));
        assert!(!first.set_preferred(Guid::from_u128(99)));
        first.shutdown();

        let (types, _) = fakes(specs);
        let mut second = fixture.manager(types);
        second.load_plugins().unwrap();

        assert_eq!(second.registry().preferred().unwrap().name, "P2");
    }

    #[test]
    fn every_plugin_is_asked_even_after_a_veto() {
        let fixture = Fixture::new();
        let (types, probes) = fakes(vec![
            FakeSpec::new("P1", 1),
            FakeSpec::new("P2", 2).veto(),
            FakeSpec::new("P3", 3),
        ]);
        let mut manager = fixture.manager(types);
        manager.load_plugins().unwrap();

        let agreed = manager.shutdown();

        assert!(!agreed);
        let calls: Vec<_> = probes.iter().map(|p| p.can_close_calls()).collect();
        assert_eq!(calls, vec![vec![false], vec![false], vec![true]]);
        assert!(probes.iter().all(|p| p.begin_close_calls.load(Ordering::SeqCst) == 1));
    }

    #[test]
    fn drain_waits_for_slowest_plugin_then_clears() {
        let fixture = Fixture::new();
        let (types, probes) = fakes(vec![
            FakeSpec::new("P1", 1).closes_after(1).commands(&[Some("a")]),
            FakeSpec::new("P2", 2).closes_after(4),
            FakeSpec::new("P3", 3).closes_after(2),
        ]);
        let mut manager = fixture.manager(types);
        manager.load_plugins().unwrap();

        assert!(manager.shutdown());

        assert_eq!(fixture.sleeper.naps(), vec![DRAIN_POLL_INTERVAL; 3]);
        let polls: Vec<_> = probes.iter().map(|p| p.close_polls.load(Ordering::SeqCst)).collect();
        assert_eq!(polls, vec![1, 4, 2]);
        assert!(manager.registry().is_empty());
        assert_eq!(manager.registry().command_count(), 0);
        assert!(manager.registry().groups().is_empty());
    }

    #[test]
    fn drain_timeout_abandons_stuck_plugins() {
        let fixture = Fixture::new();
        let (types, _) = fakes(vec![FakeSpec::new("Stuck", 1).closes_after(usize::MAX)]);
        let mut manager = fixture.manager(types).with_drain_timeout(Some(Duration::from_millis(300)));
        manager.load_plugins().unwrap();

        manager.shutdown();

        assert_eq!(fixture.sleeper.naps().len(), 3);
        assert!(manager.registry().is_empty());
    }
}
