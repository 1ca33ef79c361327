use anyhow::{Context, Result};
use std::sync::{Arc, Mutex};
use tray_host::config::HostConfig;
use tray_host::daemon::{self, EventBus, Refresher};
use tray_host::plugins::{
    EmbeddedCatalog, FileLockProvider, JsonSettingsStore, LockProvider, ManagerDeps, NativeLoader, PluginManager,
    ScanOptions,
};
use tray_host::signature::{BundleTrustChecker, OfflineRevocation, OnlineRevocation, RevocationSource, SignatureValidator};
use tray_host::sleeper::{Sleeper, ThreadSleeper};
use tray_host::tray::{self, TrayContext};
use tray_host::{builtin, paths, platform};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!("Starting Tray Host...");

    let locks_dir = paths::locks_dir()?;
    let Some(mut host_lock) = FileLockProvider::new(&locks_dir).try_acquire(&tray_host::host_lock_name())? else {
        log::info!("Tray Host is already running");
        return Ok(());
    };

    let config = HostConfig::load()?;
    let events = Arc::new(EventBus::new());

    let mut plugin_manager = build_manager(&config, Arc::clone(&events))?;
    let bad_signature = match plugin_manager.load_plugins() {
        Ok(report) => report.bad_signature,
        Err(e) => {
            log::error!("{}", e);
            host_lock.release();
            std::process::exit(e.exit_code());
        }
    };
    let plugin_manager = Arc::new(Mutex::new(plugin_manager));

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    let refresher = Arc::new(Refresher::new(Arc::clone(&plugin_manager), Arc::clone(&events)));
    {
        let _guard = runtime.enter();
        Arc::clone(&refresher).spawn(config.refresh_interval());
        if bad_signature {
            daemon::schedule_signature_notice(Arc::clone(&events));
        }
    }

    log::info!("Tray Host started successfully");

    tray::run(TrayContext {
        plugin_manager: Arc::clone(&plugin_manager),
        refresher,
        events: Arc::clone(&events),
    })?;

    log::info!("Shutdown requested, draining plugins...");
    events.send(daemon::HostEvent::Quit);
    runtime.shutdown_timeout(tray::PUMP_INTERVAL);

    let all_agreed = plugin_manager.lock().unwrap().shutdown();
    if !all_agreed {
        log::info!("Closed despite a plugin asking to stay open");
    }
    host_lock.release();
    Ok(())
}

fn build_manager(config: &HostConfig, events: Arc<EventBus>) -> Result<PluginManager> {
    let sleeper: Arc<dyn Sleeper> = Arc::new(ThreadSleeper);
    let validator = if config.signature.enabled {
        let revocation: Box<dyn RevocationSource> = if config.signature.online_revocation {
            Box::new(OnlineRevocation::new().context("Failed to build revocation client")?)
        } else {
            Box::new(OfflineRevocation)
        };
        let checker = BundleTrustChecker::new(&config.signature.trust_anchors, revocation)
            .context("Invalid trust anchor in config")?;
        Some(SignatureValidator::new(
            Box::new(checker),
            config.signature.policy_oids.clone(),
            Arc::clone(&sleeper),
        ))
    } else {
        log::warn!("Signature validation is disabled; unsigned plugins will load");
        None
    };

    let deps = ManagerDeps {
        loader: Box::new(NativeLoader::new(EmbeddedCatalog::new().with(builtin::module()))),
        locks: Box::new(FileLockProvider::new(paths::locks_dir()?)),
        validator,
        settings: Arc::new(JsonSettingsStore::open_default()?),
        events,
        sleeper,
    };
    let options = ScanOptions {
        app_dir: config.plugin_dir()?,
        extensions: config.extensions.clone(),
        embedded: config.embedded_plugin.clone(),
    };

    Ok(PluginManager::new(deps, options)
        .with_elevation(platform::is_elevated())
        .with_drain_timeout(config.drain_timeout()))
}
