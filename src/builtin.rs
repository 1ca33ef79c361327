//! The plugin compiled into the host. It is scanned first, so the tray always
//! has an icon and a way to reach the configuration.

use crate::config::HostConfig;
use crate::paths;
use crate::plugins::{
    CommandId, Guid, IconImage, MenuCommand, PluginContext, PluginLogger, PluginType, StaticModule,
    TrayPlugin,
};
use anyhow::Result;
use once_cell::sync::Lazy;

pub const MODULE_NAME: &str = "builtin";
pub const GUID: Guid = Guid::from_u128(0x5f0c_2b1e_8a4d_4c7e_9b36_1d2e_7f80_a911);
pub const DEFAULT_TOOLTIP: &str = "Tray Host";

const OPEN_CONFIG: &str = "open-config";
const OPEN_PLUGINS: &str = "open-plugins";
const ICON_SIZE: u32 = 64;

static DEFAULT_ICON: Lazy<IconImage> = Lazy::new(|| draw_default_icon(ICON_SIZE));

pub fn module() -> StaticModule {
    StaticModule::new(
        MODULE_NAME,
        vec![PluginType::plugin("HostPlugin", || -> Box<dyn TrayPlugin> {
            Box::new(HostPlugin::default())
        })],
    )
}

pub fn default_icon() -> IconImage {
    DEFAULT_ICON.clone()
}

#[derive(Default)]
pub struct HostPlugin {
    logger: Option<PluginLogger>,
}

impl HostPlugin {
    fn open(&self, command: &str) -> Result<()> {
        let target = match command {
            OPEN_CONFIG => paths::config_dir()?,
            OPEN_PLUGINS => HostConfig::load()?.plugin_dir()?,
            other => anyhow::bail!("Unknown command '{}'", other),
        };
        std::fs::create_dir_all(&target)?;
        paths::open_path(&target)
    }
}

impl TrayPlugin for HostPlugin {
    fn name(&self) -> String {
        "Tray Host".to_string()
    }

    fn guid(&self) -> Guid {
        GUID
    }

    fn initialize(&mut self, context: PluginContext) {
        self.logger = Some(context.logger);
    }

    fn commands(&mut self) -> Vec<MenuCommand> {
        vec![Some(CommandId::from(OPEN_CONFIG)), None, Some(CommandId::from(OPEN_PLUGINS))]
    }

    fn command_header(&mut self, command: &CommandId) -> String {
        match command.as_str() {
            OPEN_CONFIG => "Open Settings Folder".to_string(),
            OPEN_PLUGINS => "Open Plugins Folder".to_string(),
            other => other.to_string(),
        }
    }

    fn execute_command(&mut self, command: &CommandId) {
        if let Err(e) = self.open(command.as_str()) {
            if let Some(logger) = &self.logger {
                logger.error(&format!("{}: {:#}", command, e));
            }
        }
    }

    fn icon(&mut self) -> Option<IconImage> {
        Some(default_icon())
    }

    fn tooltip(&mut self) -> Option<String> {
        Some(DEFAULT_TOOLTIP.to_string())
    }
}

/// A filled disc with a lighter ring, on a transparent background.
fn draw_default_icon(size: u32) -> IconImage {
    let mut data = vec![0u8; (size * size * 4) as usize];
    let center = size as f32 / 2.0 - 0.5;
    let outer = size as f32 / 2.0 - 2.0;
    let inner = outer - 6.0;

    for y in 0..size {
        for x in 0..size {
            let dist = ((x as f32 - center).powi(2) + (y as f32 - center).powi(2)).sqrt();
            let pixel = match dist {
                d if d <= inner => [40, 110, 200, 255],
                d if d <= outer => [150, 190, 240, 255],
                _ => continue,
            };
            let idx = ((y * size + x) * 4) as usize;
            data[idx..idx + 4].copy_from_slice(&pixel);
        }
    }

    match IconImage::from_rgba(data, size, size) {
        Ok(icon) => icon,
        Err(e) => unreachable!("generated icon has consistent dimensions: {}", e),
    }
}
