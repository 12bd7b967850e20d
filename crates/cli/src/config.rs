//! usb-link configuration management

use anyhow::{Context, Result, anyhow};
use host::{HostOptions, parse_filters};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LinkConfig {
    #[serde(default)]
    pub general: GeneralSettings,
    #[serde(default)]
    pub usb: UsbSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralSettings {
    #[serde(default = "GeneralSettings::default_log_level")]
    pub log_level: String,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
        }
    }
}

impl GeneralSettings {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

/// How permission prompts are answered
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum PermissionMode {
    /// Grant every device
    AllowAll,
    /// Grant devices this process can open
    #[default]
    Probe,
    /// Ask on the terminal
    Console,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsbSettings {
    /// VID:PID filters of devices to consider (empty = all)
    #[serde(default)]
    pub filters: Vec<String>,
    /// VID:PID filters of devices that never need a prompt
    #[serde(default)]
    pub auto_grant: Vec<String>,
    #[serde(default)]
    pub permission: PermissionMode,
    /// Device poll interval when libusb lacks hot-plug support
    #[serde(default = "UsbSettings::default_hotplug_poll_ms")]
    pub hotplug_poll_ms: u64,
    /// Detach kernel drivers that hold the interface we claim
    #[serde(default = "UsbSettings::default_detach_kernel_driver")]
    pub detach_kernel_driver: bool,
}

impl Default for UsbSettings {
    fn default() -> Self {
        Self {
            filters: Vec::new(),
            auto_grant: Vec::new(),
            permission: PermissionMode::default(),
            hotplug_poll_ms: Self::default_hotplug_poll_ms(),
            detach_kernel_driver: Self::default_detach_kernel_driver(),
        }
    }
}

impl UsbSettings {
    fn default_hotplug_poll_ms() -> u64 {
        1000
    }

    fn default_detach_kernel_driver() -> bool {
        true
    }
}

impl LinkConfig {
    /// Load configuration from the specified path
    ///
    /// Without a path, the first existing standard location is used.
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            PathBuf::from(shellexpand::tilde(&p.to_string_lossy()).as_ref())
        } else {
            let candidates = vec![
                Self::default_path(),
                PathBuf::from("/etc/usb-link/config.toml"),
            ];

            candidates
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found, using defaults"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: LinkConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        config.validate()?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load config: {}, using defaults", e);
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("usb-link").join("config.toml")
        } else {
            PathBuf::from(".config/usb-link/config.toml")
        }
    }

    /// Options for the libusb host layer
    pub fn host_options(&self) -> Result<HostOptions> {
        Ok(HostOptions {
            filters: parse_filters(self.usb.filters.as_slice())
                .context("Invalid usb.filters")?,
            auto_grant: parse_filters(self.usb.auto_grant.as_slice())
                .context("Invalid usb.auto_grant")?,
            hotplug_poll: Duration::from_millis(self.usb.hotplug_poll_ms),
            detach_kernel_driver: self.usb.detach_kernel_driver,
        })
    }

    fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.general.log_level,
                valid_levels.join(", ")
            ));
        }

        // Same grammar the host layer parses with
        self.host_options()?;

        if self.usb.hotplug_poll_ms == 0 {
            return Err(anyhow!("hotplug_poll_ms must be greater than 0"));
        }

        Ok(())
    }
}
