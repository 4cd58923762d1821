//! Host configuration management

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostConfig {
    pub host: HostSettings,
    #[serde(default)]
    pub pools: PoolSettings,
    #[serde(default)]
    pub limits: Limits,
    /// Register-based controller model
    #[serde(default)]
    pub register: RegisterSettings,
    /// Descriptor-ring controller model
    #[serde(default)]
    pub ring: RingSettings,
    #[serde(default)]
    pub power: PowerSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostSettings {
    /// Controller type: khci, ehci, ohci or ip3516hs
    pub controller: String,
    pub log_level: String,
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            controller: "ehci".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Fixed pool capacities; nothing grows after startup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSettings {
    #[serde(default = "PoolSettings::default_devices")]
    pub devices: usize,
    #[serde(default = "PoolSettings::default_pipes")]
    pub pipes: usize,
    #[serde(default = "PoolSettings::default_transfers")]
    pub transfers: usize,
    /// Room for attach/detach/power events, on top of one completion per transfer
    #[serde(default = "PoolSettings::default_event_queue_depth")]
    pub event_queue_depth: usize,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            devices: Self::default_devices(),
            pipes: Self::default_pipes(),
            transfers: Self::default_transfers(),
            event_queue_depth: Self::default_event_queue_depth(),
        }
    }
}

impl PoolSettings {
    fn default_devices() -> usize {
        8
    }

    fn default_pipes() -> usize {
        16
    }

    fn default_transfers() -> usize {
        16
    }

    fn default_event_queue_depth() -> usize {
        32
    }

    /// Queue capacity: every pooled transfer can have a completion and an
    /// abort completion pending without crowding out device events
    pub fn queue_capacity(&self) -> usize {
        self.event_queue_depth + 2 * self.transfers
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limits {
    #[serde(default = "Limits::default_interfaces")]
    pub interfaces_per_configuration: usize,
    #[serde(default = "Limits::default_endpoints")]
    pub endpoints_per_interface: usize,
    /// NAK retries for non-interrupt pipes opened with a zero NAK count
    #[serde(default = "Limits::default_nak_retry_budget")]
    pub nak_retry_budget: u32,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            interfaces_per_configuration: Self::default_interfaces(),
            endpoints_per_interface: Self::default_endpoints(),
            nak_retry_budget: Self::default_nak_retry_budget(),
        }
    }
}

impl Limits {
    fn default_interfaces() -> usize {
        5
    }

    fn default_endpoints() -> usize {
        4
    }

    fn default_nak_retry_budget() -> u32 {
        3000
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterSettings {
    /// DMA-safe bounce buffers shared by all pipes
    #[serde(default = "RegisterSettings::default_swap_buffers")]
    pub swap_buffers: usize,
}

impl Default for RegisterSettings {
    fn default() -> Self {
        Self {
            swap_buffers: Self::default_swap_buffers(),
        }
    }
}

impl RegisterSettings {
    fn default_swap_buffers() -> usize {
        1
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RingSettings {
    #[serde(default = "RingSettings::default_descriptors")]
    pub descriptors: usize,
    #[serde(default = "RingSettings::default_bytes_per_descriptor")]
    pub bytes_per_descriptor: usize,
}

impl Default for RingSettings {
    fn default() -> Self {
        Self {
            descriptors: Self::default_descriptors(),
            bytes_per_descriptor: Self::default_bytes_per_descriptor(),
        }
    }
}

impl RingSettings {
    fn default_descriptors() -> usize {
        32
    }

    fn default_bytes_per_descriptor() -> usize {
        // 5 pages of 4 KiB
        20 * 1024
    }
}

/// Runtime switches for the power features compiled in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PowerSettings {
    #[serde(default = "default_true")]
    pub low_power: bool,
    #[serde(default = "default_true")]
    pub lpm: bool,
}

impl Default for PowerSettings {
    fn default() -> Self {
        Self {
            low_power: true,
            lpm: true,
        }
    }
}

fn default_true() -> bool {
    true
}

impl HostConfig {
    /// Load configuration from file
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            p
        } else {
            let candidates = vec![
                Self::default_path(),
                PathBuf::from("/etc/usb-host/host.toml"),
            ];

            candidates
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found, using defaults"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: HostConfig = toml::from_str(&content)
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

    /// Save configuration to the specified path
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

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("usb-host").join("host.toml")
        } else {
            PathBuf::from(".config/usb-host/host.toml")
        }
    }

    /// Validate configuration values
    ///
    /// The controller name is checked by `Host::new`, which reports it as
    /// `ControllerNotFound` rather than a parse error.
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.host.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.host.log_level,
                valid_levels.join(", ")
            ));
        }

        let pools = [
            ("pools.devices", self.pools.devices),
            ("pools.pipes", self.pools.pipes),
            ("pools.transfers", self.pools.transfers),
            ("pools.event_queue_depth", self.pools.event_queue_depth),
            ("ring.descriptors", self.ring.descriptors),
            ("ring.bytes_per_descriptor", self.ring.bytes_per_descriptor),
        ];
        for (name, value) in pools {
            if value == 0 {
                return Err(anyhow!("Invalid {} '0', must be at least 1", name));
            }
        }

        if self.pools.pipes > usize::from(u16::MAX) || self.pools.transfers > usize::from(u16::MAX)
        {
            return Err(anyhow!("Pool capacities are limited to {}", u16::MAX));
        }

        if self.limits.interfaces_per_configuration > usize::from(u8::MAX) {
            return Err(anyhow!(
                "Invalid limits.interfaces_per_configuration '{}', at most {}",
                self.limits.interfaces_per_configuration,
                u8::MAX
            ));
        }

        if self.power.lpm && !self.power.low_power {
            return Err(anyhow!("power.lpm requires power.low_power"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = HostConfig::default();
        assert_eq!(config.host.controller, "ehci");
        assert_eq!(config.host.log_level, "info");
        assert_eq!(config.limits.interfaces_per_configuration, 5);
        assert_eq!(config.limits.endpoints_per_interface, 4);
        assert_eq!(config.limits.nak_retry_budget, 3000);
        assert_eq!(config.ring.bytes_per_descriptor, 20480);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: HostConfig = toml::from_str(
            r#"
            [host]
            controller = "khci"
            log_level = "debug"

            [pools]
            transfers = 4
            "#,
        )
        .unwrap();

        assert_eq!(config.host.controller, "khci");
        assert_eq!(config.pools.transfers, 4);
        assert_eq!(config.pools.pipes, 16);
        assert_eq!(config.register.swap_buffers, 1);
        assert_eq!(config.pools.queue_capacity(), 32 + 8);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = HostConfig::default();
        config.host.log_level = "loud".to_string();
        assert!(config.validate().is_err());

        let mut config = HostConfig::default();
        config.pools.transfers = 0;
        assert!(config.validate().is_err());

        let mut config = HostConfig::default();
        config.power.low_power = false;
        assert!(config.validate().is_err());
        config.power.lpm = false;
        assert!(config.validate().is_ok());
    }
}
