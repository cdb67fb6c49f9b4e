//! Bridge configuration
//!
//! Read-only: the bridge never writes its configuration back.

use accessory::AudioOptions;
use anyhow::{Context, Result, anyhow};
use protocol::{AccessoryIdentity, DeviceFilter, encode_string};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Largest isochronous packet a high-bandwidth endpoint can deliver
const MAX_PACKET_SIZE: u32 = 1024 * 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub general: GeneralSettings,
    /// Identification strings sent before switching to accessory mode
    #[serde(default = "BridgeConfig::default_identity")]
    pub accessory: AccessoryIdentity,
    #[serde(default)]
    pub hid: HidSettings,
    #[serde(default)]
    pub audio: AudioSettings,
    /// Extra `VID:PID` filters for locating accessory-mode devices
    #[serde(default)]
    pub filters: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralSettings {
    #[serde(default = "GeneralSettings::default_log_level")]
    pub log_level: String,
    /// Timeout applied to every USB transfer
    #[serde(default = "GeneralSettings::default_transfer_timeout_ms")]
    pub transfer_timeout_ms: u64,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
            transfer_timeout_ms: Self::default_transfer_timeout_ms(),
        }
    }
}

impl GeneralSettings {
    fn default_log_level() -> String {
        "info".to_string()
    }

    fn default_transfer_timeout_ms() -> u64 {
        1000
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HidSettings {
    #[serde(default = "HidSettings::default_accessory_id")]
    pub accessory_id: u16,
}

impl Default for HidSettings {
    fn default() -> Self {
        Self {
            accessory_id: Self::default_accessory_id(),
        }
    }
}

impl HidSettings {
    fn default_accessory_id() -> u16 {
        1
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioSettings {
    #[serde(default = "AudioSettings::default_packet_size")]
    pub packet_size: u32,
    #[serde(default = "AudioSettings::default_packets_per_transfer")]
    pub packets_per_transfer: usize,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            packet_size: Self::default_packet_size(),
            packets_per_transfer: Self::default_packets_per_transfer(),
        }
    }
}

impl AudioSettings {
    fn default_packet_size() -> u32 {
        accessory::DEFAULT_PACKET_SIZE
    }

    fn default_packets_per_transfer() -> usize {
        1
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            general: GeneralSettings::default(),
            accessory: Self::default_identity(),
            hid: HidSettings::default(),
            audio: AudioSettings::default(),
            filters: Vec::new(),
        }
    }
}

impl BridgeConfig {
    /// Load configuration from the specified path, or the first standard
    /// location that exists
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            p
        } else {
            let candidates = vec![
                Self::default_path(),
                PathBuf::from("/etc/aoa-bridge/config.toml"),
            ];

            candidates
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found, using defaults"))?
        };

        let config = Self::load_from(&config_path)?;
        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: BridgeConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::debug!("{}", e);
                Self::default()
            }
        }
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("aoa-bridge").join("config.toml")
        } else {
            PathBuf::from(".config/aoa-bridge/config.toml")
        }
    }

    fn default_identity() -> AccessoryIdentity {
        AccessoryIdentity {
            manufacturer: Some("aoa-bridge".to_string()),
            model: Some("Virtual Input".to_string()),
            description: Some("USB accessory bridge".to_string()),
            version: Some(env!("CARGO_PKG_VERSION").to_string()),
            uri: None,
            serial: None,
        }
    }

    /// Configured extra device filters
    pub fn device_filters(&self) -> Result<Vec<DeviceFilter>> {
        self.filters
            .iter()
            .map(|f| f.parse::<DeviceFilter>().map_err(|e| anyhow!(e)))
            .collect()
    }

    pub fn audio_options(&self) -> AudioOptions {
        AudioOptions {
            packet_size: self.audio.packet_size,
            packets_per_transfer: self.audio.packets_per_transfer,
        }
    }

    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_millis(self.general.transfer_timeout_ms)
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.general.log_level,
                valid_levels.join(", ")
            ));
        }

        if self.general.transfer_timeout_ms == 0 {
            return Err(anyhow!("transfer_timeout_ms must be greater than 0"));
        }

        if !(1..=MAX_PACKET_SIZE).contains(&self.audio.packet_size) {
            return Err(anyhow!(
                "Invalid audio packet_size {}, must be 1-{}",
                self.audio.packet_size,
                MAX_PACKET_SIZE
            ));
        }

        if self.audio.packets_per_transfer == 0 {
            return Err(anyhow!("packets_per_transfer must be at least 1"));
        }

        for (kind, value) in self.accessory.strings() {
            encode_string(value)
                .with_context(|| format!("Invalid accessory string {:?}", kind))?;
        }

        self.device_filters()?;

        Ok(())
    }
}
