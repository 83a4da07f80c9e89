//! Configuration file support for geckoflash.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (GECKOFLASH_*)
//! 3. Local config file (./geckoflash.toml)
//! 4. Global config file (~/.config/geckoflash/config.toml)

use directories::ProjectDirs;
use geckoflash::DEFAULT_DESCRIPTION_MATCHES;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Name of the local configuration file.
pub const LOCAL_CONFIG_FILE: &str = "geckoflash.toml";

/// Firmware image flashed when none is given.
pub const DEFAULT_FIRMWARE: &str = "firmware.gbl";

/// USB device identification for port matching.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UsbDevice {
    /// USB Vendor ID.
    pub vid: u16,
    /// USB Product ID.
    pub pid: u16,
}

impl UsbDevice {
    /// Check if this device matches the given USB info.
    pub fn matches(&self, vid: u16, pid: u16) -> bool {
        self.vid == vid && self.pid == pid
    }
}

/// Connection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Preferred serial port (e.g., "/dev/ttyUSB0" or "COM3").
    pub serial: Option<String>,
    /// Default baud rate.
    pub baud: Option<u32>,
}

/// Port-specific configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortConfig {
    /// Connection settings.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Additional USB devices treated as targets.
    #[serde(default)]
    pub usb_device: Vec<UsbDevice>,
    /// Description fragments that identify a target port.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_descriptions: Vec<String>,
}

/// Flash configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlashConfig {
    /// Firmware image used when none is given on the command line.
    pub firmware: Option<PathBuf>,
    /// Seconds to wait for the bootloader menu.
    pub prompt_timeout_secs: Option<u64>,
    /// Attempts per XMODEM block.
    pub max_retries: Option<u32>,
    /// Leave the bootloader after a successful upload.
    pub exit_bootloader: Option<bool>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Port configuration.
    #[serde(default)]
    pub port: PortConfig,
    /// Flash configuration.
    #[serde(default)]
    pub flash: FlashConfig,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        // Load global config
        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        // Load local config (overrides global)
        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG_FILE)) {
            debug!("Loaded local config from {LOCAL_CONFIG_FILE}");
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Self {
        if let Some(config) = Self::load_from_file(path) {
            debug!("Loaded config from {}", path.display());
            config
        } else {
            warn!(
                "Could not load config from {}, using defaults",
                path.display()
            );
            Self::default()
        }
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Failed to parse TOML config file {}: {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "geckoflash").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one.
    fn merge(&mut self, other: Self) {
        // Port config
        if other.port.connection.serial.is_some() {
            self.port.connection.serial = other.port.connection.serial;
        }
        if other.port.connection.baud.is_some() {
            self.port.connection.baud = other.port.connection.baud;
        }
        self.port.usb_device.extend(other.port.usb_device);
        if !other.port.match_descriptions.is_empty() {
            self.port.match_descriptions = other.port.match_descriptions;
        }

        // Flash config
        if other.flash.firmware.is_some() {
            self.flash.firmware = other.flash.firmware;
        }
        if other.flash.prompt_timeout_secs.is_some() {
            self.flash.prompt_timeout_secs = other.flash.prompt_timeout_secs;
        }
        if other.flash.max_retries.is_some() {
            self.flash.max_retries = other.flash.max_retries;
        }
        if other.flash.exit_bootloader.is_some() {
            self.flash.exit_bootloader = other.flash.exit_bootloader;
        }
    }

    /// Description fragments used for auto-detection.
    pub fn match_descriptions(&self) -> Vec<String> {
        if self.port.match_descriptions.is_empty() {
            DEFAULT_DESCRIPTION_MATCHES
                .iter()
                .map(ToString::to_string)
                .collect()
        } else {
            self.port.match_descriptions.clone()
        }
    }

    /// Firmware image to flash when none is given on the command line.
    pub fn firmware(&self) -> PathBuf {
        self.flash
            .firmware
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_FIRMWARE))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.port.connection.serial.is_none());
        assert!(config.port.connection.baud.is_none());
        assert!(config.port.usb_device.is_empty());
        assert!(config.flash.firmware.is_none());
        assert!(config.flash.max_retries.is_none());
        assert_eq!(config.firmware(), PathBuf::from(DEFAULT_FIRMWARE));
        assert_eq!(
            config.match_descriptions(),
            vec!["Silicon Labs CP210x".to_string(), "Zigbee".to_string()]
        );
    }

    #[test]
    fn test_usb_device_matches() {
        let device = UsbDevice {
            vid: 0x10C4,
            pid: 0xEA60,
        };
        assert!(device.matches(0x10C4, 0xEA60));
        assert!(!device.matches(0x10C4, 0xEA70));
        assert!(!device.matches(0x1A86, 0xEA60));
    }

    #[test]
    fn test_config_merge_overrides_set_values() {
        let mut base = Config::default();
        base.port.connection.baud = Some(57_600);
        base.flash.max_retries = Some(3);

        let mut other = Config::default();
        other.port.connection.serial = Some("/dev/ttyUSB0".to_string());
        other.port.connection.baud = Some(115_200);
        other.flash.firmware = Some(PathBuf::from("ncp.gbl"));
        other.flash.exit_bootloader = Some(false);

        base.merge(other);

        assert_eq!(base.port.connection.serial.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(base.port.connection.baud, Some(115_200));
        assert_eq!(base.flash.max_retries, Some(3));
        assert_eq!(base.flash.exit_bootloader, Some(false));
        assert_eq!(base.firmware(), PathBuf::from("ncp.gbl"));
    }

    #[test]
    fn test_config_merge_does_not_overwrite_with_none() {
        let mut base = Config::default();
        base.port.connection.serial = Some("/dev/ttyUSB0".to_string());
        base.port.match_descriptions = vec!["Sonoff".to_string()];
        base.flash.prompt_timeout_secs = Some(30);

        base.merge(Config::default());

        assert_eq!(base.port.connection.serial.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(base.match_descriptions(), vec!["Sonoff".to_string()]);
        assert_eq!(base.flash.prompt_timeout_secs, Some(30));
    }

    #[test]
    fn test_config_merge_usb_devices_extend() {
        let mut base = Config::default();
        base.port.usb_device.push(UsbDevice { vid: 0x10C4, pid: 0xEA60 });

        let mut other = Config::default();
        other.port.usb_device.push(UsbDevice { vid: 0x0403, pid: 0x6015 });

        base.merge(other);
        assert_eq!(base.port.usb_device.len(), 2);
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
[port]
match_descriptions = ["Sonoff Zigbee", "CP2102N"]

[port.connection]
serial = "/dev/ttyUSB0"
baud = 115200

[[port.usb_device]]
vid = 4292
pid = 60000

[flash]
firmware = "ncp-uart-sw_7.4.4_115200.gbl"
prompt_timeout_secs = 20
max_retries = 16
exit_bootloader = false
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.port.connection.serial.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(config.port.connection.baud, Some(115_200));
        assert_eq!(config.port.usb_device, vec![UsbDevice { vid: 0x10C4, pid: 0xEA60 }]);
        assert_eq!(config.match_descriptions().len(), 2);
        assert_eq!(
            config.firmware(),
            PathBuf::from("ncp-uart-sw_7.4.4_115200.gbl")
        );
        assert_eq!(config.flash.prompt_timeout_secs, Some(20));
        assert_eq!(config.flash.max_retries, Some(16));
        assert_eq!(config.flash.exit_bootloader, Some(false));
    }

    #[test]
    fn test_config_from_empty_toml() {
        let config: Config = toml::from_str("").unwrap();
        assert!(config.port.connection.serial.is_none());
        assert!(config.port.usb_device.is_empty());
        assert!(config.flash.firmware.is_none());
    }

    #[test]
    fn test_load_from_path_valid() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        fs::write(
            &path,
            r#"
[port.connection]
serial = "/dev/ttyUSB1"
[flash]
max_retries = 5
"#,
        )
        .unwrap();

        let config = Config::load_from_path(&path);
        assert_eq!(config.port.connection.serial.as_deref(), Some("/dev/ttyUSB1"));
        assert_eq!(config.flash.max_retries, Some(5));
    }

    #[test]
    fn test_load_from_path_invalid_toml_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        fs::write(&path, "invalid toml [[[").unwrap();

        let config = Config::load_from_path(&path);
        assert!(config.port.connection.serial.is_none());
    }

    #[test]
    fn test_load_from_path_nonexistent() {
        let config = Config::load_from_path(Path::new("/nonexistent/path/config.toml"));
        assert!(config.port.connection.serial.is_none());
    }

    #[test]
    fn test_global_config_path() {
        if let Some(p) = Config::global_config_path() {
            let p = p.to_string_lossy();
            assert!(p.contains("geckoflash"));
            assert!(p.ends_with("config.toml"));
        }
    }
}
