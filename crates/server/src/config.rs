//! Server configuration management

use anyhow::{Context, Result, anyhow};
use common::DeviceIdentity;
use driver::class::{GOOGLE_SERVO_MINOR_BASE, USB_MAXMINORS};
use driver::{ClassDriver, IdTable};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub server: ServerSettings,
    #[serde(default)]
    pub driver: DriverSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    pub log_level: String,
    /// Re-enumeration period when libusb has no hot-plug support
    #[serde(default = "ServerSettings::default_rescan_interval")]
    pub rescan_interval_ms: u64,
}

impl ServerSettings {
    fn default_rescan_interval() -> u64 {
        2000
    }

    pub fn rescan_interval(&self) -> Duration {
        Duration::from_millis(self.rescan_interval_ms)
    }
}

/// Class driver and device node settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverSettings {
    /// Instance name, `%d` is replaced by the instance index
    #[serde(default = "DriverSettings::default_name_template")]
    pub name_template: String,
    /// First minor number of the driver
    #[serde(default = "DriverSettings::default_minor_base")]
    pub minor_base: u32,
    /// End (exclusive) of the minor range
    #[serde(default = "DriverSettings::default_max_minors")]
    pub max_minors: u32,
    /// Directory prefix of nodes below `node_root`
    #[serde(default = "DriverSettings::default_devnode_dir")]
    pub devnode_dir: String,
    /// Where device nodes are exposed (`~` is expanded)
    #[serde(default = "DriverSettings::default_node_root")]
    pub node_root: String,
    /// Identities accepted in addition to the built-in Servo table
    /// Format: "0xVID:0xPID" or "VID:PID" (hex)
    #[serde(default)]
    pub extra_ids: Vec<String>,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            name_template: Self::default_name_template(),
            minor_base: Self::default_minor_base(),
            max_minors: Self::default_max_minors(),
            devnode_dir: Self::default_devnode_dir(),
            node_root: Self::default_node_root(),
            extra_ids: Vec::new(),
        }
    }
}

impl DriverSettings {
    fn default_name_template() -> String {
        "google-servo%d".to_string()
    }

    fn default_minor_base() -> u32 {
        GOOGLE_SERVO_MINOR_BASE
    }

    fn default_max_minors() -> u32 {
        USB_MAXMINORS
    }

    fn default_devnode_dir() -> String {
        "usb".to_string()
    }

    fn default_node_root() -> String {
        match dirs::runtime_dir() {
            Some(dir) => dir.join("google-servo").display().to_string(),
            None => "/run/google-servo".to_string(),
        }
    }

    pub fn class_driver(&self) -> ClassDriver {
        ClassDriver {
            name_template: self.name_template.clone(),
            minor_base: self.minor_base,
            devnode_dir: self.devnode_dir.clone(),
        }
    }

    /// Number of instances that fit in the minor range
    pub fn capacity(&self) -> u32 {
        self.max_minors.saturating_sub(self.minor_base)
    }

    pub fn node_root(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.node_root).as_ref())
    }

    /// Built-in Servo table followed by `extra_ids`
    pub fn id_table(&self) -> Result<IdTable> {
        let extra = self
            .extra_ids
            .iter()
            .map(|id| {
                id.parse::<DeviceIdentity>()
                    .map_err(|e| anyhow!("Invalid extra id '{}': {}", id, e))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(IdTable::servo().with_extra(extra))
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                log_level: "info".to_string(),
                rescan_interval_ms: ServerSettings::default_rescan_interval(),
            },
            driver: DriverSettings::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from the specified path
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            p
        } else {
            let candidates = vec![
                Self::default_path(),
                PathBuf::from("/etc/google-servo/server.toml"),
            ];

            candidates
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found, using defaults"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config = Self::from_toml(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Parse and validate a TOML document
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: ServerConfig = toml::from_str(content)?;
        config.validate()?;
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
            config_dir.join("google-servo").join("server.toml")
        } else {
            PathBuf::from(".config/google-servo/server.toml")
        }
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.server.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.server.log_level,
                valid_levels.join(", ")
            ));
        }

        if self.server.rescan_interval_ms == 0 {
            return Err(anyhow!("rescan_interval_ms must be greater than 0"));
        }

        let driver = &self.driver;
        if driver.name_template.trim().is_empty() {
            return Err(anyhow!("name_template must not be empty"));
        }
        let sample = driver.class_driver().instance_name(0);
        if driver.name_template.contains('/') || !is_contained_path(&sample) {
            return Err(anyhow!(
                "Invalid name_template '{}', must be a plain file name",
                driver.name_template
            ));
        }

        if !is_contained_path(&driver.devnode_dir) {
            return Err(anyhow!(
                "Invalid devnode_dir '{}', must be a non-empty relative path without '..'",
                driver.devnode_dir
            ));
        }

        if driver.max_minors > USB_MAXMINORS {
            return Err(anyhow!(
                "max_minors {} exceeds the USB minor space ({})",
                driver.max_minors,
                USB_MAXMINORS
            ));
        }
        if driver.minor_base >= driver.max_minors {
            return Err(anyhow!(
                "minor_base {} must be below max_minors {}",
                driver.minor_base,
                driver.max_minors
            ));
        }

        for id in &driver.extra_ids {
            Self::validate_identity(id)?;
        }

        Ok(())
    }

    /// Validate an identity with the same grammar `id_table` parses
    fn validate_identity(id: &str) -> Result<()> {
        id.parse::<DeviceIdentity>()
            .map(|_| ())
            .map_err(|e| anyhow!("Invalid extra id '{}': {}", id, e))
    }
}

/// True when `path` is non-empty and made only of plain names, so joining
/// it onto the node root can never leave the root
fn is_contained_path(path: &str) -> bool {
    !path.trim().is_empty()
        && Path::new(path)
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL_CONFIG: &str = r#"
[server]
log_level = "debug"
rescan_interval_ms = 500

[driver]
name_template = "servo%d"
minor_base = 200
max_minors = 208
devnode_dir = "servo"
node_root = "/tmp/servo-nodes"
extra_ids = ["0x18d1:0x520d"]
"#;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.server.log_level, "info");
        assert_eq!(config.driver.minor_base, 160);
        assert_eq!(config.driver.capacity(), 96);
        assert_eq!(config.driver.class_driver(), ClassDriver::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_minimal_config_uses_driver_defaults() {
        let config = ServerConfig::from_toml("[server]\nlog_level = \"warn\"\n").unwrap();
        assert_eq!(config.server.rescan_interval(), Duration::from_millis(2000));
        assert_eq!(config.driver.name_template, "google-servo%d");
        assert_eq!(config.driver.id_table().unwrap().len(), 4);
    }

    #[test]
    fn test_full_config() {
        let config = ServerConfig::from_toml(FULL_CONFIG).unwrap();
        let class = config.driver.class_driver();

        assert_eq!(class.instance_name(1), "servo1");
        assert_eq!(class.devnode("servo1"), PathBuf::from("servo/servo1"));
        assert_eq!(config.driver.capacity(), 8);
        assert_eq!(config.driver.node_root(), PathBuf::from("/tmp/servo-nodes"));

        let table = config.driver.id_table().unwrap();
        assert_eq!(table.len(), 5);
        assert!(table.lookup(0x18d1, 0x520d).is_some());
    }

    #[test]
    fn test_validate_identity() {
        assert!(ServerConfig::validate_identity("0x18d1:0x5002").is_ok());
        assert!(ServerConfig::validate_identity("0X18D1:0x501B").is_ok());

        assert!(ServerConfig::validate_identity("18d1:5002").is_ok());

        assert!(ServerConfig::validate_identity("0x18d1").is_err());
        assert!(ServerConfig::validate_identity("0x+1:0x5002").is_err());
        assert!(ServerConfig::validate_identity("0x18d1:*").is_err());
        assert!(ServerConfig::validate_identity("0x18d1:0x5002:0x1").is_err());
        assert!(ServerConfig::validate_identity("0x12345:0x5002").is_err());
    }

    #[test]
    fn test_validate_minor_range() {
        let mut config = ServerConfig::default();

        config.driver.minor_base = 256;
        assert!(config.validate().is_err());

        config.driver.minor_base = 0;
        config.driver.max_minors = 300;
        assert!(config.validate().is_err());

        config.driver.max_minors = 1;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_log_level() {
        let mut config = ServerConfig::default();
        config.server.log_level = "invalid".to_string();
        assert!(config.validate().is_err());

        config.server.log_level = "trace".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_name_template() {
        let mut config = ServerConfig::default();
        config.driver.name_template = " ".to_string();
        assert!(config.validate().is_err());

        config.driver.name_template = "../servo%d".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_devnode_dir_stays_below_root() {
        for devnode_dir in ["", " ", "/etc", "../..", "usb/../..", "./usb"] {
            let toml = format!(
                "[server]\nlog_level = \"info\"\n[driver]\ndevnode_dir = \"{}\"\n",
                devnode_dir
            );
            assert!(
                ServerConfig::from_toml(&toml).is_err(),
                "devnode_dir {:?} accepted",
                devnode_dir
            );
        }

        let config = ServerConfig::from_toml(
            "[server]\nlog_level = \"info\"\n[driver]\ndevnode_dir = \"usb/servo\"\nnode_root = \"/run/servo\"\n",
        )
        .unwrap();
        let class = config.driver.class_driver();
        let node = class.devnode(&class.instance_name(0));
        assert!(node.is_relative());
        assert!(
            config
                .driver
                .node_root()
                .join(&node)
                .starts_with(config.driver.node_root())
        );
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("server.toml");

        let mut config = ServerConfig::default();
        config.driver.extra_ids.push("0x18d1:0x520d".to_string());
        config.save(&path).unwrap();

        let loaded = ServerConfig::load(Some(path)).unwrap();
        assert_eq!(loaded.driver.extra_ids, config.driver.extra_ids);
        assert_eq!(loaded.driver.node_root, config.driver.node_root);
    }

    #[test]
    fn test_node_root_tilde_expansion() {
        let settings = DriverSettings {
            node_root: "~/servo".to_string(),
            ..DriverSettings::default()
        };
        assert!(!settings.node_root().starts_with("~"));
    }
}
