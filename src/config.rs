//! Configuration management for cryptmirror
//!
//! Mount options come from defaults, an optional JSON file and environment
//! variables, in increasing order of precedence. The encryption key is never
//! part of the configuration.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default attribute cache lifetime in milliseconds
pub const DEFAULT_ATTR_TTL_MS: u64 = 1000;

/// Default filesystem name shown in the mount table
pub const DEFAULT_FS_NAME: &str = "cryptmirror";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Mount configuration
    pub mount: MountConfig,
}

/// Mount configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MountConfig {
    /// Name reported as the mount source
    pub fs_name: String,

    /// Allow other users to access the mount
    pub allow_other: bool,

    /// Allow root to access the mount
    pub allow_root: bool,

    /// Unmount automatically when the process exits
    pub auto_unmount: bool,

    /// Let the kernel enforce permission bits
    pub default_permissions: bool,

    /// Attribute and entry cache lifetime (ms)
    pub attr_ttl_ms: u64,
}

impl Default for MountConfig {
    fn default() -> Self {
        MountConfig {
            fs_name: DEFAULT_FS_NAME.to_string(),
            allow_other: false,
            allow_root: false,
            auto_unmount: false,
            default_permissions: false,
            attr_ttl_ms: DEFAULT_ATTR_TTL_MS,
        }
    }
}

impl MountConfig {
    /// Attribute cache lifetime
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.attr_ttl_ms)
    }

    /// Build the fuser mount option list
    pub fn mount_options(&self) -> Vec<fuser::MountOption> {
        let mut options = vec![
            fuser::MountOption::FSName(self.fs_name.clone()),
            fuser::MountOption::Subtype("cryptmirror".to_string()),
            fuser::MountOption::RW,
        ];

        if self.allow_other {
            options.push(fuser::MountOption::AllowOther);
        }
        if self.allow_root {
            options.push(fuser::MountOption::AllowRoot);
        }
        if self.auto_unmount {
            options.push(fuser::MountOption::AutoUnmount);
        }
        if self.default_permissions {
            options.push(fuser::MountOption::DefaultPermissions);
        }

        options
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl Config {
    /// Load configuration from a file, with environment variable overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::Config(format!("Failed to read config file: {}", e))
        })?;

        let mut config: Config = serde_json::from_str(&content).map_err(|e| {
            Error::Config(format!("Failed to parse config file: {}", e))
        })?;

        config.apply_env_overrides();

        config.validate()?;
        Ok(config)
    }

    /// Load from `path` if given, else from the default location if it
    /// exists, else use defaults
    pub fn discover(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }

        match Self::default_path() {
            Some(default) if default.exists() => Self::load(default),
            _ => {
                let mut config = Config::default();
                config.apply_env_overrides();
                config.validate()?;
                Ok(config)
            }
        }
    }

    /// `<config_dir>/cryptmirror/config.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("cryptmirror").join("config.json"))
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        if let Ok(name) = std::env::var("CRYPTMIRROR_FS_NAME") {
            let name = name.trim().to_string();
            if !name.is_empty() {
                self.mount.fs_name = name;
            }
        }

        if let Ok(value) = std::env::var("CRYPTMIRROR_ALLOW_OTHER") {
            if let Some(allow) = parse_bool(&value) {
                self.mount.allow_other = allow;
            }
        }

        if let Ok(ttl) = std::env::var("CRYPTMIRROR_ATTR_TTL_MS") {
            if let Ok(ms) = ttl.trim().parse::<u64>() {
                self.mount.attr_ttl_ms = ms;
            }
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.mount.fs_name.trim().is_empty() {
            return Err(Error::InvalidConfig(
                "Filesystem name must not be empty".to_string(),
            ));
        }

        if self.mount.allow_other && self.mount.allow_root {
            return Err(Error::InvalidConfig(
                "allow_other and allow_root are mutually exclusive".to_string(),
            ));
        }

        if self.mount.attr_ttl_ms == 0 {
            return Err(Error::InvalidConfig(
                "Attribute TTL must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_validate() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.mount.fs_name, DEFAULT_FS_NAME);
        assert_eq!(config.mount.ttl(), Duration::from_secs(1));
    }

    #[test]
    fn test_load_partial_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"mount": {"allow_root": true, "attr_ttl_ms": 250}}"#).unwrap();

        let config = Config::load(&path).unwrap();
        assert!(config.mount.allow_root);
        assert_eq!(config.mount.attr_ttl_ms, 250);
        assert_eq!(config.mount.fs_name, DEFAULT_FS_NAME);
    }

    #[test]
    fn test_load_rejects_garbage() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "not json").unwrap();

        assert!(matches!(Config::load(&path), Err(Error::Config(_))));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            Config::load(dir.path().join("absent.json")),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_validate_conflicting_access() {
        let mut config = Config::default();
        config.mount.allow_other = true;
        config.mount.allow_root = true;
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_validate_zero_ttl() {
        let mut config = Config::default();
        config.mount.attr_ttl_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_mount_options() {
        let mut config = Config::default();
        config.mount.allow_other = true;
        config.mount.auto_unmount = true;

        let options = config.mount.mount_options();
        assert!(options.contains(&fuser::MountOption::FSName(DEFAULT_FS_NAME.to_string())));
        assert!(options.contains(&fuser::MountOption::AllowOther));
        assert!(options.contains(&fuser::MountOption::AutoUnmount));
        assert!(!options.contains(&fuser::MountOption::AllowRoot));
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool(" 0 "), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }
}
