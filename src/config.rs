//! Configuration loading and persistence.
//!
//! Holds the knobs recognized by the Configuration surface: listen port,
//! device name, test mode, and the data directory that roots the persisted
//! document store. The identity's private key never lives here — it is
//! filesystem-permission-protected inside the Identity document under
//! `data_dir`, not in this struct.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::{fs, path::PathBuf};

/// Default listen port for the byte-stream transport.
pub const DEFAULT_PORT: u16 = 7878;
const APP_NAME: &str = "osm-core";

/// Configuration for the OSM core process.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Config {
    /// Listen port for the byte-stream transport (1-65535).
    pub port: u16,
    /// Device name shown to the user and advertised on the device-info channel.
    pub device_name: String,
    /// Skips network start and auto-generates an identity if missing.
    #[serde(default)]
    pub test_mode: bool,
    /// Root of the persisted-document filesystem substitution.
    pub data_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = if is_any_test() {
            PathBuf::from(env!("CARGO_MANIFEST_DIR"))
                .parent()
                .map(|p| p.join("tmp/osm-core-data"))
                .unwrap_or_else(|| PathBuf::from("tmp/osm-core-data"))
        } else {
            dirs::data_dir()
                .map(|d| d.join(APP_NAME))
                .unwrap_or_else(|| PathBuf::from("osm-core-data"))
        };

        Self {
            port: DEFAULT_PORT,
            device_name: "OSM Device".to_string(),
            test_mode: false,
            data_dir,
        }
    }
}

impl Config {
    /// Returns the configuration directory path, creating it if necessary.
    ///
    /// Directory selection priority:
    /// 1. `#[cfg(test)]` (unit tests): `tmp/osm-core-test`
    /// 2. `OSM_CONFIG_DIR` env var: explicit override
    /// 3. `OSM_ENV=test`: `tmp/osm-core-test` (integration tests)
    /// 4. Default: platform config dir
    pub fn config_dir() -> Result<PathBuf> {
        let dir = {
            #[cfg(test)]
            {
                PathBuf::from(env!("CARGO_MANIFEST_DIR"))
                    .parent()
                    .context("crate root has no parent directory")?
                    .join("tmp/osm-core-test")
            }

            #[cfg(not(test))]
            {
                if let Ok(dir) = std::env::var("OSM_CONFIG_DIR") {
                    PathBuf::from(dir)
                } else if is_any_test() {
                    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
                        .parent()
                        .context("crate root has no parent directory")?
                        .join("tmp/osm-core-test")
                } else {
                    dirs::config_dir()
                        .context("could not determine config directory")?
                        .join(APP_NAME)
                }
            }
        };
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Loads configuration from file, applying environment variable
    /// overrides on top. Falls back to defaults if no file exists yet.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from_file().unwrap_or_else(|_| Self::default());
        config.apply_env_overrides();
        Ok(config)
    }

    fn load_from_file() -> Result<Self> {
        let config_path = Self::config_dir()?.join("config.json");
        if config_path.exists() {
            let content = fs::read_to_string(&config_path)?;
            Ok(serde_json::from_str(&content)?)
        } else {
            anyhow::bail!("config file not found")
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(port) = std::env::var("OSM_PORT") {
            if let Ok(port) = port.parse::<u16>() {
                self.port = port;
            }
        }

        if let Ok(name) = std::env::var("OSM_DEVICE_NAME") {
            self.device_name = name;
        }

        if let Ok(test_mode) = std::env::var("OSM_TEST_MODE") {
            self.test_mode = test_mode == "1" || test_mode.eq_ignore_ascii_case("true");
        }

        if let Ok(data_dir) = std::env::var("OSM_DATA_DIR") {
            self.data_dir = PathBuf::from(data_dir);
        }
    }

    /// Persists the current configuration to disk with owner-only permissions.
    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_dir()?.join("config.json");
        fs::write(&config_path, serde_json::to_string_pretty(self)?)?;

        #[cfg(unix)]
        fs::set_permissions(&config_path, fs::Permissions::from_mode(0o600))?;

        Ok(())
    }
}

/// Whether the process is running under any test environment
/// (`OSM_ENV=test` or `OSM_ENV=system_test`).
#[cfg(not(test))]
fn is_any_test() -> bool {
    matches!(std::env::var("OSM_ENV").as_deref(), Ok("test") | Ok("system_test"))
}

#[cfg(test)]
fn is_any_test() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let config = Config::default();
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.device_name, "OSM Device");
        assert!(!config.test_mode);
    }

    #[test]
    fn env_override_port() {
        std::env::set_var("OSM_PORT", "9001");
        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config.port, 9001);
        std::env::remove_var("OSM_PORT");
    }

    #[test]
    fn env_override_test_mode() {
        std::env::set_var("OSM_TEST_MODE", "true");
        let mut config = Config::default();
        config.apply_env_overrides();
        assert!(config.test_mode);
        std::env::remove_var("OSM_TEST_MODE");
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var("OSM_CONFIG_DIR", dir.path());

        let mut config = Config::default();
        config.device_name = "Test Device".to_string();
        config.save().unwrap();

        let loaded = Config::load().unwrap();
        assert_eq!(loaded.device_name, "Test Device");

        std::env::remove_var("OSM_CONFIG_DIR");
    }
}
