//! Runtime configuration using Figment.
//!
//! Configuration is loaded from:
//! 1. `config/drivers.toml` (base configuration)
//! 2. Environment variables prefixed with `SCRIPTED_DRIVERS_`, nested keys
//!    separated by `__` (e.g. `SCRIPTED_DRIVERS_APPLICATION__LOG_LEVEL=debug`)
//!
//! Every section has defaults, so an empty file is a valid configuration.
//!
//! # Example
//! ```no_run
//! use scripted_drivers::config::RuntimeConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RuntimeConfig::load()?;
//! config.validate()?;
//! println!("Module dirs: {:?}", config.modules.dirs);
//! # Ok(())
//! # }
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{DriverError, DriverResult};

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/drivers.toml";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Where modules live and which ones the host activates
    #[serde(default)]
    pub modules: ModulesConfig,
    /// Script sandbox and scheduling settings shared by every driver
    #[serde(default)]
    pub scripting: ScriptingConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
        }
    }
}

/// Module discovery and activation settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModulesConfig {
    /// Directories scanned by a discovery pass
    #[serde(default)]
    pub dirs: Vec<PathBuf>,
    /// Comma-separated input drivers to activate
    #[serde(default)]
    pub input: String,
    /// Comma-separated lights drivers to activate
    #[serde(default)]
    pub lights: String,
}

/// Script engine limits and worker cadence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptingConfig {
    /// File extension recognized as a module source (without the dot)
    #[serde(default = "default_extension")]
    pub extension: String,
    /// Maximum operations a single hook call may perform
    #[serde(default = "default_max_operations")]
    pub max_operations: u64,
    /// Maximum script call depth
    #[serde(default = "default_max_call_levels")]
    pub max_call_levels: usize,
    /// Worker sleep between `update` calls when a module declares none
    #[serde(default = "default_update_interval")]
    pub default_update_interval_ms: u64,
}

impl Default for ScriptingConfig {
    fn default() -> Self {
        Self {
            extension: default_extension(),
            max_operations: default_max_operations(),
            max_call_levels: default_max_call_levels(),
            default_update_interval_ms: default_update_interval(),
        }
    }
}

// Default value functions
fn default_name() -> String {
    "Scripted Drivers".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_extension() -> String {
    "rhai".to_string()
}

fn default_max_operations() -> u64 {
    100_000
}

fn default_max_call_levels() -> usize {
    64
}

fn default_update_interval() -> u64 {
    16
}

impl RuntimeConfig {
    /// Load configuration from `config/drivers.toml` and environment variables
    pub fn load() -> DriverResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    ///
    /// A missing file is not an error; defaults and environment apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> DriverResult<Self> {
        let config = Figment::from(Serialized::defaults(RuntimeConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("SCRIPTED_DRIVERS_").split("__"))
            .extract()?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> DriverResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(DriverError::Config(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        let ext = self.scripting.extension.trim_start_matches('.');
        if ext.is_empty() {
            return Err(DriverError::Config(
                "scripting.extension must not be empty".to_string(),
            ));
        }

        if self.scripting.max_operations == 0 {
            return Err(DriverError::Config(
                "scripting.max_operations must be greater than 0".to_string(),
            ));
        }

        if self.scripting.default_update_interval_ms == 0 {
            return Err(DriverError::Config(
                "scripting.default_update_interval_ms must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = RuntimeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.scripting.extension, "rhai");
        assert_eq!(config.scripting.max_operations, 100_000);
        assert_eq!(config.scripting.default_update_interval_ms, 16);
        assert!(config.modules.dirs.is_empty());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[application]
log_level = "debug"

[modules]
dirs = ["modules/input", "modules/lights"]
input = "Joystick1, Pad"

[scripting]
extension = "mod"
default_update_interval_ms = 5
"#
        )
        .unwrap();

        let config = RuntimeConfig::load_from(file.path()).unwrap();
        assert_eq!(config.application.log_level, "debug");
        assert_eq!(config.application.name, "Scripted Drivers");
        assert_eq!(config.modules.dirs.len(), 2);
        assert_eq!(config.modules.input, "Joystick1, Pad");
        assert_eq!(config.modules.lights, "");
        assert_eq!(config.scripting.extension, "mod");
        assert_eq!(config.scripting.default_update_interval_ms, 5);
        assert_eq!(config.scripting.max_operations, 100_000);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = RuntimeConfig::load_from("/nonexistent/drivers.toml").unwrap();
        assert_eq!(config.application.log_level, "info");
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = RuntimeConfig::default();
        config.application.log_level = "invalid".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_interval_rejected() {
        let mut config = RuntimeConfig::default();
        config.scripting.default_update_interval_ms = 0;
        assert!(matches!(config.validate(), Err(DriverError::Config(_))));
    }
}
