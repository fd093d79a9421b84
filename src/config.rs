//! Configuration loading and defaults for keepwaked.
//!
//! Only static settings live here. Mode, window and armed state always
//! start from scratch and are never written back.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use anyhow::Result;
use serde::Deserialize;
use serde::Serialize;
use tracing::warn;

/// Bounds for the schedule tick. Corrections must land well under a minute.
const MIN_TICK_SECONDS: u64 = 1;
const MAX_TICK_SECONDS: u64 = 30;

/// Main configuration for keepwaked.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Seconds between schedule re-evaluations (default: 1).
    pub tick_interval_seconds: u64,

    /// Dry run mode: log power requests instead of taking inhibitor locks.
    pub dry_run: bool,

    /// Arm idle prevention as soon as the daemon starts (default: false).
    pub arm_on_start: bool,

    /// Application name reported to logind.
    pub inhibit_who: String,

    /// Reason reported to logind while armed.
    pub inhibit_why: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tick_interval_seconds: 1,
            dry_run: false,
            arm_on_start: false,
            inhibit_who: "keepwaked".to_string(),
            inhibit_why: "Idle prevention armed".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Load configuration from the default path, or return defaults if not found.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(p) = path {
            return Self::load(p);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let default_path = config_dir.join("keepwaked").join("config.toml");
            if default_path.exists() {
                return Self::load(&default_path);
            }
        }

        Ok(Self::default())
    }

    /// Tick interval, clamped to the supported range.
    pub fn tick_interval(&self) -> Duration {
        let seconds = self
            .tick_interval_seconds
            .clamp(MIN_TICK_SECONDS, MAX_TICK_SECONDS);
        if seconds != self.tick_interval_seconds {
            warn!(
                "tick_interval_seconds={} out of range, using {}",
                self.tick_interval_seconds, seconds
            );
        }
        Duration::from_secs(seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.tick_interval_seconds, 1);
        assert!(!config.dry_run);
        assert!(!config.arm_on_start);
        assert_eq!(config.inhibit_who, "keepwaked");
    }

    #[test]
    fn test_parse_toml() {
        let toml_str = r#"
            tick_interval_seconds = 5
            dry_run = true
            inhibit_why = "Presenting"
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.tick_interval_seconds, 5);
        assert!(config.dry_run);
        assert_eq!(config.inhibit_why, "Presenting");
        // Unset fields keep their defaults
        assert!(!config.arm_on_start);
        assert_eq!(config.inhibit_who, "keepwaked");
    }

    #[test]
    fn test_tick_interval_clamped() {
        let mut config = Config::default();
        assert_eq!(config.tick_interval(), Duration::from_secs(1));

        config.tick_interval_seconds = 0;
        assert_eq!(config.tick_interval(), Duration::from_secs(1));

        config.tick_interval_seconds = 300;
        assert_eq!(config.tick_interval(), Duration::from_secs(30));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "arm_on_start = true").unwrap();

        let config = Config::load_or_default(Some(file.path())).unwrap();
        assert!(config.arm_on_start);
        assert_eq!(config.tick_interval_seconds, 1);
    }

    #[test]
    fn test_load_rejects_invalid_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "tick_interval_seconds = \"fast\"").unwrap();

        let err = Config::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }

    #[test]
    fn test_load_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(Config::load_or_default(Some(&missing)).is_err());
    }
}
