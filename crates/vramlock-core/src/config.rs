//! Session configuration.
//!
//! Loads [`LockConfig`] from a TOML file with environment variable overrides
//! via `VRAMLOCK_*` prefixed variables. Command-line arguments are applied on
//! top by the binary.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::report::MAP_COLUMNS;

/// Default slice size in MiB.
pub const DEFAULT_SLICE_MIB: u32 = 512;

const MAX_MAP_COLUMNS: usize = 1024;
const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error", "off"];

/// Device-memory API to test through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Cuda,
    Vulkan,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cuda => write!(f, "cuda"),
            Self::Vulkan => write!(f, "vulkan"),
        }
    }
}

impl std::str::FromStr for BackendKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cuda" => Ok(Self::Cuda),
            "vulkan" | "vk" => Ok(Self::Vulkan),
            other => Err(format!("unknown backend: {other} (expected cuda or vulkan)")),
        }
    }
}

/// Everything a session needs to know before it starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LockConfig {
    /// Backend to use; `None` picks the first one compiled in.
    /// Override: `VRAMLOCK_BACKEND`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<BackendKind>,

    /// Zero-based device index.
    /// Override: `VRAMLOCK_DEVICE_INDEX`
    pub device_index: u32,

    /// Size of every slice, in MiB.
    /// Override: `VRAMLOCK_SLICE_MIB`
    pub slice_mib: u32,

    /// Glyphs per row of the slice map.
    /// Override: `VRAMLOCK_MAP_COLUMNS`
    pub map_columns: usize,

    /// Default log filter when `RUST_LOG` is unset.
    /// Override: `VRAMLOCK_LOG_LEVEL`
    pub log_level: String,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            backend: None,
            device_index: 0,
            slice_mib: DEFAULT_SLICE_MIB,
            map_columns: MAP_COLUMNS,
            log_level: "warn".to_string(),
        }
    }
}

/// Errors that can occur when loading or validating a [`LockConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("invalid environment override {key}={value}: {reason}")]
    EnvOverride { key: String, value: String, reason: String },
}

impl LockConfig {
    /// Defaults, then the TOML file at `path` (if any), then `VRAMLOCK_*`
    /// overrides.
    ///
    /// Nothing is validated here: a later layer such as the command line may
    /// still replace an out-of-range value, so callers run [`validate`] once
    /// every layer has been applied.
    ///
    /// [`validate`]: LockConfig::validate
    pub fn layered(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut cfg = match path {
            Some(path) => Self::parse_toml(&std::fs::read_to_string(path)?)?,
            None => Self::default(),
        };
        cfg.apply_env_overrides()?;
        Ok(cfg)
    }

    fn parse_toml(toml_str: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Slice size in bytes (`slice_mib` × 1024 × 1024).
    pub fn slice_bytes(&self) -> usize {
        self.slice_mib as usize * 1024 * 1024
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.slice_mib == 0 {
            return Err(ConfigError::Validation("slice_mib must be > 0".into()));
        }
        if (self.slice_mib as usize).checked_mul(1024 * 1024).is_none() {
            return Err(ConfigError::Validation(format!(
                "slice_mib {} does not fit in this platform's address space",
                self.slice_mib
            )));
        }
        if self.map_columns == 0 || self.map_columns > MAX_MAP_COLUMNS {
            return Err(ConfigError::Validation(format!(
                "map_columns must be in 1..={MAX_MAP_COLUMNS}, got {}",
                self.map_columns
            )));
        }
        if !LOG_LEVELS.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(ConfigError::Validation(format!(
                "log_level must be one of {}, got {:?}",
                LOG_LEVELS.join(", "),
                self.log_level
            )));
        }
        Ok(())
    }

    /// Apply `VRAMLOCK_*` environment variable overrides.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(val) = std::env::var("VRAMLOCK_BACKEND") {
            let kind = val
                .parse::<BackendKind>()
                .map_err(|reason| env_error("VRAMLOCK_BACKEND", &val, reason))?;
            self.backend = Some(kind);
        }

        if let Ok(val) = std::env::var("VRAMLOCK_DEVICE_INDEX") {
            self.device_index = val
                .parse::<u32>()
                .map_err(|e| env_error("VRAMLOCK_DEVICE_INDEX", &val, e.to_string()))?;
        }

        if let Ok(val) = std::env::var("VRAMLOCK_SLICE_MIB") {
            self.slice_mib = val
                .parse::<u32>()
                .map_err(|e| env_error("VRAMLOCK_SLICE_MIB", &val, e.to_string()))?;
        }

        if let Ok(val) = std::env::var("VRAMLOCK_MAP_COLUMNS") {
            self.map_columns = val
                .parse::<usize>()
                .map_err(|e| env_error("VRAMLOCK_MAP_COLUMNS", &val, e.to_string()))?;
        }

        if let Ok(val) = std::env::var("VRAMLOCK_LOG_LEVEL") {
            self.log_level = val;
        }

        Ok(())
    }
}

fn env_error(key: &str, value: &str, reason: String) -> ConfigError {
    ConfigError::EnvOverride { key: key.into(), value: value.into(), reason }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const ENV_KEYS: [&str; 5] = [
        "VRAMLOCK_BACKEND",
        "VRAMLOCK_DEVICE_INDEX",
        "VRAMLOCK_SLICE_MIB",
        "VRAMLOCK_MAP_COLUMNS",
        "VRAMLOCK_LOG_LEVEL",
    ];

    fn with_env<R>(vars: &[(&str, &str)], f: impl FnOnce() -> R) -> R {
        let all: Vec<(&str, Option<&str>)> = ENV_KEYS
            .iter()
            .map(|k| (*k, vars.iter().find(|(n, _)| n == k).map(|(_, v)| *v)))
            .collect();
        temp_env::with_vars(all, f)
    }

    fn load_str(contents: &str) -> Result<LockConfig, ConfigError> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vram-lock.toml");
        std::fs::write(&path, contents).unwrap();
        with_env(&[], || LockConfig::layered(Some(&path)))
    }

    #[test]
    fn test_default_config_is_valid() {
        let cfg = LockConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.slice_bytes(), 512 * 1024 * 1024);
    }

    #[test]
    #[serial(vramlock_env)]
    fn test_default_toml_round_trips() {
        let toml_str = toml::to_string_pretty(&LockConfig::default()).unwrap();
        assert_eq!(load_str(&toml_str).unwrap(), LockConfig::default());
    }

    #[test]
    #[serial(vramlock_env)]
    fn test_no_file_means_defaults() {
        let cfg = with_env(&[], || LockConfig::layered(None)).unwrap();
        assert_eq!(cfg, LockConfig::default());
    }

    #[test]
    #[serial(vramlock_env)]
    fn test_partial_toml_keeps_defaults() {
        let cfg = load_str("backend = \"vulkan\"\nslice_mib = 256\n").unwrap();
        assert_eq!(cfg.backend, Some(BackendKind::Vulkan));
        assert_eq!(cfg.slice_mib, 256);
        assert_eq!(cfg.device_index, 0);
        assert_eq!(cfg.map_columns, MAP_COLUMNS);
    }

    #[test]
    #[serial(vramlock_env)]
    fn test_unknown_field_is_rejected() {
        let err = load_str("fill_byte = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    #[serial(vramlock_env)]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let err = with_env(&[], || LockConfig::layered(Some(&path))).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    #[serial(vramlock_env)]
    fn test_layering_does_not_validate() {
        // A later layer may still fix this value.
        let cfg = load_str("slice_mib = 0\nmap_columns = 0\n").unwrap();
        assert_eq!(cfg.slice_mib, 0);
        assert!(cfg.validate().is_err());
    }

    #[test]
    #[serial(vramlock_env)]
    fn test_env_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vram-lock.toml");
        std::fs::write(&path, "device_index = 2\nmap_columns = 32\n").unwrap();
        let cfg = with_env(&[("VRAMLOCK_DEVICE_INDEX", "5")], || LockConfig::layered(Some(&path)))
            .unwrap();
        assert_eq!(cfg.device_index, 5);
        assert_eq!(cfg.map_columns, 32);
    }

    #[test]
    fn test_validation_zero_slice() {
        let cfg = LockConfig { slice_mib: 0, ..LockConfig::default() };
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("slice_mib must be > 0"));
    }

    #[test]
    fn test_validation_map_columns() {
        let cfg = LockConfig { map_columns: 0, ..LockConfig::default() };
        assert!(cfg.validate().is_err());
        let cfg = LockConfig { map_columns: 2048, ..LockConfig::default() };
        assert!(cfg.validate().unwrap_err().to_string().contains("1..=1024"));
    }

    #[test]
    fn test_validation_log_level() {
        let cfg = LockConfig { log_level: "loud".into(), ..LockConfig::default() };
        assert!(cfg.validate().unwrap_err().to_string().contains("log_level"));
    }

    #[test]
    #[serial(vramlock_env)]
    fn test_env_override_multiple_fields() {
        let cfg = with_env(
            &[
                ("VRAMLOCK_BACKEND", "vulkan"),
                ("VRAMLOCK_DEVICE_INDEX", "3"),
                ("VRAMLOCK_SLICE_MIB", "128"),
                ("VRAMLOCK_MAP_COLUMNS", "80"),
                ("VRAMLOCK_LOG_LEVEL", "debug"),
            ],
            || LockConfig::layered(None),
        )
        .unwrap();
        assert_eq!(cfg.backend, Some(BackendKind::Vulkan));
        assert_eq!(cfg.device_index, 3);
        assert_eq!(cfg.slice_mib, 128);
        assert_eq!(cfg.map_columns, 80);
        assert_eq!(cfg.log_level, "debug");
    }

    #[test]
    #[serial(vramlock_env)]
    fn test_env_override_invalid_value() {
        let err = with_env(&[("VRAMLOCK_SLICE_MIB", "lots")], || LockConfig::layered(None))
            .unwrap_err();
        assert!(matches!(err, ConfigError::EnvOverride { ref key, .. } if key == "VRAMLOCK_SLICE_MIB"));
    }

    #[test]
    fn test_backend_kind_parse() {
        assert_eq!("CUDA".parse::<BackendKind>(), Ok(BackendKind::Cuda));
        assert_eq!("vk".parse::<BackendKind>(), Ok(BackendKind::Vulkan));
        assert!("metal".parse::<BackendKind>().is_err());
    }
}
