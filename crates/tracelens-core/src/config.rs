//! Configuration system for tracelens
//!
//! Provides:
//! - Config file discovery (CLI flag, env var, standard paths)
//! - TOML parsing with serde
//! - Environment variable overrides
//! - Validation of engine tunables

use crate::stats::STATS_AVG_WITH_QUANTILES;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),

    #[error("Config file not found: {0}")]
    NotFound(PathBuf),
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Default similarity threshold: a score below it means "similar"
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.3;

/// Default number of dominant operations compared per trace
pub const DEFAULT_TOP_OPERATIONS: usize = 4;

/// Complete configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TracelensConfig {
    /// General settings
    pub general: GeneralSettings,

    /// Trace similarity settings
    pub similarity: SimilaritySettings,

    /// Metrics stats settings
    pub stats: StatsSettings,

    /// Jaeger settings
    pub jaeger: JaegerSettings,
}

/// General settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralSettings {
    /// Log level: trace, debug, info, warn, error
    pub log_level: String,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// Trace similarity settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimilaritySettings {
    /// Score below which two traces are similar
    pub threshold: f64,

    /// Dominant operations compared per trace
    pub top_operations: usize,

    /// Similar traces listed in a comparison
    pub max_similar_listed: usize,
}

impl Default for SimilaritySettings {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_SIMILARITY_THRESHOLD,
            top_operations: DEFAULT_TOP_OPERATIONS,
            max_similar_listed: 10,
        }
    }
}

/// Metrics stats settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsSettings {
    /// Intervals, one heat-map column each
    pub intervals: Vec<String>,

    /// Quantiles requested from the backend
    pub quantiles: Vec<String>,
}

impl Default for StatsSettings {
    fn default() -> Self {
        Self {
            intervals: vec!["10m".to_string(), "60m".to_string(), "6h".to_string()],
            quantiles: vec!["0.5".to_string(), "0.9".to_string(), "0.99".to_string()],
        }
    }
}

/// Jaeger settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct JaegerSettings {
    /// Jaeger UI base URL, enables comparison links
    pub url: Option<String>,
}

/// Configuration loader
pub struct ConfigLoader {
    /// Path to config file (if specified via CLI)
    cli_path: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a new config loader
    pub fn new() -> Self {
        Self { cli_path: None }
    }

    /// Set the config path from CLI argument
    pub fn with_cli_path(mut self, path: Option<PathBuf>) -> Self {
        self.cli_path = path;
        self
    }

    /// Load configuration with the following precedence:
    /// 1. CLI --config flag
    /// 2. TRACELENS_CONFIG environment variable
    /// 3. ~/.config/tracelens/config.toml
    /// 4. /etc/tracelens/config.toml
    /// 5. Default values
    ///
    /// A file named by the CLI flag or `TRACELENS_CONFIG` must exist.
    pub fn load(&self) -> ConfigResult<TracelensConfig> {
        let config_path = self.find_config_file()?;

        let mut config = if let Some(path) = config_path {
            info!("Loading configuration from: {}", path.display());
            self.load_from_file(&path)?
        } else {
            debug!("No config file found, using defaults");
            TracelensConfig::default()
        };

        self.apply_env_overrides(&mut config);
        self.validate(&config)?;

        Ok(config)
    }

    /// Find the config file to use
    fn find_config_file(&self) -> ConfigResult<Option<PathBuf>> {
        let explicit = self
            .cli_path
            .clone()
            .or_else(|| std::env::var_os("TRACELENS_CONFIG").map(PathBuf::from));
        if let Some(path) = explicit {
            if path.exists() {
                return Ok(Some(path));
            }
            return Err(ConfigError::NotFound(path));
        }

        if let Some(path) = Self::default_config_path() {
            if path.exists() {
                return Ok(Some(path));
            }
        }

        #[cfg(unix)]
        {
            let path = PathBuf::from("/etc/tracelens/config.toml");
            if path.exists() {
                return Ok(Some(path));
            }
        }

        Ok(None)
    }

    /// Load configuration from a TOML file
    pub fn load_from_file(&self, path: &Path) -> ConfigResult<TracelensConfig> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)?;
        let config: TracelensConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&self, config: &mut TracelensConfig) {
        self.apply_overrides(config, |key| std::env::var(key).ok());
    }

    fn apply_overrides<F>(&self, config: &mut TracelensConfig, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(val) = lookup("TRACELENS_LOG_LEVEL") {
            config.general.log_level = val;
        }

        if let Some(val) = lookup("TRACELENS_JAEGER_URL") {
            config.jaeger.url = Some(val).filter(|u| !u.is_empty());
        }

        if let Some(val) = lookup("TRACELENS_SIMILARITY_THRESHOLD") {
            match val.parse() {
                Ok(threshold) => config.similarity.threshold = threshold,
                Err(_) => warn!("Ignoring invalid TRACELENS_SIMILARITY_THRESHOLD: {}", val),
            }
        }

        if let Some(val) = lookup("TRACELENS_INTERVALS") {
            config.stats.intervals = val
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
    }

    /// Validate configuration
    pub fn validate(&self, config: &TracelensConfig) -> ConfigResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&config.general.log_level.to_lowercase().as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log level: {}. Must be one of: {:?}",
                config.general.log_level, valid_levels
            )));
        }

        let threshold = config.similarity.threshold;
        if !threshold.is_finite() || threshold <= 0.0 {
            return Err(ConfigError::ValidationError(format!(
                "Similarity threshold must be a positive number, got {}",
                threshold
            )));
        }

        if config.similarity.top_operations == 0 {
            return Err(ConfigError::ValidationError(
                "top_operations must be at least 1".to_string(),
            ));
        }

        if config.stats.intervals.is_empty() {
            return Err(ConfigError::ValidationError(
                "At least one stats interval is required".to_string(),
            ));
        }

        for quantile in &config.stats.quantiles {
            if quantile == "avg" || !STATS_AVG_WITH_QUANTILES.contains(&quantile.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "Unsupported quantile: {}. Must be one of: {:?}",
                    quantile,
                    &STATS_AVG_WITH_QUANTILES[1..]
                )));
            }
        }

        Ok(())
    }

    /// Save configuration to a file
    pub fn save(&self, config: &TracelensConfig, path: &Path) -> ConfigResult<()> {
        let content = toml::to_string_pretty(config).map_err(|e| {
            ConfigError::ValidationError(format!("Failed to serialize config: {}", e))
        })?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, content)?;
        info!("Configuration saved to: {}", path.display());
        Ok(())
    }

    /// Get the default config file path for the current platform
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("tracelens").join("config.toml"))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Helper module for platform-specific directories
mod dirs {
    use std::path::PathBuf;

    /// Get the user's config directory
    pub fn config_dir() -> Option<PathBuf> {
        #[cfg(target_os = "macos")]
        {
            std::env::var("HOME")
                .ok()
                .map(|h| PathBuf::from(h).join(".config"))
        }

        #[cfg(target_os = "linux")]
        {
            std::env::var("XDG_CONFIG_HOME")
                .ok()
                .map(PathBuf::from)
                .or_else(|| {
                    std::env::var("HOME")
                        .ok()
                        .map(|h| PathBuf::from(h).join(".config"))
                })
        }

        #[cfg(target_os = "windows")]
        {
            std::env::var("APPDATA").ok().map(PathBuf::from)
        }

        #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
        {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = TracelensConfig::default();
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.similarity.threshold, 0.3);
        assert_eq!(config.similarity.top_operations, 4);
        assert_eq!(config.stats.intervals, vec!["10m", "60m", "6h"]);
        assert!(config.jaeger.url.is_none());
        assert!(ConfigLoader::new().validate(&config).is_ok());
    }

    #[test]
    fn test_parse_minimal_toml() {
        let toml_str = r#"
            [general]
            log_level = "debug"
        "#;
        let config: TracelensConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.general.log_level, "debug");
        // Other fields should be default
        assert_eq!(config.similarity.max_similar_listed, 10);
    }

    #[test]
    fn test_parse_full_toml() {
        let toml_str = r#"
            [general]
            log_level = "trace"

            [similarity]
            threshold = 0.25
            top_operations = 3
            max_similar_listed = 5

            [stats]
            intervals = ["1h", "1d"]
            quantiles = ["0.99"]

            [jaeger]
            url = "http://jaeger.istio-system:16686"
        "#;
        let config: TracelensConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.similarity.threshold, 0.25);
        assert_eq!(config.similarity.top_operations, 3);
        assert_eq!(config.stats.intervals, vec!["1h", "1d"]);
        assert_eq!(
            config.jaeger.url.as_deref(),
            Some("http://jaeger.istio-system:16686")
        );
        assert!(ConfigLoader::new().validate(&config).is_ok());
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("TRACELENS_LOG_LEVEL", "warn"),
            ("TRACELENS_JAEGER_URL", "http://localhost:16686"),
            ("TRACELENS_SIMILARITY_THRESHOLD", "0.5"),
            ("TRACELENS_INTERVALS", "5m, 1h,"),
        ]
        .into_iter()
        .collect();

        let mut config = TracelensConfig::default();
        ConfigLoader::new().apply_overrides(&mut config, |k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(config.general.log_level, "warn");
        assert_eq!(config.jaeger.url.as_deref(), Some("http://localhost:16686"));
        assert_eq!(config.similarity.threshold, 0.5);
        assert_eq!(config.stats.intervals, vec!["5m", "1h"]);
    }

    #[test]
    fn test_invalid_threshold_override_ignored() {
        let mut config = TracelensConfig::default();
        ConfigLoader::new().apply_overrides(&mut config, |k| {
            (k == "TRACELENS_SIMILARITY_THRESHOLD").then(|| "lots".to_string())
        });
        assert_eq!(config.similarity.threshold, 0.3);
    }

    #[test]
    fn test_validation_invalid_log_level() {
        let config = TracelensConfig {
            general: GeneralSettings {
                log_level: "loud".to_string(),
            },
            ..Default::default()
        };
        assert!(ConfigLoader::new().validate(&config).is_err());
    }

    #[test]
    fn test_validation_invalid_similarity() {
        let loader = ConfigLoader::new();
        let mut config = TracelensConfig::default();
        config.similarity.threshold = 0.0;
        assert!(loader.validate(&config).is_err());

        let mut config = TracelensConfig::default();
        config.similarity.top_operations = 0;
        assert!(loader.validate(&config).is_err());
    }

    #[test]
    fn test_validation_stats() {
        let loader = ConfigLoader::new();
        let mut config = TracelensConfig::default();
        config.stats.intervals.clear();
        assert!(loader.validate(&config).is_err());

        let mut config = TracelensConfig::default();
        config.stats.quantiles = vec!["0.75".to_string()];
        assert!(loader.validate(&config).is_err());

        config.stats.quantiles = vec!["avg".to_string()];
        assert!(loader.validate(&config).is_err());
    }

    #[test]
    fn test_save_and_load_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let loader = ConfigLoader::new();

        let mut config = TracelensConfig::default();
        config.similarity.threshold = 0.2;
        config.jaeger.url = Some("http://jaeger:16686".to_string());
        loader.save(&config, &path).unwrap();

        let loaded = loader.load_from_file(&path).unwrap();
        assert_eq!(loaded.similarity.threshold, 0.2);
        assert_eq!(loaded.jaeger.url.as_deref(), Some("http://jaeger:16686"));
    }

    #[test]
    fn test_load_from_missing_file() {
        let dir = tempdir().unwrap();
        let result = ConfigLoader::new().load_from_file(&dir.path().join("nope.toml"));
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_load_from_malformed_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[similarity\nthreshold = ").unwrap();
        let result = ConfigLoader::new().load_from_file(&path);
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_load_explicit_missing_path() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        let result = ConfigLoader::new().with_cli_path(Some(missing)).load();
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_load_explicit_invalid_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[similarity]\nthreshold = 0.0\n").unwrap();
        let result = ConfigLoader::new().with_cli_path(Some(path)).load();
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_serialize_config() {
        let config = TracelensConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[similarity]"));
        assert!(toml_str.contains("threshold"));
    }
}
