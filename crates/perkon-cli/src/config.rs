//! Configuration file support for the Perkon binary.
//!
//! Supports both YAML and TOML configuration files.
//!
//! # Example YAML configuration:
//! ```yaml
//! # Perkon configuration file
//!
//! server:
//!   port: 9000
//!   bind: "0.0.0.0"
//!   metrics_enabled: true
//!   metrics_port: 9090
//!   state_dir: /var/lib/perkon
//!
//! logging:
//!   level: info
//!
//! # Tuning knobs for the serving plane (cache TTLs, batch sizing,
//! # circuit breaker, drift thresholds). Omitted sections keep defaults.
//! plane:
//!   cache:
//!     max_entries: 10000
//! ```

use perkon_core::config::PlaneConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Serving-plane tuning (cache, batching, balancer, drift, monitoring)
    pub plane: Option<PlaneConfig>,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Control API port
    pub port: u16,

    /// Bind address
    pub bind: String,

    /// Enable Prometheus metrics endpoint
    pub metrics_enabled: bool,

    /// Metrics port
    pub metrics_port: u16,

    /// API key required on `/api/v1/` routes
    pub api_key: Option<String>,

    /// Directory for persistent state (registry and alert snapshots)
    pub state_dir: Option<PathBuf>,

    /// Base URL of the artifact service used to resolve model handles
    pub artifact_url: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 9000,
            bind: "127.0.0.1".to_string(),
            metrics_enabled: false,
            metrics_port: 9090,
            api_key: None,
            state_dir: None,
            artifact_url: None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Maximum log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a file (YAML or TOML, auto-detected by extension)
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e.to_string()))?;

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();

        match extension.as_str() {
            "yaml" | "yml" => Self::from_yaml(&content),
            "toml" => Self::from_toml(&content),
            _ => {
                // Try YAML first, then TOML
                Self::from_yaml(&content).or_else(|_| Self::from_toml(&content))
            }
        }
    }

    /// Parse configuration from YAML string
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Parse configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Merge another config into this one (other values take precedence if set)
    pub fn merge(&mut self, other: Config) {
        // Merge server config
        if other.server.port != ServerConfig::default().port {
            self.server.port = other.server.port;
        }
        if other.server.bind != ServerConfig::default().bind {
            self.server.bind = other.server.bind;
        }
        if other.server.metrics_enabled {
            self.server.metrics_enabled = true;
        }
        if other.server.metrics_port != ServerConfig::default().metrics_port {
            self.server.metrics_port = other.server.metrics_port;
        }
        if other.server.api_key.is_some() {
            self.server.api_key = other.server.api_key;
        }
        if other.server.state_dir.is_some() {
            self.server.state_dir = other.server.state_dir;
        }
        if other.server.artifact_url.is_some() {
            self.server.artifact_url = other.server.artifact_url;
        }

        // Merge logging config
        if other.logging.level != LoggingConfig::default().level {
            self.logging.level = other.logging.level;
        }

        // Replace the plane section wholesale if provided
        if other.plane.is_some() {
            self.plane = other.plane;
        }
    }

    /// Create an example configuration
    pub fn example() -> Self {
        Self {
            server: ServerConfig {
                port: 9000,
                bind: "0.0.0.0".to_string(),
                metrics_enabled: true,
                metrics_port: 9090,
                api_key: Some("your-api-key-here".to_string()),
                state_dir: Some(PathBuf::from("/var/lib/perkon")),
                artifact_url: Some("http://artifacts.internal/models".to_string()),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
            },
            plane: Some(PlaneConfig::default()),
        }
    }

    /// Generate example YAML configuration
    pub fn example_yaml() -> String {
        serde_yaml::to_string(&Self::example()).unwrap_or_default()
    }

    /// Generate example TOML configuration
    pub fn example_toml() -> String {
        toml::to_string_pretty(&Self::example()).unwrap_or_default()
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    IoError(PathBuf, String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.bind, "127.0.0.1");
        assert!(config.plane.is_none());
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r#"
server:
  port: 8080
  bind: "0.0.0.0"
  metrics_enabled: true
  state_dir: /var/lib/perkon
plane:
  cache:
    max_entries: 500
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.bind, "0.0.0.0");
        assert!(config.server.metrics_enabled);
        assert_eq!(
            config.server.state_dir,
            Some(PathBuf::from("/var/lib/perkon"))
        );
        let plane = config.plane.unwrap();
        assert_eq!(plane.cache.max_entries, 500);
        // Unspecified plane fields keep their defaults.
        assert_eq!(
            plane.balancer.error_rate_threshold,
            PlaneConfig::default().balancer.error_rate_threshold
        );
    }

    #[test]
    fn test_toml_parsing() {
        let toml = r#"
[server]
port = 8080
bind = "0.0.0.0"
metrics_enabled = true

[logging]
level = "debug"
"#;
        let config = Config::from_toml(toml).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.bind, "0.0.0.0");
        assert!(config.server.metrics_enabled);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_config_merge() {
        let mut base = Config::default();
        let override_config = Config {
            server: ServerConfig {
                port: 8888,
                api_key: Some("secret".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };

        base.merge(override_config);
        assert_eq!(base.server.port, 8888);
        assert_eq!(base.server.api_key, Some("secret".to_string()));
        assert_eq!(base.server.bind, "127.0.0.1");
    }

    #[test]
    fn test_example_roundtrips() {
        let yaml = Config::example_yaml();
        let from_yaml = Config::from_yaml(&yaml).unwrap();
        assert_eq!(from_yaml.server.port, 9000);
        assert!(from_yaml.plane.is_some());

        let toml = Config::example_toml();
        let from_toml = Config::from_toml(&toml).unwrap();
        assert_eq!(from_toml.server.metrics_port, 9090);
    }

    #[test]
    fn test_load_detects_extension() {
        let dir = tempfile::tempdir().unwrap();

        let yaml_path = dir.path().join("config.yaml");
        std::fs::write(&yaml_path, "server:\n  port: 7777\n").unwrap();
        let cfg = Config::load(&yaml_path).unwrap();
        assert_eq!(cfg.server.port, 7777);

        let toml_path = dir.path().join("config.toml");
        std::fs::write(&toml_path, "[server]\nport = 5555\n").unwrap();
        let cfg = Config::load(&toml_path).unwrap();
        assert_eq!(cfg.server.port, 5555);
    }

    #[test]
    fn test_load_unknown_extension_tries_both() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("perkon.conf");
        std::fs::write(&path, "server:\n  port: 4444\n").unwrap();
        let cfg = Config::load(&path).unwrap();
        assert_eq!(cfg.server.port, 4444);
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let err = Config::load("/nonexistent/perkon.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::IoError(_, _)));
    }
}
