//! Configuration for the php-fpm exporter.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::schema::{DEFAULT_NAMESPACE, is_valid_namespace};
use crate::target::{Target, TargetError, TransportKind};

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] json5::Error),
    #[error("Invalid target: {0}")]
    Target(#[from] TargetError),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Complete exporter configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExporterConfig {
    /// php-fpm status endpoint.
    #[serde(default)]
    pub target: TargetConfig,

    /// Prometheus exporter settings.
    #[serde(default)]
    pub prometheus: PrometheusConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// php-fpm status endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Transport: "tcp" or "unix" (default: "tcp").
    #[serde(default)]
    pub scheme: TransportKind,

    /// `host:port` for TCP, socket path for Unix (default: "127.0.0.1:9000").
    #[serde(default = "default_address")]
    pub address: String,

    /// Status page path, `pm.status_path` in the pool (default: "/fpm_status").
    #[serde(default = "default_status_path")]
    pub path: String,

    /// Dial and request timeout in milliseconds (default: 3000).
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_address() -> String {
    "127.0.0.1:9000".to_string()
}

fn default_status_path() -> String {
    "/fpm_status".to_string()
}

fn default_timeout_ms() -> u64 {
    3000
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            scheme: TransportKind::default(),
            address: default_address(),
            path: default_status_path(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl TargetConfig {
    /// Build the target descriptor.
    pub fn to_target(&self) -> Result<Target, TargetError> {
        Target::new(
            self.scheme,
            self.address.clone(),
            self.path.clone(),
            Duration::from_millis(self.timeout_ms),
        )
    }
}

/// Prometheus HTTP endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrometheusConfig {
    /// Address to listen on (default: "0.0.0.0:9005").
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Path for metrics endpoint (default: "/metrics").
    #[serde(default = "default_path")]
    pub path: String,

    /// Metric name prefix (default: "phpfpm").
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

fn default_listen() -> String {
    "0.0.0.0:9005".to_string()
}

fn default_path() -> String {
    "/metrics".to_string()
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            path: default_path(),
            namespace: default_namespace(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log output format: "text" or "json".
    #[serde(default)]
    pub format: LogFormat,

    /// Write daily rotated log files here instead of stdout.
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

fn default_log_level() -> String {
    "error".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            directory: None,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl ExporterConfig {
    /// Load configuration from a JSON5 file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: ExporterConfig = json5::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a JSON5 string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: ExporterConfig = json5::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.target.to_target()?;

        if self
            .prometheus
            .listen
            .parse::<std::net::SocketAddr>()
            .is_err()
        {
            return Err(ConfigError::Validation(format!(
                "Invalid listen address: {}",
                self.prometheus.listen
            )));
        }

        if !self.prometheus.path.starts_with('/') {
            return Err(ConfigError::Validation(
                "Metrics path must start with /".to_string(),
            ));
        }

        let namespace = &self.prometheus.namespace;
        if !is_valid_namespace(namespace) {
            return Err(ConfigError::Validation(format!(
                "Invalid namespace: {:?}",
                namespace
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_config() {
        let json = "{}";
        let config = ExporterConfig::parse(json).unwrap();

        assert_eq!(config.target.scheme, TransportKind::Tcp);
        assert_eq!(config.target.address, "127.0.0.1:9000");
        assert_eq!(config.target.path, "/fpm_status");
        assert_eq!(config.target.timeout_ms, 3000);
        assert_eq!(config.prometheus.listen, "0.0.0.0:9005");
        assert_eq!(config.prometheus.path, "/metrics");
        assert_eq!(config.prometheus.namespace, "phpfpm");
        assert_eq!(config.logging.level, "error");
        assert!(config.logging.directory.is_none());
    }

    #[test]
    fn test_parse_full_config() {
        let json = r#"{
            target: {
                scheme: "unix",
                address: "/run/php/php8.2-fpm.sock",
                path: "/status",
                timeout_ms: 1500
            },
            prometheus: {
                listen: "127.0.0.1:9253",
                path: "/prometheus/metrics",
                namespace: "php_fpm"
            },
            logging: {
                level: "debug",
                format: "json",
                directory: "/var/log/fpmsight"
            }
        }"#;

        let config = ExporterConfig::parse(json).unwrap();

        assert_eq!(config.target.scheme, TransportKind::Unix);
        assert_eq!(config.target.address, "/run/php/php8.2-fpm.sock");
        assert_eq!(config.target.path, "/status");
        assert_eq!(config.prometheus.listen, "127.0.0.1:9253");
        assert_eq!(config.prometheus.path, "/prometheus/metrics");
        assert_eq!(config.prometheus.namespace, "php_fpm");
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(
            config.logging.directory,
            Some(PathBuf::from("/var/log/fpmsight"))
        );

        let target = config.target.to_target().unwrap();
        assert_eq!(target.timeout(), Duration::from_millis(1500));
    }

    #[test]
    fn test_validate_zero_timeout() {
        let json = r#"{
            target: { timeout_ms: 0 }
        }"#;

        let result = ExporterConfig::parse(json);
        assert!(matches!(
            result,
            Err(ConfigError::Target(TargetError::ZeroTimeout))
        ));
    }

    #[test]
    fn test_validate_unknown_scheme() {
        let json = r#"{
            target: { scheme: "udp" }
        }"#;

        assert!(matches!(
            ExporterConfig::parse(json),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_validate_invalid_listen() {
        let json = r#"{
            prometheus: { listen: "not-an-address" }
        }"#;

        let result = ExporterConfig::parse(json);
        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Invalid listen address")
        );
    }

    #[test]
    fn test_validate_invalid_path() {
        let json = r#"{
            prometheus: { path: "no-leading-slash" }
        }"#;

        let result = ExporterConfig::parse(json);
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("must start with /")
        );
    }

    #[test]
    fn test_validate_invalid_namespace() {
        for namespace in ["", "php-fpm", "9fpm"] {
            let json = format!(r#"{{ prometheus: {{ namespace: "{}" }} }}"#, namespace);
            let result = ExporterConfig::parse(&json);
            assert!(
                matches!(result, Err(ConfigError::Validation(_))),
                "namespace {:?} should be rejected",
                namespace
            );
        }
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exporter.json5");
        std::fs::write(
            &path,
            "// php-fpm exporter\n{ target: { address: \"10.0.0.5:9000\" } }\n",
        )
        .unwrap();

        let config = ExporterConfig::load_from_file(&path).unwrap();
        assert_eq!(config.target.address, "10.0.0.5:9000");

        assert!(matches!(
            ExporterConfig::load_from_file(dir.path().join("missing.json5")),
            Err(ConfigError::Io(_))
        ));
    }
}
