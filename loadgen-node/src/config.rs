use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Main configuration for the load generation node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadbeatConfig {
    /// Platform-wide configuration
    pub platform: PlatformConfig,
    /// Load generation engine settings
    pub engine: EngineConfig,
    /// Operational metrics export
    pub metrics: MetricsConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
    /// Management API configuration
    pub management: ManagementApiConfig,
}

/// Platform-wide configuration and feature toggles
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformConfig {
    /// Deployment environment (development, staging, production)
    pub environment: String,
    /// Unique deployment identifier
    pub deployment_id: String,
    /// Enabled platform features
    pub features: Vec<String>,
}

/// Load generation engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Tick period of the generator control loop in milliseconds
    pub tick_interval_ms: u64,
    /// Grace period for draining in-flight requests on stop, in seconds
    pub drain_grace_period_seconds: u64,
    /// Raw latency samples retained per run
    pub sample_capacity: usize,
    /// Time-series points retained per run
    pub time_series_capacity: usize,
    /// Outbound buffer size per hub observer
    pub observer_buffer_size: usize,
}

impl EngineConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn drain_grace(&self) -> Duration {
        Duration::from_secs(self.drain_grace_period_seconds)
    }
}

/// Metrics export configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable the Prometheus exporter
    pub enabled: bool,
    /// Exporter listen address
    pub listen_addr: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (json, text)
    pub format: Option<String>,
}

/// Management API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagementApiConfig {
    /// Enable the management API
    pub enabled: bool,
    /// Listen address for the management API
    pub listen_addr: String,
    /// Bearer token; when set, all routes require it
    pub auth_token: Option<String>,
    /// Enable permissive CORS
    pub cors_enabled: bool,
}

impl LoadbeatConfig {
    /// Check if a feature is enabled
    pub fn has_feature(&self, feature: &str) -> bool {
        self.platform.features.contains(&feature.to_string())
    }

    /// Check if metrics export is enabled
    pub fn metrics_enabled(&self) -> bool {
        self.has_feature("metrics") && self.metrics.enabled
    }

    /// Check if the management API is enabled
    pub fn management_enabled(&self) -> bool {
        self.has_feature("management_api") && self.management.enabled
    }

    /// Load configuration from file with `LOADBEAT_` environment overrides
    pub fn from_file(path: &str) -> Result<Self, config::ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("LOADBEAT").separator("__"))
            .build()?;

        settings.try_deserialize()
    }

    /// Save configuration to file
    #[allow(dead_code)]
    pub fn save_to_file(&self, path: &str) -> Result<(), Box<dyn std::error::Error>> {
        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.engine.tick_interval_ms == 0 {
            return Err("engine.tick_interval_ms cannot be 0".to_string());
        }
        if self.engine.drain_grace_period_seconds == 0 {
            return Err("engine.drain_grace_period_seconds cannot be 0".to_string());
        }
        if self.engine.sample_capacity == 0 {
            return Err("engine.sample_capacity cannot be 0".to_string());
        }
        if self.engine.time_series_capacity == 0 {
            return Err("engine.time_series_capacity cannot be 0".to_string());
        }
        if self.engine.observer_buffer_size == 0 {
            return Err("engine.observer_buffer_size cannot be 0".to_string());
        }

        if self.management_enabled() && self.management.listen_addr.parse::<SocketAddr>().is_err() {
            return Err(format!(
                "management.listen_addr '{}' is not a valid socket address",
                self.management.listen_addr
            ));
        }
        if self.metrics_enabled() && self.metrics.listen_addr.parse::<SocketAddr>().is_err() {
            return Err(format!(
                "metrics.listen_addr '{}' is not a valid socket address",
                self.metrics.listen_addr
            ));
        }

        Ok(())
    }
}

impl Default for LoadbeatConfig {
    fn default() -> Self {
        Self {
            platform: PlatformConfig {
                environment: "development".to_string(),
                deployment_id: "loadbeat-dev-local".to_string(),
                features: vec![
                    "metrics".to_string(),
                    "management_api".to_string(),
                ],
            },
            engine: EngineConfig {
                tick_interval_ms: 1_000,
                drain_grace_period_seconds: 5,
                sample_capacity: 10_000,
                time_series_capacity: 3_600,
                observer_buffer_size: 64,
            },
            metrics: MetricsConfig {
                enabled: true,
                listen_addr: "127.0.0.1:9090".to_string(),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: Some("text".to_string()),
            },
            management: ManagementApiConfig {
                enabled: true,
                listen_addr: "127.0.0.1:8080".to_string(),
                auth_token: None,
                cors_enabled: true,
            },
        }
    }
}
