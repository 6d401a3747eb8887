/*!
 * Configuration management for LabFlow.
 *
 * This module loads, validates and exposes the settings consumed by the
 * device layer. Sources are layered as defaults < environment < file <
 * explicit override; the device layer only ever sees the resolved value.
 */
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use config::{Config as ConfigLib, Environment, File};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Resolved configuration for LabFlow
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Port discovery configuration
    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// Per-device configuration
    #[serde(default)]
    pub devices: DevicesConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Port discovery configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Baud rate used for probing and for registered devices
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// Per-probe response timeout in milliseconds
    #[serde(default = "default_discovery_timeout_ms")]
    pub timeout_ms: u64,

    /// Ports probed in addition to the explicit or enumerated ones
    #[serde(default)]
    pub extra_ports: Vec<String>,
}

/// Per-device configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DevicesConfig {
    /// Densitometer configuration
    #[serde(default)]
    pub densitometer: DensitometerConfig,
}

/// Densitometer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DensitometerConfig {
    /// Settling delay between starting a measurement and reading it, in milliseconds
    #[serde(default = "default_measurement_delay_ms")]
    pub measurement_delay_ms: u64,

    /// Deadline for value responses, in milliseconds
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to use JSON format for logs
    #[serde(default)]
    pub json_format: bool,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            baud_rate: default_baud_rate(),
            timeout_ms: default_discovery_timeout_ms(),
            extra_ports: Vec::new(),
        }
    }
}

impl Default for DensitometerConfig {
    fn default() -> Self {
        Self {
            measurement_delay_ms: default_measurement_delay_ms(),
            response_timeout_ms: default_response_timeout_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
        }
    }
}

impl DiscoveryConfig {
    /// Per-probe response timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl DensitometerConfig {
    /// Settling delay for optical density measurements
    pub fn measurement_delay(&self) -> Duration {
        Duration::from_millis(self.measurement_delay_ms)
    }

    /// Deadline for value responses
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }
}

impl Config {
    /// Check that the resolved values are usable
    pub fn validate(&self) -> Result<()> {
        if self.discovery.baud_rate == 0 {
            return Err(Error::config("discovery.baud_rate must be greater than zero"));
        }
        if self.discovery.timeout_ms == 0 {
            return Err(Error::config("discovery.timeout_ms must be greater than zero"));
        }
        if self.devices.densitometer.response_timeout_ms == 0 {
            return Err(Error::config(
                "devices.densitometer.response_timeout_ms must be greater than zero",
            ));
        }
        Ok(())
    }
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_discovery_timeout_ms() -> u64 {
    1000
}

fn default_measurement_delay_ms() -> u64 {
    2000
}

fn default_response_timeout_ms() -> u64 {
    2000
}

fn default_log_level() -> String {
    "info".to_string()
}

/// A builder for creating a configuration
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config_file: Option<String>,
    environment_prefix: Option<String>,
    override_with: Option<Config>,
}

impl ConfigBuilder {
    /// Create a new ConfigBuilder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the config file path (TOML or YAML, picked by extension)
    pub fn with_config_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_file = Some(path.as_ref().to_string_lossy().to_string());
        self
    }

    /// Set the environment variable prefix for configuration
    ///
    /// Keys are separated by `__`, e.g. `LABFLOW__DISCOVERY__BAUD_RATE`.
    /// `discovery.extra_ports` accepts a comma-separated list.
    pub fn with_environment_prefix<S: AsRef<str>>(mut self, prefix: S) -> Self {
        self.environment_prefix = Some(prefix.as_ref().to_string());
        self
    }

    /// Override with an existing config
    pub fn override_with(mut self, config: Config) -> Self {
        self.override_with = Some(config);
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<Config> {
        if let Some(config) = self.override_with {
            debug!("Using explicitly provided configuration");
            config.validate()?;
            return Ok(config);
        }

        let default_config = Config::default();
        let mut config_builder = ConfigLib::builder().add_source(
            ConfigLib::try_from(&default_config)
                .map_err(|e| Error::config(format!("Failed to create default config: {}", e)))?,
        );

        // Environment sits below the file
        if let Some(prefix) = self.environment_prefix {
            debug!("Loading configuration from environment variables with prefix {}", prefix);
            config_builder = config_builder.add_source(
                Environment::with_prefix(&prefix)
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("discovery.extra_ports")
                    .try_parsing(true),
            );
        }

        if let Some(config_file) = self.config_file {
            let path = Path::new(&config_file);
            if path.exists() {
                debug!("Loading configuration from {}", config_file);
                config_builder = config_builder.add_source(File::from(path));
            } else {
                debug!("Configuration file {} does not exist, skipping", config_file);
            }
        }

        let config: Config = config_builder
            .build()
            .map_err(|e| Error::config(format!("Failed to build configuration: {}", e)))?
            .try_deserialize()
            .map_err(|e| Error::config(format!("Failed to deserialize configuration: {}", e)))?;

        config.validate()?;
        info!("Configuration loaded successfully");
        Ok(config)
    }
}

/// A thread-safe reference to a configuration
#[derive(Debug, Clone)]
pub struct SharedConfig(Arc<Config>);

impl SharedConfig {
    /// Create a new SharedConfig
    pub fn new(config: Config) -> Self {
        Self(Arc::new(config))
    }

    /// Get a reference to the config
    pub fn get(&self) -> &Config {
        &self.0
    }
}

impl From<Config> for SharedConfig {
    fn from(config: Config) -> Self {
        Self::new(config)
    }
}

impl AsRef<Config> for SharedConfig {
    fn as_ref(&self) -> &Config {
        self.get()
    }
}
