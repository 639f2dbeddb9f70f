//! Configuration module for the cloud broker.
//!
//! This module provides structures and utilities for managing broker configuration.
//! It supports loading configuration from TOML files and provides validation to ensure
//! all required configuration values are properly set.
//!
//! ## Modular Configuration Support
//!
//! Configurations can be split into multiple files for better organization:
//! - Use `include = ["file1.toml", "file2.toml"]` to include other config files
//! - Each top-level section must be unique across all files (no duplicates allowed)

mod loader;

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
	/// Error that occurs during file I/O operations.
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
	/// Error that occurs when parsing TOML configuration.
	#[error("Configuration error: {0}")]
	Parse(String),
	/// Error that occurs when configuration validation fails.
	#[error("Validation error: {0}")]
	Validation(String),
}

impl From<toml::de::Error> for ConfigError {
	fn from(err: toml::de::Error) -> Self {
		// Extract just the message without the huge input dump
		let message = err.message().to_string();
		ConfigError::Parse(message)
	}
}

/// Main configuration structure for the broker.
///
/// Contains every section the broker needs to operate: broker identity,
/// the storage backend, the cloud connectors, the background processors,
/// and the optional HTTP API server.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
	/// Configuration specific to this broker instance.
	pub broker: BrokerConfig,
	/// Configuration for the storage backend.
	pub storage: StorageConfig,
	/// Configuration for cloud connectors.
	pub connectors: ConnectorsConfig,
	/// Configuration for the background order processors.
	#[serde(default)]
	pub processors: ProcessorsConfig,
	/// Configuration for the HTTP API server.
	pub api: Option<ApiConfig>,
}

/// Configuration specific to this broker instance.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BrokerConfig {
	/// Unique identifier for this broker instance.
	pub id: String,
}

/// Configuration for the storage backend.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
	/// Which implementation to use as primary.
	pub primary: String,
	/// Map of storage implementation names to their configurations.
	pub implementations: HashMap<String, toml::Value>,
	/// Interval in seconds for cleaning up expired storage entries.
	#[serde(default = "default_cleanup_interval")]
	pub cleanup_interval_seconds: u64,
}

/// Returns the default storage cleanup interval in seconds (one hour).
fn default_cleanup_interval() -> u64 {
	3600
}

/// Configuration for cloud connectors.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConnectorsConfig {
	/// Provider used for orders that do not name one explicitly.
	pub default_provider: String,
	/// Map of provider names to their connector configurations.
	/// Each implementation has its own configuration format stored as raw TOML values.
	pub implementations: HashMap<String, toml::Value>,
}

/// Configuration for the background order processors.
///
/// Each processor sweeps its state queue on its own interval. The retry
/// bounds cap how often a processor re-attempts a connector operation
/// before giving up on an order.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProcessorsConfig {
	/// Sweep interval for the open-order processor, in seconds.
	#[serde(default = "default_sweep_interval")]
	pub open_interval_secs: u64,
	/// Sweep interval for the selected-order processor, in seconds.
	#[serde(default = "default_sweep_interval")]
	pub selected_interval_secs: u64,
	/// Sweep interval for the spawning-order processor, in seconds.
	#[serde(default = "default_sweep_interval")]
	pub spawning_interval_secs: u64,
	/// Sweep interval for the fulfilled-order health check, in seconds.
	#[serde(default = "default_sweep_interval")]
	pub fulfilled_interval_secs: u64,
	/// Sweep interval for the unable-to-check-status processor, in seconds.
	#[serde(default = "default_sweep_interval")]
	pub unable_to_check_interval_secs: u64,
	/// Sweep interval for the failed-after-success recovery processor, in seconds.
	#[serde(default = "default_sweep_interval")]
	pub failed_recovery_interval_secs: u64,
	/// Sweep interval for the closing-order processor, in seconds.
	#[serde(default = "default_sweep_interval")]
	pub closing_interval_secs: u64,
	/// How many transient request failures are retried before an order
	/// is moved to FAILED_ON_REQUEST.
	#[serde(default = "default_request_retries")]
	pub max_request_retries: u32,
	/// How many status polls may fail before an unreachable order is
	/// moved to FAILED.
	#[serde(default = "default_check_retries")]
	pub max_check_retries: u32,
	/// How many transient delete failures are retried before a closing
	/// order is forced to CLOSED.
	#[serde(default = "default_delete_retries")]
	pub max_delete_retries: u32,
}

impl Default for ProcessorsConfig {
	fn default() -> Self {
		Self {
			open_interval_secs: default_sweep_interval(),
			selected_interval_secs: default_sweep_interval(),
			spawning_interval_secs: default_sweep_interval(),
			fulfilled_interval_secs: default_sweep_interval(),
			unable_to_check_interval_secs: default_sweep_interval(),
			failed_recovery_interval_secs: default_sweep_interval(),
			closing_interval_secs: default_sweep_interval(),
			max_request_retries: default_request_retries(),
			max_check_retries: default_check_retries(),
			max_delete_retries: default_delete_retries(),
		}
	}
}

/// Returns the default processor sweep interval in seconds.
fn default_sweep_interval() -> u64 {
	5
}

/// Returns the default bound on retried instance requests.
fn default_request_retries() -> u32 {
	3
}

/// Returns the default bound on failed status polls.
fn default_check_retries() -> u32 {
	5
}

/// Returns the default bound on retried instance deletions.
fn default_delete_retries() -> u32 {
	3
}

/// Configuration for the HTTP API server.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiConfig {
	/// Whether the API server is enabled.
	#[serde(default)]
	pub enabled: bool,
	/// Host address to bind the server to.
	#[serde(default = "default_api_host")]
	pub host: String,
	/// Port to bind the server to.
	#[serde(default = "default_api_port")]
	pub port: u16,
	/// Request timeout in seconds.
	#[serde(default = "default_api_timeout")]
	pub timeout_seconds: u64,
	/// Maximum request size in bytes.
	#[serde(default = "default_max_request_size")]
	pub max_request_size: usize,
}

/// Returns the default API host.
fn default_api_host() -> String {
	"127.0.0.1".to_string()
}

/// Returns the default API port.
fn default_api_port() -> u16 {
	3000
}

/// Returns the default API timeout in seconds.
fn default_api_timeout() -> u64 {
	30
}

/// Returns the default maximum request size in bytes (1MB).
fn default_max_request_size() -> usize {
	1024 * 1024
}

/// Resolves environment variables in a string.
///
/// Replaces ${VAR_NAME} with the value of the environment variable VAR_NAME.
/// Supports default values with ${VAR_NAME:-default_value}.
///
/// Input strings are limited to 1MB.
pub(crate) fn resolve_env_vars(input: &str) -> Result<String, ConfigError> {
	const MAX_INPUT_SIZE: usize = 1024 * 1024; // 1MB
	if input.len() > MAX_INPUT_SIZE {
		return Err(ConfigError::Validation(format!(
			"Configuration file too large: {} bytes (max: {} bytes)",
			input.len(),
			MAX_INPUT_SIZE
		)));
	}

	let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]{0,127})(?::-([^}]{0,256}))?\}")
		.map_err(|e| ConfigError::Parse(format!("Regex error: {}", e)))?;

	let mut result = input.to_string();
	let mut replacements = Vec::new();

	for cap in re.captures_iter(input) {
		let full_match = cap.get(0).expect("capture group 0 always present");
		let var_name = cap.get(1).expect("capture group 1 always present").as_str();
		let default_value = cap.get(2).map(|m| m.as_str());

		let value = match std::env::var(var_name) {
			Ok(v) => v,
			Err(_) => {
				if let Some(default) = default_value {
					default.to_string()
				} else {
					return Err(ConfigError::Validation(format!(
						"Environment variable '{}' not found",
						var_name
					)));
				}
			},
		};

		replacements.push((full_match.start(), full_match.end(), value));
	}

	// Apply replacements in reverse order to maintain positions
	for (start, end, value) in replacements.iter().rev() {
		result.replace_range(start..end, value);
	}

	Ok(result)
}

impl Config {
	/// Loads configuration from a file with environment variable resolution.
	///
	/// This method supports modular configuration through include directives:
	/// - `include = ["file1.toml", "file2.toml"]` - Include specific files
	///
	/// Each top-level section must be unique across all configuration files.
	pub async fn from_file(path: &str) -> Result<Self, ConfigError> {
		let path_buf = Path::new(path);
		let base_dir = path_buf.parent().unwrap_or_else(|| Path::new("."));

		let mut loader = loader::ConfigLoader::new(base_dir);
		let file_name = path_buf
			.file_name()
			.ok_or_else(|| ConfigError::Validation(format!("Invalid path: {}", path)))?;
		loader.load_config(file_name).await
	}

	/// Validates the configuration to ensure all required fields are properly set.
	///
	/// - Ensures the broker ID is not empty
	/// - Validates the primary storage backend exists among implementations
	/// - Checks that at least one connector is configured and that the
	///   default provider names one of them
	/// - Verifies processor intervals and retry bounds are sane
	fn validate(&self) -> Result<(), ConfigError> {
		if self.broker.id.is_empty() {
			return Err(ConfigError::Validation("Broker ID cannot be empty".into()));
		}

		// Validate storage config
		if self.storage.implementations.is_empty() {
			return Err(ConfigError::Validation(
				"At least one storage implementation must be configured".into(),
			));
		}
		if self.storage.primary.is_empty() {
			return Err(ConfigError::Validation(
				"Storage primary implementation cannot be empty".into(),
			));
		}
		if !self
			.storage
			.implementations
			.contains_key(&self.storage.primary)
		{
			return Err(ConfigError::Validation(format!(
				"Primary storage '{}' not found in implementations",
				self.storage.primary
			)));
		}
		if self.storage.cleanup_interval_seconds == 0 {
			return Err(ConfigError::Validation(
				"Storage cleanup_interval_seconds must be greater than 0".into(),
			));
		}
		if self.storage.cleanup_interval_seconds > 86400 {
			return Err(ConfigError::Validation(
				"Storage cleanup_interval_seconds cannot exceed 86400 (24 hours)".into(),
			));
		}

		// Validate connector config
		if self.connectors.implementations.is_empty() {
			return Err(ConfigError::Validation(
				"At least one connector implementation required".into(),
			));
		}
		if self.connectors.default_provider.is_empty() {
			return Err(ConfigError::Validation(
				"Connector default_provider cannot be empty".into(),
			));
		}
		if !self
			.connectors
			.implementations
			.contains_key(&self.connectors.default_provider)
		{
			return Err(ConfigError::Validation(format!(
				"Default provider '{}' not found in connector implementations",
				self.connectors.default_provider
			)));
		}

		// Validate processor config
		let intervals = [
			("open_interval_secs", self.processors.open_interval_secs),
			(
				"selected_interval_secs",
				self.processors.selected_interval_secs,
			),
			(
				"spawning_interval_secs",
				self.processors.spawning_interval_secs,
			),
			(
				"fulfilled_interval_secs",
				self.processors.fulfilled_interval_secs,
			),
			(
				"unable_to_check_interval_secs",
				self.processors.unable_to_check_interval_secs,
			),
			(
				"failed_recovery_interval_secs",
				self.processors.failed_recovery_interval_secs,
			),
			(
				"closing_interval_secs",
				self.processors.closing_interval_secs,
			),
		];
		for (name, value) in intervals {
			if value == 0 {
				return Err(ConfigError::Validation(format!(
					"Processor {} must be greater than 0",
					name
				)));
			}
		}
		if self.processors.max_request_retries == 0 {
			return Err(ConfigError::Validation(
				"max_request_retries must be at least 1".into(),
			));
		}
		if self.processors.max_check_retries == 0 {
			return Err(ConfigError::Validation(
				"max_check_retries must be at least 1".into(),
			));
		}
		if self.processors.max_delete_retries == 0 {
			return Err(ConfigError::Validation(
				"max_delete_retries must be at least 1".into(),
			));
		}

		Ok(())
	}
}

/// Implementation of FromStr trait for Config to enable parsing from string.
///
/// Environment variables are resolved and the configuration is automatically
/// validated after parsing.
impl FromStr for Config {
	type Err = ConfigError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let resolved = resolve_env_vars(s)?;
		let config: Config = toml::from_str(&resolved)?;
		config.validate()?;
		Ok(config)
	}
}
