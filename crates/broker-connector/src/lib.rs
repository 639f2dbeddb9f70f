//! Cloud connector module for the broker.
//!
//! This module defines the contract between the order lifecycle engine and
//! the clouds it provisions against. Each provider is one `CloudConnector`
//! implementation; the `ConnectorService` resolves provider keys to
//! connectors once at startup, so the processors never construct or look up
//! implementations dynamically.

use async_trait::async_trait;
use broker_types::{CloudInstance, ConfigSchema, Credential, ImplementationRegistry, Order, ResourceType};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Re-export implementations
pub mod implementations {
	pub mod emulated;
}

/// Errors that can occur during connector operations.
///
/// The taxonomy is what drives the processors: `Transient` failures are
/// retried within a bounded budget, `Fatal` failures move the order to a
/// failure state immediately, and `NotFound` means the provider has no such
/// instance (which deletion treats as success).
#[derive(Debug, Error)]
pub enum ConnectorError {
	/// A recoverable failure; the operation may succeed if retried.
	#[error("Transient connector error: {0}")]
	Transient(String),
	/// An unrecoverable failure; retrying cannot help.
	#[error("Fatal connector error: {0}")]
	Fatal(String),
	/// The provider has no instance with the given id.
	#[error("Instance not found: {0}")]
	NotFound(String),
	/// Error that occurs during configuration validation.
	#[error("Configuration error: {0}")]
	Configuration(String),
}

/// Trait defining the interface for cloud providers.
///
/// This trait must be implemented by any provider connector that wants to
/// integrate with the broker. All calls carry the requesting user's
/// credential so multi-tenant providers can scope their operations.
#[async_trait]
pub trait CloudConnector: Send + Sync {
	/// Returns the configuration schema for this connector implementation.
	fn config_schema(&self) -> Box<dyn ConfigSchema>;

	/// Requests provisioning of the resource described by the order.
	///
	/// Returns the provider-side instance id. The instance is not
	/// necessarily ready when this returns; callers poll `get_instance`
	/// until it leaves the creating state.
	async fn request_instance(
		&self,
		order: &Order,
		credential: &Credential,
	) -> Result<String, ConnectorError>;

	/// Retrieves the current state of a provisioned instance.
	async fn get_instance(
		&self,
		instance_id: &str,
		resource_type: ResourceType,
		credential: &Credential,
	) -> Result<CloudInstance, ConnectorError>;

	/// Deletes a provisioned instance.
	///
	/// Deleting an instance the provider no longer knows returns
	/// `ConnectorError::NotFound`, which callers treat as success.
	async fn delete_instance(
		&self,
		instance_id: &str,
		resource_type: ResourceType,
		credential: &Credential,
	) -> Result<(), ConnectorError>;
}

/// Type alias for connector factory functions.
///
/// This is the function signature that all connector implementations must
/// provide to create instances of their connector.
pub type ConnectorFactory = fn(&toml::Value) -> Result<Arc<dyn CloudConnector>, ConnectorError>;

/// Registry trait for connector implementations.
///
/// This trait extends the base ImplementationRegistry to specify that
/// connector implementations must provide a ConnectorFactory.
pub trait ConnectorRegistry: ImplementationRegistry<Factory = ConnectorFactory> {}

/// Get all registered connector implementations.
///
/// Returns a vector of (name, factory) tuples for all available connector
/// implementations.
pub fn get_all_implementations() -> Vec<(&'static str, ConnectorFactory)> {
	use implementations::emulated;

	vec![(emulated::Registry::NAME, emulated::Registry::factory())]
}

/// Service that resolves provider keys to cloud connectors.
///
/// Built once at startup from configuration; afterwards the mapping is
/// immutable. Orders that do not name a provider are routed to the
/// configured default.
pub struct ConnectorService {
	/// Map of provider keys to their connectors.
	providers: HashMap<String, Arc<dyn CloudConnector>>,
	/// Provider used when an order does not name one.
	default_provider: String,
}

impl ConnectorService {
	/// Creates a new ConnectorService with the specified providers.
	///
	/// Fails if the default provider does not name a configured connector.
	pub fn new(
		providers: HashMap<String, Arc<dyn CloudConnector>>,
		default_provider: String,
	) -> Result<Self, ConnectorError> {
		if !providers.contains_key(&default_provider) {
			return Err(ConnectorError::Configuration(format!(
				"Default provider '{}' has no configured connector",
				default_provider
			)));
		}
		Ok(Self {
			providers,
			default_provider,
		})
	}

	/// Returns the connector for the given provider key.
	pub fn get(&self, provider: &str) -> Result<Arc<dyn CloudConnector>, ConnectorError> {
		self.providers.get(provider).cloned().ok_or_else(|| {
			ConnectorError::Configuration(format!("Unknown provider '{}'", provider))
		})
	}

	/// Returns the default provider key.
	pub fn default_provider(&self) -> &str {
		&self.default_provider
	}

	/// Returns the keys of all configured providers.
	pub fn provider_names(&self) -> Vec<&str> {
		self.providers.keys().map(|k| k.as_str()).collect()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use implementations::emulated::EmulatedConnector;

	fn service() -> ConnectorService {
		let mut providers: HashMap<String, Arc<dyn CloudConnector>> = HashMap::new();
		providers.insert(
			"emulated".to_string(),
			Arc::new(EmulatedConnector::default()),
		);
		ConnectorService::new(providers, "emulated".to_string()).unwrap()
	}

	#[test]
	fn test_get_known_and_unknown_provider() {
		let service = service();
		assert!(service.get("emulated").is_ok());
		assert!(matches!(
			service.get("aws"),
			Err(ConnectorError::Configuration(_))
		));
		assert_eq!(service.default_provider(), "emulated");
		assert_eq!(service.provider_names(), vec!["emulated"]);
	}

	#[test]
	fn test_unknown_default_provider_rejected() {
		let providers: HashMap<String, Arc<dyn CloudConnector>> = HashMap::new();
		let result = ConnectorService::new(providers, "emulated".to_string());
		assert!(matches!(result, Err(ConnectorError::Configuration(_))));
	}
}
