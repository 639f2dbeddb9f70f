//! Emulated cloud connector implementation.
//!
//! This module provides an in-memory cloud that provisions instances after a
//! configurable number of status polls and can inject request failures. It
//! exists so every processor path can be driven end to end without talking
//! to a real provider.

use crate::{CloudConnector, ConnectorError};
use async_trait::async_trait;
use broker_types::{
	CloudInstance, ConfigSchema, Credential, Field, FieldType, InstanceState, Order, ResourceSpec,
	ResourceType, Schema, ValidationError,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Configuration for the emulated connector.
#[derive(Debug, Clone)]
pub struct EmulatedConfig {
	/// How many `get_instance` polls an instance spends creating before
	/// it becomes ready.
	pub spawn_polls: u32,
	/// When set, every provisioning request fails fatally.
	pub fail_requests: bool,
	/// How many initial provisioning requests fail transiently before
	/// requests start succeeding.
	pub transient_failures: u32,
}

impl Default for EmulatedConfig {
	fn default() -> Self {
		Self {
			spawn_polls: 2,
			fail_requests: false,
			transient_failures: 0,
		}
	}
}

/// One instance tracked by the emulated cloud.
#[derive(Debug, Clone)]
struct EmulatedInstance {
	resource_type: ResourceType,
	polls_remaining: u32,
	connection: HashMap<String, String>,
}

/// In-memory cloud provider.
///
/// Instances live in a map keyed by id; each `get_instance` poll counts
/// down toward readiness. No state survives a restart, which mirrors the
/// broker's crash model: reconciliation happens by polling, never by
/// trusting memory.
pub struct EmulatedConnector {
	config: EmulatedConfig,
	instances: Arc<Mutex<HashMap<String, EmulatedInstance>>>,
	remaining_transient: Mutex<u32>,
}

impl EmulatedConnector {
	/// Creates a new emulated connector with the given configuration.
	pub fn new(config: EmulatedConfig) -> Self {
		let remaining_transient = Mutex::new(config.transient_failures);
		Self {
			config,
			instances: Arc::new(Mutex::new(HashMap::new())),
			remaining_transient,
		}
	}

	/// Builds the connection details surfaced for a ready instance.
	fn connection_for(spec: &ResourceSpec, instance_id: &str) -> HashMap<String, String> {
		let mut connection = HashMap::new();
		match spec {
			ResourceSpec::Compute { image_id, .. } => {
				connection.insert("address".into(), format!("10.30.0.{}", fake_octet(instance_id)));
				connection.insert("ssh_port".into(), "22".into());
				connection.insert("image".into(), image_id.clone());
			},
			ResourceSpec::Network { cidr, .. } => {
				connection.insert("cidr".into(), cidr.clone());
			},
			ResourceSpec::Volume { size_gb } => {
				connection.insert("size_gb".into(), size_gb.to_string());
			},
			ResourceSpec::Attachment { device, .. } => {
				connection.insert(
					"device".into(),
					device.clone().unwrap_or_else(|| "/dev/sdb".into()),
				);
			},
		}
		connection
	}

	fn poisoned<T>(_: T) -> ConnectorError {
		ConnectorError::Fatal("Emulated cloud state lock poisoned".into())
	}
}

impl Default for EmulatedConnector {
	fn default() -> Self {
		Self::new(EmulatedConfig::default())
	}
}

/// Derives a stable host octet from an instance id.
fn fake_octet(instance_id: &str) -> u8 {
	instance_id.bytes().fold(1u8, |acc, b| acc.wrapping_add(b)) | 1
}

#[async_trait]
impl CloudConnector for EmulatedConnector {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(EmulatedConnectorSchema)
	}

	async fn request_instance(
		&self,
		order: &Order,
		_credential: &Credential,
	) -> Result<String, ConnectorError> {
		{
			let mut remaining = self.remaining_transient.lock().map_err(Self::poisoned)?;
			if *remaining > 0 {
				*remaining -= 1;
				return Err(ConnectorError::Transient(
					"Emulated cloud temporarily unavailable".into(),
				));
			}
		}

		if self.config.fail_requests {
			return Err(ConnectorError::Fatal(
				"Emulated cloud rejected the provisioning request".into(),
			));
		}

		let instance_id = format!("{}-{}", order.resource_type(), uuid::Uuid::new_v4());
		let instance = EmulatedInstance {
			resource_type: order.resource_type(),
			polls_remaining: self.config.spawn_polls,
			connection: Self::connection_for(&order.spec, &instance_id),
		};

		self.instances
			.lock()
			.map_err(Self::poisoned)?
			.insert(instance_id.clone(), instance);

		tracing::debug!(order_id = %order.id, %instance_id, "Emulated instance requested");
		Ok(instance_id)
	}

	async fn get_instance(
		&self,
		instance_id: &str,
		resource_type: ResourceType,
		_credential: &Credential,
	) -> Result<CloudInstance, ConnectorError> {
		let mut instances = self.instances.lock().map_err(Self::poisoned)?;
		let instance = instances
			.get_mut(instance_id)
			.filter(|i| i.resource_type == resource_type)
			.ok_or_else(|| ConnectorError::NotFound(instance_id.to_string()))?;

		if instance.polls_remaining > 0 {
			instance.polls_remaining -= 1;
			return Ok(CloudInstance::new(instance_id, InstanceState::Creating));
		}

		let mut cloud_instance = CloudInstance::new(instance_id, InstanceState::Ready);
		cloud_instance.connection = instance.connection.clone();
		Ok(cloud_instance)
	}

	async fn delete_instance(
		&self,
		instance_id: &str,
		_resource_type: ResourceType,
		_credential: &Credential,
	) -> Result<(), ConnectorError> {
		let removed = self
			.instances
			.lock()
			.map_err(Self::poisoned)?
			.remove(instance_id);
		match removed {
			Some(_) => Ok(()),
			None => Err(ConnectorError::NotFound(instance_id.to_string())),
		}
	}
}

/// Configuration schema for the emulated connector.
pub struct EmulatedConnectorSchema;

impl ConfigSchema for EmulatedConnectorSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let schema = Schema::new(
			vec![], // No required fields
			vec![
				Field::new(
					"spawn_polls",
					FieldType::Integer {
						min: Some(0),
						max: Some(10_000),
					},
				),
				Field::new("fail_requests", FieldType::Boolean),
				Field::new(
					"transient_failures",
					FieldType::Integer {
						min: Some(0),
						max: Some(10_000),
					},
				),
			],
		);
		schema.validate(config)
	}
}

/// Factory function to create an emulated connector from configuration.
///
/// Configuration parameters:
/// - `spawn_polls`: polls an instance spends creating (default: 2)
/// - `fail_requests`: reject every provisioning request (default: false)
/// - `transient_failures`: initial transient request failures (default: 0)
pub fn create_connector(config: &toml::Value) -> Result<Arc<dyn CloudConnector>, ConnectorError> {
	let defaults = EmulatedConfig::default();
	let get_u32 = |key: &str, default: u32| -> Result<u32, ConnectorError> {
		match config.get(key) {
			None => Ok(default),
			Some(value) => value
				.as_integer()
				.filter(|v| *v >= 0)
				.map(|v| v as u32)
				.ok_or_else(|| {
					ConnectorError::Configuration(format!(
						"'{}' must be a non-negative integer",
						key
					))
				}),
		}
	};

	let emulated_config = EmulatedConfig {
		spawn_polls: get_u32("spawn_polls", defaults.spawn_polls)?,
		fail_requests: config
			.get("fail_requests")
			.and_then(|v| v.as_bool())
			.unwrap_or(defaults.fail_requests),
		transient_failures: get_u32("transient_failures", defaults.transient_failures)?,
	};

	Ok(Arc::new(EmulatedConnector::new(emulated_config)))
}

/// Registry entry for the emulated connector implementation.
pub struct Registry;

impl broker_types::ImplementationRegistry for Registry {
	const NAME: &'static str = "emulated";
	type Factory = crate::ConnectorFactory;

	fn factory() -> Self::Factory {
		create_connector
	}
}

impl crate::ConnectorRegistry for Registry {}

#[cfg(test)]
mod tests {
	use super::*;

	fn compute_order() -> Order {
		Order::new(
			ResourceSpec::Compute {
				vcpus: 1,
				memory_mb: 1024,
				disk_gb: 10,
				image_id: "debian-12".into(),
			},
			Credential::new("alice", "local"),
			Some("emulated".into()),
		)
	}

	#[tokio::test]
	async fn test_instance_becomes_ready_after_spawn_polls() {
		let connector = EmulatedConnector::new(EmulatedConfig {
			spawn_polls: 2,
			..EmulatedConfig::default()
		});
		let order = compute_order();
		let credential = order.requester.clone();

		let id = connector.request_instance(&order, &credential).await.unwrap();

		for _ in 0..2 {
			let instance = connector
				.get_instance(&id, ResourceType::Compute, &credential)
				.await
				.unwrap();
			assert_eq!(instance.state, InstanceState::Creating);
		}

		let instance = connector
			.get_instance(&id, ResourceType::Compute, &credential)
			.await
			.unwrap();
		assert_eq!(instance.state, InstanceState::Ready);
		assert!(instance.connection.contains_key("address"));
		assert_eq!(instance.connection.get("image").unwrap(), "debian-12");
	}

	#[tokio::test]
	async fn test_fail_requests_is_fatal() {
		let connector = EmulatedConnector::new(EmulatedConfig {
			fail_requests: true,
			..EmulatedConfig::default()
		});
		let order = compute_order();

		let result = connector.request_instance(&order, &order.requester).await;
		assert!(matches!(result, Err(ConnectorError::Fatal(_))));
	}

	#[tokio::test]
	async fn test_transient_failures_then_success() {
		let connector = EmulatedConnector::new(EmulatedConfig {
			transient_failures: 2,
			..EmulatedConfig::default()
		});
		let order = compute_order();

		for _ in 0..2 {
			let result = connector.request_instance(&order, &order.requester).await;
			assert!(matches!(result, Err(ConnectorError::Transient(_))));
		}
		assert!(connector
			.request_instance(&order, &order.requester)
			.await
			.is_ok());
	}

	#[tokio::test]
	async fn test_delete_then_poll_is_not_found() {
		let connector = EmulatedConnector::default();
		let order = compute_order();

		let id = connector
			.request_instance(&order, &order.requester)
			.await
			.unwrap();
		connector
			.delete_instance(&id, ResourceType::Compute, &order.requester)
			.await
			.unwrap();

		assert!(matches!(
			connector
				.get_instance(&id, ResourceType::Compute, &order.requester)
				.await,
			Err(ConnectorError::NotFound(_))
		));
		assert!(matches!(
			connector
				.delete_instance(&id, ResourceType::Compute, &order.requester)
				.await,
			Err(ConnectorError::NotFound(_))
		));
	}

	#[tokio::test]
	async fn test_factory_reads_config() {
		let config: toml::Value =
			toml::from_str("spawn_polls = 0\ntransient_failures = 1").unwrap();
		let connector = create_connector(&config).unwrap();
		let order = compute_order();

		assert!(matches!(
			connector.request_instance(&order, &order.requester).await,
			Err(ConnectorError::Transient(_))
		));
		let id = connector
			.request_instance(&order, &order.requester)
			.await
			.unwrap();
		let instance = connector
			.get_instance(&id, ResourceType::Compute, &order.requester)
			.await
			.unwrap();
		assert_eq!(instance.state, InstanceState::Ready);
	}
}
