//! Core order lifecycle engine for the broker.
//!
//! This crate wires together the state queues, the state machine, the
//! background processors and the client-facing controller. The
//! [`BrokerBuilder`] assembles an engine from configuration and the
//! factory maps the service layer registers; [`BrokerEngine::run`]
//! recovers persisted orders and drives the processors until shutdown.

pub mod chained_list;
pub mod controller;
pub mod processors;
pub mod registry;
pub mod state;

pub use chained_list::ChainedList;
pub use controller::{OrderController, OrderDetails, OrderError};
pub use registry::{OrderHandle, StateQueueRegistry};
pub use state::{can_transition, OrderStateTransitioner, TransitionError};

use broker_config::Config;
use broker_connector::{CloudConnector, ConnectorError, ConnectorFactory, ConnectorService};
use broker_storage::{OrderStore, StorageError, StorageFactory, StorageService};
use processors::{
	closing::ClosingProcessor, failed_recovery::FailedRecoveryProcessor,
	fulfilled::FulfilledProcessor, open::OpenProcessor, selected::SelectedProcessor,
	spawning::SpawningProcessor, unable::UnableProcessor, Processor, ProcessorContext,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinSet;

/// Errors from engine assembly and operation.
#[derive(Debug, Error)]
pub enum BrokerError {
	#[error("Configuration error: {0}")]
	Config(String),
	#[error("Storage error: {0}")]
	Storage(#[from] StorageError),
	#[error("Connector error: {0}")]
	Connector(#[from] ConnectorError),
	#[error("Service error: {0}")]
	Service(String),
}

/// Assembles a [`BrokerEngine`] from configuration and factory maps.
///
/// The service layer registers every available storage and connector
/// implementation; the builder instantiates only the ones the
/// configuration names, validating each implementation's config against
/// its own schema.
pub struct BrokerBuilder {
	config: Config,
	storage_factories: HashMap<String, StorageFactory>,
	connector_factories: HashMap<String, ConnectorFactory>,
}

impl BrokerBuilder {
	pub fn new(config: Config) -> Self {
		Self {
			config,
			storage_factories: HashMap::new(),
			connector_factories: HashMap::new(),
		}
	}

	/// Registers a storage implementation under the given name.
	pub fn with_storage_factory(mut self, name: &str, factory: StorageFactory) -> Self {
		self.storage_factories.insert(name.to_string(), factory);
		self
	}

	/// Registers a connector implementation under the given name.
	pub fn with_connector_factory(mut self, name: &str, factory: ConnectorFactory) -> Self {
		self.connector_factories.insert(name.to_string(), factory);
		self
	}

	/// Builds the engine.
	///
	/// Fails when the primary storage or the default provider cannot be
	/// instantiated. Other misconfigured connectors are skipped with an
	/// error logged, so one bad provider does not take the broker down.
	pub fn build(self) -> Result<BrokerEngine, BrokerError> {
		let storage = self.build_storage()?;
		let store = Arc::new(OrderStore::new(storage.clone()));
		let connectors = Arc::new(self.build_connectors()?);

		let registry = Arc::new(StateQueueRegistry::new());
		let transitioner = Arc::new(OrderStateTransitioner::new(registry.clone(), store.clone()));
		let controller = Arc::new(OrderController::new(
			registry.clone(),
			transitioner.clone(),
			connectors.clone(),
		));

		Ok(BrokerEngine {
			config: self.config,
			registry,
			transitioner,
			controller,
			connectors,
			store,
			storage,
		})
	}

	fn build_storage(&self) -> Result<Arc<StorageService>, BrokerError> {
		let name = &self.config.storage.primary;
		let factory = self.storage_factories.get(name).ok_or_else(|| {
			BrokerError::Config(format!("No storage implementation named '{}'", name))
		})?;
		let impl_config = self
			.config
			.storage
			.implementations
			.get(name)
			.cloned()
			.unwrap_or(toml::Value::Table(toml::map::Map::new()));

		let backend = factory(&impl_config)?;
		backend
			.config_schema()
			.validate(&impl_config)
			.map_err(|e| BrokerError::Config(format!("Storage '{}': {}", name, e)))?;

		tracing::info!(implementation = %name, "Loaded storage backend");
		Ok(Arc::new(StorageService::new(backend)))
	}

	fn build_connectors(&self) -> Result<ConnectorService, BrokerError> {
		let mut providers: HashMap<String, Arc<dyn CloudConnector>> = HashMap::new();

		for (name, impl_config) in &self.config.connectors.implementations {
			let Some(factory) = self.connector_factories.get(name) else {
				tracing::error!(provider = %name, "No connector implementation, skipping");
				continue;
			};
			match factory(impl_config) {
				Ok(connector) => {
					if let Err(e) = connector.config_schema().validate(impl_config) {
						tracing::error!(provider = %name, error = %e, "Invalid connector config, skipping");
						continue;
					}
					tracing::info!(provider = %name, "Loaded connector");
					providers.insert(name.clone(), connector);
				},
				Err(e) => {
					tracing::error!(provider = %name, error = %e, "Failed to create connector, skipping");
				},
			}
		}

		Ok(ConnectorService::new(
			providers,
			self.config.connectors.default_provider.clone(),
		)?)
	}
}

/// The assembled broker engine.
pub struct BrokerEngine {
	config: Config,
	registry: Arc<StateQueueRegistry>,
	transitioner: Arc<OrderStateTransitioner>,
	controller: Arc<OrderController>,
	connectors: Arc<ConnectorService>,
	store: Arc<OrderStore>,
	storage: Arc<StorageService>,
}

impl BrokerEngine {
	/// The client-facing controller for the API layer.
	pub fn controller(&self) -> Arc<OrderController> {
		self.controller.clone()
	}

	pub fn config(&self) -> &Config {
		&self.config
	}

	fn processor_context(&self) -> ProcessorContext {
		ProcessorContext {
			registry: self.registry.clone(),
			transitioner: self.transitioner.clone(),
			connectors: self.connectors.clone(),
			store: self.store.clone(),
			config: self.config.processors.clone(),
		}
	}

	/// Recovers persisted orders and runs the processors until ctrl-c.
	pub async fn run(&self) -> Result<(), BrokerError> {
		let recovered = self.registry.recover(&self.store).await?;
		tracing::info!(recovered, "Recovered persisted orders");

		let (shutdown_tx, _) = broadcast::channel::<()>(1);
		let ctx = self.processor_context();

		let processors: Vec<Arc<dyn Processor>> = vec![
			Arc::new(OpenProcessor::new(ctx.clone())),
			Arc::new(SelectedProcessor::new(ctx.clone())),
			Arc::new(SpawningProcessor::new(ctx.clone())),
			Arc::new(FulfilledProcessor::new(ctx.clone())),
			Arc::new(UnableProcessor::new(ctx.clone())),
			Arc::new(FailedRecoveryProcessor::new(ctx.clone())),
			Arc::new(ClosingProcessor::new(ctx.clone())),
		];

		let mut tasks = JoinSet::new();
		for processor in processors {
			tasks.spawn(processors::run_processor(
				processor,
				ctx.clone(),
				shutdown_tx.subscribe(),
			));
		}
		tasks.spawn(run_storage_cleanup(
			self.storage.clone(),
			Duration::from_secs(self.config.storage.cleanup_interval_seconds),
			shutdown_tx.subscribe(),
		));

		tokio::signal::ctrl_c()
			.await
			.map_err(|e| BrokerError::Service(format!("Failed to listen for shutdown: {}", e)))?;
		tracing::info!("Shutdown signal received");

		let _ = shutdown_tx.send(());
		while tasks.join_next().await.is_some() {}
		Ok(())
	}
}

/// Periodically reaps expired entries from the storage backend.
async fn run_storage_cleanup(
	storage: Arc<StorageService>,
	interval: Duration,
	mut shutdown: broadcast::Receiver<()>,
) {
	loop {
		tokio::select! {
			_ = tokio::time::sleep(interval) => {
				match storage.cleanup_expired().await {
					Ok(0) => {},
					Ok(n) => tracing::debug!(removed = n, "Storage cleanup pass"),
					Err(e) => tracing::warn!(error = %e, "Storage cleanup failed"),
				}
			},
			_ = shutdown.recv() => break,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::str::FromStr;

	fn sample_config() -> Config {
		Config::from_str(
			r#"
			[broker]
			id = "test-broker"

			[storage]
			primary = "memory"

			[storage.implementations.memory]

			[connectors]
			default_provider = "emulated"

			[connectors.implementations.emulated]
			spawn_polls = 1
			"#,
		)
		.unwrap()
	}

	#[tokio::test]
	async fn test_builder_assembles_engine() {
		let mut builder = BrokerBuilder::new(sample_config());
		for (name, factory) in broker_storage::get_all_implementations() {
			builder = builder.with_storage_factory(name, factory);
		}
		for (name, factory) in broker_connector::get_all_implementations() {
			builder = builder.with_connector_factory(name, factory);
		}

		let engine = builder.build().unwrap();
		assert_eq!(engine.config().broker.id, "test-broker");

		// The controller works against the assembled services
		let order = engine
			.controller()
			.create_order(
				broker_types::ResourceSpec::Volume { size_gb: 1 },
				broker_types::Credential::new("alice", "local"),
				None,
			)
			.await
			.unwrap();
		assert!(engine.controller().get_order(&order.id).await.is_ok());
	}

	#[test]
	fn test_builder_rejects_unknown_primary_storage() {
		let builder = BrokerBuilder::new(sample_config());
		assert!(matches!(builder.build().err(), Some(BrokerError::Config(_))));
	}

	#[test]
	fn test_builder_rejects_missing_default_provider() {
		let mut builder = BrokerBuilder::new(sample_config());
		for (name, factory) in broker_storage::get_all_implementations() {
			builder = builder.with_storage_factory(name, factory);
		}
		// No connector factories registered, so the default provider is missing
		assert!(matches!(
			builder.build().err(),
			Some(BrokerError::Connector(_))
		));
	}
}
