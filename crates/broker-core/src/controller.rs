//! Client-facing order operations.
//!
//! The controller is the single entry point the API layer calls. It creates
//! and deletes orders, answers status queries, and aggregates per-user
//! allocations. It never drives lifecycle transitions forward itself; that
//! is the processors' job. Deletion only redirects an order onto the
//! closing path.

use crate::registry::StateQueueRegistry;
use crate::state::{OrderStateTransitioner, TransitionError};
use broker_connector::ConnectorService;
use broker_storage::StorageError;
use broker_types::{
	truncate_id, Allocation, Credential, Order, OrderState, OrderStatusSummary, ResourceSpec,
	ResourceType,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::instrument;

/// Errors surfaced to API clients.
#[derive(Debug, Error)]
pub enum OrderError {
	#[error("Order not found: {0}")]
	NotFound(String),
	#[error("Transition error: {0}")]
	Transition(#[from] TransitionError),
	#[error("Storage error: {0}")]
	Storage(#[from] StorageError),
}

/// Full order view returned on get, with live connection details when the
/// order is fulfilled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderDetails {
	#[serde(flatten)]
	pub order: Order,
	/// Connection details fetched from the provider. Present only for
	/// fulfilled orders whose provider answered the status query.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub connection: Option<HashMap<String, String>>,
}

/// Client-facing operations over active orders.
pub struct OrderController {
	registry: Arc<StateQueueRegistry>,
	transitioner: Arc<OrderStateTransitioner>,
	connectors: Arc<ConnectorService>,
}

impl OrderController {
	pub fn new(
		registry: Arc<StateQueueRegistry>,
		transitioner: Arc<OrderStateTransitioner>,
		connectors: Arc<ConnectorService>,
	) -> Self {
		Self {
			registry,
			transitioner,
			connectors,
		}
	}

	/// Creates a new order and brings it under engine management.
	///
	/// The provider key is not validated here; an unknown provider is
	/// rejected by the open processor on the order's first sweep, so the
	/// failure is recorded on the order rather than lost with the request.
	pub async fn create_order(
		&self,
		spec: ResourceSpec,
		requester: Credential,
		provider: Option<String>,
	) -> Result<Order, OrderError> {
		let order = Order::new(spec, requester, provider);
		let snapshot = order.clone();
		self.transitioner.activate_order(order).await?;
		tracing::info!(
			order_id = %truncate_id(&snapshot.id),
			resource_type = %snapshot.resource_type(),
			user = %snapshot.requester.user_id,
			"Order created"
		);
		Ok(snapshot)
	}

	/// Returns the current view of an order.
	///
	/// For fulfilled orders the connector is queried for connection
	/// details; a provider that cannot be reached degrades the response to
	/// the stored record instead of failing the call.
	#[instrument(skip_all, fields(order_id = %truncate_id(id)))]
	pub async fn get_order(&self, id: &str) -> Result<OrderDetails, OrderError> {
		let handle = self
			.registry
			.get(id)
			.ok_or_else(|| OrderError::NotFound(id.to_string()))?;
		let order = handle.lock().await.clone();

		let connection = if order.state == OrderState::Fulfilled {
			self.fetch_connection(&order).await
		} else {
			None
		};

		Ok(OrderDetails { order, connection })
	}

	async fn fetch_connection(&self, order: &Order) -> Option<HashMap<String, String>> {
		let provider = order.provider.as_deref()?;
		let instance_id = order.instance_id.as_deref()?;
		let connector = self.connectors.get(provider).ok()?;
		match connector
			.get_instance(instance_id, order.resource_type(), &order.requester)
			.await
		{
			Ok(instance) => Some(instance.connection),
			Err(e) => {
				tracing::debug!(
					order_id = %truncate_id(&order.id),
					error = %e,
					"Could not fetch connection details"
				);
				None
			},
		}
	}

	/// Requests deletion of an order.
	///
	/// Orders that have not reached the provider yet and orders in terminal
	/// states are reaped directly; everything else is routed onto the
	/// closing path and reaped by the closing processor once the instance
	/// is gone. Deleting an order that is already closing is a no-op.
	#[instrument(skip_all, fields(order_id = %truncate_id(id)))]
	pub async fn delete_order(&self, id: &str) -> Result<(), OrderError> {
		let handle = self
			.registry
			.get(id)
			.ok_or_else(|| OrderError::NotFound(id.to_string()))?;
		let mut order = handle.lock().await;

		match order.state {
			OrderState::Closing => Ok(()),
			state if state.is_terminal() => {
				self.transitioner.deactivate_order(&order).await?;
				Ok(())
			},
			_ => {
				self.transitioner
					.transition(&mut order, OrderState::Closing)
					.await?;
				Ok(())
			},
		}
	}

	/// Lists the orders of one user, optionally filtered by resource type.
	pub async fn list_orders(
		&self,
		user_id: &str,
		resource_type: Option<ResourceType>,
	) -> Vec<OrderStatusSummary> {
		let mut summaries = Vec::new();
		for handle in self.registry.handles() {
			let order = handle.lock().await;
			if order.requester.user_id != user_id {
				continue;
			}
			if let Some(wanted) = resource_type {
				if order.resource_type() != wanted {
					continue;
				}
			}
			summaries.push(OrderStatusSummary {
				id: order.id.clone(),
				resource_type: order.resource_type(),
				state: order.state,
				provider: order.provider.clone(),
			});
		}
		summaries
	}

	/// Sums the fulfilled footprint of one user for one resource type.
	///
	/// Only fulfilled orders count; an order that is spawning or failing
	/// does not hold capacity.
	pub async fn get_user_allocation(
		&self,
		user_id: &str,
		resource_type: ResourceType,
	) -> Allocation {
		let mut allocation = Allocation::empty(resource_type);
		for handle in self.registry.handles() {
			let order = handle.lock().await;
			if order.requester.user_id != user_id
				|| order.state != OrderState::Fulfilled
				|| order.resource_type() != resource_type
			{
				continue;
			}
			allocation.accumulate(&order.spec);
		}
		allocation
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use broker_connector::{get_all_implementations, CloudConnector};
	use broker_storage::{implementations::memory::MemoryStorage, OrderStore, StorageService};

	fn controller() -> OrderController {
		let registry = Arc::new(StateQueueRegistry::new());
		let store = Arc::new(OrderStore::new(Arc::new(StorageService::new(Box::new(
			MemoryStorage::new(),
		)))));
		let transitioner = Arc::new(OrderStateTransitioner::new(registry.clone(), store));

		let mut providers: HashMap<String, Arc<dyn CloudConnector>> = HashMap::new();
		let empty = toml::Value::Table(toml::map::Map::new());
		for (name, factory) in get_all_implementations() {
			providers.insert(name.to_string(), factory(&empty).unwrap());
		}
		let connectors =
			Arc::new(ConnectorService::new(providers, "emulated".to_string()).unwrap());

		OrderController::new(registry, transitioner, connectors)
	}

	fn volume_spec(size_gb: u64) -> ResourceSpec {
		ResourceSpec::Volume { size_gb }
	}

	#[tokio::test]
	async fn test_create_and_get_order() {
		let controller = controller();
		let order = controller
			.create_order(volume_spec(10), Credential::new("alice", "local"), None)
			.await
			.unwrap();

		let details = controller.get_order(&order.id).await.unwrap();
		assert_eq!(details.order.id, order.id);
		assert_eq!(details.order.state, OrderState::Open);
		assert!(details.connection.is_none());
	}

	#[tokio::test]
	async fn test_get_unknown_order_is_not_found() {
		let controller = controller();
		let err = controller.get_order("no-such-order").await.unwrap_err();
		assert!(matches!(err, OrderError::NotFound(_)));
	}

	#[tokio::test]
	async fn test_delete_open_order_moves_to_closing() {
		let controller = controller();
		let order = controller
			.create_order(volume_spec(10), Credential::new("alice", "local"), None)
			.await
			.unwrap();

		controller.delete_order(&order.id).await.unwrap();
		let details = controller.get_order(&order.id).await.unwrap();
		assert_eq!(details.order.state, OrderState::Closing);

		// Deleting again while closing is idempotent
		controller.delete_order(&order.id).await.unwrap();
	}

	#[tokio::test]
	async fn test_list_orders_filters_by_user_and_type() {
		let controller = controller();
		controller
			.create_order(volume_spec(10), Credential::new("alice", "local"), None)
			.await
			.unwrap();
		controller
			.create_order(
				ResourceSpec::Network {
					cidr: "10.0.0.0/24".into(),
					allocation_mode: broker_types::NetworkAllocationMode::Dynamic,
				},
				Credential::new("alice", "local"),
				None,
			)
			.await
			.unwrap();
		controller
			.create_order(volume_spec(20), Credential::new("bob", "local"), None)
			.await
			.unwrap();

		assert_eq!(controller.list_orders("alice", None).await.len(), 2);
		assert_eq!(
			controller
				.list_orders("alice", Some(ResourceType::Volume))
				.await
				.len(),
			1
		);
		assert_eq!(controller.list_orders("bob", None).await.len(), 1);
	}

	#[tokio::test]
	async fn test_allocation_counts_only_fulfilled_orders() {
		let controller = controller();
		let order = controller
			.create_order(volume_spec(30), Credential::new("alice", "local"), None)
			.await
			.unwrap();

		// Open orders hold no capacity
		let allocation = controller
			.get_user_allocation("alice", ResourceType::Volume)
			.await;
		assert_eq!(
			allocation,
			Allocation::Volume(broker_types::VolumeAllocation::default())
		);

		// Force the order to fulfilled through the state machine
		let handle = controller.registry.get(&order.id).unwrap();
		{
			let mut order = handle.lock().await;
			controller
				.transitioner
				.transition(&mut order, OrderState::Selected)
				.await
				.unwrap();
			controller
				.transitioner
				.transition(&mut order, OrderState::Spawning)
				.await
				.unwrap();
			controller
				.transitioner
				.transition(&mut order, OrderState::Fulfilled)
				.await
				.unwrap();
		}

		let allocation = controller
			.get_user_allocation("alice", ResourceType::Volume)
			.await;
		match allocation {
			Allocation::Volume(v) => {
				assert_eq!(v.volumes, 1);
				assert_eq!(v.storage_gb, 30);
			},
			other => panic!("unexpected allocation {:?}", other),
		}
	}
}
