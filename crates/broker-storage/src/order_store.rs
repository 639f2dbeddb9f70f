//! Typed order persistence on top of the storage service.
//!
//! The order store is the durable, authoritative record of every order the
//! broker manages. State queues and the active-orders map are rebuilt from
//! it at startup; an order that is not in the store does not exist.

use crate::{StorageError, StorageService};
use broker_types::Order;
use std::sync::Arc;

/// Namespace under which all order records are stored.
const ORDERS_NAMESPACE: &str = "orders";

/// Typed wrapper over [`StorageService`] for order records.
pub struct OrderStore {
	storage: Arc<StorageService>,
}

impl OrderStore {
	/// Creates a new OrderStore over the given storage service.
	pub fn new(storage: Arc<StorageService>) -> Self {
		Self { storage }
	}

	/// Persists an order, creating or overwriting its record.
	pub async fn save(&self, order: &Order) -> Result<(), StorageError> {
		self.storage.store(ORDERS_NAMESPACE, &order.id, order).await
	}

	/// Loads an order by id.
	pub async fn load(&self, id: &str) -> Result<Order, StorageError> {
		self.storage.retrieve(ORDERS_NAMESPACE, id).await
	}

	/// Removes an order record. Only terminal orders should ever be removed.
	pub async fn delete(&self, id: &str) -> Result<(), StorageError> {
		self.storage.remove(ORDERS_NAMESPACE, id).await
	}

	/// Checks whether an order record exists.
	pub async fn exists(&self, id: &str) -> Result<bool, StorageError> {
		self.storage.exists(ORDERS_NAMESPACE, id).await
	}

	/// Lists the ids of all persisted orders.
	///
	/// Used at startup to rebuild the active-orders map and state queues.
	pub async fn active_order_ids(&self) -> Result<Vec<String>, StorageError> {
		self.storage.list_ids(ORDERS_NAMESPACE).await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::implementations::memory::MemoryStorage;
	use broker_types::{Credential, Order, ResourceSpec};

	fn store() -> OrderStore {
		let service = StorageService::new(Box::new(MemoryStorage::new()));
		OrderStore::new(Arc::new(service))
	}

	fn sample_order() -> Order {
		Order::new(
			ResourceSpec::Compute {
				vcpus: 2,
				memory_mb: 2048,
				disk_gb: 20,
				image_id: "ubuntu-24.04".into(),
			},
			Credential::new("alice", "local"),
			None,
		)
	}

	#[tokio::test]
	async fn test_save_load_roundtrip() {
		let store = store();
		let order = sample_order();

		store.save(&order).await.unwrap();
		let loaded = store.load(&order.id).await.unwrap();
		assert_eq!(loaded.id, order.id);
		assert_eq!(loaded.state, order.state);
		assert_eq!(loaded.requester.user_id, "alice");
	}

	#[tokio::test]
	async fn test_active_order_ids_reflects_saves_and_deletes() {
		let store = store();
		let a = sample_order();
		let b = sample_order();

		store.save(&a).await.unwrap();
		store.save(&b).await.unwrap();

		let mut ids = store.active_order_ids().await.unwrap();
		ids.sort();
		let mut expected = vec![a.id.clone(), b.id.clone()];
		expected.sort();
		assert_eq!(ids, expected);

		store.delete(&a.id).await.unwrap();
		assert!(!store.exists(&a.id).await.unwrap());
		assert_eq!(store.active_order_ids().await.unwrap(), vec![b.id.clone()]);
	}

	#[tokio::test]
	async fn test_load_missing_order_is_not_found() {
		let store = store();
		assert!(matches!(
			store.load("no-such-order").await,
			Err(StorageError::NotFound)
		));
	}
}
