//! State queues and the active-orders map.
//!
//! The `StateQueueRegistry` is the explicitly constructed context the whole
//! engine shares: one [`ChainedList`] per lifecycle state, plus the map of
//! active orders. The map's values are the per-order critical section; every
//! read-modify-write of an order happens under that order's async mutex.
//!
//! Queues hold ids only. The persisted record in the [`OrderStore`] is
//! authoritative; at startup [`StateQueueRegistry::recover`] rebuilds the
//! map and queues from it.

use crate::chained_list::ChainedList;
use broker_storage::{OrderStore, StorageError};
use broker_types::{truncate_id, Order, OrderState};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Shared handle to one active order, guarded by its own lock.
pub type OrderHandle = Arc<Mutex<Order>>;

/// Per-state queues plus the active-orders map.
pub struct StateQueueRegistry {
	/// One queue per lifecycle state, indexed by [`state_slot`].
	queues: [ChainedList; 10],
	/// All orders the engine currently tracks, keyed by order id.
	active: DashMap<String, OrderHandle>,
}

/// Maps a state to its queue slot. The array and [`OrderState::all`] share
/// this ordering.
fn state_slot(state: OrderState) -> usize {
	match state {
		OrderState::Open => 0,
		OrderState::Selected => 1,
		OrderState::Spawning => 2,
		OrderState::Fulfilled => 3,
		OrderState::Closing => 4,
		OrderState::Closed => 5,
		OrderState::FailedOnRequest => 6,
		OrderState::FailedAfterSuccessfulRequest => 7,
		OrderState::UnableToCheckStatus => 8,
		OrderState::Failed => 9,
	}
}

impl StateQueueRegistry {
	/// Creates a registry with one empty queue per lifecycle state.
	pub fn new() -> Self {
		Self {
			queues: std::array::from_fn(|_| ChainedList::new()),
			active: DashMap::new(),
		}
	}

	/// Returns the queue for the given state.
	pub fn queue(&self, state: OrderState) -> &ChainedList {
		&self.queues[state_slot(state)]
	}

	/// Inserts an order into the active map.
	///
	/// Returns None if the id is already active; otherwise the new handle.
	pub fn insert(&self, order: Order) -> Option<OrderHandle> {
		use dashmap::mapref::entry::Entry;
		match self.active.entry(order.id.clone()) {
			Entry::Occupied(_) => None,
			Entry::Vacant(entry) => {
				let handle: OrderHandle = Arc::new(Mutex::new(order));
				entry.insert(handle.clone());
				Some(handle)
			},
		}
	}

	/// Returns the handle for an active order, if any.
	pub fn get(&self, id: &str) -> Option<OrderHandle> {
		self.active.get(id).map(|entry| entry.value().clone())
	}

	/// Removes an order from the active map.
	pub fn remove(&self, id: &str) -> Option<OrderHandle> {
		self.active.remove(id).map(|(_, handle)| handle)
	}

	/// Returns true if the id is in the active map.
	pub fn is_active(&self, id: &str) -> bool {
		self.active.contains_key(id)
	}

	/// Number of active orders.
	pub fn active_count(&self) -> usize {
		self.active.len()
	}

	/// Snapshot of the handles of all active orders.
	pub fn handles(&self) -> Vec<OrderHandle> {
		self.active
			.iter()
			.map(|entry| entry.value().clone())
			.collect()
	}

	/// Rebuilds map and queues from the persisted order records.
	///
	/// Non-terminal orders are re-enqueued on the queue matching their
	/// persisted state, so the processors resume exactly where the previous
	/// run stopped. Terminal leftovers are reaped instead of reloaded.
	/// Returns the number of orders recovered.
	pub async fn recover(&self, store: &OrderStore) -> Result<usize, StorageError> {
		let mut recovered = 0;
		for id in store.active_order_ids().await? {
			let order = match store.load(&id).await {
				Ok(order) => order,
				Err(StorageError::NotFound) => continue,
				Err(e) => return Err(e),
			};

			if order.state.is_terminal() {
				tracing::info!(
					order_id = %truncate_id(&id),
					state = %order.state,
					"Reaping terminal order left over from previous run"
				);
				store.delete(&id).await?;
				continue;
			}

			let state = order.state;
			if self.insert(order).is_some() {
				self.queue(state).add_item(&id);
				recovered += 1;
			}
		}
		Ok(recovered)
	}
}

impl Default for StateQueueRegistry {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use broker_storage::{implementations::memory::MemoryStorage, StorageService};
	use broker_types::{Credential, ResourceSpec};

	fn sample_order(state: OrderState) -> Order {
		let mut order = Order::new(
			ResourceSpec::Volume { size_gb: 5 },
			Credential::new("alice", "local"),
			Some("emulated".into()),
		);
		order.state = state;
		order
	}

	#[tokio::test]
	async fn test_insert_rejects_duplicate_id() {
		let registry = StateQueueRegistry::new();
		let order = sample_order(OrderState::Open);
		let dup = order.clone();

		assert!(registry.insert(order).is_some());
		assert!(registry.insert(dup).is_none());
		assert_eq!(registry.active_count(), 1);
	}

	#[tokio::test]
	async fn test_recover_rebuilds_queues_and_reaps_terminal() {
		let store = OrderStore::new(Arc::new(StorageService::new(Box::new(
			MemoryStorage::new(),
		))));

		let open = sample_order(OrderState::Open);
		let spawning = sample_order(OrderState::Spawning);
		let closed = sample_order(OrderState::Closed);
		store.save(&open).await.unwrap();
		store.save(&spawning).await.unwrap();
		store.save(&closed).await.unwrap();

		let registry = StateQueueRegistry::new();
		let recovered = registry.recover(&store).await.unwrap();

		assert_eq!(recovered, 2);
		assert!(registry.queue(OrderState::Open).contains(&open.id));
		assert!(registry.queue(OrderState::Spawning).contains(&spawning.id));
		assert!(!registry.is_active(&closed.id));
		// Terminal leftovers are removed from the store as well
		assert!(!store.exists(&closed.id).await.unwrap());
	}
}
