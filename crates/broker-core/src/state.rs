//! Order lifecycle state machine.
//!
//! Validates transitions against the fixed lifecycle graph and performs the
//! queue/store bookkeeping for every transition. The transition table is the
//! single authority on which edges exist; processors never move an order
//! between queues themselves.

use crate::registry::{OrderHandle, StateQueueRegistry};
use broker_storage::{OrderStore, StorageError};
use broker_types::{now_secs, truncate_id, Order, OrderState};
use once_cell::sync::Lazy;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;

/// Errors from state transitions and activation.
#[derive(Debug, Error)]
pub enum TransitionError {
	#[error("Invalid state transition from {from} to {to}")]
	InvalidTransition { from: OrderState, to: OrderState },
	#[error("Order already active: {0}")]
	AlreadyActive(String),
	#[error("Order not active: {0}")]
	NotActive(String),
	#[error("Order {id} is in non-terminal state {state} and cannot be deactivated")]
	NotTerminal { id: String, state: OrderState },
	#[error("Storage error: {0}")]
	Storage(#[from] StorageError),
}

/// Valid state transitions for the order lifecycle.
static TRANSITIONS: Lazy<HashMap<OrderState, HashSet<OrderState>>> = Lazy::new(|| {
	use OrderState::*;
	let mut transitions = HashMap::new();

	transitions.insert(Open, HashSet::from([Selected, Failed, Closing]));
	transitions.insert(Selected, HashSet::from([Spawning, FailedOnRequest, Closing]));
	transitions.insert(
		Spawning,
		HashSet::from([
			Fulfilled,
			FailedAfterSuccessfulRequest,
			UnableToCheckStatus,
			Closing,
		]),
	);
	transitions.insert(
		Fulfilled,
		HashSet::from([FailedAfterSuccessfulRequest, UnableToCheckStatus, Closing]),
	);
	transitions.insert(
		UnableToCheckStatus,
		HashSet::from([Fulfilled, Spawning, Failed, Closing]),
	);
	transitions.insert(
		FailedAfterSuccessfulRequest,
		HashSet::from([Fulfilled, Spawning, Failed, Closing]),
	);
	transitions.insert(FailedOnRequest, HashSet::from([Closing]));
	transitions.insert(Closing, HashSet::from([Closed]));
	// Closed and Failed are terminal
	transitions.insert(Closed, HashSet::new());
	transitions.insert(Failed, HashSet::new());

	transitions
});

/// Returns true if the transition between the two states is allowed.
pub fn can_transition(from: OrderState, to: OrderState) -> bool {
	TRANSITIONS
		.get(&from)
		.map(|targets| targets.contains(&to))
		.unwrap_or(false)
}

/// Moves orders between lifecycle states, keeping queues and store in step.
///
/// All mutation goes through [`transition`], called while holding the
/// order's lock. The store write happens between the removal from the
/// origin queue and the insertion into the target queue, so an order is
/// never visible on two queues at once.
pub struct OrderStateTransitioner {
	registry: Arc<StateQueueRegistry>,
	store: Arc<OrderStore>,
}

impl OrderStateTransitioner {
	pub fn new(registry: Arc<StateQueueRegistry>, store: Arc<OrderStore>) -> Self {
		Self { registry, store }
	}

	/// Brings a new order under engine management.
	///
	/// Persists the order, inserts it into the active map and enqueues it on
	/// its current state's queue. Returns the shared handle.
	pub async fn activate_order(&self, order: Order) -> Result<OrderHandle, TransitionError> {
		if self.registry.is_active(&order.id) {
			return Err(TransitionError::AlreadyActive(order.id));
		}

		let id = order.id.clone();
		let state = order.state;
		self.store.save(&order).await?;

		let handle = self
			.registry
			.insert(order)
			.ok_or(TransitionError::AlreadyActive(id.clone()))?;
		self.registry.queue(state).add_item(&id);

		tracing::debug!(order_id = %truncate_id(&id), state = %state, "Order activated");
		Ok(handle)
	}

	/// Transitions an order to a new state.
	///
	/// Must be called while holding the order's lock. On a persist failure
	/// the order is re-enqueued on its origin queue and the error is
	/// returned; the in-memory state is left unchanged.
	pub async fn transition(
		&self,
		order: &mut Order,
		target: OrderState,
	) -> Result<(), TransitionError> {
		let origin = order.state;
		if !can_transition(origin, target) {
			return Err(TransitionError::InvalidTransition {
				from: origin,
				to: target,
			});
		}
		if !self.registry.is_active(&order.id) {
			return Err(TransitionError::NotActive(order.id.clone()));
		}

		self.registry.queue(origin).remove_item(&order.id);

		order.state = target;
		order.last_transition_at = now_secs();
		if let Err(e) = self.store.save(order).await {
			order.state = origin;
			self.registry.queue(origin).add_item(&order.id);
			return Err(e.into());
		}

		self.registry.queue(target).add_item(&order.id);
		tracing::info!(
			order_id = %truncate_id(&order.id),
			from = %origin,
			to = %target,
			"Order transitioned"
		);
		Ok(())
	}

	/// Removes a terminal order from queues, map and store.
	pub async fn deactivate_order(&self, order: &Order) -> Result<(), TransitionError> {
		if !order.state.is_terminal() {
			return Err(TransitionError::NotTerminal {
				id: order.id.clone(),
				state: order.state,
			});
		}

		self.registry.queue(order.state).remove_item(&order.id);
		self.registry.remove(&order.id);
		match self.store.delete(&order.id).await {
			Ok(()) | Err(StorageError::NotFound) => {},
			Err(e) => return Err(e.into()),
		}

		tracing::info!(
			order_id = %truncate_id(&order.id),
			state = %order.state,
			"Order deactivated"
		);
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use broker_storage::{implementations::memory::MemoryStorage, StorageService};
	use broker_types::{Credential, ResourceSpec};

	fn transitioner() -> (Arc<StateQueueRegistry>, OrderStateTransitioner) {
		let registry = Arc::new(StateQueueRegistry::new());
		let store = Arc::new(OrderStore::new(Arc::new(StorageService::new(Box::new(
			MemoryStorage::new(),
		)))));
		(registry.clone(), OrderStateTransitioner::new(registry, store))
	}

	fn sample_order() -> Order {
		Order::new(
			ResourceSpec::Volume { size_gb: 10 },
			Credential::new("alice", "local"),
			Some("emulated".into()),
		)
	}

	#[test]
	fn test_transition_table() {
		use OrderState::*;
		assert!(can_transition(Open, Selected));
		assert!(can_transition(Selected, Spawning));
		assert!(can_transition(Spawning, Fulfilled));
		assert!(can_transition(Fulfilled, UnableToCheckStatus));
		assert!(can_transition(UnableToCheckStatus, Fulfilled));
		assert!(can_transition(FailedAfterSuccessfulRequest, Spawning));
		assert!(can_transition(FailedOnRequest, Closing));
		assert!(can_transition(Closing, Closed));

		assert!(!can_transition(Open, Spawning));
		assert!(!can_transition(Closed, Open));
		assert!(!can_transition(Failed, Closing));
		assert!(!can_transition(Fulfilled, Spawning));
	}

	#[tokio::test]
	async fn test_activate_then_transition_moves_between_queues() {
		let (registry, transitioner) = transitioner();
		let order = sample_order();
		let id = order.id.clone();

		let handle = transitioner.activate_order(order).await.unwrap();
		assert!(registry.queue(OrderState::Open).contains(&id));

		let mut order = handle.lock().await;
		transitioner
			.transition(&mut order, OrderState::Selected)
			.await
			.unwrap();

		assert_eq!(order.state, OrderState::Selected);
		assert!(!registry.queue(OrderState::Open).contains(&id));
		assert!(registry.queue(OrderState::Selected).contains(&id));
	}

	#[tokio::test]
	async fn test_invalid_transition_rejected() {
		let (_, transitioner) = transitioner();
		let order = sample_order();
		let handle = transitioner.activate_order(order).await.unwrap();

		let mut order = handle.lock().await;
		let err = transitioner
			.transition(&mut order, OrderState::Fulfilled)
			.await
			.unwrap_err();
		assert!(matches!(
			err,
			TransitionError::InvalidTransition {
				from: OrderState::Open,
				to: OrderState::Fulfilled
			}
		));
		assert_eq!(order.state, OrderState::Open);
	}

	#[tokio::test]
	async fn test_deactivate_requires_terminal_state() {
		let (registry, transitioner) = transitioner();
		let order = sample_order();
		let id = order.id.clone();
		let handle = transitioner.activate_order(order).await.unwrap();

		{
			let order = handle.lock().await;
			let err = transitioner.deactivate_order(&order).await.unwrap_err();
			assert!(matches!(err, TransitionError::NotTerminal { .. }));
		}

		{
			let mut order = handle.lock().await;
			transitioner
				.transition(&mut order, OrderState::Closing)
				.await
				.unwrap();
			transitioner
				.transition(&mut order, OrderState::Closed)
				.await
				.unwrap();
			transitioner.deactivate_order(&order).await.unwrap();
		}

		assert!(!registry.is_active(&id));
		assert!(!registry.queue(OrderState::Closed).contains(&id));
	}

	#[tokio::test]
	async fn test_order_sits_in_exactly_one_queue_matching_persisted_state() {
		let registry = Arc::new(StateQueueRegistry::new());
		let store = Arc::new(OrderStore::new(Arc::new(StorageService::new(Box::new(
			MemoryStorage::new(),
		)))));
		let transitioner = OrderStateTransitioner::new(registry.clone(), store.clone());

		let order = sample_order();
		let id = order.id.clone();
		let handle = transitioner.activate_order(order).await.unwrap();

		let assert_only_in = |expected: OrderState| {
			for state in OrderState::all() {
				assert_eq!(
					registry.queue(state).contains(&id),
					state == expected,
					"queue {} membership wrong while order is {}",
					state,
					expected
				);
			}
		};

		assert_only_in(OrderState::Open);
		assert_eq!(store.load(&id).await.unwrap().state, OrderState::Open);

		let mut order = handle.lock().await;
		for target in [
			OrderState::Selected,
			OrderState::Spawning,
			OrderState::Fulfilled,
			OrderState::Closing,
			OrderState::Closed,
		] {
			transitioner.transition(&mut order, target).await.unwrap();
			assert_only_in(target);
			assert_eq!(store.load(&id).await.unwrap().state, target);
		}

		transitioner.deactivate_order(&order).await.unwrap();
		for state in OrderState::all() {
			assert!(!registry.queue(state).contains(&id));
		}
		assert!(!store.exists(&id).await.unwrap());
	}

	#[tokio::test]
	async fn test_activate_rejects_duplicate() {
		let (_, transitioner) = transitioner();
		let order = sample_order();
		let dup = order.clone();

		transitioner.activate_order(order).await.unwrap();
		let err = transitioner.activate_order(dup).await.unwrap_err();
		assert!(matches!(err, TransitionError::AlreadyActive(_)));
	}
}
