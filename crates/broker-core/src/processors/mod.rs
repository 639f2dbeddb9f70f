//! Background processors driving the order lifecycle.
//!
//! One processor per non-terminal state. Each runs as an independent tokio
//! task that periodically sweeps its state's queue, takes the per-order
//! lock, and decides the next transition from one connector call. The
//! processors coordinate only through the queues and the store; none of
//! them calls another.

pub mod closing;
pub mod failed_recovery;
pub mod fulfilled;
pub mod open;
pub mod selected;
pub mod spawning;
pub mod unable;

use crate::registry::StateQueueRegistry;
use crate::state::{OrderStateTransitioner, TransitionError};
use async_trait::async_trait;
use broker_config::ProcessorsConfig;
use broker_connector::{CloudConnector, ConnectorError, ConnectorService};
use broker_storage::OrderStore;
use broker_types::{truncate_id, Order, OrderState};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Shared handles every processor needs.
#[derive(Clone)]
pub struct ProcessorContext {
	pub registry: Arc<StateQueueRegistry>,
	pub transitioner: Arc<OrderStateTransitioner>,
	pub connectors: Arc<ConnectorService>,
	pub store: Arc<OrderStore>,
	pub config: ProcessorsConfig,
}

impl ProcessorContext {
	/// Resolves the connector for an order's provider, falling back to the
	/// default provider when the order does not name one.
	fn connector(&self, order: &Order) -> Result<Arc<dyn CloudConnector>, ConnectorError> {
		match order.provider.as_deref() {
			Some(provider) => self.connectors.get(provider),
			None => self.connectors.get(self.connectors.default_provider()),
		}
	}
}

/// One lifecycle state's background worker.
#[async_trait]
pub trait Processor: Send + Sync {
	fn name(&self) -> &'static str;

	/// The state whose queue this processor sweeps.
	fn owned_state(&self) -> OrderState;

	/// Pause between sweeps.
	fn interval(&self) -> Duration;

	/// Handles one order. Called with the order's lock held and the order
	/// verified to still be in the owned state.
	async fn process(&self, order: &mut Order) -> Result<(), TransitionError>;
}

/// Sweeps one processor's queue once, front to back.
///
/// Stale queue entries whose order is no longer active are dropped; orders
/// that changed state between dequeue and lock acquisition are skipped and
/// picked up by their new state's processor. Per-order errors are logged
/// and do not stop the sweep.
pub async fn sweep(processor: &dyn Processor, ctx: &ProcessorContext) {
	let state = processor.owned_state();
	let queue = ctx.registry.queue(state);

	while let Some(id) = queue.get_next() {
		let Some(handle) = ctx.registry.get(&id) else {
			queue.remove_item(&id);
			continue;
		};

		let mut order = handle.lock().await;
		if order.state != state {
			continue;
		}

		if let Err(e) = processor.process(&mut order).await {
			tracing::warn!(
				processor = processor.name(),
				order_id = %truncate_id(&id),
				error = %e,
				"Failed to process order"
			);
		}
	}

	queue.reset_pointer();
}

/// Runs a processor until shutdown is signalled.
pub async fn run_processor(
	processor: Arc<dyn Processor>,
	ctx: ProcessorContext,
	mut shutdown: broadcast::Receiver<()>,
) {
	tracing::info!(processor = processor.name(), "Processor started");
	loop {
		sweep(processor.as_ref(), &ctx).await;
		tokio::select! {
			_ = tokio::time::sleep(processor.interval()) => {},
			_ = shutdown.recv() => {
				tracing::info!(processor = processor.name(), "Processor stopped");
				break;
			},
		}
	}
}
