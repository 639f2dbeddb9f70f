//! Tears down closing orders and reaps them.

use super::{Processor, ProcessorContext};
use crate::state::TransitionError;
use async_trait::async_trait;
use broker_connector::ConnectorError;
use broker_types::{truncate_id, Order, OrderState};
use std::time::Duration;

/// Deletes each closing order's instance and removes the order.
///
/// Deletion is the one path that always terminates. A provider that keeps
/// failing the delete only delays the reap until the retry budget is
/// spent; the order is then closed anyway with the fault recorded.
pub struct ClosingProcessor {
	ctx: ProcessorContext,
}

impl ClosingProcessor {
	pub fn new(ctx: ProcessorContext) -> Self {
		Self { ctx }
	}

	async fn close(&self, order: &mut Order) -> Result<(), TransitionError> {
		self.ctx
			.transitioner
			.transition(order, OrderState::Closed)
			.await?;
		self.ctx.transitioner.deactivate_order(order).await
	}
}

#[async_trait]
impl Processor for ClosingProcessor {
	fn name(&self) -> &'static str {
		"closing"
	}

	fn owned_state(&self) -> OrderState {
		OrderState::Closing
	}

	fn interval(&self) -> Duration {
		Duration::from_secs(self.ctx.config.closing_interval_secs)
	}

	async fn process(&self, order: &mut Order) -> Result<(), TransitionError> {
		// Orders that never reached the provider have nothing to delete
		let Some(instance_id) = order.instance_id.clone() else {
			return self.close(order).await;
		};

		let connector = match self.ctx.connector(order) {
			Ok(connector) => connector,
			Err(e) => {
				tracing::warn!(
					order_id = %truncate_id(&order.id),
					error = %e,
					"No connector for closing order, reaping without cleanup"
				);
				order.fault_message = Some(e.to_string());
				return self.close(order).await;
			},
		};

		match connector
			.delete_instance(&instance_id, order.resource_type(), &order.requester)
			.await
		{
			// NotFound means the instance is already gone
			Ok(()) | Err(ConnectorError::NotFound(_)) => self.close(order).await,
			Err(ConnectorError::Transient(msg)) => {
				order.retry_count += 1;
				if order.retry_count >= self.ctx.config.max_delete_retries {
					tracing::warn!(
						order_id = %truncate_id(&order.id),
						error = %msg,
						"Delete retries exhausted, reaping order with instance left behind"
					);
					order.fault_message = Some(msg);
					self.close(order).await
				} else {
					self.ctx.store.save(order).await?;
					Ok(())
				}
			},
			Err(e) => {
				tracing::warn!(
					order_id = %truncate_id(&order.id),
					error = %e,
					"Delete failed permanently, reaping order with instance left behind"
				);
				order.fault_message = Some(e.to_string());
				self.close(order).await
			},
		}
	}
}
