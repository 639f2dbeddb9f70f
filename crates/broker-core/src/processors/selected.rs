//! Issues provisioning requests for selected orders.

use super::{Processor, ProcessorContext};
use crate::state::TransitionError;
use async_trait::async_trait;
use broker_connector::ConnectorError;
use broker_types::{truncate_id, Order, OrderState};
use std::time::Duration;

/// Sends the provisioning request and records the instance id.
///
/// Transient provider failures are retried across sweeps within the
/// configured budget; anything else fails the order on the spot.
pub struct SelectedProcessor {
	ctx: ProcessorContext,
}

impl SelectedProcessor {
	pub fn new(ctx: ProcessorContext) -> Self {
		Self { ctx }
	}
}

#[async_trait]
impl Processor for SelectedProcessor {
	fn name(&self) -> &'static str {
		"selected"
	}

	fn owned_state(&self) -> OrderState {
		OrderState::Selected
	}

	fn interval(&self) -> Duration {
		Duration::from_secs(self.ctx.config.selected_interval_secs)
	}

	async fn process(&self, order: &mut Order) -> Result<(), TransitionError> {
		let connector = match self.ctx.connector(order) {
			Ok(connector) => connector,
			Err(e) => {
				order.fault_message = Some(e.to_string());
				return self
					.ctx
					.transitioner
					.transition(order, OrderState::FailedOnRequest)
					.await;
			},
		};

		match connector.request_instance(order, &order.requester).await {
			Ok(instance_id) => {
				order.instance_id = Some(instance_id);
				order.retry_count = 0;
				order.fault_message = None;
				self.ctx
					.transitioner
					.transition(order, OrderState::Spawning)
					.await
			},
			Err(ConnectorError::Transient(msg)) => {
				order.retry_count += 1;
				// The budget covers max_request_retries transient failures;
				// only a failure beyond it gives up on the order
				if order.retry_count > self.ctx.config.max_request_retries {
					order.fault_message = Some(msg);
					self.ctx
						.transitioner
						.transition(order, OrderState::FailedOnRequest)
						.await
				} else {
					tracing::debug!(
						order_id = %truncate_id(&order.id),
						retry = order.retry_count,
						error = %msg,
						"Provisioning request failed, will retry"
					);
					self.ctx.store.save(order).await?;
					Ok(())
				}
			},
			Err(e) => {
				order.fault_message = Some(e.to_string());
				self.ctx
					.transitioner
					.transition(order, OrderState::FailedOnRequest)
					.await
			},
		}
	}
}
