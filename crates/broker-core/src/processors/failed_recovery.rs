//! Recovery path for orders that failed after a successful request.

use super::{Processor, ProcessorContext};
use crate::state::TransitionError;
use async_trait::async_trait;
use broker_types::{InstanceState, Order, OrderState};
use std::time::Duration;

/// Probes failed-after-success orders for signs of life.
///
/// Providers sometimes report a transient failure for an instance that
/// recovers on its own; this processor gives such orders a bounded number
/// of chances to come back before declaring them failed for good.
pub struct FailedRecoveryProcessor {
	ctx: ProcessorContext,
}

impl FailedRecoveryProcessor {
	pub fn new(ctx: ProcessorContext) -> Self {
		Self { ctx }
	}
}

#[async_trait]
impl Processor for FailedRecoveryProcessor {
	fn name(&self) -> &'static str {
		"failed_recovery"
	}

	fn owned_state(&self) -> OrderState {
		OrderState::FailedAfterSuccessfulRequest
	}

	fn interval(&self) -> Duration {
		Duration::from_secs(self.ctx.config.failed_recovery_interval_secs)
	}

	async fn process(&self, order: &mut Order) -> Result<(), TransitionError> {
		let instance_id = order.instance_id.clone();
		let connector = self.ctx.connector(order);

		let probe = match (instance_id, connector) {
			(Some(instance_id), Ok(connector)) => {
				connector
					.get_instance(&instance_id, order.resource_type(), &order.requester)
					.await
			},
			_ => {
				return self
					.ctx
					.transitioner
					.transition(order, OrderState::Failed)
					.await;
			},
		};

		match probe {
			Ok(instance) if instance.state == InstanceState::Ready => {
				order.retry_count = 0;
				order.fault_message = None;
				self.ctx
					.transitioner
					.transition(order, OrderState::Fulfilled)
					.await
			},
			Ok(instance) if instance.state == InstanceState::Creating => {
				order.retry_count = 0;
				self.ctx
					.transitioner
					.transition(order, OrderState::Spawning)
					.await
			},
			Ok(_) | Err(_) => {
				order.retry_count += 1;
				if order.retry_count >= self.ctx.config.max_check_retries {
					self.ctx
						.transitioner
						.transition(order, OrderState::Failed)
						.await
				} else {
					self.ctx.store.save(order).await?;
					Ok(())
				}
			},
		}
	}
}
