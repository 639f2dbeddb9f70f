//! Recovery path for orders whose status could not be checked.

use super::{Processor, ProcessorContext};
use crate::state::TransitionError;
use async_trait::async_trait;
use broker_types::{InstanceState, Order, OrderState};
use std::time::Duration;

/// Keeps probing the provider for orders in the unable-to-check state.
///
/// A successful probe routes the order back to the state matching the
/// instance's actual condition. The probe budget is bounded; once it is
/// spent the order is declared failed.
pub struct UnableProcessor {
	ctx: ProcessorContext,
}

impl UnableProcessor {
	pub fn new(ctx: ProcessorContext) -> Self {
		Self { ctx }
	}
}

#[async_trait]
impl Processor for UnableProcessor {
	fn name(&self) -> &'static str {
		"unable_to_check"
	}

	fn owned_state(&self) -> OrderState {
		OrderState::UnableToCheckStatus
	}

	fn interval(&self) -> Duration {
		Duration::from_secs(self.ctx.config.unable_to_check_interval_secs)
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
			// No instance id or no connector means the probe cannot succeed
			_ => {
				order.fault_message = Some("Order cannot be probed".into());
				return self
					.ctx
					.transitioner
					.transition(order, OrderState::Failed)
					.await;
			},
		};

		match probe {
			Ok(instance) => match instance.state {
				InstanceState::Ready => {
					order.retry_count = 0;
					order.fault_message = None;
					self.ctx
						.transitioner
						.transition(order, OrderState::Fulfilled)
						.await
				},
				InstanceState::Creating => {
					order.retry_count = 0;
					self.ctx
						.transitioner
						.transition(order, OrderState::Spawning)
						.await
				},
				InstanceState::Failed => {
					order.fault_message = Some("Instance reported failed".into());
					self.ctx
						.transitioner
						.transition(order, OrderState::Failed)
						.await
				},
				InstanceState::Deleting => Ok(()),
			},
			Err(e) => {
				order.retry_count += 1;
				if order.retry_count >= self.ctx.config.max_check_retries {
					order.fault_message = Some(e.to_string());
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
