//! Polls spawning orders until their instance is ready.

use super::{Processor, ProcessorContext};
use crate::state::TransitionError;
use async_trait::async_trait;
use broker_connector::ConnectorError;
use broker_types::{InstanceState, Order, OrderState};
use std::time::Duration;

/// Polls the provider for each spawning order's instance state.
pub struct SpawningProcessor {
	ctx: ProcessorContext,
}

impl SpawningProcessor {
	pub fn new(ctx: ProcessorContext) -> Self {
		Self { ctx }
	}
}

#[async_trait]
impl Processor for SpawningProcessor {
	fn name(&self) -> &'static str {
		"spawning"
	}

	fn owned_state(&self) -> OrderState {
		OrderState::Spawning
	}

	fn interval(&self) -> Duration {
		Duration::from_secs(self.ctx.config.spawning_interval_secs)
	}

	async fn process(&self, order: &mut Order) -> Result<(), TransitionError> {
		let Some(instance_id) = order.instance_id.clone() else {
			// A spawning order without an instance id cannot be polled
			order.fault_message = Some("Spawning order has no instance id".into());
			return self
				.ctx
				.transitioner
				.transition(order, OrderState::FailedAfterSuccessfulRequest)
				.await;
		};

		let connector = match self.ctx.connector(order) {
			Ok(connector) => connector,
			Err(e) => {
				order.fault_message = Some(e.to_string());
				return self
					.ctx
					.transitioner
					.transition(order, OrderState::FailedAfterSuccessfulRequest)
					.await;
			},
		};

		match connector
			.get_instance(&instance_id, order.resource_type(), &order.requester)
			.await
		{
			Ok(instance) => match instance.state {
				InstanceState::Ready => {
					order.retry_count = 0;
					order.fault_message = None;
					self.ctx
						.transitioner
						.transition(order, OrderState::Fulfilled)
						.await
				},
				InstanceState::Failed => {
					order.fault_message = Some("Instance failed during provisioning".into());
					self.ctx
						.transitioner
						.transition(order, OrderState::FailedAfterSuccessfulRequest)
						.await
				},
				// Still provisioning, poll again next sweep
				InstanceState::Creating | InstanceState::Deleting => Ok(()),
			},
			Err(ConnectorError::NotFound(_)) => {
				order.retry_count = 0;
				self.ctx
					.transitioner
					.transition(order, OrderState::UnableToCheckStatus)
					.await
			},
			// A flaky status endpoint does not change the order's state
			Err(ConnectorError::Transient(_)) => Ok(()),
			Err(e) => {
				order.fault_message = Some(e.to_string());
				self.ctx
					.transitioner
					.transition(order, OrderState::FailedAfterSuccessfulRequest)
					.await
			},
		}
	}
}
