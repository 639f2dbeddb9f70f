//! Health checks for fulfilled orders.

use super::{Processor, ProcessorContext};
use crate::state::TransitionError;
use async_trait::async_trait;
use broker_connector::ConnectorError;
use broker_types::{InstanceState, Order, OrderState};
use std::time::Duration;

/// Re-checks each fulfilled order's instance and reroutes unhealthy ones.
pub struct FulfilledProcessor {
	ctx: ProcessorContext,
}

impl FulfilledProcessor {
	pub fn new(ctx: ProcessorContext) -> Self {
		Self { ctx }
	}
}

#[async_trait]
impl Processor for FulfilledProcessor {
	fn name(&self) -> &'static str {
		"fulfilled"
	}

	fn owned_state(&self) -> OrderState {
		OrderState::Fulfilled
	}

	fn interval(&self) -> Duration {
		Duration::from_secs(self.ctx.config.fulfilled_interval_secs)
	}

	async fn process(&self, order: &mut Order) -> Result<(), TransitionError> {
		let Some(instance_id) = order.instance_id.clone() else {
			order.fault_message = Some("Fulfilled order has no instance id".into());
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
				InstanceState::Ready => Ok(()),
				InstanceState::Failed => {
					order.retry_count = 0;
					order.fault_message = Some("Instance reported failed".into());
					self.ctx
						.transitioner
						.transition(order, OrderState::FailedAfterSuccessfulRequest)
						.await
				},
				// Unexpected while fulfilled; watch it from the unable queue
				InstanceState::Creating | InstanceState::Deleting => {
					order.retry_count = 0;
					self.ctx
						.transitioner
						.transition(order, OrderState::UnableToCheckStatus)
						.await
				},
			},
			Err(ConnectorError::NotFound(_)) | Err(ConnectorError::Transient(_)) => {
				order.retry_count = 0;
				self.ctx
					.transitioner
					.transition(order, OrderState::UnableToCheckStatus)
					.await
			},
			Err(e) => {
				order.retry_count = 0;
				order.fault_message = Some(e.to_string());
				self.ctx
					.transitioner
					.transition(order, OrderState::FailedAfterSuccessfulRequest)
					.await
			},
		}
	}
}
