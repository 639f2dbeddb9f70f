//! Routes open orders to a provider.

use super::{Processor, ProcessorContext};
use crate::state::TransitionError;
use async_trait::async_trait;
use broker_types::{Order, OrderState};
use std::time::Duration;

/// Picks a provider for each open order and marks it selected.
pub struct OpenProcessor {
	ctx: ProcessorContext,
}

impl OpenProcessor {
	pub fn new(ctx: ProcessorContext) -> Self {
		Self { ctx }
	}
}

#[async_trait]
impl Processor for OpenProcessor {
	fn name(&self) -> &'static str {
		"open"
	}

	fn owned_state(&self) -> OrderState {
		OrderState::Open
	}

	fn interval(&self) -> Duration {
		Duration::from_secs(self.ctx.config.open_interval_secs)
	}

	async fn process(&self, order: &mut Order) -> Result<(), TransitionError> {
		let provider = order
			.provider
			.clone()
			.unwrap_or_else(|| self.ctx.connectors.default_provider().to_string());

		if self.ctx.connectors.get(&provider).is_err() {
			order.fault_message = Some(format!("Unknown provider '{}'", provider));
			return self
				.ctx
				.transitioner
				.transition(order, OrderState::Failed)
				.await;
		}

		order.provider = Some(provider);
		self.ctx
			.transitioner
			.transition(order, OrderState::Selected)
			.await
	}
}
