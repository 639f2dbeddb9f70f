//! Order types for the broker system.
//!
//! This module defines the order envelope that tracks one resource request
//! through its whole lifecycle, the finite set of lifecycle states, and the
//! tagged resource payloads carried by orders.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::Credential;

/// Represents one tracked request for a cloud resource.
///
/// An order is created by the API layer in the [`OrderState::Open`] state and
/// is driven through its lifecycle by the background processors. The resource
/// payload is immutable after creation; everything else is mutated only by the
/// processor that owns the order's current state, under the per-order lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
	/// Unique identifier for this order, assigned at creation.
	pub id: String,
	/// Current lifecycle state.
	pub state: OrderState,
	/// The already-validated credential of the requesting user.
	pub requester: Credential,
	/// Target cloud provider key. Resolved by the open processor when the
	/// request did not name one.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub provider: Option<String>,
	/// Provider-side instance id, set once provisioning succeeds.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub instance_id: Option<String>,
	/// Resource-specific request parameters. Immutable after creation.
	pub spec: ResourceSpec,
	/// Timestamp when this order was created (unix seconds).
	pub created_at: u64,
	/// Timestamp of the last state transition (unix seconds).
	pub last_transition_at: u64,
	/// Consecutive recoverable failures seen by the owning processor.
	pub retry_count: u32,
	/// Summary of the last error, surfaced to clients on get.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub fault_message: Option<String>,
}

impl Order {
	/// Creates a new order in the [`OrderState::Open`] state.
	pub fn new(spec: ResourceSpec, requester: Credential, provider: Option<String>) -> Self {
		let now = crate::now_secs();
		Self {
			id: uuid::Uuid::new_v4().to_string(),
			state: OrderState::Open,
			requester,
			provider,
			instance_id: None,
			spec,
			created_at: now,
			last_transition_at: now,
			retry_count: 0,
			fault_message: None,
		}
	}

	/// Returns the resource type of this order's payload.
	pub fn resource_type(&self) -> ResourceType {
		self.spec.resource_type()
	}
}

/// The kind of cloud resource an order requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResourceType {
	Compute,
	Network,
	Volume,
	Attachment,
}

impl fmt::Display for ResourceType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ResourceType::Compute => write!(f, "compute"),
			ResourceType::Network => write!(f, "network"),
			ResourceType::Volume => write!(f, "volume"),
			ResourceType::Attachment => write!(f, "attachment"),
		}
	}
}

/// Resource-specific request parameters.
///
/// One tagged variant per resource type, replacing a subtype hierarchy:
/// behavior that varies by resource is a `match` over this tag in the
/// relevant processor or connector call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ResourceSpec {
	/// A virtual machine request.
	#[serde(rename_all = "camelCase")]
	Compute {
		vcpus: u32,
		memory_mb: u64,
		disk_gb: u64,
		image_id: String,
	},
	/// A private network request.
	#[serde(rename_all = "camelCase")]
	Network {
		cidr: String,
		allocation_mode: NetworkAllocationMode,
	},
	/// A block storage volume request.
	#[serde(rename_all = "camelCase")]
	Volume { size_gb: u64 },
	/// A request to attach a provisioned volume to a provisioned compute.
	#[serde(rename_all = "camelCase")]
	Attachment {
		compute_order_id: String,
		volume_order_id: String,
		#[serde(skip_serializing_if = "Option::is_none")]
		device: Option<String>,
	},
}

impl ResourceSpec {
	/// Returns the resource type tag of this payload.
	pub fn resource_type(&self) -> ResourceType {
		match self {
			ResourceSpec::Compute { .. } => ResourceType::Compute,
			ResourceSpec::Network { .. } => ResourceType::Network,
			ResourceSpec::Volume { .. } => ResourceType::Volume,
			ResourceSpec::Attachment { .. } => ResourceType::Attachment,
		}
	}
}

/// Address assignment mode for network orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NetworkAllocationMode {
	Dynamic,
	Static,
}

/// Lifecycle state of an order.
///
/// The happy path is Open -> Selected -> Spawning -> Fulfilled, with
/// Closing -> Closed on deletion. Failure branches are re-entrant back to
/// Spawning/Fulfilled on recovery; Closed and Failed are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OrderState {
	/// Created, waiting for a provider to be selected.
	Open,
	/// Provider selected, waiting for the provisioning request to be issued.
	Selected,
	/// Provisioning requested, waiting for the instance to become ready.
	Spawning,
	/// Instance is ready; health is re-checked periodically.
	Fulfilled,
	/// Deletion requested, waiting for the instance to be removed.
	Closing,
	/// Instance deleted; the order is reaped. Terminal.
	Closed,
	/// The provider rejected the provisioning request.
	FailedOnRequest,
	/// The instance failed after it had been successfully requested.
	FailedAfterSuccessfulRequest,
	/// The provider could not be queried for the instance's status.
	UnableToCheckStatus,
	/// Unrecoverable failure with no provider contact required. Terminal.
	Failed,
}

impl OrderState {
	/// Returns true for states with no outgoing transitions.
	pub fn is_terminal(&self) -> bool {
		matches!(self, OrderState::Closed | OrderState::Failed)
	}

	/// All states, in lifecycle order. Used to build the queue registry and
	/// to enumerate persisted orders at recovery.
	pub fn all() -> [OrderState; 10] {
		[
			OrderState::Open,
			OrderState::Selected,
			OrderState::Spawning,
			OrderState::Fulfilled,
			OrderState::Closing,
			OrderState::Closed,
			OrderState::FailedOnRequest,
			OrderState::FailedAfterSuccessfulRequest,
			OrderState::UnableToCheckStatus,
			OrderState::Failed,
		]
	}
}

impl fmt::Display for OrderState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			OrderState::Open => "OPEN",
			OrderState::Selected => "SELECTED",
			OrderState::Spawning => "SPAWNING",
			OrderState::Fulfilled => "FULFILLED",
			OrderState::Closing => "CLOSING",
			OrderState::Closed => "CLOSED",
			OrderState::FailedOnRequest => "FAILED_ON_REQUEST",
			OrderState::FailedAfterSuccessfulRequest => "FAILED_AFTER_SUCCESSFUL_REQUEST",
			OrderState::UnableToCheckStatus => "UNABLE_TO_CHECK_STATUS",
			OrderState::Failed => "FAILED",
		};
		write!(f, "{}", name)
	}
}

/// Order summary for API listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderStatusSummary {
	/// Unique identifier for this order.
	pub id: String,
	/// Resource type of the order's payload.
	pub resource_type: ResourceType,
	/// Current lifecycle state.
	pub state: OrderState,
	/// Provider the order was routed to, if already selected.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub provider: Option<String>,
}

#[cfg(test)]
mod tests {
	use super::*;

	fn compute_spec() -> ResourceSpec {
		ResourceSpec::Compute {
			vcpus: 2,
			memory_mb: 2048,
			disk_gb: 20,
			image_id: "ubuntu-24.04".into(),
		}
	}

	#[test]
	fn new_order_starts_open() {
		let order = Order::new(compute_spec(), Credential::new("alice", "local"), None);
		assert_eq!(order.state, OrderState::Open);
		assert_eq!(order.resource_type(), ResourceType::Compute);
		assert!(order.instance_id.is_none());
		assert_eq!(order.retry_count, 0);
	}

	#[test]
	fn terminal_states() {
		for state in OrderState::all() {
			let terminal = matches!(state, OrderState::Closed | OrderState::Failed);
			assert_eq!(state.is_terminal(), terminal, "{}", state);
		}
	}

	#[test]
	fn order_roundtrips_through_json() {
		let order = Order::new(
			ResourceSpec::Attachment {
				compute_order_id: "c-1".into(),
				volume_order_id: "v-1".into(),
				device: Some("/dev/sdb".into()),
			},
			Credential::new("bob", "local"),
			Some("emulated".into()),
		);
		let json = serde_json::to_string(&order).unwrap();
		let back: Order = serde_json::from_str(&json).unwrap();
		assert_eq!(back.id, order.id);
		assert_eq!(back.state, OrderState::Open);
		assert_eq!(back.resource_type(), ResourceType::Attachment);
	}
}
