//! Instance types for the broker system.
//!
//! These types are the connector's view of a provisioned resource and are
//! used by the spawning/fulfilled processors to decide state transitions.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Provider-side state of a provisioned instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InstanceState {
	/// Still being provisioned by the cloud.
	Creating,
	/// Up and usable.
	Ready,
	/// The cloud reports the instance as broken.
	Failed,
	/// Deletion in progress.
	Deleting,
}

impl fmt::Display for InstanceState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			InstanceState::Creating => write!(f, "creating"),
			InstanceState::Ready => write!(f, "ready"),
			InstanceState::Failed => write!(f, "failed"),
			InstanceState::Deleting => write!(f, "deleting"),
		}
	}
}

/// A provisioned cloud resource as reported by a connector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudInstance {
	/// Provider-side instance id.
	pub id: String,
	/// Current provider-side state.
	pub state: InstanceState,
	/// Connection details (address, device path, gateway), surfaced to
	/// clients once the order is fulfilled.
	#[serde(default)]
	pub connection: HashMap<String, String>,
}

impl CloudInstance {
	/// Creates an instance report with no connection details.
	pub fn new(id: impl Into<String>, state: InstanceState) -> Self {
		Self {
			id: id.into(),
			state,
			connection: HashMap::new(),
		}
	}
}
