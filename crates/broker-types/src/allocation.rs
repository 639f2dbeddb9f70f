//! Allocation and quota accounting for the broker system.
//!
//! Immutable value objects summing the capacity a user currently holds per
//! resource dimension. Availability is always derived (`total - used`) and
//! never persisted.

use serde::{Deserialize, Serialize};

use crate::{ResourceSpec, ResourceType};

/// Capacity held by compute orders.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComputeAllocation {
	pub instances: u64,
	pub vcpus: u64,
	pub memory_mb: u64,
	pub disk_gb: u64,
}

/// Capacity held by volume orders.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeAllocation {
	pub volumes: u64,
	pub storage_gb: u64,
}

/// Capacity held by network orders.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkAllocation {
	pub networks: u64,
}

/// Capacity held by attachment orders.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentAllocation {
	pub attachments: u64,
}

/// Allocation for one resource type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Allocation {
	Compute(ComputeAllocation),
	Volume(VolumeAllocation),
	Network(NetworkAllocation),
	Attachment(AttachmentAllocation),
}

impl Allocation {
	/// An empty allocation for the given resource type.
	pub fn empty(resource_type: ResourceType) -> Self {
		match resource_type {
			ResourceType::Compute => Allocation::Compute(ComputeAllocation::default()),
			ResourceType::Volume => Allocation::Volume(VolumeAllocation::default()),
			ResourceType::Network => Allocation::Network(NetworkAllocation::default()),
			ResourceType::Attachment => Allocation::Attachment(AttachmentAllocation::default()),
		}
	}

	/// Accumulates one fulfilled order's payload into this allocation.
	/// Payloads of a different resource type are ignored.
	pub fn accumulate(&mut self, spec: &ResourceSpec) {
		match (self, spec) {
			(
				Allocation::Compute(c),
				ResourceSpec::Compute {
					vcpus,
					memory_mb,
					disk_gb,
					..
				},
			) => {
				c.instances += 1;
				c.vcpus += u64::from(*vcpus);
				c.memory_mb += memory_mb;
				c.disk_gb += disk_gb;
			},
			(Allocation::Volume(v), ResourceSpec::Volume { size_gb }) => {
				v.volumes += 1;
				v.storage_gb += size_gb;
			},
			(Allocation::Network(n), ResourceSpec::Network { .. }) => {
				n.networks += 1;
			},
			(Allocation::Attachment(a), ResourceSpec::Attachment { .. }) => {
				a.attachments += 1;
			},
			_ => {},
		}
	}
}

/// Total/used capacity for one resource type, with derived availability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quota {
	pub total: Allocation,
	pub used: Allocation,
}

impl Quota {
	/// Derives the available capacity, saturating per dimension.
	pub fn available(&self) -> Allocation {
		match (self.total, self.used) {
			(Allocation::Compute(t), Allocation::Compute(u)) => {
				Allocation::Compute(ComputeAllocation {
					instances: t.instances.saturating_sub(u.instances),
					vcpus: t.vcpus.saturating_sub(u.vcpus),
					memory_mb: t.memory_mb.saturating_sub(u.memory_mb),
					disk_gb: t.disk_gb.saturating_sub(u.disk_gb),
				})
			},
			(Allocation::Volume(t), Allocation::Volume(u)) => Allocation::Volume(VolumeAllocation {
				volumes: t.volumes.saturating_sub(u.volumes),
				storage_gb: t.storage_gb.saturating_sub(u.storage_gb),
			}),
			(Allocation::Network(t), Allocation::Network(u)) => {
				Allocation::Network(NetworkAllocation {
					networks: t.networks.saturating_sub(u.networks),
				})
			},
			(Allocation::Attachment(t), Allocation::Attachment(u)) => {
				Allocation::Attachment(AttachmentAllocation {
					attachments: t.attachments.saturating_sub(u.attachments),
				})
			},
			// Mismatched dimensions never occur through the controller; treat
			// the total as fully available.
			(total, _) => total,
		}
	}
}
