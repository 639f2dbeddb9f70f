//! Common types module for the cloud broker.
//!
//! This module defines the core data types and structures shared by all
//! broker components: the order envelope and its lifecycle states, the
//! connector-facing instance model, credential and quota value objects,
//! and the configuration validation framework.

/// Allocation and quota accounting value objects.
pub mod allocation;
/// Already-validated local credential carried by orders.
pub mod credential;
/// The connector's view of a provisioned cloud resource.
pub mod instance;
/// The order envelope, lifecycle states, and resource payloads.
pub mod order;
/// Registry trait for self-registering implementations.
pub mod registry;
/// Utility helpers shared across crates.
pub mod utils;
/// Configuration validation types for type-safe implementation configs.
pub mod validation;

// Re-export all types for convenient access
pub use allocation::*;
pub use credential::*;
pub use instance::*;
pub use order::*;
pub use registry::*;
pub use utils::{now_secs, truncate_id};
pub use validation::*;
