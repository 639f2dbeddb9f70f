//! Registry trait for self-registering implementations.
//!
//! Every pluggable implementation (storage backends, cloud connectors) must
//! provide a Registry struct implementing this trait, so the service binary
//! can build its factory maps without reflection.

/// Base trait for implementation registries.
///
/// Each implementation module declares the name it is referenced by in
/// configuration files, together with a factory function for creating
/// instances from a TOML value.
pub trait ImplementationRegistry {
	/// The name used in configuration files to reference this implementation,
	/// for example "memory" for `storage.implementations.memory` or
	/// "emulated" for `connectors.implementations.emulated`.
	const NAME: &'static str;

	/// The factory function type this implementation provides. Each module
	/// defines its own factory type (StorageFactory, ConnectorFactory, ...).
	type Factory;

	/// Returns the factory function for this implementation.
	fn factory() -> Self::Factory;
}
