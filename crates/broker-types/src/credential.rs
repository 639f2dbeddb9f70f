//! Credential types for the broker system.
//!
//! The broker never validates identity itself; it receives an
//! already-validated local credential from the federation layer and hands it
//! to connectors when provisioning.

use serde::{Deserialize, Serialize};
use std::fmt;

/// An already-validated local credential.
///
/// Carried by every order and passed to each connector call. The token is
/// redacted from Debug output so it never reaches logs.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Credential {
	/// The requesting user's id.
	pub user_id: String,
	/// The identity provider that validated this credential.
	pub identity_provider_id: String,
	/// Opaque provider-side token, if one is required by the connector.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub token: Option<String>,
}

impl Credential {
	/// Creates a credential without a provider token.
	pub fn new(user_id: impl Into<String>, identity_provider_id: impl Into<String>) -> Self {
		Self {
			user_id: user_id.into(),
			identity_provider_id: identity_provider_id.into(),
			token: None,
		}
	}

	/// Attaches a provider token to this credential.
	pub fn with_token(mut self, token: impl Into<String>) -> Self {
		self.token = Some(token.into());
		self
	}
}

impl fmt::Debug for Credential {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Credential")
			.field("user_id", &self.user_id)
			.field("identity_provider_id", &self.identity_provider_id)
			.field("token", &self.token.as_ref().map(|_| "***REDACTED***"))
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn debug_redacts_token() {
		let credential = Credential::new("alice", "local").with_token("super-secret");
		let debug = format!("{:?}", credential);
		assert!(!debug.contains("super-secret"));
		assert!(debug.contains("REDACTED"));
	}

	#[test]
	fn serialization_keeps_token() {
		let credential = Credential::new("alice", "local").with_token("tok");
		let json = serde_json::to_string(&credential).unwrap();
		let back: Credential = serde_json::from_str(&json).unwrap();
		assert_eq!(back.token.as_deref(), Some("tok"));
	}
}
