//! Utility helpers shared across broker crates.

use std::time::{SystemTime, UNIX_EPOCH};

/// Utility function to truncate an order id for display purposes.
///
/// Shows only the first 8 characters followed by ".." for longer strings.
pub fn truncate_id(id: &str) -> String {
	if id.len() <= 8 {
		id.to_string()
	} else {
		format!("{}..", &id[..8])
	}
}

/// Current unix time in seconds.
///
/// Falls back to zero if the clock is before the epoch, which only happens
/// on a badly misconfigured host.
pub fn now_secs() -> u64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.map(|d| d.as_secs())
		.unwrap_or(0)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn truncates_long_ids() {
		assert_eq!(truncate_id("abcd"), "abcd");
		assert_eq!(truncate_id("abcdefgh"), "abcdefgh");
		assert_eq!(truncate_id("abcdefghi"), "abcdefgh..");
	}
}
