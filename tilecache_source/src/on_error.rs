//! Maps an HTTP status (or timeout / non-image body) to a substitute
//! response (spec §4.5, §6 `source.tile.on_error`, §7 SourceTransient /
//! SourcePermanent).

use crate::source::ErrorResponse;
use std::collections::HashMap;
use std::fmt;

/// Carries a resolved `on_error` substitution up through the `anyhow` error
/// chain instead of swallowing it into a plain `Ok(image)`, so a caller
/// that manages storage (the meta-tile manager) can apply
/// `authorize_stale`/`cache` itself rather than the source silently
/// deciding on its behalf (spec §7 "serve stale").
#[derive(Debug, Clone)]
pub struct OnErrorFallback(pub ErrorResponse);

impl fmt::Display for OnErrorFallback {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "source call failed; on_error policy resolved a substitute response")
	}
}

impl std::error::Error for OnErrorFallback {}

/// Wraps a resolved `on_error` response as an `anyhow::Error` carrying an
/// [`OnErrorFallback`], recoverable via `err.chain().find_map(...)`.
pub fn fallback_error(response: ErrorResponse) -> anyhow::Error {
	anyhow::Error::new(OnErrorFallback(response))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKey {
	Status(u16),
	Other,
}

#[derive(Debug, Clone, Default)]
pub struct OnErrorPolicy {
	responses: HashMap<ErrorKey, ErrorResponse>,
}

impl OnErrorPolicy {
	pub fn new() -> Self {
		Self::default()
	}

	#[must_use]
	pub fn with_status(mut self, status: u16, response: ErrorResponse) -> Self {
		self.responses.insert(ErrorKey::Status(status), response);
		self
	}

	#[must_use]
	pub fn with_other(mut self, response: ErrorResponse) -> Self {
		self.responses.insert(ErrorKey::Other, response);
		self
	}

	/// Looks up the configured response for `status`, falling back to the
	/// `other` entry. `None` means the error is not remapped: the caller
	/// should surface it as a service exception (spec §7).
	pub fn resolve(&self, status: Option<u16>) -> Option<&ErrorResponse> {
		if let Some(status) = status {
			if let Some(response) = self.responses.get(&ErrorKey::Status(status)) {
				return Some(response);
			}
		}
		self.responses.get(&ErrorKey::Other)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn exact_status_match_wins_over_other() {
		let policy = OnErrorPolicy::new().with_status(404, ErrorResponse::transparent()).with_other(ErrorResponse { color: Some([255, 0, 0, 255]), cache: false, authorize_stale: false });
		let resolved = policy.resolve(Some(404)).unwrap();
		assert!(resolved.color.is_none());
	}

	#[test]
	fn unmatched_status_falls_back_to_other() {
		let policy = OnErrorPolicy::new().with_other(ErrorResponse::transparent());
		assert!(policy.resolve(Some(503)).is_some());
	}

	#[test]
	fn no_policy_entries_resolve_to_none() {
		let policy = OnErrorPolicy::new();
		assert!(policy.resolve(Some(500)).is_none());
		assert!(policy.resolve(None).is_none());
	}
}
