use std::fmt;

/// The error kinds from the engine's error-handling design.
///
/// These are orthogonal to the `anyhow::Error` message chain: a `TileError`
/// is attached to the chain via `anyhow::Error::new` or `.context(...)` and
/// recovered with [`error_kind`] at the few points that branch on kind
/// (a source's `on_error` policy, the dispatcher's HTTP status mapping).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileErrorKind {
	/// Request bbox entirely outside the grid bounds, or no level satisfies
	/// the stretch/shrink limits. Callers turn this into a blank tile, not
	/// an error response.
	InvalidRequest,
	/// Upstream timeout, HTTP 5xx, connection reset.
	SourceTransient,
	/// Upstream HTTP 4xx, non-image body, unparseable response.
	SourcePermanent,
	/// Storage backend rejected a write because it is full.
	BackendFull,
	/// Storage backend could not be reached.
	BackendUnavailable,
	/// A meta-tile lock could not be acquired within its timeout.
	LockTimeout,
	/// A configuration invariant was violated (programmer/config error).
	ConfigurationInvariantViolated,
	/// The authorization callback denied the request.
	Unauthorized,
	/// The authorization callback requires authentication.
	Unauthenticated,
}

impl fmt::Display for TileErrorKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let text = match self {
			TileErrorKind::InvalidRequest => "invalid request",
			TileErrorKind::SourceTransient => "transient source error",
			TileErrorKind::SourcePermanent => "permanent source error",
			TileErrorKind::BackendFull => "storage backend full",
			TileErrorKind::BackendUnavailable => "storage backend unavailable",
			TileErrorKind::LockTimeout => "meta-tile lock timeout",
			TileErrorKind::ConfigurationInvariantViolated => "configuration invariant violated",
			TileErrorKind::Unauthorized => "unauthorized",
			TileErrorKind::Unauthenticated => "unauthenticated",
		};
		write!(f, "{text}")
	}
}

/// A typed error carrying a [`TileErrorKind`], stored inside an
/// `anyhow::Error` chain alongside the usual formatted context.
#[derive(Debug)]
pub struct TileError {
	kind: TileErrorKind,
	message: String,
}

impl TileError {
	pub fn new(kind: TileErrorKind, message: impl Into<String>) -> Self {
		Self { kind, message: message.into() }
	}

	pub fn kind(&self) -> TileErrorKind {
		self.kind
	}
}

impl fmt::Display for TileError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}: {}", self.kind, self.message)
	}
}

impl std::error::Error for TileError {}

/// Converts a `TileErrorKind` directly into an `anyhow::Error` with a
/// default message equal to the kind's `Display`.
pub fn tile_error(kind: TileErrorKind, message: impl Into<String>) -> anyhow::Error {
	anyhow::Error::new(TileError::new(kind, message))
}

/// Looks up the `TileErrorKind` carried somewhere in an `anyhow::Error`'s
/// cause chain, if any `.context(...)` call wrapped a [`TileError`].
pub fn error_kind(err: &anyhow::Error) -> Option<TileErrorKind> {
	err.chain().find_map(|cause| cause.downcast_ref::<TileError>()).map(TileError::kind)
}

#[cfg(test)]
mod tests {
	use super::*;
	use anyhow::Context;

	#[test]
	fn kind_survives_context_wrapping() {
		let err: anyhow::Result<()> = Err(tile_error(TileErrorKind::LockTimeout, "held for 30s"));
		let wrapped = err.context("creating meta-tile (3, 1, 2)").unwrap_err();
		assert_eq!(error_kind(&wrapped), Some(TileErrorKind::LockTimeout));
		assert_eq!(
			wrapped.to_string(),
			"creating meta-tile (3, 1, 2)"
		);
		assert_eq!(
			wrapped.chain().last().unwrap().to_string(),
			"meta-tile lock timeout: held for 30s"
		);
	}

	#[test]
	fn kind_absent_for_plain_errors() {
		let err = anyhow::anyhow!("some other failure");
		assert_eq!(error_kind(&err), None);
	}
}
