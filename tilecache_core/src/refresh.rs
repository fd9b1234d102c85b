use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use time::OffsetDateTime;

/// The runtime form of `refresh_before` (spec §4.6/§9, supplemented): a
/// tile stored before the policy's epoch is stale and must be recomputed.
#[derive(Debug, Clone)]
pub enum RefreshPolicy {
	/// Tiles stored before this instant are stale.
	Absolute(SystemTime),
	/// Tiles older than `now - duration` are stale. The duration is
	/// resolved against the current time on every check, not once at
	/// construction.
	Relative(std::time::Duration),
	/// Tiles older than this file's mtime are stale. Re-read on every
	/// check so touching the file invalidates the whole cache without a
	/// restart.
	MtimeOfFile(PathBuf),
	/// No refresh policy: nothing is ever stale by time alone.
	Never,
}

impl RefreshPolicy {
	/// True if a tile stored at `stored` should be recomputed.
	pub fn is_stale(&self, stored: SystemTime) -> bool {
		match self {
			RefreshPolicy::Never => false,
			RefreshPolicy::Absolute(epoch) => stored < *epoch,
			RefreshPolicy::Relative(max_age) => match SystemTime::now().duration_since(stored) {
				Ok(age) => age > *max_age,
				Err(_) => false,
			},
			RefreshPolicy::MtimeOfFile(path) => match Self::mtime(path) {
				Some(epoch) => stored < epoch,
				// Missing lock file: nothing is fresher than it, so treat
				// as "no policy" rather than recomputing everything.
				None => false,
			},
		}
	}

	fn mtime(path: &Path) -> Option<SystemTime> {
		fs::metadata(path).and_then(|m| m.modified()).ok()
	}
}

/// Parses an RFC 3339 timestamp string into a `RefreshPolicy::Absolute`.
pub fn absolute_from_rfc3339(value: &str) -> anyhow::Result<RefreshPolicy> {
	let parsed = OffsetDateTime::parse(value, &time::format_description::well_known::Rfc3339)?;
	Ok(RefreshPolicy::Absolute(parsed.into()))
}
