//! Meta-tile locking (spec §4.6, §5, §6 "Persisted state"): advisory,
//! filesystem-based exclusive locks keyed by meta-tile identity, shared by
//! every backend so that co-located processes coordinate regardless of
//! where the tile bytes actually live.

use anyhow::{Context, Result};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tilecache_derive::context;

const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(5 * 60);
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Guards the tile-lock directory for one cache. Lock files older than
/// `stale_after` are assumed to belong to a crashed worker and reclaimed.
#[derive(Debug, Clone)]
pub struct LockManager {
	dir: PathBuf,
	stale_after: Duration,
	poll_interval: Duration,
}

/// A held meta-tile lock. Releases on drop.
pub struct MetaTileLock {
	path: PathBuf,
}

impl Drop for MetaTileLock {
	fn drop(&mut self) {
		if let Err(err) = std::fs::remove_file(&self.path) {
			if err.kind() != ErrorKind::NotFound {
				log::warn!("failed to release lock file {:?}: {err}", self.path);
			}
		}
	}
}

impl LockManager {
	pub fn new(dir: impl Into<PathBuf>) -> Self {
		Self { dir: dir.into(), stale_after: DEFAULT_STALE_AFTER, poll_interval: DEFAULT_POLL_INTERVAL }
	}

	#[must_use]
	pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
		self.stale_after = stale_after;
		self
	}

	pub fn directory(&self) -> &Path {
		&self.dir
	}

	fn lock_path(&self, key: &str) -> PathBuf {
		let sanitized: String = key.chars().map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' }).collect();
		self.dir.join(format!("{sanitized}.lock"))
	}

	/// Blocks until the lock for `key` (a meta-tile identity string) is
	/// acquired, reclaiming it first if a prior holder's lock file is
	/// older than `stale_after`.
	#[context("acquiring meta-tile lock for {key}")]
	pub async fn acquire(&self, key: &str) -> Result<MetaTileLock> {
		std::fs::create_dir_all(&self.dir).context("creating tile-lock directory")?;
		let path = self.lock_path(key);

		loop {
			match std::fs::OpenOptions::new().create_new(true).write(true).open(&path) {
				Ok(_) => return Ok(MetaTileLock { path }),
				Err(err) if err.kind() == ErrorKind::AlreadyExists => {
					if self.is_stale(&path) {
						log::warn!("reclaiming stale lock file {path:?}");
						let _ = std::fs::remove_file(&path);
						continue;
					}
					tokio::time::sleep(self.poll_interval).await;
				}
				Err(err) => return Err(err).context("creating lock file"),
			}
		}
	}

	fn is_stale(&self, path: &Path) -> bool {
		let Ok(metadata) = std::fs::metadata(path) else { return false };
		let Ok(modified) = metadata.modified() else { return false };
		SystemTime::now().duration_since(modified).map(|age| age > self.stale_after).unwrap_or(false)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn acquire_then_drop_allows_reacquisition() {
		let dir = tempfile::tempdir().unwrap();
		let manager = LockManager::new(dir.path());
		let lock = manager.acquire("cache:0:1:2").await.unwrap();
		drop(lock);
		let _second = manager.acquire("cache:0:1:2").await.unwrap();
	}

	#[tokio::test]
	async fn stale_lock_is_reclaimed() {
		let dir = tempfile::tempdir().unwrap();
		let manager = LockManager::new(dir.path()).with_stale_after(Duration::from_millis(0));
		let first = manager.acquire("cache:0:0:0").await.unwrap();
		std::mem::forget(first); // simulate a crashed holder: lock file stays behind
		let second = manager.acquire("cache:0:0:0").await.unwrap();
		drop(second);
	}

	#[tokio::test]
	async fn distinct_keys_do_not_contend() {
		let dir = tempfile::tempdir().unwrap();
		let manager = LockManager::new(dir.path());
		let a = manager.acquire("cache:0:0:0").await.unwrap();
		let b = manager.acquire("cache:0:1:0").await.unwrap();
		drop(a);
		drop(b);
	}
}
