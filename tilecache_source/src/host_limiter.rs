//! Per-upstream-host concurrency limiting shared across sources (spec §4.5
//! "Per-source `concurrent_requests`..."): all sources configured with the
//! same limit value for the same host draw from one semaphore.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// `limit == 0` means unbounded: no semaphore is created and `acquire`
/// returns immediately with no permit held.
#[derive(Default)]
pub struct HostLimiter {
	semaphores: DashMap<(String, usize), Arc<Semaphore>>,
}

pub enum HostPermit {
	Unbounded,
	Bounded(OwnedSemaphorePermit),
}

impl HostLimiter {
	pub fn new() -> Self {
		Self::default()
	}

	pub async fn acquire(&self, host: &str, limit: usize) -> HostPermit {
		if limit == 0 {
			return HostPermit::Unbounded;
		}
		let key = (host.to_string(), limit);
		let semaphore = self.semaphores.entry(key).or_insert_with(|| Arc::new(Semaphore::new(limit))).clone();
		let permit = semaphore.acquire_owned().await.expect("semaphore is never closed");
		HostPermit::Bounded(permit)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::{AtomicUsize, Ordering};
	use std::time::Duration;

	#[tokio::test]
	async fn unbounded_limit_never_blocks() {
		let limiter = HostLimiter::new();
		let _a = limiter.acquire("host", 0).await;
		let _b = limiter.acquire("host", 0).await;
	}

	#[tokio::test]
	async fn bounded_limit_serializes_excess_callers() {
		let limiter = Arc::new(HostLimiter::new());
		let in_flight = Arc::new(AtomicUsize::new(0));
		let max_seen = Arc::new(AtomicUsize::new(0));

		let mut handles = Vec::new();
		for _ in 0..5 {
			let limiter = limiter.clone();
			let in_flight = in_flight.clone();
			let max_seen = max_seen.clone();
			handles.push(tokio::spawn(async move {
				let _permit = limiter.acquire("upstream.example", 2).await;
				let current = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
				max_seen.fetch_max(current, Ordering::SeqCst);
				tokio::time::sleep(Duration::from_millis(20)).await;
				in_flight.fetch_sub(1, Ordering::SeqCst);
			}));
		}
		for handle in handles {
			handle.await.unwrap();
		}
		assert!(max_seen.load(Ordering::SeqCst) <= 2);
	}
}
