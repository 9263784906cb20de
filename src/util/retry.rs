//! Generic retry runner for gateway calls

use std::future::Future;
use std::time::{Duration, Instant};

use rand::Rng;

use crate::config::RetryConfig;
use crate::error::Error;

/// Backoff and bounds applied to a retried call.
///
/// A retry cycle stops on the first of: success, a non-retryable error,
/// `max_retries` exhausted, or the overall `timeout` elapsed.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
	pub min_backoff: Duration,
	pub max_backoff: Duration,
	pub factor: f64,
	pub jitter: f64,
	pub max_retries: u32,
	pub timeout: Duration,
}

impl Default for RetryPolicy {
	fn default() -> Self {
		Self {
			min_backoff: Duration::from_secs(1),
			max_backoff: Duration::from_secs(300),
			factor: 1.5,
			jitter: 0.1,
			max_retries: 5,
			timeout: Duration::from_secs(300),
		}
	}
}

impl RetryPolicy {
	pub fn from_config(config: &RetryConfig) -> Self {
		Self {
			min_backoff: Duration::from_millis(config.min_backoff_ms),
			max_backoff: Duration::from_millis(config.max_backoff_ms),
			factor: config.factor,
			jitter: config.jitter,
			max_retries: config.max_retries,
			timeout: Duration::from_secs(config.timeout_s),
		}
	}

	/// Backoff before retry number `retry` (0-based), jittered
	fn backoff(&self, retry: u32) -> Duration {
		let base = self.min_backoff.as_secs_f64() * self.factor.powi(retry as i32);
		let capped = base.min(self.max_backoff.as_secs_f64());
		let jittered = if self.jitter > 0.0 {
			capped * (1.0 + rand::thread_rng().gen_range(-self.jitter..=self.jitter))
		} else {
			capped
		};
		Duration::from_secs_f64(jittered.max(0.0))
	}
}

/// Run `attempt` under `policy`, retrying while the returned error is
/// retryable. `on_retry` runs before each re-attempt and may mutate
/// gateway state (destination host failover); it is never invoked for a
/// terminal error.
pub async fn retry_call<T, F, Fut, H>(
	policy: &RetryPolicy,
	describe: &str,
	mut attempt: F,
	mut on_retry: H,
) -> Result<T, Error>
where
	F: FnMut() -> Fut,
	Fut: Future<Output = Result<T, Error>>,
	H: FnMut(&Error),
{
	let deadline = Instant::now() + policy.timeout;
	let mut retries = 0u32;
	loop {
		let err = match attempt().await {
			Ok(v) => return Ok(v),
			Err(e) if !e.retryable() => return Err(e),
			Err(e) => e,
		};

		if retries >= policy.max_retries {
			warn!("{}: giving up after {} retries: {}", describe, retries, err);
			return Err(err);
		}

		let delay = policy.backoff(retries);
		if Instant::now() + delay >= deadline {
			warn!("{}: giving up, retry timeout exhausted: {}", describe, err);
			return Err(err);
		}

		retries += 1;
		debug!(
			"{}: attempt {} failed ({}), retrying in {:?}",
			describe, retries, err, delay
		);
		on_retry(&err);
		tokio::time::sleep(delay).await;
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::error::Origin;
	use std::sync::atomic::{AtomicU32, Ordering};

	fn fast_policy() -> RetryPolicy {
		RetryPolicy {
			min_backoff: Duration::from_millis(1),
			max_backoff: Duration::from_millis(5),
			factor: 2.0,
			jitter: 0.0,
			max_retries: 3,
			timeout: Duration::from_secs(5),
		}
	}

	#[tokio::test]
	async fn test_retries_transient_until_success() {
		let attempts = AtomicU32::new(0);
		let res = retry_call(
			&fast_policy(),
			"test call",
			|| {
				let n = attempts.fetch_add(1, Ordering::SeqCst);
				async move {
					if n < 2 {
						Err(Error::transient(Origin::Target, "flaky"))
					} else {
						Ok(n)
					}
				}
			},
			|_| (),
		)
		.await;
		assert_eq!(res.unwrap(), 2);
		assert_eq!(attempts.load(Ordering::SeqCst), 3);
	}

	#[tokio::test]
	async fn test_terminal_error_not_retried() {
		let attempts = AtomicU32::new(0);
		let hooks = AtomicU32::new(0);
		let res: Result<(), _> = retry_call(
			&fast_policy(),
			"test call",
			|| {
				attempts.fetch_add(1, Ordering::SeqCst);
				async { Err(Error::PermanentTarget("bad storage class".into())) }
			},
			|_| {
				hooks.fetch_add(1, Ordering::SeqCst);
			},
		)
		.await;
		assert!(matches!(res, Err(Error::PermanentTarget(_))));
		assert_eq!(attempts.load(Ordering::SeqCst), 1);
		assert_eq!(hooks.load(Ordering::SeqCst), 0);
	}

	#[tokio::test]
	async fn test_max_retries_exhausted() {
		let attempts = AtomicU32::new(0);
		let hooks = AtomicU32::new(0);
		let res: Result<(), _> = retry_call(
			&fast_policy(),
			"test call",
			|| {
				attempts.fetch_add(1, Ordering::SeqCst);
				async { Err(Error::transient(Origin::Source, "still down")) }
			},
			|_| {
				hooks.fetch_add(1, Ordering::SeqCst);
			},
		)
		.await;
		assert!(matches!(res, Err(Error::Transient(Origin::Source, _))));
		// 1 initial attempt + max_retries re-attempts
		assert_eq!(attempts.load(Ordering::SeqCst), 4);
		assert_eq!(hooks.load(Ordering::SeqCst), 3);
	}

	#[test]
	fn test_backoff_growth_and_cap() {
		let policy = RetryPolicy {
			min_backoff: Duration::from_millis(100),
			max_backoff: Duration::from_millis(350),
			factor: 2.0,
			jitter: 0.0,
			max_retries: 10,
			timeout: Duration::from_secs(60),
		};
		assert_eq!(policy.backoff(0), Duration::from_millis(100));
		assert_eq!(policy.backoff(1), Duration::from_millis(200));
		assert_eq!(policy.backoff(2), Duration::from_millis(350));
		assert_eq!(policy.backoff(8), Duration::from_millis(350));
	}
}
