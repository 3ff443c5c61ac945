// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Retry policies for Redis round trips.
//!
//! | Policy | Used by | Attempts | Delay |
//! |--------|---------|----------|-------|
//! | [`RetryConfig::startup`] | `RedisStore` connect | 5 | 200ms doubling to 2s |
//! | [`RetryConfig::query`] | commands, scripts, pipelines | 3 | 100ms doubling to 2s |
//! | [`RetryConfig::fixed`] | expiration listener resubscribe | unbounded | constant |
//!
//! ```
//! use cache_sync::RetryConfig;
//! use std::time::Duration;
//!
//! let listener = RetryConfig::fixed(Duration::from_secs(5));
//! assert_eq!(listener.max_retries, None);
//! assert_eq!(listener.next_delay(listener.initial_delay), Duration::from_secs(5));
//! ```

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
    /// Total attempts before the last error is returned. `None` never stops.
    pub max_retries: Option<usize>,
}

impl RetryConfig {
    /// Opening the Redis connection. A bad URL surfaces within a few seconds.
    #[must_use]
    pub fn startup() -> Self {
        Self {
            max_retries: Some(5),
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
            factor: 2.0,
        }
    }

    /// A single command or script call on an open connection.
    #[must_use]
    pub fn query() -> Self {
        Self {
            max_retries: Some(3),
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            factor: 2.0,
        }
    }

    /// Same delay every time, forever.
    #[must_use]
    pub fn fixed(delay: Duration) -> Self {
        Self {
            max_retries: None,
            initial_delay: delay,
            max_delay: delay,
            factor: 1.0,
        }
    }

    /// Delay to wait after `current` has elapsed.
    #[must_use]
    pub fn next_delay(&self, current: Duration) -> Duration {
        current.mul_f64(self.factor).min(self.max_delay)
    }

    fn exhausted(&self, attempts: usize) -> bool {
        self.max_retries.is_some_and(|max| attempts >= max)
    }
}

/// Run `operation` until it succeeds or the policy gives up, returning the
/// last error in that case.
pub async fn retry<F, Fut, T, E>(
    operation_name: &str,
    config: &RetryConfig,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut delay = config.initial_delay;
    let mut attempts = 0;

    loop {
        let err = match operation().await {
            Ok(value) => {
                if attempts > 0 {
                    info!(operation = operation_name, retries = attempts, "Redis operation recovered");
                }
                return Ok(value);
            }
            Err(err) => err,
        };
        attempts += 1;
        if config.exhausted(attempts) {
            return Err(err);
        }
        warn!(
            operation = operation_name,
            attempt = attempts,
            max_attempts = ?config.max_retries,
            error = %err,
            next_in = ?delay,
            "Redis operation failed, retrying"
        );
        sleep(delay).await;
        delay = config.next_delay(delay);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn fast(attempts: usize) -> RetryConfig {
        RetryConfig {
            max_retries: Some(attempts),
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            factor: 2.0,
        }
    }

    /// Fails the first `failures` calls with a connection error.
    fn flaky_command(
        calls: Arc<AtomicUsize>,
        failures: usize,
    ) -> impl FnMut() -> std::future::Ready<Result<&'static str, String>> {
        move || {
            let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
            std::future::ready(if call <= failures {
                Err(format!("connection reset (call {})", call))
            } else {
                Ok("OK")
            })
        }
    }

    #[tokio::test]
    async fn test_first_success_makes_one_call() {
        let calls = Arc::new(AtomicUsize::new(0));
        let reply = retry("redis_set", &fast(3), flaky_command(calls.clone(), 0)).await;
        assert_eq!(reply, Ok("OK"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_script_call_recovers_within_budget() {
        let calls = Arc::new(AtomicUsize::new(0));
        let reply = retry("redis_marker_script", &fast(3), flaky_command(calls.clone(), 2)).await;
        assert_eq!(reply, Ok("OK"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_budget_returns_last_error() {
        let calls = Arc::new(AtomicUsize::new(0));
        let reply = retry("redis_connect", &fast(3), flaky_command(calls.clone(), 10)).await;
        assert_eq!(reply, Err("connection reset (call 3)".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_fixed_policy_keeps_going() {
        let calls = Arc::new(AtomicUsize::new(0));
        let reply = retry(
            "listener_subscribe",
            &RetryConfig::fixed(Duration::from_millis(1)),
            flaky_command(calls.clone(), 7),
        )
        .await;
        assert_eq!(reply, Ok("OK"));
        assert_eq!(calls.load(Ordering::SeqCst), 8);
    }

    #[test]
    fn test_connect_gives_up_before_commands() {
        let startup = RetryConfig::startup();
        let query = RetryConfig::query();
        assert_eq!(startup.max_retries, Some(5));
        assert_eq!(query.max_retries, Some(3));
        assert!(startup.initial_delay > query.initial_delay);
        assert!(startup.exhausted(5));
        assert!(!query.exhausted(2));
    }

    #[test]
    fn test_query_backoff_doubles_then_caps() {
        let config = RetryConfig::query();
        let delays: Vec<Duration> = std::iter::successors(Some(config.initial_delay), |d| {
            Some(config.next_delay(*d))
        })
        .take(6)
        .collect();
        assert_eq!(
            delays,
            [100, 200, 400, 800, 1600, 2000].map(Duration::from_millis).to_vec()
        );
    }

    #[test]
    fn test_fixed_delay_never_grows() {
        let config = RetryConfig::fixed(Duration::from_millis(250));
        assert!(!config.exhausted(usize::MAX));
        let mut delay = config.initial_delay;
        for _ in 0..5 {
            delay = config.next_delay(delay);
            assert_eq!(delay, Duration::from_millis(250));
        }
    }
}
