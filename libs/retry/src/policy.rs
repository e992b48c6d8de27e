//! Backoff policy and retry loop.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::is_cancellation;
use crate::RetryError;

/// Decides whether a failure should be retried.
pub type RetryPredicate = Arc<dyn Fn(&anyhow::Error) -> bool + Send + Sync>;

/// Called before each retry with the failure, the retry number and the delay.
pub type RetryCallback = Arc<dyn Fn(&anyhow::Error, u32, Duration) + Send + Sync>;

/// Exponential backoff retry configuration.
#[derive(Clone)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt.
    pub count: u32,

    /// Delay before the first retry.
    pub initial_interval: Duration,

    /// Maximum delay.
    pub max_interval: Duration,

    /// Growth factor applied per retry.
    pub multiplier: f64,

    /// Jitter factor (0.0 to 1.0).
    pub randomization_factor: f64,

    /// Retry only failures this accepts. `None` retries everything.
    pub should_retry: Option<RetryPredicate>,

    /// Diagnostics hook invoked before each retry.
    pub on_retry: Option<RetryCallback>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            count: 3,
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(30),
            multiplier: 1.5,
            randomization_factor: 0.5,
            should_retry: None,
            on_retry: None,
        }
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("count", &self.count)
            .field("initial_interval", &self.initial_interval)
            .field("max_interval", &self.max_interval)
            .field("multiplier", &self.multiplier)
            .field("randomization_factor", &self.randomization_factor)
            .field("should_retry", &self.should_retry.is_some())
            .field("on_retry", &self.on_retry.is_some())
            .finish()
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn disabled() -> Self {
        Self {
            count: 0,
            ..Self::default()
        }
    }

    pub fn with_count(mut self, count: u32) -> Self {
        self.count = count;
        self
    }

    pub fn with_intervals(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_interval = initial;
        self.max_interval = max;
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn with_randomization_factor(mut self, factor: f64) -> Self {
        self.randomization_factor = factor;
        self
    }

    pub fn with_should_retry<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&anyhow::Error) -> bool + Send + Sync + 'static,
    {
        self.should_retry = Some(Arc::new(predicate));
        self
    }

    pub fn with_on_retry<F>(mut self, callback: F) -> Self
    where
        F: Fn(&anyhow::Error, u32, Duration) + Send + Sync + 'static,
    {
        self.on_retry = Some(Arc::new(callback));
        self
    }

    /// Un-jittered delay before retry number `attempt` (zero-based).
    ///
    /// A multiplier below one or not finite is treated as one.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let multiplier = if self.multiplier.is_finite() {
            self.multiplier.max(1.0)
        } else {
            1.0
        };
        let delay = self.initial_interval.as_secs_f64() * multiplier.powi(attempt as i32);
        self.capped(delay)
    }

    /// Range the jittered delay for retry number `attempt` falls in.
    ///
    /// A randomization factor that is not finite disables jitter.
    pub fn delay_bounds(&self, attempt: u32) -> (Duration, Duration) {
        let base = self.base_delay(attempt);
        let factor = if self.randomization_factor.is_finite() {
            self.randomization_factor.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let low = base.mul_f64(1.0 - factor);
        let high = self.capped(base.as_secs_f64() * (1.0 + factor)).max(low);
        (low, high)
    }

    /// `secs` as a duration no longer than `max_interval`.
    fn capped(&self, secs: f64) -> Duration {
        Duration::try_from_secs_f64(secs)
            .map_or(self.max_interval, |delay| delay.min(self.max_interval))
    }

    /// Calculate a jittered delay for retry number `attempt`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let (low, high) = self.delay_bounds(attempt);
        if low == high {
            return low;
        }
        let secs = rand::rng().random_range(low.as_secs_f64()..=high.as_secs_f64());
        Duration::from_secs_f64(secs)
    }

    fn is_retryable(&self, err: &anyhow::Error) -> bool {
        self.should_retry.as_ref().is_none_or(|predicate| predicate(err))
    }

    /// Run `op` until it succeeds, fails terminally, or `cancel` fires.
    ///
    /// The operation runs at most `count + 1` times. Backoff sleeps and the
    /// operation itself are both raced against `cancel`.
    pub async fn run<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<T, RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let mut attempt: u32 = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(RetryError::Cancelled);
            }

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                result = op() => result,
            };

            let error = match result {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            if is_cancellation(&error) {
                debug!("operation reported cancellation");
                return Err(RetryError::Cancelled);
            }

            if attempt >= self.count || !self.is_retryable(&error) {
                return Err(RetryError::Failed {
                    error,
                    attempts: attempt + 1,
                });
            }

            let delay = self.delay(attempt);
            attempt += 1;
            warn!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "operation failed, retrying"
            );
            if let Some(callback) = &self.on_retry {
                callback(&error, attempt, delay);
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    use rstest::rstest;
    use tokio::time::Instant;

    use crate::Cancelled;

    fn policy() -> RetryPolicy {
        RetryPolicy::default()
            .with_count(3)
            .with_intervals(Duration::from_millis(100), Duration::from_millis(250))
            .with_multiplier(2.0)
            .with_randomization_factor(0.5)
    }

    #[rstest]
    #[case(0, 100)]
    #[case(1, 200)]
    #[case(2, 250)]
    #[case(10, 250)]
    fn test_base_delay_is_capped(#[case] attempt: u32, #[case] expected_ms: u64) {
        assert_eq!(policy().base_delay(attempt), Duration::from_millis(expected_ms));
    }

    #[rstest]
    #[case(f64::NAN)]
    #[case(f64::INFINITY)]
    #[case(f64::NEG_INFINITY)]
    fn test_non_finite_factor_disables_jitter(#[case] factor: f64) {
        let policy = policy().with_randomization_factor(factor);
        for attempt in 0..4 {
            let base = policy.base_delay(attempt);
            assert_eq!(policy.delay_bounds(attempt), (base, base));
            assert_eq!(policy.delay(attempt), base);
        }
    }

    #[rstest]
    #[case(f64::NAN)]
    #[case(f64::INFINITY)]
    fn test_non_finite_multiplier_keeps_initial_interval(#[case] multiplier: f64) {
        let policy = policy().with_multiplier(multiplier).with_randomization_factor(0.0);
        assert_eq!(policy.base_delay(0), Duration::from_millis(100));
        assert_eq!(policy.base_delay(5), Duration::from_millis(100));
        assert_eq!(policy.delay(5), Duration::from_millis(100));
    }

    #[test]
    fn test_huge_multiplier_is_capped() {
        let policy = policy().with_multiplier(f64::MAX);
        assert_eq!(policy.base_delay(40), Duration::from_millis(250));
        let (_, high) = policy.delay_bounds(40);
        assert_eq!(high, Duration::from_millis(250));
    }

    #[test]
    fn test_delay_within_bounds() {
        let policy = policy();
        for attempt in 0..6 {
            let (low, high) = policy.delay_bounds(attempt);
            assert!(high <= policy.max_interval);
            for _ in 0..50 {
                let delay = policy.delay(attempt);
                assert!(delay >= low && delay <= high, "{delay:?} not in {low:?}..={high:?}");
            }
        }
    }

    #[test]
    fn test_delay_without_jitter_is_exact() {
        let policy = policy().with_randomization_factor(0.0);
        assert_eq!(policy.delay(1), Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempts_are_count_plus_one() {
        let policy = policy();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let start = Instant::now();

        let recorded = calls.clone();
        let result: Result<(), _> = policy
            .run(&CancellationToken::new(), || {
                let recorded = recorded.clone();
                async move {
                    recorded.lock().unwrap().push(Instant::now());
                    Err(anyhow::anyhow!("unavailable"))
                }
            })
            .await;

        match result {
            Err(RetryError::Failed { attempts, .. }) => assert_eq!(attempts, 4),
            other => panic!("unexpected result: {other:?}"),
        }

        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 4);
        let mut previous = start;
        for (n, at) in calls.iter().enumerate().skip(1) {
            let gap = *at - previous;
            let (low, high) = policy.delay_bounds(n as u32 - 1);
            // The timer wheel rounds sleeps up to the next millisecond.
            let high = high + Duration::from_millis(1);
            assert!(gap >= low && gap <= high, "gap {gap:?} outside {low:?}..={high:?}");
            previous = *at;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_after_failures() {
        let attempts = AtomicU32::new(0);
        let value = policy()
            .run(&CancellationToken::new(), || {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        anyhow::bail!("flaky")
                    }
                    Ok(n)
                }
            })
            .await
            .unwrap();
        assert_eq!(value, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_predicate_stops_retries() {
        let attempts = AtomicU32::new(0);
        let policy = policy().with_should_retry(|err| !err.to_string().contains("fatal"));
        let result: Result<(), _> = policy
            .run(&CancellationToken::new(), || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(anyhow::anyhow!("fatal")) }
            })
            .await;
        assert!(matches!(result, Err(RetryError::Failed { attempts: 1, .. })));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_error_is_not_retried() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), _> = policy()
            .run(&CancellationToken::new(), || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(anyhow::Error::new(Cancelled)) }
            })
            .await;
        assert!(result.unwrap_err().is_cancelled());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_backoff() {
        let cancel = CancellationToken::new();
        let attempts = Arc::new(AtomicU32::new(0));
        let policy = policy().with_intervals(Duration::from_secs(60), Duration::from_secs(60));

        let task = {
            let cancel = cancel.clone();
            let attempts = attempts.clone();
            tokio::spawn(async move {
                policy
                    .run(&cancel, || {
                        attempts.fetch_add(1, Ordering::SeqCst);
                        async { Err::<(), _>(anyhow::anyhow!("down")) }
                    })
                    .await
            })
        };

        tokio::time::sleep(Duration::from_secs(1)).await;
        cancel.cancel();
        let result = task.await.unwrap();
        assert!(result.unwrap_err().is_cancelled());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_on_retry_sees_each_retry() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorded = seen.clone();
        let policy = policy()
            .with_count(2)
            .with_on_retry(move |_, attempt, _| recorded.lock().unwrap().push(attempt));

        let _ = policy
            .run(&CancellationToken::new(), || async { Err::<(), _>(anyhow::anyhow!("no")) })
            .await;

        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_runs_once() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), _> = RetryPolicy::disabled()
            .run(&CancellationToken::new(), || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(anyhow::anyhow!("down")) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
