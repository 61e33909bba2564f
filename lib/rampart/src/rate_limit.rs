//! Client-side token bucket rate limiting.
//!
//! The bucket starts full. Tokens refill continuously at `rate` per second up
//! to `capacity`. A caller that finds too few tokens books them anyway and
//! sleeps until they would have refilled, so concurrent waiters queue behind
//! one another instead of racing for the same refill.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use rampart_core::{Clock, Error, Result, Sleeper, SystemClock, TokioSleeper};
use tracing::debug;

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket rate limiter.
///
/// # Example
///
/// ```
/// use rampart::TokenBucket;
///
/// # async fn example() -> rampart::Result<()> {
/// // 10 requests per second, bursts of up to 5
/// let bucket = TokenBucket::new(10.0, 5)?;
/// let waited = bucket.acquire(1).await?;
/// assert!(waited.is_zero());
/// # Ok(())
/// # }
/// ```
pub struct TokenBucket {
    rate: f64,
    capacity: f64,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
    state: Mutex<BucketState>,
}

impl std::fmt::Debug for TokenBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenBucket")
            .field("rate", &self.rate)
            .field("capacity", &self.capacity)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl TokenBucket {
    /// Create a bucket refilling `rate` tokens per second, holding at most `burst`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `rate` is not a positive number or `burst` is zero.
    pub fn new(rate: f64, burst: u32) -> Result<Self> {
        Self::with_time(rate, burst, Arc::new(SystemClock), Arc::new(TokioSleeper))
    }

    /// Create a bucket driven by the given clock and sleeper.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `rate` is not a positive number or `burst` is zero.
    pub fn with_time(
        rate: f64,
        burst: u32,
        clock: Arc<dyn Clock>,
        sleeper: Arc<dyn Sleeper>,
    ) -> Result<Self> {
        if !(rate.is_finite() && rate > 0.0) {
            return Err(Error::config(
                "rate_limit_rate",
                format!("must be a positive number of tokens per second, got {rate}"),
            ));
        }
        if burst == 0 {
            return Err(Error::config("rate_limit_burst", "must be greater than 0"));
        }

        let capacity = f64::from(burst);
        let state = Mutex::new(BucketState {
            tokens: capacity,
            last_refill: clock.now(),
        });
        Ok(Self {
            rate,
            capacity,
            clock,
            sleeper,
            state,
        })
    }

    /// Returns `true` when the bucket actually limits (`rate > 0`).
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.rate > 0.0
    }

    /// Refill rate, in tokens per second.
    #[must_use]
    pub const fn rate(&self) -> f64 {
        self.rate
    }

    /// Bucket capacity.
    #[must_use]
    pub const fn capacity(&self) -> f64 {
        self.capacity
    }

    /// Take `tokens` from the bucket, waiting for a refill if needed.
    ///
    /// Returns how long the caller waited.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `tokens` exceeds the bucket capacity,
    /// since such a request could never be served.
    pub async fn acquire(&self, tokens: u32) -> Result<Duration> {
        let requested = f64::from(tokens);
        if requested > self.capacity {
            return Err(Error::config(
                "tokens",
                format!(
                    "requested {tokens} tokens but the bucket holds at most {}",
                    self.capacity
                ),
            ));
        }

        let wait = self.reserve(requested);
        if !wait.is_zero() {
            debug!(
                wait_ms = wait.as_millis(),
                tokens, "Rate limit reached, waiting for tokens"
            );
            self.sleeper.sleep(wait).await;
        }
        Ok(wait)
    }

    /// Tokens currently available, after refill.
    #[must_use]
    pub fn available_tokens(&self) -> f64 {
        let now = self.clock.now();
        let state = self.lock();
        self.refilled(&state, now)
    }

    /// Refill the bucket to capacity.
    pub fn reset(&self) {
        let now = self.clock.now();
        let mut state = self.lock();
        state.tokens = self.capacity;
        state.last_refill = now;
    }

    /// Books `requested` tokens and returns how long until they are available.
    fn reserve(&self, requested: f64) -> Duration {
        let now = self.clock.now();
        let mut state = self.lock();

        if now > state.last_refill {
            state.tokens = self.refilled(&state, now);
            state.last_refill = now;
        }

        if state.tokens >= requested {
            state.tokens -= requested;
            return Duration::ZERO;
        }

        let deficit = requested - state.tokens;
        let refill_time = Duration::try_from_secs_f64(deficit / self.rate).unwrap_or(Duration::MAX);
        let base = state.last_refill.max(now);
        let ready_at = base.checked_add(refill_time).unwrap_or(base);

        state.tokens = 0.0;
        state.last_refill = ready_at;
        ready_at.saturating_duration_since(now)
    }

    fn refilled(&self, state: &BucketState, now: Instant) -> f64 {
        let elapsed = now.saturating_duration_since(state.last_refill);
        elapsed
            .as_secs_f64()
            .mul_add(self.rate, state.tokens)
            .min(self.capacity)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BucketState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use rampart_core::{ManualClock, ManualSleeper};

    use super::*;

    fn bucket(rate: f64, burst: u32) -> (TokenBucket, ManualClock, ManualSleeper) {
        let clock = ManualClock::new();
        let sleeper = ManualSleeper::new(clock.clone());
        let bucket = TokenBucket::with_time(
            rate,
            burst,
            Arc::new(clock.clone()),
            Arc::new(sleeper.clone()),
        )
        .expect("valid bucket");
        (bucket, clock, sleeper)
    }

    fn assert_close(actual: Duration, expected: Duration) {
        let diff = actual.abs_diff(expected);
        assert!(
            diff < Duration::from_micros(10),
            "expected {expected:?}, got {actual:?}"
        );
    }

    #[tokio::test]
    async fn burst_is_served_immediately() {
        let (bucket, _clock, sleeper) = bucket(1.0, 3);

        for _ in 0..3 {
            assert!(bucket.acquire(1).await.expect("acquire").is_zero());
        }

        assert!(sleeper.recorded().is_empty());
        assert!(bucket.available_tokens() < 1e-9);
    }

    #[tokio::test]
    async fn second_immediate_call_waits_one_interval() {
        let (bucket, _clock, _sleeper) = bucket(10.0, 1);

        assert!(bucket.acquire(1).await.expect("first").is_zero());
        let waited = bucket.acquire(1).await.expect("second");

        assert_close(waited, Duration::from_millis(100));
    }

    #[tokio::test]
    async fn sequential_waits_accumulate() {
        let rate = 4.0;
        let (bucket, _clock, sleeper) = bucket(rate, 1);

        let mut total = Duration::ZERO;
        for _ in 0..5 {
            total += bucket.acquire(1).await.expect("acquire");
        }

        // one token in hand, then one per refill interval
        assert_close(total, Duration::from_secs_f64(4.0 / rate));
        assert_close(sleeper.total(), total);
    }

    #[tokio::test]
    async fn concurrent_waiters_queue_behind_each_other() {
        let (bucket, _clock, _sleeper) = bucket(10.0, 1);
        bucket.acquire(1).await.expect("drain");

        // both reserve before either sleeps
        let first = bucket.reserve(1.0);
        let second = bucket.reserve(1.0);

        assert_close(first, Duration::from_millis(100));
        assert_close(second, Duration::from_millis(200));
        assert!(bucket.available_tokens() >= 0.0);
    }

    #[tokio::test]
    async fn refill_is_capped_at_capacity() {
        let (bucket, clock, _sleeper) = bucket(100.0, 2);
        bucket.acquire(2).await.expect("drain");

        clock.advance(Duration::from_secs(60));

        assert!((bucket.available_tokens() - 2.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn refill_is_proportional_to_elapsed_time() {
        let (bucket, clock, _sleeper) = bucket(2.0, 5);
        bucket.acquire(5).await.expect("drain");

        clock.advance(Duration::from_millis(750));

        assert!((bucket.available_tokens() - 1.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn requesting_more_than_capacity_is_rejected() {
        let (bucket, _clock, _sleeper) = bucket(1.0, 2);

        let err = bucket.acquire(3).await.expect_err("over capacity");
        assert!(err.is_config());
    }

    #[test]
    fn construction_validates_rate_and_burst() {
        assert!(TokenBucket::new(0.0, 1).expect_err("zero rate").is_config());
        assert!(TokenBucket::new(f64::NAN, 1).expect_err("nan").is_config());
        assert!(TokenBucket::new(1.0, 0).expect_err("zero burst").is_config());
        assert!(TokenBucket::new(1.0, 1).expect("valid").is_configured());
    }

    #[tokio::test]
    async fn reset_refills_bucket() {
        let (bucket, _clock, _sleeper) = bucket(1.0, 3);
        bucket.acquire(3).await.expect("drain");

        bucket.reset();

        assert!((bucket.available_tokens() - 3.0).abs() < 1e-9);
        assert!(bucket.acquire(1).await.expect("acquire").is_zero());
    }
}
