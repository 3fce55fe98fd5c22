//! Limits and token buckets
//!
//! Every named limit of a context is backed by a [`TokenBucket`]. Rate limits
//! (`byte-rate`, `simple-rate`) refill continuously; `total` limits never
//! refill on their own and may be decremented by an external function (e.g.
//! elapsed execution time).
//!
//! Bucket counts are stored multiplied by [`TOKEN_BUCKET_CAPACITY_SCALE`] so
//! that fractional refills are not lost; the public API of [`Context`] takes
//! unscaled counts.
//!
//! [`Context`]: crate::context::Context

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam::channel::{after, select, Receiver};
use parking_lot::Mutex;

use crate::error::{Result, RuntimeError};

/// Scale applied to bucket counts.
pub const TOKEN_BUCKET_CAPACITY_SCALE: i64 = 100;

/// Name of the execution time limit.
pub const EXECUTION_TOTAL_LIMIT_NAME: &str = "execution/total-time";

/// Interval between two applications of a decrement function.
pub const LIMIT_MONITOR_INTERVAL: Duration = Duration::from_millis(10);

/// Kind of a limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LimitKind {
    /// Bytes per second
    ByteRate,
    /// Operations per second
    SimpleRate,
    /// Total amount, never refilled
    Total,
}

/// Computes how many (scaled) tokens to remove from a total bucket given the
/// time elapsed since the last call.
pub type DecrementFn = Arc<dyn Fn(Duration) -> i64 + Send + Sync>;

/// A named limit.
#[derive(Clone)]
pub struct Limit {
    /// Limit name (`fs/read`, `execution/total-time`)
    pub name: Arc<str>,
    /// Kind
    pub kind: LimitKind,
    /// Rate per second or total amount (unscaled)
    pub value: i64,
    /// External decrement function (total limits only)
    pub decrement: Option<DecrementFn>,
}

impl Limit {
    /// A byte-rate limit.
    pub fn byte_rate(name: &str, per_second: i64) -> Self {
        Self::new(name, LimitKind::ByteRate, per_second)
    }

    /// A simple-rate limit.
    pub fn simple_rate(name: &str, per_second: i64) -> Self {
        Self::new(name, LimitKind::SimpleRate, per_second)
    }

    /// A total limit.
    pub fn total(name: &str, total: i64) -> Self {
        Self::new(name, LimitKind::Total, total)
    }

    /// The execution time limit: the bucket holds milliseconds and is drained
    /// by the elapsed wall-clock time.
    pub fn total_time(duration: Duration) -> Self {
        let millis = i64::try_from(duration.as_millis()).unwrap_or(i64::MAX);
        Self::total(EXECUTION_TOTAL_LIMIT_NAME, millis).with_decrement(Arc::new(|elapsed| {
            i64::try_from(elapsed.as_millis())
                .unwrap_or(i64::MAX)
                .saturating_mul(TOKEN_BUCKET_CAPACITY_SCALE)
        }))
    }

    fn new(name: &str, kind: LimitKind, value: i64) -> Self {
        Self {
            name: Arc::from(name),
            kind,
            value,
            decrement: None,
        }
    }

    /// Attach a decrement function.
    pub fn with_decrement(mut self, decrement: DecrementFn) -> Self {
        self.decrement = Some(decrement);
        self
    }

    /// Build the bucket backing this limit.
    pub fn new_bucket(&self) -> TokenBucket {
        let scaled = self.value.saturating_mul(TOKEN_BUCKET_CAPACITY_SCALE);
        match self.kind {
            LimitKind::ByteRate | LimitKind::SimpleRate => TokenBucket::new(scaled, scaled),
            LimitKind::Total => TokenBucket::new(scaled, 0),
        }
    }
}

impl fmt::Debug for Limit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Limit")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("value", &self.value)
            .field("decrement", &self.decrement.is_some())
            .finish()
    }
}

struct BucketState {
    available: i64,
    last_fill: Instant,
}

/// A token bucket. All counts are scaled.
pub struct TokenBucket {
    capacity: i64,
    fill_rate: i64,
    state: Mutex<BucketState>,
    destroyed: AtomicBool,
}

impl TokenBucket {
    /// Create a full bucket.
    pub fn new(capacity: i64, fill_rate: i64) -> Self {
        Self {
            capacity,
            fill_rate,
            state: Mutex::new(BucketState {
                available: capacity,
                last_fill: Instant::now(),
            }),
            destroyed: AtomicBool::new(false),
        }
    }

    /// Create a bucket with a given amount of available tokens.
    pub fn with_available(capacity: i64, fill_rate: i64, available: i64) -> Self {
        let bucket = Self::new(capacity, fill_rate);
        bucket.state.lock().available = available;
        bucket
    }

    /// Capacity (scaled).
    pub fn capacity(&self) -> i64 {
        self.capacity
    }

    /// Fill rate per second (scaled).
    pub fn fill_rate(&self) -> i64 {
        self.fill_rate
    }

    /// Available tokens (scaled) after refilling.
    pub fn available(&self) -> i64 {
        let mut state = self.state.lock();
        self.refill(&mut state);
        state.available
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        if self.fill_rate > 0 {
            let elapsed = now.duration_since(state.last_fill);
            let added = (elapsed.as_secs_f64() * self.fill_rate as f64) as i64;
            if added > 0 {
                state.available = (state.available + added).min(self.capacity);
                state.last_fill = now;
            }
        } else {
            state.last_fill = now;
        }
    }

    /// Take `count` tokens if available, without blocking.
    pub fn try_take(&self, count: i64) -> bool {
        let mut state = self.state.lock();
        self.refill(&mut state);
        if state.available >= count {
            state.available -= count;
            true
        } else {
            false
        }
    }

    /// Take `count` tokens, waiting for the bucket to refill. Fails when `done`
    /// fires or the bucket is destroyed.
    pub fn wait_take(&self, count: i64, done: &Receiver<()>) -> Result<()> {
        let mut remaining = count;
        while remaining > 0 {
            if self.destroyed.load(Ordering::Acquire) {
                return Err(RuntimeError::DoneContext);
            }
            let part = remaining.min(self.capacity.max(1));
            if self.try_take(part) {
                remaining -= part;
                continue;
            }
            if self.fill_rate <= 0 {
                return Err(RuntimeError::LimitReached(String::from("bucket has no fill rate")));
            }
            let missing = part - self.available();
            let wait = Duration::from_secs_f64((missing.max(1) as f64) / self.fill_rate as f64)
                .max(Duration::from_millis(1));
            select! {
                recv(done) -> _ => return Err(RuntimeError::DoneContext),
                recv(after(wait)) -> _ => {}
            }
        }
        Ok(())
    }

    /// Give tokens back, without exceeding the capacity.
    pub fn give_back(&self, count: i64) {
        let mut state = self.state.lock();
        self.refill(&mut state);
        state.available = (state.available + count).min(self.capacity);
    }

    /// Remove tokens unconditionally and return the new count, which may be
    /// negative.
    pub fn decrement(&self, count: i64) -> i64 {
        let mut state = self.state.lock();
        state.available -= count;
        state.available
    }

    /// Mark the bucket as destroyed: pending and future waits fail.
    pub fn destroy(&self) {
        self.destroyed.store(true, Ordering::Release);
    }

    /// Check whether the bucket is destroyed.
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }
}

impl fmt::Debug for TokenBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TokenBucket(available: {}, capacity: {}, fill rate: {})",
            self.available(),
            self.capacity,
            self.fill_rate
        )
    }
}

/// A limit bound to its bucket. Cloning a limiter shares the bucket.
#[derive(Clone, Debug)]
pub struct Limiter {
    /// The limit
    pub limit: Limit,
    /// The bucket, shared with child contexts
    pub bucket: Arc<TokenBucket>,
}

impl Limiter {
    /// Create a limiter with a full bucket.
    pub fn new(limit: Limit) -> Self {
        let bucket = Arc::new(limit.new_bucket());
        Self { limit, bucket }
    }

    /// Create a limiter with a fresh bucket holding the current available
    /// count of this one.
    pub fn snapshot(&self) -> Self {
        let bucket = Arc::new(TokenBucket::with_available(
            self.bucket.capacity(),
            self.bucket.fill_rate(),
            self.bucket.available(),
        ));
        Self {
            limit: self.limit.clone(),
            bucket,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_bucket_does_not_refill() {
        let limiter = Limiter::new(Limit::total("ops", 3));
        let scale = TOKEN_BUCKET_CAPACITY_SCALE;
        assert!(limiter.bucket.try_take(3 * scale));
        std::thread::sleep(Duration::from_millis(5));
        assert!(!limiter.bucket.try_take(scale));
        limiter.bucket.give_back(scale);
        assert!(limiter.bucket.try_take(scale));
    }

    #[test]
    fn test_rate_bucket_refills() {
        let bucket = TokenBucket::new(1000, 100_000);
        assert!(bucket.try_take(1000));
        std::thread::sleep(Duration::from_millis(20));
        assert!(bucket.try_take(500));
    }

    #[test]
    fn test_wait_take_fails_on_done() {
        let bucket = TokenBucket::new(10, 1);
        assert!(bucket.try_take(10));
        let (tx, rx) = crossbeam::channel::bounded::<()>(0);
        drop(tx);
        assert!(matches!(bucket.wait_take(10, &rx), Err(RuntimeError::DoneContext)));
    }

    #[test]
    fn test_snapshot_copies_available() {
        let limiter = Limiter::new(Limit::total("n", 5));
        limiter.bucket.try_take(2 * TOKEN_BUCKET_CAPACITY_SCALE);
        let copy = limiter.snapshot();
        assert_eq!(copy.bucket.available(), 3 * TOKEN_BUCKET_CAPACITY_SCALE);
        assert!(!Arc::ptr_eq(&copy.bucket, &limiter.bucket));
    }

    #[test]
    fn test_total_time_decrement() {
        let limit = Limit::total_time(Duration::from_secs(1));
        let decrement = limit.decrement.clone().unwrap();
        assert_eq!(decrement(Duration::from_millis(10)), 10 * TOKEN_BUCKET_CAPACITY_SCALE);
        assert_eq!(limit.name.as_ref(), EXECUTION_TOTAL_LIMIT_NAME);
    }
}
