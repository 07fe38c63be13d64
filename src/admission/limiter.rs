//! Token limiter with a warm-up ramp.
//!
//! # Responsibilities
//! - Bound how many connections are processed at once
//! - Start small and grow capacity on a timer until the configured maximum
//! - Stay usable (acquire/release) after the ramp-up has been stopped
//!
//! # Design Decisions
//! - Counting semaphore built from two atomics, no channel or lock
//! - Capacity is raised before units are added, so `available <= capacity` holds
//!   at every instant
//! - Release past the ceiling is refused and reported, never absorbed

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::validation::validate_limiter;
use crate::config::TokenLimiterConfig;
use crate::lifecycle::merge_tokens;
use crate::observability::metrics;

/// Error type for limiter construction.
#[derive(Debug, Error)]
pub enum LimiterError {
    #[error("invalid limiter configuration: {0}")]
    InvalidConfig(String),
}

/// Validated limiter parameters.
#[derive(Debug, Clone, Copy)]
struct Settings {
    initial_capacity: u64,
    max_capacity: u64,
    increase_step: u64,
    increase_interval: Duration,
}

impl TryFrom<&TokenLimiterConfig> for Settings {
    type Error = LimiterError;

    fn try_from(config: &TokenLimiterConfig) -> Result<Self, Self::Error> {
        let errors = validate_limiter(config);
        if !errors.is_empty() {
            let message = errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            return Err(LimiterError::InvalidConfig(message));
        }

        // Validation guarantees every value is non-negative.
        Ok(Self {
            initial_capacity: config.initial_capacity as u64,
            max_capacity: config.max_capacity as u64,
            increase_step: config.increase_step as u64,
            increase_interval: Duration::from_millis(config.increase_interval_ms as u64),
        })
    }
}

/// Bounded counting semaphore whose ceiling grows over time.
#[derive(Debug)]
pub struct TokenLimiter {
    settings: Settings,
    /// Current ceiling; grows from `initial_capacity` to `max_capacity`.
    current_capacity: AtomicU64,
    /// Units that can be acquired right now.
    available: AtomicU64,
    /// Cancelled by `close`.
    closed: CancellationToken,
}

impl TokenLimiter {
    /// Create a limiter, rejecting invalid configuration.
    pub fn new(config: &TokenLimiterConfig) -> Result<Self, LimiterError> {
        let settings = Settings::try_from(config)?;

        tracing::info!(
            initial_capacity = settings.initial_capacity,
            max_capacity = settings.max_capacity,
            increase_step = settings.increase_step,
            increase_interval = ?settings.increase_interval,
            "Token limiter created"
        );
        metrics::record_admission_capacity(settings.initial_capacity);

        Ok(Self {
            settings,
            current_capacity: AtomicU64::new(settings.initial_capacity),
            available: AtomicU64::new(settings.initial_capacity),
            closed: CancellationToken::new(),
        })
    }

    /// Try to take one unit. Never blocks.
    pub fn acquire(&self) -> bool {
        self.available
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok()
    }

    /// Return one unit. Never blocks.
    ///
    /// Returns `false` if every unit is already available, which means the
    /// caller released more often than it acquired.
    pub fn release(&self) -> bool {
        let released = self
            .available
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.current_capacity.load(Ordering::Acquire)).then_some(n + 1)
            })
            .is_ok();
        if !released {
            tracing::warn!(
                capacity = self.current_capacity(),
                "Release without matching acquire"
            );
        }
        released
    }

    /// Acquire a unit wrapped in a guard that releases it on drop.
    pub fn try_admit(self: &Arc<Self>) -> Option<AdmissionPermit> {
        self.acquire().then(|| AdmissionPermit {
            limiter: Arc::clone(self),
        })
    }

    /// Current ceiling (not the number of available units).
    pub fn current_capacity(&self) -> u64 {
        self.current_capacity.load(Ordering::Acquire)
    }

    /// Units that can be acquired right now.
    pub fn available(&self) -> u64 {
        self.available.load(Ordering::Acquire)
    }

    pub fn max_capacity(&self) -> u64 {
        self.settings.max_capacity
    }

    /// Stop the ramp-up. Idempotent; acquire/release keep working.
    pub fn close(&self) {
        if !self.closed.is_cancelled() {
            tracing::info!(capacity = self.current_capacity(), "Token limiter closed");
        }
        self.closed.cancel();
    }

    /// Grow capacity every `increase_interval` until it reaches the maximum.
    ///
    /// Returns when the maximum is reached, `external` is cancelled, or
    /// `close` is called, whichever happens first.
    pub async fn start_ramp_up(&self, external: CancellationToken) {
        let cancel = merge_tokens(&self.closed, &external);
        let _stop_watcher = cancel.clone().drop_guard();

        let period = self.settings.increase_interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!(capacity = self.current_capacity(), "Ramp-up cancelled");
                    return;
                }
                _ = ticker.tick() => {
                    if !self.grow() {
                        tracing::info!(capacity = self.current_capacity(), "Ramp-up complete");
                        return;
                    }
                }
            }
        }
    }

    /// One ramp-up step. Returns `false` once the maximum had already been reached.
    fn grow(&self) -> bool {
        let max = self.settings.max_capacity;
        let step = self.settings.increase_step;

        let previous = match self.current_capacity.fetch_update(
            Ordering::AcqRel,
            Ordering::Acquire,
            |current| (current < max).then(|| current.saturating_add(step).min(max)),
        ) {
            Ok(previous) => previous,
            Err(_) => return false,
        };
        let next = previous.saturating_add(step).min(max);
        let added = next - previous;

        // Cap at the new ceiling so surplus releases can never push past it.
        let _ = self
            .available
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                Some(n.saturating_add(added).min(next))
            });

        tracing::debug!(previous, next, added, "Admission capacity increased");
        metrics::record_admission_capacity(next);
        true
    }
}

impl Drop for TokenLimiter {
    fn drop(&mut self) {
        self.closed.cancel();
    }
}

/// A unit of admission capacity. Returned to the limiter when dropped.
#[derive(Debug)]
pub struct AdmissionPermit {
    limiter: Arc<TokenLimiter>,
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        self.limiter.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(initial: i64, max: i64, step: i64, interval_ms: i64) -> TokenLimiterConfig {
        TokenLimiterConfig {
            initial_capacity: initial,
            max_capacity: max,
            increase_step: step,
            increase_interval_ms: interval_ms,
        }
    }

    #[test]
    fn rejects_invalid_config() {
        for bad in [
            config(0, 0, 1, 10),
            config(-1, 5, 1, 10),
            config(6, 5, 1, 10),
            config(1, 5, 0, 10),
            config(1, 5, 1, 0),
        ] {
            assert!(matches!(
                TokenLimiter::new(&bad),
                Err(LimiterError::InvalidConfig(_))
            ));
        }
    }

    #[test]
    fn acquire_is_bounded_by_initial_capacity() {
        let limiter = TokenLimiter::new(&config(2, 5, 1, 10)).unwrap();
        assert!(limiter.acquire());
        assert!(limiter.acquire());
        assert!(!limiter.acquire());
        assert_eq!(limiter.current_capacity(), 2);
    }

    #[test]
    fn zero_initial_capacity_admits_nothing() {
        let limiter = TokenLimiter::new(&config(0, 5, 1, 10)).unwrap();
        assert!(!limiter.acquire());
    }

    #[test]
    fn surplus_release_is_refused() {
        let limiter = TokenLimiter::new(&config(2, 5, 1, 10)).unwrap();
        assert!(!limiter.release());
        assert_eq!(limiter.available(), 2);

        assert!(limiter.acquire());
        assert!(limiter.release());
        assert!(!limiter.release());
        assert_eq!(limiter.available(), 2);
    }

    #[test]
    fn permit_releases_on_drop() {
        let limiter = Arc::new(TokenLimiter::new(&config(1, 1, 1, 10)).unwrap());
        let permit = limiter.try_admit().unwrap();
        assert!(limiter.try_admit().is_none());
        drop(permit);
        assert!(limiter.try_admit().is_some());
    }

    #[test]
    fn grow_never_exceeds_max() {
        let limiter = TokenLimiter::new(&config(1, 4, 2, 10)).unwrap();
        assert!(limiter.grow());
        assert_eq!(limiter.current_capacity(), 3);
        assert!(limiter.grow());
        assert_eq!(limiter.current_capacity(), 4);
        assert!(!limiter.grow());
        assert_eq!(limiter.current_capacity(), 4);
        assert_eq!(limiter.available(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn ramp_up_adds_capacity_per_tick() {
        let limiter = Arc::new(TokenLimiter::new(&config(2, 5, 1, 10)).unwrap());
        assert!(limiter.acquire());
        assert!(limiter.acquire());
        assert!(!limiter.acquire());

        let ramp = {
            let limiter = Arc::clone(&limiter);
            tokio::spawn(async move { limiter.start_ramp_up(CancellationToken::new()).await })
        };

        tokio::time::sleep(Duration::from_millis(15)).await;
        assert_eq!(limiter.current_capacity(), 3);
        assert!(limiter.acquire());
        assert!(!limiter.acquire());

        // ceil((5 - 2) / 1) ticks in total, then the task exits on its own.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(limiter.current_capacity(), 5);
        ramp.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn ramp_up_stops_on_close() {
        let limiter = Arc::new(TokenLimiter::new(&config(1, 100, 1, 10)).unwrap());
        let ramp = {
            let limiter = Arc::clone(&limiter);
            tokio::spawn(async move { limiter.start_ramp_up(CancellationToken::new()).await })
        };

        tokio::time::sleep(Duration::from_millis(25)).await;
        limiter.close();
        limiter.close();
        ramp.await.unwrap();

        let frozen = limiter.current_capacity();
        assert!(frozen < 100);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(limiter.current_capacity(), frozen);

        assert!(limiter.acquire());
        assert!(limiter.release());
    }

    #[tokio::test(start_paused = true)]
    async fn ramp_up_stops_on_external_cancel() {
        let limiter = Arc::new(TokenLimiter::new(&config(1, 100, 1, 10)).unwrap());
        let external = CancellationToken::new();
        let ramp = {
            let limiter = Arc::clone(&limiter);
            let external = external.clone();
            tokio::spawn(async move { limiter.start_ramp_up(external).await })
        };

        tokio::time::sleep(Duration::from_millis(5)).await;
        external.cancel();
        ramp.await.unwrap();
        assert_eq!(limiter.current_capacity(), 1);
    }

    #[tokio::test]
    async fn concurrent_acquire_never_oversubscribes() {
        let limiter = Arc::new(TokenLimiter::new(&config(8, 8, 1, 10)).unwrap());
        let mut handles = Vec::new();
        for _ in 0..32 {
            let limiter = Arc::clone(&limiter);
            handles.push(tokio::spawn(async move { limiter.acquire() }));
        }
        let mut granted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                granted += 1;
            }
        }
        assert_eq!(granted, 8);
        assert_eq!(limiter.available(), 0);
    }
}
