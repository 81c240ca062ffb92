//! Shared request pacing for all workers
//!
//! A token bucket refilled at `requests-per-second` with a configurable burst.
//! Adaptive mode adds an extra delay that doubles on slow or throttled
//! responses and halves after a streak of fast ones. Stealth mode adds a
//! random jitter to every acquire.

use crate::config::RateLimitConfig;
use rand::Rng;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Smallest non-zero adaptive delay
const ADAPTIVE_STEP: Duration = Duration::from_millis(500);

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl Bucket {
    fn refill(&mut self, rate: f64, burst: f64) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * rate).min(burst);
        self.last_refill = now;
    }
}

#[derive(Debug, Default)]
struct Adaptive {
    extra_delay: Duration,
    fast_streak: u32,
}

/// Token-bucket rate limiter shared by every worker
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    bucket: tokio::sync::Mutex<Bucket>,
    adaptive: Mutex<Adaptive>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        let burst = f64::from(config.burst.max(1));
        Self {
            config,
            bucket: tokio::sync::Mutex::new(Bucket {
                tokens: burst,
                last_refill: Instant::now(),
            }),
            adaptive: Mutex::new(Adaptive::default()),
        }
    }

    /// Waits until the caller may send one request
    ///
    /// Waiters are served in arrival order. The adaptive delay and stealth
    /// jitter are spent while holding the bucket, so they space requests
    /// across workers rather than per worker.
    pub async fn acquire(&self) {
        let rate = self.config.requests_per_second;
        let burst = f64::from(self.config.burst.max(1));

        let mut bucket = self.bucket.lock().await;
        bucket.refill(rate, burst);
        if bucket.tokens < 1.0 {
            let wait = Duration::from_secs_f64((1.0 - bucket.tokens) / rate);
            trace!("Rate limiter waiting {:?} for a token", wait);
            tokio::time::sleep(wait).await;
            bucket.refill(rate, burst);
        }
        bucket.tokens = (bucket.tokens - 1.0).max(0.0);

        let pause = self.extra_delay() + self.jitter();
        if !pause.is_zero() {
            trace!("Rate limiter pausing an extra {:?}", pause);
            tokio::time::sleep(pause).await;
        }
    }

    /// Feeds a response back into adaptive pacing
    ///
    /// `status_code` is `None` when the request produced no response.
    pub fn record_response(&self, status_code: Option<u16>, elapsed: Duration) {
        if !self.config.adaptive {
            return;
        }

        let slow = elapsed > Duration::from_millis(self.config.slow_threshold_ms);
        let throttled = matches!(status_code, Some(429) | Some(503));
        let fast_success = !slow && matches!(status_code, Some(200..=299));

        let mut adaptive = self.adaptive.lock().unwrap_or_else(PoisonError::into_inner);
        let cap = Duration::from_millis(self.config.max_extra_delay_ms);

        if slow || throttled {
            let doubled = if adaptive.extra_delay.is_zero() {
                ADAPTIVE_STEP
            } else {
                adaptive.extra_delay * 2
            };
            adaptive.extra_delay = doubled.min(cap);
            adaptive.fast_streak = 0;
            debug!(
                "Backing off: extra delay now {:?} (status {:?}, {:?})",
                adaptive.extra_delay, status_code, elapsed
            );
        } else if fast_success {
            adaptive.fast_streak += 1;
            if adaptive.fast_streak >= self.config.fast_streak {
                adaptive.fast_streak = 0;
                if !adaptive.extra_delay.is_zero() {
                    let halved = adaptive.extra_delay / 2;
                    adaptive.extra_delay = if halved < ADAPTIVE_STEP {
                        Duration::ZERO
                    } else {
                        halved
                    };
                    debug!("Speeding up: extra delay now {:?}", adaptive.extra_delay);
                }
            }
        }
    }

    /// Current adaptive delay added to every acquire
    pub fn extra_delay(&self) -> Duration {
        self.adaptive
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extra_delay
    }

    fn jitter(&self) -> Duration {
        if !self.config.stealth {
            return Duration::ZERO;
        }
        let low = self.config.jitter_min_ms;
        let high = self.config.jitter_max_ms.max(low);
        Duration::from_millis(rand::thread_rng().gen_range(low..=high))
    }
}
