//! Token-bucket rate limiting
//!
//! Refill happens lazily at acquire time:
//! `tokens = min(burst, tokens + elapsed * rate)`; when no token is
//! available the caller sleeps `(1 - tokens) / rate` and retries. The
//! critical section covers only `(tokens, last_refill)`.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

pub struct TokenBucket {
    rate: f64,
    burst: f64,
    state: Mutex<BucketState>,
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// A bucket starting full. Non-positive rate or burst disables
    /// limiting entirely.
    pub fn new(rate: f64, burst: f64) -> Self {
        Self {
            rate,
            burst,
            state: Mutex::new(BucketState {
                tokens: burst,
                last_refill: Instant::now(),
            }),
        }
    }

    fn disabled(&self) -> bool {
        self.rate <= 0.0 || self.burst <= 0.0
    }

    /// Take one token without waiting
    pub fn try_acquire(&self) -> bool {
        if self.disabled() {
            return true;
        }
        self.refill_and_take().is_none()
    }

    /// Wait until a token is available, then take it
    pub async fn acquire(&self) {
        if self.disabled() {
            return;
        }
        loop {
            match self.refill_and_take() {
                None => return,
                Some(wait) => tokio::time::sleep(wait).await,
            }
        }
    }

    /// Returns `None` when a token was consumed, else how long to wait
    fn refill_and_take(&self) -> Option<Duration> {
        let mut state = self.state.lock();
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(state.last_refill).as_secs_f64();
        state.last_refill = now;
        state.tokens = (state.tokens + elapsed * self.rate).min(self.burst);

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            None
        } else {
            let wait = (1.0 - state.tokens) / self.rate.max(0.001);
            Some(Duration::from_secs_f64(wait))
        }
    }
}
