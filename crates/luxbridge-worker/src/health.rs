//! Subsystem health tracking and retry backoff

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Exponential backoff: `min(max, base * factor^attempts)`
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub base: f64,
    pub factor: f64,
    pub max: f64,
}

impl BackoffPolicy {
    pub fn new(base: f64, factor: f64, max: f64) -> Self {
        Self { base, factor, max }
    }

    pub fn delay(&self, attempts: u32) -> Duration {
        let delay = (self.base * self.factor.powi(attempts as i32)).min(self.max);
        Duration::from_secs_f64(delay.max(0.0))
    }

    /// Delay with ±10% jitter so retrying workers do not align
    pub fn delay_jittered(&self, attempts: u32) -> Duration {
        let base = self.delay(attempts).as_secs_f64();
        let jitter = 1.0 + (fastrand::f64() * 0.2 - 0.1);
        Duration::from_secs_f64((base * jitter).max(0.0))
    }
}

#[derive(Default)]
struct SubsystemState {
    consecutive_failures: u32,
    cooldown_until: Option<Instant>,
}

/// Circuit-breaker-style suppression for repeatedly failing subsystems.
///
/// After `failure_threshold` consecutive failures a cooldown opens;
/// `allow_attempt` reports the remaining wait until it elapses.
pub struct HealthMonitor {
    failure_threshold: u32,
    cooldown: Duration,
    subsystems: Mutex<HashMap<String, SubsystemState>>,
}

impl HealthMonitor {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            cooldown,
            subsystems: Mutex::new(HashMap::new()),
        }
    }

    /// Whether the subsystem may run now; when suppressed, the second
    /// element is the remaining cooldown.
    pub fn allow_attempt(&self, subsystem: &str) -> (bool, Duration) {
        let mut subsystems = self.subsystems.lock();
        let state = subsystems.entry(subsystem.to_string()).or_default();
        match state.cooldown_until {
            Some(until) => {
                let now = Instant::now();
                if now >= until {
                    state.cooldown_until = None;
                    (true, Duration::ZERO)
                } else {
                    (false, until - now)
                }
            }
            None => (true, Duration::ZERO),
        }
    }

    pub fn record_success(&self, subsystem: &str) {
        let mut subsystems = self.subsystems.lock();
        let state = subsystems.entry(subsystem.to_string()).or_default();
        state.consecutive_failures = 0;
        state.cooldown_until = None;
    }

    pub fn record_failure(&self, subsystem: &str) {
        let mut subsystems = self.subsystems.lock();
        let state = subsystems.entry(subsystem.to_string()).or_default();
        state.consecutive_failures += 1;
        if state.consecutive_failures >= self.failure_threshold {
            state.cooldown_until = Some(Instant::now() + self.cooldown);
            state.consecutive_failures = 0;
        }
    }
}
