//! Per-source stealth delays.
//!
//! Before every extraction call the scheduler sleeps for a duration drawn
//! uniformly from the source's [`DelayProfile`], so requests to one site arrive
//! at a human-looking cadence. Profiles are per source because sites differ in
//! how much traffic they tolerate before blocking.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use dragnet_core::throttle::{DelayProfile, DomainRateLimiter};
//!
//! # async fn run() {
//! let limiter = DomainRateLimiter::new();
//! let profile = DelayProfile::from_millis(2_000, 5_000);
//! let waited = limiter.wait("bringatrailer.com", &profile).await;
//! assert!(waited >= Duration::from_secs(2));
//! # }
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::RngExt;
use serde::{Deserialize, Serialize};

/// Inclusive `[min, max]` bounds for a stealth delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayProfile {
    pub min: Duration,
    pub max: Duration,
}

impl DelayProfile {
    /// Build a profile; bounds given in the wrong order are swapped.
    pub fn new(min: Duration, max: Duration) -> Self {
        if min <= max {
            Self { min, max }
        } else {
            Self { min: max, max: min }
        }
    }

    pub const fn from_millis_const(min_ms: u64, max_ms: u64) -> Self {
        Self {
            min: Duration::from_millis(min_ms),
            max: Duration::from_millis(max_ms),
        }
    }

    pub fn from_millis(min_ms: u64, max_ms: u64) -> Self {
        Self::new(Duration::from_millis(min_ms), Duration::from_millis(max_ms))
    }

    /// No delay at all.
    pub const fn none() -> Self {
        Self::from_millis_const(0, 0)
    }

    /// Draw one delay uniformly from `[min, max]`.
    pub fn sample(&self) -> Duration {
        if self.max <= self.min {
            return self.min;
        }
        let min_ms = u64::try_from(self.min.as_millis()).unwrap_or(u64::MAX);
        let max_ms = u64::try_from(self.max.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(rand::rng().random_range(min_ms..=max_ms))
    }
}

impl Default for DelayProfile {
    /// 1–3 seconds, a polite cadence for sites without a tuned profile.
    fn default() -> Self {
        Self::from_millis_const(1_000, 3_000)
    }
}

/// Sleeps before each extraction call and keeps per-domain wait totals.
///
/// Cloning shares the totals, so one limiter can be handed to several tasks.
#[derive(Debug, Clone, Default)]
pub struct DomainRateLimiter {
    waited: Arc<Mutex<HashMap<String, Duration>>>,
}

impl DomainRateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep for a delay sampled from `profile`. Returns the time slept.
    pub async fn wait(&self, domain: &str, profile: &DelayProfile) -> Duration {
        let delay = profile.sample();
        if !delay.is_zero() {
            tracing::debug!(
                domain = %domain,
                sleep_ms = %delay.as_millis(),
                "Stealth delay"
            );
            tokio::time::sleep(delay).await;
        }
        self.record(domain, delay);
        delay
    }

    /// Total time slept for `domain` so far.
    pub fn total_waited(&self, domain: &str) -> Duration {
        self.waited
            .lock()
            .map(|m| m.get(domain).copied().unwrap_or_default())
            .unwrap_or_default()
    }

    fn record(&self, domain: &str, delay: Duration) {
        if let Ok(mut map) = self.waited.lock() {
            *map.entry(domain.to_string()).or_default() += delay;
        }
    }
}
