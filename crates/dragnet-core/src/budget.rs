use std::time::Duration;

use tokio::time::Instant;

/// Wall-clock budget for one run.
///
/// Uses [`tokio::time::Instant`] so a paused test runtime drives it.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeBudgetGuard {
    started: Instant,
    max_runtime: Duration,
}

impl RuntimeBudgetGuard {
    pub fn start(max_runtime: Duration) -> Self {
        Self {
            started: Instant::now(),
            max_runtime,
        }
    }

    /// True once `elapsed >= max_runtime`.
    pub fn expired(&self) -> bool {
        self.elapsed() >= self.max_runtime
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}
