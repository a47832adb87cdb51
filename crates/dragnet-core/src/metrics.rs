//! Per-run counters and the summary handed back to callers.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::Serialize;
use uuid::Uuid;

/// Why a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// A full round over the selected sources handled nothing.
    QueueEmpty,
    BudgetExhausted,
    /// Non-continuous run finished its single round.
    SinglePass,
    /// The store failed; counters cover the work done before that.
    StoreUnavailable,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::QueueEmpty => "queue_empty",
            StopReason::BudgetExhausted => "budget_exhausted",
            StopReason::SinglePass => "single_pass",
            StopReason::StoreUnavailable => "store_unavailable",
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counters for one source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceStats {
    /// Items handed to the extractor (succeeded + failed + retried).
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub retried: u64,
    /// Items no route matched.
    pub skipped: u64,
}

/// One entry of the bounded error sample.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorSample {
    pub item_id: Uuid,
    pub source: String,
    pub url: String,
    pub error: String,
}

/// Result of one scheduler run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub worker_id: String,
    pub total_processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub retried: u64,
    pub skipped: u64,
    pub per_source: BTreeMap<String, SourceStats>,
    pub elapsed_seconds: f64,
    pub items_per_hour: f64,
    /// Claimed items left untouched when the budget ran out.
    pub left_claimed: u64,
    /// Transitions rejected because another worker had taken the item.
    pub lease_lost: u64,
    pub stop_reason: StopReason,
    pub continued: bool,
    pub chain_depth: u32,
    pub remaining_estimate: Option<i64>,
    pub errors: Vec<ErrorSample>,
    pub errors_truncated: u64,
}

impl RunSummary {
    pub fn source(&self, name: &str) -> SourceStats {
        self.per_source.get(name).copied().unwrap_or_default()
    }
}

/// Accumulates counters while a run is in progress.
#[derive(Debug)]
pub struct RunMetrics {
    per_source: BTreeMap<String, SourceStats>,
    left_claimed: u64,
    lease_lost: u64,
    errors: Vec<ErrorSample>,
    errors_truncated: u64,
    max_error_samples: usize,
}

impl RunMetrics {
    pub fn new(max_error_samples: usize) -> Self {
        Self {
            per_source: BTreeMap::new(),
            left_claimed: 0,
            lease_lost: 0,
            errors: Vec::new(),
            errors_truncated: 0,
            max_error_samples,
        }
    }

    fn entry(&mut self, source: &str) -> &mut SourceStats {
        self.per_source.entry(source.to_string()).or_default()
    }

    /// Register a source so it shows up in the summary even with no work.
    pub fn touch(&mut self, source: &str) {
        self.entry(source);
    }

    pub fn record_success(&mut self, source: &str) {
        let stats = self.entry(source);
        stats.processed += 1;
        stats.succeeded += 1;
    }

    pub fn record_retry(&mut self, source: &str) {
        let stats = self.entry(source);
        stats.processed += 1;
        stats.retried += 1;
    }

    pub fn record_failure(&mut self, source: &str) {
        let stats = self.entry(source);
        stats.processed += 1;
        stats.failed += 1;
    }

    pub fn record_skip(&mut self, source: &str) {
        self.entry(source).skipped += 1;
    }

    pub fn record_left_claimed(&mut self, count: u64) {
        self.left_claimed += count;
    }

    pub fn record_lease_lost(&mut self) {
        self.lease_lost += 1;
    }

    /// Keep the first `max_error_samples` errors and count the rest.
    pub fn record_error(&mut self, sample: ErrorSample) {
        if self.errors.len() < self.max_error_samples {
            self.errors.push(sample);
        } else {
            self.errors_truncated += 1;
        }
    }

    /// Items processed plus items skipped so far.
    pub fn handled(&self) -> u64 {
        self.per_source
            .values()
            .map(|s| s.processed + s.skipped)
            .sum()
    }

    pub fn finish(
        self,
        worker_id: &str,
        elapsed: Duration,
        stop_reason: StopReason,
        continued: bool,
        chain_depth: u32,
        remaining_estimate: Option<i64>,
    ) -> RunSummary {
        let mut totals = SourceStats::default();
        for stats in self.per_source.values() {
            totals.processed += stats.processed;
            totals.succeeded += stats.succeeded;
            totals.failed += stats.failed;
            totals.retried += stats.retried;
            totals.skipped += stats.skipped;
        }

        let elapsed_seconds = elapsed.as_secs_f64();
        let items_per_hour = if elapsed_seconds > 0.0 {
            totals.processed as f64 * 3600.0 / elapsed_seconds
        } else {
            0.0
        };

        RunSummary {
            worker_id: worker_id.to_string(),
            total_processed: totals.processed,
            succeeded: totals.succeeded,
            failed: totals.failed,
            retried: totals.retried,
            skipped: totals.skipped,
            per_source: self.per_source,
            elapsed_seconds,
            items_per_hour,
            left_claimed: self.left_claimed,
            lease_lost: self.lease_lost,
            stop_reason,
            continued,
            chain_depth,
            remaining_estimate,
            errors: self.errors,
            errors_truncated: self.errors_truncated,
        }
    }
}
