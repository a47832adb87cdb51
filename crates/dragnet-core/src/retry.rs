//! Outcome classification and retry spacing.
//!
//! Backoff governs how long a failed item waits before it can be claimed
//! again; it is independent of the stealth delay, which governs the cadence
//! of calls within a batch.
//!
//! ```text
//! attempt:  1     2     3     4 ...
//! delay:    base  2b    4b    8b ... (capped at max_delay)
//! ```

use std::time::Duration;

use chrono::TimeDelta;

use crate::error::AppError;
use crate::extractor::ExtractionResponse;

/// Phrases in an extractor error that prove the URL is permanently unprocessable.
const TERMINAL_MARKERS: &[&str] = &[
    "not found",
    "404",
    "410",
    "gone",
    "invalid url",
    "listing removed",
    "no longer available",
];

/// What happened when an item was handed to its extractor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    Succeeded { result_id: Option<String> },
    /// The per-item timeout elapsed before the extractor answered.
    TimedOut(Duration),
    /// The extractor answered `success: false`, or the call itself failed.
    Failed {
        error: String,
        status_code: Option<u16>,
        retryable: Option<bool>,
    },
}

impl ItemOutcome {
    pub fn from_response(response: ExtractionResponse) -> Self {
        if response.success {
            return ItemOutcome::Succeeded {
                result_id: response.result_id,
            };
        }
        ItemOutcome::Failed {
            error: response
                .error
                .unwrap_or_else(|| "extractor reported failure without a message".to_string()),
            status_code: response.status_code,
            retryable: None,
        }
    }

    pub fn from_error(error: &AppError) -> Self {
        ItemOutcome::Failed {
            error: error.to_string(),
            status_code: None,
            retryable: Some(error.is_retryable()),
        }
    }

    /// Human-readable failure reason; `None` on success.
    pub fn error_message(&self) -> Option<String> {
        match self {
            ItemOutcome::Succeeded { .. } => None,
            ItemOutcome::TimedOut(after) => {
                Some(format!("extractor timed out after {}s", after.as_secs()))
            }
            ItemOutcome::Failed {
                error, status_code, ..
            } => Some(match status_code {
                Some(code) => format!("HTTP {code}: {error}"),
                None => error.clone(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeClass {
    Success,
    Transient,
    Terminal,
}

/// The store transition the scheduler should apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    Complete { result_id: Option<String> },
    Retry { error: String, delay: TimeDelta },
    Fail { error: String },
}

/// Retry configuration with capped exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts an item gets before it is failed for good.
    pub max_attempts: u32,
    /// Delay after the first failed attempt, and the floor for all later ones.
    pub base_delay: TimeDelta,
    pub max_delay: TimeDelta,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: TimeDelta::minutes(1),
            max_delay: TimeDelta::minutes(60),
        }
    }
}

impl RetryPolicy {
    /// Classify an extraction outcome.
    ///
    /// Timeouts, 5xx, 429 and transport errors are transient; explicit
    /// not-found / gone / invalid-URL answers are terminal. Anything else is
    /// treated as transient: `max_attempts` bounds it either way.
    pub fn classify(&self, outcome: &ItemOutcome) -> OutcomeClass {
        match outcome {
            ItemOutcome::Succeeded { .. } => OutcomeClass::Success,
            ItemOutcome::TimedOut(_) => OutcomeClass::Transient,
            ItemOutcome::Failed {
                error,
                status_code,
                retryable,
            } => {
                if let Some(code) = status_code {
                    match code {
                        404 | 410 | 400 | 422 => return OutcomeClass::Terminal,
                        408 | 425 | 429 | 500..=599 => return OutcomeClass::Transient,
                        _ => {}
                    }
                }
                if *retryable == Some(true) {
                    return OutcomeClass::Transient;
                }
                let lower = error.to_lowercase();
                if TERMINAL_MARKERS.iter().any(|m| lower.contains(m)) {
                    OutcomeClass::Terminal
                } else {
                    OutcomeClass::Transient
                }
            }
        }
    }

    /// Backoff before attempt `attempt + 1` may start (`attempt` is 1-indexed).
    ///
    /// - Attempt 1: `base_delay`
    /// - Attempt n: `base_delay * 2^(n-1)`, capped at `max_delay`
    pub fn next_attempt(&self, attempt: u32) -> TimeDelta {
        let exponent = attempt.saturating_sub(1);
        let multiplier = 1i32.checked_shl(exponent).filter(|m| *m > 0);
        let delay = multiplier
            .and_then(|m| self.base_delay.checked_mul(m))
            .unwrap_or(self.max_delay);
        delay.max(self.base_delay).min(self.max_delay.max(self.base_delay))
    }

    /// Decide the transition for an item that has `attempts_so_far` finished
    /// attempts and just produced `outcome`.
    pub fn decide(&self, attempts_so_far: u32, outcome: ItemOutcome) -> Disposition {
        let class = self.classify(&outcome);
        let error = outcome.error_message();
        let attempt = attempts_so_far + 1;

        match (class, error) {
            (OutcomeClass::Success, _) | (_, None) => match outcome {
                ItemOutcome::Succeeded { result_id } => Disposition::Complete { result_id },
                _ => Disposition::Complete { result_id: None },
            },
            (OutcomeClass::Terminal, Some(error)) => Disposition::Fail { error },
            (OutcomeClass::Transient, Some(error)) if attempt >= self.max_attempts => {
                Disposition::Fail {
                    error: format!("{error} (gave up after {attempt} attempts)"),
                }
            }
            (OutcomeClass::Transient, Some(error)) => Disposition::Retry {
                error,
                delay: self.next_attempt(attempt),
            },
        }
    }
}
