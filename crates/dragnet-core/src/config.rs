//! Run configuration (what a caller asks for) and scheduler settings (how
//! the deployment is tuned).

use std::time::Duration;

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::retry::RetryPolicy;
use crate::router::SourceFilter;

pub const DEFAULT_BATCH_SIZE: u32 = 10;
pub const MIN_BATCH_SIZE: u32 = 1;
pub const MAX_BATCH_SIZE: u32 = 50;

/// Default wall-clock budget for one run.
pub const DEFAULT_MAX_RUNTIME_SECS: u64 = 100;
/// Hard ceiling on the budget. The hosting platform kills invocations at
/// 150s; the gap leaves room for the last item and the final writes.
pub const MAX_RUNTIME_CEILING_SECS: u64 = 130;

/// Longest accepted retry backoff (30 days).
pub const MAX_BACKOFF_SECS: i64 = 30 * 24 * 60 * 60;
/// Longest accepted claim lease (one day).
pub const MAX_LEASE_TTL_SECS: i64 = 24 * 60 * 60;

/// Raw run request as received over HTTP, from the CLI, or from a
/// continuation. Every field is optional; [`RunConfig::from_request`] applies
/// defaults and bounds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub continuous: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_runtime_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chain_depth: Option<u32>,
}

/// Validated configuration for one scheduler run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    pub batch_size: u32,
    pub source_filter: SourceFilter,
    /// Keep doing rounds until the budget trips or a round makes no
    /// progress, and chain a new run when work remains.
    pub continuous: bool,
    pub max_runtime: Duration,
    /// How many continuations preceded this run.
    pub chain_depth: u32,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            source_filter: SourceFilter::All,
            continuous: false,
            max_runtime: Duration::from_secs(DEFAULT_MAX_RUNTIME_SECS),
            chain_depth: 0,
        }
    }
}

impl RunConfig {
    /// Apply defaults and clamp out-of-range values.
    ///
    /// Only an empty source name is rejected; unknown names are caught when
    /// the scheduler selects routes.
    pub fn from_request(request: &RunRequest) -> Result<Self, AppError> {
        let source_filter = match request.source.as_deref() {
            None => SourceFilter::All,
            Some(s) => s.parse().map_err(AppError::ConfigError)?,
        };

        let batch_size = request
            .batch_size
            .unwrap_or(DEFAULT_BATCH_SIZE)
            .clamp(MIN_BATCH_SIZE, MAX_BATCH_SIZE);

        let max_runtime_secs = request
            .max_runtime_seconds
            .unwrap_or(DEFAULT_MAX_RUNTIME_SECS)
            .clamp(1, MAX_RUNTIME_CEILING_SECS);

        Ok(Self {
            batch_size,
            source_filter,
            continuous: request.continuous.unwrap_or(false),
            max_runtime: Duration::from_secs(max_runtime_secs),
            chain_depth: request.chain_depth.unwrap_or(0),
        })
    }

    pub fn with_source(mut self, filter: SourceFilter) -> Self {
        self.source_filter = filter;
        self
    }

    pub fn with_batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = batch_size.clamp(MIN_BATCH_SIZE, MAX_BATCH_SIZE);
        self
    }

    pub fn with_continuous(mut self, continuous: bool) -> Self {
        self.continuous = continuous;
        self
    }

    pub fn with_max_runtime(mut self, max_runtime: Duration) -> Self {
        self.max_runtime =
            max_runtime.clamp(Duration::from_secs(1), Duration::from_secs(MAX_RUNTIME_CEILING_SECS));
        self
    }

    /// The request a continuation of this run carries: same settings, one
    /// link further down the chain.
    pub fn continuation_request(&self) -> RunRequest {
        RunRequest {
            batch_size: Some(self.batch_size),
            source: Some(self.source_filter.to_string()),
            continuous: Some(self.continuous),
            max_runtime_seconds: Some(self.max_runtime.as_secs()),
            chain_depth: Some(self.chain_depth + 1),
        }
    }
}

/// Deployment-level scheduler knobs.
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub worker_id: String,
    pub retry: RetryPolicy,
    pub lease_ttl: TimeDelta,
    /// Upper bound on one extractor call.
    pub item_timeout: Duration,
    /// Error samples kept in a run summary.
    pub max_error_samples: usize,
    pub max_chain_depth: u32,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            worker_id: format!("worker-{}", &Uuid::new_v4().to_string()[..8]),
            retry: RetryPolicy::default(),
            lease_ttl: TimeDelta::seconds(300),
            item_timeout: Duration::from_secs(45),
            max_error_samples: 20,
            max_chain_depth: 25,
        }
    }
}

impl SchedulerSettings {
    pub fn with_worker_id(mut self, id: impl Into<String>) -> Self {
        self.worker_id = id.into();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_item_timeout(mut self, timeout: Duration) -> Self {
        self.item_timeout = timeout;
        self
    }

    /// Read settings from environment variables.
    ///
    /// - `DRAGNET_WORKER_ID` (default `worker-<8 hex>`)
    /// - `DRAGNET_MAX_ATTEMPTS` (default 3)
    /// - `DRAGNET_LEASE_TTL_SECS` (default 300)
    /// - `DRAGNET_ITEM_TIMEOUT_SECS` (default 45)
    /// - `DRAGNET_BACKOFF_BASE_SECS` (default 60)
    /// - `DRAGNET_BACKOFF_MAX_SECS` (default 3600)
    /// - `DRAGNET_MAX_CHAIN_DEPTH` (default 25)
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let worker_id = lookup("DRAGNET_WORKER_ID")
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(defaults.worker_id);

        let max_attempts = parse_var(&lookup, "DRAGNET_MAX_ATTEMPTS", 3u32)?;
        if max_attempts == 0 {
            return Err(AppError::ConfigError(
                "DRAGNET_MAX_ATTEMPTS must be at least 1".into(),
            ));
        }
        let lease_ttl_secs = parse_var(&lookup, "DRAGNET_LEASE_TTL_SECS", 300i64)?;
        if lease_ttl_secs <= 0 || lease_ttl_secs > MAX_LEASE_TTL_SECS {
            return Err(AppError::ConfigError(format!(
                "DRAGNET_LEASE_TTL_SECS must be between 1 and {MAX_LEASE_TTL_SECS}"
            )));
        }
        let item_timeout_secs = parse_var(&lookup, "DRAGNET_ITEM_TIMEOUT_SECS", 45u64)?;
        if item_timeout_secs == 0 {
            return Err(AppError::ConfigError(
                "DRAGNET_ITEM_TIMEOUT_SECS must be at least 1".into(),
            ));
        }
        let base_secs = parse_var(&lookup, "DRAGNET_BACKOFF_BASE_SECS", 60i64)?;
        let max_secs = parse_var(&lookup, "DRAGNET_BACKOFF_MAX_SECS", 3600i64)?;
        if base_secs < 0 || max_secs < base_secs || max_secs > MAX_BACKOFF_SECS {
            return Err(AppError::ConfigError(format!(
                "Invalid backoff bounds: base {base_secs}s, max {max_secs}s \
                 (0 <= base <= max <= {MAX_BACKOFF_SECS})"
            )));
        }
        let max_chain_depth = parse_var(&lookup, "DRAGNET_MAX_CHAIN_DEPTH", 25u32)?;

        Ok(Self {
            worker_id,
            retry: RetryPolicy {
                max_attempts,
                base_delay: TimeDelta::seconds(base_secs),
                max_delay: TimeDelta::seconds(max_secs),
            },
            lease_ttl: TimeDelta::seconds(lease_ttl_secs),
            item_timeout: Duration::from_secs(item_timeout_secs),
            max_error_samples: defaults.max_error_samples,
            max_chain_depth,
        })
    }
}

fn parse_var<F, T>(lookup: &F, key: &str, default: T) -> Result<T, AppError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| {
            AppError::ConfigError(format!("Invalid {key} '{raw}': expected a number"))
        }),
    }
}
