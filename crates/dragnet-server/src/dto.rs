use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use dragnet_core::config::RunRequest;
use dragnet_core::metrics::{ErrorSample, RunSummary, SourceStats};
use dragnet_core::router::SourceRoute;
use dragnet_core::work_item::WorkItem;

// ---------------------------------------------------------------------------
// Runs
// ---------------------------------------------------------------------------

/// Body of `POST /v1/runs` and `POST /v1/runs/dispatch`. Every field is optional.
#[derive(Debug, Default, Deserialize, utoipa::ToSchema)]
#[serde(default)]
pub struct RunRequestBody {
    /// Items claimed per source per round (1..=50, default 10)
    pub batch_size: Option<u32>,
    /// Source name, or "all" (default)
    pub source: Option<String>,
    /// Repeat rounds until the budget trips or the queue drains, and chain
    /// a continuation if work remains
    pub continuous: Option<bool>,
    /// Wall-clock budget in seconds (1..=130, default 100)
    pub max_runtime_seconds: Option<u64>,
    /// Set by continuations; callers normally omit it
    pub chain_depth: Option<u32>,
}

impl From<RunRequestBody> for RunRequest {
    fn from(body: RunRequestBody) -> Self {
        Self {
            batch_size: body.batch_size,
            source: body.source,
            continuous: body.continuous,
            max_runtime_seconds: body.max_runtime_seconds,
            chain_depth: body.chain_depth,
        }
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct SourceStatsResponse {
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub retried: u64,
    pub skipped: u64,
}

impl From<SourceStats> for SourceStatsResponse {
    fn from(s: SourceStats) -> Self {
        Self {
            processed: s.processed,
            succeeded: s.succeeded,
            failed: s.failed,
            retried: s.retried,
            skipped: s.skipped,
        }
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ErrorSampleResponse {
    pub item_id: Uuid,
    pub source: String,
    pub url: String,
    pub error: String,
}

impl From<ErrorSample> for ErrorSampleResponse {
    fn from(e: ErrorSample) -> Self {
        Self {
            item_id: e.item_id,
            source: e.source,
            url: e.url,
            error: e.error,
        }
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct RunResponse {
    pub worker_id: String,
    pub total_processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub retried: u64,
    pub skipped: u64,
    pub per_source: BTreeMap<String, SourceStatsResponse>,
    pub elapsed_seconds: f64,
    pub items_per_hour: f64,
    pub left_claimed: u64,
    pub lease_lost: u64,
    /// queue_empty | budget_exhausted | single_pass | store_unavailable
    pub stop_reason: String,
    pub continued: bool,
    pub chain_depth: u32,
    pub remaining_estimate: Option<i64>,
    pub errors: Vec<ErrorSampleResponse>,
    pub errors_truncated: u64,
}

impl From<RunSummary> for RunResponse {
    fn from(s: RunSummary) -> Self {
        Self {
            worker_id: s.worker_id,
            total_processed: s.total_processed,
            succeeded: s.succeeded,
            failed: s.failed,
            retried: s.retried,
            skipped: s.skipped,
            per_source: s
                .per_source
                .into_iter()
                .map(|(name, stats)| (name, stats.into()))
                .collect(),
            elapsed_seconds: s.elapsed_seconds,
            items_per_hour: s.items_per_hour,
            left_claimed: s.left_claimed,
            lease_lost: s.lease_lost,
            stop_reason: s.stop_reason.to_string(),
            continued: s.continued,
            chain_depth: s.chain_depth,
            remaining_estimate: s.remaining_estimate,
            errors: s.errors.into_iter().map(ErrorSampleResponse::from).collect(),
            errors_truncated: s.errors_truncated,
        }
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct DispatchResponse {
    pub accepted: bool,
    pub chain_depth: u32,
}

// ---------------------------------------------------------------------------
// Items
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct EnqueueRequest {
    /// Listing URL
    pub url: String,
    /// Higher is claimed first (default 0)
    pub priority: Option<i32>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct WorkItemResponse {
    pub id: Uuid,
    pub url: String,
    pub domain: String,
    pub status: String,
    pub attempts: u32,
    pub priority: i32,
    pub locked_by: Option<String>,
    pub locked_at: Option<DateTime<Utc>>,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub result_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<WorkItem> for WorkItemResponse {
    fn from(item: WorkItem) -> Self {
        Self {
            id: item.id,
            url: item.url,
            domain: item.domain,
            status: item.status.to_string(),
            attempts: item.attempts,
            priority: item.priority,
            locked_by: item.locked_by,
            locked_at: item.locked_at,
            next_attempt_at: item.next_attempt_at,
            error_message: item.error_message,
            result_id: item.result_id,
            created_at: item.created_at,
            updated_at: item.updated_at,
        }
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct QueueStatsResponse {
    /// Item count per status
    pub counts: BTreeMap<String, i64>,
    pub total: i64,
}

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct SourceResponse {
    pub name: String,
    pub domain: String,
    pub extractor: String,
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl From<&SourceRoute> for SourceResponse {
    fn from(route: &SourceRoute) -> Self {
        Self {
            name: route.name.clone(),
            domain: route.pattern.as_str().to_string(),
            extractor: route.extractor.clone(),
            min_delay_ms: route.delay.min.as_millis() as u64,
            max_delay_ms: route.delay.max.as_millis() as u64,
        }
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct SourceListResponse {
    pub sources: Vec<SourceResponse>,
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: &'static str,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}
