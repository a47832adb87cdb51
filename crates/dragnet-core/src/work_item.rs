use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{DomainPattern, domain_of};
use crate::error::AppError;

/// Lifecycle state of a work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkStatus {
    Pending,
    Claimed,
    Complete,
    Failed,
}

impl WorkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkStatus::Pending => "pending",
            WorkStatus::Claimed => "claimed",
            WorkStatus::Complete => "complete",
            WorkStatus::Failed => "failed",
        }
    }

    /// Complete and failed items are never claimed or mutated again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkStatus::Complete | WorkStatus::Failed)
    }

    pub const ALL: [WorkStatus; 4] = [
        WorkStatus::Pending,
        WorkStatus::Claimed,
        WorkStatus::Complete,
        WorkStatus::Failed,
    ];
}

impl fmt::Display for WorkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for WorkStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(WorkStatus::Pending),
            "claimed" => Ok(WorkStatus::Claimed),
            "complete" => Ok(WorkStatus::Complete),
            "failed" => Ok(WorkStatus::Failed),
            _ => Err(format!("Unknown work status: {}", s)),
        }
    }
}

/// A discovered listing URL waiting to be (or being) processed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: Uuid,
    pub url: String,
    pub domain: String,
    pub status: WorkStatus,
    /// Number of finished attempts. Only ever increases.
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

impl WorkItem {
    /// 1-indexed number of the attempt a claimed item is currently on.
    pub fn current_attempt(&self) -> u32 {
        self.attempts + 1
    }

    /// True while the lease recorded on the item has not reached its TTL.
    pub fn has_live_lease(&self, now: DateTime<Utc>, lease_ttl: TimeDelta) -> bool {
        self.locked_at
            .is_some_and(|locked_at| now - locked_at < lease_ttl)
    }

    /// Whether a claim issued at `now` may take this item.
    ///
    /// Pending items are eligible once their backoff has elapsed; claimed items
    /// only once their lease is stale. Terminal items never are.
    pub fn is_claimable(&self, now: DateTime<Utc>, max_attempts: u32, lease_ttl: TimeDelta) -> bool {
        if self.attempts >= max_attempts {
            return false;
        }
        match self.status {
            WorkStatus::Pending => {
                self.next_attempt_at.is_none_or(|at| at <= now)
                    && !self.has_live_lease(now, lease_ttl)
            }
            WorkStatus::Claimed => !self.has_live_lease(now, lease_ttl),
            WorkStatus::Complete | WorkStatus::Failed => false,
        }
    }
}

/// Request to add a URL to the backlog.
#[derive(Debug, Clone)]
pub struct NewWorkItem {
    pub url: String,
    pub domain: String,
    pub priority: i32,
}

impl NewWorkItem {
    /// Build a new item, deriving its routing domain from the URL.
    pub fn new(url: impl Into<String>) -> Result<Self, AppError> {
        let url = url.into();
        let domain = domain_of(&url)?;
        Ok(Self {
            url,
            domain,
            priority: 0,
        })
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

/// Parameters of one atomic batch claim.
#[derive(Debug, Clone)]
pub struct ClaimRequest {
    pub domain_pattern: DomainPattern,
    pub batch_size: u32,
    pub max_attempts: u32,
    pub worker_id: String,
    pub lease_ttl: TimeDelta,
}

/// What the extractor reported on success, recorded on completion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionMetadata {
    pub extractor: String,
    pub result_id: Option<String>,
}
