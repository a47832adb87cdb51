use std::future::Future;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::DomainPattern;
use crate::error::AppError;
use crate::work_item::{ClaimRequest, CompletionMetadata, NewWorkItem, WorkItem, WorkStatus};

/// Durable backlog of work items shared by every scheduler instance.
///
/// Implementations must make `claim_batch` a single atomic operation
/// (`SELECT ... FOR UPDATE SKIP LOCKED` or equivalent): it is the only thing
/// preventing two workers from processing the same item.
///
/// The transitions (`complete`, `retry`, `fail`) are fenced by the lease: they
/// apply only while `worker_id` still holds the item in `claimed` state and
/// return `false` otherwise.
pub trait WorkItemStore: Send + Sync + Clone {
    /// Add a URL to the backlog. A live duplicate (pending or claimed) is
    /// returned instead of inserting a second row.
    fn enqueue(&self, item: NewWorkItem)
    -> impl Future<Output = Result<WorkItem, AppError>> + Send;

    /// Atomically claim up to `batch_size` eligible items for `worker_id`.
    ///
    /// Returns an empty list when nothing is eligible.
    fn claim_batch(
        &self,
        request: &ClaimRequest,
    ) -> impl Future<Output = Result<Vec<WorkItem>, AppError>> + Send;

    fn complete(
        &self,
        id: Uuid,
        worker_id: &str,
        metadata: &CompletionMetadata,
    ) -> impl Future<Output = Result<bool, AppError>> + Send;

    /// Release the item back to `pending`, recording the attempt and the
    /// earliest time it may be claimed again.
    fn retry(
        &self,
        id: Uuid,
        worker_id: &str,
        error: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> impl Future<Output = Result<bool, AppError>> + Send;

    /// Mark the item permanently `failed`, recording the attempt.
    fn fail(
        &self,
        id: Uuid,
        worker_id: &str,
        error: &str,
    ) -> impl Future<Output = Result<bool, AppError>> + Send;

    fn get_item(&self, id: Uuid)
    -> impl Future<Output = Result<Option<WorkItem>, AppError>> + Send;

    /// Approximate number of items under `patterns` that are still workable
    /// (pending or claimed, attempts left). A hint, not a guarantee.
    fn count_eligible(
        &self,
        patterns: &[DomainPattern],
        max_attempts: u32,
    ) -> impl Future<Output = Result<i64, AppError>> + Send;

    fn count_by_status(
        &self,
        status: WorkStatus,
    ) -> impl Future<Output = Result<i64, AppError>> + Send;

    /// Check store connectivity.
    fn health_check(&self) -> impl Future<Output = Result<(), AppError>> + Send;
}
