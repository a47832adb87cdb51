//! In-process [`WorkItemStore`] with the same claim semantics as the
//! PostgreSQL store.
//!
//! A single mutex guards the whole backlog, so a claim is trivially atomic.
//! Used for local dry runs and as the reference implementation in tests; the
//! clock can be frozen and advanced to exercise lease expiry and backoff.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, TimeDelta, Utc};
use uuid::Uuid;

use crate::domain::DomainPattern;
use crate::error::AppError;
use crate::store::WorkItemStore;
use crate::work_item::{ClaimRequest, CompletionMetadata, NewWorkItem, WorkItem, WorkStatus};

#[derive(Debug, Default)]
struct Inner {
    items: Vec<WorkItem>,
    frozen_now: Option<DateTime<Utc>>,
}

/// Mutex-backed work-item store.
#[derive(Debug, Clone, Default)]
pub struct InMemoryWorkStore {
    inner: Arc<Mutex<Inner>>,
}

impl InMemoryWorkStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store whose clock stays at `now` until [`advance`](Self::advance) is called.
    pub fn with_frozen_clock(now: DateTime<Utc>) -> Self {
        let store = Self::default();
        store.lock().frozen_now = Some(now);
        store
    }

    /// Move a frozen clock forward. No-op on a wall-clock store.
    pub fn advance(&self, by: TimeDelta) {
        let mut inner = self.lock();
        if let Some(now) = inner.frozen_now.as_mut() {
            *now += by;
        }
    }

    /// Snapshot of every item, in insertion order.
    pub fn items(&self) -> Vec<WorkItem> {
        self.lock().items.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned work store mutex");
            poisoned.into_inner()
        })
    }

    /// Apply `f` to the item if `worker_id` still holds its lease.
    fn transition<F>(&self, id: Uuid, worker_id: &str, f: F) -> bool
    where
        F: FnOnce(&mut WorkItem, DateTime<Utc>),
    {
        let mut inner = self.lock();
        let now = inner.frozen_now.unwrap_or_else(Utc::now);
        let Some(item) = inner.items.iter_mut().find(|i| i.id == id) else {
            return false;
        };
        if item.status != WorkStatus::Claimed || item.locked_by.as_deref() != Some(worker_id) {
            return false;
        }
        f(item, now);
        item.locked_by = None;
        item.locked_at = None;
        item.updated_at = now;
        true
    }
}

impl WorkItemStore for InMemoryWorkStore {
    async fn enqueue(&self, new: NewWorkItem) -> Result<WorkItem, AppError> {
        let mut inner = self.lock();
        let now = inner.frozen_now.unwrap_or_else(Utc::now);

        if let Some(existing) = inner
            .items
            .iter()
            .find(|i| i.url == new.url && !i.status.is_terminal())
        {
            return Ok(existing.clone());
        }

        let item = WorkItem {
            id: Uuid::new_v4(),
            url: new.url,
            domain: new.domain,
            status: WorkStatus::Pending,
            attempts: 0,
            priority: new.priority,
            locked_by: None,
            locked_at: None,
            next_attempt_at: None,
            error_message: None,
            result_id: None,
            created_at: now,
            updated_at: now,
        };
        inner.items.push(item.clone());
        Ok(item)
    }

    async fn claim_batch(&self, request: &ClaimRequest) -> Result<Vec<WorkItem>, AppError> {
        let mut inner = self.lock();
        let now = inner.frozen_now.unwrap_or_else(Utc::now);

        let mut eligible: Vec<usize> = inner
            .items
            .iter()
            .enumerate()
            .filter(|(_, i)| {
                request.domain_pattern.matches(&i.domain)
                    && i.is_claimable(now, request.max_attempts, request.lease_ttl)
            })
            .map(|(idx, _)| idx)
            .collect();

        // Highest priority first, then whatever was touched longest ago.
        eligible.sort_by(|&a, &b| {
            let (a, b) = (&inner.items[a], &inner.items[b]);
            b.priority
                .cmp(&a.priority)
                .then(a.updated_at.cmp(&b.updated_at))
        });
        eligible.truncate(request.batch_size as usize);

        let claimed = eligible
            .into_iter()
            .map(|idx| {
                let item = &mut inner.items[idx];
                item.status = WorkStatus::Claimed;
                item.locked_by = Some(request.worker_id.clone());
                item.locked_at = Some(now);
                item.updated_at = now;
                item.clone()
            })
            .collect();

        Ok(claimed)
    }

    async fn complete(
        &self,
        id: Uuid,
        worker_id: &str,
        metadata: &CompletionMetadata,
    ) -> Result<bool, AppError> {
        Ok(self.transition(id, worker_id, |item, _| {
            item.status = WorkStatus::Complete;
            item.result_id = metadata.result_id.clone();
            item.error_message = None;
            item.next_attempt_at = None;
        }))
    }

    async fn retry(
        &self,
        id: Uuid,
        worker_id: &str,
        error: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        Ok(self.transition(id, worker_id, |item, _| {
            item.status = WorkStatus::Pending;
            item.attempts += 1;
            item.error_message = Some(error.to_string());
            item.next_attempt_at = Some(next_attempt_at);
        }))
    }

    async fn fail(&self, id: Uuid, worker_id: &str, error: &str) -> Result<bool, AppError> {
        Ok(self.transition(id, worker_id, |item, _| {
            item.status = WorkStatus::Failed;
            item.attempts += 1;
            item.error_message = Some(error.to_string());
            item.next_attempt_at = None;
        }))
    }

    async fn get_item(&self, id: Uuid) -> Result<Option<WorkItem>, AppError> {
        Ok(self.lock().items.iter().find(|i| i.id == id).cloned())
    }

    async fn count_eligible(
        &self,
        patterns: &[DomainPattern],
        max_attempts: u32,
    ) -> Result<i64, AppError> {
        let inner = self.lock();
        let count = inner
            .items
            .iter()
            .filter(|i| !i.status.is_terminal() && i.attempts < max_attempts)
            .filter(|i| patterns.iter().any(|p| p.matches(&i.domain)))
            .count();
        Ok(count as i64)
    }

    async fn count_by_status(&self, status: WorkStatus) -> Result<i64, AppError> {
        let inner = self.lock();
        Ok(inner.items.iter().filter(|i| i.status == status).count() as i64)
    }

    async fn health_check(&self) -> Result<(), AppError> {
        Ok(())
    }
}
