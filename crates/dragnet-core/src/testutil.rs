//! Test utilities: mock implementations of the core traits.
//!
//! Handwritten mocks for dependency injection in unit tests.
//! All mocks use `Arc<Mutex<_>>` for interior mutability, allowing
//! test assertions on recorded calls.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::config::RunRequest;
use crate::domain::DomainPattern;
use crate::error::AppError;
use crate::extractor::ExtractionResponse;
use crate::memory_store::InMemoryWorkStore;
use crate::scheduler::{SchedulerEvent, SchedulerReporter};
use crate::store::WorkItemStore;
use crate::traits::{ContinuationTrigger, ExtractorInvoker};
use crate::work_item::{ClaimRequest, CompletionMetadata, NewWorkItem, WorkItem, WorkStatus};

// ---------------------------------------------------------------------------
// MockInvoker
// ---------------------------------------------------------------------------

/// How the mock answers calls to one extractor.
#[derive(Debug, Clone)]
pub enum InvokeBehavior {
    /// `success: true` with a generated result id.
    Succeed,
    Respond(ExtractionResponse),
    /// The call itself fails (transport-level error).
    Error(String),
    /// Never answers; only the caller's timeout ends the call.
    Hang,
}

/// Recorded call: (extractor, url).
pub type InvokeCall = (String, String);

/// Mock extractor invoker with per-extractor behaviour.
#[derive(Clone)]
pub struct MockInvoker {
    behaviors: Arc<Mutex<HashMap<String, InvokeBehavior>>>,
    latency: Duration,
    calls: Arc<Mutex<Vec<InvokeCall>>>,
}

impl MockInvoker {
    /// Invoker that succeeds for every extractor.
    pub fn new() -> Self {
        Self {
            behaviors: Arc::new(Mutex::new(HashMap::new())),
            latency: Duration::ZERO,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_behavior(self, extractor: &str, behavior: InvokeBehavior) -> Self {
        self.behaviors
            .lock()
            .unwrap()
            .insert(extractor.to_string(), behavior);
        self
    }

    /// Sleep this long before answering.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn calls(&self) -> Vec<InvokeCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, url: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, u)| u == url)
            .count()
    }
}

impl Default for MockInvoker {
    fn default() -> Self {
        Self::new()
    }
}

impl ExtractorInvoker for MockInvoker {
    async fn invoke(
        &self,
        extractor: &str,
        url: &str,
        _timeout: Duration,
    ) -> Result<ExtractionResponse, AppError> {
        let call_no = {
            let mut calls = self.calls.lock().unwrap();
            calls.push((extractor.to_string(), url.to_string()));
            calls.len()
        };
        let behavior = self
            .behaviors
            .lock()
            .unwrap()
            .get(extractor)
            .cloned()
            .unwrap_or(InvokeBehavior::Succeed);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        match behavior {
            InvokeBehavior::Succeed => Ok(ExtractionResponse::succeeded(format!("result-{call_no}"))),
            InvokeBehavior::Respond(response) => Ok(response),
            InvokeBehavior::Error(message) => Err(AppError::NetworkError(message)),
            InvokeBehavior::Hang => std::future::pending().await,
        }
    }
}

// ---------------------------------------------------------------------------
// RecordingTrigger
// ---------------------------------------------------------------------------

/// Continuation trigger that records every request it is asked to send.
#[derive(Clone, Default)]
pub struct RecordingTrigger {
    requests: Arc<Mutex<Vec<RunRequest>>>,
    fail: bool,
    delay: Duration,
}

impl RecordingTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records requests, then reports a send failure.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Sleep this long before recording, like a network round trip.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn requests(&self) -> Vec<RunRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl ContinuationTrigger for RecordingTrigger {
    async fn trigger(&self, request: RunRequest) -> Result<(), AppError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.requests.lock().unwrap().push(request);
        if self.fail {
            Err(AppError::ContinuationError("processor unreachable".into()))
        } else {
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// FlakyStore
// ---------------------------------------------------------------------------

/// In-memory store with injectable faults.
#[derive(Clone)]
pub struct FlakyStore {
    inner: InMemoryWorkStore,
    claims_before_failure: Arc<Mutex<Option<usize>>>,
    rejected_claims: Option<String>,
    lose_leases: bool,
    reject_writes: bool,
}

impl FlakyStore {
    pub fn new(inner: InMemoryWorkStore) -> Self {
        Self {
            inner,
            claims_before_failure: Arc::new(Mutex::new(None)),
            rejected_claims: None,
            lose_leases: false,
            reject_writes: false,
        }
    }

    /// Let `n` claims through, then fail every claim with a database error.
    pub fn fail_claims_after(self, n: usize) -> Self {
        *self.claims_before_failure.lock().unwrap() = Some(n);
        self
    }

    /// Reject every transition as if another worker held the lease.
    pub fn lose_leases(mut self) -> Self {
        self.lose_leases = true;
        self
    }

    /// Refuse claims for this domain pattern with an error that is not a
    /// store outage.
    pub fn reject_claims_for(mut self, pattern: &str) -> Self {
        self.rejected_claims = Some(pattern.to_string());
        self
    }

    /// Refuse every transition with an error that is not a store outage.
    pub fn reject_writes(mut self) -> Self {
        self.reject_writes = true;
        self
    }

    fn check_write(&self) -> Result<(), AppError> {
        if self.reject_writes {
            return Err(AppError::Generic("row failed a check constraint".into()));
        }
        Ok(())
    }
}

impl WorkItemStore for FlakyStore {
    async fn enqueue(&self, item: NewWorkItem) -> Result<WorkItem, AppError> {
        self.inner.enqueue(item).await
    }

    async fn claim_batch(&self, request: &ClaimRequest) -> Result<Vec<WorkItem>, AppError> {
        {
            let mut budget = self.claims_before_failure.lock().unwrap();
            match budget.as_mut() {
                Some(0) => {
                    return Err(AppError::DatabaseError("connection refused".into()));
                }
                Some(n) => *n -= 1,
                None => {}
            }
        }
        if self.rejected_claims.as_deref() == Some(request.domain_pattern.as_str()) {
            return Err(AppError::Generic(format!(
                "claim query rejected for {}",
                request.domain_pattern.as_str()
            )));
        }
        self.inner.claim_batch(request).await
    }

    async fn complete(
        &self,
        id: Uuid,
        worker_id: &str,
        metadata: &CompletionMetadata,
    ) -> Result<bool, AppError> {
        self.check_write()?;
        if self.lose_leases {
            return Ok(false);
        }
        self.inner.complete(id, worker_id, metadata).await
    }

    async fn retry(
        &self,
        id: Uuid,
        worker_id: &str,
        error: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        self.check_write()?;
        if self.lose_leases {
            return Ok(false);
        }
        self.inner.retry(id, worker_id, error, next_attempt_at).await
    }

    async fn fail(&self, id: Uuid, worker_id: &str, error: &str) -> Result<bool, AppError> {
        self.check_write()?;
        if self.lose_leases {
            return Ok(false);
        }
        self.inner.fail(id, worker_id, error).await
    }

    async fn get_item(&self, id: Uuid) -> Result<Option<WorkItem>, AppError> {
        self.inner.get_item(id).await
    }

    async fn count_eligible(
        &self,
        patterns: &[DomainPattern],
        max_attempts: u32,
    ) -> Result<i64, AppError> {
        self.inner.count_eligible(patterns, max_attempts).await
    }

    async fn count_by_status(&self, status: WorkStatus) -> Result<i64, AppError> {
        self.inner.count_by_status(status).await
    }

    async fn health_check(&self) -> Result<(), AppError> {
        self.inner.health_check().await
    }
}

// ---------------------------------------------------------------------------
// MockReporter
// ---------------------------------------------------------------------------

/// Mock scheduler reporter that records event labels.
#[derive(Default)]
pub struct MockReporter {
    pub events: Arc<Mutex<Vec<String>>>,
}

impl MockReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, label: &str) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| *e == label)
            .count()
    }
}

impl SchedulerReporter for MockReporter {
    fn report(&self, event: SchedulerEvent<'_>) {
        let label = match &event {
            SchedulerEvent::RunStarted { .. } => "RunStarted",
            SchedulerEvent::RoundStarted { .. } => "RoundStarted",
            SchedulerEvent::BatchClaimed { .. } => "BatchClaimed",
            SchedulerEvent::ItemStarted { .. } => "ItemStarted",
            SchedulerEvent::ItemCompleted { .. } => "ItemCompleted",
            SchedulerEvent::ItemRetrying { .. } => "ItemRetrying",
            SchedulerEvent::ItemFailed { .. } => "ItemFailed",
            SchedulerEvent::ItemSkipped { .. } => "ItemSkipped",
            SchedulerEvent::LeaseLost { .. } => "LeaseLost",
            SchedulerEvent::BudgetExhausted { .. } => "BudgetExhausted",
            SchedulerEvent::StoreUnavailable { .. } => "StoreUnavailable",
            SchedulerEvent::RunFinished { .. } => "RunFinished",
        };
        self.events.lock().unwrap().push(label.to_string());
    }
}

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

/// Create a pending WorkItem for `url` without going through a store.
pub fn make_test_item(url: &str) -> WorkItem {
    let now = Utc::now();
    WorkItem {
        id: Uuid::new_v4(),
        url: url.to_string(),
        domain: crate::domain::domain_of(url).unwrap_or_default(),
        status: WorkStatus::Pending,
        attempts: 0,
        priority: 0,
        locked_by: None,
        locked_at: None,
        next_attempt_at: None,
        error_message: None,
        result_id: None,
        created_at: now,
        updated_at: now,
    }
}
