//! The run loop.
//!
//! One run visits the selected sources round-robin. For each source it claims
//! a batch, then works the batch strictly in order: stealth delay, extractor
//! call under the per-item timeout, store transition. Item errors are absorbed
//! by the retry policy. A store error ends the run early only when
//! [`AppError::is_store_failure`] says the store itself is gone; other store
//! errors cost one claim or one write.
//!
//! ```text
//! Idle -> ClaimingBatch(source) -> Processing(item) -> ClaimingBatch(next)
//!                                                   -> StoppedByBudget
//!                                                   -> QueueEmpty
//! ```

use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::budget::RuntimeBudgetGuard;
use crate::config::{RunConfig, SchedulerSettings};
use crate::continuation::ContinuationChainer;
use crate::domain::DomainPattern;
use crate::error::AppError;
use crate::metrics::{ErrorSample, RunMetrics, RunSummary, StopReason};
use crate::retry::{Disposition, ItemOutcome};
use crate::router::{ExtractorRouter, SourceRoute};
use crate::store::WorkItemStore;
use crate::throttle::DomainRateLimiter;
use crate::traits::{ContinuationTrigger, ExtractorInvoker};
use crate::work_item::{ClaimRequest, CompletionMetadata, WorkItem};

/// Error recorded for items whose URL no route accepts.
pub const NO_ROUTE_ERROR: &str = "no extractor route for URL";

/// Events emitted by the scheduler for monitoring/logging.
#[derive(Debug, Clone)]
pub enum SchedulerEvent<'a> {
    RunStarted {
        worker_id: &'a str,
        config: &'a RunConfig,
    },
    RoundStarted {
        round: u32,
    },
    BatchClaimed {
        source: &'a str,
        count: usize,
    },
    ItemStarted {
        item: &'a WorkItem,
        extractor: &'a str,
    },
    ItemCompleted {
        item_id: Uuid,
        source: &'a str,
        result_id: Option<&'a str>,
    },
    ItemRetrying {
        item_id: Uuid,
        source: &'a str,
        error: &'a str,
        attempt: u32,
        next_attempt_at: DateTime<Utc>,
    },
    ItemFailed {
        item_id: Uuid,
        source: &'a str,
        error: &'a str,
        attempt: u32,
    },
    ItemSkipped {
        item_id: Uuid,
        url: &'a str,
    },
    LeaseLost {
        item_id: Uuid,
        source: &'a str,
    },
    BudgetExhausted {
        elapsed: Duration,
        left_claimed: usize,
    },
    StoreUnavailable {
        error: &'a AppError,
    },
    RunFinished {
        summary: &'a RunSummary,
    },
}

/// Trait for receiving scheduler events (decoupled logging).
pub trait SchedulerReporter: Send + Sync {
    fn report(&self, event: SchedulerEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSchedulerReporter;

impl SchedulerReporter for TracingSchedulerReporter {
    fn report(&self, event: SchedulerEvent<'_>) {
        match event {
            SchedulerEvent::RunStarted { worker_id, config } => {
                tracing::info!(
                    %worker_id,
                    source = %config.source_filter,
                    batch_size = config.batch_size,
                    continuous = config.continuous,
                    max_runtime_secs = config.max_runtime.as_secs(),
                    chain_depth = config.chain_depth,
                    "Run started"
                );
            }
            SchedulerEvent::RoundStarted { round } => {
                tracing::debug!(round, "Round started");
            }
            SchedulerEvent::BatchClaimed { source, count } => {
                tracing::info!(%source, count, "Batch claimed");
            }
            SchedulerEvent::ItemStarted { item, extractor } => {
                tracing::debug!(
                    item_id = %item.id,
                    url = %item.url,
                    %extractor,
                    attempt = item.current_attempt(),
                    "Processing item"
                );
            }
            SchedulerEvent::ItemCompleted {
                item_id,
                source,
                result_id,
            } => {
                tracing::info!(%item_id, %source, ?result_id, "Item completed");
            }
            SchedulerEvent::ItemRetrying {
                item_id,
                source,
                error,
                attempt,
                next_attempt_at,
            } => {
                tracing::warn!(
                    %item_id,
                    %source,
                    %error,
                    attempt,
                    %next_attempt_at,
                    "Item failed, will retry"
                );
            }
            SchedulerEvent::ItemFailed {
                item_id,
                source,
                error,
                attempt,
            } => {
                tracing::warn!(%item_id, %source, %error, attempt, "Item failed permanently");
            }
            SchedulerEvent::ItemSkipped { item_id, url } => {
                tracing::warn!(%item_id, %url, "No route for item, skipping");
            }
            SchedulerEvent::LeaseLost { item_id, source } => {
                tracing::warn!(%item_id, %source, "Lease lost before transition");
            }
            SchedulerEvent::BudgetExhausted {
                elapsed,
                left_claimed,
            } => {
                tracing::info!(
                    elapsed_secs = elapsed.as_secs_f64(),
                    left_claimed,
                    "Runtime budget exhausted"
                );
            }
            SchedulerEvent::StoreUnavailable { error } => {
                tracing::error!(error = %error, "Work store unavailable, aborting run");
            }
            SchedulerEvent::RunFinished { summary } => {
                tracing::info!(
                    worker_id = %summary.worker_id,
                    processed = summary.total_processed,
                    succeeded = summary.succeeded,
                    failed = summary.failed,
                    retried = summary.retried,
                    skipped = summary.skipped,
                    elapsed_secs = summary.elapsed_seconds,
                    items_per_hour = summary.items_per_hour,
                    stop_reason = %summary.stop_reason,
                    continued = summary.continued,
                    "Run finished"
                );
            }
        }
    }
}

enum RoundOutcome {
    Finished,
    BudgetExhausted,
}

/// Budget-aware scheduler over a shared work-item store.
#[derive(Clone)]
pub struct Scheduler<S, I, T>
where
    S: WorkItemStore,
    I: ExtractorInvoker,
    T: ContinuationTrigger,
{
    store: S,
    invoker: I,
    router: ExtractorRouter,
    limiter: DomainRateLimiter,
    chainer: ContinuationChainer<T>,
    settings: SchedulerSettings,
}

impl<S, I, T> Scheduler<S, I, T>
where
    S: WorkItemStore,
    I: ExtractorInvoker,
    T: ContinuationTrigger,
{
    pub fn new(
        store: S,
        invoker: I,
        trigger: T,
        router: ExtractorRouter,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            store,
            invoker,
            router,
            limiter: DomainRateLimiter::new(),
            chainer: ContinuationChainer::new(trigger, settings.max_chain_depth),
            settings,
        }
    }

    /// A copy that claims as `{worker_id}-{8 hex}`, so runs sharing a process
    /// never hold leases under one identity. The rate limiter stays shared.
    pub fn for_run(&self) -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        let mut scheduler = self.clone();
        scheduler.settings.worker_id = format!("{}-{}", self.settings.worker_id, &suffix[..8]);
        scheduler
    }

    pub fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    pub fn router(&self) -> &ExtractorRouter {
        &self.router
    }

    pub fn limiter(&self) -> &DomainRateLimiter {
        &self.limiter
    }

    /// Execute one run.
    ///
    /// Returns `Err` only when `config` names an unknown source. A store
    /// failure ends the run with [`StopReason::StoreUnavailable`] and the
    /// counters gathered up to that point.
    ///
    /// A claim the store rejects for another reason skips that source for the
    /// round; a rejected transition leaves the item claimed until its lease
    /// expires.
    pub async fn run<R: SchedulerReporter>(
        &self,
        config: &RunConfig,
        reporter: &R,
    ) -> Result<RunSummary, AppError> {
        let routes = self.router.select(&config.source_filter)?;
        let guard = RuntimeBudgetGuard::start(config.max_runtime);
        let mut metrics = RunMetrics::new(self.settings.max_error_samples);
        for route in &routes {
            metrics.touch(&route.name);
        }

        reporter.report(SchedulerEvent::RunStarted {
            worker_id: &self.settings.worker_id,
            config,
        });

        let mut round = 0u32;
        let stop_reason = loop {
            round += 1;
            reporter.report(SchedulerEvent::RoundStarted { round });
            let handled_before = metrics.handled();

            match self
                .run_round(&routes, config, &guard, &mut metrics, reporter)
                .await
            {
                Ok(RoundOutcome::Finished) => {}
                Ok(RoundOutcome::BudgetExhausted) => break StopReason::BudgetExhausted,
                Err(error) => {
                    reporter.report(SchedulerEvent::StoreUnavailable { error: &error });
                    break StopReason::StoreUnavailable;
                }
            }

            if metrics.handled() == handled_before {
                break StopReason::QueueEmpty;
            }
            if !config.continuous {
                break StopReason::SinglePass;
            }
        };

        let remaining_estimate = if stop_reason == StopReason::StoreUnavailable {
            None
        } else {
            self.estimate_remaining(&routes).await
        };

        let continued = match (stop_reason, remaining_estimate) {
            (StopReason::BudgetExhausted, Some(remaining)) => {
                self.chainer.maybe_continue(config, remaining).await
            }
            _ => false,
        };

        let summary = metrics.finish(
            &self.settings.worker_id,
            guard.elapsed(),
            stop_reason,
            continued,
            config.chain_depth,
            remaining_estimate,
        );
        reporter.report(SchedulerEvent::RunFinished { summary: &summary });

        Ok(summary)
    }

    async fn run_round<R: SchedulerReporter>(
        &self,
        routes: &[&SourceRoute],
        config: &RunConfig,
        guard: &RuntimeBudgetGuard,
        metrics: &mut RunMetrics,
        reporter: &R,
    ) -> Result<RoundOutcome, AppError> {
        for route in routes {
            if guard.expired() {
                reporter.report(SchedulerEvent::BudgetExhausted {
                    elapsed: guard.elapsed(),
                    left_claimed: 0,
                });
                return Ok(RoundOutcome::BudgetExhausted);
            }

            let request = ClaimRequest {
                domain_pattern: route.pattern.clone(),
                batch_size: config.batch_size,
                max_attempts: self.settings.retry.max_attempts,
                worker_id: self.settings.worker_id.clone(),
                lease_ttl: self.settings.lease_ttl,
            };
            let batch = match self.store.claim_batch(&request).await {
                Ok(batch) => batch,
                Err(error) if error.is_store_failure() => return Err(error),
                Err(error) => {
                    tracing::warn!(
                        source = %route.name,
                        error = %error,
                        "Claim rejected, skipping source this round"
                    );
                    continue;
                }
            };
            if batch.is_empty() {
                tracing::debug!(source = %route.name, "Nothing to claim");
                continue;
            }

            reporter.report(SchedulerEvent::BatchClaimed {
                source: &route.name,
                count: batch.len(),
            });

            for (idx, item) in batch.iter().enumerate() {
                if guard.expired() {
                    // Leases on the rest expire on their own; no last-moment writes.
                    let left = batch.len() - idx;
                    metrics.record_left_claimed(left as u64);
                    reporter.report(SchedulerEvent::BudgetExhausted {
                        elapsed: guard.elapsed(),
                        left_claimed: left,
                    });
                    return Ok(RoundOutcome::BudgetExhausted);
                }
                self.process_item(item, route, metrics, reporter).await?;
            }
        }
        Ok(RoundOutcome::Finished)
    }

    async fn process_item<R: SchedulerReporter>(
        &self,
        item: &WorkItem,
        source: &SourceRoute,
        metrics: &mut RunMetrics,
        reporter: &R,
    ) -> Result<(), AppError> {
        let worker_id = self.settings.worker_id.as_str();

        let Some(route) = self.router.resolve(&item.url) else {
            reporter.report(SchedulerEvent::ItemSkipped {
                item_id: item.id,
                url: &item.url,
            });
            metrics.record_skip(&source.name);
            let written = self.store.fail(item.id, worker_id, NO_ROUTE_ERROR).await;
            if self.absorb_write_error(written, item, metrics)? == Some(false) {
                self.lease_lost(item, source, metrics, reporter);
            }
            return Ok(());
        };

        reporter.report(SchedulerEvent::ItemStarted {
            item,
            extractor: &route.extractor,
        });

        self.limiter.wait(&item.domain, &route.delay).await;
        let outcome = self.invoke(route, item).await;
        let attempt = item.current_attempt();

        match self.settings.retry.decide(item.attempts, outcome) {
            Disposition::Complete { result_id } => {
                let metadata = CompletionMetadata {
                    extractor: route.extractor.clone(),
                    result_id,
                };
                let written = self.store.complete(item.id, worker_id, &metadata).await;
                match self.absorb_write_error(written, item, metrics)? {
                    Some(true) => {
                        metrics.record_success(&source.name);
                        reporter.report(SchedulerEvent::ItemCompleted {
                            item_id: item.id,
                            source: &source.name,
                            result_id: metadata.result_id.as_deref(),
                        });
                    }
                    Some(false) => self.lease_lost(item, source, metrics, reporter),
                    None => {}
                }
            }
            Disposition::Retry { error, delay } => {
                let next_attempt_at = Utc::now()
                    .checked_add_signed(delay)
                    .unwrap_or(DateTime::<Utc>::MAX_UTC);
                let written = self
                    .store
                    .retry(item.id, worker_id, &error, next_attempt_at)
                    .await;
                match self.absorb_write_error(written, item, metrics)? {
                    Some(true) => {
                        metrics.record_retry(&source.name);
                        metrics.record_error(error_sample(item, source, &error));
                        reporter.report(SchedulerEvent::ItemRetrying {
                            item_id: item.id,
                            source: &source.name,
                            error: &error,
                            attempt,
                            next_attempt_at,
                        });
                    }
                    Some(false) => self.lease_lost(item, source, metrics, reporter),
                    None => {}
                }
            }
            Disposition::Fail { error } => {
                let written = self.store.fail(item.id, worker_id, &error).await;
                match self.absorb_write_error(written, item, metrics)? {
                    Some(true) => {
                        metrics.record_failure(&source.name);
                        metrics.record_error(error_sample(item, source, &error));
                        reporter.report(SchedulerEvent::ItemFailed {
                            item_id: item.id,
                            source: &source.name,
                            error: &error,
                            attempt,
                        });
                    }
                    Some(false) => self.lease_lost(item, source, metrics, reporter),
                    None => {}
                }
            }
        }

        Ok(())
    }

    /// Call the extractor, bounded by the per-item timeout.
    async fn invoke(&self, route: &SourceRoute, item: &WorkItem) -> ItemOutcome {
        let timeout = self.settings.item_timeout;
        let call = self.invoker.invoke(&route.extractor, &item.url, timeout);
        match tokio::time::timeout(timeout, call).await {
            Ok(Ok(response)) => ItemOutcome::from_response(response),
            Ok(Err(AppError::Timeout(secs))) => ItemOutcome::TimedOut(Duration::from_secs(secs)),
            Ok(Err(e)) => ItemOutcome::from_error(&e),
            Err(_) => ItemOutcome::TimedOut(timeout),
        }
    }

    /// `Ok(None)` when the store refused the write without being down. The
    /// item keeps its lease and is reclaimed once that expires.
    fn absorb_write_error(
        &self,
        written: Result<bool, AppError>,
        item: &WorkItem,
        metrics: &mut RunMetrics,
    ) -> Result<Option<bool>, AppError> {
        match written {
            Ok(applied) => Ok(Some(applied)),
            Err(error) if error.is_store_failure() => Err(error),
            Err(error) => {
                tracing::warn!(
                    item_id = %item.id,
                    error = %error,
                    "Store rejected item transition, leaving it claimed"
                );
                metrics.record_left_claimed(1);
                Ok(None)
            }
        }
    }

    fn lease_lost<R: SchedulerReporter>(
        &self,
        item: &WorkItem,
        source: &SourceRoute,
        metrics: &mut RunMetrics,
        reporter: &R,
    ) {
        metrics.record_lease_lost();
        reporter.report(SchedulerEvent::LeaseLost {
            item_id: item.id,
            source: &source.name,
        });
    }

    async fn estimate_remaining(&self, routes: &[&SourceRoute]) -> Option<i64> {
        let patterns: Vec<DomainPattern> = routes.iter().map(|r| r.pattern.clone()).collect();
        match self
            .store
            .count_eligible(&patterns, self.settings.retry.max_attempts)
            .await
        {
            Ok(remaining) => Some(remaining),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to estimate remaining work");
                None
            }
        }
    }
}

fn error_sample(item: &WorkItem, source: &SourceRoute, error: &str) -> ErrorSample {
    ErrorSample {
        item_id: item.id,
        source: source.name.clone(),
        url: item.url.clone(),
        error: error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;

    use super::*;
    use crate::extractor::ExtractionResponse;
    use crate::memory_store::InMemoryWorkStore;
    use crate::retry::RetryPolicy;
    use crate::testutil::{FlakyStore, InvokeBehavior, MockInvoker, MockReporter, RecordingTrigger};
    use crate::throttle::DelayProfile;
    use crate::work_item::{NewWorkItem, WorkStatus};

    fn test_router() -> ExtractorRouter {
        ExtractorRouter::new(vec![
            SourceRoute::new(
                "sitea",
                "sitea.test",
                "extract-site-a",
                DelayProfile::from_millis(100, 200),
            ),
            SourceRoute::new("siteb", "siteb.test", "extract-site-b", DelayProfile::none()),
        ])
        .unwrap()
    }

    fn settings() -> SchedulerSettings {
        SchedulerSettings::default()
            .with_worker_id("test-worker")
            .with_retry(RetryPolicy {
                max_attempts: 3,
                base_delay: TimeDelta::zero(),
                max_delay: TimeDelta::zero(),
            })
            .with_item_timeout(Duration::from_secs(1))
    }

    async fn seed<S: WorkItemStore>(store: &S, host: &str, count: usize) -> Vec<WorkItem> {
        let mut items = Vec::new();
        for n in 0..count {
            let new = NewWorkItem::new(format!("https://{host}/listing/{n}")).unwrap();
            items.push(store.enqueue(new).await.unwrap());
        }
        items
    }

    fn scheduler<S: WorkItemStore>(
        store: S,
        invoker: MockInvoker,
        trigger: RecordingTrigger,
    ) -> Scheduler<S, MockInvoker, RecordingTrigger> {
        Scheduler::new(store, invoker, trigger, test_router(), settings())
    }

    fn continuous() -> RunConfig {
        RunConfig::default()
            .with_continuous(true)
            .with_max_runtime(Duration::from_secs(60))
    }

    #[tokio::test(start_paused = true)]
    async fn mixed_backlog_converges() {
        let store = InMemoryWorkStore::new();
        seed(&store, "sitea.test", 3).await;
        let hanging = seed(&store, "siteb.test", 2).await;

        let invoker = MockInvoker::new().with_behavior("extract-site-b", InvokeBehavior::Hang);
        let sched = scheduler(store.clone(), invoker.clone(), RecordingTrigger::new());

        let summary = sched.run(&continuous(), &MockReporter::new()).await.unwrap();

        assert_eq!(summary.succeeded, 3);
        assert_eq!(summary.source("sitea").succeeded, 3);
        assert_eq!(summary.source("siteb").failed, 2);
        assert_eq!(summary.source("siteb").retried, 4);
        assert_eq!(summary.total_processed, 9);
        assert_eq!(summary.stop_reason, StopReason::QueueEmpty);
        assert!(!summary.continued);

        for item in &hanging {
            let stored = store.get_item(item.id).await.unwrap().unwrap();
            assert_eq!(stored.status, WorkStatus::Failed);
            assert_eq!(stored.attempts, 3);
            assert_eq!(invoker.calls_for(&item.url), 3);
        }
        assert!(
            store
                .items()
                .iter()
                .filter(|i| i.domain == "sitea.test")
                .all(|i| i.status == WorkStatus::Complete)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn empty_queue_returns_immediately() {
        let store = InMemoryWorkStore::new();
        let invoker = MockInvoker::new();
        let reporter = MockReporter::new();
        let sched = scheduler(store, invoker.clone(), RecordingTrigger::new());

        let summary = sched.run(&continuous(), &reporter).await.unwrap();

        assert_eq!(summary.total_processed, 0);
        assert_eq!(summary.stop_reason, StopReason::QueueEmpty);
        assert_eq!(summary.remaining_estimate, Some(0));
        assert!(summary.elapsed_seconds < 1.0);
        assert_eq!(reporter.count("RoundStarted"), 1);
        assert!(invoker.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn run_stays_within_budget() {
        let store = InMemoryWorkStore::new();
        seed(&store, "siteb.test", 200).await;

        let invoker = MockInvoker::new().with_latency(Duration::from_millis(900));
        let trigger = RecordingTrigger::new().with_delay(Duration::from_millis(5));
        let sched = scheduler(store.clone(), invoker, trigger.clone());
        let config = RunConfig::default()
            .with_continuous(true)
            .with_batch_size(50)
            .with_max_runtime(Duration::from_secs(5));

        let started = tokio::time::Instant::now();
        let summary = sched.run(&config, &MockReporter::new()).await.unwrap();
        let elapsed = started.elapsed();

        // One item may start just before expiry and run to its timeout.
        assert!(elapsed <= Duration::from_secs(5) + sched.settings().item_timeout);
        assert_eq!(summary.stop_reason, StopReason::BudgetExhausted);
        assert!(summary.succeeded >= 5 && summary.succeeded <= 6);
        assert_eq!(summary.left_claimed, 50 - summary.succeeded);
        assert!(summary.remaining_estimate.unwrap() > 0);

        assert!(summary.continued);
        let requests = trigger.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].chain_depth, Some(1));

        let claimed = store
            .items()
            .iter()
            .filter(|i| i.status == WorkStatus::Claimed)
            .count() as u64;
        assert_eq!(claimed, summary.left_claimed);
    }

    #[tokio::test(start_paused = true)]
    async fn single_pass_does_one_round() {
        let store = InMemoryWorkStore::new();
        seed(&store, "siteb.test", 2).await;
        let invoker = MockInvoker::new().with_behavior("extract-site-b", InvokeBehavior::Hang);
        let trigger = RecordingTrigger::new();
        let sched = scheduler(store, invoker, trigger.clone());

        let summary = sched
            .run(&RunConfig::default(), &MockReporter::new())
            .await
            .unwrap();

        assert_eq!(summary.stop_reason, StopReason::SinglePass);
        assert_eq!(summary.retried, 2);
        assert_eq!(summary.failed, 0);
        assert!(!summary.continued);
        assert!(trigger.requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn oversized_backoff_parks_item_instead_of_panicking() {
        let store = InMemoryWorkStore::new();
        let items = seed(&store, "siteb.test", 1).await;
        let invoker = MockInvoker::new()
            .with_behavior("extract-site-b", InvokeBehavior::Error("reset".into()));
        let settings = settings().with_retry(RetryPolicy {
            max_attempts: 3,
            base_delay: TimeDelta::MAX,
            max_delay: TimeDelta::MAX,
        });
        let sched = Scheduler::new(
            store.clone(),
            invoker,
            RecordingTrigger::new(),
            test_router(),
            settings,
        );

        let summary = sched
            .run(&RunConfig::default(), &MockReporter::new())
            .await
            .unwrap();

        assert_eq!(summary.retried, 1);
        let stored = store.get_item(items[0].id).await.unwrap().unwrap();
        assert_eq!(stored.status, WorkStatus::Pending);
        assert_eq!(stored.next_attempt_at, Some(DateTime::<Utc>::MAX_UTC));
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_errors_fail_without_retry() {
        let store = InMemoryWorkStore::new();
        let items = seed(&store, "siteb.test", 1).await;
        let invoker = MockInvoker::new().with_behavior(
            "extract-site-b",
            InvokeBehavior::Respond(ExtractionResponse::failed("Listing not found")),
        );
        let sched = scheduler(store.clone(), invoker.clone(), RecordingTrigger::new());

        let summary = sched.run(&continuous(), &MockReporter::new()).await.unwrap();

        assert_eq!(summary.failed, 1);
        assert_eq!(summary.retried, 0);
        assert_eq!(summary.errors.len(), 1);
        assert_eq!(summary.errors[0].error, "Listing not found");
        assert_eq!(invoker.calls_for(&items[0].url), 1);
        let stored = store.get_item(items[0].id).await.unwrap().unwrap();
        assert_eq!(stored.status, WorkStatus::Failed);
        assert_eq!(stored.attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unrouted_items_are_skipped() {
        let store = InMemoryWorkStore::new();
        let stray = store
            .enqueue(NewWorkItem {
                url: "https://elsewhere.example/listing/1".into(),
                domain: "sitea.test".into(),
                priority: 0,
            })
            .await
            .unwrap();
        let invoker = MockInvoker::new();
        let sched = scheduler(store.clone(), invoker.clone(), RecordingTrigger::new());

        let summary = sched.run(&continuous(), &MockReporter::new()).await.unwrap();

        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.source("sitea").skipped, 1);
        assert_eq!(summary.failed, 0);
        assert_eq!(summary.total_processed, 0);
        assert!(invoker.calls().is_empty());

        let stored = store.get_item(stray.id).await.unwrap().unwrap();
        assert_eq!(stored.status, WorkStatus::Failed);
        assert_eq!(stored.error_message.as_deref(), Some(NO_ROUTE_ERROR));
    }

    #[tokio::test(start_paused = true)]
    async fn store_failure_returns_partial_metrics() {
        let inner = InMemoryWorkStore::new();
        seed(&inner, "sitea.test", 3).await;
        seed(&inner, "siteb.test", 2).await;
        let store = FlakyStore::new(inner).fail_claims_after(1);
        let reporter = MockReporter::new();
        let sched = scheduler(store, MockInvoker::new(), RecordingTrigger::new());

        let summary = sched.run(&continuous(), &reporter).await.unwrap();

        assert_eq!(summary.stop_reason, StopReason::StoreUnavailable);
        assert_eq!(summary.succeeded, 3);
        assert_eq!(summary.source("siteb").processed, 0);
        assert!(summary.remaining_estimate.is_none());
        assert!(!summary.continued);
        assert_eq!(reporter.count("StoreUnavailable"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_writes_do_not_end_the_run() {
        let inner = InMemoryWorkStore::new();
        seed(&inner, "sitea.test", 2).await;
        let store = FlakyStore::new(inner.clone()).reject_writes();
        let reporter = MockReporter::new();
        let sched = scheduler(store, MockInvoker::new(), RecordingTrigger::new());

        let summary = sched.run(&continuous(), &reporter).await.unwrap();

        assert_eq!(summary.stop_reason, StopReason::QueueEmpty);
        assert_eq!(summary.left_claimed, 2);
        assert_eq!(summary.succeeded, 0);
        assert_eq!(reporter.count("StoreUnavailable"), 0);
        assert_eq!(inner.count_by_status(WorkStatus::Claimed).await.unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_claim_skips_only_that_source() {
        let inner = InMemoryWorkStore::new();
        seed(&inner, "sitea.test", 2).await;
        seed(&inner, "siteb.test", 2).await;
        let store = FlakyStore::new(inner).reject_claims_for("sitea.test");
        let sched = scheduler(store, MockInvoker::new(), RecordingTrigger::new());

        let summary = sched.run(&continuous(), &MockReporter::new()).await.unwrap();

        assert_eq!(summary.stop_reason, StopReason::QueueEmpty);
        assert_eq!(summary.source("siteb").succeeded, 2);
        assert_eq!(summary.source("sitea").processed, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn parallel_runs_claim_under_their_own_ids() {
        let store = InMemoryWorkStore::new();
        seed(&store, "siteb.test", 4).await;
        let invoker = MockInvoker::new().with_latency(Duration::from_millis(100));
        let base = scheduler(store.clone(), invoker, RecordingTrigger::new());

        let (a, b) = (base.for_run(), base.for_run());
        assert_ne!(a.settings().worker_id, b.settings().worker_id);
        assert!(a.settings().worker_id.starts_with("test-worker-"));
        assert_eq!(a.settings().worker_id.len(), "test-worker-".len() + 8);

        let config = RunConfig::default().with_batch_size(2);
        let (reporter_a, reporter_b) = (MockReporter::new(), MockReporter::new());
        let (first, second) = tokio::join!(a.run(&config, &reporter_a), b.run(&config, &reporter_b));
        let (first, second) = (first.unwrap(), second.unwrap());

        assert_eq!(first.worker_id, a.settings().worker_id);
        assert_eq!(first.succeeded, 2);
        assert_eq!(second.succeeded, 2);
        assert_eq!(first.lease_lost + second.lease_lost, 0);
        assert_eq!(store.count_by_status(WorkStatus::Complete).await.unwrap(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn lost_leases_are_counted_not_fatal() {
        let inner = InMemoryWorkStore::new();
        seed(&inner, "sitea.test", 2).await;
        let store = FlakyStore::new(inner).lose_leases();
        let sched = scheduler(store, MockInvoker::new(), RecordingTrigger::new());

        let summary = sched
            .run(&RunConfig::default(), &MockReporter::new())
            .await
            .unwrap();

        assert_eq!(summary.lease_lost, 2);
        assert_eq!(summary.succeeded, 0);
        // Lost leases are not progress.
        assert_eq!(summary.stop_reason, StopReason::QueueEmpty);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_source_is_a_config_error() {
        let sched = scheduler(
            InMemoryWorkStore::new(),
            MockInvoker::new(),
            RecordingTrigger::new(),
        );
        let config = RunConfig::default().with_source("nowhere".parse().unwrap());
        let err = sched.run(&config, &MockReporter::new()).await.unwrap_err();
        assert!(matches!(err, AppError::ConfigError(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn source_filter_limits_claims() {
        let store = InMemoryWorkStore::new();
        seed(&store, "sitea.test", 2).await;
        seed(&store, "siteb.test", 2).await;
        let sched = scheduler(store.clone(), MockInvoker::new(), RecordingTrigger::new());
        let config = continuous().with_source("SiteB".parse().unwrap());

        let summary = sched.run(&config, &MockReporter::new()).await.unwrap();

        assert_eq!(summary.succeeded, 2);
        assert!(summary.per_source.contains_key("siteb"));
        assert!(!summary.per_source.contains_key("sitea"));
        assert_eq!(store.count_by_status(WorkStatus::Pending).await.unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn reporter_sees_lifecycle() {
        let store = InMemoryWorkStore::new();
        seed(&store, "sitea.test", 1).await;
        let reporter = MockReporter::new();
        let sched = scheduler(store, MockInvoker::new(), RecordingTrigger::new());

        sched.run(&continuous(), &reporter).await.unwrap();

        let events = reporter.events();
        assert_eq!(events.first().map(String::as_str), Some("RunStarted"));
        assert_eq!(events.last().map(String::as_str), Some("RunFinished"));
        assert_eq!(reporter.count("BatchClaimed"), 1);
        assert_eq!(reporter.count("ItemCompleted"), 1);
        assert_eq!(reporter.count("RoundStarted"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stealth_delay_applies_per_item() {
        let store = InMemoryWorkStore::new();
        seed(&store, "sitea.test", 3).await;
        let sched = scheduler(store, MockInvoker::new(), RecordingTrigger::new());

        sched
            .run(&RunConfig::default(), &MockReporter::new())
            .await
            .unwrap();

        let waited = sched.limiter().total_waited("sitea.test");
        assert!(waited >= Duration::from_millis(300));
        assert!(waited <= Duration::from_millis(600));
    }
}
