use std::collections::HashSet;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use dragnet_core::config::{RunConfig, SchedulerSettings};
use dragnet_core::domain::DomainPattern;
use dragnet_core::metrics::StopReason;
use dragnet_core::retry::RetryPolicy;
use dragnet_core::router::{ExtractorRouter, SourceRoute};
use dragnet_core::scheduler::Scheduler;
use dragnet_core::store::WorkItemStore;
use dragnet_core::testutil::{InvokeBehavior, MockInvoker, MockReporter, RecordingTrigger};
use dragnet_core::throttle::DelayProfile;
use dragnet_core::work_item::{ClaimRequest, CompletionMetadata, NewWorkItem, WorkStatus};
use dragnet_db::WorkItemRepository;

use crate::integration::common::setup_test_db;

fn claim(pattern: &str, batch_size: u32, worker: &str) -> ClaimRequest {
    ClaimRequest {
        domain_pattern: DomainPattern::new(pattern),
        batch_size,
        max_attempts: 3,
        worker_id: worker.to_string(),
        lease_ttl: TimeDelta::seconds(300),
    }
}

async fn seed(repo: &WorkItemRepository, host: &str, n: usize) {
    for i in 0..n {
        repo.enqueue(NewWorkItem::new(format!("https://{host}/listing/{i}")).unwrap())
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn enqueue_derives_domain_and_deduplicates() {
    let (pool, _container) = setup_test_db().await;
    let repo = WorkItemRepository::new(pool);

    let first = repo
        .enqueue(NewWorkItem::new("https://www.BringATrailer.com/listing/1967-ford").unwrap())
        .await
        .unwrap();
    assert_eq!(first.domain, "bringatrailer.com");
    assert_eq!(first.status, WorkStatus::Pending);
    assert_eq!(first.attempts, 0);
    assert!(first.locked_by.is_none());

    let again = repo
        .enqueue(NewWorkItem::new("https://www.BringATrailer.com/listing/1967-ford").unwrap())
        .await
        .unwrap();
    assert_eq!(again.id, first.id);
    assert_eq!(repo.count_by_status(WorkStatus::Pending).await.unwrap(), 1);
}

#[tokio::test]
async fn finished_urls_can_be_requeued() {
    let (pool, _container) = setup_test_db().await;
    let repo = WorkItemRepository::new(pool);
    seed(&repo, "mecum.com", 1).await;

    let batch = repo.claim_batch(&claim("mecum.com", 1, "w1")).await.unwrap();
    assert!(
        repo.complete(batch[0].id, "w1", &CompletionMetadata::default())
            .await
            .unwrap()
    );

    let requeued = repo
        .enqueue(NewWorkItem::new("https://mecum.com/listing/0").unwrap())
        .await
        .unwrap();
    assert_ne!(requeued.id, batch[0].id);
    assert_eq!(requeued.status, WorkStatus::Pending);
}

#[tokio::test]
async fn claim_filters_by_domain_pattern() {
    let (pool, _container) = setup_test_db().await;
    let repo = WorkItemRepository::new(pool);
    seed(&repo, "sfbay.craigslist.org", 2).await;
    seed(&repo, "craigslist.org", 1).await;
    seed(&repo, "notcraigslist.org", 2).await;

    let batch = repo
        .claim_batch(&claim("craigslist.org", 10, "w1"))
        .await
        .unwrap();

    assert_eq!(batch.len(), 3);
    for item in &batch {
        assert!(item.domain.ends_with("craigslist.org"));
        assert_ne!(item.domain, "notcraigslist.org");
        assert_eq!(item.status, WorkStatus::Claimed);
        assert_eq!(item.locked_by.as_deref(), Some("w1"));
        assert!(item.locked_at.is_some());
    }
}

#[tokio::test]
async fn claim_honours_batch_size_and_priority() {
    let (pool, _container) = setup_test_db().await;
    let repo = WorkItemRepository::new(pool);
    seed(&repo, "hagerty.com", 5).await;
    let urgent = repo
        .enqueue(
            NewWorkItem::new("https://hagerty.com/listing/urgent")
                .unwrap()
                .with_priority(5),
        )
        .await
        .unwrap();

    let batch = repo.claim_batch(&claim("hagerty.com", 2, "w1")).await.unwrap();
    assert_eq!(batch.len(), 2);
    assert_eq!(batch[0].id, urgent.id);

    let rest = repo.claim_batch(&claim("hagerty.com", 10, "w2")).await.unwrap();
    assert_eq!(rest.len(), 4);

    let empty = repo.claim_batch(&claim("hagerty.com", 10, "w3")).await.unwrap();
    assert!(empty.is_empty());
}

#[tokio::test]
async fn claim_prefers_least_recently_touched() {
    let (pool, _container) = setup_test_db().await;
    let repo = WorkItemRepository::new(pool);
    let old = repo
        .enqueue(NewWorkItem::new("https://bringatrailer.com/listing/old").unwrap())
        .await
        .unwrap();
    let fresh = repo
        .enqueue(NewWorkItem::new("https://bringatrailer.com/listing/fresh").unwrap())
        .await
        .unwrap();

    // The older row is retried, so it was touched after the fresh one was queued.
    let first = repo
        .claim_batch(&claim("bringatrailer.com", 1, "w1"))
        .await
        .unwrap();
    assert_eq!(first[0].id, old.id);
    let due = Utc::now() - TimeDelta::minutes(5);
    assert!(repo.retry(old.id, "w1", "HTTP 502", due).await.unwrap());

    let batch = repo
        .claim_batch(&claim("bringatrailer.com", 2, "w2"))
        .await
        .unwrap();
    let order: Vec<_> = batch.iter().map(|item| item.id).collect();
    assert_eq!(order, vec![fresh.id, old.id]);
}

#[tokio::test]
async fn concurrent_claimers_never_share_items() {
    let (pool, _container) = setup_test_db().await;
    let repo = WorkItemRepository::new(pool);
    seed(&repo, "carsandbids.com", 60).await;

    let mut handles = Vec::new();
    for w in 0..6 {
        let repo = repo.clone();
        handles.push(tokio::spawn(async move {
            let mut mine = Vec::new();
            loop {
                let batch = repo
                    .claim_batch(&claim("carsandbids.com", 7, &format!("w{w}")))
                    .await
                    .unwrap();
                if batch.is_empty() {
                    break;
                }
                mine.extend(batch.into_iter().map(|i| i.id));
            }
            mine
        }));
    }

    let mut all = Vec::new();
    for h in handles {
        all.extend(h.await.unwrap());
    }
    let unique: HashSet<_> = all.iter().collect();
    assert_eq!(unique.len(), all.len(), "an item was claimed twice");
    assert_eq!(all.len(), 60);
}

#[tokio::test]
async fn expired_lease_is_reclaimable() {
    let (pool, _container) = setup_test_db().await;
    let repo = WorkItemRepository::new(pool);
    seed(&repo, "pcarmarket.com", 1).await;

    let short = |worker: &str| ClaimRequest {
        lease_ttl: TimeDelta::seconds(1),
        ..claim("pcarmarket.com", 1, worker)
    };

    let first = repo.claim_batch(&short("worker-a")).await.unwrap();
    assert_eq!(first.len(), 1);
    assert!(repo.claim_batch(&short("worker-b")).await.unwrap().is_empty());

    tokio::time::sleep(Duration::from_millis(1_500)).await;

    let reclaimed = repo.claim_batch(&short("worker-b")).await.unwrap();
    assert_eq!(reclaimed.len(), 1);
    assert_eq!(reclaimed[0].id, first[0].id);
    assert_eq!(reclaimed[0].locked_by.as_deref(), Some("worker-b"));

    // worker-a's lease is gone; its late completion must not land.
    assert!(
        !repo
            .complete(first[0].id, "worker-a", &CompletionMetadata::default())
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn retry_records_attempt_and_backoff() {
    let (pool, _container) = setup_test_db().await;
    let repo = WorkItemRepository::new(pool);
    seed(&repo, "mecum.com", 1).await;

    let item = repo.claim_batch(&claim("mecum.com", 1, "w1")).await.unwrap()[0].clone();
    let later = Utc::now() + TimeDelta::hours(1);
    assert!(repo.retry(item.id, "w1", "HTTP 503", later).await.unwrap());

    let stored = repo.get_item(item.id).await.unwrap().unwrap();
    assert_eq!(stored.status, WorkStatus::Pending);
    assert_eq!(stored.attempts, 1);
    assert_eq!(stored.error_message.as_deref(), Some("HTTP 503"));
    assert!(stored.locked_by.is_none());

    assert!(
        repo.claim_batch(&claim("mecum.com", 1, "w1"))
            .await
            .unwrap()
            .is_empty(),
        "item is still backing off"
    );
}

#[tokio::test]
async fn terminal_rows_are_immutable() {
    let (pool, _container) = setup_test_db().await;
    let repo = WorkItemRepository::new(pool);
    seed(&repo, "mecum.com", 1).await;

    let item = repo.claim_batch(&claim("mecum.com", 1, "w1")).await.unwrap()[0].clone();
    assert!(!repo.fail(item.id, "intruder", "nope").await.unwrap());

    let metadata = CompletionMetadata {
        extractor: "extract-mecum-lot".into(),
        result_id: Some("veh-42".into()),
    };
    assert!(repo.complete(item.id, "w1", &metadata).await.unwrap());
    assert!(!repo.fail(item.id, "w1", "late").await.unwrap());
    assert!(
        !repo
            .retry(item.id, "w1", "late", Utc::now())
            .await
            .unwrap()
    );

    let stored = repo.get_item(item.id).await.unwrap().unwrap();
    assert_eq!(stored.status, WorkStatus::Complete);
    assert_eq!(stored.result_id.as_deref(), Some("veh-42"));
    assert_eq!(stored.attempts, 0);
}

#[tokio::test]
async fn counts_and_health() {
    let (pool, _container) = setup_test_db().await;
    let repo = WorkItemRepository::new(pool);
    seed(&repo, "bringatrailer.com", 3).await;
    seed(&repo, "mecum.com", 2).await;

    let item = repo
        .claim_batch(&claim("mecum.com", 1, "w1"))
        .await
        .unwrap()
        .remove(0);
    repo.fail(item.id, "w1", "listing removed").await.unwrap();

    let patterns = [
        DomainPattern::new("bringatrailer.com"),
        DomainPattern::new("mecum.com"),
    ];
    assert_eq!(repo.count_eligible(&patterns, 3).await.unwrap(), 4);
    assert_eq!(
        repo.count_eligible(&patterns[..1], 3).await.unwrap(),
        3
    );
    assert_eq!(repo.count_by_status(WorkStatus::Failed).await.unwrap(), 1);
    assert_eq!(repo.count_by_status(WorkStatus::Complete).await.unwrap(), 0);
    repo.health_check().await.unwrap();
}

#[tokio::test]
async fn scheduler_drives_postgres_backlog_to_terminal_states() {
    let (pool, _container) = setup_test_db().await;
    let repo = WorkItemRepository::new(pool);
    seed(&repo, "sitea.test", 3).await;
    seed(&repo, "siteb.test", 2).await;

    let router = ExtractorRouter::new(vec![
        SourceRoute::new("sitea", "sitea.test", "extract-a", DelayProfile::none()),
        SourceRoute::new("siteb", "siteb.test", "extract-b", DelayProfile::none()),
    ])
    .unwrap();
    let settings = SchedulerSettings::default()
        .with_worker_id("pg-worker")
        .with_retry(RetryPolicy {
            max_attempts: 3,
            base_delay: TimeDelta::zero(),
            max_delay: TimeDelta::zero(),
        })
        .with_item_timeout(Duration::from_millis(200));
    let invoker = MockInvoker::new().with_behavior("extract-b", InvokeBehavior::Hang);
    let scheduler = Scheduler::new(
        repo.clone(),
        invoker,
        RecordingTrigger::new(),
        router,
        settings,
    );

    let config = RunConfig::default()
        .with_continuous(true)
        .with_max_runtime(Duration::from_secs(60));
    let summary = scheduler.run(&config, &MockReporter::new()).await.unwrap();

    assert_eq!(summary.succeeded, 3);
    assert_eq!(summary.source("siteb").failed, 2);
    assert_eq!(summary.stop_reason, StopReason::QueueEmpty);
    assert_eq!(repo.count_by_status(WorkStatus::Complete).await.unwrap(), 3);
    assert_eq!(repo.count_by_status(WorkStatus::Failed).await.unwrap(), 2);
}
