pub mod budget;
pub mod config;
pub mod continuation;
pub mod domain;
pub mod error;
pub mod extractor;
pub mod memory_store;
pub mod metrics;
pub mod retry;
pub mod router;
pub mod scheduler;
pub mod store;
pub mod throttle;
pub mod traits;
pub mod work_item;

#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

pub use budget::RuntimeBudgetGuard;
pub use config::{RunConfig, RunRequest, SchedulerSettings};
pub use continuation::ContinuationChainer;
pub use domain::{DomainPattern, domain_of};
pub use error::AppError;
pub use extractor::{ExtractionRequest, ExtractionResponse};
pub use memory_store::InMemoryWorkStore;
pub use metrics::{RunSummary, SourceStats, StopReason};
pub use retry::{Disposition, ItemOutcome, OutcomeClass, RetryPolicy};
pub use router::{ExtractorRouter, SourceFilter, SourceRoute};
pub use scheduler::{Scheduler, SchedulerEvent, SchedulerReporter, TracingSchedulerReporter};
pub use store::WorkItemStore;
pub use throttle::{DelayProfile, DomainRateLimiter};
pub use traits::{ContinuationTrigger, ExtractorInvoker, NoContinuation};
pub use work_item::{ClaimRequest, CompletionMetadata, NewWorkItem, WorkItem, WorkStatus};
