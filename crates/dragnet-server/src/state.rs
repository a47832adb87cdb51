use dragnet_client::{HttpContinuationTrigger, HttpExtractorInvoker};
use dragnet_core::Scheduler;
use dragnet_db::{Database, WorkItemRepository};

/// The scheduler the server drives: Postgres queue, HTTP extractors, and an
/// optional continuation endpoint.
pub type ServerScheduler =
    Scheduler<WorkItemRepository, HttpExtractorInvoker, Option<HttpContinuationTrigger>>;

/// Shared application state, available to all route handlers via `State<Arc<AppState>>`.
pub struct AppState {
    pub db: Database,
    pub scheduler: ServerScheduler,
    /// Bearer key protecting every `/v1` endpoint.
    pub api_key: String,
}
