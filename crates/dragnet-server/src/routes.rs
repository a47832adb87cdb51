use std::collections::BTreeMap;
use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::middleware;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use dragnet_core::config::RunConfig;
use dragnet_core::scheduler::TracingSchedulerReporter;
use dragnet_core::store::WorkItemStore;
use dragnet_core::work_item::{NewWorkItem, WorkStatus};

use crate::auth::require_api_key;
use crate::dto::{
    DispatchResponse, EnqueueRequest, HealthResponse, QueueStatsResponse, RunRequestBody,
    RunResponse, SourceListResponse, SourceResponse, WorkItemResponse,
};
use crate::error::ApiError;
use crate::openapi::ApiDoc;
use crate::state::AppState;

/// Build the full router with all routes and middleware.
pub fn router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/v1/runs", post(create_run))
        .route("/v1/runs/dispatch", post(dispatch_run))
        .route("/v1/items", post(enqueue_item))
        .route("/v1/queue", get(queue_stats))
        .route("/v1/sources", get(list_sources))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_api_key,
        ));

    let public = Router::new()
        .route("/health", get(health))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    public.merge(api).with_state(state)
}

// ---------------------------------------------------------------------------
// Runs
// ---------------------------------------------------------------------------

#[utoipa::path(
    post,
    path = "/v1/runs",
    request_body = RunRequestBody,
    responses(
        (status = 200, description = "Run finished", body = RunResponse),
        (status = 400, description = "Invalid run request", body = crate::dto::ErrorResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "runs"
)]
pub async fn create_run(
    State(state): State<Arc<AppState>>,
    axum::Json(body): axum::Json<RunRequestBody>,
) -> Result<impl IntoResponse, ApiError> {
    let config = RunConfig::from_request(&body.into())?;
    let summary = state
        .scheduler
        .for_run()
        .run(&config, &TracingSchedulerReporter)
        .await?;

    Ok(axum::Json(RunResponse::from(summary)))
}

/// Accept a run and execute it in the background. Continuations land here.
#[utoipa::path(
    post,
    path = "/v1/runs/dispatch",
    request_body = RunRequestBody,
    responses(
        (status = 202, description = "Run accepted", body = DispatchResponse),
        (status = 400, description = "Invalid run request", body = crate::dto::ErrorResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "runs"
)]
pub async fn dispatch_run(
    State(state): State<Arc<AppState>>,
    axum::Json(body): axum::Json<RunRequestBody>,
) -> Result<impl IntoResponse, ApiError> {
    let config = RunConfig::from_request(&body.into())?;
    // Reject unknown sources now rather than inside the detached task.
    state.scheduler.router().select(&config.source_filter)?;

    let chain_depth = config.chain_depth;
    let scheduler = state.scheduler.for_run();
    tokio::spawn(async move {
        if let Err(e) = scheduler.run(&config, &TracingSchedulerReporter).await {
            tracing::error!(error = %e, chain_depth, "Dispatched run failed");
        }
    });

    let response = DispatchResponse {
        accepted: true,
        chain_depth,
    };
    Ok((StatusCode::ACCEPTED, axum::Json(response)))
}

// ---------------------------------------------------------------------------
// Items
// ---------------------------------------------------------------------------

#[utoipa::path(
    post,
    path = "/v1/items",
    request_body = EnqueueRequest,
    responses(
        (status = 201, description = "Item queued (or the live duplicate)", body = WorkItemResponse),
        (status = 400, description = "Invalid URL", body = crate::dto::ErrorResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "items"
)]
pub async fn enqueue_item(
    State(state): State<Arc<AppState>>,
    axum::Json(body): axum::Json<EnqueueRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let item = NewWorkItem::new(body.url)?.with_priority(body.priority.unwrap_or(0));
    let stored = state.db.work_repo().enqueue(item).await?;

    Ok((StatusCode::CREATED, axum::Json(WorkItemResponse::from(stored))))
}

#[utoipa::path(
    get,
    path = "/v1/queue",
    responses(
        (status = 200, description = "Item counts per status", body = QueueStatsResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "items"
)]
pub async fn queue_stats(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let repo = state.db.work_repo();
    let mut counts = BTreeMap::new();
    for status in WorkStatus::ALL {
        counts.insert(status.to_string(), repo.count_by_status(status).await?);
    }
    let total = counts.values().sum();

    Ok(axum::Json(QueueStatsResponse { counts, total }))
}

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/v1/sources",
    responses(
        (status = 200, description = "Routable sources", body = SourceListResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer" = [])),
    tag = "sources"
)]
pub async fn list_sources(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let sources = state
        .scheduler
        .router()
        .routes()
        .iter()
        .map(SourceResponse::from)
        .collect();

    axum::Json(SourceListResponse { sources })
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
        (status = 503, description = "Service is unhealthy", body = HealthResponse),
    ),
    tag = "system"
)]
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let db_status = match state.db.work_repo().health_check().await {
        Ok(()) => "ok",
        Err(_) => "error",
    };

    let status = if db_status == "ok" {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = HealthResponse {
        status: if db_status == "ok" {
            "healthy"
        } else {
            "unhealthy"
        },
        database: db_status,
    };

    (status, axum::Json(response))
}
