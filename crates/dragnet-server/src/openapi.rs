use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Dragnet API",
        version = "0.3.0",
        description = "Budget-aware processor for a shared backlog of listing URLs."
    ),
    paths(
        crate::routes::create_run,
        crate::routes::dispatch_run,
        crate::routes::enqueue_item,
        crate::routes::queue_stats,
        crate::routes::list_sources,
        crate::routes::health,
    ),
    components(schemas(
        crate::dto::RunRequestBody,
        crate::dto::RunResponse,
        crate::dto::SourceStatsResponse,
        crate::dto::ErrorSampleResponse,
        crate::dto::DispatchResponse,
        crate::dto::EnqueueRequest,
        crate::dto::WorkItemResponse,
        crate::dto::QueueStatsResponse,
        crate::dto::SourceResponse,
        crate::dto::SourceListResponse,
        crate::dto::HealthResponse,
        crate::dto::ErrorResponse,
    )),
    tags(
        (name = "runs", description = "Scheduler runs and continuations"),
        (name = "items", description = "Backlog management"),
        (name = "sources", description = "Extractor routing table"),
        (name = "system", description = "Health and system status"),
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

/// Adds the Bearer token security scheme to the OpenAPI document.
struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                utoipa::openapi::security::SecurityScheme::Http(
                    utoipa::openapi::security::HttpBuilder::new()
                        .scheme(utoipa::openapi::security::HttpAuthScheme::Bearer)
                        .bearer_format("token")
                        .description(Some(
                            "Processor API key. Set via DRAGNET_SERVER_API_KEY environment variable.",
                        ))
                        .build(),
                ),
            );
        }
    }
}
