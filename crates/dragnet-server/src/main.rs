use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use dragnet_client::{ClientConfig, HttpContinuationTrigger, HttpExtractorInvoker};
use dragnet_core::{ExtractorRouter, Scheduler, SchedulerSettings};
use dragnet_db::{Database, DatabaseConfig};
use dragnet_server::routes;
use dragnet_server::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("dragnet=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let api_key = std::env::var("DRAGNET_SERVER_API_KEY")
        .context("DRAGNET_SERVER_API_KEY must be set")?;
    let port = std::env::var("DRAGNET_SERVER_PORT").unwrap_or_else(|_| "3000".to_string());
    let addr = format!("0.0.0.0:{port}");

    let db = Database::connect(&DatabaseConfig::from_env()?).await?;
    db.migrate().await?;

    let clients = ClientConfig::from_env()?;
    let (functions_url, service_key) = clients.require_functions()?;
    let invoker = HttpExtractorInvoker::new(functions_url, service_key)?;
    let trigger = clients
        .processor_url
        .as_deref()
        .map(|url| HttpContinuationTrigger::new(url, service_key))
        .transpose()?;
    if trigger.is_none() {
        tracing::warn!("DRAGNET_PROCESSOR_URL not set, runs will not chain");
    }

    let settings = SchedulerSettings::from_env()?;
    tracing::info!(worker_id = %settings.worker_id, "Scheduler configured");
    let scheduler = Scheduler::new(
        db.work_repo(),
        invoker,
        trigger,
        ExtractorRouter::with_default_sources(),
        settings,
    );

    let state = Arc::new(AppState {
        db,
        scheduler,
        api_key,
    });

    let app = routes::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    tracing::info!("Starting server on {addr}");
    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install CTRL+C handler");
        return;
    }
    tracing::info!("Shutdown signal received");
}
