use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use testcontainers::core::{ContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, GenericImage, ImageExt};

use dragnet_client::HttpExtractorInvoker;
use dragnet_core::throttle::DelayProfile;
use dragnet_core::{ExtractorRouter, Scheduler, SchedulerSettings, SourceRoute};
use dragnet_db::Database;
use dragnet_server::routes;
use dragnet_server::state::AppState;

pub const TEST_API_KEY: &str = "test-secret-key";

/// Nothing listens on the discard port, so every extractor call is refused.
const UNREACHABLE_FUNCTIONS: &str = "http://127.0.0.1:9";

pub struct TestApp {
    pub router: Router,
    pub db: Database,
    _container: ContainerAsync<GenericImage>,
}

/// Spin up a PostgreSQL container and return the test app.
///
/// The app routes one source, `sitea` (`sitea.test`), with no stealth delay.
pub async fn setup_test_app() -> TestApp {
    let container = GenericImage::new("postgres", "16")
        .with_exposed_port(ContainerPort::Tcp(5432))
        .with_wait_for(WaitFor::message_on_stderr(
            "database system is ready to accept connections",
        ))
        .with_env_var("POSTGRES_PASSWORD", "postgres")
        .with_env_var("POSTGRES_DB", "dragnet_test")
        .start()
        .await
        .expect("Failed to start PostgreSQL container");

    let host = container.get_host().await.expect("Failed to get host");
    let port = container
        .get_host_port_ipv4(5432)
        .await
        .expect("Failed to get port");

    let url = format!("postgresql://postgres:postgres@{host}:{port}/dragnet_test");

    let db = Database::from_pool(retry_connect(&url).await);
    db.migrate().await.expect("Failed to run migrations");

    let router = ExtractorRouter::new(vec![SourceRoute::new(
        "sitea",
        "sitea.test",
        "extract-a",
        DelayProfile::none(),
    )])
    .unwrap();
    let settings = SchedulerSettings::default()
        .with_worker_id("api-test-worker")
        .with_item_timeout(Duration::from_secs(2));
    let invoker = HttpExtractorInvoker::new(UNREACHABLE_FUNCTIONS, "svc").unwrap();
    let scheduler = Scheduler::new(db.work_repo(), invoker, None, router, settings);

    let state = Arc::new(AppState {
        db: db.clone(),
        scheduler,
        api_key: TEST_API_KEY.to_string(),
    });

    TestApp {
        router: routes::router(state),
        db,
        _container: container,
    }
}

async fn retry_connect(url: &str) -> PgPool {
    for _ in 0..30 {
        if let Ok(pool) = PgPoolOptions::new().max_connections(5).connect(url).await {
            return pool;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("Failed to connect to test database");
}
