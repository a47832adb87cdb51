use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use dragnet_core::store::WorkItemStore;
use dragnet_core::work_item::WorkStatus;

use crate::integration::common::{TEST_API_KEY, setup_test_app};

fn authed_post(uri: &str, body: Value) -> Request<Body> {
    Request::post(uri)
        .header("authorization", format!("Bearer {TEST_API_KEY}"))
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

fn authed_get(uri: &str) -> Request<Body> {
    Request::get(uri)
        .header("authorization", format!("Bearer {TEST_API_KEY}"))
        .body(Body::empty())
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let body = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn health_returns_200() {
    let app = setup_test_app().await;

    let response = app
        .router
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let json = json_body(response).await;
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["database"], "ok");
}

#[tokio::test]
async fn unauthenticated_request_returns_401() {
    let app = setup_test_app().await;

    let response = app
        .router
        .oneshot(
            Request::post("/v1/runs")
                .header("content-type", "application/json")
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn wrong_api_key_returns_401() {
    let app = setup_test_app().await;

    let response = app
        .router
        .oneshot(
            Request::get("/v1/queue")
                .header("authorization", "Bearer wrong-key")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let json = json_body(response).await;
    assert_eq!(json["error"], "unauthorized");
}

#[tokio::test]
async fn run_on_empty_queue_reports_queue_empty() {
    let app = setup_test_app().await;

    let response = app
        .router
        .oneshot(authed_post("/v1/runs", json!({})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    let worker_id = json["worker_id"].as_str().unwrap();
    assert!(worker_id.starts_with("api-test-worker-"), "{worker_id}");
    assert_eq!(json["total_processed"], 0);
    assert_eq!(json["stop_reason"], "queue_empty");
    assert_eq!(json["continued"], false);
    assert_eq!(json["remaining_estimate"], 0);
    assert_eq!(json["per_source"]["sitea"]["processed"], 0);
}

#[tokio::test]
async fn enqueued_items_are_retried_when_extractor_is_unreachable() {
    let app = setup_test_app().await;

    for i in 0..2 {
        let response = app
            .router
            .clone()
            .oneshot(authed_post(
                "/v1/items",
                json!({"url": format!("https://sitea.test/listing/{i}")}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    let response = app
        .router
        .clone()
        .oneshot(authed_post("/v1/runs", json!({"batch_size": 5})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = json_body(response).await;
    let first_worker = json["worker_id"].clone();
    assert_eq!(json["total_processed"], 2);
    assert_eq!(json["retried"], 2);
    assert_eq!(json["succeeded"], 0);
    assert_eq!(json["stop_reason"], "single_pass");
    assert_eq!(json["per_source"]["sitea"]["retried"], 2);
    assert_eq!(json["errors"].as_array().unwrap().len(), 2);

    // Both items are back in the queue with one attempt recorded.
    let repo = app.db.work_repo();
    assert_eq!(repo.count_by_status(WorkStatus::Pending).await.unwrap(), 2);

    let response = app.router.clone().oneshot(authed_get("/v1/queue")).await.unwrap();
    let json = json_body(response).await;
    assert_eq!(json["counts"]["pending"], 2);
    assert_eq!(json["counts"]["complete"], 0);
    assert_eq!(json["total"], 2);

    // Every run in the process claims under a fresh identity.
    let response = app
        .router
        .oneshot(authed_post("/v1/runs", json!({})))
        .await
        .unwrap();
    let json = json_body(response).await;
    assert_ne!(json["worker_id"], first_worker);
}

#[tokio::test]
async fn enqueue_returns_live_duplicate() {
    let app = setup_test_app().await;
    let body = json!({"url": "https://www.SiteA.test/listing/7", "priority": 3});

    let first = json_body(
        app.router
            .clone()
            .oneshot(authed_post("/v1/items", body.clone()))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(first["domain"], "sitea.test");
    assert_eq!(first["status"], "pending");
    assert_eq!(first["priority"], 3);

    let second = json_body(
        app.router
            .oneshot(authed_post("/v1/items", body))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(second["id"], first["id"]);
}

#[tokio::test]
async fn enqueue_rejects_invalid_url() {
    let app = setup_test_app().await;

    let response = app
        .router
        .oneshot(authed_post("/v1/items", json!({"url": "not a url"})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = json_body(response).await;
    assert_eq!(json["error"], "invalid_url");
}

#[tokio::test]
async fn unknown_source_returns_400() {
    let app = setup_test_app().await;

    for uri in ["/v1/runs", "/v1/runs/dispatch"] {
        let response = app
            .router
            .clone()
            .oneshot(authed_post(uri, json!({"source": "nowhere"})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{uri}");
        let json = json_body(response).await;
        assert_eq!(json["error"], "invalid_request");
    }
}

#[tokio::test]
async fn dispatch_accepts_continuations() {
    let app = setup_test_app().await;

    let response = app
        .router
        .oneshot(authed_post(
            "/v1/runs/dispatch",
            json!({"source": "sitea", "continuous": true, "chain_depth": 2}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let json = json_body(response).await;
    assert_eq!(json["accepted"], true);
    assert_eq!(json["chain_depth"], 2);
}

#[tokio::test]
async fn sources_lists_routing_table() {
    let app = setup_test_app().await;

    let response = app.router.oneshot(authed_get("/v1/sources")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["sources"][0]["name"], "sitea");
    assert_eq!(json["sources"][0]["extractor"], "extract-a");
    assert_eq!(json["sources"][0]["max_delay_ms"], 0);
}
