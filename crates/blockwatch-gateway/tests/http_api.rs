//! Route-level tests driving the gateway router in-process.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use blockwatch_engine::WatchEngine;
use blockwatch_filter::FilterParams;
use blockwatch_primitives::ChainView;
use blockwatch_store::WatchStore;
use blockwatch_test_service::{build_block, MockChain};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

fn setup(api_key: Option<&str>) -> (Router, Arc<WatchEngine>, Arc<MockChain>) {
    let store = Arc::new(WatchStore::open_in_memory().unwrap());
    let engine = Arc::new(WatchEngine::new(store, FilterParams::default()));
    engine.open().unwrap();
    let chain = Arc::new(MockChain::new());
    let chain_view: Arc<dyn ChainView> = chain.clone();
    let router = blockwatch_gateway::router(engine.clone(), chain_view, api_key);
    (router, engine, chain)
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

fn put_body(id_hex: &str) -> Value {
    json!({
        "id": id_hex,
        "address": "22".repeat(20),
        "value": 1000,
        "pays": "76a914c22a601f8a1f4cc20bdc595447b6aeaf4b6cd31288ac",
    })
}

#[tokio::test]
async fn info_reports_tip_and_latest() {
    let (router, _engine, chain) = setup(None);
    chain.push_block(build_block(1, vec![]));

    let response = router.clone().oneshot(get("/relay")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["height"], 0);
    assert!(body["latest"].is_null());
    assert!(body["tip"].is_string());
}

#[tokio::test]
async fn put_get_list_delete_request() {
    let (router, _engine, _chain) = setup(None);
    let id_hex = "11".repeat(32);

    let response = router
        .clone()
        .oneshot(json_request("PUT", "/relay/request", put_body(&id_hex)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["request"]["id"], id_hex);
    assert_eq!(body["rescan"], false);
    assert!(body["outpoint"].is_null());
    assert_eq!(body["script"]["requests"][0], id_hex);

    // Fetch by id, by script, and via the listing.
    let response = router
        .clone()
        .oneshot(get(&format!("/relay/request/{id_hex}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let fetched = body_json(response).await;
    assert_eq!(fetched["value"], 1000);

    let response = router
        .clone()
        .oneshot(get(
            "/relay/script/76a914c22a601f8a1f4cc20bdc595447b6aeaf4b6cd31288ac",
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = router.clone().oneshot(get("/relay/request")).await.unwrap();
    let list = body_json(response).await;
    assert_eq!(list.as_array().unwrap().len(), 1);

    // Latest-under with the maximum id resolves to the stored request.
    let response = router
        .clone()
        .oneshot(get(&format!("/relay/latest/{}", "ff".repeat(32))))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = router
        .clone()
        .oneshot(json_request("DELETE", "/relay/request", json!({ "id": id_hex })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["deleted"], true);

    let response = router
        .clone()
        .oneshot(get(&format!("/relay/request/{id_hex}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn put_without_target_is_rejected() {
    let (router, _engine, _chain) = setup(None);
    let body = json!({
        "id": "11".repeat(32),
        "address": "22".repeat(20),
        "value": 0,
    });

    let response = router
        .clone()
        .oneshot(json_request("PUT", "/relay/request", body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_records_return_404() {
    let (router, _engine, _chain) = setup(None);

    let response = router
        .clone()
        .oneshot(get(&format!("/relay/outpoint/{}/0", "aa".repeat(32))))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = router.clone().oneshot(get("/relay/script/51")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn wipe_clears_requests() {
    let (router, engine, _chain) = setup(None);
    router
        .clone()
        .oneshot(json_request("PUT", "/relay/request", put_body(&"33".repeat(32))))
        .await
        .unwrap();
    assert_eq!(engine.store().requests().unwrap().len(), 1);

    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/relay")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(engine.store().requests().unwrap().is_empty());
}

#[tokio::test]
async fn api_key_guards_relay_routes() {
    let (router, _engine, _chain) = setup(Some("hunter2"));

    let response = router.clone().oneshot(get("/relay")).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let authed = Request::builder()
        .uri("/relay")
        .header("x-api-key", "hunter2")
        .body(Body::empty())
        .unwrap();
    let response = router.clone().oneshot(authed).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bearer = Request::builder()
        .uri("/relay")
        .header("authorization", "Bearer hunter2")
        .body(Body::empty())
        .unwrap();
    let response = router.clone().oneshot(bearer).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
