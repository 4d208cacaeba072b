//! Integration tests for the navigation API server

use futures::future::join_all;
use meganav::{ApiServer, AppConfig, AppState};
use meganav_cache::{
    CacheConfig, FnSource, NavigationData, NavigationSource, NavigationStore,
    ProductUpdateSimulator, RevalidationController, SourceError, SourceValue,
};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::time::sleep;

/// Test helper to start the API server on an ephemeral port
async fn start_server(server: ApiServer) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = server.serve(listener).await;
    });
    format!("http://{}", addr)
}

async fn start_default_server() -> String {
    start_server(ApiServer::new(AppConfig::default()).unwrap()).await
}

/// Server whose navigation source always fails
async fn start_failing_server(data: NavigationData) -> String {
    let config = AppConfig::default();
    let source = Arc::new(FnSource::new(|_key: String| async move {
        Err::<SourceValue, _>(SourceError::Unavailable("navigation backend down".to_string()))
    }));
    let controller =
        Arc::new(RevalidationController::new(config.cache_config(), source).unwrap());
    let simulator = Arc::new(ProductUpdateSimulator::new(
        Arc::new(NavigationStore::new(data)),
        controller.clone(),
    ));
    let state = AppState::new(controller, simulator).unwrap();
    start_server(ApiServer::with_state(config, Arc::new(state))).await
}

async fn get_navigation(client: &Client, base: &str) -> (StatusCode, String, Value) {
    let response = client
        .get(format!("{}/api/navigation", base))
        .send()
        .await
        .unwrap();
    let status = response.status();
    let cache_status = response
        .headers()
        .get("x-cache-status")
        .map(|v| v.to_str().unwrap().to_string())
        .unwrap_or_default();
    (status, cache_status, response.json().await.unwrap())
}

/// Poll until the navigation read is a fresh hit
async fn wait_for_hit(client: &Client, base: &str) -> Value {
    let deadline = Instant::now() + Duration::from_secs(3);
    loop {
        let (_, cache_status, body) = get_navigation(client, base).await;
        if cache_status == "HIT" {
            return body;
        }
        assert!(Instant::now() < deadline, "navigation never became fresh");
        sleep(Duration::from_millis(10)).await;
    }
}

fn product_titles(body: &Value) -> Vec<String> {
    body["data"]["header"]["items"][0]["dropdown"]["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|item| item["title"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn test_health_check() {
    let base = start_default_server().await;

    let response = Client::new()
        .get(format!("{}/health", base))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_navigation_miss_then_hit() {
    let base = start_default_server().await;
    let client = Client::new();

    let response = client
        .get(format!("{}/api/navigation", base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["cache-control"],
        "public, max-age=3600, s-maxage=3600, stale-while-revalidate=86400"
    );
    assert_eq!(response.headers()["x-cache-status"], "MISS");

    let expires = response.headers()["expires"].to_str().unwrap();
    let expires = chrono::DateTime::parse_from_rfc2822(expires).unwrap();
    let ahead = expires.timestamp() - chrono::Utc::now().timestamp();
    assert!((3590..=3600).contains(&ahead), "expires {}s ahead", ahead);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["data"]["header"]["logo"], "MegaNav");
    assert_eq!(body["cache"]["key"], "navigation");
    assert_eq!(body["cache"]["version"], 1);
    assert_eq!(body["cache"]["state"], "FRESH");
    assert_eq!(body["cache"]["degraded"], false);
    assert!(body["cache"]["computedAt"].is_string());
    assert_eq!(
        product_titles(&body),
        vec!["Product 1", "Product 2", "Product 3"]
    );

    let (status, cache_status, body) = get_navigation(&client, &base).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cache_status, "HIT");
    assert_eq!(body["cache"]["version"], 1);
}

#[tokio::test]
async fn test_update_serves_stale_then_new_data() {
    let base = start_default_server().await;
    let client = Client::new();
    let (_, _, before) = get_navigation(&client, &base).await;

    let response = client
        .post(format!("{}/api/navigation", base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let ack: Value = response.json().await.unwrap();
    assert_eq!(ack["success"], true);
    assert_eq!(ack["affectedKey"], "navigation");
    assert!(ack["message"].as_str().unwrap().starts_with("Updated: "));
    assert!(ack["timestamp"].is_string());
    assert!(ack["updateId"].is_string());

    let (_, cache_status, stale) = get_navigation(&client, &base).await;
    assert_eq!(cache_status, "STALE");
    assert_eq!(stale["cache"]["state"], "INVALID");
    assert_eq!(stale["data"], before["data"]);

    let fresh = wait_for_hit(&client, &base).await;
    assert_eq!(fresh["cache"]["version"], 2);
    assert_ne!(product_titles(&fresh), product_titles(&before));
}

#[tokio::test]
async fn test_revalidate_marks_navigation_invalid() {
    let base = start_default_server().await;
    let client = Client::new();
    get_navigation(&client, &base).await;

    let response = client
        .get(format!("{}/api/revalidate", base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["revalidated"], true);
    assert!(body["now"].as_i64().unwrap() > 0);
    assert_eq!(body["invalidated"], serde_json::json!(["navigation"]));
    assert!(body.get("version").is_none());

    let (_, cache_status, body) = get_navigation(&client, &base).await;
    assert_eq!(cache_status, "STALE");
    assert_eq!(body["cache"]["version"], 1);
}

#[tokio::test]
async fn test_revalidate_with_refresh_recomputes() {
    let base = start_default_server().await;
    let client = Client::new();
    get_navigation(&client, &base).await;

    let response = client
        .post(format!("{}/api/revalidate?refresh=true", base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["version"], 2);

    let (_, cache_status, body) = get_navigation(&client, &base).await;
    assert_eq!(cache_status, "HIT");
    assert_eq!(body["cache"]["version"], 2);
}

#[tokio::test]
async fn test_fresh_query_waits_for_recompute() {
    let base = start_default_server().await;
    let client = Client::new();
    get_navigation(&client, &base).await;
    client
        .post(format!("{}/api/navigation", base))
        .send()
        .await
        .unwrap();

    let response = client
        .get(format!("{}/api/navigation?fresh=true", base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.headers()["x-cache-status"], "MISS");

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["cache"]["version"], 2);
    assert_eq!(body["cache"]["state"], "FRESH");
}

#[tokio::test]
async fn test_concurrent_cold_reads_compute_once() {
    let mut config = AppConfig::default();
    config.source.latency_ms = 100;
    let base = start_server(ApiServer::new(config).unwrap()).await;
    let client = Client::new();

    let reads = (0..20).map(|_| get_navigation(&client, &base));
    let results = join_all(reads).await;

    for (status, cache_status, body) in &results {
        assert_eq!(*status, StatusCode::OK);
        assert!(cache_status == "MISS" || cache_status == "JOINED");
        assert_eq!(body["cache"]["version"], 1);
    }
    let misses = results.iter().filter(|(_, s, _)| s == "MISS").count();
    assert_eq!(misses, 1);

    let stats: Value = client
        .get(format!("{}/api/cache/stats", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["refreshes_started"], 1);
    assert_eq!(stats["keys"], serde_json::json!(["navigation"]));
}

#[tokio::test]
async fn test_source_failure_on_cold_cache_is_404() {
    let base = start_failing_server(NavigationData::demo()).await;

    let (status, _, body) = get_navigation(&Client::new(), &base).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "NOT_FOUND");
    assert!(body["message"].as_str().unwrap().contains("navigation backend down"));
    assert!(body["timestamp"].is_string());
}

#[tokio::test]
async fn test_forced_refresh_failure_reports_error_revalidating() {
    let base = start_failing_server(NavigationData::demo()).await;

    let response = Client::new()
        .get(format!("{}/api/revalidate?refresh=true", base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["message"], "Error revalidating");
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_update_without_products_menu_fails() {
    let mut data = NavigationData::demo();
    data.header.items.clear();
    let base = start_failing_server(data).await;

    let response = Client::new()
        .post(format!("{}/api/navigation", base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "UPDATE_TARGET_NOT_FOUND");
    assert_eq!(
        body["message"],
        "No update performed - could not find product in navigation"
    );
}

#[tokio::test]
async fn test_unsupported_method_returns_json_405() {
    let base = start_default_server().await;
    let client = Client::new();

    for path in ["/api/navigation", "/api/revalidate", "/api/cache/stats"] {
        let response = client
            .delete(format!("{}{}", base, path))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED, "{}", path);

        let body: Value = response.json().await.unwrap();
        assert_eq!(body["message"], "Method not allowed");
    }
}

#[tokio::test]
async fn test_always_stale_config_serves_stale() {
    let mut config = AppConfig::default();
    config.cache.soft_ttl_secs = 0;
    let base = start_server(ApiServer::new(config).unwrap()).await;
    let client = Client::new();

    let response = client
        .get(format!("{}/api/navigation", base))
        .send()
        .await
        .unwrap();
    assert_eq!(
        response.headers()["cache-control"],
        "public, max-age=0, s-maxage=0, stale-while-revalidate=86400"
    );

    let (_, cache_status, _) = get_navigation(&client, &base).await;
    assert_eq!(cache_status, "STALE");
}

#[tokio::test]
async fn test_app_state_uses_configured_cache() {
    let mut config = AppConfig::default();
    config.cache.soft_ttl_secs = 60;
    config.cache.hard_ttl_secs = Some(120);

    let state = AppState::from_config(&config).unwrap();
    assert_eq!(
        state.cache_control,
        "public, max-age=60, s-maxage=60, stale-while-revalidate=60"
    );
    assert_eq!(
        state.controller.config().hard_ttl,
        CacheConfig::builder()
            .soft_ttl(Duration::from_secs(60))
            .hard_ttl(Duration::from_secs(120))
            .build()
            .hard_ttl
    );

    let store = Arc::new(NavigationStore::demo());
    let source = NavigationSource::new(store);
    let read = RevalidationController::new(config.cache_config(), Arc::new(source))
        .unwrap()
        .get_default("navigation")
        .await
        .unwrap();
    assert_eq!(read.value["header"]["logo"], "MegaNav");
}
