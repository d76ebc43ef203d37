//! Integration tests for the channel sync HTTP surface.
//!
//! These run the real router on a TCP listener with an in-memory
//! database and drive it with a plain HTTP client, covering the
//! operator flow end to end: connect a channel, enqueue a job, watch
//! it through the queue, and ingest a webhook for it.

use std::net::SocketAddr;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use hmac::{Hmac, Mac};
use migration::{Migrator, MigratorTrait};
use reqwest::{Client, StatusCode};
use sea_orm::Database;
use serde_json::{Value, json};
use sha2::Sha256;
use uuid::Uuid;

use channel_sync::config::AppConfig;
use channel_sync::server::{AppState, create_app};

const TEST_TOKEN: &str = "integration-token";
const SHOPIFY_SECRET: &str = "shopify-secret";

struct TestServer {
    base_url: String,
    client: Client,
    seller_id: Uuid,
    state: AppState,
}

async fn spawn_server() -> TestServer {
    let mut config = AppConfig::default();
    config.operator_tokens = vec![TEST_TOKEN.to_string()];
    config.crypto_key = Some(vec![9u8; 32]);
    config.webhook_shopify_secret = Some(SHOPIFY_SECRET.to_string());

    let db = Database::connect("sqlite::memory:").await.unwrap();
    Migrator::up(&db, None).await.unwrap();

    let state = AppState::new(Arc::new(config), Arc::new(db)).unwrap();
    let app = create_app(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestServer {
        base_url: format!("http://{}", addr),
        client: Client::new(),
        seller_id: Uuid::new_v4(),
        state,
    }
}

impl TestServer {
    async fn post(&self, path: &str, body: Value) -> (StatusCode, Value) {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .bearer_auth(TEST_TOKEN)
            .header("X-Seller-Id", self.seller_id.to_string())
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = response.status();
        let body = response.json().await.unwrap_or(Value::Null);
        (status, body)
    }

    async fn get(&self, path: &str) -> (StatusCode, Value) {
        let response = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .bearer_auth(TEST_TOKEN)
            .header("X-Seller-Id", self.seller_id.to_string())
            .send()
            .await
            .unwrap();
        let status = response.status();
        let body = response.json().await.unwrap_or(Value::Null);
        (status, body)
    }
}

fn shopify_signature(body: &str) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(SHOPIFY_SECRET.as_bytes()).unwrap();
    mac.update(body.as_bytes());
    BASE64.encode(mac.finalize().into_bytes())
}

#[tokio::test]
async fn service_info_and_health_are_public() {
    let server = spawn_server().await;

    let response = server
        .client
        .get(format!("{}/", server.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["service"], "channel-sync");

    let response = server
        .client
        .get(format!("{}/healthz", server.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn operator_flow_from_connection_to_job() {
    let server = spawn_server().await;

    // Connect a channel with API-key credentials
    let (status, connection) = server
        .post(
            "/connections",
            json!({
                "channel_type": "woocommerce",
                "external_id": "https://shop.example.com",
                "store_url": "https://shop.example.com",
                "api_key": "ck_live_123"
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let connection_id = connection["id"].as_str().unwrap().to_string();
    assert_eq!(connection["has_api_key"], true);

    // Enqueue an orders sync for it
    let (status, job) = server
        .post(
            "/jobs",
            json!({ "connection_id": connection_id, "job_type": "orders_sync" }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(job["duplicate"], false);
    let job_id = job["id"].as_str().unwrap().to_string();

    // A second enqueue of the same type is suppressed
    let (_, job) = server
        .post(
            "/jobs",
            json!({ "connection_id": connection_id, "job_type": "orders_sync" }),
        )
        .await;
    assert_eq!(job["duplicate"], true);

    // The listing shows it pending
    let (status, listing) = server.get("/jobs?status=pending").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listing["jobs"].as_array().unwrap().len(), 1);
    assert_eq!(listing["jobs"][0]["id"], job_id.as_str());

    let (status, fetched) = server.get(&format!("/jobs/{}", job_id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["job_type"], "orders_sync");
}

#[tokio::test]
async fn webhook_delivery_feeds_the_job_queue() {
    let server = spawn_server().await;

    let (_, connection) = server
        .post(
            "/connections",
            json!({
                "channel_type": "shopify",
                "external_id": "store-9.myshopify.com",
                "api_key": "unused"
            }),
        )
        .await;
    let connection_id = connection["id"].as_str().unwrap().to_string();

    let payload = json!({
        "id": 112233,
        "order_number": 42,
        "financial_status": "paid",
        "total_price": "19.99",
        "currency": "USD",
        "updated_at": "2025-06-02T08:00:00Z"
    })
    .to_string();

    let response = server
        .client
        .post(format!("{}/webhooks/shopify", server.base_url))
        .header("content-type", "application/json")
        .header("x-shopify-hmac-sha256", shopify_signature(&payload))
        .header("x-shopify-shop-domain", "store-9.myshopify.com")
        .header("x-shopify-topic", "orders/create")
        .body(payload.clone())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // The delivery produced a high-priority webhook job
    let (_, listing) = server
        .get(&format!("/jobs?connection_id={}", connection_id))
        .await;
    let jobs = listing["jobs"].as_array().unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0]["job_type"], "webhook_event");

    // A forged signature is rejected
    let response = server
        .client
        .post(format!("{}/webhooks/shopify", server.base_url))
        .header("content-type", "application/json")
        .header("x-shopify-hmac-sha256", BASE64.encode(b"forged"))
        .header("x-shopify-shop-domain", "store-9.myshopify.com")
        .body(payload)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn unauthorized_requests_are_rejected() {
    let server = spawn_server().await;

    let response = server
        .client
        .get(format!("{}/jobs", server.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = server
        .client
        .get(format!("{}/jobs", server.base_url))
        .bearer_auth("wrong-token")
        .header("X-Seller-Id", Uuid::new_v4().to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn jobs_claimed_from_the_queue_show_as_processing() {
    use channel_sync::repositories::SyncJobRepository;

    let server = spawn_server().await;
    let (_, connection) = server
        .post(
            "/connections",
            json!({ "channel_type": "etsy", "external_id": "shop-7", "api_key": "key" }),
        )
        .await;
    let connection_id = connection["id"].as_str().unwrap().to_string();

    server
        .post(
            "/jobs",
            json!({ "connection_id": connection_id, "job_type": "products_sync" }),
        )
        .await;

    let repo = SyncJobRepository::new(server.state.db.clone());
    let claimed = repo.claim_batch(5).await.unwrap();
    assert_eq!(claimed.len(), 1);

    let (_, listing) = server.get("/jobs?status=processing").await;
    assert_eq!(listing["jobs"].as_array().unwrap().len(), 1);
    assert_eq!(listing["jobs"][0]["attempts"], 1);
}
