//! Router-level test harness and endpoint tests shared by the handler
//! modules. Each `TestApp` gets its own in-memory database with the
//! full migration set applied and the real router with auth middleware.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use axum::response::Response;
use axum::Router;
use migration::{Migrator, MigratorTrait};
use sea_orm::{Database, Set};
use serde_json::Value as JsonValue;
use tower::ServiceExt;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::models::channel_connection;
use crate::repositories::ConnectionRepository;
use crate::repositories::connection::NewSecrets;
use crate::server::{AppState, create_app};

pub(crate) const TEST_TOKEN: &str = "test-token-123";

pub(crate) struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub seller_id: Uuid,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(AppConfig::default()).await
    }

    /// Build an app from the given config, filling in the fields every
    /// test needs: an operator token, a crypto key, and webhook secrets.
    pub async fn with_config(mut config: AppConfig) -> Self {
        if config.operator_tokens.is_empty() {
            config.operator_tokens = vec![TEST_TOKEN.to_string()];
        }
        if config.crypto_key.is_none() {
            config.crypto_key = Some(vec![7u8; 32]);
        }
        if config.webhook_shopify_secret.is_none() {
            config.webhook_shopify_secret = Some("shopify-secret".to_string());
        }
        if config.webhook_woocommerce_secret.is_none() {
            config.webhook_woocommerce_secret = Some("woo-secret".to_string());
        }
        if config.webhook_generic_secret.is_none() {
            config.webhook_generic_secret = Some("generic-secret".to_string());
        }

        let db = Database::connect("sqlite::memory:").await.unwrap();
        Migrator::up(&db, None).await.unwrap();

        let state = AppState::new(Arc::new(config), Arc::new(db)).unwrap();
        let router = create_app(state.clone());

        Self {
            router,
            state,
            seller_id: Uuid::new_v4(),
        }
    }

    pub async fn seed_connection(&self, channel: &str, external_id: &str) -> Uuid {
        self.seed_connection_for_seller(self.seller_id, channel, external_id)
            .await
    }

    pub async fn seed_connection_for_seller(
        &self,
        seller_id: Uuid,
        channel: &str,
        external_id: &str,
    ) -> Uuid {
        let now = chrono::Utc::now().fixed_offset();
        let connection = channel_connection::ActiveModel {
            id: Set(Uuid::new_v4()),
            seller_id: Set(seller_id),
            channel_type: Set(channel.to_string()),
            external_id: Set(external_id.to_string()),
            display_name: Set(None),
            store_url: Set(None),
            status: Set(channel_connection::status::CONNECTED.to_string()),
            active: Set(true),
            access_token_ciphertext: Set(None),
            refresh_token_ciphertext: Set(None),
            api_key_ciphertext: Set(None),
            expires_at: Set(None),
            scopes: Set(None),
            metadata: Set(None),
            last_synced_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };

        let repo = ConnectionRepository::new(self.state.db.clone(), self.state.crypto_key.clone());
        repo.upsert_with_secrets(connection, NewSecrets::default())
            .await
            .unwrap()
            .id
    }

    pub async fn get(&self, path: &str) -> (StatusCode, JsonValue) {
        let response = self.get_raw(path).await;
        split_json(response).await
    }

    pub async fn get_raw(&self, path: &str) -> Response {
        let request = self.authed(Request::builder().method("GET").uri(path));
        self.send(request.body(Body::empty()).unwrap()).await
    }

    pub async fn post(&self, path: &str, body: JsonValue) -> (StatusCode, JsonValue) {
        let request = self
            .authed(Request::builder().method("POST").uri(path))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        split_json(self.send(request).await).await
    }

    pub async fn patch(&self, path: &str, body: JsonValue) -> (StatusCode, JsonValue) {
        let request = self
            .authed(Request::builder().method("PATCH").uri(path))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        split_json(self.send(request).await).await
    }

    pub async fn delete_raw(&self, path: &str) -> Response {
        let request = self.authed(Request::builder().method("DELETE").uri(path));
        self.send(request.body(Body::empty()).unwrap()).await
    }

    /// Unauthenticated POST with raw bytes and caller-supplied headers
    pub async fn post_webhook(
        &self,
        path: &str,
        body: &[u8],
        headers: &[(&str, &str)],
    ) -> Response {
        let mut builder = Request::builder()
            .method("POST")
            .uri(path)
            .header(header::CONTENT_TYPE, "application/json");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        self.send(builder.body(Body::from(body.to_vec())).unwrap())
            .await
    }

    fn authed(&self, builder: axum::http::request::Builder) -> axum::http::request::Builder {
        builder
            .header(header::AUTHORIZATION, format!("Bearer {}", TEST_TOKEN))
            .header("X-Seller-Id", self.seller_id.to_string())
    }

    async fn send(&self, request: Request<Body>) -> Response {
        self.router.clone().oneshot(request).await.unwrap()
    }
}

pub(crate) async fn body_bytes(response: Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

async fn split_json(response: Response) -> (StatusCode, JsonValue) {
    let status = response.status();
    let bytes = body_bytes(response).await;
    let body = if bytes.is_empty() {
        JsonValue::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(JsonValue::Null)
    };
    (status, body)
}

#[tokio::test]
async fn root_returns_service_info() {
    let app = TestApp::new().await;
    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let (status, body) = split_json(response).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["service"], "channel-sync");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn healthz_reports_database_health() {
    let app = TestApp::new().await;
    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/healthz")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let (status, body) = split_json(response).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn protected_routes_require_bearer_token() {
    let app = TestApp::new().await;
    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/jobs")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let (status, body) = split_json(response).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["message"].is_string());
}

#[tokio::test]
async fn protected_routes_require_seller_header() {
    let app = TestApp::new().await;
    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/jobs")
                .header(header::AUTHORIZATION, format!("Bearer {}", TEST_TOKEN))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let (status, body) = split_json(response).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_FAILED");
}

#[tokio::test]
async fn wrong_bearer_token_is_rejected() {
    let app = TestApp::new().await;
    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/jobs")
                .header(header::AUTHORIZATION, "Bearer wrong-token")
                .header("X-Seller-Id", Uuid::new_v4().to_string())
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn openapi_spec_is_served() {
    let app = TestApp::new().await;
    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/openapi.json")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let (status, body) = split_json(response).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["paths"]["/jobs"].is_object());
    assert!(body["paths"]["/webhooks/{channel}"].is_object());
}
