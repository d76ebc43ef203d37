//! # Server Configuration
//!
//! Application state, router assembly, and the HTTP server entry point.
//! Operator routes sit behind the bearer/seller auth middleware; the
//! root, health probe, webhook, and OAuth callback routes are public.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, anyhow};
use axum::{
    Router,
    extract::Request,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
};
use sea_orm::DatabaseConnection;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;
use uuid::Uuid;

use crate::adapters::Registry;
use crate::auth::auth_middleware;
use crate::config::AppConfig;
use crate::crypto::CryptoKey;
use crate::handlers;
use crate::telemetry::{self, TraceContext};
use crate::webhook_verification::WebhookRateLimiter;

const HTTP_CLIENT_TIMEOUT_SECS: u64 = 30;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: Arc<DatabaseConnection>,
    pub crypto_key: CryptoKey,
    pub registry: Arc<Registry>,
    pub webhook_limiter: Arc<WebhookRateLimiter>,
    pub http: reqwest::Client,
}

impl AppState {
    /// Build the shared state from validated configuration
    pub fn new(config: Arc<AppConfig>, db: Arc<DatabaseConnection>) -> anyhow::Result<Self> {
        let key_bytes = config
            .crypto_key
            .clone()
            .ok_or_else(|| anyhow!("crypto key is required"))?;
        let crypto_key =
            CryptoKey::new(key_bytes).map_err(|err| anyhow!("invalid crypto key: {}", err))?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(HTTP_CLIENT_TIMEOUT_SECS))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            webhook_limiter: Arc::new(WebhookRateLimiter::from_config(&config)),
            registry: Arc::new(Registry::new()),
            crypto_key,
            config,
            db,
            http,
        })
    }

    /// Minimal state for extractor tests that never touch the database
    #[cfg(test)]
    pub fn for_tests(config: Arc<AppConfig>) -> Self {
        Self {
            webhook_limiter: Arc::new(WebhookRateLimiter::from_config(&config)),
            registry: Arc::new(Registry::new()),
            crypto_key: CryptoKey::new(vec![0u8; 32]).expect("32-byte test key"),
            config,
            db: Arc::new(DatabaseConnection::default()),
            http: reqwest::Client::new(),
        }
    }
}

/// Attach a trace ID to the request and the task-local logging context
async fn trace_context_middleware(mut request: Request, next: Next) -> Response {
    let context = TraceContext {
        trace_id: Uuid::new_v4().simple().to_string(),
    };
    request.extensions_mut().insert(context.clone());
    telemetry::with_trace_context(context, next.run(request)).await
}

/// Creates and configures the Axum application router
pub fn create_app(state: AppState) -> Router {
    let public = Router::new()
        .route("/", get(handlers::root))
        .route("/healthz", get(handlers::healthz))
        .route("/webhooks/{channel}", post(handlers::webhooks::receive_webhook))
        .route(
            "/connect/{channel}/callback",
            get(handlers::connect::connect_callback),
        );

    let protected = Router::new()
        .route(
            "/jobs",
            get(handlers::jobs::list_jobs).post(handlers::jobs::enqueue_job),
        )
        .route("/jobs/retry", post(handlers::jobs::retry_jobs))
        .route("/jobs/{id}", get(handlers::jobs::get_job))
        .route("/runs/export", get(handlers::jobs::export_runs))
        .route(
            "/connections",
            get(handlers::connections::list_connections)
                .post(handlers::connections::create_connection),
        )
        .route(
            "/connections/{id}",
            get(handlers::connections::get_connection)
                .patch(handlers::connections::update_connection)
                .delete(handlers::connections::delete_connection),
        )
        .route("/connect/{channel}", post(handlers::connect::start_connect))
        .route_layer(middleware::from_fn_with_state(
            state.config.clone(),
            auth_middleware,
        ));

    Router::new()
        .merge(public)
        .merge(protected)
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
        .layer(middleware::from_fn(trace_context_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Serve the API until the shutdown token fires
pub async fn run_server(state: AppState, shutdown: CancellationToken) -> anyhow::Result<()> {
    let addr = state
        .config
        .bind_addr()
        .map_err(|err| anyhow!("invalid server address: {}", err))?;
    let app = create_app(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    tracing::info!(%addr, "API server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("server error")
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::healthz,
        crate::handlers::jobs::enqueue_job,
        crate::handlers::jobs::list_jobs,
        crate::handlers::jobs::get_job,
        crate::handlers::jobs::retry_jobs,
        crate::handlers::jobs::export_runs,
        crate::handlers::connections::create_connection,
        crate::handlers::connections::list_connections,
        crate::handlers::connections::get_connection,
        crate::handlers::connections::update_connection,
        crate::handlers::connections::delete_connection,
        crate::handlers::connect::start_connect,
        crate::handlers::connect::connect_callback,
        crate::handlers::webhooks::receive_webhook,
    ),
    components(
        schemas(
            crate::models::ServiceInfo,
            crate::error::ApiError,
            crate::handlers::jobs::EnqueueJobRequest,
            crate::handlers::jobs::EnqueueJobResponse,
            crate::handlers::jobs::JobInfo,
            crate::handlers::jobs::JobsResponse,
            crate::handlers::jobs::RetryJobsRequest,
            crate::handlers::jobs::RetryOutcome,
            crate::handlers::jobs::RetryJobsResponse,
            crate::handlers::connections::CreateConnectionRequest,
            crate::handlers::connections::UpdateConnectionRequest,
            crate::handlers::connections::ConnectionInfo,
            crate::handlers::types::PaginatedResponse<crate::handlers::connections::ConnectionInfo>,
            crate::handlers::connect::StartConnectRequest,
            crate::handlers::connect::StartConnectResponse,
            crate::handlers::connect::CallbackResponse,
        )
    ),
    modifiers(&SecurityAddon),
    info(
        title = "Channel Sync API",
        description = "Sales channel synchronization engine: connections, sync jobs, and webhook ingestion",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};

        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("opaque")
                        .build(),
                ),
            );
        }
    }
}
