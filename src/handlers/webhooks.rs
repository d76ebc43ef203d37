//! # Webhook Ingestion Handlers
//!
//! Public endpoint receiving channel webhook deliveries. The raw body
//! is verified against the channel's signature scheme before any
//! parsing, deliveries are matched to a connection by the channel's
//! native store identifier, and accepted events are written to the
//! ledger and turned into sync jobs. The handler never performs
//! outbound I/O; slow work always goes through the job queue.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::Json,
};
use chrono::{DateTime, Utc};
use metrics::counter;
use serde_json::{Value as JsonValue, json};

use crate::adapters::OrderStatus;
use crate::error::ApiError;
use crate::models::channel_connection;
use crate::models::inventory_sync_event::direction;
use crate::models::sync_job::job_type;
use crate::repositories::channel_order::OrderUpsert;
use crate::repositories::inventory_event::InventoryEvent;
use crate::repositories::sync_job::NewJob;
use crate::repositories::{
    ChannelOrderRepository, ConnectionRepository, InventoryEventRepository, SyncJobRepository,
};
use crate::server::AppState;
use crate::webhook_verification::verify_webhook_signature;

/// Priority for jobs spawned from webhook deliveries, claimed ahead of
/// scheduled syncs
const WEBHOOK_JOB_PRIORITY: i16 = 10;
const MAX_BODY_BYTES: usize = 1_048_576;

/// Receive a webhook delivery from a channel.
///
/// Senders only ever see 200, 401, 404, 429, or 500; deliveries that
/// are well-signed but unusable (unknown store, malformed payload) are
/// acknowledged with 200 so channels do not disable the endpoint.
#[utoipa::path(
    post,
    path = "/webhooks/{channel}",
    params(crate::handlers::types::ChannelPathParam),
    responses(
        (status = 200, description = "Delivery acknowledged"),
        (status = 401, description = "Signature verification failed", body = ApiError),
        (status = 404, description = "Unknown channel", body = ApiError),
        (status = 429, description = "Rate limited", body = ApiError)
    ),
    tag = "webhooks"
)]
pub async fn receive_webhook(
    State(state): State<AppState>,
    Path(channel): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<JsonValue>), ApiError> {
    let metadata = state.registry.get_metadata(&channel).map_err(|_| {
        ApiError::new(
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            format!("Unknown channel '{}'", channel),
        )
    })?;

    counter!("webhooks_received_total", "channel" => channel.clone()).increment(1);

    // Signature check runs on the raw bytes, before any parsing
    if let Err(err) =
        verify_webhook_signature(&channel, metadata.webhook_scheme, &body, &headers, &state.config)
    {
        counter!("webhooks_rejected_total", "channel" => channel.clone()).increment(1);
        tracing::warn!(channel = %channel, error = %err, "Webhook signature rejected");
        return Err(ApiError::new(
            err.status_code(),
            "UNAUTHORIZED",
            "Webhook signature verification failed",
        ));
    }

    if body.len() > MAX_BODY_BYTES {
        tracing::warn!(channel = %channel, bytes = body.len(), "Oversized webhook body ignored");
        return Ok((StatusCode::OK, Json(json!({ "status": "ignored" }))));
    }

    let payload: JsonValue = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(_) => {
            // Authenticated but undecodable, acknowledge and drop
            tracing::warn!(channel = %channel, "Malformed webhook payload ignored");
            return Ok((StatusCode::OK, Json(json!({ "status": "ignored" }))));
        }
    };

    let Some(identifier) = extract_identifier(&headers, &payload) else {
        tracing::info!(channel = %channel, "Webhook without store identifier ignored");
        return Ok((StatusCode::OK, Json(json!({ "status": "ignored" }))));
    };

    let connections = ConnectionRepository::new(state.db.clone(), state.crypto_key.clone());
    let Some(connection) = connections
        .find_by_channel_identifier(&channel, &identifier)
        .await?
    else {
        tracing::info!(
            channel = %channel,
            identifier = %identifier,
            "Webhook for unknown connection ignored"
        );
        return Ok((StatusCode::OK, Json(json!({ "status": "ignored" }))));
    };

    if state
        .webhook_limiter
        .is_limited(&channel, &connection.id.to_string())
    {
        counter!("webhooks_rate_limited_total", "channel" => channel.clone()).increment(1);
        return Err(ApiError::new(
            StatusCode::TOO_MANY_REQUESTS,
            "RATE_LIMITED",
            "Webhook rate limit exceeded for connection",
        )
        .with_retry_after(60));
    }

    let topic = extract_topic(&headers, &payload).unwrap_or_default();

    if topic.starts_with("orders/") || topic.starts_with("order.") {
        handle_order_event(&state, &connection, &topic, &payload).await?;
    } else if topic.starts_with("products/")
        || topic.starts_with("product.")
        || topic.contains("inventory")
    {
        handle_catalog_event(&state, &connection, &topic).await?;
    } else {
        tracing::debug!(channel = %channel, topic = %topic, "Webhook topic acknowledged only");
    }

    Ok((StatusCode::OK, Json(json!({ "status": "accepted" }))))
}

/// Fast path: write the order into the ledger and enqueue a follow-up
/// job for downstream processing.
async fn handle_order_event(
    state: &AppState,
    connection: &channel_connection::Model,
    topic: &str,
    payload: &JsonValue,
) -> Result<(), ApiError> {
    let Some(channel_order_id) = string_or_number(payload, &["id", "order_id"]) else {
        tracing::warn!(
            connection_id = %connection.id,
            topic = %topic,
            "Order webhook without an order ID ignored"
        );
        return Ok(());
    };

    match extract_order(state, connection, payload) {
        Some(order) => {
            let orders = ChannelOrderRepository::new(state.db.clone());
            let outcome = orders.upsert(order).await?;
            tracing::info!(
                connection_id = %connection.id,
                channel_order_id = %channel_order_id,
                outcome = ?outcome,
                "Order webhook applied"
            );
        }
        None => {
            // Status vocabulary we cannot normalize; the follow-up job
            // pulls the order through the adapter's own mapping.
            tracing::info!(
                connection_id = %connection.id,
                channel_order_id = %channel_order_id,
                "Order webhook status not recognized, deferring to pull"
            );
        }
    }

    let jobs = SyncJobRepository::new(state.db.clone());
    jobs.enqueue(NewJob {
        seller_id: connection.seller_id,
        connection_id: connection.id,
        channel_type: connection.channel_type.clone(),
        job_type: job_type::WEBHOOK_EVENT.to_string(),
        priority: WEBHOOK_JOB_PRIORITY,
        max_attempts: state.config.retry_policy.max_attempts as i32,
        payload: Some(json!({ "topic": topic, "channel_order_id": channel_order_id })),
        scheduled_for: Utc::now(),
    })
    .await?;

    Ok(())
}

/// Slow path: record the event and enqueue a pull so the executor
/// refreshes the catalog through the adapter.
async fn handle_catalog_event(
    state: &AppState,
    connection: &channel_connection::Model,
    topic: &str,
) -> Result<(), ApiError> {
    let events = InventoryEventRepository::new(state.db.clone());
    events
        .record(InventoryEvent {
            seller_id: connection.seller_id,
            connection_id: connection.id,
            mapping_id: None,
            direction: direction::PULL.to_string(),
            quantity_before: None,
            quantity_after: None,
            status: "webhook_received".to_string(),
            error_message: None,
        })
        .await?;

    let kind = if topic.contains("inventory") {
        job_type::INVENTORY_SYNC
    } else {
        job_type::PRODUCTS_SYNC
    };

    let jobs = SyncJobRepository::new(state.db.clone());
    jobs.enqueue(NewJob {
        seller_id: connection.seller_id,
        connection_id: connection.id,
        channel_type: connection.channel_type.clone(),
        job_type: kind.to_string(),
        priority: WEBHOOK_JOB_PRIORITY,
        max_attempts: state.config.retry_policy.max_attempts as i32,
        payload: Some(json!({ "topic": topic })),
        scheduled_for: Utc::now(),
    })
    .await?;

    Ok(())
}

/// Event topic from the channel's topic header, falling back to a
/// `topic` field in the payload.
fn extract_topic(headers: &HeaderMap, payload: &JsonValue) -> Option<String> {
    for header in ["x-shopify-topic", "x-wc-webhook-topic", "x-webhook-topic"] {
        if let Some(value) = headers.get(header).and_then(|v| v.to_str().ok()) {
            return Some(value.to_string());
        }
    }
    payload
        .get("topic")
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

/// Channel-native store identifier carried in headers or the payload.
fn extract_identifier(headers: &HeaderMap, payload: &JsonValue) -> Option<String> {
    for header in ["x-shopify-shop-domain", "x-wc-webhook-source", "x-store-id"] {
        if let Some(value) = headers.get(header).and_then(|v| v.to_str().ok()) {
            return Some(value.trim_end_matches('/').to_string());
        }
    }
    for field in ["shop_domain", "store_id", "shop", "seller_id"] {
        if let Some(value) = payload.get(field) {
            match value {
                JsonValue::String(s) => return Some(s.trim_end_matches('/').to_string()),
                JsonValue::Number(n) => return Some(n.to_string()),
                _ => {}
            }
        }
    }
    None
}

/// Normalize an order payload into ledger fields. Field names vary per
/// channel; the raw payload is kept verbatim alongside. Returns `None`
/// when the payload carries a status outside the normalized vocabulary,
/// leaving the write to the follow-up pull.
fn extract_order(
    state: &AppState,
    connection: &channel_connection::Model,
    payload: &JsonValue,
) -> Option<OrderUpsert> {
    let channel_order_id = string_or_number(payload, &["id", "order_id"])?;

    let channel_order_number = string_or_number(payload, &["order_number", "number", "name"]);
    let order_status = payload
        .get("financial_status")
        .or_else(|| payload.get("status"))
        .and_then(|v| v.as_str())
        .and_then(normalize_order_status)?
        .as_str()
        .to_string();
    let total_amount =
        string_or_number(payload, &["total_price", "total", "order_total"]).unwrap_or_default();
    let currency = payload
        .get("currency")
        .or_else(|| payload.get("currency_code"))
        .and_then(|v| v.as_str())
        .unwrap_or_else(|| state.registry.default_currency(&connection.channel_type))
        .to_string();
    let customer_email = payload
        .get("email")
        .or_else(|| payload.get("customer_email"))
        .or_else(|| payload.get("customer").and_then(|c| c.get("email")))
        .and_then(|v| v.as_str())
        .map(str::to_string);
    let channel_updated_at = payload
        .get("updated_at")
        .and_then(|v| v.as_str())
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|ts| ts.with_timezone(&Utc));

    Some(OrderUpsert {
        seller_id: connection.seller_id,
        connection_id: connection.id,
        channel_order_id,
        channel_order_number,
        status: order_status,
        total_amount,
        currency,
        customer_email,
        raw_payload: payload.clone(),
        channel_updated_at,
    })
}

/// Map the status vocabularies of webhook-capable channels (Shopify
/// financial status, WooCommerce order status) onto the ledger's set.
fn normalize_order_status(raw: &str) -> Option<OrderStatus> {
    match raw.to_ascii_lowercase().as_str() {
        "pending" | "authorized" | "on-hold" => Some(OrderStatus::Pending),
        "paid" | "partially_paid" => Some(OrderStatus::Paid),
        "processing" => Some(OrderStatus::Processing),
        "shipped" => Some(OrderStatus::Shipped),
        "completed" | "delivered" => Some(OrderStatus::Delivered),
        "cancelled" | "canceled" | "voided" | "failed" => Some(OrderStatus::Cancelled),
        "refunded" | "partially_refunded" => Some(OrderStatus::Refunded),
        _ => None,
    }
}

fn string_or_number(payload: &JsonValue, fields: &[&str]) -> Option<String> {
    for field in fields {
        match payload.get(field) {
            Some(JsonValue::String(s)) if !s.is_empty() => return Some(s.clone()),
            Some(JsonValue::Number(n)) => return Some(n.to_string()),
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;
    use crate::handlers::tests::TestApp;
    use crate::models::sync_job::status as job_status;
    use crate::repositories::sync_job::JobFilters;
    use axum::http::StatusCode;
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD as BASE64;
    use hmac::{Hmac, Mac};
    use serde_json::json;
    use sha2::Sha256;

    fn shopify_signature(secret: &str, body: &[u8]) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        BASE64.encode(mac.finalize().into_bytes())
    }

    async fn seeded_app() -> (TestApp, Uuid) {
        let app = TestApp::new().await;
        let connection_id = app
            .seed_connection("shopify", "store-1.myshopify.com")
            .await;
        (app, connection_id)
    }

    #[tokio::test]
    async fn valid_order_webhook_upserts_and_enqueues() {
        let (app, connection_id) = seeded_app().await;

        let body = json!({
            "id": 820982911,
            "order_number": 1001,
            "financial_status": "paid",
            "total_price": "59.90",
            "currency": "USD",
            "email": "buyer@example.com",
            "updated_at": "2025-06-01T10:00:00Z"
        })
        .to_string();

        let response = app
            .post_webhook(
                "/webhooks/shopify",
                body.as_bytes(),
                &[
                    (
                        "x-shopify-hmac-sha256",
                        &shopify_signature("shopify-secret", body.as_bytes()),
                    ),
                    ("x-shopify-shop-domain", "store-1.myshopify.com"),
                    ("x-shopify-topic", "orders/create"),
                ],
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);

        let orders = ChannelOrderRepository::new(app.state.db.clone());
        let stored = orders
            .find_by_natural_key(&connection_id, "820982911")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, "paid");
        assert_eq!(stored.total_amount, "59.90");
        assert_eq!(stored.customer_email.as_deref(), Some("buyer@example.com"));

        let jobs = SyncJobRepository::new(app.state.db.clone());
        let (rows, _) = jobs
            .list_by_seller(
                app.seller_id,
                JobFilters {
                    job_type: Some(job_type::WEBHOOK_EVENT.to_string()),
                    ..Default::default()
                },
                10,
                None,
            )
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, job_status::PENDING);
        assert_eq!(rows[0].priority, WEBHOOK_JOB_PRIORITY);
    }

    #[tokio::test]
    async fn channel_status_vocabulary_is_normalized_before_upsert() {
        let (app, connection_id) = seeded_app().await;

        // Shopify's "authorized" is not a ledger status; it lands as pending
        let body = json!({
            "id": 7001,
            "financial_status": "authorized",
            "total_price": "10.00",
            "currency": "USD"
        })
        .to_string();

        let response = app
            .post_webhook(
                "/webhooks/shopify",
                body.as_bytes(),
                &[
                    (
                        "x-shopify-hmac-sha256",
                        &shopify_signature("shopify-secret", body.as_bytes()),
                    ),
                    ("x-shopify-shop-domain", "store-1.myshopify.com"),
                    ("x-shopify-topic", "orders/create"),
                ],
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);

        let orders = ChannelOrderRepository::new(app.state.db.clone());
        let stored = orders
            .find_by_natural_key(&connection_id, "7001")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, OrderStatus::Pending.as_str());
    }

    #[tokio::test]
    async fn unrecognized_order_status_defers_to_the_pull_job() {
        let (app, connection_id) = seeded_app().await;

        let body = json!({ "id": 7002, "financial_status": "teleported" }).to_string();
        let response = app
            .post_webhook(
                "/webhooks/shopify",
                body.as_bytes(),
                &[
                    (
                        "x-shopify-hmac-sha256",
                        &shopify_signature("shopify-secret", body.as_bytes()),
                    ),
                    ("x-shopify-shop-domain", "store-1.myshopify.com"),
                    ("x-shopify-topic", "orders/create"),
                ],
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);

        // No raw channel value reaches the ledger
        let orders = ChannelOrderRepository::new(app.state.db.clone());
        assert!(orders
            .find_by_natural_key(&connection_id, "7002")
            .await
            .unwrap()
            .is_none());

        // The reconcile pull is still queued for the order
        let jobs = SyncJobRepository::new(app.state.db.clone());
        let (rows, _) = jobs
            .list_by_seller(
                app.seller_id,
                JobFilters {
                    job_type: Some(job_type::WEBHOOK_EVENT.to_string()),
                    ..Default::default()
                },
                10,
                None,
            )
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(
            rows[0].payload.as_ref().unwrap()["channel_order_id"],
            "7002"
        );
    }

    #[tokio::test]
    async fn bad_signature_is_rejected_without_writes() {
        let (app, connection_id) = seeded_app().await;

        let body = json!({ "id": 1, "financial_status": "paid" }).to_string();
        let response = app
            .post_webhook(
                "/webhooks/shopify",
                body.as_bytes(),
                &[
                    ("x-shopify-hmac-sha256", &BASE64.encode(b"forged")),
                    ("x-shopify-shop-domain", "store-1.myshopify.com"),
                    ("x-shopify-topic", "orders/create"),
                ],
            )
            .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let orders = ChannelOrderRepository::new(app.state.db.clone());
        assert!(orders
            .find_by_natural_key(&connection_id, "1")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn missing_signature_is_rejected() {
        let (app, _) = seeded_app().await;

        let body = json!({ "id": 2 }).to_string();
        let response = app
            .post_webhook(
                "/webhooks/shopify",
                body.as_bytes(),
                &[("x-shopify-shop-domain", "store-1.myshopify.com")],
            )
            .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn unknown_store_is_acknowledged_without_writes() {
        let (app, _) = seeded_app().await;

        let body = json!({ "id": 3, "financial_status": "paid" }).to_string();
        let response = app
            .post_webhook(
                "/webhooks/shopify",
                body.as_bytes(),
                &[
                    (
                        "x-shopify-hmac-sha256",
                        &shopify_signature("shopify-secret", body.as_bytes()),
                    ),
                    ("x-shopify-shop-domain", "elsewhere.myshopify.com"),
                    ("x-shopify-topic", "orders/create"),
                ],
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);

        let jobs = SyncJobRepository::new(app.state.db.clone());
        let (rows, _) = jobs
            .list_by_seller(app.seller_id, JobFilters::default(), 10, None)
            .await
            .unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn malformed_payload_after_valid_signature_is_ignored() {
        let (app, _) = seeded_app().await;

        let body = b"this is not json";
        let response = app
            .post_webhook(
                "/webhooks/shopify",
                body,
                &[
                    (
                        "x-shopify-hmac-sha256",
                        &shopify_signature("shopify-secret", body),
                    ),
                    ("x-shopify-shop-domain", "store-1.myshopify.com"),
                ],
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn product_webhook_records_event_and_enqueues_pull() {
        let (app, connection_id) = seeded_app().await;

        let body = json!({ "id": 55, "title": "New product" }).to_string();
        let response = app
            .post_webhook(
                "/webhooks/shopify",
                body.as_bytes(),
                &[
                    (
                        "x-shopify-hmac-sha256",
                        &shopify_signature("shopify-secret", body.as_bytes()),
                    ),
                    ("x-shopify-shop-domain", "store-1.myshopify.com"),
                    ("x-shopify-topic", "products/update"),
                ],
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);

        let events = InventoryEventRepository::new(app.state.db.clone());
        let rows = events
            .list_by_connection(&app.seller_id, &connection_id, 10)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, "webhook_received");

        let jobs = SyncJobRepository::new(app.state.db.clone());
        let (rows, _) = jobs
            .list_by_seller(
                app.seller_id,
                JobFilters {
                    job_type: Some(job_type::PRODUCTS_SYNC.to_string()),
                    ..Default::default()
                },
                10,
                None,
            )
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn unknown_channel_is_404() {
        let app = TestApp::new().await;
        let response = app.post_webhook("/webhooks/myspace", b"{}", &[]).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn rate_limited_delivery_gets_429() {
        let mut config = crate::config::AppConfig::default();
        config.webhook_rate_limit_per_minute = 1;
        config.webhook_rate_limit_burst_size = 1;
        let app = TestApp::with_config(config).await;
        app.seed_connection("shopify", "store-1.myshopify.com").await;

        let body = json!({ "id": 9, "financial_status": "paid" }).to_string();
        let headers = [
            (
                "x-shopify-hmac-sha256",
                shopify_signature("shopify-secret", body.as_bytes()),
            ),
            (
                "x-shopify-shop-domain",
                "store-1.myshopify.com".to_string(),
            ),
            ("x-shopify-topic", "orders/create".to_string()),
        ];
        let header_refs: Vec<(&str, &str)> = headers
            .iter()
            .map(|(name, value)| (*name, value.as_str()))
            .collect();

        let first = app
            .post_webhook("/webhooks/shopify", body.as_bytes(), &header_refs)
            .await;
        assert_eq!(first.status(), StatusCode::OK);

        let second = app
            .post_webhook("/webhooks/shopify", body.as_bytes(), &header_refs)
            .await;
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(second.headers().contains_key("retry-after"));
    }
}
