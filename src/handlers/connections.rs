//! # Connections API Handlers
//!
//! CRUD endpoints for channel connections. Credential material is
//! encrypted before it reaches the database and never appears in
//! responses; callers only see presence flags.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use sea_orm::Set;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::{OperatorAuth, SellerExtension};
use crate::error::{ApiError, validation_error};
use crate::handlers::types::PaginatedResponse;
use crate::models::channel_connection::{self, status};
use crate::repositories::connection::NewSecrets;
use crate::repositories::{ChannelOrderRepository, ConnectionRepository};
use crate::server::AppState;

const DEFAULT_PAGE_SIZE: u32 = 50;
const MAX_PAGE_SIZE: u32 = 200;

/// Request body for creating a connection with API-key style credentials.
///
/// OAuth channels are connected through `/connect/{channel}` instead;
/// this endpoint covers channels where the seller pastes credentials
/// issued by the channel's merchant dashboard.
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateConnectionRequest {
    /// Channel slug (e.g. "woocommerce", "wish")
    pub channel_type: String,
    /// Channel-native account identifier (store domain, merchant ID)
    pub external_id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub store_url: Option<String>,
    /// API key issued by the channel
    #[serde(default)]
    pub api_key: Option<String>,
    /// Pre-issued access token, for channels that hand one out directly
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub scopes: Option<JsonValue>,
    #[serde(default)]
    pub metadata: Option<JsonValue>,
}

/// Request body for updating a connection
#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateConnectionRequest {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub store_url: Option<String>,
    /// Pause or resume syncing for this connection
    #[serde(default)]
    pub active: Option<bool>,
    #[serde(default)]
    pub scopes: Option<JsonValue>,
    #[serde(default)]
    pub metadata: Option<JsonValue>,
}

/// Query parameters for listing connections
#[derive(Debug, Deserialize)]
pub struct ListConnectionsQuery {
    /// Filter by channel slug
    pub channel_type: Option<String>,
    /// Maximum number of connections to return (default 50, max 200)
    pub limit: Option<u32>,
    /// Opaque cursor for pagination
    pub cursor: Option<String>,
}

/// Connection details returned by the API.
///
/// Credential ciphertexts are reduced to presence booleans.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ConnectionInfo {
    pub id: Uuid,
    #[schema(example = "shopify")]
    pub channel_type: String,
    #[schema(example = "store-1.myshopify.com")]
    pub external_id: String,
    pub display_name: Option<String>,
    pub store_url: Option<String>,
    #[schema(example = "connected")]
    pub status: String,
    pub active: bool,
    pub has_access_token: bool,
    pub has_refresh_token: bool,
    pub has_api_key: bool,
    pub expires_at: Option<String>,
    pub scopes: Option<JsonValue>,
    pub metadata: Option<JsonValue>,
    pub last_synced_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<channel_connection::Model> for ConnectionInfo {
    fn from(model: channel_connection::Model) -> Self {
        Self {
            id: model.id,
            channel_type: model.channel_type,
            external_id: model.external_id,
            display_name: model.display_name,
            store_url: model.store_url,
            status: model.status,
            active: model.active,
            has_access_token: model.access_token_ciphertext.is_some(),
            has_refresh_token: model.refresh_token_ciphertext.is_some(),
            has_api_key: model.api_key_ciphertext.is_some(),
            expires_at: model.expires_at.map(|ts| ts.to_rfc3339()),
            scopes: model.scopes,
            metadata: model.metadata,
            last_synced_at: model.last_synced_at.map(|ts| ts.to_rfc3339()),
            created_at: model.created_at.to_rfc3339(),
            updated_at: model.updated_at.to_rfc3339(),
        }
    }
}

/// Create a connection with API-key style credentials
#[utoipa::path(
    post,
    path = "/connections",
    security(("bearer_auth" = [])),
    request_body = CreateConnectionRequest,
    responses(
        (status = 201, description = "Connection created", body = ConnectionInfo),
        (status = 400, description = "Unknown channel or invalid request", body = ApiError),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError)
    ),
    tag = "connections"
)]
pub async fn create_connection(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    SellerExtension(seller): SellerExtension,
    Json(request): Json<CreateConnectionRequest>,
) -> Result<(StatusCode, Json<ConnectionInfo>), ApiError> {
    if state.registry.get_metadata(&request.channel_type).is_err() {
        return Err(validation_error(
            "Unknown channel type",
            serde_json::json!({ "channel_type": request.channel_type }),
        ));
    }
    if request.external_id.trim().is_empty() {
        return Err(validation_error(
            "Invalid external ID",
            serde_json::json!({ "external_id": "Must not be empty" }),
        ));
    }

    let now = chrono::Utc::now().fixed_offset();
    let connection = channel_connection::ActiveModel {
        id: Set(Uuid::new_v4()),
        seller_id: Set(seller.0),
        channel_type: Set(request.channel_type.clone()),
        external_id: Set(request.external_id.clone()),
        display_name: Set(request.display_name.clone()),
        store_url: Set(request.store_url.clone()),
        status: Set(status::CONNECTED.to_string()),
        active: Set(true),
        access_token_ciphertext: Set(None),
        refresh_token_ciphertext: Set(None),
        api_key_ciphertext: Set(None),
        expires_at: Set(None),
        scopes: Set(request.scopes.clone()),
        metadata: Set(request.metadata.clone()),
        last_synced_at: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
    };

    let repo = ConnectionRepository::new(state.db.clone(), state.crypto_key.clone());
    let created = repo
        .upsert_with_secrets(
            connection,
            NewSecrets {
                access_token: request.access_token.as_deref(),
                refresh_token: None,
                api_key: request.api_key.as_deref(),
            },
        )
        .await?;

    tracing::info!(
        seller_id = %created.seller_id,
        channel_type = %created.channel_type,
        connection_id = %created.id,
        "Connection created"
    );

    Ok((StatusCode::CREATED, Json(ConnectionInfo::from(created))))
}

/// List connections for the seller
#[utoipa::path(
    get,
    path = "/connections",
    security(("bearer_auth" = [])),
    params(
        ("channel_type" = Option<String>, Query, description = "Filter by channel slug"),
        ("limit" = Option<u32>, Query, description = "Maximum number of connections to return (default 50, max 200)"),
        ("cursor" = Option<String>, Query, description = "Pagination cursor")
    ),
    responses(
        (status = 200, description = "Connections for the seller", body = PaginatedResponse<ConnectionInfo>),
        (status = 400, description = "Invalid query parameters", body = ApiError),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError)
    ),
    tag = "connections"
)]
pub async fn list_connections(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    SellerExtension(seller): SellerExtension,
    Query(params): Query<ListConnectionsQuery>,
) -> Result<Json<PaginatedResponse<ConnectionInfo>>, ApiError> {
    let limit = match params.limit {
        None => DEFAULT_PAGE_SIZE,
        Some(0) => {
            return Err(validation_error(
                "Invalid limit",
                serde_json::json!({ "limit": "Minimum allowed limit is 1" }),
            ));
        }
        Some(value) if value > MAX_PAGE_SIZE => {
            return Err(validation_error(
                "Invalid limit",
                serde_json::json!({ "limit": format!("Maximum allowed limit is {}", MAX_PAGE_SIZE) }),
            ));
        }
        Some(value) => value,
    };

    let repo = ConnectionRepository::new(state.db.clone(), state.crypto_key.clone());
    let (rows, next_cursor) = repo
        .list_by_seller(
            &seller.0,
            params.channel_type.as_deref(),
            limit as u64,
            params.cursor,
        )
        .await
        .map_err(|err| {
            validation_error("Invalid cursor", serde_json::json!({ "cursor": err.to_string() }))
        })?;

    Ok(Json(PaginatedResponse::new(
        rows.into_iter().map(ConnectionInfo::from).collect(),
        next_cursor,
    )))
}

/// Fetch a single connection by ID
#[utoipa::path(
    get,
    path = "/connections/{id}",
    security(("bearer_auth" = [])),
    params(("id" = Uuid, Path, description = "Connection ID")),
    responses(
        (status = 200, description = "Connection details", body = ConnectionInfo),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 404, description = "Connection not found for seller", body = ApiError)
    ),
    tag = "connections"
)]
pub async fn get_connection(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    SellerExtension(seller): SellerExtension,
    Path(connection_id): Path<Uuid>,
) -> Result<Json<ConnectionInfo>, ApiError> {
    let repo = ConnectionRepository::new(state.db.clone(), state.crypto_key.clone());
    let connection = repo
        .find_by_id(&seller.0, &connection_id)
        .await?
        .ok_or_else(|| {
            ApiError::new(StatusCode::NOT_FOUND, "NOT_FOUND", "Connection not found")
        })?;

    Ok(Json(ConnectionInfo::from(connection)))
}

/// Update mutable fields on a connection
#[utoipa::path(
    patch,
    path = "/connections/{id}",
    security(("bearer_auth" = [])),
    params(("id" = Uuid, Path, description = "Connection ID")),
    request_body = UpdateConnectionRequest,
    responses(
        (status = 200, description = "Updated connection", body = ConnectionInfo),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 404, description = "Connection not found for seller", body = ApiError)
    ),
    tag = "connections"
)]
pub async fn update_connection(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    SellerExtension(seller): SellerExtension,
    Path(connection_id): Path<Uuid>,
    Json(request): Json<UpdateConnectionRequest>,
) -> Result<Json<ConnectionInfo>, ApiError> {
    let repo = ConnectionRepository::new(state.db.clone(), state.crypto_key.clone());
    if repo.find_by_id(&seller.0, &connection_id).await?.is_none() {
        return Err(ApiError::new(
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            "Connection not found",
        ));
    }

    let mut update = channel_connection::ActiveModel::default();
    if let Some(display_name) = request.display_name {
        update.display_name = Set(Some(display_name));
    }
    if let Some(store_url) = request.store_url {
        update.store_url = Set(Some(store_url));
    }
    if let Some(active) = request.active {
        update.active = Set(active);
    }
    if let Some(scopes) = request.scopes {
        update.scopes = Set(Some(scopes));
    }
    if let Some(metadata) = request.metadata {
        update.metadata = Set(Some(metadata));
    }

    let updated = repo.update_by_id(&seller.0, &connection_id, update).await?;
    Ok(Json(ConnectionInfo::from(updated)))
}

/// Remove a connection.
///
/// Connections still referenced by synced orders are deactivated and
/// marked revoked so the order ledger keeps a valid parent row;
/// connections without orders are deleted outright. Both paths return
/// 204.
#[utoipa::path(
    delete,
    path = "/connections/{id}",
    security(("bearer_auth" = [])),
    params(("id" = Uuid, Path, description = "Connection ID")),
    responses(
        (status = 204, description = "Connection removed or deactivated"),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 404, description = "Connection not found for seller", body = ApiError)
    ),
    tag = "connections"
)]
pub async fn delete_connection(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    SellerExtension(seller): SellerExtension,
    Path(connection_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let repo = ConnectionRepository::new(state.db.clone(), state.crypto_key.clone());
    let connection = repo
        .find_by_id(&seller.0, &connection_id)
        .await?
        .ok_or_else(|| {
            ApiError::new(StatusCode::NOT_FOUND, "NOT_FOUND", "Connection not found")
        })?;

    let orders = ChannelOrderRepository::new(state.db.clone());
    let referenced = orders.count_for_connection(&connection.id).await?;

    if referenced > 0 {
        let mut update = channel_connection::ActiveModel::default();
        update.active = Set(false);
        update.status = Set(status::REVOKED.to_string());
        repo.update_by_id(&seller.0, &connection_id, update).await?;
        tracing::info!(
            connection_id = %connection_id,
            referenced_orders = referenced,
            "Connection deactivated instead of deleted"
        );
    } else {
        repo.delete_by_id(&seller.0, &connection_id).await?;
        tracing::info!(connection_id = %connection_id, "Connection deleted");
    }

    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::tests::TestApp;
    use axum::http::StatusCode;
    use serde_json::json;

    #[tokio::test]
    async fn create_connection_encrypts_credentials_and_hides_them() {
        let app = TestApp::new().await;

        let (status, body) = app
            .post(
                "/connections",
                json!({
                    "channel_type": "woocommerce",
                    "external_id": "https://shop.example.com",
                    "display_name": "Main store",
                    "api_key": "ck_live_secret"
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["channel_type"], "woocommerce");
        assert_eq!(body["has_api_key"], true);
        assert_eq!(body["has_access_token"], false);
        assert!(body.get("api_key").is_none());
        assert!(body.get("api_key_ciphertext").is_none());

        // The stored ciphertext decrypts back to the submitted key
        let repo = ConnectionRepository::new(app.state.db.clone(), app.state.crypto_key.clone());
        let id: Uuid = body["id"].as_str().unwrap().parse().unwrap();
        let model = repo.find_by_id(&app.seller_id, &id).await.unwrap().unwrap();
        let secrets = repo.decrypt_secrets(&model).await.unwrap();
        assert_eq!(secrets.api_key.as_deref(), Some("ck_live_secret"));
    }

    #[tokio::test]
    async fn create_connection_rejects_unknown_channel() {
        let app = TestApp::new().await;

        let (status, body) = app
            .post(
                "/connections",
                json!({ "channel_type": "myspace", "external_id": "store-1" }),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "VALIDATION_FAILED");
    }

    #[tokio::test]
    async fn list_connections_is_seller_scoped_and_paginated() {
        let app = TestApp::new().await;
        for i in 0..3 {
            app.post(
                "/connections",
                json!({ "channel_type": "etsy", "external_id": format!("shop-{}", i) }),
            )
            .await;
        }
        // Another seller's connection must not leak into the listing
        app.seed_connection_for_seller(Uuid::new_v4(), "etsy", "other-shop")
            .await;

        let (status, body) = app.get("/connections?limit=2").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"].as_array().unwrap().len(), 2);
        assert_eq!(body["has_more"], true);

        let cursor = body["next_cursor"].as_str().unwrap();
        let (_, body) = app
            .get(&format!("/connections?limit=2&cursor={}", urlencode(cursor)))
            .await;
        assert_eq!(body["data"].as_array().unwrap().len(), 1);
        assert!(body["next_cursor"].is_null());
    }

    #[tokio::test]
    async fn get_connection_returns_404_for_other_sellers() {
        let app = TestApp::new().await;
        let other_id = app
            .seed_connection_for_seller(Uuid::new_v4(), "shopify", "foreign-store")
            .await;

        let (status, _) = app.get(&format!("/connections/{}", other_id)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn update_connection_patches_only_provided_fields() {
        let app = TestApp::new().await;
        let (_, created) = app
            .post(
                "/connections",
                json!({
                    "channel_type": "wish",
                    "external_id": "merchant-1",
                    "display_name": "Original name"
                }),
            )
            .await;
        let id = created["id"].as_str().unwrap();

        let (status, body) = app
            .patch(&format!("/connections/{}", id), json!({ "active": false }))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["active"], false);
        // Untouched fields survive
        assert_eq!(body["display_name"], "Original name");

        let (status, _) = app
            .patch(
                &format!("/connections/{}", Uuid::new_v4()),
                json!({ "active": true }),
            )
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn delete_connection_without_orders_removes_the_row() {
        let app = TestApp::new().await;
        let (_, created) = app
            .post(
                "/connections",
                json!({ "channel_type": "etsy", "external_id": "shop-del" }),
            )
            .await;
        let id = created["id"].as_str().unwrap();

        let response = app.delete_raw(&format!("/connections/{}", id)).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let (status, _) = app.get(&format!("/connections/{}", id)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn delete_connection_with_orders_soft_deactivates() {
        let app = TestApp::new().await;
        let (_, created) = app
            .post(
                "/connections",
                json!({ "channel_type": "shopify", "external_id": "store-keep" }),
            )
            .await;
        let id: Uuid = created["id"].as_str().unwrap().parse().unwrap();

        let orders = ChannelOrderRepository::new(app.state.db.clone());
        orders
            .upsert(crate::repositories::channel_order::OrderUpsert {
                seller_id: app.seller_id,
                connection_id: id,
                channel_order_id: "1001".to_string(),
                channel_order_number: None,
                status: "paid".to_string(),
                total_amount: "10.00".to_string(),
                currency: "USD".to_string(),
                customer_email: None,
                raw_payload: json!({}),
                channel_updated_at: None,
            })
            .await
            .unwrap();

        let response = app.delete_raw(&format!("/connections/{}", id)).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let (status, body) = app.get(&format!("/connections/{}", id)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["active"], false);
        assert_eq!(body["status"], "revoked");
    }

    fn urlencode(value: &str) -> String {
        value
            .replace('%', "%25")
            .replace('+', "%2B")
            .replace('=', "%3D")
            .replace('/', "%2F")
    }
}
