//! # OAuth Connect Handlers
//!
//! Two-step OAuth connect flow for channels that authorize through an
//! authorization-code grant. `POST /connect/{channel}` persists a
//! single-use CSRF state and a provisional (inactive) connection, then
//! hands back the channel's authorize URL. The public callback consumes
//! the state, exchanges the code at the channel's token endpoint, and
//! activates the connection with encrypted tokens.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use chrono::{Duration, Utc};
use rand::Rng;
use rand::distributions::Alphanumeric;
use sea_orm::Set;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use url::Url;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::{OperatorAuth, SellerExtension};
use crate::error::{ApiError, channel_error, validation_error};
use crate::models::channel_connection::{self, status};
use crate::repositories::connection::NewSecrets;
use crate::repositories::{ConnectionRepository, OAuthStateRepository};
use crate::server::AppState;
use crate::token_refresh::resolve_token_url;

const STATE_TOKEN_LENGTH: usize = 32;
const STATE_TTL_MINUTES: i64 = 10;

/// Request body for starting an OAuth connect flow
#[derive(Debug, Deserialize, ToSchema)]
pub struct StartConnectRequest {
    /// OAuth client ID of the seller's channel app
    pub client_id: String,
    /// OAuth client secret, stored for the token exchange
    #[serde(default)]
    pub client_secret: Option<String>,
    /// Store URL, required for store-hosted channels like Shopify
    #[serde(default)]
    pub store_url: Option<String>,
    /// Space-separated scope string requested at authorization
    #[serde(default)]
    pub scopes: Option<String>,
    /// Override for the callback redirect URI
    #[serde(default)]
    pub redirect_uri: Option<String>,
    /// Override for the channel's token endpoint
    #[serde(default)]
    pub token_url: Option<String>,
}

/// Response for a started OAuth flow
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct StartConnectResponse {
    /// URL the seller's browser must visit to authorize the app
    pub authorize_url: String,
    /// CSRF state token bound to this flow
    pub state: String,
}

/// Query parameters delivered by the channel to the OAuth callback
#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub code: String,
    pub state: String,
    /// Shop domain, sent by Shopify
    #[serde(default)]
    pub shop: Option<String>,
}

/// Response for a completed OAuth callback
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CallbackResponse {
    pub connection_id: Uuid,
    #[schema(example = "connected")]
    pub status: String,
}

/// Start an OAuth connect flow for a channel
#[utoipa::path(
    post,
    path = "/connect/{channel}",
    security(("bearer_auth" = [])),
    params(crate::handlers::types::ChannelPathParam),
    request_body = StartConnectRequest,
    responses(
        (status = 200, description = "Authorize URL and state token", body = StartConnectResponse),
        (status = 400, description = "Channel does not use OAuth or request invalid", body = ApiError),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 404, description = "Unknown channel", body = ApiError)
    ),
    tag = "connect"
)]
pub async fn start_connect(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    SellerExtension(seller): SellerExtension,
    Path(channel): Path<String>,
    Json(request): Json<StartConnectRequest>,
) -> Result<Json<StartConnectResponse>, ApiError> {
    if state.registry.get_metadata(&channel).is_err() {
        return Err(ApiError::new(
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            format!("Unknown channel '{}'", channel),
        ));
    }
    if !state.registry.is_oauth_channel(&channel) {
        return Err(validation_error(
            "Channel does not use OAuth",
            serde_json::json!({ "channel": channel }),
        ));
    }
    if request.client_id.trim().is_empty() {
        return Err(validation_error(
            "Invalid client ID",
            serde_json::json!({ "client_id": "Must not be empty" }),
        ));
    }

    let store_url = request.store_url.as_deref().map(normalize_store_url);
    if channel == "shopify" && store_url.is_none() {
        return Err(validation_error(
            "Shopify connect requires a store URL",
            serde_json::json!({ "store_url": "Must be the shop's myshopify.com URL" }),
        ));
    }

    let redirect_uri = resolve_redirect_uri(&state, &channel, request.redirect_uri.as_deref())?;
    let external_id = derive_external_id(&channel, seller.0, store_url.as_deref());

    let mut metadata = serde_json::Map::new();
    metadata.insert("client_id".to_string(), request.client_id.clone().into());
    if let Some(client_secret) = &request.client_secret {
        metadata.insert("client_secret".to_string(), client_secret.clone().into());
    }
    if let Some(token_url) = &request.token_url {
        metadata.insert("token_url".to_string(), token_url.clone().into());
    }

    // Provisional row, activated once the callback lands tokens
    let now = Utc::now().fixed_offset();
    let connection = channel_connection::ActiveModel {
        id: Set(Uuid::new_v4()),
        seller_id: Set(seller.0),
        channel_type: Set(channel.clone()),
        external_id: Set(external_id),
        display_name: Set(None),
        store_url: Set(store_url.clone()),
        status: Set(status::PENDING.to_string()),
        active: Set(false),
        access_token_ciphertext: Set(None),
        refresh_token_ciphertext: Set(None),
        api_key_ciphertext: Set(None),
        expires_at: Set(None),
        scopes: Set(request.scopes.clone().map(JsonValue::from)),
        metadata: Set(Some(JsonValue::Object(metadata))),
        last_synced_at: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
    };

    let connections = ConnectionRepository::new(state.db.clone(), state.crypto_key.clone());
    connections
        .upsert_with_secrets(connection, NewSecrets::default())
        .await?;

    let csrf_state: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(STATE_TOKEN_LENGTH)
        .map(char::from)
        .collect();

    let states = OAuthStateRepository::new(state.db.clone());
    states
        .create(
            seller.0,
            &channel,
            &csrf_state,
            Some(redirect_uri.clone()),
            STATE_TTL_MINUTES,
        )
        .await?;

    let authorize_url = build_authorize_url(
        &channel,
        store_url.as_deref(),
        &request.client_id,
        &redirect_uri,
        &csrf_state,
        request.scopes.as_deref(),
    )?;

    tracing::info!(
        seller_id = %seller.0,
        channel = %channel,
        "OAuth connect flow started"
    );

    Ok(Json(StartConnectResponse {
        authorize_url,
        state: csrf_state,
    }))
}

/// Complete an OAuth connect flow.
///
/// Public route: the channel redirects the seller's browser here, so no
/// bearer token or seller header is available. The seller is recovered
/// from the consumed state row.
#[utoipa::path(
    get,
    path = "/connect/{channel}/callback",
    params(
        crate::handlers::types::ChannelPathParam,
        ("code" = String, Query, description = "Authorization code"),
        ("state" = String, Query, description = "CSRF state token"),
        ("shop" = Option<String>, Query, description = "Shop domain (Shopify)")
    ),
    responses(
        (status = 200, description = "Connection activated", body = CallbackResponse),
        (status = 400, description = "Invalid or expired state", body = ApiError),
        (status = 502, description = "Token exchange failed upstream", body = ApiError)
    ),
    tag = "connect"
)]
pub async fn connect_callback(
    State(state): State<AppState>,
    Path(channel): Path<String>,
    Query(params): Query<CallbackQuery>,
) -> Result<Json<CallbackResponse>, ApiError> {
    if state.registry.get_metadata(&channel).is_err() {
        return Err(ApiError::new(
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            format!("Unknown channel '{}'", channel),
        ));
    }

    let states = OAuthStateRepository::new(state.db.clone());
    let flow = states
        .find_and_consume(&channel, &params.state)
        .await?
        .ok_or_else(|| {
            tracing::warn!(channel = %channel, "OAuth callback with unknown or expired state");
            validation_error(
                "Invalid or expired OAuth state",
                serde_json::json!({ "state": "Start the connect flow again" }),
            )
        })?;

    let store_url = params.shop.as_deref().map(normalize_store_url);
    let external_id = derive_external_id(&channel, flow.seller_id, store_url.as_deref());

    let connections = ConnectionRepository::new(state.db.clone(), state.crypto_key.clone());
    let connection = connections
        .find_by_unique(&flow.seller_id, &channel, &external_id)
        .await?
        .ok_or_else(|| {
            validation_error(
                "No pending connection for this authorization",
                serde_json::json!({ "channel": channel }),
            )
        })?;

    let grant = exchange_code(
        &state,
        &connection,
        &params.code,
        flow.redirect_uri.as_deref(),
    )
    .await?;

    connections
        .encrypt_and_update_secrets(
            &connection.id,
            NewSecrets {
                access_token: Some(&grant.access_token),
                refresh_token: grant.refresh_token.as_deref(),
                api_key: None,
            },
            grant.expires_at,
        )
        .await?;

    let mut activate = channel_connection::ActiveModel::default();
    activate.active = Set(true);
    activate.status = Set(status::CONNECTED.to_string());
    let activated = connections
        .update_by_id(&flow.seller_id, &connection.id, activate)
        .await?;

    tracing::info!(
        seller_id = %flow.seller_id,
        channel = %channel,
        connection_id = %activated.id,
        "OAuth connect flow completed"
    );

    Ok(Json(CallbackResponse {
        connection_id: activated.id,
        status: activated.status,
    }))
}

struct CodeGrant {
    access_token: String,
    refresh_token: Option<String>,
    expires_at: Option<chrono::DateTime<Utc>>,
}

/// Exchange the authorization code at the channel's token endpoint.
async fn exchange_code(
    state: &AppState,
    connection: &channel_connection::Model,
    code: &str,
    redirect_uri: Option<&str>,
) -> Result<CodeGrant, ApiError> {
    let token_url = resolve_token_url(connection).map_err(|err| {
        validation_error(
            "No token endpoint for channel",
            serde_json::json!({ "channel": connection.channel_type, "error": err.to_string() }),
        )
    })?;

    let mut form: Vec<(&str, String)> = vec![
        ("grant_type", "authorization_code".to_string()),
        ("code", code.to_string()),
    ];
    if let Some(redirect_uri) = redirect_uri {
        form.push(("redirect_uri", redirect_uri.to_string()));
    }
    if let Some(client_id) = crate::token_refresh::metadata_str(connection, "client_id") {
        form.push(("client_id", client_id.to_string()));
    }
    if let Some(client_secret) = crate::token_refresh::metadata_str(connection, "client_secret") {
        form.push(("client_secret", client_secret.to_string()));
    }

    let response = state
        .http
        .post(&token_url)
        .form(&form)
        .send()
        .await
        .map_err(|err| {
            channel_error(
                connection.channel_type.clone(),
                502,
                Some(format!("token endpoint unreachable: {}", err)),
            )
        })?;

    let upstream_status = response.status();
    let body = response.text().await.unwrap_or_default();

    if !upstream_status.is_success() {
        return Err(channel_error(
            connection.channel_type.clone(),
            upstream_status.as_u16(),
            Some(body),
        ));
    }

    let parsed: JsonValue = serde_json::from_str(&body).map_err(|_| {
        channel_error(
            connection.channel_type.clone(),
            upstream_status.as_u16(),
            Some("token endpoint returned undecodable body".to_string()),
        )
    })?;

    let access_token = parsed
        .get("access_token")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| {
            channel_error(
                connection.channel_type.clone(),
                upstream_status.as_u16(),
                Some("token response missing access_token".to_string()),
            )
        })?;

    Ok(CodeGrant {
        access_token,
        refresh_token: parsed
            .get("refresh_token")
            .and_then(|v| v.as_str())
            .map(str::to_string),
        expires_at: parsed
            .get("expires_in")
            .and_then(|v| v.as_i64())
            .map(|secs| Utc::now() + Duration::seconds(secs)),
    })
}

/// Callback URI for a channel: explicit override first, then the
/// configured public base URL.
fn resolve_redirect_uri(
    state: &AppState,
    channel: &str,
    explicit: Option<&str>,
) -> Result<String, ApiError> {
    if let Some(uri) = explicit {
        return Ok(uri.to_string());
    }

    state
        .config
        .public_base_url
        .as_deref()
        .map(|base| format!("{}/connect/{}/callback", base.trim_end_matches('/'), channel))
        .ok_or_else(|| {
            validation_error(
                "No redirect URI available",
                serde_json::json!({
                    "redirect_uri": "Provide one or configure a public base URL"
                }),
            )
        })
}

/// Stable channel-native identifier for the connection row.
///
/// Store-hosted channels use the shop domain so webhook deliveries can
/// resolve the connection; the rest get a deterministic per-seller key
/// so repeated connect flows land on the same row.
fn derive_external_id(channel: &str, seller_id: Uuid, store_url: Option<&str>) -> String {
    match store_url.and_then(|url| Url::parse(url).ok()) {
        Some(parsed) => parsed
            .host_str()
            .map(str::to_string)
            .unwrap_or_else(|| format!("{}:{}", channel, seller_id)),
        None => format!("{}:{}", channel, seller_id),
    }
}

fn normalize_store_url(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    }
}

/// Authorization endpoint for a channel's code grant.
fn build_authorize_url(
    channel: &str,
    store_url: Option<&str>,
    client_id: &str,
    redirect_uri: &str,
    state: &str,
    scopes: Option<&str>,
) -> Result<String, ApiError> {
    let base = match channel {
        "shopify" => {
            // Authorize endpoint is hosted on the shop itself
            let store = store_url.ok_or_else(|| {
                validation_error(
                    "Shopify connect requires a store URL",
                    serde_json::json!({ "store_url": "Missing" }),
                )
            })?;
            format!("{}/admin/oauth/authorize", store.trim_end_matches('/'))
        }
        "ebay" => "https://auth.ebay.com/oauth2/authorize".to_string(),
        "mercado_libre" => "https://auth.mercadolibre.com/authorization".to_string(),
        "flipkart" => "https://api.flipkart.net/oauth-service/oauth/authorize".to_string(),
        "wayfair" => "https://sso.auth.wayfair.com/authorize".to_string(),
        "ekm" => "https://api.ekm.net/connect/authorize".to_string(),
        "bol_com" => "https://login.bol.com/authorize".to_string(),
        "facebook_shops" => "https://www.facebook.com/v18.0/dialog/oauth".to_string(),
        other => {
            return Err(validation_error(
                "No authorize endpoint for channel",
                serde_json::json!({ "channel": other }),
            ));
        }
    };

    let mut url = Url::parse(&base).map_err(|_| {
        validation_error(
            "Invalid authorize endpoint",
            serde_json::json!({ "channel": channel }),
        )
    })?;
    url.query_pairs_mut()
        .append_pair("response_type", "code")
        .append_pair("client_id", client_id)
        .append_pair("redirect_uri", redirect_uri)
        .append_pair("state", state);
    if let Some(scopes) = scopes {
        url.query_pairs_mut().append_pair("scope", scopes);
    }

    Ok(url.to_string())
}
