//! # Token Refresh Service
//!
//! Keeps OAuth access tokens usable: a background loop refreshes
//! connections nearing expiry, and `get_valid_token` performs an on-demand
//! refresh when a caller is about to use a token that is expired or inside
//! the expiry margin. Refreshes are exclusive per connection so concurrent
//! sync jobs never race the same refresh token.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use metrics::{counter, histogram};
use rand::Rng;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::{Duration as TokioDuration, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::crypto::ConnectionSecrets;
use crate::models::channel_connection;
use crate::repositories::connection::{ConnectionRepository, NewSecrets};

/// Seconds before `expires_at` at which a token is treated as stale.
const REFRESH_MARGIN_SECONDS: i64 = 60;

/// Errors surfaced by token refresh operations.
#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("connection has no refresh token")]
    NoRefreshToken,
    #[error("connection has no access token")]
    NoAccessToken,
    #[error("no token endpoint known for channel '{channel}'")]
    NoTokenEndpoint { channel: String },
    #[error("token endpoint rejected the refresh: {details}")]
    Permanent { details: String },
    #[error("token refresh failed transiently: {details}")]
    Transient { details: String },
    #[error("token endpoint rate limited the refresh")]
    RateLimited { retry_after: Option<u64> },
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl RefreshError {
    /// Whether the failure should disable the connection rather than retry.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            RefreshError::Permanent { .. }
                | RefreshError::NoRefreshToken
                | RefreshError::NoTokenEndpoint { .. }
        )
    }
}

/// Parsed token endpoint response.
#[derive(Debug)]
struct TokenGrant {
    access_token: String,
    refresh_token: Option<String>,
    expires_at: Option<DateTime<Utc>>,
}

/// Service that refreshes OAuth tokens in the background and on demand.
pub struct TokenRefreshService {
    config: Arc<AppConfig>,
    connection_repo: ConnectionRepository,
    http: reqwest::Client,
    /// Per-connection refresh locks. A second caller blocks on the winner's
    /// lock and then observes the persisted result instead of racing its own
    /// exchange. Bounded by the number of connections.
    locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl TokenRefreshService {
    pub fn new(config: Arc<AppConfig>, connection_repo: ConnectionRepository) -> Self {
        Self {
            config,
            connection_repo,
            http: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Run the background refresh loop until the shutdown token fires.
    #[instrument(skip_all)]
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            tick_seconds = self.config.token_refresh.tick_seconds,
            lead_time_seconds = self.config.token_refresh.lead_time_seconds,
            "Starting token refresh service"
        );
        let tick_interval = TokioDuration::from_secs(self.config.token_refresh.tick_seconds);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Token refresh service shutdown requested");
                    break;
                }
                _ = sleep(tick_interval) => {
                    let started = std::time::Instant::now();
                    if let Err(err) = self.tick().await {
                        error!(error = %err, "Token refresh tick failed");
                    }
                    histogram!("token_refresh_tick_duration_ms")
                        .record(started.elapsed().as_secs_f64() * 1_000.0);
                }
            }
        }

        info!("Token refresh service stopped");
    }

    /// One pass over connections whose tokens expire inside the lead window.
    #[instrument(skip_all)]
    pub async fn tick(&self) -> Result<(), anyhow::Error> {
        let cutoff =
            Utc::now() + Duration::seconds(self.config.token_refresh.lead_time_seconds as i64);
        let expiring = self.connection_repo.find_expiring_before(cutoff).await?;

        if expiring.is_empty() {
            return Ok(());
        }

        info!(
            connections = expiring.len(),
            "Refreshing connections nearing token expiry"
        );

        let semaphore = Arc::new(tokio::sync::Semaphore::new(
            self.config.token_refresh.concurrency as usize,
        ));

        let mut succeeded = 0u64;
        let mut failed = 0u64;

        for connection in expiring {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };

            let jitter = self.compute_jitter();
            if jitter > 0 {
                sleep(TokioDuration::from_secs(jitter)).await;
            }

            match self.refresh_connection(&connection).await {
                Ok(_) => succeeded += 1,
                Err(err) => {
                    failed += 1;
                    self.record_failure(&connection, &err).await;
                }
            }
            drop(permit);
        }

        counter!("token_refresh_success_total").increment(succeeded);
        counter!("token_refresh_failure_total").increment(failed);
        debug!(succeeded, failed, "Token refresh tick completed");

        Ok(())
    }

    /// Decrypt the connection's secrets, refreshing the access token first
    /// when it is expired or inside the refresh margin.
    pub async fn get_valid_secrets(
        &self,
        connection: &channel_connection::Model,
    ) -> Result<ConnectionSecrets, RefreshError> {
        let secrets = self.connection_repo.decrypt_secrets(connection).await?;

        if !token_is_stale(connection, &secrets) {
            return Ok(secrets);
        }

        let refreshed = self.refresh_on_demand(&connection.id).await?;
        self.connection_repo
            .decrypt_secrets(&refreshed)
            .await
            .map_err(RefreshError::Storage)
    }

    /// Fetch a usable access token for the connection, refreshing if needed.
    pub async fn get_valid_token(
        &self,
        connection: &channel_connection::Model,
    ) -> Result<String, RefreshError> {
        let secrets = self.get_valid_secrets(connection).await?;
        secrets.access_token.ok_or(RefreshError::NoAccessToken)
    }

    /// Refresh a connection's tokens now, single-flighted per connection.
    ///
    /// Called by the worker when a channel returns 401. If another caller is
    /// already mid-refresh, this waits for it and returns the persisted
    /// outcome rather than performing a second exchange.
    #[instrument(skip_all, fields(connection_id = %connection_id))]
    pub async fn refresh_on_demand(
        &self,
        connection_id: &Uuid,
    ) -> Result<channel_connection::Model, RefreshError> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks
                .entry(*connection_id)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let _guard = lock.lock().await;

        // Re-read under the lock: if we lost the race, the winner already
        // persisted a fresh token and we can return it without exchanging.
        // Connections without an expiry always exchange, since a caller only
        // lands here after the channel rejected the stored token.
        let connection = self
            .connection_repo
            .get_by_id(connection_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("connection '{}' not found", connection_id))?;

        let secrets = self.connection_repo.decrypt_secrets(&connection).await?;
        if connection.expires_at.is_some() && !token_is_stale(&connection, &secrets) {
            debug!("Token already refreshed by a concurrent caller");
            return Ok(connection);
        }

        counter!("token_refresh_on_demand_attempts_total").increment(1);
        let result = self.refresh_connection(&connection).await;
        if let Err(ref err) = result {
            self.record_failure(&connection, err).await;
        }
        result
    }

    /// Perform the refresh-token exchange and persist the new credentials.
    #[instrument(skip_all, fields(
        connection_id = %connection.id,
        channel_type = %connection.channel_type,
    ))]
    async fn refresh_connection(
        &self,
        connection: &channel_connection::Model,
    ) -> Result<channel_connection::Model, RefreshError> {
        let started = std::time::Instant::now();

        let secrets = self.connection_repo.decrypt_secrets(connection).await?;
        let refresh_token = secrets
            .refresh_token
            .as_deref()
            .ok_or(RefreshError::NoRefreshToken)?;

        let grant = self.exchange(connection, refresh_token).await?;

        let updated = self
            .connection_repo
            .encrypt_and_update_secrets(
                &connection.id,
                NewSecrets {
                    access_token: Some(&grant.access_token),
                    // Endpoints that do not rotate refresh tokens keep the old one
                    refresh_token: grant
                        .refresh_token
                        .as_deref()
                        .or(secrets.refresh_token.as_deref()),
                    api_key: secrets.api_key.as_deref(),
                },
                grant.expires_at,
            )
            .await?;

        histogram!("token_refresh_latency_ms").record(started.elapsed().as_secs_f64() * 1_000.0);
        info!(
            expires_at = ?grant.expires_at,
            "Refreshed connection access token"
        );

        Ok(updated)
    }

    /// POST the refresh grant to the channel's token endpoint.
    async fn exchange(
        &self,
        connection: &channel_connection::Model,
        refresh_token: &str,
    ) -> Result<TokenGrant, RefreshError> {
        let token_url = resolve_token_url(connection)?;

        let mut form: Vec<(&str, String)> = vec![
            ("grant_type", "refresh_token".to_string()),
            ("refresh_token", refresh_token.to_string()),
        ];
        if let Some(client_id) = metadata_str(connection, "client_id") {
            form.push(("client_id", client_id.to_string()));
        }
        if let Some(client_secret) = metadata_str(connection, "client_secret") {
            form.push(("client_secret", client_secret.to_string()));
        }

        let response = self
            .http
            .post(&token_url)
            .form(&form)
            .send()
            .await
            .map_err(|err| RefreshError::Transient {
                details: err.to_string(),
            })?;

        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            return Err(RefreshError::RateLimited { retry_after });
        }

        let body = response.text().await.map_err(|err| RefreshError::Transient {
            details: err.to_string(),
        })?;

        if !status.is_success() {
            return Err(classify_refresh_failure(status.as_u16(), &body));
        }

        let parsed: JsonValue =
            serde_json::from_str(&body).map_err(|_| RefreshError::Transient {
                details: "token endpoint returned undecodable body".to_string(),
            })?;

        let access_token = parsed
            .get("access_token")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| RefreshError::Permanent {
                details: "token response missing access_token".to_string(),
            })?;

        let refresh_token = parsed
            .get("refresh_token")
            .and_then(|v| v.as_str())
            .map(str::to_string);

        let expires_at = parsed
            .get("expires_in")
            .and_then(|v| v.as_i64())
            .map(|secs| Utc::now() + Duration::seconds(secs));

        Ok(TokenGrant {
            access_token,
            refresh_token,
            expires_at,
        })
    }

    /// Log the failure and disable the connection on permanent errors.
    async fn record_failure(&self, connection: &channel_connection::Model, err: &RefreshError) {
        if err.is_permanent() {
            error!(
                connection_id = %connection.id,
                channel_type = %connection.channel_type,
                error = %err,
                "Permanent token refresh failure, marking connection as error"
            );
            counter!("token_refresh_permanent_failure_total").increment(1);
            if let Err(mark_err) = self.connection_repo.mark_error(&connection.id).await {
                error!(
                    connection_id = %connection.id,
                    error = %mark_err,
                    "Failed to mark connection as errored"
                );
            }
        } else {
            warn!(
                connection_id = %connection.id,
                channel_type = %connection.channel_type,
                error = %err,
                "Token refresh failed, will retry"
            );
        }
    }

    fn compute_jitter(&self) -> u64 {
        let factor = self.config.token_refresh.jitter_factor;
        if factor <= 0.0 {
            return 0;
        }
        let max_delay = (self.config.token_refresh.lead_time_seconds as f64 * factor) as u64;
        if max_delay == 0 {
            return 0;
        }
        rand::thread_rng().gen_range(0..=max_delay)
    }
}

/// Whether the connection's access token is missing, expired, or inside the
/// refresh margin.
fn token_is_stale(connection: &channel_connection::Model, secrets: &ConnectionSecrets) -> bool {
    if secrets.access_token.is_none() {
        return true;
    }
    match connection.expires_at {
        // Tokens without an expiry never go stale (e.g. Shopify offline tokens)
        None => false,
        Some(expires_at) => {
            let margin = Utc::now() + Duration::seconds(REFRESH_MARGIN_SECONDS);
            expires_at.with_timezone(&Utc) <= margin
        }
    }
}

/// Token endpoint for a connection: explicit metadata override first, then
/// the channel's well-known endpoint.
pub(crate) fn resolve_token_url(
    connection: &channel_connection::Model,
) -> Result<String, RefreshError> {
    if let Some(url) = metadata_str(connection, "token_url") {
        return Ok(url.to_string());
    }

    let fixed = match connection.channel_type.as_str() {
        "ebay" => Some("https://api.ebay.com/identity/v1/oauth2/token"),
        "mercado_libre" => Some("https://api.mercadolibre.com/oauth/token"),
        "flipkart" => Some("https://api.flipkart.net/oauth-service/oauth/token"),
        "wayfair" => Some("https://sso.auth.wayfair.com/oauth/token"),
        "ekm" => Some("https://api.ekm.net/connect/token"),
        "bol_com" => Some("https://login.bol.com/token"),
        "facebook_shops" => Some("https://graph.facebook.com/v18.0/oauth/access_token"),
        "etsy" => Some("https://api.etsy.com/v3/public/oauth/token"),
        _ => None,
    };

    match fixed {
        Some(url) => Ok(url.to_string()),
        // Shopify and store-hosted channels carry their endpoint in metadata
        None => match connection.store_url.as_deref() {
            Some(store) if connection.channel_type == "shopify" => {
                Ok(format!("{}/admin/oauth/access_token", store.trim_end_matches('/')))
            }
            _ => Err(RefreshError::NoTokenEndpoint {
                channel: connection.channel_type.clone(),
            }),
        },
    }
}

pub(crate) fn metadata_str<'a>(
    connection: &'a channel_connection::Model,
    key: &str,
) -> Option<&'a str> {
    connection
        .metadata
        .as_ref()
        .and_then(|m| m.get(key))
        .and_then(|v| v.as_str())
}

/// Classify a non-2xx token endpoint response.
fn classify_refresh_failure(status: u16, body: &str) -> RefreshError {
    let body_lower = body.to_lowercase();

    let permanent = body_lower.contains("invalid_grant")
        || body_lower.contains("invalid_client")
        || body_lower.contains("unauthorized_client")
        || body_lower.contains("unsupported_grant_type")
        || body_lower.contains("access_denied")
        || body_lower.contains("revoked");

    if permanent || ((400..500).contains(&status) && !body_lower.contains("temporarily")) {
        return RefreshError::Permanent {
            details: format!("status {}", status),
        };
    }

    RefreshError::Transient {
        details: format!("status {}", status),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::CryptoKey;
    use migration::{Migrator, MigratorTrait};
    use sea_orm::{Database, Set};
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn setup() -> (TokenRefreshService, ConnectionRepository) {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        Migrator::up(&db, None).await.unwrap();
        let repo =
            ConnectionRepository::new(Arc::new(db), CryptoKey::new(vec![9u8; 32]).unwrap());
        let service = TokenRefreshService::new(Arc::new(AppConfig::default()), repo.clone());
        (service, repo)
    }

    async fn insert_connection(
        repo: &ConnectionRepository,
        token_url: &str,
        expires_in_seconds: i64,
        refresh_token: Option<&str>,
    ) -> channel_connection::Model {
        let now = Utc::now();
        let model = channel_connection::ActiveModel {
            id: Set(Uuid::new_v4()),
            seller_id: Set(Uuid::new_v4()),
            channel_type: Set("ebay".to_string()),
            external_id: Set("ebay-account".to_string()),
            display_name: Set(None),
            store_url: Set(None),
            status: Set(channel_connection::status::CONNECTED.to_string()),
            active: Set(true),
            access_token_ciphertext: Set(None),
            refresh_token_ciphertext: Set(None),
            api_key_ciphertext: Set(None),
            expires_at: Set(Some(
                (now + Duration::seconds(expires_in_seconds)).fixed_offset(),
            )),
            scopes: Set(None),
            metadata: Set(Some(json!({
                "token_url": token_url,
                "client_id": "app-id",
                "client_secret": "app-secret"
            }))),
            last_synced_at: Set(None),
            created_at: Set(now.fixed_offset()),
            updated_at: Set(now.fixed_offset()),
        };
        repo.upsert_with_secrets(
            model,
            NewSecrets {
                access_token: Some("old-access"),
                refresh_token,
                api_key: None,
            },
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn fresh_token_is_returned_without_refreshing() {
        let (service, repo) = setup().await;
        let connection = insert_connection(&repo, "http://unused", 3600, Some("refresh")).await;

        let token = service.get_valid_token(&connection).await.unwrap();
        assert_eq!(token, "old-access");
    }

    #[tokio::test]
    async fn stale_token_triggers_exchange_and_persists_result() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=refresh"))
            .and(body_string_contains("client_id=app-id"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "new-access",
                "refresh_token": "new-refresh",
                "expires_in": 7200
            })))
            .expect(1)
            .mount(&server)
            .await;

        let (service, repo) = setup().await;
        let connection = insert_connection(
            &repo,
            &format!("{}/token", server.uri()),
            30, // inside the 60 second margin
            Some("refresh"),
        )
        .await;

        let token = service.get_valid_token(&connection).await.unwrap();
        assert_eq!(token, "new-access");

        let stored = repo.get_by_id(&connection.id).await.unwrap().unwrap();
        let secrets = repo.decrypt_secrets(&stored).await.unwrap();
        assert_eq!(secrets.access_token.as_deref(), Some("new-access"));
        assert_eq!(secrets.refresh_token.as_deref(), Some("new-refresh"));
        assert!(stored.expires_at.unwrap().with_timezone(&Utc) > Utc::now());
    }

    #[tokio::test]
    async fn old_refresh_token_is_kept_when_endpoint_does_not_rotate() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "new-access",
                "expires_in": 7200
            })))
            .mount(&server)
            .await;

        let (service, repo) = setup().await;
        let connection = insert_connection(
            &repo,
            &format!("{}/token", server.uri()),
            -10,
            Some("keep-me"),
        )
        .await;

        service.get_valid_token(&connection).await.unwrap();

        let stored = repo.get_by_id(&connection.id).await.unwrap().unwrap();
        let secrets = repo.decrypt_secrets(&stored).await.unwrap();
        assert_eq!(secrets.refresh_token.as_deref(), Some("keep-me"));
    }

    #[tokio::test]
    async fn missing_refresh_token_is_a_permanent_failure() {
        let (service, repo) = setup().await;
        let connection = insert_connection(&repo, "http://unused", -10, None).await;

        let err = service.get_valid_token(&connection).await.unwrap_err();
        assert!(matches!(err, RefreshError::NoRefreshToken));
        assert!(err.is_permanent());
    }

    #[tokio::test]
    async fn invalid_grant_marks_connection_as_errored() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_json(json!({ "error": "invalid_grant" })),
            )
            .mount(&server)
            .await;

        let (service, repo) = setup().await;
        let connection = insert_connection(
            &repo,
            &format!("{}/token", server.uri()),
            -10,
            Some("revoked-refresh"),
        )
        .await;

        let err = service.get_valid_token(&connection).await.unwrap_err();
        assert!(err.is_permanent());

        let stored = repo.get_by_id(&connection.id).await.unwrap().unwrap();
        assert_eq!(stored.status, channel_connection::status::ERROR);
    }

    #[tokio::test]
    async fn tick_refreshes_connections_inside_the_lead_window() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "ticked-access",
                "expires_in": 7200
            })))
            .expect(1)
            .mount(&server)
            .await;

        let (service, repo) = setup().await;
        let connection = insert_connection(
            &repo,
            &format!("{}/token", server.uri()),
            120, // inside the default 600 second lead window
            Some("refresh"),
        )
        .await;

        service.tick().await.unwrap();

        let stored = repo.get_by_id(&connection.id).await.unwrap().unwrap();
        let secrets = repo.decrypt_secrets(&stored).await.unwrap();
        assert_eq!(secrets.access_token.as_deref(), Some("ticked-access"));
    }

    #[test]
    fn classification_distinguishes_permanent_and_transient() {
        assert!(classify_refresh_failure(400, r#"{"error":"invalid_grant"}"#).is_permanent());
        assert!(classify_refresh_failure(401, "unauthorized_client").is_permanent());
        assert!(!classify_refresh_failure(503, "upstream unavailable").is_permanent());
        assert!(!classify_refresh_failure(400, "temporarily_unavailable").is_permanent());
    }

    #[test]
    fn token_endpoints_resolve_per_channel() {
        let now = Utc::now().fixed_offset();
        let base = channel_connection::Model {
            id: Uuid::new_v4(),
            seller_id: Uuid::new_v4(),
            channel_type: "ebay".to_string(),
            external_id: "x".to_string(),
            display_name: None,
            store_url: None,
            status: channel_connection::status::CONNECTED.to_string(),
            active: true,
            access_token_ciphertext: None,
            refresh_token_ciphertext: None,
            api_key_ciphertext: None,
            expires_at: None,
            scopes: None,
            metadata: None,
            last_synced_at: None,
            created_at: now,
            updated_at: now,
        };

        assert!(resolve_token_url(&base).unwrap().contains("api.ebay.com"));

        let shopify = channel_connection::Model {
            channel_type: "shopify".to_string(),
            store_url: Some("https://demo.myshopify.com/".to_string()),
            ..base.clone()
        };
        assert_eq!(
            resolve_token_url(&shopify).unwrap(),
            "https://demo.myshopify.com/admin/oauth/access_token"
        );

        let unknown = channel_connection::Model {
            channel_type: "oscommerce".to_string(),
            ..base.clone()
        };
        assert!(matches!(
            resolve_token_url(&unknown),
            Err(RefreshError::NoTokenEndpoint { .. })
        ));

        let overridden = channel_connection::Model {
            metadata: Some(json!({ "token_url": "http://localhost:9/token" })),
            ..base
        };
        assert_eq!(
            resolve_token_url(&overridden).unwrap(),
            "http://localhost:9/token"
        );
    }
}
