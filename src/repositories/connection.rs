//! Connection repository for database operations
//!
//! This module provides the ConnectionRepository struct which encapsulates
//! SeaORM operations for the channel_connections table with seller-aware
//! methods and cursor-based pagination.

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::crypto::{
    ConnectionSecrets, CryptoKey, decrypt_connection_secrets, encrypt_connection_secrets,
    is_encrypted_payload,
};
use crate::cursor::{decode_generic_cursor, encode_generic_cursor};
use crate::error::is_unique_violation;
use crate::models::channel_connection::{self, Entity as ChannelConnection, status};

/// Plaintext credential material handed to the repository for encryption.
#[derive(Debug, Clone, Default)]
pub struct NewSecrets<'a> {
    pub access_token: Option<&'a str>,
    pub refresh_token: Option<&'a str>,
    pub api_key: Option<&'a str>,
}

/// Repository for channel connection database operations
#[derive(Debug, Clone)]
pub struct ConnectionRepository {
    /// Database connection pool
    pub db: Arc<DatabaseConnection>,
    /// Crypto key for credential encryption
    pub crypto_key: CryptoKey,
}

impl ConnectionRepository {
    /// Creates a new ConnectionRepository instance
    pub fn new(db: Arc<DatabaseConnection>, crypto_key: CryptoKey) -> Self {
        Self { db, crypto_key }
    }

    /// Creates a connection with encrypted credentials.
    ///
    /// If a connection already exists for the same
    /// `(seller_id, channel_type, external_id)` tuple, the existing row is
    /// updated in place so reconnect flows stay idempotent.
    pub async fn upsert_with_secrets(
        &self,
        mut connection: channel_connection::ActiveModel,
        secrets: NewSecrets<'_>,
    ) -> Result<channel_connection::Model> {
        let connection_id = connection
            .id
            .clone()
            .take()
            .ok_or_else(|| anyhow!("connection id must be set"))?;

        // Temporary model carrying the natural-key fields used for AAD binding
        let temp_connection = channel_connection::Model {
            id: connection_id,
            seller_id: connection
                .seller_id
                .clone()
                .take()
                .ok_or_else(|| anyhow!("seller_id must be set"))?,
            channel_type: connection
                .channel_type
                .clone()
                .take()
                .ok_or_else(|| anyhow!("channel_type must be set"))?,
            external_id: connection
                .external_id
                .clone()
                .take()
                .ok_or_else(|| anyhow!("external_id must be set"))?,
            display_name: None,
            store_url: None,
            status: status::CONNECTED.to_string(),
            active: true,
            access_token_ciphertext: None,
            refresh_token_ciphertext: None,
            api_key_ciphertext: None,
            expires_at: None,
            scopes: None,
            metadata: None,
            last_synced_at: None,
            created_at: Utc::now().into(),
            updated_at: Utc::now().into(),
        };

        let (access_cipher, refresh_cipher, api_key_cipher) = encrypt_connection_secrets(
            &self.crypto_key,
            &temp_connection,
            secrets.access_token,
            secrets.refresh_token,
            secrets.api_key,
        )
        .map_err(|e| anyhow!("Credential encryption failed: {}", e))?;

        connection.access_token_ciphertext = Set(access_cipher.clone());
        connection.refresh_token_ciphertext = Set(refresh_cipher.clone());
        connection.api_key_ciphertext = Set(api_key_cipher.clone());

        let insert_result = connection.clone().insert(&*self.db).await;

        match insert_result {
            Ok(_) => {}
            Err(err) if is_unique_violation(&err) => {
                // Reconnect path: refresh credentials and status on the
                // existing row identified by the natural key.
                let existing = self
                    .find_by_unique(
                        &temp_connection.seller_id,
                        &temp_connection.channel_type,
                        &temp_connection.external_id,
                    )
                    .await?
                    .ok_or_else(|| anyhow!("connection unique conflict without existing row"))?;

                // AAD includes the row's own natural key, which matches the
                // conflicting tuple, so the ciphertexts remain valid.
                let mut model: channel_connection::ActiveModel = existing.clone().into();
                model.access_token_ciphertext = Set(access_cipher);
                model.refresh_token_ciphertext = Set(refresh_cipher);
                model.api_key_ciphertext = Set(api_key_cipher);
                model.status = Set(connection
                    .status
                    .clone()
                    .take()
                    .unwrap_or_else(|| status::CONNECTED.to_string()));
                model.active = Set(connection.active.clone().take().unwrap_or(true));
                if let Some(display_name) = connection.display_name.clone().take() {
                    model.display_name = Set(display_name);
                }
                if let Some(store_url) = connection.store_url.clone().take() {
                    model.store_url = Set(store_url);
                }
                if let Some(expires_at) = connection.expires_at.clone().take() {
                    model.expires_at = Set(expires_at);
                }
                if let Some(scopes) = connection.scopes.clone().take() {
                    model.scopes = Set(scopes);
                }
                model.updated_at = Set(Utc::now().into());
                model.update(&*self.db).await?;

                let fetched = ChannelConnection::find_by_id(existing.id)
                    .one(&*self.db)
                    .await?;
                return fetched.ok_or_else(|| anyhow!("connection not persisted"));
            }
            Err(err) => return Err(err.into()),
        }

        // For SQLite, query the record directly since we already know the ID
        let fetched = ChannelConnection::find_by_id(connection_id)
            .one(&*self.db)
            .await?;
        fetched.ok_or_else(|| anyhow!("connection not persisted"))
    }

    /// Encrypts credentials and updates the connection row in place
    pub async fn encrypt_and_update_secrets(
        &self,
        connection_id: &Uuid,
        secrets: NewSecrets<'_>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<channel_connection::Model> {
        let connection = self
            .get_by_id(connection_id)
            .await?
            .ok_or_else(|| anyhow!("Connection with ID '{}' not found", connection_id))?;

        let (access_cipher, refresh_cipher, api_key_cipher) = encrypt_connection_secrets(
            &self.crypto_key,
            &connection,
            secrets.access_token,
            secrets.refresh_token,
            secrets.api_key,
        )
        .map_err(|e| anyhow!("Credential encryption failed: {}", e))?;

        self.update_tokens_status(
            connection_id,
            access_cipher,
            refresh_cipher,
            api_key_cipher,
            Some(status::CONNECTED.to_string()),
            expires_at,
        )
        .await
    }

    /// Decrypts credential material from a connection model
    pub async fn decrypt_secrets(
        &self,
        connection: &channel_connection::Model,
    ) -> Result<ConnectionSecrets> {
        let has_legacy = [
            connection.access_token_ciphertext.as_ref(),
            connection.refresh_token_ciphertext.as_ref(),
            connection.api_key_ciphertext.as_ref(),
        ]
        .into_iter()
        .flatten()
        .any(|cipher| !is_encrypted_payload(cipher));

        if has_legacy {
            tracing::warn!(
                seller_id = %connection.seller_id,
                channel_type = %connection.channel_type,
                external_id = %connection.external_id,
                "Legacy plaintext credentials detected, consider migrating to encrypted format"
            );
        }

        decrypt_connection_secrets(&self.crypto_key, connection).map_err(|e| {
            // Log decryption failures without credential details
            tracing::error!(
                seller_id = %connection.seller_id,
                channel_type = %connection.channel_type,
                external_id = %connection.external_id,
                "Credential decryption failed"
            );
            anyhow!("Credential decryption failed: {}", e)
        })
    }

    /// Finds a connection by its ID within a seller scope
    pub async fn find_by_id(
        &self,
        seller_id: &Uuid,
        id: &Uuid,
    ) -> Result<Option<channel_connection::Model>> {
        Ok(ChannelConnection::find_by_id(*id)
            .filter(channel_connection::Column::SellerId.eq(*seller_id))
            .one(&*self.db)
            .await?)
    }

    /// Retrieves a connection by its ID without seller scoping
    pub async fn get_by_id(&self, id: &Uuid) -> Result<Option<channel_connection::Model>> {
        Ok(ChannelConnection::find_by_id(*id).one(&*self.db).await?)
    }

    /// Finds a connection by its unique `(seller, channel, external_id)` tuple
    pub async fn find_by_unique(
        &self,
        seller_id: &Uuid,
        channel_type: &str,
        external_id: &str,
    ) -> Result<Option<channel_connection::Model>> {
        Ok(ChannelConnection::find()
            .filter(channel_connection::Column::SellerId.eq(*seller_id))
            .filter(channel_connection::Column::ChannelType.eq(channel_type))
            .filter(channel_connection::Column::ExternalId.eq(external_id))
            .one(&*self.db)
            .await?)
    }

    /// Resolves a webhook delivery to an active connection using the
    /// channel-native store identifier (shop domain, store URL, or account
    /// ID as carried in `external_id`).
    pub async fn find_by_channel_identifier(
        &self,
        channel_type: &str,
        identifier: &str,
    ) -> Result<Option<channel_connection::Model>> {
        Ok(ChannelConnection::find()
            .filter(channel_connection::Column::ChannelType.eq(channel_type))
            .filter(channel_connection::Column::Active.eq(true))
            .filter(
                Condition::any()
                    .add(channel_connection::Column::ExternalId.eq(identifier))
                    .add(channel_connection::Column::StoreUrl.eq(identifier)),
            )
            .one(&*self.db)
            .await?)
    }

    /// Lists all active, connected connections across sellers.
    ///
    /// Used by the scheduler and token refresh loops, ordered by creation
    /// time then ID for stable iteration.
    pub async fn find_active(&self) -> Result<Vec<channel_connection::Model>> {
        Ok(ChannelConnection::find()
            .filter(channel_connection::Column::Active.eq(true))
            .filter(channel_connection::Column::Status.eq(status::CONNECTED))
            .order_by_asc(channel_connection::Column::CreatedAt)
            .order_by_asc(channel_connection::Column::Id)
            .all(&*self.db)
            .await?)
    }

    /// Lists connections holding a refresh token that expire before the cutoff
    pub async fn find_expiring_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<channel_connection::Model>> {
        let cutoff_fixed: DateTimeWithTimeZone = cutoff.into();
        Ok(ChannelConnection::find()
            .filter(channel_connection::Column::Active.eq(true))
            .filter(channel_connection::Column::Status.eq(status::CONNECTED))
            .filter(channel_connection::Column::RefreshTokenCiphertext.is_not_null())
            .filter(channel_connection::Column::ExpiresAt.is_not_null())
            .filter(channel_connection::Column::ExpiresAt.lte(cutoff_fixed))
            .order_by_asc(channel_connection::Column::ExpiresAt)
            .all(&*self.db)
            .await?)
    }

    /// Updates mutable fields on a connection within a seller scope
    pub async fn update_by_id(
        &self,
        seller_id: &Uuid,
        id: &Uuid,
        update: channel_connection::ActiveModel,
    ) -> Result<channel_connection::Model> {
        let existing = ChannelConnection::find_by_id(*id)
            .filter(channel_connection::Column::SellerId.eq(*seller_id))
            .one(&*self.db)
            .await?
            .ok_or_else(|| anyhow!("Connection with ID '{}' not found for seller", id))?;

        let mut model: channel_connection::ActiveModel = existing.into();

        if let Some(display_name) = update.display_name.clone().take() {
            model.display_name = Set(display_name);
        }
        if let Some(store_url) = update.store_url.clone().take() {
            model.store_url = Set(store_url);
        }
        if let Some(status) = update.status.clone().take() {
            model.status = Set(status);
        }
        if let Some(active) = update.active.clone().take() {
            model.active = Set(active);
        }
        if let Some(scopes) = update.scopes.clone().take() {
            model.scopes = Set(scopes);
        }
        if let Some(metadata) = update.metadata.clone().take() {
            model.metadata = Set(metadata);
        }
        model.updated_at = Set(Utc::now().into());

        Ok(model.update(&*self.db).await?)
    }

    /// Partial update helper for credential/status/expiry mutations
    pub async fn update_tokens_status(
        &self,
        id: &Uuid,
        access_token_ciphertext: Option<Vec<u8>>,
        refresh_token_ciphertext: Option<Vec<u8>>,
        api_key_ciphertext: Option<Vec<u8>>,
        status: Option<String>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<channel_connection::Model> {
        let existing = ChannelConnection::find_by_id(*id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| anyhow!("Connection '{}' not found", id))?;

        let mut model: channel_connection::ActiveModel = existing.into();

        if let Some(cipher) = access_token_ciphertext {
            model.access_token_ciphertext = Set(Some(cipher));
        }
        if let Some(cipher) = refresh_token_ciphertext {
            model.refresh_token_ciphertext = Set(Some(cipher));
        }
        if let Some(cipher) = api_key_ciphertext {
            model.api_key_ciphertext = Set(Some(cipher));
        }
        if let Some(status) = status {
            model.status = Set(status);
        }
        if let Some(expires_at) = expires_at {
            let fixed: DateTimeWithTimeZone = expires_at.into();
            model.expires_at = Set(Some(fixed));
        }
        model.updated_at = Set(Utc::now().into());

        Ok(model.update(&*self.db).await?)
    }

    /// Marks a connection as errored without touching credentials
    pub async fn mark_error(&self, id: &Uuid) -> Result<channel_connection::Model> {
        let existing = ChannelConnection::find_by_id(*id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| anyhow!("Connection '{}' not found", id))?;

        let mut model: channel_connection::ActiveModel = existing.into();
        model.status = Set(status::ERROR.to_string());
        model.updated_at = Set(Utc::now().into());

        Ok(model.update(&*self.db).await?)
    }

    /// Records the completion time of the latest successful sync
    pub async fn touch_last_synced(&self, id: &Uuid) -> Result<()> {
        let existing = ChannelConnection::find_by_id(*id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| anyhow!("Connection '{}' not found", id))?;

        let now: DateTimeWithTimeZone = Utc::now().into();
        let mut model: channel_connection::ActiveModel = existing.into();
        model.last_synced_at = Set(Some(now));
        model.updated_at = Set(now);
        model.update(&*self.db).await?;

        Ok(())
    }

    /// Deletes a connection within a seller scope
    pub async fn delete_by_id(&self, seller_id: &Uuid, id: &Uuid) -> Result<()> {
        let result = ChannelConnection::delete_by_id(*id)
            .filter(channel_connection::Column::SellerId.eq(*seller_id))
            .exec(&*self.db)
            .await?;

        if result.rows_affected == 0 {
            return Err(anyhow!("Connection with ID '{}' not found for seller", id));
        }

        Ok(())
    }

    /// Lists all connections for a seller with cursor pagination
    pub async fn list_by_seller(
        &self,
        seller_id: &Uuid,
        channel_type: Option<&str>,
        limit: u64,
        cursor: Option<String>,
    ) -> Result<(Vec<channel_connection::Model>, Option<String>)> {
        if limit == 0 {
            return Ok((Vec::new(), cursor));
        }

        let mut query = ChannelConnection::find()
            .filter(channel_connection::Column::SellerId.eq(*seller_id))
            .order_by_asc(channel_connection::Column::CreatedAt)
            .order_by_asc(channel_connection::Column::Id);

        if let Some(channel) = channel_type {
            query = query.filter(channel_connection::Column::ChannelType.eq(channel));
        }

        if let Some(cursor) = cursor
            && !cursor.is_empty()
        {
            let (created_at, cursor_id) = parse_connection_cursor(&cursor)?;
            let condition = Condition::any()
                .add(channel_connection::Column::CreatedAt.gt(created_at))
                .add(
                    Condition::all()
                        .add(channel_connection::Column::CreatedAt.eq(created_at))
                        .add(channel_connection::Column::Id.gt(cursor_id)),
                );
            query = query.filter(condition);
        }

        let mut rows = query.limit(limit + 1).all(&*self.db).await?;

        let next_cursor = if rows.len() as u64 > limit {
            // Remove overflow row to get only the items to return
            rows.pop();
            // Build cursor from the last item that was actually returned
            rows.last()
                .map(|last_item| build_connection_cursor(&last_item.created_at, last_item.id))
        } else {
            None
        };

        Ok((rows, next_cursor))
    }
}

/// Parse connection cursor from standardized base64 string
fn parse_connection_cursor(cursor: &str) -> Result<(DateTimeWithTimeZone, Uuid)> {
    #[derive(serde::Deserialize)]
    struct Keys {
        created_at: String,
        id: Uuid,
    }

    let keys: Keys = decode_generic_cursor(cursor)
        .map_err(|_| anyhow!("Invalid cursor format: must be valid base64-encoded JSON"))?;

    let created_at = DateTime::parse_from_rfc3339(&keys.created_at).map_err(|_| {
        anyhow!("Invalid cursor format: created_at must be a valid RFC3339 timestamp")
    })?;

    Ok((created_at, keys.id))
}

/// Build connection cursor using standardized base64 format
fn build_connection_cursor(created_at: &DateTimeWithTimeZone, id: Uuid) -> String {
    encode_generic_cursor(&serde_json::json!({
        "created_at": created_at.to_rfc3339(),
        "id": id.to_string()
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use migration::{Migrator, MigratorTrait};
    use sea_orm::Database;

    async fn setup() -> ConnectionRepository {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        Migrator::up(&db, None).await.unwrap();
        let key = CryptoKey::new(vec![7u8; 32]).unwrap();
        ConnectionRepository::new(Arc::new(db), key)
    }

    fn new_connection(seller_id: Uuid, channel_type: &str, external_id: &str) -> channel_connection::ActiveModel {
        let now = Utc::now().fixed_offset();
        channel_connection::ActiveModel {
            id: Set(Uuid::new_v4()),
            seller_id: Set(seller_id),
            channel_type: Set(channel_type.to_string()),
            external_id: Set(external_id.to_string()),
            display_name: Set(Some(format!("{} store", channel_type))),
            store_url: Set(None),
            status: Set(status::CONNECTED.to_string()),
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
        }
    }

    #[tokio::test]
    async fn upsert_encrypts_and_roundtrips_secrets() {
        let repo = setup().await;
        let seller_id = Uuid::new_v4();

        let created = repo
            .upsert_with_secrets(
                new_connection(seller_id, "shopify", "store-1.myshopify.com"),
                NewSecrets {
                    access_token: Some("shpat_access"),
                    refresh_token: Some("shpat_refresh"),
                    api_key: None,
                },
            )
            .await
            .unwrap();

        assert!(created.access_token_ciphertext.is_some());
        assert!(is_encrypted_payload(
            created.access_token_ciphertext.as_ref().unwrap()
        ));

        let secrets = repo.decrypt_secrets(&created).await.unwrap();
        assert_eq!(secrets.access_token.as_deref(), Some("shpat_access"));
        assert_eq!(secrets.refresh_token.as_deref(), Some("shpat_refresh"));
        assert_eq!(secrets.api_key, None);
    }

    #[tokio::test]
    async fn upsert_same_natural_key_updates_existing_row() {
        let repo = setup().await;
        let seller_id = Uuid::new_v4();

        let first = repo
            .upsert_with_secrets(
                new_connection(seller_id, "etsy", "shop-42"),
                NewSecrets {
                    api_key: Some("old-key"),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let second = repo
            .upsert_with_secrets(
                new_connection(seller_id, "etsy", "shop-42"),
                NewSecrets {
                    api_key: Some("new-key"),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        // Same row, fresh credentials
        assert_eq!(first.id, second.id);
        let secrets = repo.decrypt_secrets(&second).await.unwrap();
        assert_eq!(secrets.api_key.as_deref(), Some("new-key"));
    }

    #[tokio::test]
    async fn find_by_id_enforces_seller_scope() {
        let repo = setup().await;
        let seller_a = Uuid::new_v4();
        let seller_b = Uuid::new_v4();

        let created = repo
            .upsert_with_secrets(
                new_connection(seller_a, "shopify", "store-a"),
                NewSecrets::default(),
            )
            .await
            .unwrap();

        assert!(repo.find_by_id(&seller_a, &created.id).await.unwrap().is_some());
        assert!(repo.find_by_id(&seller_b, &created.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_by_seller_paginates_with_cursor() {
        let repo = setup().await;
        let seller_id = Uuid::new_v4();

        for i in 0..5 {
            repo.upsert_with_secrets(
                new_connection(seller_id, "woocommerce", &format!("store-{}", i)),
                NewSecrets::default(),
            )
            .await
            .unwrap();
        }

        let (page_one, cursor) = repo
            .list_by_seller(&seller_id, None, 2, None)
            .await
            .unwrap();
        assert_eq!(page_one.len(), 2);
        let cursor = cursor.expect("more rows remain");

        let (page_two, cursor) = repo
            .list_by_seller(&seller_id, None, 2, Some(cursor))
            .await
            .unwrap();
        assert_eq!(page_two.len(), 2);
        let cursor = cursor.expect("one row remains");

        let (page_three, cursor) = repo
            .list_by_seller(&seller_id, None, 2, Some(cursor))
            .await
            .unwrap();
        assert_eq!(page_three.len(), 1);
        assert!(cursor.is_none());

        // No overlap across pages
        let mut seen: Vec<Uuid> = page_one
            .iter()
            .chain(page_two.iter())
            .chain(page_three.iter())
            .map(|c| c.id)
            .collect();
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), 5);
    }

    #[tokio::test]
    async fn mark_error_excludes_connection_from_active_set() {
        let repo = setup().await;
        let seller_id = Uuid::new_v4();

        let created = repo
            .upsert_with_secrets(
                new_connection(seller_id, "amazon", "seller-central-1"),
                NewSecrets::default(),
            )
            .await
            .unwrap();

        assert_eq!(repo.find_active().await.unwrap().len(), 1);
        repo.mark_error(&created.id).await.unwrap();
        assert!(repo.find_active().await.unwrap().is_empty());
    }

    #[test]
    fn connection_cursor_roundtrips() {
        let ts = Utc.with_ymd_and_hms(2025, 6, 1, 13, 30, 0).unwrap();
        let id = Uuid::parse_str("22222222-2222-2222-2222-222222222222").unwrap();
        let ts_fixed: DateTimeWithTimeZone = ts.into();
        let cursor = build_connection_cursor(&ts_fixed, id);
        let (parsed_ts, parsed_id) = parse_connection_cursor(&cursor).unwrap();
        assert_eq!(parsed_id, id);
        assert_eq!(parsed_ts, ts_fixed);
    }

    #[test]
    fn connection_cursor_invalid_format_errors() {
        let err = parse_connection_cursor("bad-cursor").unwrap_err();
        assert!(err.to_string().contains("Invalid cursor"));
    }
}
