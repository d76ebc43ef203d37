//! # OAuth State Repository
//!
//! This module provides database operations for OAuth flow state management.
//! States are single-use CSRF tokens consumed exactly once by the callback.

use chrono::{Duration, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::models::oauth_state::{self, ActiveModel, Entity, Model};

/// Repository for OAuth state database operations
#[derive(Debug, Clone)]
pub struct OAuthStateRepository {
    db: Arc<DatabaseConnection>,
}

impl OAuthStateRepository {
    /// Create a new OAuth state repository
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Create a new OAuth state record
    pub async fn create(
        &self,
        seller_id: Uuid,
        channel_type: &str,
        state: &str,
        redirect_uri: Option<String>,
        expires_in_minutes: i64,
    ) -> Result<Model, sea_orm::DbErr> {
        let now = Utc::now();
        let expires_at = now + Duration::minutes(expires_in_minutes);

        let new_state = ActiveModel {
            id: Set(Uuid::new_v4()),
            seller_id: Set(seller_id),
            channel_type: Set(channel_type.to_string()),
            state: Set(state.to_string()),
            redirect_uri: Set(redirect_uri),
            expires_at: Set(expires_at.fixed_offset()),
            created_at: Set(now.fixed_offset()),
        };

        let state_id = match &new_state.id {
            sea_orm::ActiveValue::Set(id) => *id,
            _ => unreachable!(),
        };

        new_state.insert(&*self.db).await?;
        Entity::find_by_id(state_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| sea_orm::DbErr::RecordNotFound("oauth state not persisted".to_string()))
    }

    /// Find an unexpired OAuth state by channel and state token
    pub async fn find_by_channel_state(
        &self,
        channel_type: &str,
        state: &str,
    ) -> Result<Option<Model>, sea_orm::DbErr> {
        Entity::find()
            .filter(oauth_state::Column::ChannelType.eq(channel_type))
            .filter(oauth_state::Column::State.eq(state))
            .filter(oauth_state::Column::ExpiresAt.gt(Utc::now().fixed_offset()))
            .one(&*self.db)
            .await
    }

    /// Find and consume an OAuth state (delete it after retrieval).
    ///
    /// Deleting on read guarantees each state token authorizes at most one
    /// callback exchange.
    pub async fn find_and_consume(
        &self,
        channel_type: &str,
        state: &str,
    ) -> Result<Option<Model>, sea_orm::DbErr> {
        let oauth_state = self.find_by_channel_state(channel_type, state).await?;

        if let Some(ref state_model) = oauth_state {
            let _ = Entity::delete_by_id(state_model.id).exec(&*self.db).await?;
        }

        Ok(oauth_state)
    }

    /// Clean up expired OAuth states
    pub async fn cleanup_expired(&self) -> Result<u64, sea_orm::DbErr> {
        let result = Entity::delete_many()
            .filter(oauth_state::Column::ExpiresAt.lt(Utc::now().fixed_offset()))
            .exec(&*self.db)
            .await?;

        Ok(result.rows_affected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use migration::{Migrator, MigratorTrait};
    use sea_orm::Database;

    async fn setup() -> OAuthStateRepository {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        Migrator::up(&db, None).await.unwrap();
        OAuthStateRepository::new(Arc::new(db))
    }

    #[tokio::test]
    async fn state_is_consumed_exactly_once() {
        let repo = setup().await;
        let seller_id = Uuid::new_v4();

        repo.create(seller_id, "shopify", "state-abc", None, 10)
            .await
            .unwrap();

        let first = repo.find_and_consume("shopify", "state-abc").await.unwrap();
        assert!(first.is_some());
        assert_eq!(first.unwrap().seller_id, seller_id);

        // Replay of the same state token finds nothing
        let second = repo.find_and_consume("shopify", "state-abc").await.unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn expired_state_is_rejected() {
        let repo = setup().await;

        repo.create(Uuid::new_v4(), "etsy", "state-old", None, -5)
            .await
            .unwrap();

        let found = repo.find_and_consume("etsy", "state-old").await.unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn state_is_scoped_to_channel() {
        let repo = setup().await;

        repo.create(Uuid::new_v4(), "shopify", "state-xyz", None, 10)
            .await
            .unwrap();

        assert!(repo.find_and_consume("etsy", "state-xyz").await.unwrap().is_none());
        assert!(repo
            .find_and_consume("shopify", "state-xyz")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn cleanup_removes_only_expired_rows() {
        let repo = setup().await;

        repo.create(Uuid::new_v4(), "shopify", "state-live", None, 10)
            .await
            .unwrap();
        repo.create(Uuid::new_v4(), "shopify", "state-dead", None, -10)
            .await
            .unwrap();

        assert_eq!(repo.cleanup_expired().await.unwrap(), 1);
        assert!(repo
            .find_by_channel_state("shopify", "state-live")
            .await
            .unwrap()
            .is_some());
    }
}
