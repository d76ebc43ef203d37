//! # InventoryEvent Repository
//!
//! Append-only audit trail for inventory pushes and pulls.

use anyhow::Result;
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, Order, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::models::inventory_sync_event::{self, Column, Entity, Model};

/// Fields recorded for one inventory movement
#[derive(Debug, Clone)]
pub struct InventoryEvent {
    pub seller_id: Uuid,
    pub connection_id: Uuid,
    pub mapping_id: Option<Uuid>,
    pub direction: String,
    pub quantity_before: Option<i32>,
    pub quantity_after: Option<i32>,
    pub status: String,
    pub error_message: Option<String>,
}

/// Repository for inventory sync event database operations
#[derive(Debug, Clone)]
pub struct InventoryEventRepository {
    db: Arc<DatabaseConnection>,
}

impl InventoryEventRepository {
    /// Create a new InventoryEventRepository with the given database connection
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Append one inventory movement to the audit trail
    pub async fn record(&self, event: InventoryEvent) -> Result<()> {
        let model = inventory_sync_event::ActiveModel {
            id: Set(Uuid::new_v4()),
            seller_id: Set(event.seller_id),
            connection_id: Set(event.connection_id),
            mapping_id: Set(event.mapping_id),
            direction: Set(event.direction),
            quantity_before: Set(event.quantity_before),
            quantity_after: Set(event.quantity_after),
            status: Set(event.status),
            error_message: Set(event.error_message),
            created_at: Set(Utc::now().fixed_offset()),
        };

        model.insert(&*self.db).await?;
        Ok(())
    }

    /// List the most recent events for a connection, newest first
    pub async fn list_by_connection(
        &self,
        seller_id: &Uuid,
        connection_id: &Uuid,
        limit: u64,
    ) -> Result<Vec<Model>> {
        Ok(Entity::find()
            .filter(Column::SellerId.eq(*seller_id))
            .filter(Column::ConnectionId.eq(*connection_id))
            .order_by(Column::CreatedAt, Order::Desc)
            .order_by(Column::Id, Order::Desc)
            .limit(limit)
            .all(&*self.db)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::inventory_sync_event::direction;
    use migration::{Migrator, MigratorTrait};
    use sea_orm::Database;

    async fn setup() -> (InventoryEventRepository, Uuid, Uuid) {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        Migrator::up(&db, None).await.unwrap();
        let db = Arc::new(db);

        let seller_id = Uuid::new_v4();
        let now = Utc::now().fixed_offset();
        let connection = crate::models::channel_connection::ActiveModel {
            id: Set(Uuid::new_v4()),
            seller_id: Set(seller_id),
            channel_type: Set("woocommerce".to_string()),
            external_id: Set("shop.example.com".to_string()),
            display_name: Set(None),
            store_url: Set(None),
            status: Set("connected".to_string()),
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
        let connection_id = connection.insert(&*db).await.unwrap().id;

        (InventoryEventRepository::new(db), seller_id, connection_id)
    }

    #[tokio::test]
    async fn record_and_list_events() {
        let (repo, seller_id, connection_id) = setup().await;

        repo.record(InventoryEvent {
            seller_id,
            connection_id,
            mapping_id: None,
            direction: direction::PULL.to_string(),
            quantity_before: Some(3),
            quantity_after: Some(10),
            status: "ok".to_string(),
            error_message: None,
        })
        .await
        .unwrap();

        repo.record(InventoryEvent {
            seller_id,
            connection_id,
            mapping_id: None,
            direction: direction::PUSH.to_string(),
            quantity_before: Some(10),
            quantity_after: None,
            status: "error".to_string(),
            error_message: Some("upstream timeout".to_string()),
        })
        .await
        .unwrap();

        let events = repo
            .list_by_connection(&seller_id, &connection_id, 10)
            .await
            .unwrap();
        assert_eq!(events.len(), 2);
        assert!(events.iter().any(|e| e.direction == direction::PUSH));
        assert!(events.iter().any(|e| e.status == "error"));
    }
}
