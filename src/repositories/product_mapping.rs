//! # ProductMapping Repository
//!
//! Links local products to their channel-side listings. Rows are keyed by
//! `(connection_id, channel_product_id, channel_variant_id)` where the
//! variant component is the empty string for channels without variants.

use anyhow::{Result, anyhow};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::is_unique_violation;
use crate::models::product_mapping::{self, Column, Entity, Model};

/// Fields written when a mapping is created or refreshed
#[derive(Debug, Clone)]
pub struct MappingUpsert {
    pub seller_id: Uuid,
    pub connection_id: Uuid,
    pub product_id: Uuid,
    pub channel_product_id: String,
    /// Empty string for channels without variants
    pub channel_variant_id: String,
    pub channel_sku: Option<String>,
    pub price_multiplier: f64,
    pub price_offset: f64,
    pub sync_price: bool,
    pub sync_inventory: bool,
}

/// Repository for product mapping database operations
#[derive(Debug, Clone)]
pub struct ProductMappingRepository {
    db: Arc<DatabaseConnection>,
}

impl ProductMappingRepository {
    /// Create a new ProductMappingRepository with the given database connection
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Upsert a mapping row by its natural key
    pub async fn upsert(&self, mapping: MappingUpsert) -> Result<Model> {
        let now = Utc::now().fixed_offset();

        let model = product_mapping::ActiveModel {
            id: Set(Uuid::new_v4()),
            seller_id: Set(mapping.seller_id),
            connection_id: Set(mapping.connection_id),
            product_id: Set(mapping.product_id),
            channel_product_id: Set(mapping.channel_product_id.clone()),
            channel_variant_id: Set(mapping.channel_variant_id.clone()),
            channel_sku: Set(mapping.channel_sku.clone()),
            price_multiplier: Set(mapping.price_multiplier),
            price_offset: Set(mapping.price_offset),
            sync_price: Set(mapping.sync_price),
            sync_inventory: Set(mapping.sync_inventory),
            last_price: Set(None),
            last_stock: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };

        let mapping_id = match &model.id {
            sea_orm::ActiveValue::Set(id) => *id,
            _ => unreachable!(),
        };

        match model.insert(&*self.db).await {
            Ok(_) => Entity::find_by_id(mapping_id)
                .one(&*self.db)
                .await?
                .ok_or_else(|| anyhow!("mapping not persisted")),
            Err(err) if is_unique_violation(&err) => {
                let existing = self
                    .find_by_natural_key(
                        &mapping.connection_id,
                        &mapping.channel_product_id,
                        &mapping.channel_variant_id,
                    )
                    .await?
                    .ok_or_else(|| anyhow!("mapping unique conflict without existing row"))?;

                let mut active: product_mapping::ActiveModel = existing.into();
                active.product_id = Set(mapping.product_id);
                active.channel_sku = Set(mapping.channel_sku);
                active.price_multiplier = Set(mapping.price_multiplier);
                active.price_offset = Set(mapping.price_offset);
                active.sync_price = Set(mapping.sync_price);
                active.sync_inventory = Set(mapping.sync_inventory);
                active.updated_at = Set(Utc::now().fixed_offset());

                Ok(active.update(&*self.db).await?)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Find a mapping by its natural key
    pub async fn find_by_natural_key(
        &self,
        connection_id: &Uuid,
        channel_product_id: &str,
        channel_variant_id: &str,
    ) -> Result<Option<Model>> {
        Ok(Entity::find()
            .filter(Column::ConnectionId.eq(*connection_id))
            .filter(Column::ChannelProductId.eq(channel_product_id))
            .filter(Column::ChannelVariantId.eq(channel_variant_id))
            .one(&*self.db)
            .await?)
    }

    /// List mappings for a connection
    pub async fn list_by_connection(
        &self,
        seller_id: &Uuid,
        connection_id: &Uuid,
        limit: u64,
    ) -> Result<Vec<Model>> {
        Ok(Entity::find()
            .filter(Column::SellerId.eq(*seller_id))
            .filter(Column::ConnectionId.eq(*connection_id))
            .order_by_asc(Column::CreatedAt)
            .order_by_asc(Column::Id)
            .limit(limit)
            .all(&*self.db)
            .await?)
    }

    /// List mappings flagged for inventory sync on a connection
    pub async fn find_inventory_synced(&self, connection_id: &Uuid) -> Result<Vec<Model>> {
        Ok(Entity::find()
            .filter(Column::ConnectionId.eq(*connection_id))
            .filter(Column::SyncInventory.eq(true))
            .order_by_asc(Column::CreatedAt)
            .all(&*self.db)
            .await?)
    }

    /// Record the most recent observed price and stock for a mapping
    pub async fn record_observed_state(
        &self,
        mapping_id: &Uuid,
        last_price: Option<String>,
        last_stock: Option<i32>,
    ) -> Result<Model> {
        let existing = Entity::find_by_id(*mapping_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| anyhow!("Mapping '{}' not found", mapping_id))?;

        let mut active: product_mapping::ActiveModel = existing.into();
        if last_price.is_some() {
            active.last_price = Set(last_price);
        }
        if last_stock.is_some() {
            active.last_stock = Set(last_stock);
        }
        active.updated_at = Set(Utc::now().fixed_offset());

        Ok(active.update(&*self.db).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use migration::{Migrator, MigratorTrait};
    use sea_orm::Database;

    async fn setup() -> (ProductMappingRepository, Uuid, Uuid) {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        Migrator::up(&db, None).await.unwrap();
        let db = Arc::new(db);

        let seller_id = Uuid::new_v4();
        let now = Utc::now().fixed_offset();
        let connection = crate::models::channel_connection::ActiveModel {
            id: Set(Uuid::new_v4()),
            seller_id: Set(seller_id),
            channel_type: Set("etsy".to_string()),
            external_id: Set("shop-9".to_string()),
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

        (ProductMappingRepository::new(db), seller_id, connection_id)
    }

    fn sample_mapping(
        seller_id: Uuid,
        connection_id: Uuid,
        channel_product_id: &str,
        channel_variant_id: &str,
    ) -> MappingUpsert {
        MappingUpsert {
            seller_id,
            connection_id,
            product_id: Uuid::new_v4(),
            channel_product_id: channel_product_id.to_string(),
            channel_variant_id: channel_variant_id.to_string(),
            channel_sku: Some("SKU-1".to_string()),
            price_multiplier: 1.0,
            price_offset: 0.0,
            sync_price: true,
            sync_inventory: true,
        }
    }

    #[tokio::test]
    async fn upsert_is_idempotent_on_natural_key() {
        let (repo, seller_id, connection_id) = setup().await;

        let first = repo
            .upsert(sample_mapping(seller_id, connection_id, "listing-1", ""))
            .await
            .unwrap();

        let mut refresh = sample_mapping(seller_id, connection_id, "listing-1", "");
        refresh.price_multiplier = 1.2;
        let second = repo.upsert(refresh).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.price_multiplier, 1.2);

        let rows = repo
            .list_by_connection(&seller_id, &connection_id, 10)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn variants_are_distinct_rows() {
        let (repo, seller_id, connection_id) = setup().await;

        repo.upsert(sample_mapping(seller_id, connection_id, "listing-2", ""))
            .await
            .unwrap();
        repo.upsert(sample_mapping(seller_id, connection_id, "listing-2", "v1"))
            .await
            .unwrap();
        repo.upsert(sample_mapping(seller_id, connection_id, "listing-2", "v2"))
            .await
            .unwrap();

        let rows = repo
            .list_by_connection(&seller_id, &connection_id, 10)
            .await
            .unwrap();
        assert_eq!(rows.len(), 3);
    }

    #[tokio::test]
    async fn record_observed_state_updates_price_and_stock() {
        let (repo, seller_id, connection_id) = setup().await;

        let mapping = repo
            .upsert(sample_mapping(seller_id, connection_id, "listing-3", ""))
            .await
            .unwrap();

        let updated = repo
            .record_observed_state(&mapping.id, Some("19.99".to_string()), Some(7))
            .await
            .unwrap();
        assert_eq!(updated.last_price.as_deref(), Some("19.99"));
        assert_eq!(updated.last_stock, Some(7));
    }

    #[tokio::test]
    async fn find_inventory_synced_filters_flag() {
        let (repo, seller_id, connection_id) = setup().await;

        repo.upsert(sample_mapping(seller_id, connection_id, "listing-4", ""))
            .await
            .unwrap();
        let mut no_inventory = sample_mapping(seller_id, connection_id, "listing-5", "");
        no_inventory.sync_inventory = false;
        repo.upsert(no_inventory).await.unwrap();

        let rows = repo.find_inventory_synced(&connection_id).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].channel_product_id, "listing-4");
    }
}
