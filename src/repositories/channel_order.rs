//! # ChannelOrder Repository
//!
//! Idempotent reconciliation ledger for orders pulled from external
//! channels. Rows are keyed by the `(connection_id, channel_order_id)`
//! natural key and upserts never clobber newer data with stale replays.

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, Order, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::is_unique_violation;
use crate::models::channel_order::{self, Column, Entity, Model};

/// Normalized order fields written by the sync executor
#[derive(Debug, Clone)]
pub struct OrderUpsert {
    pub seller_id: Uuid,
    pub connection_id: Uuid,
    pub channel_order_id: String,
    pub channel_order_number: Option<String>,
    pub status: String,
    pub total_amount: String,
    pub currency: String,
    pub customer_email: Option<String>,
    pub raw_payload: JsonValue,
    pub channel_updated_at: Option<DateTime<Utc>>,
}

/// Outcome of an order upsert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// A new ledger row was created
    Inserted,
    /// The existing row was overwritten with newer data
    Updated,
    /// The incoming payload was older than the stored row and was dropped
    SkippedStale,
}

/// Repository for channel order database operations
#[derive(Debug, Clone)]
pub struct ChannelOrderRepository {
    db: Arc<DatabaseConnection>,
}

impl ChannelOrderRepository {
    /// Create a new ChannelOrderRepository with the given database connection
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Upsert an order row by its natural key.
    ///
    /// When the stored row carries a `channel_updated_at` that is strictly
    /// newer than the incoming one, the write is skipped so stale webhook
    /// replays cannot overwrite fresher polled data. Rows without the
    /// timestamp fall back to last-write-wins.
    pub async fn upsert(&self, order: OrderUpsert) -> Result<UpsertOutcome> {
        let now = Utc::now().fixed_offset();

        let model = channel_order::ActiveModel {
            id: Set(Uuid::new_v4()),
            seller_id: Set(order.seller_id),
            connection_id: Set(order.connection_id),
            channel_order_id: Set(order.channel_order_id.clone()),
            channel_order_number: Set(order.channel_order_number.clone()),
            status: Set(order.status.clone()),
            total_amount: Set(order.total_amount.clone()),
            currency: Set(order.currency.clone()),
            customer_email: Set(order.customer_email.clone()),
            raw_payload: Set(order.raw_payload.clone()),
            channel_updated_at: Set(order.channel_updated_at.map(|ts| ts.fixed_offset())),
            created_at: Set(now),
            updated_at: Set(now),
        };

        match model.insert(&*self.db).await {
            Ok(_) => Ok(UpsertOutcome::Inserted),
            Err(err) if is_unique_violation(&err) => self.overwrite_existing(order).await,
            Err(err) => Err(err.into()),
        }
    }

    async fn overwrite_existing(&self, order: OrderUpsert) -> Result<UpsertOutcome> {
        let existing = self
            .find_by_natural_key(&order.connection_id, &order.channel_order_id)
            .await?
            .ok_or_else(|| anyhow!("order unique conflict without existing row"))?;

        if let (Some(stored), Some(incoming)) =
            (existing.channel_updated_at, order.channel_updated_at)
            && stored > incoming
        {
            tracing::debug!(
                connection_id = %order.connection_id,
                channel_order_id = %order.channel_order_id,
                "Skipping stale order payload"
            );
            return Ok(UpsertOutcome::SkippedStale);
        }

        let mut active: channel_order::ActiveModel = existing.into();
        active.channel_order_number = Set(order.channel_order_number);
        active.status = Set(order.status);
        active.total_amount = Set(order.total_amount);
        active.currency = Set(order.currency);
        active.customer_email = Set(order.customer_email);
        active.raw_payload = Set(order.raw_payload);
        active.channel_updated_at = Set(order.channel_updated_at.map(|ts| ts.fixed_offset()));
        active.updated_at = Set(Utc::now().fixed_offset());
        active.update(&*self.db).await?;

        Ok(UpsertOutcome::Updated)
    }

    /// Find an order by its natural key
    pub async fn find_by_natural_key(
        &self,
        connection_id: &Uuid,
        channel_order_id: &str,
    ) -> Result<Option<Model>> {
        Ok(Entity::find()
            .filter(Column::ConnectionId.eq(*connection_id))
            .filter(Column::ChannelOrderId.eq(channel_order_id))
            .one(&*self.db)
            .await?)
    }

    /// Count orders referencing a connection, used to decide between hard
    /// delete and soft deactivation when a connection is removed
    pub async fn count_for_connection(&self, connection_id: &Uuid) -> Result<u64> {
        use sea_orm::PaginatorTrait;

        Ok(Entity::find()
            .filter(Column::ConnectionId.eq(*connection_id))
            .count(&*self.db)
            .await?)
    }

    /// List orders for a seller, newest channel activity first
    pub async fn list_by_seller(
        &self,
        seller_id: &Uuid,
        connection_id: Option<&Uuid>,
        limit: u64,
    ) -> Result<Vec<Model>> {
        let mut query = Entity::find()
            .filter(Column::SellerId.eq(*seller_id))
            .order_by(Column::UpdatedAt, Order::Desc)
            .order_by(Column::Id, Order::Desc)
            .limit(limit);

        if let Some(connection_id) = connection_id {
            query = query.filter(Column::ConnectionId.eq(*connection_id));
        }

        Ok(query.all(&*self.db).await?)
    }
}
