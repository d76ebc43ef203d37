//! # SyncJob Repository
//!
//! This module provides repository operations for the sync_jobs table:
//! enqueue with duplicate suppression, atomic claiming for workers,
//! retry/terminal transitions, and seller-scoped listing.

use chrono::{DateTime, Duration, Utc};
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::{
    ColumnTrait, Condition, DatabaseConnection, EntityTrait, Order, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use uuid::Uuid;

use crate::cursor::{decode_generic_cursor, encode_generic_cursor};
use crate::error::{ApiError, ErrorType, is_unique_violation, validation_error};
use crate::models::sync_job::{self, Column, Entity, Model, job_type, status};

/// Parameters for enqueueing a new sync job
#[derive(Debug, Clone)]
pub struct NewJob {
    pub seller_id: Uuid,
    pub connection_id: Uuid,
    pub channel_type: String,
    pub job_type: String,
    pub priority: i16,
    pub max_attempts: i32,
    pub payload: Option<JsonValue>,
    pub scheduled_for: DateTime<Utc>,
}

/// Optional filters for the seller-scoped job listing
#[derive(Debug, Clone, Default)]
pub struct JobFilters {
    pub channel_type: Option<String>,
    pub status: Option<String>,
    pub job_type: Option<String>,
    pub connection_id: Option<Uuid>,
    pub started_after: Option<DateTime<Utc>>,
    pub finished_after: Option<DateTime<Utc>>,
}

/// Outcome of an enqueue attempt
#[derive(Debug, Clone)]
pub enum EnqueueOutcome {
    /// A new job row was created
    Created(Model),
    /// A pending or processing job for the same connection and job type
    /// already exists; the existing row is returned instead
    Duplicate(Model),
}

impl EnqueueOutcome {
    /// Borrow the job model regardless of outcome
    pub fn job(&self) -> &Model {
        match self {
            EnqueueOutcome::Created(job) | EnqueueOutcome::Duplicate(job) => job,
        }
    }

    /// Whether a new row was created
    pub fn is_created(&self) -> bool {
        matches!(self, EnqueueOutcome::Created(_))
    }
}

/// Repository for sync job database operations
#[derive(Debug, Clone)]
pub struct SyncJobRepository {
    db: Arc<DatabaseConnection>,
}

impl SyncJobRepository {
    /// Create a new SyncJobRepository with the given database connection
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Enqueue a new sync job.
    ///
    /// Scheduled sync types (`orders_sync`, `products_sync`) are guarded by a
    /// partial unique index so at most one pending or processing job exists
    /// per connection and job type. A conflicting enqueue returns the
    /// existing row rather than an error.
    pub async fn enqueue(&self, new_job: NewJob) -> Result<EnqueueOutcome, ApiError> {
        let now = Utc::now().fixed_offset();

        let job = sync_job::ActiveModel {
            id: Set(Uuid::new_v4()),
            seller_id: Set(new_job.seller_id),
            connection_id: Set(new_job.connection_id),
            channel_type: Set(new_job.channel_type.clone()),
            job_type: Set(new_job.job_type.clone()),
            status: Set(status::PENDING.to_string()),
            priority: Set(new_job.priority),
            attempts: Set(0),
            max_attempts: Set(new_job.max_attempts),
            scheduled_for: Set(new_job.scheduled_for.fixed_offset()),
            started_at: Set(None),
            finished_at: Set(None),
            payload: Set(new_job.payload.clone()),
            cursor: Set(None),
            last_error: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };

        let job_id = match &job.id {
            sea_orm::ActiveValue::Set(id) => *id,
            _ => unreachable!(),
        };

        match sea_orm::ActiveModelTrait::insert(job, &*self.db).await {
            Ok(_) => {}
            Err(err) if is_unique_violation(&err) => {
                let existing = self
                    .find_open_for_connection(new_job.connection_id, &new_job.job_type)
                    .await?;
                if let Some(existing) = existing {
                    tracing::debug!(
                        connection_id = %new_job.connection_id,
                        job_type = %new_job.job_type,
                        existing_job_id = %existing.id,
                        "Sync job already scheduled, suppressing duplicate"
                    );
                    return Ok(EnqueueOutcome::Duplicate(existing));
                }
                // Conflicting row finished between insert and lookup, retry once
                return Box::pin(self.enqueue(new_job)).await;
            }
            Err(err) => return Err(err.into()),
        }

        let created = Entity::find_by_id(job_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ApiError::from(ErrorType::InternalServerError))?;

        tracing::info!(
            seller_id = %created.seller_id,
            connection_id = %created.connection_id,
            channel_type = %created.channel_type,
            job_type = %created.job_type,
            job_id = %created.id,
            "Sync job enqueued"
        );

        Ok(EnqueueOutcome::Created(created))
    }

    /// Find the open (pending or processing) job for a connection and job type
    pub async fn find_open_for_connection(
        &self,
        connection_id: Uuid,
        job_type: &str,
    ) -> Result<Option<Model>, ApiError> {
        Ok(Entity::find()
            .filter(Column::ConnectionId.eq(connection_id))
            .filter(Column::JobType.eq(job_type))
            .filter(
                Condition::any()
                    .add(Column::Status.eq(status::PENDING))
                    .add(Column::Status.eq(status::PROCESSING)),
            )
            .one(&*self.db)
            .await?)
    }

    /// Atomically claim up to `batch` due jobs for processing.
    ///
    /// Candidates are selected by priority then schedule time, then each is
    /// transitioned with a compare-and-set on `status = 'pending'` so
    /// concurrent workers never claim the same job twice. Claiming increments
    /// the attempt counter and stamps `started_at` as the lease marker.
    pub async fn claim_batch(&self, batch: u32) -> Result<Vec<Model>, ApiError> {
        if batch == 0 {
            return Ok(Vec::new());
        }

        let now = Utc::now().fixed_offset();

        let candidates = Entity::find()
            .filter(Column::Status.eq(status::PENDING))
            .filter(Column::ScheduledFor.lte(now))
            .order_by(Column::Priority, Order::Desc)
            .order_by_asc(Column::ScheduledFor)
            .order_by_asc(Column::Id)
            .limit(batch as u64)
            .all(&*self.db)
            .await?;

        let mut claimed = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let result = Entity::update_many()
                .col_expr(Column::Status, status::PROCESSING.into())
                .col_expr(
                    Column::Attempts,
                    sea_orm::sea_query::Expr::col(Column::Attempts).add(1),
                )
                .col_expr(Column::StartedAt, now.into())
                .col_expr(Column::UpdatedAt, now.into())
                .filter(Column::Id.eq(candidate.id))
                .filter(Column::Status.eq(status::PENDING))
                .exec(&*self.db)
                .await?;

            if result.rows_affected == 1
                && let Some(job) = Entity::find_by_id(candidate.id).one(&*self.db).await?
            {
                claimed.push(job);
            }
        }

        Ok(claimed)
    }

    /// Return stale processing jobs to the pending queue.
    ///
    /// A job whose `started_at` predates the lease window is assumed to have
    /// lost its worker and becomes claimable again. Attempts already consumed
    /// by the lost run are kept.
    pub async fn reclaim_stale(&self, lease_seconds: u64) -> Result<u64, ApiError> {
        let cutoff = (Utc::now() - Duration::seconds(lease_seconds as i64)).fixed_offset();
        let now = Utc::now().fixed_offset();

        let result = Entity::update_many()
            .col_expr(Column::Status, status::PENDING.into())
            .col_expr(Column::ScheduledFor, now.into())
            .col_expr(Column::UpdatedAt, now.into())
            .filter(Column::Status.eq(status::PROCESSING))
            .filter(Column::StartedAt.lt(cutoff))
            .exec(&*self.db)
            .await?;

        if result.rows_affected > 0 {
            tracing::warn!(
                reclaimed = result.rows_affected,
                lease_seconds,
                "Reclaimed stale processing jobs"
            );
        }

        Ok(result.rows_affected)
    }

    /// Mark a job as completed, persisting the sync cursor when supplied
    pub async fn mark_completed(
        &self,
        job_id: Uuid,
        cursor: Option<JsonValue>,
    ) -> Result<Model, ApiError> {
        let now = Utc::now().fixed_offset();

        let job = self.require(job_id).await?;
        let mut active: sync_job::ActiveModel = job.into();
        active.status = Set(status::COMPLETED.to_string());
        active.finished_at = Set(Some(now));
        active.updated_at = Set(now);
        active.last_error = Set(None);
        if cursor.is_some() {
            active.cursor = Set(cursor);
        }

        Ok(sea_orm::ActiveModelTrait::update(active, &*self.db).await?)
    }

    /// Reschedule a failed run for another attempt at `next_run`
    pub async fn reschedule(
        &self,
        job_id: Uuid,
        next_run: DateTime<Utc>,
        error: JsonValue,
    ) -> Result<Model, ApiError> {
        let now = Utc::now().fixed_offset();

        let job = self.require(job_id).await?;
        let mut active: sync_job::ActiveModel = job.into();
        active.status = Set(status::PENDING.to_string());
        active.scheduled_for = Set(next_run.fixed_offset());
        active.started_at = Set(None);
        active.last_error = Set(Some(error));
        active.updated_at = Set(now);

        Ok(sea_orm::ActiveModelTrait::update(active, &*self.db).await?)
    }

    /// Mark a job as terminally failed
    pub async fn mark_failed(&self, job_id: Uuid, error: JsonValue) -> Result<Model, ApiError> {
        let now = Utc::now().fixed_offset();

        let job = self.require(job_id).await?;
        let mut active: sync_job::ActiveModel = job.into();
        active.status = Set(status::FAILED.to_string());
        active.finished_at = Set(Some(now));
        active.last_error = Set(Some(error));
        active.updated_at = Set(now);

        Ok(sea_orm::ActiveModelTrait::update(active, &*self.db).await?)
    }

    /// Requeue a terminally failed job at operator request.
    ///
    /// Only failed jobs can be retried. With `reset_attempts` the attempt
    /// counter restarts from zero, otherwise the job keeps its history and
    /// fails permanently again once `max_attempts` is reached.
    pub async fn retry(
        &self,
        seller_id: Uuid,
        job_id: Uuid,
        reset_attempts: bool,
    ) -> Result<Model, ApiError> {
        let job = Entity::find_by_id(job_id)
            .filter(Column::SellerId.eq(seller_id))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ApiError::from(ErrorType::NotFound))?;

        if job.status != status::FAILED {
            return Err(validation_error(
                "Only failed jobs can be retried",
                serde_json::json!({ "status": job.status }),
            ));
        }

        let now = Utc::now().fixed_offset();
        let mut active: sync_job::ActiveModel = job.into();
        active.status = Set(status::PENDING.to_string());
        active.scheduled_for = Set(now);
        active.started_at = Set(None);
        active.finished_at = Set(None);
        if reset_attempts {
            active.attempts = Set(0);
        }
        active.updated_at = Set(now);

        Ok(sea_orm::ActiveModelTrait::update(active, &*self.db).await?)
    }

    /// Find a sync job by ID, ensuring it belongs to the specified seller
    pub async fn find_by_seller(
        &self,
        seller_id: Uuid,
        job_id: Uuid,
    ) -> Result<Option<Model>, ApiError> {
        Ok(Entity::find_by_id(job_id)
            .filter(Column::SellerId.eq(seller_id))
            .one(&*self.db)
            .await?)
    }

    /// List sync jobs for a seller with optional filters and cursor pagination
    pub async fn list_by_seller(
        &self,
        seller_id: Uuid,
        filters: JobFilters,
        limit: u64,
        cursor: Option<String>,
    ) -> Result<(Vec<Model>, Option<String>), ApiError> {
        if limit == 0 {
            return Ok((Vec::new(), cursor));
        }

        if let Some(kind) = &filters.job_type
            && !job_type::ALL.contains(&kind.as_str())
        {
            return Err(validation_error(
                "Unknown job type",
                serde_json::json!({ "job_type": kind }),
            ));
        }

        let mut query = Entity::find()
            .filter(Column::SellerId.eq(seller_id))
            .order_by_asc(Column::CreatedAt)
            .order_by_asc(Column::Id);

        if let Some(channel) = filters.channel_type {
            query = query.filter(Column::ChannelType.eq(channel));
        }
        if let Some(job_status) = filters.status {
            query = query.filter(Column::Status.eq(job_status));
        }
        if let Some(kind) = filters.job_type {
            query = query.filter(Column::JobType.eq(kind));
        }
        if let Some(connection_id) = filters.connection_id {
            query = query.filter(Column::ConnectionId.eq(connection_id));
        }
        if let Some(started_after) = filters.started_after {
            query = query.filter(Column::StartedAt.gt(started_after.fixed_offset()));
        }
        if let Some(finished_after) = filters.finished_after {
            query = query.filter(Column::FinishedAt.gt(finished_after.fixed_offset()));
        }

        if let Some(cursor) = cursor
            && !cursor.is_empty()
        {
            let (created_at, cursor_id) = parse_job_cursor(&cursor)?;
            let condition = Condition::any().add(Column::CreatedAt.gt(created_at)).add(
                Condition::all()
                    .add(Column::CreatedAt.eq(created_at))
                    .add(Column::Id.gt(cursor_id)),
            );
            query = query.filter(condition);
        }

        let mut rows = query.limit(limit + 1).all(&*self.db).await?;

        let next_cursor = if rows.len() as u64 > limit {
            rows.pop();
            rows.last()
                .map(|last| build_job_cursor(&last.created_at, last.id))
        } else {
            None
        };

        Ok((rows, next_cursor))
    }

    async fn require(&self, job_id: Uuid) -> Result<Model, ApiError> {
        Entity::find_by_id(job_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ApiError::from(ErrorType::NotFound))
    }
}

fn parse_job_cursor(cursor: &str) -> Result<(DateTimeWithTimeZone, Uuid), ApiError> {
    #[derive(serde::Deserialize)]
    struct Keys {
        created_at: String,
        id: Uuid,
    }

    let keys: Keys = decode_generic_cursor(cursor)?;
    let created_at = DateTime::parse_from_rfc3339(&keys.created_at).map_err(|_| {
        validation_error(
            "Invalid cursor",
            serde_json::json!({ "cursor": "created_at must be a valid RFC3339 timestamp" }),
        )
    })?;

    Ok((created_at, keys.id))
}

fn build_job_cursor(created_at: &DateTimeWithTimeZone, id: Uuid) -> String {
    encode_generic_cursor(&serde_json::json!({
        "created_at": created_at.to_rfc3339(),
        "id": id.to_string()
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use migration::{Migrator, MigratorTrait};
    use sea_orm::{ActiveModelTrait, Database};

    async fn setup() -> SyncJobRepository {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        Migrator::up(&db, None).await.unwrap();
        SyncJobRepository::new(Arc::new(db))
    }

    async fn seed_connection(repo: &SyncJobRepository, seller_id: Uuid) -> Uuid {
        let now = Utc::now().fixed_offset();
        let connection = crate::models::channel_connection::ActiveModel {
            id: Set(Uuid::new_v4()),
            seller_id: Set(seller_id),
            channel_type: Set("shopify".to_string()),
            external_id: Set(Uuid::new_v4().to_string()),
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
        connection.insert(&*repo.db).await.unwrap().id
    }

    fn new_job(seller_id: Uuid, connection_id: Uuid, kind: &str) -> NewJob {
        NewJob {
            seller_id,
            connection_id,
            channel_type: "shopify".to_string(),
            job_type: kind.to_string(),
            priority: 0,
            max_attempts: 5,
            payload: None,
            scheduled_for: Utc::now(),
        }
    }

    #[tokio::test]
    async fn enqueue_suppresses_duplicate_scheduled_jobs() {
        let repo = setup().await;
        let seller_id = Uuid::new_v4();
        let connection_id = seed_connection(&repo, seller_id).await;

        let first = repo
            .enqueue(new_job(seller_id, connection_id, job_type::ORDERS_SYNC))
            .await
            .unwrap();
        assert!(first.is_created());

        let second = repo
            .enqueue(new_job(seller_id, connection_id, job_type::ORDERS_SYNC))
            .await
            .unwrap();
        assert!(!second.is_created());
        assert_eq!(first.job().id, second.job().id);

        // A different job type is not a duplicate
        let products = repo
            .enqueue(new_job(seller_id, connection_id, job_type::PRODUCTS_SYNC))
            .await
            .unwrap();
        assert!(products.is_created());
    }

    #[tokio::test]
    async fn webhook_jobs_are_never_deduplicated() {
        let repo = setup().await;
        let seller_id = Uuid::new_v4();
        let connection_id = seed_connection(&repo, seller_id).await;

        let first = repo
            .enqueue(new_job(seller_id, connection_id, job_type::WEBHOOK_EVENT))
            .await
            .unwrap();
        let second = repo
            .enqueue(new_job(seller_id, connection_id, job_type::WEBHOOK_EVENT))
            .await
            .unwrap();

        assert!(first.is_created());
        assert!(second.is_created());
        assert_ne!(first.job().id, second.job().id);
    }

    #[tokio::test]
    async fn claim_batch_is_exclusive_and_increments_attempts() {
        let repo = setup().await;
        let seller_id = Uuid::new_v4();
        let connection_id = seed_connection(&repo, seller_id).await;

        repo.enqueue(new_job(seller_id, connection_id, job_type::ORDERS_SYNC))
            .await
            .unwrap();

        let claimed = repo.claim_batch(10).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].status, status::PROCESSING);
        assert_eq!(claimed[0].attempts, 1);
        assert!(claimed[0].started_at.is_some());

        // Already claimed, nothing left
        assert!(repo.claim_batch(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn claim_batch_skips_future_jobs() {
        let repo = setup().await;
        let seller_id = Uuid::new_v4();
        let connection_id = seed_connection(&repo, seller_id).await;

        let mut job = new_job(seller_id, connection_id, job_type::ORDERS_SYNC);
        job.scheduled_for = Utc::now() + Duration::hours(1);
        repo.enqueue(job).await.unwrap();

        assert!(repo.claim_batch(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn claim_batch_orders_by_priority() {
        let repo = setup().await;
        let seller_id = Uuid::new_v4();
        let low_conn = seed_connection(&repo, seller_id).await;
        let high_conn = seed_connection(&repo, seller_id).await;

        repo.enqueue(new_job(seller_id, low_conn, job_type::ORDERS_SYNC))
            .await
            .unwrap();
        let mut urgent = new_job(seller_id, high_conn, job_type::ORDERS_SYNC);
        urgent.priority = 50;
        repo.enqueue(urgent).await.unwrap();

        let claimed = repo.claim_batch(1).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].connection_id, high_conn);
    }

    #[tokio::test]
    async fn reschedule_makes_job_claimable_again() {
        let repo = setup().await;
        let seller_id = Uuid::new_v4();
        let connection_id = seed_connection(&repo, seller_id).await;

        repo.enqueue(new_job(seller_id, connection_id, job_type::ORDERS_SYNC))
            .await
            .unwrap();
        let claimed = repo.claim_batch(1).await.unwrap();
        let job_id = claimed[0].id;

        repo.reschedule(
            job_id,
            Utc::now() - Duration::seconds(1),
            serde_json::json!({ "type": "transient", "message": "upstream 503" }),
        )
        .await
        .unwrap();

        let reclaimed = repo.claim_batch(1).await.unwrap();
        assert_eq!(reclaimed.len(), 1);
        assert_eq!(reclaimed[0].id, job_id);
        assert_eq!(reclaimed[0].attempts, 2);
        assert!(reclaimed[0].last_error.is_some());
    }

    #[tokio::test]
    async fn mark_failed_is_terminal() {
        let repo = setup().await;
        let seller_id = Uuid::new_v4();
        let connection_id = seed_connection(&repo, seller_id).await;

        repo.enqueue(new_job(seller_id, connection_id, job_type::ORDERS_SYNC))
            .await
            .unwrap();
        let claimed = repo.claim_batch(1).await.unwrap();
        let job_id = claimed[0].id;

        let failed = repo
            .mark_failed(job_id, serde_json::json!({ "type": "permanent" }))
            .await
            .unwrap();
        assert_eq!(failed.status, status::FAILED);
        assert!(failed.finished_at.is_some());

        assert!(repo.claim_batch(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn retry_requeues_failed_job_and_resets_attempts() {
        let repo = setup().await;
        let seller_id = Uuid::new_v4();
        let connection_id = seed_connection(&repo, seller_id).await;

        repo.enqueue(new_job(seller_id, connection_id, job_type::ORDERS_SYNC))
            .await
            .unwrap();
        let claimed = repo.claim_batch(1).await.unwrap();
        let job_id = claimed[0].id;
        repo.mark_failed(job_id, serde_json::json!({ "type": "permanent" }))
            .await
            .unwrap();

        let retried = repo.retry(seller_id, job_id, true).await.unwrap();
        assert_eq!(retried.status, status::PENDING);
        assert_eq!(retried.attempts, 0);

        // Retrying a job that is no longer failed is rejected
        let err = repo.retry(seller_id, job_id, false).await.unwrap_err();
        assert_eq!(err.status, axum::http::StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn retry_is_seller_scoped() {
        let repo = setup().await;
        let seller_id = Uuid::new_v4();
        let connection_id = seed_connection(&repo, seller_id).await;

        repo.enqueue(new_job(seller_id, connection_id, job_type::ORDERS_SYNC))
            .await
            .unwrap();
        let claimed = repo.claim_batch(1).await.unwrap();
        repo.mark_failed(claimed[0].id, serde_json::json!({ "type": "permanent" }))
            .await
            .unwrap();

        let err = repo
            .retry(Uuid::new_v4(), claimed[0].id, false)
            .await
            .unwrap_err();
        assert_eq!(err.status, axum::http::StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn reclaim_stale_returns_lost_jobs_to_pending() {
        let repo = setup().await;
        let seller_id = Uuid::new_v4();
        let connection_id = seed_connection(&repo, seller_id).await;

        repo.enqueue(new_job(seller_id, connection_id, job_type::ORDERS_SYNC))
            .await
            .unwrap();
        let claimed = repo.claim_batch(1).await.unwrap();
        let job_id = claimed[0].id;

        // Backdate the lease marker past the window
        let stale = (Utc::now() - Duration::seconds(1200)).fixed_offset();
        let mut active: sync_job::ActiveModel = claimed.into_iter().next().unwrap().into();
        active.started_at = Set(Some(stale));
        sea_orm::ActiveModelTrait::update(active, &*repo.db)
            .await
            .unwrap();

        let reclaimed = repo.reclaim_stale(900).await.unwrap();
        assert_eq!(reclaimed, 1);

        let job = repo.find_by_seller(seller_id, job_id).await.unwrap().unwrap();
        assert_eq!(job.status, status::PENDING);
        // History from the lost run is preserved
        assert_eq!(job.attempts, 1);
    }

    #[tokio::test]
    async fn reclaim_stale_leaves_fresh_leases_alone() {
        let repo = setup().await;
        let seller_id = Uuid::new_v4();
        let connection_id = seed_connection(&repo, seller_id).await;

        repo.enqueue(new_job(seller_id, connection_id, job_type::ORDERS_SYNC))
            .await
            .unwrap();
        repo.claim_batch(1).await.unwrap();

        assert_eq!(repo.reclaim_stale(900).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn list_by_seller_filters_and_paginates() {
        let repo = setup().await;
        let seller_id = Uuid::new_v4();
        let connection_id = seed_connection(&repo, seller_id).await;

        for _ in 0..3 {
            repo.enqueue(new_job(seller_id, connection_id, job_type::WEBHOOK_EVENT))
                .await
                .unwrap();
        }
        repo.enqueue(new_job(seller_id, connection_id, job_type::ORDERS_SYNC))
            .await
            .unwrap();

        let (all, _) = repo
            .list_by_seller(seller_id, JobFilters::default(), 10, None)
            .await
            .unwrap();
        assert_eq!(all.len(), 4);

        let (webhooks, _) = repo
            .list_by_seller(
                seller_id,
                JobFilters {
                    job_type: Some(job_type::WEBHOOK_EVENT.to_string()),
                    ..Default::default()
                },
                10,
                None,
            )
            .await
            .unwrap();
        assert_eq!(webhooks.len(), 3);

        let (scoped, _) = repo
            .list_by_seller(
                seller_id,
                JobFilters {
                    connection_id: Some(connection_id),
                    ..Default::default()
                },
                10,
                None,
            )
            .await
            .unwrap();
        assert_eq!(scoped.len(), 4);

        let (page_one, cursor) = repo
            .list_by_seller(seller_id, JobFilters::default(), 2, None)
            .await
            .unwrap();
        assert_eq!(page_one.len(), 2);
        let (page_two, cursor) = repo
            .list_by_seller(seller_id, JobFilters::default(), 2, cursor)
            .await
            .unwrap();
        assert_eq!(page_two.len(), 2);
        assert!(cursor.is_none());
    }

    #[tokio::test]
    async fn list_by_seller_rejects_unknown_job_type() {
        let repo = setup().await;
        let err = repo
            .list_by_seller(
                Uuid::new_v4(),
                JobFilters {
                    job_type: Some("bogus".to_string()),
                    ..Default::default()
                },
                10,
                None,
            )
            .await
            .unwrap_err();
        assert_eq!(err.status, axum::http::StatusCode::BAD_REQUEST);
    }
}
