//! # Sync Scheduler
//!
//! Background task that evaluates active connections, applies jittered
//! intervals, and enqueues incremental pull jobs while maintaining
//! at-most-once semantics per connection. Cadence state is persisted in the
//! connection's sync metadata so restarts and multiple instances stay
//! coordinated; the partial unique index on open scheduled jobs is the
//! final arbiter when two schedulers race.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use metrics::{counter, gauge, histogram};
use rand::Rng;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use tokio::time::{Duration as TokioDuration, Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::config::{AppConfig, SchedulerConfig};
use crate::models::channel_connection::{
    self, Column as ConnectionColumn, Entity as ChannelConnection, Model as ConnectionModel,
    status as connection_status,
};
use crate::models::sync_job::{Column as SyncJobColumn, Entity as SyncJob, job_type, status};
use crate::repositories::oauth_state::OAuthStateRepository;
use crate::repositories::sync_job::{NewJob, SyncJobRepository};
use crate::repositories::sync_metadata::{ConnectionSyncMetadata, MIN_SYNC_INTERVAL_SECONDS};

/// Number of connections evaluated per tick.
const DEFAULT_BATCH_SIZE: usize = 128;

/// A full catalog refresh is enqueued once every this many order intervals.
const PRODUCTS_SYNC_MULTIPLIER: i64 = 8;

/// Background scheduler service.
pub struct SyncScheduler {
    config: Arc<AppConfig>,
    db: Arc<DatabaseConnection>,
    jobs: SyncJobRepository,
    oauth_states: OAuthStateRepository,
    batch_size: usize,
}

#[derive(Debug, Default)]
struct TickStats {
    connections_polled: u64,
    jobs_enqueued: u64,
    jobs_skipped_pending: u64,
    jobs_skipped_not_due: u64,
    backlog_connections: u64,
    connections_with_errors: u64,
}

#[derive(Debug, Clone)]
struct DueComputation {
    job_due: DateTime<Utc>,
    next_run_at: DateTime<Utc>,
    is_overdue: bool,
}

impl SyncScheduler {
    /// Create a new scheduler instance.
    pub fn new(config: Arc<AppConfig>, db: Arc<DatabaseConnection>) -> Self {
        Self {
            config,
            jobs: SyncJobRepository::new(db.clone()),
            oauth_states: OAuthStateRepository::new(db.clone()),
            db,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Override the number of connections processed per tick (primarily for tests).
    #[allow(dead_code)]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Run the scheduler loop until the provided shutdown token fires.
    #[instrument(skip_all)]
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            tick_interval_seconds = self.config.scheduler.tick_interval_seconds,
            default_interval_seconds = self.config.scheduler.default_interval_seconds,
            "Starting sync scheduler"
        );
        let tick_interval = TokioDuration::from_secs(self.config.scheduler.tick_interval_seconds);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Sync scheduler shutdown requested");
                    break;
                }
                _ = sleep(tick_interval) => {
                    let tick_started = Instant::now();
                    if let Err(err) = self.tick().await {
                        error!(error = ?err, "Scheduler tick failed");
                    }
                    histogram!("sync_scheduler_tick_duration_ms")
                        .record(tick_started.elapsed().as_secs_f64() * 1_000.0);
                }
            }
        }

        info!("Sync scheduler stopped");
    }

    /// One scheduling pass over active connections.
    pub async fn tick(&self) -> Result<(), anyhow::Error> {
        let now = Utc::now();
        let mut stats = TickStats::default();

        match self.oauth_states.cleanup_expired().await {
            Ok(removed) if removed > 0 => {
                debug!(removed, "Removed expired OAuth handshake states")
            }
            Ok(_) => {}
            Err(err) => warn!(error = %err, "OAuth state cleanup failed"),
        }

        let candidates = self.load_candidates().await?;

        for connection in candidates {
            let connection_id = connection.id;
            if let Err(err) = self.process_connection(connection, now, &mut stats).await {
                stats.connections_with_errors += 1;
                error!(
                    error = ?err,
                    connection_id = %connection_id,
                    "Failed to process connection for scheduling"
                );
            }
        }

        gauge!("sync_scheduler_backlog_gauge").set(stats.backlog_connections as f64);

        debug!(
            polled = stats.connections_polled,
            enqueued = stats.jobs_enqueued,
            skipped_pending = stats.jobs_skipped_pending,
            skipped_not_due = stats.jobs_skipped_not_due,
            errors = stats.connections_with_errors,
            backlog = stats.backlog_connections,
            "Scheduler tick completed"
        );

        Ok(())
    }

    /// Active connections ordered by how soon they are due.
    async fn load_candidates(&self) -> Result<Vec<ConnectionModel>, anyhow::Error> {
        let mut models = ChannelConnection::find()
            .filter(ConnectionColumn::Active.eq(true))
            .filter(ConnectionColumn::Status.eq(connection_status::CONNECTED))
            .order_by_asc(ConnectionColumn::CreatedAt)
            .limit((self.batch_size as u64).saturating_mul(4))
            .all(self.db.as_ref())
            .await?;

        models.sort_by_key(|connection| {
            let metadata =
                ConnectionSyncMetadata::from_connection_metadata(connection.metadata.as_ref());
            metadata
                .next_run_at
                .or(metadata.first_activated_at)
                .unwrap_or_else(|| connection.created_at.with_timezone(&Utc))
        });

        Ok(models.into_iter().take(self.batch_size).collect())
    }

    async fn process_connection(
        &self,
        connection: ConnectionModel,
        now: DateTime<Utc>,
        stats: &mut TickStats,
    ) -> Result<(), anyhow::Error> {
        stats.connections_polled += 1;

        let mut metadata =
            ConnectionSyncMetadata::from_connection_metadata(connection.metadata.as_ref());
        let mut metadata_dirty = metadata.sanitize_interval(&self.config.scheduler);

        if metadata.first_activated_at.is_none() {
            metadata.first_activated_at = Some(connection.created_at.with_timezone(&Utc));
            metadata_dirty = true;
        }

        let base_interval = metadata.effective_interval_seconds(&self.config.scheduler);
        if base_interval < MIN_SYNC_INTERVAL_SECONDS {
            warn!(
                connection_id = %connection.id,
                "Base interval smaller than minimum; using scheduler default"
            );
        }

        let pending_exists = self
            .jobs
            .find_open_for_connection(connection.id, job_type::ORDERS_SYNC)
            .await
            .map_err(|err| anyhow::anyhow!("pending check failed: {}", err.message))?
            .is_some();

        if pending_exists {
            stats.jobs_skipped_pending += 1;
            debug!(
                connection_id = %connection.id,
                "Skipping scheduling; open orders sync job exists"
            );
            if metadata_dirty {
                self.persist_metadata(&connection, &metadata).await?;
            }
            return Ok(());
        }

        let last_finished = self
            .last_completed_finished_at(connection.id, job_type::ORDERS_SYNC)
            .await?;

        let due = compute_due_times(
            &metadata,
            base_interval,
            last_finished,
            metadata
                .first_activated_at
                .unwrap_or_else(|| connection.created_at.with_timezone(&Utc)),
            now,
        );

        if now < due.job_due {
            stats.jobs_skipped_not_due += 1;
            if metadata_dirty {
                self.persist_metadata(&connection, &metadata).await?;
            }
            return Ok(());
        }

        let jitter_seconds = sample_jitter_seconds(&self.config.scheduler, base_interval);
        let scheduled_for = due
            .job_due
            .checked_add_signed(Duration::seconds(jitter_seconds as i64))
            .unwrap_or(now);

        metadata.next_run_at = Some(due.next_run_at);
        metadata.last_jitter_seconds = Some(jitter_seconds);
        metadata_dirty = true;

        let outcome = self
            .jobs
            .enqueue(NewJob {
                seller_id: connection.seller_id,
                connection_id: connection.id,
                channel_type: connection.channel_type.clone(),
                job_type: job_type::ORDERS_SYNC.to_string(),
                priority: 0,
                max_attempts: self.config.retry_policy.max_attempts as i32,
                payload: None,
                scheduled_for,
            })
            .await
            .map_err(|err| anyhow::anyhow!("enqueue failed: {}", err.message))?;

        if outcome.is_created() {
            stats.jobs_enqueued += 1;
            if due.is_overdue {
                stats.backlog_connections += 1;
            }
            info!(
                connection_id = %connection.id,
                channel_type = %connection.channel_type,
                base_interval_seconds = base_interval,
                jitter_seconds,
                scheduled_for = %scheduled_for,
                next_run_at = %due.next_run_at,
                "Enqueued scheduled orders sync"
            );
            counter!(
                "sync_scheduler_jobs_scheduled_total",
                "channel_type" => connection.channel_type.clone()
            )
            .increment(1);
            histogram!("sync_scheduler_jitter_seconds").record(jitter_seconds as f64);
        } else {
            // Another scheduler instance won the race
            stats.jobs_skipped_pending += 1;
        }

        if self
            .products_refresh_due(&connection, base_interval, now)
            .await?
        {
            let outcome = self
                .jobs
                .enqueue(NewJob {
                    seller_id: connection.seller_id,
                    connection_id: connection.id,
                    channel_type: connection.channel_type.clone(),
                    job_type: job_type::PRODUCTS_SYNC.to_string(),
                    priority: 0,
                    max_attempts: self.config.retry_policy.max_attempts as i32,
                    payload: None,
                    scheduled_for,
                })
                .await
                .map_err(|err| anyhow::anyhow!("enqueue failed: {}", err.message))?;
            if outcome.is_created() {
                stats.jobs_enqueued += 1;
                debug!(
                    connection_id = %connection.id,
                    "Enqueued scheduled products sync"
                );
            }
        }

        if metadata_dirty {
            self.persist_metadata(&connection, &metadata).await?;
        }

        Ok(())
    }

    /// Catalog refreshes run on a multiple of the order interval: due when no
    /// products sync has completed within the stretched window and none is open.
    async fn products_refresh_due(
        &self,
        connection: &ConnectionModel,
        base_interval: u64,
        now: DateTime<Utc>,
    ) -> Result<bool, anyhow::Error> {
        let open = self
            .jobs
            .find_open_for_connection(connection.id, job_type::PRODUCTS_SYNC)
            .await
            .map_err(|err| anyhow::anyhow!("pending check failed: {}", err.message))?;
        if open.is_some() {
            return Ok(false);
        }

        let window = Duration::seconds(base_interval as i64 * PRODUCTS_SYNC_MULTIPLIER);
        let last = self
            .last_completed_finished_at(connection.id, job_type::PRODUCTS_SYNC)
            .await?;

        Ok(match last {
            Some(finished) => finished + window <= now,
            None => true,
        })
    }

    async fn last_completed_finished_at(
        &self,
        connection_id: Uuid,
        kind: &str,
    ) -> Result<Option<DateTime<Utc>>, anyhow::Error> {
        let last_job = SyncJob::find()
            .filter(SyncJobColumn::ConnectionId.eq(connection_id))
            .filter(SyncJobColumn::JobType.eq(kind))
            .filter(SyncJobColumn::Status.eq(status::COMPLETED))
            .order_by_desc(SyncJobColumn::FinishedAt)
            .limit(1)
            .one(self.db.as_ref())
            .await?;

        Ok(last_job
            .and_then(|job| job.finished_at)
            .map(|dt| dt.with_timezone(&Utc)))
    }

    async fn persist_metadata(
        &self,
        connection: &ConnectionModel,
        metadata: &ConnectionSyncMetadata,
    ) -> Result<(), anyhow::Error> {
        let metadata_json = metadata.into_connection_metadata(connection.metadata.as_ref());
        let metadata_option = match metadata_json {
            serde_json::Value::Object(ref map) if map.is_empty() => None,
            value => Some(value),
        };

        let active = channel_connection::ActiveModel {
            id: Set(connection.id),
            metadata: Set(metadata_option),
            updated_at: Set(Utc::now().fixed_offset()),
            ..Default::default()
        };
        active.update(self.db.as_ref()).await?;

        Ok(())
    }
}

/// Pure cadence arithmetic: when the next job is due, and what the following
/// run marker should be. Catches up by rolling forward whole intervals so an
/// offline stretch produces one job, not a burst.
fn compute_due_times(
    metadata: &ConnectionSyncMetadata,
    base_interval_seconds: u64,
    last_finished: Option<DateTime<Utc>>,
    activation_reference: DateTime<Utc>,
    now: DateTime<Utc>,
) -> DueComputation {
    let base_interval = Duration::seconds(base_interval_seconds as i64);

    let mut next_due = metadata
        .next_run_at
        .or_else(|| last_finished.map(|finished| finished + base_interval))
        .unwrap_or(activation_reference + base_interval);

    let mut advanced = false;
    while next_due <= now {
        next_due += base_interval;
        advanced = true;
    }

    let job_due = if advanced {
        next_due - base_interval
    } else {
        next_due
    };

    let next_run_at = if advanced {
        next_due
    } else {
        next_due + base_interval
    };

    DueComputation {
        job_due,
        next_run_at,
        is_overdue: now > job_due,
    }
}

fn sample_jitter_seconds(config: &SchedulerConfig, base_interval_seconds: u64) -> u64 {
    let mut rng = rand::thread_rng();
    compute_jitter_seconds(config, base_interval_seconds, &mut rng)
}

fn compute_jitter_seconds<R: Rng + ?Sized>(
    config: &SchedulerConfig,
    base_interval_seconds: u64,
    rng: &mut R,
) -> u64 {
    let min = config.jitter_pct_min.max(0.0);
    let max = config.jitter_pct_max.max(min);

    if min == 0.0 && max == 0.0 {
        return 0;
    }

    let jitter_pct = if (max - min).abs() < f64::EPSILON {
        min
    } else {
        rng.gen_range(min..=max)
    };

    (base_interval_seconds as f64 * jitter_pct).round() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{SeedableRng, rngs::mock::StepRng};

    use migration::{Migrator, MigratorTrait};
    use sea_orm::Database;

    fn scheduler_config() -> SchedulerConfig {
        SchedulerConfig {
            tick_interval_seconds: 60,
            default_interval_seconds: 900,
            jitter_pct_min: 0.0,
            jitter_pct_max: 0.2,
            max_overridden_interval_seconds: 86400,
        }
    }

    #[test]
    fn jitter_respects_bounds() {
        let config = scheduler_config();
        let base_interval = 900;
        let mut rng = rand::rngs::StdRng::seed_from_u64(42);

        for _ in 0..100 {
            let jitter = compute_jitter_seconds(&config, base_interval, &mut rng);
            assert!(jitter <= (base_interval as f64 * config.jitter_pct_max).round() as u64);
            assert!(jitter >= (base_interval as f64 * config.jitter_pct_min).round() as u64);
        }
    }

    #[test]
    fn jitter_zero_when_bounds_zero() {
        let config = SchedulerConfig {
            jitter_pct_min: 0.0,
            jitter_pct_max: 0.0,
            ..scheduler_config()
        };
        let mut rng = StepRng::new(0, 1);
        assert_eq!(compute_jitter_seconds(&config, 600, &mut rng), 0);
    }

    #[test]
    fn compute_due_bootstrap() {
        let metadata = ConnectionSyncMetadata::default();
        let activation = DateTime::parse_from_rfc3339("2025-01-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let now = activation;
        let due = compute_due_times(&metadata, 900, None, activation, now);

        assert_eq!(due.job_due, activation + Duration::seconds(900));
        assert_eq!(due.next_run_at, activation + Duration::seconds(1800));
        assert!(!due.is_overdue);
    }

    #[test]
    fn compute_due_catch_up_advances_until_future() {
        let metadata = ConnectionSyncMetadata::default();
        let activation = DateTime::parse_from_rfc3339("2025-01-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let last_finished = Some(activation);
        let now = activation + Duration::minutes(20);
        let due = compute_due_times(&metadata, 900, last_finished, activation, now);

        assert_eq!(due.job_due, activation + Duration::minutes(15));
        assert_eq!(due.next_run_at, activation + Duration::minutes(30));
        assert!(due.is_overdue);
    }

    #[test]
    fn compute_due_steady_state_rolls_forward() {
        let metadata = ConnectionSyncMetadata {
            next_run_at: Some(
                DateTime::parse_from_rfc3339("2025-01-01T10:15:00Z")
                    .unwrap()
                    .with_timezone(&Utc),
            ),
            ..Default::default()
        };
        let activation = DateTime::parse_from_rfc3339("2025-01-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let now = DateTime::parse_from_rfc3339("2025-01-01T10:16:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let due = compute_due_times(&metadata, 900, None, activation, now);

        assert_eq!(
            due.job_due,
            DateTime::parse_from_rfc3339("2025-01-01T10:15:00Z")
                .unwrap()
                .with_timezone(&Utc)
        );
        assert_eq!(
            due.next_run_at,
            DateTime::parse_from_rfc3339("2025-01-01T10:30:00Z")
                .unwrap()
                .with_timezone(&Utc)
        );
        assert!(due.is_overdue);
    }

    async fn seed_connection(db: &Arc<DatabaseConnection>, activated_minutes_ago: i64) -> Uuid {
        let now = Utc::now();
        let activation = now - Duration::minutes(activated_minutes_ago);
        let model = channel_connection::ActiveModel {
            id: Set(Uuid::new_v4()),
            seller_id: Set(Uuid::new_v4()),
            channel_type: Set("shopify".to_string()),
            external_id: Set(Uuid::new_v4().to_string()),
            display_name: Set(None),
            store_url: Set(None),
            status: Set(connection_status::CONNECTED.to_string()),
            active: Set(true),
            access_token_ciphertext: Set(None),
            refresh_token_ciphertext: Set(None),
            api_key_ciphertext: Set(None),
            expires_at: Set(None),
            scopes: Set(None),
            metadata: Set(Some(serde_json::json!({
                "sync": {
                    "first_activated_at": activation.to_rfc3339(),
                    "interval_seconds": 900
                }
            }))),
            last_synced_at: Set(None),
            created_at: Set(activation.fixed_offset()),
            updated_at: Set(activation.fixed_offset()),
        };
        model.insert(db.as_ref()).await.unwrap().id
    }

    #[tokio::test]
    async fn overdue_connection_gets_orders_and_products_jobs() {
        let db = Arc::new(Database::connect("sqlite::memory:").await.unwrap());
        Migrator::up(db.as_ref(), None).await.unwrap();

        let connection_id = seed_connection(&db, 45).await;

        let mut config = AppConfig::default();
        config.scheduler.jitter_pct_min = 0.0;
        config.scheduler.jitter_pct_max = 0.0;

        let scheduler = SyncScheduler::new(Arc::new(config), db.clone());
        scheduler.tick().await.unwrap();

        let jobs = SyncJob::find()
            .filter(SyncJobColumn::ConnectionId.eq(connection_id))
            .all(db.as_ref())
            .await
            .unwrap();
        assert_eq!(jobs.len(), 2);
        assert!(jobs.iter().any(|j| j.job_type == job_type::ORDERS_SYNC));
        assert!(jobs.iter().any(|j| j.job_type == job_type::PRODUCTS_SYNC));

        let connection = ChannelConnection::find_by_id(connection_id)
            .one(db.as_ref())
            .await
            .unwrap()
            .unwrap();
        let metadata =
            ConnectionSyncMetadata::from_connection_metadata(connection.metadata.as_ref());
        assert!(metadata.next_run_at.unwrap() > Utc::now());
        assert_eq!(metadata.last_jitter_seconds, Some(0));
    }

    #[tokio::test]
    async fn second_tick_does_not_duplicate_open_jobs() {
        let db = Arc::new(Database::connect("sqlite::memory:").await.unwrap());
        Migrator::up(db.as_ref(), None).await.unwrap();

        let connection_id = seed_connection(&db, 45).await;

        let mut config = AppConfig::default();
        config.scheduler.jitter_pct_min = 0.0;
        config.scheduler.jitter_pct_max = 0.0;

        let scheduler = SyncScheduler::new(Arc::new(config), db.clone());
        scheduler.tick().await.unwrap();
        scheduler.tick().await.unwrap();

        let orders_jobs = SyncJob::find()
            .filter(SyncJobColumn::ConnectionId.eq(connection_id))
            .filter(SyncJobColumn::JobType.eq(job_type::ORDERS_SYNC))
            .all(db.as_ref())
            .await
            .unwrap();
        assert_eq!(orders_jobs.len(), 1, "no duplicate scheduled jobs");
    }

    #[tokio::test]
    async fn connection_inside_its_interval_is_left_alone() {
        let db = Arc::new(Database::connect("sqlite::memory:").await.unwrap());
        Migrator::up(db.as_ref(), None).await.unwrap();

        // Activated two minutes ago; first pull is due at 15 minutes
        let connection_id = seed_connection(&db, 2).await;

        let scheduler = SyncScheduler::new(Arc::new(AppConfig::default()), db.clone());
        scheduler.tick().await.unwrap();

        let orders_jobs = SyncJob::find()
            .filter(SyncJobColumn::ConnectionId.eq(connection_id))
            .filter(SyncJobColumn::JobType.eq(job_type::ORDERS_SYNC))
            .all(db.as_ref())
            .await
            .unwrap();
        assert!(orders_jobs.is_empty());
    }

    #[tokio::test]
    async fn inactive_and_errored_connections_are_skipped() {
        let db = Arc::new(Database::connect("sqlite::memory:").await.unwrap());
        Migrator::up(db.as_ref(), None).await.unwrap();

        let connection_id = seed_connection(&db, 45).await;
        let connection = ChannelConnection::find_by_id(connection_id)
            .one(db.as_ref())
            .await
            .unwrap()
            .unwrap();
        let mut active: channel_connection::ActiveModel = connection.into();
        active.status = Set(connection_status::ERROR.to_string());
        active.update(db.as_ref()).await.unwrap();

        let scheduler = SyncScheduler::new(Arc::new(AppConfig::default()), db.clone());
        scheduler.tick().await.unwrap();

        let jobs = SyncJob::find()
            .filter(SyncJobColumn::ConnectionId.eq(connection_id))
            .all(db.as_ref())
            .await
            .unwrap();
        assert!(jobs.is_empty());
    }
}
