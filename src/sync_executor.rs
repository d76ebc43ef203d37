//! # Sync Executor
//!
//! Background worker that drains the sync job queue. Each tick reclaims
//! stale leases, claims a batch of due jobs, and runs them concurrently up
//! to the configured limit. Job bodies execute under a hard wall-clock
//! timeout; failures are classified and either rescheduled with
//! exponential backoff or marked terminally failed.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use metrics::{counter, histogram};
use rand::Rng;
use sea_orm::DatabaseConnection;
use serde_json::{Value as JsonValue, json};
use tokio::sync::Semaphore;
use tokio::time::{Duration as TokioDuration, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::adapters::{
    AdapterContext, ChannelAdapter, Registry, SyncCursor, SyncError, SyncErrorKind,
};
use crate::config::{AppConfig, RetryPolicyConfig};
use crate::crypto::CryptoKey;
use crate::models::channel_connection;
use crate::models::job_run_log::status as run_status;
use crate::models::sync_job::{self, job_type};
use crate::repositories::channel_order::{ChannelOrderRepository, OrderUpsert, UpsertOutcome};
use crate::repositories::connection::ConnectionRepository;
use crate::repositories::inventory_event::{InventoryEvent, InventoryEventRepository};
use crate::repositories::job_run_log::{JobRunLogRepository, RunCounts};
use crate::repositories::product_mapping::{MappingUpsert, ProductMappingRepository};
use crate::repositories::sync_job::{NewJob, SyncJobRepository};
use crate::repositories::sync_metadata::ConnectionSyncMetadata;
use crate::token_refresh::{RefreshError, TokenRefreshService};

/// What a successful job body hands back to the executor.
#[derive(Debug, Default)]
struct JobOutput {
    counts: RunCounts,
    next_cursor: Option<SyncCursor>,
    has_more: bool,
}

/// Worker that claims and executes queued sync jobs.
#[derive(Clone)]
pub struct SyncExecutor {
    config: Arc<AppConfig>,
    registry: Arc<Registry>,
    token_refresh: Arc<TokenRefreshService>,
    jobs: SyncJobRepository,
    connections: ConnectionRepository,
    orders: ChannelOrderRepository,
    mappings: ProductMappingRepository,
    inventory_events: InventoryEventRepository,
    run_logs: JobRunLogRepository,
    semaphore: Arc<Semaphore>,
}

impl SyncExecutor {
    pub fn new(
        config: Arc<AppConfig>,
        registry: Arc<Registry>,
        token_refresh: Arc<TokenRefreshService>,
        db: Arc<DatabaseConnection>,
        crypto_key: CryptoKey,
    ) -> Self {
        let concurrency = config.worker.concurrency.max(1) as usize;
        Self {
            registry,
            token_refresh,
            jobs: SyncJobRepository::new(db.clone()),
            connections: ConnectionRepository::new(db.clone(), crypto_key),
            orders: ChannelOrderRepository::new(db.clone()),
            mappings: ProductMappingRepository::new(db.clone()),
            inventory_events: InventoryEventRepository::new(db.clone()),
            run_logs: JobRunLogRepository::new(db),
            semaphore: Arc::new(Semaphore::new(concurrency)),
            config,
        }
    }

    /// Run the claim loop until the shutdown token fires.
    #[instrument(skip_all)]
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            tick_ms = self.config.worker.tick_ms,
            concurrency = self.config.worker.concurrency,
            claim_batch = self.config.worker.claim_batch,
            "Starting sync executor"
        );
        let tick = TokioDuration::from_millis(self.config.worker.tick_ms.max(10));

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Sync executor shutdown requested");
                    break;
                }
                _ = sleep(tick) => {
                    let started = std::time::Instant::now();
                    if let Err(err) = self
                        .jobs
                        .reclaim_stale(self.config.worker.lease_seconds)
                        .await
                    {
                        error!(error = %err.message, "Stale job reclaim failed");
                    }
                    if let Err(err) = self.claim_and_run_jobs().await {
                        error!(error = %err, "Job claim pass failed");
                    }
                    histogram!("sync_executor_tick_duration_ms")
                        .record(started.elapsed().as_secs_f64() * 1_000.0);
                }
            }
        }

        info!("Sync executor stopped");
    }

    /// Claim due jobs and spawn them onto the worker pool.
    async fn claim_and_run_jobs(&self) -> Result<(), anyhow::Error> {
        let claimed = self
            .jobs
            .claim_batch(self.config.worker.claim_batch)
            .await
            .map_err(|err| anyhow::anyhow!("claim failed: {}", err.message))?;

        if claimed.is_empty() {
            return Ok(());
        }

        debug!(count = claimed.len(), "Claimed sync jobs");
        counter!("sync_jobs_claimed_total").increment(claimed.len() as u64);

        for job in claimed {
            let permit = match self.semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let executor = self.clone();
            tokio::spawn(async move {
                executor.process(job).await;
                drop(permit);
            });
        }

        Ok(())
    }

    /// Run one claimed job to a terminal or rescheduled state.
    #[instrument(skip_all, fields(
        job_id = %job.id,
        job_type = %job.job_type,
        channel_type = %job.channel_type,
        attempt = job.attempts,
    ))]
    pub async fn process(&self, job: sync_job::Model) {
        let started = std::time::Instant::now();

        let run = match self
            .run_logs
            .start_run(
                Some(job.id),
                &job.job_type,
                Some(json!({
                    "channel_type": job.channel_type,
                    "connection_id": job.connection_id,
                    "attempt": job.attempts,
                })),
            )
            .await
        {
            Ok(run) => Some(run),
            Err(err) => {
                error!(error = %err.message, "Failed to open run log entry");
                None
            }
        };

        match self.attempt(&job).await {
            Ok(output) => {
                self.handle_success(&job, &output).await;
                if let Some(run) = run
                    && let Err(err) = self
                        .run_logs
                        .finalize(run.id, run_status::COMPLETED, output.counts, None)
                        .await
                {
                    error!(error = %err.message, "Failed to finalize run log entry");
                }
            }
            Err(sync_error) => {
                self.handle_failure(&job, &sync_error).await;
                if let Some(run) = run
                    && let Err(err) = self
                        .run_logs
                        .finalize(
                            run.id,
                            run_status::FAILED,
                            RunCounts::default(),
                            Some(sync_error.to_string()),
                        )
                        .await
                {
                    error!(error = %err.message, "Failed to finalize run log entry");
                }
            }
        }

        histogram!("sync_job_duration_ms", "job_type" => job.job_type.clone())
            .record(started.elapsed().as_secs_f64() * 1_000.0);
    }

    /// Run the job body, with a single forced token refresh and immediate
    /// retry when the channel rejects the current credentials.
    async fn attempt(&self, job: &sync_job::Model) -> Result<JobOutput, SyncError> {
        if !job_type::ALL.contains(&job.job_type.as_str()) {
            return Err(SyncError::permanent(format!(
                "unknown job type '{}'",
                job.job_type
            )));
        }

        let connection = self
            .connections
            .get_by_id(&job.connection_id)
            .await
            .map_err(|err| SyncError::transient(err.to_string()))?
            .ok_or_else(|| {
                SyncError::permanent(format!("connection '{}' not found", job.connection_id))
            })?;

        match self.attempt_once(job, &connection).await {
            Err(err) if matches!(err.kind, SyncErrorKind::Unauthorized) => {
                warn!("Channel rejected credentials, forcing a token refresh");
                match self.token_refresh.refresh_on_demand(&job.connection_id).await {
                    Ok(refreshed) => self.attempt_once(job, &refreshed).await,
                    Err(refresh_err) => Err(refresh_to_sync(refresh_err)),
                }
            }
            other => other,
        }
    }

    /// One execution of the job body under the run-time limit.
    async fn attempt_once(
        &self,
        job: &sync_job::Model,
        connection: &channel_connection::Model,
    ) -> Result<JobOutput, SyncError> {
        let limit = TokioDuration::from_secs(self.config.worker.max_run_seconds);
        match tokio::time::timeout(limit, self.execute_job(job, connection)).await {
            Ok(result) => result,
            Err(_) => Err(SyncError::transient(format!(
                "job exceeded the {}s run limit",
                self.config.worker.max_run_seconds
            ))),
        }
    }

    async fn execute_job(
        &self,
        job: &sync_job::Model,
        connection: &channel_connection::Model,
    ) -> Result<JobOutput, SyncError> {
        match job.job_type.as_str() {
            job_type::ORDERS_SYNC => self.run_orders_sync(job, connection).await,
            // Webhook events reconcile by pulling the authoritative order
            // state; the fast-path upsert already happened at ingestion.
            job_type::WEBHOOK_EVENT => self.run_orders_sync(job, connection).await,
            job_type::PRODUCTS_SYNC => self.run_products_sync(job, connection).await,
            job_type::INVENTORY_SYNC => self.run_inventory_sync(job, connection).await,
            other => Err(SyncError::permanent(format!("unknown job type '{}'", other))),
        }
    }

    /// Build the channel adapter with freshly validated credentials.
    async fn build_adapter(
        &self,
        connection: &channel_connection::Model,
    ) -> Result<Box<dyn ChannelAdapter>, SyncError> {
        let secrets = self
            .token_refresh
            .get_valid_secrets(connection)
            .await
            .map_err(refresh_to_sync)?;

        let ctx = AdapterContext {
            external_id: connection.external_id.clone(),
            store_url: connection.store_url.clone(),
            access_token: secrets.access_token,
            api_key: secrets.api_key,
            metadata: connection.metadata.clone().unwrap_or(JsonValue::Null),
        };

        Ok(self.registry.build_adapter(&connection.channel_type, ctx)?)
    }

    /// Pull one page of orders and upsert them into the ledger.
    async fn run_orders_sync(
        &self,
        job: &sync_job::Model,
        connection: &channel_connection::Model,
    ) -> Result<JobOutput, SyncError> {
        let adapter = self.build_adapter(connection).await?;
        let sync_meta = ConnectionSyncMetadata::from_connection_metadata(connection.metadata.as_ref());

        let page = adapter.fetch_orders(sync_meta.cursor.as_ref()).await?;

        let mut counts = RunCounts::default();
        for order in page.orders {
            let currency = if order.currency_defaulted {
                self.registry
                    .default_currency(&connection.channel_type)
                    .to_string()
            } else {
                order.currency.clone()
            };

            let upsert = OrderUpsert {
                seller_id: job.seller_id,
                connection_id: connection.id,
                channel_order_id: order.id.clone(),
                channel_order_number: order.order_number.clone(),
                status: order.status.as_str().to_string(),
                total_amount: order.total.clone(),
                currency,
                customer_email: order.customer_email.clone(),
                raw_payload: order.raw.clone(),
                channel_updated_at: order.updated_at.or(order.created_at),
            };

            match self.orders.upsert(upsert).await {
                Ok(UpsertOutcome::Inserted) => {
                    counts.activated += 1;
                    counts.processed += 1;
                }
                Ok(_) => counts.processed += 1,
                Err(err) => {
                    counts.failed += 1;
                    warn!(
                        channel_order_id = %order.id,
                        error = %err,
                        "Order upsert failed"
                    );
                }
            }
        }

        Ok(JobOutput {
            counts,
            next_cursor: page.next_cursor,
            has_more: page.has_more,
        })
    }

    /// Refresh the product mapping table from the channel catalog.
    async fn run_products_sync(
        &self,
        job: &sync_job::Model,
        connection: &channel_connection::Model,
    ) -> Result<JobOutput, SyncError> {
        let adapter = self.build_adapter(connection).await?;
        let products = adapter.fetch_products().await?;

        let mut counts = RunCounts::default();
        for product in &products {
            counts.processed += 1;

            let created = self
                .refresh_mapping(
                    job,
                    connection,
                    &product.id,
                    "",
                    product.sku.as_deref(),
                    product.price.as_deref(),
                    product.stock_quantity,
                )
                .await?;
            if created {
                counts.activated += 1;
            }

            for variant in &product.variants {
                let created = self
                    .refresh_mapping(
                        job,
                        connection,
                        &product.id,
                        &variant.id,
                        variant.sku.as_deref(),
                        variant.price.as_deref(),
                        variant.stock,
                    )
                    .await?;
                if created {
                    counts.activated += 1;
                }
            }
        }

        Ok(JobOutput {
            counts,
            next_cursor: None,
            has_more: false,
        })
    }

    /// Create or update one mapping row and record the observed listing state.
    /// Existing rows keep their operator-set price and inventory flags.
    async fn refresh_mapping(
        &self,
        job: &sync_job::Model,
        connection: &channel_connection::Model,
        channel_product_id: &str,
        channel_variant_id: &str,
        sku: Option<&str>,
        price: Option<&str>,
        stock: Option<i64>,
    ) -> Result<bool, SyncError> {
        let existing = self
            .mappings
            .find_by_natural_key(&connection.id, channel_product_id, channel_variant_id)
            .await
            .map_err(|err| SyncError::transient(err.to_string()))?;

        let (mapping_id, created) = match existing {
            Some(mapping) => (mapping.id, false),
            None => {
                let mapping = self
                    .mappings
                    .upsert(MappingUpsert {
                        seller_id: job.seller_id,
                        connection_id: connection.id,
                        product_id: uuid::Uuid::new_v4(),
                        channel_product_id: channel_product_id.to_string(),
                        channel_variant_id: channel_variant_id.to_string(),
                        channel_sku: sku.map(str::to_string),
                        price_multiplier: 1.0,
                        price_offset: 0.0,
                        sync_price: true,
                        sync_inventory: true,
                    })
                    .await
                    .map_err(|err| SyncError::transient(err.to_string()))?;
                (mapping.id, true)
            }
        };

        self.mappings
            .record_observed_state(
                &mapping_id,
                price.map(str::to_string),
                stock.and_then(|qty| i32::try_from(qty).ok()),
            )
            .await
            .map_err(|err| SyncError::transient(err.to_string()))?;

        Ok(created)
    }

    /// Reconcile observed channel stock levels against tracked mappings.
    async fn run_inventory_sync(
        &self,
        job: &sync_job::Model,
        connection: &channel_connection::Model,
    ) -> Result<JobOutput, SyncError> {
        let tracked = self
            .mappings
            .find_inventory_synced(&connection.id)
            .await
            .map_err(|err| SyncError::transient(err.to_string()))?;

        if tracked.is_empty() {
            return Ok(JobOutput::default());
        }

        let adapter = self.build_adapter(connection).await?;
        let products = adapter.fetch_products().await?;

        let mut observed: HashMap<(String, String), Option<i64>> = HashMap::new();
        for product in &products {
            observed.insert((product.id.clone(), String::new()), product.stock_quantity);
            for variant in &product.variants {
                observed.insert((product.id.clone(), variant.id.clone()), variant.stock);
            }
        }

        let mut counts = RunCounts::default();
        for mapping in tracked {
            counts.processed += 1;
            let key = (
                mapping.channel_product_id.clone(),
                mapping.channel_variant_id.clone(),
            );

            match observed.get(&key).copied().flatten() {
                Some(qty) => {
                    let qty = i32::try_from(qty).unwrap_or(i32::MAX);
                    if mapping.last_stock != Some(qty) {
                        counts.activated += 1;
                    }
                    self.mappings
                        .record_observed_state(&mapping.id, None, Some(qty))
                        .await
                        .map_err(|err| SyncError::transient(err.to_string()))?;
                    self.inventory_events
                        .record(InventoryEvent {
                            seller_id: job.seller_id,
                            connection_id: connection.id,
                            mapping_id: Some(mapping.id),
                            direction: crate::models::inventory_sync_event::direction::PULL
                                .to_string(),
                            quantity_before: mapping.last_stock,
                            quantity_after: Some(qty),
                            status: "ok".to_string(),
                            error_message: None,
                        })
                        .await
                        .map_err(|err| SyncError::transient(err.to_string()))?;
                }
                None => {
                    counts.failed += 1;
                    self.inventory_events
                        .record(InventoryEvent {
                            seller_id: job.seller_id,
                            connection_id: connection.id,
                            mapping_id: Some(mapping.id),
                            direction: crate::models::inventory_sync_event::direction::PULL
                                .to_string(),
                            quantity_before: mapping.last_stock,
                            quantity_after: None,
                            status: "missing".to_string(),
                            error_message: Some(
                                "listing not present in channel catalog".to_string(),
                            ),
                        })
                        .await
                        .map_err(|err| SyncError::transient(err.to_string()))?;
                }
            }
        }

        Ok(JobOutput {
            counts,
            next_cursor: None,
            has_more: false,
        })
    }

    /// Persist the completed job, advance the connection cursor, and chain a
    /// follow-up page when the channel reported more data.
    async fn handle_success(&self, job: &sync_job::Model, output: &JobOutput) {
        let cursor_json = output.next_cursor.as_ref().map(|c| c.as_json().clone());

        if let Err(err) = self.jobs.mark_completed(job.id, cursor_json).await {
            error!(error = %err.message, "Failed to mark job completed");
            return;
        }

        if let Some(cursor) = &output.next_cursor
            && let Err(err) = self.advance_cursor(job, cursor).await
        {
            warn!(error = %err, "Failed to persist sync cursor");
        }

        if let Err(err) = self.connections.touch_last_synced(&job.connection_id).await {
            warn!(error = %err, "Failed to update last_synced_at");
        }

        if output.has_more && job.job_type == job_type::ORDERS_SYNC {
            let follow_up = NewJob {
                seller_id: job.seller_id,
                connection_id: job.connection_id,
                channel_type: job.channel_type.clone(),
                job_type: job.job_type.clone(),
                priority: job.priority,
                max_attempts: job.max_attempts,
                payload: None,
                scheduled_for: Utc::now(),
            };
            match self.jobs.enqueue(follow_up).await {
                Ok(outcome) => {
                    debug!(
                        follow_up_job_id = %outcome.job().id,
                        created = outcome.is_created(),
                        "Chained follow-up page job"
                    );
                }
                Err(err) => warn!(error = %err.message, "Failed to chain follow-up job"),
            }
        }

        counter!("sync_jobs_completed_total", "job_type" => job.job_type.clone()).increment(1);
        info!(
            processed = output.counts.processed,
            activated = output.counts.activated,
            failed = output.counts.failed,
            has_more = output.has_more,
            "Sync job completed"
        );
    }

    /// Store the advanced cursor inside the connection's sync metadata so the
    /// next scheduled pull resumes where this one stopped.
    async fn advance_cursor(
        &self,
        job: &sync_job::Model,
        cursor: &SyncCursor,
    ) -> Result<(), anyhow::Error> {
        let Some(connection) = self.connections.get_by_id(&job.connection_id).await? else {
            return Ok(());
        };

        let mut sync_meta =
            ConnectionSyncMetadata::from_connection_metadata(connection.metadata.as_ref());
        sync_meta.cursor = Some(cursor.clone());
        let updated = sync_meta.into_connection_metadata(connection.metadata.as_ref());

        self.connections
            .update_by_id(
                &job.seller_id,
                &job.connection_id,
                channel_connection::ActiveModel {
                    metadata: sea_orm::Set(Some(updated)),
                    ..Default::default()
                },
            )
            .await?;

        Ok(())
    }

    /// Reschedule the job with backoff or mark it terminally failed.
    async fn handle_failure(&self, job: &sync_job::Model, sync_error: &SyncError) {
        let error_json = serde_json::to_value(sync_error)
            .unwrap_or_else(|_| json!({ "type": "permanent", "message": "unserializable error" }));

        let permanent = matches!(sync_error.kind, SyncErrorKind::Permanent);
        let exhausted = job.attempts >= job.max_attempts;

        if permanent || exhausted {
            counter!("sync_jobs_failed_total", "job_type" => job.job_type.clone()).increment(1);
            error!(
                error = %sync_error,
                attempts = job.attempts,
                max_attempts = job.max_attempts,
                "Sync job failed terminally"
            );
            if let Err(err) = self.jobs.mark_failed(job.id, error_json).await {
                error!(error = %err.message, "Failed to mark job failed");
            }
            return;
        }

        let backoff_seconds = calculate_backoff(
            sync_error,
            job.attempts,
            &job.channel_type,
            &self.config.retry_policy,
        );
        let next_run = Utc::now() + Duration::seconds(backoff_seconds as i64);

        counter!("sync_jobs_retried_total", "job_type" => job.job_type.clone()).increment(1);
        warn!(
            error = %sync_error,
            attempts = job.attempts,
            backoff_seconds,
            "Sync job failed, rescheduling"
        );

        if let Err(err) = self.jobs.reschedule(job.id, next_run, error_json).await {
            error!(error = %err.message, "Failed to reschedule job");
        }
    }
}

/// Map a token refresh failure into the sync error vocabulary.
fn refresh_to_sync(err: RefreshError) -> SyncError {
    match err {
        RefreshError::RateLimited { retry_after } => SyncError::rate_limited(retry_after),
        other if other.is_permanent() => {
            SyncError::permanent(format!("token refresh failed: {}", other))
        }
        other => SyncError::transient(format!("token refresh failed: {}", other)),
    }
}

/// Delay in seconds before the next attempt.
///
/// Exponential from the channel's base, capped at the channel's maximum,
/// floored at any server-provided Retry-After, plus proportional jitter.
fn calculate_backoff(
    sync_error: &SyncError,
    attempts: i32,
    channel_type: &str,
    policy: &RetryPolicyConfig,
) -> u64 {
    let overrides = policy.channel_overrides.get(channel_type);
    let base = overrides
        .and_then(|o| o.base_seconds)
        .unwrap_or(policy.base_seconds)
        .max(1);
    let max = overrides
        .and_then(|o| o.max_seconds)
        .unwrap_or(policy.max_seconds)
        .max(base);
    let jitter_factor = overrides
        .and_then(|o| o.jitter_factor)
        .unwrap_or(policy.jitter_factor)
        .clamp(0.0, 1.0);

    let exponent = attempts.max(1) as u32 - 1;
    let mut delay = base.saturating_mul(2u64.saturating_pow(exponent)).min(max);

    if let SyncErrorKind::RateLimited {
        retry_after_secs: Some(retry_after),
    } = sync_error.kind
    {
        delay = delay.max(retry_after);
    }

    if jitter_factor > 0.0 {
        let max_jitter = (delay as f64 * jitter_factor).ceil() as u64;
        if max_jitter > 0 {
            delay += rand::thread_rng().gen_range(0..=max_jitter);
        }
    }

    delay
}
