//! Reconciler (spec.md §4.6): the singleton background job that, under the
//! distributed lock, retries exceptional transactions and escalates
//! exhausted ones to the Alerter.
//!
//! Tick loop grounded in `run_notification_poller`'s
//! `tokio::select! { sleep | shutdown }` shape; the lock-guarded sweep is
//! grounded in `ProbeScheduler`'s leader-gated background daemon pattern.

use crate::alerter::{Alert, Alerter};
use crate::config::ReconcilerConfig;
use crate::db::handlers::{RequestInfoRepo, SuccessStepRepo};
use crate::db::models::request_info::RequestInfo;
use crate::lock::{self, RECONCILER_LOCK_ID};
use crate::orchestrator::Orchestrator;
use crate::types::{RequestStatus, StepStatus};
use sqlx::PgPool;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

pub struct Reconciler {
    pool: PgPool,
    orchestrator: Orchestrator,
    alerter: Arc<dyn Alerter>,
    config: ReconcilerConfig,
}

impl Reconciler {
    pub fn new(pool: PgPool, orchestrator: Orchestrator, alerter: Arc<dyn Alerter>, config: ReconcilerConfig) -> Self {
        Self {
            pool,
            orchestrator,
            alerter,
            config,
        }
    }

    /// Runs ticks on `config.interval` until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(interval = ?self.config.interval, "starting reconciler");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.config.interval) => {}
                _ = shutdown.cancelled() => {
                    info!("reconciler shutting down");
                    return;
                }
            }

            self.tick().await;
        }
    }

    /// One reconciliation sweep (spec.md §4.6 steps 1-5).
    #[instrument(skip(self))]
    async fn tick(&self) {
        let guard = match lock::try_acquire(&self.pool, RECONCILER_LOCK_ID).await {
            Ok(Some(guard)) => guard,
            Ok(None) => {
                debug!("reconciliation lock held elsewhere, skipping tick");
                return;
            }
            Err(e) => {
                warn!("failed to attempt lock acquisition: {:#}", e);
                return;
            }
        };

        let exceptional = {
            let mut conn = match self.pool.acquire().await {
                Ok(conn) => conn,
                Err(e) => {
                    warn!("failed to acquire connection for reconciler sweep: {:#}", e);
                    let _ = guard.release().await;
                    return;
                }
            };
            match RequestInfoRepo::new(&mut conn).list_exceptional().await {
                Ok(rows) => rows,
                Err(e) => {
                    warn!("failed to list exceptional requests: {:#}", e);
                    let _ = guard.release().await;
                    return;
                }
            }
        };

        if exceptional.is_empty() {
            let _ = guard.release().await;
            return;
        }

        // Retry branch and alert branch run concurrently but both complete
        // before the lock is released (spec.md §4.6).
        let (retry_result, alert_result) = tokio::join!(self.retry_branch(&exceptional), self.alert_branch(&exceptional));

        if let Err(e) = retry_result {
            warn!("retry branch encountered an error: {:#}", e);
        }
        if let Err(e) = alert_result {
            warn!("alert branch encountered an error: {:#}", e);
        }

        let _ = guard.release().await;
    }

    /// For each exceptional row, replays the appropriate phase and bumps
    /// `times` regardless of outcome (spec.md §4.6 step 3).
    async fn retry_branch(&self, rows: &[RequestInfo]) -> anyhow::Result<()> {
        for row in rows {
            let result = match row.status {
                RequestStatus::ConfirmFailed => self.orchestrator.run_confirm_phase(row.id, &row.url).await,
                RequestStatus::CancelFailed => {
                    // Retry cancel only for steps not yet compensated — rows
                    // already flipped to `StepStatus::Cancel` by an earlier
                    // partial run must not be cancelled again.
                    let pending_indices = match self.pending_cancel_indices(row.id).await {
                        Ok(indices) => indices,
                        Err(e) => {
                            warn!("failed to load pending cancel indices for {}: {:#}", row.id, e);
                            continue;
                        }
                    };
                    self.orchestrator.run_cancel_phase(row.id, &row.url, &pending_indices).await
                }
                _ => {
                    // list_exceptional only returns ConfirmFailed/CancelFailed
                    // rows; any other status here would be a query bug.
                    warn!("request {} in list_exceptional has unexpected status {:?}", row.id, row.status);
                    continue;
                }
            };

            if let Err(e) = result {
                debug!("retry for request {} did not clear: {:#}", row.id, e);
            }

            let mut conn = self.pool.acquire().await?;
            RequestInfoRepo::new(&mut conn).increment_times(row.id).await?;
        }
        Ok(())
    }

    async fn pending_cancel_indices(&self, request_id: uuid::Uuid) -> anyhow::Result<Vec<i32>> {
        let mut conn = self.pool.acquire().await?;
        let steps = SuccessStepRepo::new(&mut conn).list_for_request(request_id).await?;
        Ok(steps.into_iter().filter(|s| s.status == StepStatus::Try).map(|s| s.index).collect())
    }

    /// Emits per-row alerts past the retry threshold and an aggregate alert
    /// if the exceptional count exceeds the configured maximum (spec.md §4.6
    /// step 4).
    async fn alert_branch(&self, rows: &[RequestInfo]) -> anyhow::Result<()> {
        for row in rows {
            if row.times >= self.config.retry_threshold && !matches!(row.is_send, crate::types::SendStatus::SendSuccess) {
                let alert = Alert::RequestExceededRetries {
                    request: row.clone(),
                    retry_threshold: self.config.retry_threshold,
                };
                match self.alerter.send(&alert).await {
                    Ok(()) => {
                        let mut conn = self.pool.acquire().await?;
                        RequestInfoRepo::new(&mut conn).mark_sent(row.id).await?;
                    }
                    Err(e) => warn!("failed to send alert for request {}: {:#}", row.id, e),
                }
            }
        }

        if rows.len() > self.config.max_exceptional_data {
            let alert = Alert::TooManyExceptionalRequests {
                count: rows.len(),
                threshold: self.config.max_exceptional_data,
            };
            if let Err(e) = self.alerter.send(&alert).await {
                warn!("failed to send aggregate exceptional-volume alert: {:#}", e);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerter::test_support::RecordingAlerter;
    use crate::participant::ParticipantClient;
    use crate::router::config_store::ConfigStore;
    use std::time::Duration as StdDuration;

    async fn seed_confirm_failed(pool: &PgPool, times: i32) -> uuid::Uuid {
        let id = uuid::Uuid::new_v4();
        sqlx::query(
            "INSERT INTO request_info (id, url, method, param, status, times, is_send) \
             VALUES ($1, '/order/:id/pay', 'POST', '{}', 2, $2, 0)",
        )
        .bind(id)
        .bind(times)
        .execute(pool)
        .await
        .unwrap();
        id
    }

    /// A row past the retry threshold produces exactly one alert and is
    /// marked sent so the next tick doesn't alert on it again (spec.md §4.6
    /// step 4).
    #[sqlx::test]
    #[test_log::test]
    async fn alerts_once_past_retry_threshold(pool: PgPool) {
        let id = seed_confirm_failed(&pool, 5).await;

        let router = ConfigStore::bootstrap(&pool).await.unwrap();
        let client = ParticipantClient::new().unwrap();
        let orchestrator = Orchestrator::new(pool.clone(), router, client);
        let alerter = Arc::new(RecordingAlerter::default());
        let config = ReconcilerConfig {
            interval: StdDuration::from_secs(3600),
            retry_threshold: 3,
            max_exceptional_data: 100,
        };
        let reconciler = Reconciler::new(pool.clone(), orchestrator, alerter.clone(), config);

        reconciler.tick().await;

        assert_eq!(alerter.sent.lock().unwrap().len(), 1);
        let is_send: i16 = sqlx::query_scalar("SELECT is_send FROM request_info WHERE id = $1")
            .bind(id)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(is_send, crate::types::SendStatus::SendSuccess as i16);

        reconciler.tick().await;
        assert_eq!(alerter.sent.lock().unwrap().len(), 1, "already-sent row must not alert again");
    }
}
