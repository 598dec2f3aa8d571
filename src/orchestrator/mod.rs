//! Transaction Orchestrator (spec.md §4.3): the per-inbound-request pipeline
//! and the background Confirm/Cancel phases it schedules.
//!
//! The synchronous front half (steps 1-5) is grounded in the
//! insert-then-schedule shape the teacher uses to hand work off to a
//! background phase; the background Confirm/Cancel phases are grounded in
//! `webhooks::dispatcher`'s independent-task-per-unit-of-work model, narrowed
//! here to one task per transaction rather than a pooled sender, since each
//! transaction's Confirm/Cancel calls must run in strict node order.

use crate::db::errors::DbError;
use crate::db::handlers::{RequestInfoRepo, SuccessStepRepo};
use crate::db::models::request_info::RequestInfoCreate;
use crate::db::models::success_step::SuccessStepCreate;
use crate::errors::Error;
use crate::participant::ParticipantClient;
use crate::router::config_store::ConfigStore;
use crate::router::{Node, RuntimeApi};
use crate::rewrite;
use crate::types::{CallOutcome, HttpMethod, Phase, RequestStatus, ResponseEnvelope, StepStatus};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Request metadata forwarded verbatim to every participant (spec.md §6).
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub path: String,
    pub method: HttpMethod,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

#[derive(Clone)]
pub struct Orchestrator {
    pool: PgPool,
    router: Arc<ConfigStore>,
    client: ParticipantClient,
}

impl Orchestrator {
    pub fn new(pool: PgPool, router: Arc<ConfigStore>, client: ParticipantClient) -> Self {
        Self { pool, router, client }
    }

    /// Runs the synchronous half of spec.md §4.3 (steps 1-5) and schedules
    /// whichever background phase applies. Returns the envelope the client
    /// sees; `Err` variants carry the `InsertTccDataErr`/`NotFound` codes via
    /// `Error::code`.
    #[instrument(skip(self, request), fields(path = %request.path, method = %request.method))]
    pub async fn handle_request(&self, request: InboundRequest) -> Result<ResponseEnvelope, Error> {
        // Step 1: persist request.
        let mut conn = self.pool.acquire().await.map_err(DbError::from)?;
        let request_info = RequestInfoRepo::new(&mut conn)
            .insert(&RequestInfoCreate {
                url: request.path.clone(),
                method: request.method,
                param: request.body.clone(),
            })
            .await?;
        drop(conn);

        // Step 2: resolve route.
        let runtime_api = self.router.lookup(&request.path).ok_or_else(|| Error::RouteNotFound { path: request.path.clone() })?;

        if runtime_api.nodes.is_empty() {
            // Spec.md §8: empty nodes[] is an inbound failure with no
            // SuccessStep inserted. Nothing was ever attempted, so there is
            // nothing to compensate; the row goes straight to Cancelled
            // rather than sitting in Trying forever.
            let mut conn = self.pool.acquire().await.map_err(DbError::from)?;
            RequestInfoRepo::new(&mut conn).update_status(request_info.id, RequestStatus::Cancelled).await?;
            return Err(Error::NoNodes);
        }

        // Step 3: Try phase.
        let try_result = self.run_try_phase(request_info.id, &request, &runtime_api).await;

        // Step 4: persist steps (bulk, atomic over the batch).
        let persisted = {
            let mut tx = self.pool.begin().await.map_err(DbError::from)?;
            let steps = SuccessStepRepo::new(&mut tx).batch_insert(&try_result.step_rows).await;
            match steps {
                Ok(steps) => {
                    tx.commit().await.map_err(DbError::from)?;
                    Ok(steps)
                }
                Err(e) => {
                    tx.rollback().await.ok();
                    Err(e)
                }
            }
        };

        // Step 5: branch.
        match (try_result.failure, persisted) {
            (None, Ok(_steps)) => {
                self.spawn_confirm(request_info.id, request.path.clone(), Phase::Confirm);
                Ok(ResponseEnvelope::success(None))
            }
            (failure, persisted) => {
                let cancel_indices: Vec<i32> = match &persisted {
                    Ok(steps) => steps.iter().map(|s| s.index).collect(),
                    Err(_) => try_result.step_rows.iter().map(|s| s.index).collect(),
                };
                self.spawn_cancel(request_info.id, request.path.clone(), cancel_indices);

                if let Err(persist_err) = persisted {
                    return Err(Error::Database(persist_err));
                }
                Err(failure.unwrap_or(Error::NoNodes))
            }
        }
    }

    async fn run_try_phase(&self, request_id: Uuid, request: &InboundRequest, runtime_api: &RuntimeApi) -> TryResult {
        let mut step_rows = Vec::with_capacity(runtime_api.nodes.len());
        let mut failure = None;

        for node in &runtime_api.nodes {
            let outcome = match self.call_node(request_id, request, node, &runtime_api.url_pattern, Phase::Try).await {
                Ok(outcome) => outcome,
                Err(rewrite_err) => {
                    failure = Some(rewrite_err);
                    break;
                }
            };

            let (result_bytes, resp, status_err) = match &outcome {
                CallOutcome::Success { raw, envelope } => (raw.clone(), Some(serde_json::to_value(envelope).unwrap_or_default()), None),
                CallOutcome::TransportFailed { raw, error } => (
                    raw.clone(),
                    None,
                    Some(Error::Transport {
                        url: format!("node {}", node.index),
                        message: error.clone(),
                    }),
                ),
                CallOutcome::Unparseable { raw, error } => (
                    raw.clone(),
                    None,
                    Some(Error::Protocol {
                        url: format!("node {}", node.index),
                        message: error.clone(),
                    }),
                ),
                CallOutcome::DomainFailed { raw, envelope } => (
                    raw.clone(),
                    Some(serde_json::to_value(envelope).unwrap_or_default()),
                    Some(Error::Domain {
                        url: format!("node {}", node.index),
                        envelope: envelope.clone(),
                    }),
                ),
            };

            step_rows.push(SuccessStepCreate {
                request_id,
                index: node.index,
                url: rewrite_url_best_effort(&runtime_api.url_pattern, &request.path, &node.try_call.url_template),
                method: node.try_call.method,
                param: request.body.clone(),
                result: result_bytes,
                status: StepStatus::Try,
                resp,
            });

            if let Some(err) = status_err {
                failure = Some(err);
                break;
            }
        }

        TryResult { step_rows, failure }
    }

    /// Computes the rewritten URL and issues one Try/Confirm/Cancel call.
    async fn call_node(&self, _request_id: Uuid, request: &InboundRequest, node: &Node, pattern: &str, phase: Phase) -> Result<CallOutcome, Error> {
        let call = match phase {
            Phase::Try => &node.try_call,
            Phase::Confirm => &node.confirm,
            Phase::Cancel => &node.cancel,
        };

        let bindings = rewrite::bind(pattern, &request.path)?;
        let url = rewrite::rewrite(&call.url_template, &bindings)?;
        let timeout = Duration::from_millis(call.timeout_ms);

        Ok(self.client.call(&url, call.method, &request.headers, &request.body, timeout).await)
    }

    /// Spawns the background Confirm phase (spec.md §4.3 step 6). Runs to
    /// completion independently of the inbound client's connection.
    fn spawn_confirm(&self, request_id: Uuid, path: String, _phase: Phase) {
        let orchestrator = self.clone();
        tokio::spawn(async move {
            if let Err(e) = orchestrator.run_confirm_phase(request_id, &path).await {
                error!("confirm phase failed for {}: {:#}", request_id, e);
            }
        });
    }

    /// Spawns the background Cancel phase (spec.md §4.3 step 7) over the
    /// given set of already-persisted step indices.
    fn spawn_cancel(&self, request_id: Uuid, path: String, cancel_indices: Vec<i32>) {
        let orchestrator = self.clone();
        tokio::spawn(async move {
            if let Err(e) = orchestrator.run_cancel_phase(request_id, &path, &cancel_indices).await {
                error!("cancel phase failed for {}: {:#}", request_id, e);
            }
        });
    }

    /// Replays Confirm for every node in order, using the *current* RuntimeApi
    /// (the reconciler and this phase must both tolerate the routing table
    /// having changed since Try ran).
    #[instrument(skip(self, path))]
    pub async fn run_confirm_phase(&self, request_id: Uuid, path: &str) -> anyhow::Result<()> {
        let runtime_api = self.router.lookup(path).ok_or_else(|| anyhow::anyhow!("route disappeared for {}", path))?;
        let request = self.load_request_for_replay(request_id).await?;

        for node in &runtime_api.nodes {
            let outcome = self.call_node(request_id, &request, node, &runtime_api.url_pattern, Phase::Confirm).await?;
            if !outcome.is_success() {
                warn!("confirm failed at node {} for request {}: {}", node.index, request_id, outcome.reason());
                let mut conn = self.pool.acquire().await?;
                RequestInfoRepo::new(&mut conn).update_status(request_id, RequestStatus::ConfirmFailed).await?;
                return Ok(());
            }

            let mut conn = self.pool.acquire().await?;
            RequestInfoRepo::new(&mut conn).mark_confirmed(request_id).await?;
        }

        let mut conn = self.pool.acquire().await?;
        RequestInfoRepo::new(&mut conn).update_status(request_id, RequestStatus::Committed).await?;
        info!("request {} committed", request_id);
        Ok(())
    }

    /// Replays Cancel over `cancel_indices` in order; on success marks each
    /// compensated step's status and the request `Cancelled`.
    #[instrument(skip(self, path, cancel_indices))]
    pub async fn run_cancel_phase(&self, request_id: Uuid, path: &str, cancel_indices: &[i32]) -> anyhow::Result<()> {
        let runtime_api = self.router.lookup(path).ok_or_else(|| anyhow::anyhow!("route disappeared for {}", path))?;
        let request = self.load_request_for_replay(request_id).await?;

        let mut conn = self.pool.acquire().await?;
        let steps = SuccessStepRepo::new(&mut conn).list_for_request(request_id).await?;
        drop(conn);

        for &index in cancel_indices {
            let Some(node) = runtime_api.nodes.iter().find(|n| n.index == index) else {
                warn!("no node at index {} for request {}, skipping cancel", index, request_id);
                continue;
            };

            let outcome = self.call_node(request_id, &request, node, &runtime_api.url_pattern, Phase::Cancel).await?;
            if !outcome.is_success() {
                warn!("cancel failed at node {} for request {}: {}", index, request_id, outcome.reason());
                let mut conn = self.pool.acquire().await?;
                RequestInfoRepo::new(&mut conn).update_status(request_id, RequestStatus::CancelFailed).await?;
                return Ok(());
            }

            if let Some(step) = steps.iter().find(|s| s.index == index) {
                let mut conn = self.pool.acquire().await?;
                SuccessStepRepo::new(&mut conn).update_status(request_id, step.id, StepStatus::Cancel).await?;
            }
        }

        let mut conn = self.pool.acquire().await?;
        RequestInfoRepo::new(&mut conn).update_status(request_id, RequestStatus::Cancelled).await?;
        info!("request {} cancelled", request_id);
        Ok(())
    }

    /// Reconstructs the `InboundRequest` shape a replay needs from the
    /// persisted row. Headers are not persisted (spec.md §3 does not name a
    /// headers field on `RequestInfo`), so replays forward an empty header
    /// set — acceptable because participants must be idempotent under retry
    /// of the same `(request_id, index, phase)` regardless of headers.
    async fn load_request_for_replay(&self, request_id: Uuid) -> anyhow::Result<InboundRequest> {
        let mut conn = self.pool.acquire().await?;
        let row = RequestInfoRepo::new(&mut conn).get_by_id(request_id).await?;
        Ok(InboundRequest {
            path: row.url,
            method: row.method,
            headers: Vec::new(),
            body: row.param,
        })
    }
}

struct TryResult {
    step_rows: Vec<SuccessStepCreate>,
    failure: Option<Error>,
}

fn rewrite_url_best_effort(pattern: &str, path: &str, template: &str) -> String {
    rewrite::bind(pattern, path)
        .and_then(|bindings| rewrite::rewrite(template, &bindings))
        .unwrap_or_else(|_| template.to_string())
}
