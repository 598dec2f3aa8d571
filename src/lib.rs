//! # tcc-coordinator
//!
//! A Try-Confirm-Cancel transaction coordinator: a single HTTP front door that
//! accepts a request, fans it out as a `Try` call to every participant node
//! named by the matching `RuntimeApi`, then asynchronously drives the
//! transaction to `Confirm` or `Cancel` while persisting every step for
//! crash recovery.
//!
//! ## Architecture
//!
//! Inbound requests land on [`api::handlers::handle_tcc_request`], which asks
//! the [`orchestrator::Orchestrator`] to run the synchronous Try phase and
//! schedule the background Confirm/Cancel phase. The [`router::config_store::ConfigStore`]
//! keeps the `url_pattern -> RuntimeApi` table current via Postgres
//! LISTEN/NOTIFY. The [`reconciler::Reconciler`] runs under a distributed
//! advisory lock, retrying transactions stuck in `ConfirmFailed`/`CancelFailed`
//! and alerting the operator once a transaction exceeds its retry budget.
//!
//! ## Quick Start
//!
//! ```no_run
//! use clap::Parser;
//! use tcc_coordinator::{Application, config::{Args, Config}};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = Args::parse();
//!     let config = Config::load(&args)?;
//!     tcc_coordinator::telemetry::init_telemetry()?;
//!
//!     let app = Application::new(config).await?;
//!     app.serve(async {
//!         tokio::signal::ctrl_c().await.expect("failed to listen for ctrl_c");
//!     }).await?;
//!
//!     Ok(())
//! }
//! ```

pub mod alerter;
pub mod api;
pub mod config;
pub mod db;
pub mod errors;
pub mod lock;
pub mod orchestrator;
pub mod participant;
pub mod reconciler;
pub mod rewrite;
pub mod router;
pub mod telemetry;
pub mod types;

use alerter::EmailAlerter;
use anyhow::Context;
use api::{AppState, build_router};
use axum::Router;
use orchestrator::Orchestrator;
use participant::ParticipantClient;
use reconciler::Reconciler;
use router::config_store::ConfigStore;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Returns the coordinator's embedded migrator (spec.md §4.4's schema, plus
/// the `runtime_api_configs` table and its NOTIFY trigger).
pub fn migrator() -> sqlx::migrate::Migrator {
    sqlx::migrate!("./migrations")
}

async fn connect_pool(config: &config::Config) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.database.pool.max_connections)
        .min_connections(config.database.pool.min_connections)
        .acquire_timeout(std::time::Duration::from_secs(config.database.pool.acquire_timeout_secs))
        .connect(&config.database.url)
        .await
        .context("failed to connect to database")?;

    migrator().run(&pool).await.context("failed to run migrations")?;

    Ok(pool)
}

/// Background watcher/reconciler tasks, tracked so [`Application::serve`]
/// can race the HTTP server against any of them exiting unexpectedly.
///
/// Grounded in `BackgroundServices`' join-set-plus-shutdown-token shape,
/// narrowed to this coordinator's two tasks (config watcher, reconciler).
struct BackgroundServices {
    tasks: tokio::task::JoinSet<()>,
    shutdown_token: CancellationToken,
    #[allow(dead_code)]
    drop_guard: tokio_util::sync::DropGuard,
}

impl BackgroundServices {
    async fn wait_for_failure(&mut self) -> anyhow::Result<std::convert::Infallible> {
        match self.tasks.join_next().await {
            None => {
                std::future::pending::<()>().await;
                unreachable!()
            }
            Some(Ok(())) => anyhow::bail!("a background task exited unexpectedly"),
            Some(Err(e)) => anyhow::bail!("a background task panicked: {e}"),
        }
    }

    async fn shutdown(mut self) {
        self.shutdown_token.cancel();
        while let Some(result) = self.tasks.join_next().await {
            if let Err(e) = result {
                error!("background task panicked during shutdown: {e}");
            }
        }
    }
}

/// Top-level container owning the HTTP router, database pool, and background
/// services for their full process lifetime.
pub struct Application {
    router: Router,
    config: config::Config,
    pool: PgPool,
    bg_services: BackgroundServices,
}

impl Application {
    /// Connects to Postgres, runs migrations, bootstraps the routing table,
    /// and wires the HTTP router and background services together.
    pub async fn new(config: config::Config) -> anyhow::Result<Self> {
        Self::new_with_pool(config, None).await
    }

    /// As [`Application::new`], but reuses an existing pool — the shape
    /// `sqlx::test` hands integration tests.
    pub async fn new_with_pool(config: config::Config, pool: Option<PgPool>) -> anyhow::Result<Self> {
        let pool = match pool {
            Some(pool) => pool,
            None => connect_pool(&config).await?,
        };

        let router = ConfigStore::bootstrap(&pool).await.context("failed initial load of runtime api configs")?;

        let client = ParticipantClient::new()?;
        let orchestrator = Orchestrator::new(pool.clone(), router.clone(), client);

        let shutdown_token = CancellationToken::new();
        let mut tasks = tokio::task::JoinSet::new();

        let _status_rx = router.clone().spawn_watcher(pool.clone(), shutdown_token.clone());

        let alerter: Arc<dyn alerter::Alerter> = Arc::new(EmailAlerter::new(&config.alerter)?);
        let reconciler = Reconciler::new(pool.clone(), orchestrator.clone(), alerter, config.reconciler.clone());
        let reconciler_shutdown = shutdown_token.clone();
        tasks.spawn(async move {
            reconciler.run(reconciler_shutdown).await;
        });

        let state = AppState {
            orchestrator,
            router,
            tcc_prefix: config.tcc_prefix.clone(),
        };
        let app_router = build_router(state);

        let drop_guard = shutdown_token.clone().drop_guard();

        Ok(Self {
            router: app_router,
            config,
            pool,
            bg_services: BackgroundServices {
                tasks,
                shutdown_token,
                drop_guard,
            },
        })
    }

    /// Converts into an in-process test server (spec.md §9's test-tooling
    /// expansion). Grounded in `Application::into_test_server`. Drops
    /// `bg_services` immediately, cancelling the config watcher and
    /// reconciler — the initial synchronous load already populated the
    /// routing table, so lookups keep working without the live watcher.
    #[cfg(test)]
    pub fn into_test_server(self) -> axum_test::TestServer {
        axum_test::TestServer::new(self.router.into_make_service()).expect("failed to build test server")
    }

    /// Binds to `config.bind_address()` and serves until `shutdown` resolves
    /// or a background task exits unexpectedly (fail-fast, matching
    /// `Application::serve`'s race in the teacher).
    pub async fn serve<F>(mut self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!("tcc-coordinator listening on http://{}", bind_addr);

        let server_error: Option<anyhow::Error> = tokio::select! {
            result = axum::serve(listener, self.router.into_make_service()).with_graceful_shutdown(shutdown) => {
                result.err().map(Into::into)
            }
            result = self.bg_services.wait_for_failure() => {
                match result {
                    Ok(_infallible) => unreachable!("wait_for_failure never returns Ok"),
                    Err(e) => Some(e),
                }
            }
        };

        info!("shutting down background services");
        self.bg_services.shutdown().await;

        info!("closing database pool");
        self.pool.close().await;

        if let Some(e) = server_error {
            warn!("application exiting with error: {:#}", e);
            return Err(e);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config() -> config::Config {
        config::Config {
            tcc_prefix: "/tcc".to_string(),
            ..Default::default()
        }
    }

    async fn seed_runtime_api(pool: &PgPool, url_pattern: &str, nodes: &serde_json::Value) {
        sqlx::query("INSERT INTO runtime_api_configs (url_pattern, nodes) VALUES ($1, $2)")
            .bind(url_pattern)
            .bind(nodes)
            .execute(pool)
            .await
            .unwrap();
    }

    /// End-to-end happy path: a single-node transaction whose Try and Confirm
    /// both succeed commits the request (spec.md §4.3 steps 1-6).
    #[sqlx::test]
    #[test_log::test]
    async fn commits_single_node_transaction(pool: PgPool) {
        let participant = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/orders/42/try"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"code": 0, "msg": "ok"})))
            .mount(&participant)
            .await;
        Mock::given(method("POST"))
            .and(path("/orders/42/confirm"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"code": 0, "msg": "ok"})))
            .mount(&participant)
            .await;

        let nodes = serde_json::json!([{
            "index": 0,
            "try_call": {"url_template": format!("{}/orders/:id/try", participant.uri()), "method": "POST", "timeout_ms": 1000},
            "confirm": {"url_template": format!("{}/orders/:id/confirm", participant.uri()), "method": "POST", "timeout_ms": 1000},
            "cancel": {"url_template": format!("{}/orders/:id/cancel", participant.uri()), "method": "POST", "timeout_ms": 1000},
        }]);
        seed_runtime_api(&pool, "/order/:id/pay", &nodes).await;

        let app = Application::new_with_pool(test_config(), Some(pool.clone())).await.unwrap();
        let server = app.into_test_server();

        let response = server.post("/tcc/order/42/pay").bytes("{}".into()).await;
        let body: types::ResponseEnvelope = response.json();
        assert_eq!(body.code, 0);

        // Confirm runs in a spawned background task; give it a moment.
        tokio::time::sleep(Duration::from_millis(200)).await;
        let status: i16 = sqlx::query_scalar("SELECT status FROM request_info LIMIT 1").fetch_one(&pool).await.unwrap();
        assert_eq!(status, types::RequestStatus::Committed as i16);
    }

    /// A path with no matching `RuntimeApi` is rejected before anything is
    /// persisted (spec.md §4.3 step 2).
    #[sqlx::test]
    #[test_log::test]
    async fn unmatched_path_returns_not_found_code(pool: PgPool) {
        let app = Application::new_with_pool(test_config(), Some(pool.clone())).await.unwrap();
        let server = app.into_test_server();

        let response = server.post("/tcc/no/such/route").bytes("{}".into()).await;
        let body: types::ResponseEnvelope = response.json();
        assert_eq!(body.code, errors::CODE_NOT_FOUND);
    }
}
