//! The parallel-mode coordinator: an HTTP front-end that serializes every
//! store mutation through one in-process lock.
//!
//! Mutations are applied to a clone of the in-memory snapshot, validated,
//! and only then swapped in, so an invariant violation rolls back cleanly.
//! History events are appended immediately; the task/session files are
//! flushed by a once-per-second dirty loop. A 30-second loop reclaims
//! sessions whose monotonic heartbeat age passed the cleanup threshold.

pub mod routes;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::CoreConfig;
use crate::error::{CoreError, Result};
use crate::ops;
use crate::ops::UndoReport;
use crate::store::{Dirty, Snapshot, Store};

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub port: u16,
    pub main_session: Option<String>,
    pub core: CoreConfig,
}

impl CoordinatorConfig {
    pub fn new(core: CoreConfig, port: u16) -> Self {
        Self {
            port,
            main_session: None,
            core,
        }
    }
}

/// Everything the event loop owns: the authoritative snapshot plus the
/// monotonic heartbeat instants (wall clock is only written to disk).
pub(crate) struct Shared {
    pub snap: Snapshot,
    pub seen: HashMap<String, Instant>,
}

pub struct ServiceState {
    pub(crate) inner: Mutex<Shared>,
    pub(crate) store: Store,
    pub(crate) cfg: CoreConfig,
    version: AtomicU64,
    versions: broadcast::Sender<u64>,
    shutdown: Notify,
}

impl ServiceState {
    /// Subscribe to state-change notifications: an opaque monotonically
    /// increasing version per committed mutation, delivered best-effort.
    pub fn subscribe(&self) -> broadcast::Receiver<u64> {
        self.versions.subscribe()
    }

    pub fn request_shutdown(&self) {
        self.shutdown.notify_one();
    }
}

/// Apply a mutation under the process-wide lock: clone, run, validate,
/// append history, swap, publish a new version.
pub(crate) async fn mutate<T, F>(state: &Arc<ServiceState>, f: F) -> Result<T>
where
    F: FnOnce(&mut Shared) -> Result<T> + Send,
    T: Send,
{
    let mut guard = tokio::time::timeout(state.cfg.request_budget, state.inner.lock())
        .await
        .map_err(|_| {
            CoreError::LockTimeout("store busy beyond the request budget".to_string())
        })?;

    let mut work = Shared {
        snap: guard.snap.clone(),
        seen: guard.seen.clone(),
    };
    let out = f(&mut work)?;
    work.snap.validate()?;

    let events = work.snap.take_events();
    if !events.is_empty() {
        let store = state.store.clone();
        tokio::task::spawn_blocking(move || store.append_history(&events))
            .await
            .map_err(|e| CoreError::Internal(format!("history append task failed: {e}")))??;
    }

    *guard = work;
    publish_version(state);
    Ok(out)
}

/// Take a read snapshot under the same lock, releasing it before the
/// response is serialized.
pub(crate) async fn read_view<T>(
    state: &Arc<ServiceState>,
    f: impl FnOnce(&Shared) -> Result<T>,
) -> Result<T> {
    let guard = tokio::time::timeout(state.cfg.request_budget, state.inner.lock())
        .await
        .map_err(|_| {
            CoreError::LockTimeout("store busy beyond the request budget".to_string())
        })?;
    f(&guard)
}

/// Undo needs the persisted history, read under the same serialization
/// point as the mutation it produces.
pub(crate) async fn undo(state: &Arc<ServiceState>, session_id: String) -> Result<UndoReport> {
    let mut guard = tokio::time::timeout(state.cfg.request_budget, state.inner.lock())
        .await
        .map_err(|_| {
            CoreError::LockTimeout("store busy beyond the request budget".to_string())
        })?;

    let store = state.store.clone();
    let history = tokio::task::spawn_blocking(move || store.read_history())
        .await
        .map_err(|e| CoreError::Internal(format!("history read task failed: {e}")))??;

    let mut work = Shared {
        snap: guard.snap.clone(),
        seen: guard.seen.clone(),
    };
    let report = ops::undo::undo_last(&mut work.snap, &history, &session_id, Utc::now())?;
    work.snap.validate()?;

    let events = work.snap.take_events();
    if !events.is_empty() {
        let store = state.store.clone();
        tokio::task::spawn_blocking(move || store.append_history(&events))
            .await
            .map_err(|e| CoreError::Internal(format!("history append task failed: {e}")))??;
    }

    *guard = work;
    publish_version(state);
    Ok(report)
}

fn publish_version(state: &Arc<ServiceState>) {
    let version = state.version.fetch_add(1, Ordering::Relaxed) + 1;
    // No subscribers is fine; slow subscribers drop messages.
    let _ = state.versions.send(version);
}

/// Persist dirty in-memory state. Called by the flush loop and once more
/// on shutdown.
pub(crate) async fn flush(state: &Arc<ServiceState>) -> Result<()> {
    let mut copy = {
        let mut guard = state.inner.lock().await;
        if !guard.snap.dirty.any() {
            return Ok(());
        }
        let copy = guard.snap.clone();
        guard.snap.dirty = Dirty::default();
        copy
    };

    let store = state.store.clone();
    let result = tokio::task::spawn_blocking(move || store.save(&mut copy))
        .await
        .map_err(|e| CoreError::Internal(format!("flush task failed: {e}")))?;

    if let Err(e) = &result {
        warn!(err = %e, "flush failed; re-marking state dirty");
        let mut guard = state.inner.lock().await;
        guard.snap.dirty.tasks = true;
        guard.snap.dirty.sessions = true;
    }
    result
}

async fn flush_loop(state: Arc<ServiceState>) {
    let mut interval = tokio::time::interval(state.cfg.flush_interval);
    loop {
        interval.tick().await;
        if let Err(e) = flush(&state).await {
            warn!(err = %e, "periodic flush failed");
        }
    }
}

/// Reclaim sessions whose monotonic heartbeat age exceeds the threshold.
pub(crate) async fn run_cleanup(state: &Arc<ServiceState>) -> Result<Vec<String>> {
    let threshold = state.cfg.cleanup_threshold;
    mutate(state, move |shared| {
        let now = Utc::now();
        // Sessions loaded from disk without a monotonic entry (a previous
        // coordinator run) get a fresh grace period.
        for id in shared.snap.sessions.keys() {
            shared.seen.entry(id.clone()).or_insert_with(Instant::now);
        }
        let stale: Vec<String> = shared
            .seen
            .iter()
            .filter(|(_, seen)| seen.elapsed() > threshold)
            .map(|(id, _)| id.clone())
            .collect();
        let reclaimed = ops::sessions::reclaim(&mut shared.snap, now, &stale);
        for id in &reclaimed {
            shared.seen.remove(id);
        }
        shared.seen.retain(|id, _| shared.snap.sessions.contains_key(id));
        if !reclaimed.is_empty() {
            info!(count = reclaimed.len(), "reclaimed stale sessions");
        }
        Ok(reclaimed)
    })
    .await
}

async fn cleanup_loop(state: Arc<ServiceState>) {
    let mut interval = tokio::time::interval(state.cfg.cleanup_interval);
    interval.tick().await;
    loop {
        interval.tick().await;
        if let Err(e) = run_cleanup(&state).await {
            warn!(err = %e, "session cleanup failed");
        }
    }
}

async fn shutdown_signal(state: Arc<ServiceState>) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to register SIGTERM");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
            _ = state.shutdown.notified() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = state.shutdown.notified() => {}
        }
    }
    info!("coordinator shutting down");
}

fn write_runtime_files(cfg: &CoreConfig, port: u16, main_session: Option<&str>) -> Result<()> {
    std::fs::create_dir_all(&cfg.state_dir)?;
    std::fs::write(cfg.pid_path(), std::process::id().to_string())?;
    let sentinel = serde_json::json!({ "port": port, "main_session": main_session });
    std::fs::write(cfg.parallel_mode_path(), serde_json::to_string(&sentinel)?)?;
    Ok(())
}

fn remove_runtime_files(cfg: &CoreConfig) {
    let _ = std::fs::remove_file(cfg.parallel_mode_path());
    let _ = std::fs::remove_file(cfg.pid_path());
}

/// A running coordinator bound to its port. Dropping the handle does not
/// stop it; use [`Coordinator::shutdown`] or a signal.
pub struct Coordinator {
    addr: SocketAddr,
    state: Arc<ServiceState>,
    serve_task: JoinHandle<()>,
}

impl Coordinator {
    /// Load the store, bind the listener, write `coordinator.pid` and
    /// `.parallel-mode`, and start serving in a background task.
    pub async fn bind(cfg: CoordinatorConfig) -> Result<Self> {
        let store = Store::new(cfg.core.clone());
        let loader = store.clone();
        let snap = tokio::task::spawn_blocking(move || loader.load())
            .await
            .map_err(|e| CoreError::Internal(format!("store load task failed: {e}")))??;

        let now = Instant::now();
        let seen: HashMap<String, Instant> =
            snap.sessions.keys().map(|id| (id.clone(), now)).collect();

        let (versions, _) = broadcast::channel(256);
        let state = Arc::new(ServiceState {
            inner: Mutex::new(Shared { snap, seen }),
            store,
            cfg: cfg.core.clone(),
            version: AtomicU64::new(0),
            versions,
            shutdown: Notify::new(),
        });

        let listener = TcpListener::bind(("127.0.0.1", cfg.port)).await?;
        let addr = listener.local_addr()?;
        write_runtime_files(&cfg.core, addr.port(), cfg.main_session.as_deref())?;
        info!(addr = %addr, "coordinator listening");

        let router = routes::build_router(state.clone());
        let flush_handle = tokio::spawn(flush_loop(state.clone()));
        let cleanup_handle = tokio::spawn(cleanup_loop(state.clone()));

        let serve_state = state.clone();
        let core_cfg = cfg.core.clone();
        let serve_task = tokio::spawn(async move {
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(shutdown_signal(serve_state.clone()))
                .await;
            if let Err(e) = result {
                warn!(err = %e, "coordinator server error");
            }
            flush_handle.abort();
            cleanup_handle.abort();
            if let Err(e) = flush(&serve_state).await {
                warn!(err = %e, "final flush failed");
            }
            remove_runtime_files(&core_cfg);
            info!("coordinator stopped");
        });

        Ok(Self {
            addr,
            state,
            serve_task,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn state(&self) -> &Arc<ServiceState> {
        &self.state
    }

    /// Stop accepting, drain in-flight requests, flush, remove the
    /// sentinel and PID files.
    pub async fn shutdown(self) -> Result<()> {
        self.state.request_shutdown();
        self.wait().await
    }

    /// Wait until the server exits (signal or explicit shutdown).
    pub async fn wait(self) -> Result<()> {
        self.serve_task
            .await
            .map_err(|e| CoreError::Internal(format!("coordinator task failed: {e}")))
    }
}

/// Run a coordinator in the foreground until a shutdown signal arrives.
pub async fn run(cfg: CoordinatorConfig) -> Result<()> {
    Coordinator::bind(cfg).await?.wait().await
}
