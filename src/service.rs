//! WorldService – async front of [`WorldLoader`].
//!
//! Backend I/O is blocking, so every load runs under
//! `tokio::task::spawn_blocking` and the caller awaits it with a deadline.
//! A load that misses its deadline is reported as `BackendUnavailable`; the
//! blocking task keeps running and, should it still succeed, a detached task
//! unloads the world so its lock does not leak. Until that task is done the
//! name is *abandoned*: a retry waits for it (within its own deadline)
//! instead of colliding with the stale reservation.
//!
//! ```text
//! load_configured_worlds_on_startup(entries)   span "startup_load"
//!   ├── spawn_blocking(load_from_entry) × N    all start at once
//!   └── await each in config order             StartupReport
//! hand_off(report.loaded, host)                World → HostAdapter::materialize
//! run_heartbeat(interval)                      until shutdown()/SIGINT
//! ```

use crate::config::WorldEntry;
use crate::error::{Result, WorldError};
use crate::host::HostAdapter;
use crate::loader::{
    log_startup_failure, startup_plan, StartupFailure, StartupReport, WorldLoader,
};
use crate::types::WorldProperties;
use crate::world::World;
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::Instrument;

pub const DEFAULT_LOAD_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy)]
pub struct LoadOptions {
    pub timeout: Duration,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_LOAD_TIMEOUT,
        }
    }
}

type LoadTask = JoinHandle<Result<World>>;

/// Names whose timed-out load is still running, each with a flag that flips
/// once the late result has been dealt with.
type Abandoned = Arc<Mutex<HashMap<String, watch::Receiver<bool>>>>;

pub struct WorldService {
    loader: Arc<WorldLoader>,
    load_timeout: Duration,
    abandoned: Abandoned,
    shutdown_tx: watch::Sender<bool>,
}

impl WorldService {
    pub fn new(loader: Arc<WorldLoader>, load_timeout: Duration) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            loader,
            load_timeout,
            abandoned: Abandoned::default(),
            shutdown_tx,
        }
    }

    pub fn loader(&self) -> &Arc<WorldLoader> {
        &self.loader
    }

    pub fn default_options(&self) -> LoadOptions {
        LoadOptions {
            timeout: self.load_timeout,
        }
    }

    // -----------------------------------------------------------------------
    // Loading
    // -----------------------------------------------------------------------

    pub async fn load_world(
        &self,
        backend: &str,
        world: &str,
        properties: WorldProperties,
        options: LoadOptions,
    ) -> Result<World> {
        let span = tracing::info_span!("load_world", world = %world, backend = %backend);
        self.load_within(backend, world, properties, options.timeout)
            .instrument(span)
            .await
    }

    async fn load_within(
        &self,
        backend: &str,
        world: &str,
        properties: WorldProperties,
        timeout: Duration,
    ) -> Result<World> {
        let deadline = Instant::now() + timeout;
        self.settle_abandoned(backend, world, deadline, timeout).await?;
        let loader = self.loader.clone();
        let (b, w) = (backend.to_string(), world.to_string());
        let task = tokio::task::spawn_blocking(move || loader.load_world(&b, &w, properties));
        self.await_load(backend, world, task, deadline, timeout).await
    }

    /// Load every `load_on_startup` entry. Loads run concurrently; the
    /// report keeps configuration order and no failure escapes.
    pub async fn load_configured_worlds_on_startup(&self, entries: &[WorldEntry]) -> StartupReport {
        let span = tracing::info_span!("startup_load", worlds = entries.len());
        async {
            let started = Instant::now();
            let deadline = started + self.load_timeout;

            // Duplicate names fail up front so config order picks the winner.
            let pending: Vec<(&WorldEntry, std::result::Result<LoadTask, WorldError>)> =
                startup_plan(entries)
                    .into_iter()
                    .map(|(entry, duplicate)| match duplicate {
                        Some(e) => (entry, Err(e)),
                        None => {
                            let loader = self.loader.clone();
                            let owned = entry.clone();
                            let task =
                                tokio::task::spawn_blocking(move || loader.load_from_entry(&owned));
                            (entry, Ok(task))
                        }
                    })
                    .collect();

            let mut report = StartupReport::default();
            for (entry, task) in pending {
                let loaded = match task {
                    Ok(task) => {
                        self.await_load(&entry.source, &entry.name, task, deadline, self.load_timeout)
                            .await
                    }
                    Err(e) => Err(e),
                };
                match loaded {
                    Ok(world) => report.loaded.push(world),
                    Err(e) => {
                        log_startup_failure(entry, &e);
                        report.failures.push(StartupFailure::new(entry, &e));
                    }
                }
            }

            report.elapsed = started.elapsed();
            info!(
                "{} world(s) loaded, {} failed in {}ms",
                report.loaded.len(),
                report.failures.len(),
                report.elapsed.as_millis()
            );
            report
        }
        .instrument(span)
        .await
    }

    async fn await_load(
        &self,
        backend: &str,
        world: &str,
        mut task: LoadTask,
        deadline: Instant,
        timeout: Duration,
    ) -> Result<World> {
        match tokio::time::timeout_at(deadline, &mut task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(WorldError::unavailable(
                backend,
                format!("load task for world '{}' failed: {}", world, join),
            )),
            Err(_) => {
                self.abandon(world, task);
                Err(WorldError::unavailable(
                    backend,
                    format!(
                        "timed out after {}ms loading world '{}'",
                        timeout.as_millis(),
                        world
                    ),
                ))
            }
        }
    }

    /// Wait, until `deadline`, for an abandoned load of `world` to finish.
    async fn settle_abandoned(
        &self,
        backend: &str,
        world: &str,
        deadline: Instant,
        timeout: Duration,
    ) -> Result<()> {
        let pending = self.abandoned.lock().get(world).cloned();
        let Some(mut done) = pending else {
            return Ok(());
        };
        debug!("World {} waits for an abandoned load to finish", world);
        let outcome = tokio::time::timeout_at(deadline, done.wait_for(|finished| *finished))
            .await
            .map(|_| ());
        match outcome {
            Ok(()) => Ok(()),
            Err(_) => Err(WorldError::unavailable(
                backend,
                format!(
                    "timed out after {}ms waiting for an earlier load of world '{}'",
                    timeout.as_millis(),
                    world
                ),
            )),
        }
    }

    // The caller already got BackendUnavailable; a late success must not
    // keep the world locked.
    fn abandon(&self, world: &str, task: LoadTask) {
        let loader = self.loader.clone();
        let abandoned = self.abandoned.clone();
        let (done_tx, done_rx) = watch::channel(false);
        abandoned.lock().insert(world.to_string(), done_rx);
        let name = world.to_string();

        tokio::spawn(async move {
            if let Ok(Ok(world)) = task.await {
                warn!(
                    "World {} finished loading after its caller gave up, releasing it",
                    world.name()
                );
                drop(world);
                let unloading = name.clone();
                let released =
                    tokio::task::spawn_blocking(move || loader.unload_world(&unloading)).await;
                match released {
                    Ok(Err(e)) => warn!("Failed to release abandoned world: {}", e),
                    Err(e) => warn!("Failed to release abandoned world: {}", e),
                    Ok(Ok(())) => {}
                }
            }
            abandoned.lock().remove(&name);
            done_tx.send_replace(true);
        });
    }

    // -----------------------------------------------------------------------
    // Host handoff / unload
    // -----------------------------------------------------------------------

    /// Move every loaded world into `host`. A world the host refuses is
    /// unloaded again. Returns how many were materialized.
    pub fn hand_off(&self, worlds: Vec<World>, host: &dyn HostAdapter) -> usize {
        let mut materialized = 0;
        for world in worlds {
            let name = world.name().to_string();
            match host.materialize(world) {
                Ok(()) => {
                    debug!("World {} handed to host {}", name, host.version());
                    materialized += 1;
                }
                Err(e) => {
                    warn!("{}", e);
                    if let Err(e) = self.loader.unload_world(&name) {
                        warn!("Failed to unload world {}: {}", name, e);
                    }
                }
            }
        }
        materialized
    }

    pub async fn unload_world(&self, world: &str) -> Result<()> {
        let loader = self.loader.clone();
        let name = world.to_string();
        tokio::task::spawn_blocking(move || loader.unload_world(&name))
            .await
            .map_err(|e| WorldError::illegal(format!("unload of world '{}' failed: {}", world, e)))?
    }

    /// Unload every active world, releasing its lock.
    pub async fn unload_all(&self) {
        for world in self.loader.locks().active_worlds() {
            if let Err(e) = self.unload_world(&world).await {
                warn!("Failed to unload world {}: {}", world, e);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Heartbeat
    // -----------------------------------------------------------------------

    /// Refresh held locks every `interval` until [`Self::shutdown`] or SIGINT.
    pub async fn run_heartbeat(&self, interval: Duration) {
        let mut shutdown = self.shutdown_tx.subscribe();
        if *shutdown.borrow() {
            return;
        }
        let mut timer = tokio::time::interval(interval);
        // The first tick completes immediately; locks were just taken.
        timer.tick().await;

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    let loader = self.loader.clone();
                    match tokio::task::spawn_blocking(move || loader.heartbeat()).await {
                        Ok(failures) => {
                            for (world, e) in failures {
                                warn!("Lost lock on world {}: {}", world, e);
                            }
                        }
                        Err(e) => warn!("Heartbeat task failed: {}", e),
                    }
                }
                _ = shutdown.changed() => {
                    info!("Heartbeat loop stopping");
                    break;
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Heartbeat loop stopping (SIGINT)");
                    break;
                }
            }
        }
    }

    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }
}
