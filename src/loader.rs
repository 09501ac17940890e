//! World load orchestrator.
//!
//! [`WorldLoader`] is the explicit context object every entry point goes
//! through: it owns the backend registry handle, the host's encoding
//! generation and the in-process [`LockCoordinator`].
//!
//! ```text
//! load_world(backend, world, properties)
//!   ├── registry.resolve(backend)            UnknownBackend
//!   ├── locks.reserve(world)                 IllegalArgument
//!   ├── locks.read_locked(..)                UnknownWorld / WorldInUse / BackendUnavailable
//!   ├── format::decode(..)                   CorruptedWorld / NewerFormat
//!   └── compat::check_compatible(..)         UnsupportedWorld
//! ```
//!
//! A failure after the read gives the backend lock back before returning.

use crate::backend::Backend;
use crate::compat::check_compatible;
use crate::config::WorldEntry;
use crate::error::{ErrorKind, Result, WorldError};
use crate::format;
use crate::lock::LockCoordinator;
use crate::registry::BackendRegistry;
use crate::types::WorldProperties;
use crate::world::World;
use log::{debug, error, info, warn};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

// ---------------------------------------------------------------------------
// Startup report
// ---------------------------------------------------------------------------

/// One configured world that could not be loaded at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct StartupFailure {
    pub world: String,
    pub backend: String,
    pub kind: ErrorKind,
    /// Operator-facing message, as logged.
    pub message: String,
}

impl StartupFailure {
    pub fn new(entry: &WorldEntry, err: &WorldError) -> Self {
        Self {
            world: entry.name.clone(),
            backend: entry.source.clone(),
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Outcome of a bulk startup load. `loaded` keeps configuration order and is
/// meant to be handed to the host once.
#[derive(Debug, Default)]
pub struct StartupReport {
    pub loaded: Vec<World>,
    pub failures: Vec<StartupFailure>,
    pub elapsed: Duration,
}

impl StartupReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn loaded_names(&self) -> Vec<&str> {
        self.loaded.iter().map(World::name).collect()
    }
}

// ---------------------------------------------------------------------------
// WorldLoader
// ---------------------------------------------------------------------------

pub struct WorldLoader {
    registry: Arc<BackendRegistry>,
    host_uses_modern: bool,
    locks: LockCoordinator,
}

impl WorldLoader {
    pub fn new(registry: Arc<BackendRegistry>, host_uses_modern: bool) -> Self {
        Self {
            registry,
            host_uses_modern,
            locks: LockCoordinator::new(),
        }
    }

    pub fn registry(&self) -> &Arc<BackendRegistry> {
        &self.registry
    }

    pub fn locks(&self) -> &LockCoordinator {
        &self.locks
    }

    pub fn host_uses_modern(&self) -> bool {
        self.host_uses_modern
    }

    /// Read, decode and gate `world` from `backend`. Unless
    /// `properties.read_only`, the world stays locked in the backend until
    /// [`Self::unload_world`].
    pub fn load_world(
        &self,
        backend: &str,
        world: &str,
        properties: WorldProperties,
    ) -> Result<World> {
        let started = Instant::now();
        let store = self.registry.resolve(backend)?;
        let reservation = self.locks.reserve(world)?;
        let read_only = properties.read_only;

        let outcome = self
            .locks
            .read_locked(backend, store.as_ref(), world, read_only)?;

        let loaded = format::decode(backend, world, &outcome.bytes, properties)
            .and_then(|w| check_compatible(&w, self.host_uses_modern).map(|()| w));

        match loaded {
            Ok(w) => {
                reservation.commit(backend, store, outcome.token);
                info!(
                    "World {} loaded in {}ms{}",
                    world,
                    started.elapsed().as_millis(),
                    if read_only { " (read-only)" } else { "" }
                );
                Ok(w)
            }
            Err(e) => {
                if let Some(token) = &outcome.token {
                    self.locks.discard(backend, store.as_ref(), token);
                }
                Err(e)
            }
        }
    }

    /// Parse a configuration entry and load it.
    pub fn load_from_entry(&self, entry: &WorldEntry) -> Result<World> {
        if !self.registry.contains(&entry.source) {
            return Err(WorldError::illegal(format!(
                "unknown backend '{}'",
                entry.source
            )));
        }
        let properties = entry.properties()?;
        self.load_world(&entry.source, &entry.name, properties)
    }

    /// Encode `world` and write it through the lock taken at load time.
    pub fn save_world(&self, world: &World) -> Result<()> {
        let started = Instant::now();
        let name = world.name();
        if world.is_read_only() {
            return Err(WorldError::illegal(format!(
                "world '{}' is read-only",
                name
            )));
        }
        let held = self
            .locks
            .held(name)
            .ok_or_else(|| WorldError::illegal(format!("world '{}' is not loaded", name)))?;
        if held.backend_name != world.backend() {
            return Err(WorldError::illegal(format!(
                "world '{}' was loaded from backend '{}', not '{}'",
                name,
                held.backend_name,
                world.backend()
            )));
        }

        let Some(token) = held.token else {
            return Err(self.lock_lost(&held.backend_name, held.backend.as_ref(), name));
        };

        let bytes = format::encode(world).map_err(|e| e.into_world_error(name))?;
        held.backend
            .write_world_bytes(name, &token, &bytes)
            .map_err(|e| WorldError::from_backend(e, &held.backend_name, name))?;
        info!(
            "World {} saved in {}ms ({} bytes)",
            name,
            started.elapsed().as_millis(),
            bytes.len()
        );
        Ok(())
    }

    /// Release the backend lock (if any) and forget `world`.
    pub fn unload_world(&self, world: &str) -> Result<()> {
        self.locks.release(world)?;
        info!("World {} unloaded", world);
        Ok(())
    }

    /// Operator override for a lock left behind by a crashed process.
    pub fn force_unlock(&self, backend: &str, world: &str) -> Result<bool> {
        let store = self.registry.resolve(backend)?;
        self.locks.force_unlock(backend, store.as_ref(), world)
    }

    /// Refresh every lock held by this loader.
    pub fn heartbeat(&self) -> Vec<(String, WorldError)> {
        let failures = self.locks.heartbeat_all();
        if failures.is_empty() {
            debug!("Heartbeat ok for {} world(s)", self.locks.active_worlds().len());
        }
        failures
    }

    /// Load every `load_on_startup` entry in order. Failures are logged and
    /// collected; none is propagated.
    pub fn load_startup_worlds(&self, entries: &[WorldEntry]) -> StartupReport {
        let started = Instant::now();
        let mut report = StartupReport::default();

        for (entry, duplicate) in startup_plan(entries) {
            let loaded = match duplicate {
                Some(e) => Err(e),
                None => self.load_from_entry(entry),
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

    // A world whose token was dropped by a force unlock.
    fn lock_lost(&self, backend_name: &str, backend: &dyn Backend, world: &str) -> WorldError {
        match backend.lock_info(world) {
            Ok(Some(_)) => WorldError::WorldInUse {
                world: world.to_string(),
                backend: backend_name.to_string(),
            },
            Ok(None) => WorldError::illegal(format!(
                "world '{}' is not locked by this process in backend '{}'",
                world, backend_name
            )),
            Err(e) => WorldError::from_backend(e, backend_name, world),
        }
    }
}

/// The `load_on_startup` entries in configuration order. An entry naming a
/// world already named earlier carries its failure up front.
pub(crate) fn startup_plan(entries: &[WorldEntry]) -> Vec<(&WorldEntry, Option<WorldError>)> {
    let mut seen = HashSet::new();
    entries
        .iter()
        .filter(|e| e.load_on_startup)
        .map(|entry| {
            let duplicate = (!seen.insert(entry.name.as_str())).then(|| {
                WorldError::illegal(format!(
                    "world '{}' is configured more than once",
                    entry.name
                ))
            });
            (entry, duplicate)
        })
        .collect()
}

pub(crate) fn log_startup_failure(entry: &WorldEntry, err: &WorldError) {
    match err.kind() {
        ErrorKind::BackendUnavailable => warn!(
            "Failed to load world {} (retryable): {}",
            entry.name, err
        ),
        _ => error!("Failed to load world {}: {}", entry.name, err),
    }
}
