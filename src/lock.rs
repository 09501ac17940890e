//! Lock coordinator: world-identity semantics on top of backend locks.
//!
//! Tracks which world names are active in this process and which backend
//! token each holds. A name is *reserved* before its backend read starts, so
//! two in-process loads of the same name are serialized (the second fails
//! fast), and the backend read itself takes the cross-process lock in the
//! same operation, leaving no gap between "check unused" and "read".

use crate::backend::{Backend, LockToken, ReadOutcome};
use crate::error::{Result, WorldError};
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Clone)]
pub(crate) struct Held {
    pub backend_name: String,
    pub backend: Arc<dyn Backend>,
    pub token: Option<LockToken>,
}

enum Slot {
    Pending,
    Active(Held),
}

#[derive(Default)]
pub struct LockCoordinator {
    worlds: Mutex<HashMap<String, Slot>>,
}

/// In-process claim on a world name. Dropping it without
/// [`Reservation::commit`] frees the name again.
pub struct Reservation<'a> {
    coordinator: &'a LockCoordinator,
    world: String,
    committed: bool,
}

impl Reservation<'_> {
    pub fn world(&self) -> &str {
        &self.world
    }

    /// Record the world as active, holding `token` (absent for read-only
    /// loads).
    pub fn commit(
        mut self,
        backend_name: &str,
        backend: Arc<dyn Backend>,
        token: Option<LockToken>,
    ) {
        let held = Held {
            backend_name: backend_name.to_string(),
            backend,
            token,
        };
        self.coordinator
            .worlds
            .lock()
            .insert(self.world.clone(), Slot::Active(held));
        self.committed = true;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        let mut worlds = self.coordinator.worlds.lock();
        if matches!(worlds.get(&self.world), Some(Slot::Pending)) {
            worlds.remove(&self.world);
        }
    }
}

impl LockCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `world` for a load. Fails if it is already active or loading.
    pub fn reserve(&self, world: &str) -> Result<Reservation<'_>> {
        let mut worlds = self.worlds.lock();
        if worlds.contains_key(world) {
            return Err(WorldError::illegal(format!(
                "world '{}' already exists",
                world
            )));
        }
        worlds.insert(world.to_string(), Slot::Pending);
        Ok(Reservation {
            coordinator: self,
            world: world.to_string(),
            committed: false,
        })
    }

    /// Backend read, taking the lock atomically unless `read_only`.
    pub fn read_locked(
        &self,
        backend_name: &str,
        backend: &dyn Backend,
        world: &str,
        read_only: bool,
    ) -> Result<ReadOutcome> {
        backend
            .read_world_bytes(world, read_only)
            .map_err(|e| WorldError::from_backend(e, backend_name, world))
    }

    /// Give back a token that was acquired but never committed (the load
    /// failed after the read).
    pub fn discard(&self, backend_name: &str, backend: &dyn Backend, token: &LockToken) {
        if let Err(e) = backend.release_lock(&token.world, token) {
            warn!(
                "Failed to release lock on world '{}' in backend '{}': {}",
                token.world, backend_name, e
            );
        }
    }

    /// Forget `world` and release its backend lock.
    pub fn release(&self, world: &str) -> Result<()> {
        let held = {
            let mut worlds = self.worlds.lock();
            match worlds.remove(world) {
                Some(Slot::Active(held)) => held,
                Some(Slot::Pending) => {
                    worlds.insert(world.to_string(), Slot::Pending);
                    return Err(WorldError::illegal(format!(
                        "world '{}' is still loading",
                        world
                    )))
                }
                None => {
                    return Err(WorldError::illegal(format!(
                        "world '{}' is not loaded",
                        world
                    )))
                }
            }
        };

        if let Some(token) = held.token {
            held.backend
                .release_lock(world, &token)
                .map_err(|e| WorldError::from_backend(e, &held.backend_name, world))?;
            debug!("Released lock on world '{}'", world);
        }
        Ok(())
    }

    /// Operator override: remove whatever lock `backend` records for `world`.
    /// An in-process token for the same identity is dropped as well; the
    /// world stays active but can no longer be saved.
    pub fn force_unlock(
        &self,
        backend_name: &str,
        backend: &dyn Backend,
        world: &str,
    ) -> Result<bool> {
        let existed = backend
            .force_unlock(world)
            .map_err(|e| WorldError::from_backend(e, backend_name, world))?;

        if let Some(Slot::Active(held)) = self.worlds.lock().get_mut(world) {
            if held.backend_name == backend_name && held.token.take().is_some() {
                warn!(
                    "Force-unlocked world '{}' while it is loaded here; it can no longer be saved",
                    world
                );
            }
        }

        info!(
            "Force unlock of world '{}' in backend '{}': {}",
            world,
            backend_name,
            if existed { "lock removed" } else { "no lock present" }
        );
        Ok(existed)
    }

    /// Refresh every held lock. Returns the worlds whose heartbeat failed.
    pub fn heartbeat_all(&self) -> Vec<(String, WorldError)> {
        let held: Vec<(String, Held)> = self
            .worlds
            .lock()
            .iter()
            .filter_map(|(name, slot)| match slot {
                Slot::Active(h) if h.token.is_some() => Some((name.clone(), h.clone())),
                _ => None,
            })
            .collect();

        let mut failures = Vec::new();
        for (world, h) in held {
            let Some(token) = h.token else { continue };
            if let Err(e) = h.backend.heartbeat(&world, &token) {
                let err = WorldError::from_backend(e, &h.backend_name, &world);
                warn!("Heartbeat failed for world '{}': {}", world, err);
                failures.push((world, err));
            }
        }
        failures
    }

    pub(crate) fn held(&self, world: &str) -> Option<Held> {
        match self.worlds.lock().get(world) {
            Some(Slot::Active(h)) => Some(h.clone()),
            _ => None,
        }
    }

    pub fn token_for(&self, world: &str) -> Option<LockToken> {
        self.held(world).and_then(|h| h.token)
    }

    pub fn is_active(&self, world: &str) -> bool {
        matches!(self.worlds.lock().get(world), Some(Slot::Active(_)))
    }

    /// Active world names, sorted.
    pub fn active_worlds(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .worlds
            .lock()
            .iter()
            .filter(|(_, s)| matches!(s, Slot::Active(_)))
            .map(|(n, _)| n.clone())
            .collect();
        names.sort();
        names
    }
}
