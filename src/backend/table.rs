//! Shared-table backend.
//!
//! Models a database table shared by several server processes: one row per
//! world with the blob and a lock column (`locked_by`, nonce, heartbeat).
//! Every lock change is a single conditional update on a [`WorldTable`], the
//! equivalent of
//!
//! ```sql
//! UPDATE worlds SET locked_by = ?, lock_nonce = ?, heartbeat_ms = ?
//!  WHERE name = ? AND (locked_by IS NULL OR heartbeat_ms < ?)
//! ```
//!
//! A `WorldTable` backed by a store without conditional writes cannot give
//! that guarantee; such an implementation must document the window in which
//! two owners can both observe an unlocked row.
//!
//! [`MemoryTable`] keeps the rows in process, behind one mutex. Several
//! [`TableBackend`]s with distinct owners sharing one `MemoryTable` behave
//! like several servers sharing one database.

use super::{
    now_ms, validate_world_name, Backend, BackendError, BackendResult, LockInfo, LockPolicy,
    LockToken, OwnerId, ReadOutcome,
};
use bytes::Bytes;
use log::{debug, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Rows
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct WorldRow {
    /// `None` for a row created by locking a world that was never saved.
    pub data: Option<Bytes>,
    pub locked_by: Option<OwnerId>,
    pub lock_nonce: u64,
    pub acquired_ms: u64,
    pub heartbeat_ms: u64,
}

impl WorldRow {
    fn lock_info(&self) -> Option<LockInfo> {
        self.locked_by.as_ref().map(|owner| LockInfo {
            owner: owner.clone(),
            acquired_ms: self.acquired_ms,
            heartbeat_ms: self.heartbeat_ms,
        })
    }

    fn held_by(&self, token: &LockToken) -> bool {
        self.locked_by.as_ref() == Some(&token.owner) && self.lock_nonce == token.nonce
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LockOutcome {
    Acquired,
    /// Someone else holds a fresh lock.
    Held(LockInfo),
    /// No row (or, when `require_data`, no saved blob).
    Missing,
}

/// Atomic row operations a shared store must provide.
pub trait WorldTable: Send + Sync {
    fn select_data(&self, world: &str) -> BackendResult<Option<Bytes>>;

    /// Take the lock if the row is unlocked or its heartbeat is older than
    /// `stale_before_ms`. Creates the row unless `require_data`.
    fn lock_row(
        &self,
        world: &str,
        token: &LockToken,
        now_ms: u64,
        stale_before_ms: u64,
        require_data: bool,
    ) -> BackendResult<LockOutcome>;

    /// Store `data` if `token` holds the lock; otherwise report the holder.
    fn update_data(
        &self,
        world: &str,
        token: &LockToken,
        data: Bytes,
    ) -> BackendResult<Result<(), Option<LockInfo>>>;

    /// Refresh the heartbeat if `token` holds the lock.
    fn touch(
        &self,
        world: &str,
        token: &LockToken,
        now_ms: u64,
    ) -> BackendResult<Result<(), Option<LockInfo>>>;

    /// Clear the lock. With `token`, only if it holds the lock; without, any
    /// holder. Returns the lock that was cleared.
    fn unlock(&self, world: &str, token: Option<&LockToken>) -> BackendResult<Option<LockInfo>>;

    fn select_lock(&self, world: &str) -> BackendResult<Option<LockInfo>>;

    /// Names of rows holding a saved blob, sorted.
    fn names(&self) -> BackendResult<Vec<String>>;
}

// ---------------------------------------------------------------------------
// In-process table
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MemoryTable {
    rows: Mutex<HashMap<String, WorldRow>>,
}

impl MemoryTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed or overwrite a world blob without touching its lock.
    pub fn insert_world(&self, world: &str, data: impl Into<Bytes>) {
        self.rows.lock().entry(world.to_string()).or_default().data = Some(data.into());
    }
}

impl WorldTable for MemoryTable {
    fn select_data(&self, world: &str) -> BackendResult<Option<Bytes>> {
        Ok(self.rows.lock().get(world).and_then(|r| r.data.clone()))
    }

    fn lock_row(
        &self,
        world: &str,
        token: &LockToken,
        now_ms: u64,
        stale_before_ms: u64,
        require_data: bool,
    ) -> BackendResult<LockOutcome> {
        let mut rows = self.rows.lock();
        if !require_data {
            rows.entry(world.to_string()).or_default();
        }
        let Some(row) = rows.get_mut(world) else {
            return Ok(LockOutcome::Missing);
        };
        if require_data && row.data.is_none() {
            return Ok(LockOutcome::Missing);
        }

        if let Some(info) = row.lock_info() {
            if info.heartbeat_ms >= stale_before_ms {
                return Ok(LockOutcome::Held(info));
            }
            warn!(
                "Reclaiming stale lock on world '{}' held by {}",
                world, info.owner
            );
        }

        row.locked_by = Some(token.owner.clone());
        row.lock_nonce = token.nonce;
        row.acquired_ms = now_ms;
        row.heartbeat_ms = now_ms;
        Ok(LockOutcome::Acquired)
    }

    fn update_data(
        &self,
        world: &str,
        token: &LockToken,
        data: Bytes,
    ) -> BackendResult<Result<(), Option<LockInfo>>> {
        let mut rows = self.rows.lock();
        match rows.get_mut(world) {
            Some(row) if row.held_by(token) => {
                row.data = Some(data);
                Ok(Ok(()))
            }
            Some(row) => Ok(Err(row.lock_info())),
            None => Ok(Err(None)),
        }
    }

    fn touch(
        &self,
        world: &str,
        token: &LockToken,
        now_ms: u64,
    ) -> BackendResult<Result<(), Option<LockInfo>>> {
        let mut rows = self.rows.lock();
        match rows.get_mut(world) {
            Some(row) if row.held_by(token) => {
                row.heartbeat_ms = now_ms;
                Ok(Ok(()))
            }
            Some(row) => Ok(Err(row.lock_info())),
            None => Ok(Err(None)),
        }
    }

    fn unlock(&self, world: &str, token: Option<&LockToken>) -> BackendResult<Option<LockInfo>> {
        let mut rows = self.rows.lock();
        let Some(row) = rows.get_mut(world) else {
            return Ok(None);
        };
        if let Some(token) = token {
            if !row.held_by(token) {
                return Ok(None);
            }
        }
        let cleared = row.lock_info();
        row.locked_by = None;
        row.lock_nonce = 0;
        if row.data.is_none() {
            rows.remove(world);
        }
        Ok(cleared)
    }

    fn select_lock(&self, world: &str) -> BackendResult<Option<LockInfo>> {
        Ok(self.rows.lock().get(world).and_then(WorldRow::lock_info))
    }

    fn names(&self) -> BackendResult<Vec<String>> {
        let mut names: Vec<String> = self
            .rows
            .lock()
            .iter()
            .filter(|(_, r)| r.data.is_some())
            .map(|(n, _)| n.clone())
            .collect();
        names.sort();
        Ok(names)
    }
}

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

pub struct TableBackend {
    table: Arc<dyn WorldTable>,
    owner: OwnerId,
    policy: LockPolicy,
}

impl TableBackend {
    pub fn new(table: Arc<dyn WorldTable>) -> Self {
        Self {
            table,
            owner: OwnerId::generate(),
            policy: LockPolicy::default(),
        }
    }

    pub fn with_owner(mut self, owner: OwnerId) -> Self {
        self.owner = owner;
        self
    }

    pub fn with_policy(mut self, policy: LockPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn owner(&self) -> &OwnerId {
        &self.owner
    }

    fn lock(&self, world: &str, require_data: bool) -> BackendResult<LockToken> {
        let token = LockToken::issue(world, &self.owner);
        let now = now_ms();
        let stale_before = now.saturating_sub(self.policy.stale_after.as_millis() as u64);
        match self
            .table
            .lock_row(world, &token, now, stale_before, require_data)?
        {
            LockOutcome::Acquired => {
                debug!("Locked world '{}' as {}", world, self.owner);
                Ok(token)
            }
            LockOutcome::Held(info) => Err(BackendError::WorldInUse {
                holder: info.owner.to_string(),
            }),
            LockOutcome::Missing => Err(BackendError::UnknownWorld),
        }
    }
}

fn not_holder(holder: Option<LockInfo>) -> BackendError {
    match holder {
        Some(info) => BackendError::WorldInUse {
            holder: info.owner.to_string(),
        },
        None => BackendError::NotLockHolder,
    }
}

impl Backend for TableBackend {
    fn read_world_bytes(&self, world: &str, read_only: bool) -> BackendResult<ReadOutcome> {
        validate_world_name(world)?;
        if read_only {
            let bytes = self
                .table
                .select_data(world)?
                .ok_or(BackendError::UnknownWorld)?;
            return Ok(ReadOutcome { bytes, token: None });
        }

        let token = self.lock(world, true)?;
        match self.table.select_data(world) {
            Ok(Some(bytes)) => Ok(ReadOutcome {
                bytes,
                token: Some(token),
            }),
            other => {
                self.table.unlock(world, Some(&token))?;
                match other {
                    Err(e) => Err(e),
                    _ => Err(BackendError::UnknownWorld),
                }
            }
        }
    }

    fn write_world_bytes(
        &self,
        world: &str,
        token: &LockToken,
        bytes: &[u8],
    ) -> BackendResult<()> {
        validate_world_name(world)?;
        self.table
            .update_data(world, token, Bytes::copy_from_slice(bytes))?
            .map_err(not_holder)
    }

    fn acquire_lock(&self, world: &str) -> BackendResult<LockToken> {
        validate_world_name(world)?;
        self.lock(world, false)
    }

    fn release_lock(&self, world: &str, token: &LockToken) -> BackendResult<()> {
        validate_world_name(world)?;
        match self.table.unlock(world, Some(token))? {
            Some(_) => {
                debug!("Unlocked world '{}'", world);
                Ok(())
            }
            None => Err(not_holder(self.table.select_lock(world)?)),
        }
    }

    fn heartbeat(&self, world: &str, token: &LockToken) -> BackendResult<()> {
        validate_world_name(world)?;
        self.table.touch(world, token, now_ms())?.map_err(not_holder)
    }

    fn force_unlock(&self, world: &str) -> BackendResult<bool> {
        validate_world_name(world)?;
        Ok(self.table.unlock(world, None)?.is_some())
    }

    fn world_exists(&self, world: &str) -> BackendResult<bool> {
        validate_world_name(world)?;
        Ok(self.table.select_data(world)?.is_some())
    }

    fn list_worlds(&self) -> BackendResult<Vec<String>> {
        self.table.names()
    }

    fn lock_info(&self, world: &str) -> BackendResult<Option<LockInfo>> {
        validate_world_name(world)?;
        self.table.select_lock(world)
    }
}
