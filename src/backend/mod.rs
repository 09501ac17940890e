//! Persistence backends.
//!
//! A [`Backend`] stores opaque world blobs and arbitrates exclusive access to
//! them. Backends do blocking I/O; async callers run them on the blocking
//! pool (see `service`).
//!
//! | Backend          | Storage                        | Lock record                        |
//! |------------------|--------------------------------|------------------------------------|
//! | [`FileBackend`]  | `<dir>/<world>.world`          | sidecar `<world>.world.lock` (JSON) |
//! | [`TableBackend`] | shared [`WorldTable`] rows     | `locked_by` + heartbeat columns    |

pub mod file;
pub mod table;

pub use file::FileBackend;
pub use table::{MemoryTable, TableBackend, WorldRow, WorldTable};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Error, PartialEq)]
pub enum BackendError {
    #[error("world does not exist")]
    UnknownWorld,
    /// Another holder owns the lock.
    #[error("world is locked by {holder}")]
    WorldInUse { holder: String },
    /// The caller's token is not the current lock record (never acquired,
    /// released, reclaimed after going stale, or force-unlocked).
    #[error("lock is not held by this token")]
    NotLockHolder,
    #[error("invalid world name '{0}'")]
    InvalidName(String),
    /// I/O failure or an undecidable lock state; retryable.
    #[error("{0}")]
    Unavailable(String),
}

impl From<std::io::Error> for BackendError {
    fn from(e: std::io::Error) -> Self {
        BackendError::Unavailable(e.to_string())
    }
}

pub type BackendResult<T> = Result<T, BackendError>;

// ---------------------------------------------------------------------------
// Lock ownership
// ---------------------------------------------------------------------------

/// Identity of one lock owner (normally one per backend instance).
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct OwnerId(String);

impl OwnerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// `<pid>-<start nanos>-<counter>`: unique per backend instance within a
    /// process and, in practice, across processes.
    pub fn generate() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        Self(format!("{}-{:x}-{}", std::process::id(), nanos, n))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for OwnerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Proof of holding a world's lock. Only the backend that issued it can
/// interpret it.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct LockToken {
    pub world: String,
    pub owner: OwnerId,
    pub nonce: u64,
}

impl LockToken {
    pub(crate) fn issue(world: &str, owner: &OwnerId) -> Self {
        static NONCE: AtomicU64 = AtomicU64::new(1);
        Self {
            world: world.to_string(),
            owner: owner.clone(),
            nonce: NONCE.fetch_add(1, Ordering::Relaxed),
        }
    }
}

/// Lock state as recorded by a backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    pub owner: OwnerId,
    pub acquired_ms: u64,
    pub heartbeat_ms: u64,
}

impl LockInfo {
    pub fn is_stale(&self, policy: &LockPolicy, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.heartbeat_ms) > policy.stale_after.as_millis() as u64
    }
}

/// When a lock whose holder stopped heart-beating may be taken over without
/// an operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockPolicy {
    pub stale_after: Duration,
}

impl Default for LockPolicy {
    fn default() -> Self {
        Self {
            stale_after: Duration::from_secs(300),
        }
    }
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Reject names that could escape a backend's namespace. A leading dot is
/// reserved for the file backend's temp files.
pub fn validate_world_name(name: &str) -> BackendResult<()> {
    let bad = name.is_empty()
        || name.starts_with('.')
        || name.len() > 255
        || name
            .chars()
            .any(|c| c == '/' || c == '\\' || c.is_control());
    if bad {
        return Err(BackendError::InvalidName(name.to_string()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Result of [`Backend::read_world_bytes`].
#[derive(Debug, Clone)]
pub struct ReadOutcome {
    pub bytes: Bytes,
    /// Present when the read took the lock (`read_only == false`).
    pub token: Option<LockToken>,
}

/// Storage capability consumed by the loader. Any implementation is
/// pluggable through [`crate::registry::BackendRegistry`].
///
/// Implementations must make lock acquisition atomic per world name and
/// serialize their own lock-table mutations.
pub trait Backend: Send + Sync {
    /// Read a world blob. Unless `read_only`, the lock is acquired as part of
    /// the same operation and its token returned; read-only reads never look
    /// at the lock.
    fn read_world_bytes(&self, world: &str, read_only: bool) -> BackendResult<ReadOutcome>;

    /// Replace a world blob. `token` must be the current lock record.
    fn write_world_bytes(&self, world: &str, token: &LockToken, bytes: &[u8])
        -> BackendResult<()>;

    fn acquire_lock(&self, world: &str) -> BackendResult<LockToken>;

    fn release_lock(&self, world: &str, token: &LockToken) -> BackendResult<()>;

    /// Refresh the holder's liveness timestamp.
    fn heartbeat(&self, world: &str, token: &LockToken) -> BackendResult<()>;

    /// Remove any lock on `world`, whoever holds it. Returns whether a lock
    /// existed.
    fn force_unlock(&self, world: &str) -> BackendResult<bool>;

    fn world_exists(&self, world: &str) -> BackendResult<bool>;

    /// World names, sorted.
    fn list_worlds(&self) -> BackendResult<Vec<String>>;

    fn lock_info(&self, world: &str) -> BackendResult<Option<LockInfo>>;
}
