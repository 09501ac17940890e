//! Filesystem backend.
//!
//! Each world is `<dir>/<name>.world`. A held lock is a sidecar
//! `<dir>/<name>.world.lock` holding a JSON [`LockFile`] record.
//!
//! The sidecar is published with `hard_link` from a fully written temp file,
//! so it appears atomically and complete: two contenders can never both
//! create it, and nobody ever reads a half-written record. Lock mutations in
//! one instance are additionally serialized by an internal mutex.
//!
//! Race window: reclaiming a *stale* sidecar is remove-then-create. Two
//! processes reclaiming the same stale lock at the same instant can both
//! observe it stale; the loser of the subsequent `hard_link` still gets
//! `WorldInUse`, but a process that read the stale record before a third
//! party's fresh lock landed may remove that fresh lock. This needs a holder
//! that stopped heart-beating for longer than the staleness threshold and
//! two reclaimers within the same few microseconds.
//!
//! Heartbeats rewrite the sidecar in place through the handle they verified
//! it with, so a heartbeat racing a force unlock and re-acquire refreshes the
//! orphaned file and then fails. Another process may briefly read a
//! half-written record; it counts as held (see `read_lock`).

use super::{
    now_ms, validate_world_name, Backend, BackendError, BackendResult, LockInfo, LockPolicy,
    LockToken, OwnerId, ReadOutcome,
};
use bytes::Bytes;
use log::{debug, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

pub const WORLD_EXTENSION: &str = "world";
const LOCK_SUFFIX: &str = ".lock";
const UNREADABLE_OWNER: &str = "<unreadable lock file>";

/// On-disk lock record.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct LockFile {
    owner: OwnerId,
    pid: u32,
    nonce: u64,
    acquired_ms: u64,
    heartbeat_ms: u64,
}

impl LockFile {
    fn info(&self) -> LockInfo {
        LockInfo {
            owner: self.owner.clone(),
            acquired_ms: self.acquired_ms,
            heartbeat_ms: self.heartbeat_ms,
        }
    }

    fn matches(&self, token: &LockToken) -> bool {
        self.owner == token.owner && self.nonce == token.nonce
    }
}

pub struct FileBackend {
    dir: PathBuf,
    owner: OwnerId,
    policy: LockPolicy,
    lock_table: Mutex<()>,
}

impl FileBackend {
    /// Open (creating if needed) a world directory.
    pub fn new(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            owner: OwnerId::generate(),
            policy: LockPolicy::default(),
            lock_table: Mutex::new(()),
        })
    }

    pub fn with_owner(mut self, owner: OwnerId) -> Self {
        self.owner = owner;
        self
    }

    pub fn with_policy(mut self, policy: LockPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn owner(&self) -> &OwnerId {
        &self.owner
    }

    fn world_path(&self, world: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", world, WORLD_EXTENSION))
    }

    fn lock_path(&self, world: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{}{}", world, WORLD_EXTENSION, LOCK_SUFFIX))
    }

    fn temp_path(&self, world: &str, purpose: &str, nonce: u64) -> PathBuf {
        self.dir.join(format!(
            ".{}.{}.{}.{}.tmp",
            world,
            purpose,
            self.owner.as_str(),
            nonce
        ))
    }

    // -----------------------------------------------------------------------
    // Lock file helpers (callers hold `lock_table`)
    // -----------------------------------------------------------------------

    /// Current lock record. An unparseable sidecar counts as held by an
    /// unknown owner, aged by its modification time.
    fn read_lock(&self, world: &str) -> BackendResult<Option<LockFile>> {
        let path = self.lock_path(world);
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_slice::<LockFile>(&raw) {
            Ok(lock) => Ok(Some(lock)),
            Err(e) => {
                warn!("Unreadable lock file {}: {}", path.display(), e);
                let modified_ms = fs::metadata(&path)
                    .and_then(|m| m.modified())
                    .ok()
                    .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                    .map(|d| d.as_millis() as u64)
                    .unwrap_or_else(now_ms);
                Ok(Some(LockFile {
                    owner: OwnerId::new(UNREADABLE_OWNER),
                    pid: 0,
                    nonce: 0,
                    acquired_ms: modified_ms,
                    heartbeat_ms: modified_ms,
                }))
            }
        }
    }

    fn write_temp(&self, path: &Path, bytes: &[u8]) -> io::Result<()> {
        let mut f = fs::File::create(path)?;
        f.write_all(bytes)?;
        f.sync_all()
    }

    fn lock_record(&self, token: &LockToken, acquired_ms: u64) -> BackendResult<Vec<u8>> {
        let record = LockFile {
            owner: token.owner.clone(),
            pid: std::process::id(),
            nonce: token.nonce,
            acquired_ms,
            heartbeat_ms: now_ms(),
        };
        serde_json::to_vec(&record).map_err(|e| BackendError::Unavailable(e.to_string()))
    }

    fn try_acquire(&self, world: &str) -> BackendResult<LockToken> {
        let token = LockToken::issue(world, &self.owner);
        let record = self.lock_record(&token, now_ms())?;
        let tmp = self.temp_path(world, "lock", token.nonce);
        let lock_path = self.lock_path(world);

        // Two attempts: the second only after reclaiming a stale or vanished
        // record.
        for _ in 0..2 {
            self.write_temp(&tmp, &record)?;
            let linked = fs::hard_link(&tmp, &lock_path);
            let _ = fs::remove_file(&tmp);

            match linked {
                Ok(()) => {
                    debug!("Locked world '{}' as {}", world, self.owner);
                    return Ok(token);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
                Err(e) => return Err(e.into()),
            }

            match self.read_lock(world)? {
                Some(existing) if existing.info().is_stale(&self.policy, now_ms()) => {
                    warn!(
                        "Reclaiming stale lock on world '{}' held by {} (last heartbeat {}ms ago)",
                        world,
                        existing.owner,
                        now_ms().saturating_sub(existing.heartbeat_ms)
                    );
                    match fs::remove_file(&lock_path) {
                        Ok(()) => {}
                        Err(e) if e.kind() == ErrorKind::NotFound => {}
                        Err(e) => return Err(e.into()),
                    }
                }
                Some(existing) => {
                    return Err(BackendError::WorldInUse {
                        holder: existing.owner.to_string(),
                    })
                }
                // Released between our link attempt and the read.
                None => {}
            }
        }

        Err(BackendError::Unavailable(format!(
            "lock on world '{}' kept changing hands",
            world
        )))
    }

    fn verify_holder(&self, world: &str, token: &LockToken) -> BackendResult<LockFile> {
        match self.read_lock(world)? {
            Some(lock) if lock.matches(token) => Ok(lock),
            Some(lock) => Err(BackendError::WorldInUse {
                holder: lock.owner.to_string(),
            }),
            None => Err(BackendError::NotLockHolder),
        }
    }

    fn read_data(&self, world: &str) -> BackendResult<Bytes> {
        match fs::read(self.world_path(world)) {
            Ok(raw) => Ok(Bytes::from(raw)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(BackendError::UnknownWorld),
            Err(e) => Err(e.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Backend impl
// ---------------------------------------------------------------------------

impl Backend for FileBackend {
    fn read_world_bytes(&self, world: &str, read_only: bool) -> BackendResult<ReadOutcome> {
        validate_world_name(world)?;
        if read_only {
            return Ok(ReadOutcome {
                bytes: self.read_data(world)?,
                token: None,
            });
        }

        let _table = self.lock_table.lock();
        if !self.world_path(world).is_file() {
            return Err(BackendError::UnknownWorld);
        }
        let token = self.try_acquire(world)?;
        match self.read_data(world) {
            Ok(bytes) => Ok(ReadOutcome {
                bytes,
                token: Some(token),
            }),
            Err(e) => {
                let _ = fs::remove_file(self.lock_path(world));
                Err(e)
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
        let _table = self.lock_table.lock();
        self.verify_holder(world, token)?;

        let tmp = self.temp_path(world, "data", token.nonce);
        self.write_temp(&tmp, bytes)?;
        if let Err(e) = fs::rename(&tmp, self.world_path(world)) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }

    fn acquire_lock(&self, world: &str) -> BackendResult<LockToken> {
        validate_world_name(world)?;
        let _table = self.lock_table.lock();
        self.try_acquire(world)
    }

    fn release_lock(&self, world: &str, token: &LockToken) -> BackendResult<()> {
        validate_world_name(world)?;
        let _table = self.lock_table.lock();
        self.verify_holder(world, token)?;
        match fs::remove_file(self.lock_path(world)) {
            Ok(()) => {
                debug!("Unlocked world '{}'", world);
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Err(BackendError::NotLockHolder),
            Err(e) => Err(e.into()),
        }
    }

    fn heartbeat(&self, world: &str, token: &LockToken) -> BackendResult<()> {
        validate_world_name(world)?;
        let _table = self.lock_table.lock();

        // Check and refresh go through one handle. If the sidecar is replaced
        // in between, the refresh lands on the unlinked inode and the new
        // holder's record is untouched.
        let mut file = match fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(self.lock_path(world))
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(BackendError::NotLockHolder),
            Err(e) => return Err(e.into()),
        };
        let mut raw = Vec::new();
        file.read_to_end(&mut raw)?;
        let current = match serde_json::from_slice::<LockFile>(&raw) {
            Ok(lock) if lock.matches(token) => lock,
            Ok(lock) => {
                return Err(BackendError::WorldInUse {
                    holder: lock.owner.to_string(),
                })
            }
            Err(_) => {
                return Err(BackendError::WorldInUse {
                    holder: UNREADABLE_OWNER.to_string(),
                })
            }
        };

        let record = self.lock_record(token, current.acquired_ms)?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&record)?;
        file.set_len(record.len() as u64)?;
        file.sync_all()?;

        // The refreshed inode must still be the published sidecar.
        self.verify_holder(world, token).map(|_| ())
    }

    fn force_unlock(&self, world: &str) -> BackendResult<bool> {
        validate_world_name(world)?;
        let _table = self.lock_table.lock();
        match fs::remove_file(self.lock_path(world)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn world_exists(&self, world: &str) -> BackendResult<bool> {
        validate_world_name(world)?;
        match fs::metadata(self.world_path(world)) {
            Ok(m) => Ok(m.is_file()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn list_worlds(&self) -> BackendResult<Vec<String>> {
        let suffix = format!(".{}", WORLD_EXTENSION);
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            if file_name.starts_with('.') {
                continue;
            }
            if let Some(name) = file_name.strip_suffix(&suffix) {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    fn lock_info(&self, world: &str) -> BackendResult<Option<LockInfo>> {
        validate_world_name(world)?;
        let _table = self.lock_table.lock();
        Ok(self.read_lock(world)?.map(|l| l.info()))
    }
}
