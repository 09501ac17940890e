//! Error taxonomy for world loading.
//!
//! Every failure reachable from [`crate::loader::WorldLoader`] is one of the
//! [`WorldError`] variants below. Each carries the data needed to build a
//! single actionable message for operators; none of them is downgraded into
//! another on the way up.

use crate::backend::BackendError;
use crate::types::ChunkPos;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, WorldError>;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum WorldError {
    #[error("unknown backend '{backend}', check the world's 'source' setting")]
    UnknownBackend { backend: String },

    #[error("world '{world}' does not exist in backend '{backend}', are you sure you've set the correct data source?")]
    UnknownWorld { world: String, backend: String },

    #[error("world '{world}' is in use! If you are sure this is a mistake, run: worldstore unlock {world} {backend}")]
    WorldInUse { world: String, backend: String },

    #[error("world '{world}' seems to be corrupted{}: {reason}", chunk_suffix(.chunk))]
    CorruptedWorld {
        world: String,
        chunk: Option<ChunkPos>,
        reason: String,
    },

    #[error("world '{world}' is serialized in a newer format version ({version}) that this build does not understand")]
    NewerFormat { world: String, version: u8 },

    #[error("world '{world}' is meant to be used on a {} server", host_range(.modern))]
    UnsupportedWorld { world: String, modern: bool },

    #[error("{0}")]
    IllegalArgument(String),

    #[error("backend '{backend}' unavailable: {reason}")]
    BackendUnavailable { backend: String, reason: String },
}

fn chunk_suffix(chunk: &Option<ChunkPos>) -> String {
    match chunk {
        Some(pos) => format!(" (chunk {})", pos),
        None => String::new(),
    }
}

fn host_range(modern: &bool) -> &'static str {
    crate::types::Encoding::from_modern_flag(*modern).host_range()
}

/// Classification of a [`WorldError`], used when failures are collected
/// instead of propagated (startup bulk load, CLI exit codes).
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    UnknownBackend,
    UnknownWorld,
    WorldInUse,
    CorruptedWorld,
    NewerFormat,
    UnsupportedWorld,
    IllegalArgument,
    BackendUnavailable,
}

impl ErrorKind {
    /// Only transient backend failures are worth retrying automatically.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::BackendUnavailable)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::UnknownBackend => "unknown_backend",
            ErrorKind::UnknownWorld => "unknown_world",
            ErrorKind::WorldInUse => "world_in_use",
            ErrorKind::CorruptedWorld => "corrupted_world",
            ErrorKind::NewerFormat => "newer_format",
            ErrorKind::UnsupportedWorld => "unsupported_world",
            ErrorKind::IllegalArgument => "illegal_argument",
            ErrorKind::BackendUnavailable => "backend_unavailable",
        };
        f.write_str(s)
    }
}

impl WorldError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            WorldError::UnknownBackend { .. } => ErrorKind::UnknownBackend,
            WorldError::UnknownWorld { .. } => ErrorKind::UnknownWorld,
            WorldError::WorldInUse { .. } => ErrorKind::WorldInUse,
            WorldError::CorruptedWorld { .. } => ErrorKind::CorruptedWorld,
            WorldError::NewerFormat { .. } => ErrorKind::NewerFormat,
            WorldError::UnsupportedWorld { .. } => ErrorKind::UnsupportedWorld,
            WorldError::IllegalArgument(_) => ErrorKind::IllegalArgument,
            WorldError::BackendUnavailable { .. } => ErrorKind::BackendUnavailable,
        }
    }

    pub fn illegal(reason: impl Into<String>) -> Self {
        WorldError::IllegalArgument(reason.into())
    }

    pub fn unavailable(backend: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        WorldError::BackendUnavailable {
            backend: backend.into(),
            reason: reason.to_string(),
        }
    }
}

impl WorldError {
    /// Attach backend/world identity to a backend-level failure.
    pub fn from_backend(err: BackendError, backend: &str, world: &str) -> Self {
        match err {
            BackendError::UnknownWorld => WorldError::UnknownWorld {
                world: world.to_string(),
                backend: backend.to_string(),
            },
            BackendError::WorldInUse { .. } => WorldError::WorldInUse {
                world: world.to_string(),
                backend: backend.to_string(),
            },
            BackendError::NotLockHolder => WorldError::IllegalArgument(format!(
                "world '{}' is not locked by this process in backend '{}'",
                world, backend
            )),
            BackendError::InvalidName(name) => {
                WorldError::IllegalArgument(format!("invalid world name '{}'", name))
            }
            BackendError::Unavailable(reason) => WorldError::BackendUnavailable {
                backend: backend.to_string(),
                reason,
            },
        }
    }
}
