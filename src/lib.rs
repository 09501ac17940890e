//! worldstore
//!
//! Loads serialized worlds from pluggable storage backends, guards each one
//! with a cross-process lock, and refuses worlds whose block encoding does
//! not match the running host.
//!
//! ## Architecture
//!
//! ```text
//! WorldService  (service.rs)      ← async: timeouts, startup bulk load, heartbeat
//!   └── WorldLoader  (loader.rs)  ← resolve → reserve → read → decode → gate
//!         ├── BackendRegistry  (registry.rs)
//!         │     └── dyn Backend  (backend/)  FileBackend, TableBackend
//!         ├── LockCoordinator  (lock.rs)
//!         ├── format::decode / encode  (format/)
//!         │     └── World  (world.rs) ← Chunk (chunk.rs), Compound (tag.rs)
//!         └── check_compatible  (compat.rs)
//! HostAdapter  (host.rs)          ← receives loaded worlds
//! ```
//!
//! Everything except [`service`] is synchronous and usable without the
//! `server` feature.

pub mod backend;
pub mod chunk;
pub mod compat;
pub mod config;
pub mod error;
pub mod format;
pub mod host;
pub mod lock;
pub mod loader;
pub mod registry;
pub mod tag;
pub mod types;
pub mod world;

// Async service requires the `server` feature.
#[cfg(feature = "server")]
pub mod service;

pub use backend::{Backend, BackendError, FileBackend, LockPolicy, LockToken, OwnerId};
pub use crate::config::{StoreConfig, WorldEntry};
pub use error::{ErrorKind, Result, WorldError};
pub use host::{HostAdapter, HostError, HostVersion};
pub use loader::{StartupFailure, StartupReport, WorldLoader};
pub use registry::BackendRegistry;
pub use types::{ChunkPos, Difficulty, Encoding, SpawnPoint, WorldProperties};
pub use world::World;

#[cfg(feature = "server")]
pub use host::ChannelHost;
#[cfg(feature = "server")]
pub use service::{LoadOptions, WorldService};
