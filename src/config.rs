//! Service configuration (TOML file + `WORLDSTORE__*` environment, via the
//! `config` crate).
//!
//! ## Keys
//!
//! | Key               | Default      | Description                                   |
//! |-------------------|--------------|-----------------------------------------------|
//! | `data_dir`        | `worlds`     | directory of the `file` backend               |
//! | `lock_stale_secs` | `300`        | heartbeat age after which a lock is reclaimed |
//! | `heartbeat_secs`  | `60`         | interval between lock heartbeats              |
//! | `load_timeout_ms` | `30000`      | per-world backend read timeout                |
//! | `host_version`    | *(none)*     | host package name probed for the adapter      |
//! | `[[worlds]]`      | *(empty)*    | ordered world entries, see [`WorldEntry`]     |

use crate::backend::LockPolicy;
use crate::error::Result;
use crate::types::{Difficulty, SpawnPoint, WorldProperties};
use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_PREFIX: &str = "WORLDSTORE";

// ---------------------------------------------------------------------------
// World entries
// ---------------------------------------------------------------------------

fn default_source() -> String {
    "file".into()
}

fn default_difficulty() -> String {
    "peaceful".into()
}

fn default_spawn() -> String {
    "0, 255, 0".into()
}

fn enabled() -> bool {
    true
}

/// One configured world. Textual fields are kept raw and validated by
/// [`WorldEntry::properties`] so a malformed entry fails on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldEntry {
    pub name: String,
    /// Backend registry name.
    #[serde(default = "default_source")]
    pub source: String,
    #[serde(default = "default_difficulty")]
    pub difficulty: String,
    /// `"x, y, z"`.
    #[serde(default = "default_spawn")]
    pub spawn: String,
    #[serde(default = "enabled")]
    pub load_on_startup: bool,
    #[serde(default = "enabled")]
    pub allow_monsters: bool,
    #[serde(default = "enabled")]
    pub allow_animals: bool,
    #[serde(default)]
    pub read_only: bool,
}

impl WorldEntry {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: default_source(),
            difficulty: default_difficulty(),
            spawn: default_spawn(),
            load_on_startup: true,
            allow_monsters: true,
            allow_animals: true,
            read_only: false,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn with_difficulty(mut self, difficulty: impl Into<String>) -> Self {
        self.difficulty = difficulty.into();
        self
    }

    pub fn with_spawn(mut self, spawn: impl Into<String>) -> Self {
        self.spawn = spawn.into();
        self
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Parse difficulty and spawn into immutable world properties.
    pub fn properties(&self) -> Result<WorldProperties> {
        let difficulty: Difficulty = self.difficulty.parse()?;
        let spawn: SpawnPoint = self.spawn.parse()?;
        Ok(WorldProperties {
            spawn,
            difficulty,
            allow_monsters: self.allow_monsters,
            allow_animals: self.allow_animals,
            read_only: self.read_only,
        })
    }
}

// ---------------------------------------------------------------------------
// Store config
// ---------------------------------------------------------------------------

fn default_data_dir() -> PathBuf {
    PathBuf::from("worlds")
}

fn default_stale_secs() -> u64 {
    300
}

fn default_heartbeat_secs() -> u64 {
    60
}

fn default_timeout_ms() -> u64 {
    30_000
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_stale_secs")]
    pub lock_stale_secs: u64,
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
    #[serde(default = "default_timeout_ms")]
    pub load_timeout_ms: u64,
    #[serde(default)]
    pub host_version: Option<String>,
    #[serde(default)]
    pub worlds: Vec<WorldEntry>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            lock_stale_secs: default_stale_secs(),
            heartbeat_secs: default_heartbeat_secs(),
            load_timeout_ms: default_timeout_ms(),
            host_version: None,
            worlds: Vec::new(),
        }
    }
}

impl StoreConfig {
    /// Layer an optional TOML file under `WORLDSTORE__*` environment
    /// overrides.
    pub fn load(path: Option<&Path>) -> std::result::Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).format(FileFormat::Toml));
        }
        builder
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?
            .try_deserialize()
    }

    pub fn from_toml_str(toml: &str) -> std::result::Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?
            .try_deserialize()
    }

    pub fn lock_policy(&self) -> LockPolicy {
        LockPolicy {
            stale_after: Duration::from_secs(self.lock_stale_secs),
        }
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs.max(1))
    }

    pub fn load_timeout(&self) -> Duration {
        Duration::from_millis(self.load_timeout_ms)
    }
}
