//! Host adapters.
//!
//! The host is whatever turns a decoded [`World`] into a live, ticking world.
//! Its version is a closed set probed once at startup; anything else fails
//! fast instead of guessing at an encoding.

use crate::types::Encoding;
use crate::world::World;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum HostError {
    #[error("unsupported host version '{0}'")]
    UnsupportedVersion(String),
    #[error("host is gone, world '{0}' was not materialized")]
    Disconnected(String),
}

#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub enum HostVersion {
    V1_8_R3,
    V1_9_R1,
    V1_9_R2,
    V1_10_R1,
    V1_11_R1,
    V1_12_R1,
    V1_13_R1,
    V1_13_R2,
    V1_14_R1,
}

impl HostVersion {
    pub const ALL: [HostVersion; 9] = [
        HostVersion::V1_8_R3,
        HostVersion::V1_9_R1,
        HostVersion::V1_9_R2,
        HostVersion::V1_10_R1,
        HostVersion::V1_11_R1,
        HostVersion::V1_12_R1,
        HostVersion::V1_13_R1,
        HostVersion::V1_13_R2,
        HostVersion::V1_14_R1,
    ];

    /// Identify the host from its package name, e.g.
    /// `org.bukkit.craftbukkit.v1_12_R1`. Only the last segment counts.
    pub fn probe(package_name: &str) -> Result<Self, HostError> {
        let segment = package_name.rsplit('.').next().unwrap_or(package_name);
        segment.parse()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HostVersion::V1_8_R3 => "v1_8_R3",
            HostVersion::V1_9_R1 => "v1_9_R1",
            HostVersion::V1_9_R2 => "v1_9_R2",
            HostVersion::V1_10_R1 => "v1_10_R1",
            HostVersion::V1_11_R1 => "v1_11_R1",
            HostVersion::V1_12_R1 => "v1_12_R1",
            HostVersion::V1_13_R1 => "v1_13_R1",
            HostVersion::V1_13_R2 => "v1_13_R2",
            HostVersion::V1_14_R1 => "v1_14_R1",
        }
    }

    /// 1.13 and newer hosts use palette-based block states.
    pub fn uses_modern_encoding(self) -> bool {
        self >= HostVersion::V1_13_R1
    }

    pub fn encoding(self) -> Encoding {
        Encoding::from_modern_flag(self.uses_modern_encoding())
    }
}

impl FromStr for HostVersion {
    type Err = HostError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        HostVersion::ALL
            .into_iter()
            .find(|v| v.as_str() == s)
            .ok_or_else(|| HostError::UnsupportedVersion(s.to_string()))
    }
}

impl fmt::Display for HostVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the loader needs from the running host.
pub trait HostAdapter: Send + Sync {
    fn version(&self) -> HostVersion;

    fn uses_modern_encoding(&self) -> bool {
        self.version().uses_modern_encoding()
    }

    /// Take ownership of a loaded world. Called once per world.
    fn materialize(&self, world: World) -> Result<(), HostError>;
}

#[cfg(feature = "server")]
pub use channel::ChannelHost;

#[cfg(feature = "server")]
mod channel {
    use super::{HostAdapter, HostError, HostVersion};
    use crate::world::World;
    use tokio::sync::mpsc;

    /// Host whose tick thread drains loaded worlds from a channel.
    #[derive(Clone)]
    pub struct ChannelHost {
        version: HostVersion,
        tx: mpsc::UnboundedSender<World>,
    }

    impl ChannelHost {
        pub fn new(version: HostVersion) -> (Self, mpsc::UnboundedReceiver<World>) {
            let (tx, rx) = mpsc::unbounded_channel();
            (Self { version, tx }, rx)
        }
    }

    impl HostAdapter for ChannelHost {
        fn version(&self) -> HostVersion {
            self.version
        }

        fn materialize(&self, world: World) -> Result<(), HostError> {
            self.tx
                .send(world)
                .map_err(|e| HostError::Disconnected(e.0.name().to_string()))
        }
    }
}
