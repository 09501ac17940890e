//! Core world types shared across all modules.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::WorldError;

// ---------------------------------------------------------------------------
// Spawn point
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SpawnPoint {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl SpawnPoint {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

impl Default for SpawnPoint {
    fn default() -> Self {
        Self::new(0.0, 255.0, 0.0)
    }
}

impl std::fmt::Display for SpawnPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}, {}, {}", self.x, self.y, self.z)
    }
}

/// Parses the textual `"x, y, z"` form used by world configuration.
///
/// Exactly three comma-separated floating-point components are accepted;
/// surrounding whitespace on each component is ignored.
impl FromStr for SpawnPoint {
    type Err = WorldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || WorldError::IllegalArgument(format!("invalid spawn location '{}'", s));

        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        let [x, y, z] = parts.as_slice() else {
            return Err(invalid());
        };

        let parse = |v: &str| v.parse::<f64>().map_err(|_| invalid());
        Ok(Self::new(parse(*x)?, parse(*y)?, parse(*z)?))
    }
}

// ---------------------------------------------------------------------------
// Chunk coordinates
// ---------------------------------------------------------------------------

/// Column coordinate of a chunk in the world's chunk table.
///
/// Ordering is `(x, z)` lexicographic; the binary format stores chunk tables
/// in exactly this order.
#[derive(
    Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize,
)]
pub struct ChunkPos {
    pub x: i32,
    pub z: i32,
}

impl ChunkPos {
    pub fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }
}

impl std::fmt::Display for ChunkPos {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{},{}]", self.x, self.z)
    }
}

// ---------------------------------------------------------------------------
// Gameplay properties
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    #[default]
    Peaceful,
    Easy,
    Normal,
    Hard,
}

impl Difficulty {
    /// Numeric value used by hosts (0 = peaceful … 3 = hard).
    pub fn value(self) -> u8 {
        match self {
            Difficulty::Peaceful => 0,
            Difficulty::Easy => 1,
            Difficulty::Normal => 2,
            Difficulty::Hard => 3,
        }
    }
}

impl FromStr for Difficulty {
    type Err = WorldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "peaceful" => Ok(Difficulty::Peaceful),
            "easy" => Ok(Difficulty::Easy),
            "normal" => Ok(Difficulty::Normal),
            "hard" => Ok(Difficulty::Hard),
            _ => Err(WorldError::IllegalArgument(format!(
                "unknown difficulty '{}'",
                s
            ))),
        }
    }
}

impl std::fmt::Display for Difficulty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Difficulty::Peaceful => "peaceful",
            Difficulty::Easy => "easy",
            Difficulty::Normal => "normal",
            Difficulty::Hard => "hard",
        };
        f.write_str(label)
    }
}

/// Spawn and gameplay defaults applied to a world when it is loaded.
///
/// Built once from configuration and passed by value; never mutated.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WorldProperties {
    pub spawn: SpawnPoint,
    pub difficulty: Difficulty,
    pub allow_monsters: bool,
    pub allow_animals: bool,
    /// Read-only worlds are loaded without taking the backend lock and can
    /// never be saved.
    pub read_only: bool,
}

impl Default for WorldProperties {
    fn default() -> Self {
        Self {
            spawn: SpawnPoint::default(),
            difficulty: Difficulty::Peaceful,
            allow_monsters: true,
            allow_animals: true,
            read_only: false,
        }
    }
}

impl WorldProperties {
    pub fn read_only() -> Self {
        Self {
            read_only: true,
            ..Default::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Encoding generation
// ---------------------------------------------------------------------------

/// Block-data representation a world was serialized with.
///
/// The two generations share numeric ranges with different meanings, so a
/// world is only ever handed to a host running the same generation.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Encoding {
    /// Fixed-size block ids plus 4-bit metadata nibbles (1.12.2 and older).
    Legacy,
    /// Palette-based block states packed into longs (1.13 and newer).
    Modern,
}

impl Encoding {
    pub fn from_modern_flag(modern: bool) -> Self {
        if modern {
            Encoding::Modern
        } else {
            Encoding::Legacy
        }
    }

    pub fn is_modern(self) -> bool {
        matches!(self, Encoding::Modern)
    }

    /// Host generation described in user-facing messages.
    pub fn host_range(self) -> &'static str {
        match self {
            Encoding::Legacy => "1.12.2 or older",
            Encoding::Modern => "1.13 or newer",
        }
    }
}

impl std::fmt::Display for Encoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Encoding::Legacy => "legacy",
            Encoding::Modern => "modern",
        })
    }
}
