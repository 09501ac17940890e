//! Compatibility gate between a decoded world and the running host.

use crate::error::{Result, WorldError};
use crate::world::World;

/// Accept `world` only if its encoding generation is the host's.
///
/// There is no implicit conversion in either direction: legacy and modern
/// block data share numeric ranges with different meanings.
pub fn check_compatible(world: &World, host_uses_modern: bool) -> Result<()> {
    if world.is_modern() != host_uses_modern {
        return Err(WorldError::UnsupportedWorld {
            world: world.name().to_string(),
            modern: world.is_modern(),
        });
    }
    Ok(())
}
