//! Tile status cache and loader.
//!
//! Every (level, tile) pair of a stitched grid has one entry whose status
//! moves `Closed -> Opening -> Open | Failed` and never back. The first
//! caller to claim a closed tile loads it; everybody else waits (blocking
//! path) or reads a placeholder (volatile path).

mod cache;
mod key;
mod loader;
mod pipeline;

pub use cache::{TileCache, TileStats, TileStatus, TileViews};
pub use key::{MAX_LEVELS, TileKey};
pub use loader::{TileLoadError, TileLoader};
pub use pipeline::{CellPlacement, TileLevelView};

#[cfg(test)]
mod tests;
