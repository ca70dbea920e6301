//! Cache key of one tile at one resolution level.
//!
//! Tile indices are relative to the minimum grid position, so they are never
//! negative and always below `model::MAX_GRID_EXTENT`.

use std::fmt;

const X_BITS: u64 = 28;
const Y_BITS: u64 = 28;
const LEVEL_BITS: u64 = 8;

const X_SHIFT: u64 = 0;
const Y_SHIFT: u64 = X_BITS;
const LEVEL_SHIFT: u64 = X_BITS + Y_BITS;

const X_MASK: u64 = (1 << X_BITS) - 1;
const Y_MASK: u64 = (1 << Y_BITS) - 1;
const LEVEL_MASK: u64 = (1 << LEVEL_BITS) - 1;

/// Number of resolution levels a key can address.
pub const MAX_LEVELS: usize = 1 << LEVEL_BITS;

#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileKey(u64);

impl TileKey {
    /// TileKey:
    /// | level (8) | tile_y (28) | tile_x (28) |
    /// 63       56 55        28 27          0
    pub fn new(level: usize, tile_x: u32, tile_y: u32) -> Self {
        assert!(level < MAX_LEVELS, "level {level} does not fit a tile key");
        assert!(
            (tile_x as u64) <= X_MASK && (tile_y as u64) <= Y_MASK,
            "tile index ({tile_x}, {tile_y}) does not fit a tile key"
        );
        TileKey(
            (level as u64 & LEVEL_MASK) << LEVEL_SHIFT
                | (tile_y as u64 & Y_MASK) << Y_SHIFT
                | (tile_x as u64 & X_MASK) << X_SHIFT,
        )
    }

    pub fn level(&self) -> usize {
        ((self.0 >> LEVEL_SHIFT) & LEVEL_MASK) as usize
    }

    pub fn tile_x(&self) -> u32 {
        ((self.0 >> X_SHIFT) & X_MASK) as u32
    }

    pub fn tile_y(&self) -> u32 {
        ((self.0 >> Y_SHIFT) & Y_MASK) as u32
    }
}

impl fmt::Debug for TileKey {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            formatter,
            "TileKey(level {}, {}, {})",
            self.level(),
            self.tile_x(),
            self.tile_y()
        )
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            formatter,
            "L{}({}, {})",
            self.level(),
            self.tile_x(),
            self.tile_y()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::{MAX_LEVELS, TileKey};

    #[test]
    fn fields_do_not_overlap_at_their_limits() {
        let max_index = (1u32 << 28) - 1;
        let key = TileKey::new(MAX_LEVELS - 1, max_index, 0);
        assert_eq!(key.level(), 255);
        assert_eq!(key.tile_x(), max_index);
        assert_eq!(key.tile_y(), 0);

        let key = TileKey::new(0, 0, max_index);
        assert_eq!((key.level(), key.tile_x(), key.tile_y()), (0, 0, max_index));
    }

    #[test]
    fn keys_order_by_level_first() {
        assert!(TileKey::new(0, 9, 9) < TileKey::new(1, 0, 0));
        assert_eq!(TileKey::new(2, 3, 4).to_string(), "L2(3, 4)");
    }

    #[test]
    #[should_panic(expected = "does not fit a tile key")]
    fn oversized_index_is_rejected() {
        let _ = TileKey::new(0, 1 << 28, 0);
    }
}
