use glam::{DAffine3, DVec3};

/// Voxel coordinate in `(x, y, z)` order.
pub type Voxel = [i64; 3];

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GridPos {
    pub x: i32,
    pub y: i32,
}

impl GridPos {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl From<(i32, i32)> for GridPos {
    fn from((x, y): (i32, i32)) -> Self {
        Self { x, y }
    }
}

/// Half-open voxel interval: `min` is inclusive, `max` is exclusive.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct VoxelInterval {
    pub min: Voxel,
    pub max: Voxel,
}

impl VoxelInterval {
    pub fn new(min: Voxel, max: Voxel) -> Self {
        Self { min, max }
    }

    pub fn from_dimensions(dimensions: [u64; 3]) -> Self {
        Self {
            min: [0, 0, 0],
            max: dimensions.map(|extent| extent as i64),
        }
    }

    pub fn dimensions(&self) -> [u64; 3] {
        std::array::from_fn(|d| (self.max[d] - self.min[d]).max(0) as u64)
    }

    pub fn contains(&self, voxel: Voxel) -> bool {
        (0..3).all(|d| voxel[d] >= self.min[d] && voxel[d] < self.max[d])
    }

    pub fn is_empty(&self) -> bool {
        (0..3).any(|d| self.max[d] <= self.min[d])
    }
}

/// Axis-aligned box in real (world) space. Both corners are inclusive.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct RealBox {
    pub min: DVec3,
    pub max: DVec3,
}

impl RealBox {
    pub fn new(min: DVec3, max: DVec3) -> Self {
        Self {
            min: min.min(max),
            max: min.max(max),
        }
    }

    pub fn dimensions(&self) -> DVec3 {
        self.max - self.min
    }

    pub fn contains(&self, point: DVec3) -> bool {
        point.cmpge(self.min).all() && point.cmple(self.max).all()
    }

    pub fn union(&self, other: &RealBox) -> RealBox {
        RealBox {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    pub fn translate(&self, offset: DVec3) -> RealBox {
        RealBox {
            min: self.min + offset,
            max: self.max + offset,
        }
    }

    /// Moves the box so that its minimum corner sits at the origin.
    pub fn at_origin(&self) -> RealBox {
        self.translate(-self.min)
    }

    /// Axis-aligned bounds of the eight transformed corners.
    pub fn transformed(&self, transform: &DAffine3) -> RealBox {
        let mut min = DVec3::splat(f64::INFINITY);
        let mut max = DVec3::splat(f64::NEG_INFINITY);
        for corner in 0..8 {
            let point = DVec3::new(
                if corner & 1 == 0 { self.min.x } else { self.max.x },
                if corner & 2 == 0 { self.min.y } else { self.max.y },
                if corner & 4 == 0 { self.min.z } else { self.max.z },
            );
            let mapped = transform.transform_point3(point);
            min = min.min(mapped);
            max = max.max(mapped);
        }
        RealBox { min, max }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GridLayoutError {
    #[error("grid layout needs at least one tile")]
    Empty,
    #[error("grid position {0:?} is assigned twice")]
    DuplicatePosition(GridPos),
    #[error("grid spans {columns}x{rows} cells, more than a tile key can address")]
    TooLarge { columns: u64, rows: u64 },
}

/// Largest tile index a layout may produce along one axis.
pub const MAX_GRID_EXTENT: u64 = 1 << 28;

/// Occupancy of a stitched grid.
///
/// Tile indices start at the lower-left corner: `(pos - min)`. Only occupied
/// cells are stored, so a sparse grid costs memory per tile, not per cell of
/// its bounding box.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridLayout {
    min: GridPos,
    max: GridPos,
    columns: u32,
    rows: u32,
    /// Occupied tile indices, sorted row-major by `(tile_y, tile_x)`.
    occupied: Vec<(u32, u32)>,
}

impl GridLayout {
    pub fn from_positions(positions: &[GridPos]) -> Result<Self, GridLayoutError> {
        let first = positions.first().ok_or(GridLayoutError::Empty)?;
        let (mut min, mut max) = (*first, *first);
        for pos in positions {
            min.x = min.x.min(pos.x);
            min.y = min.y.min(pos.y);
            max.x = max.x.max(pos.x);
            max.y = max.y.max(pos.y);
        }
        let columns = (max.x as i64 - min.x as i64 + 1) as u64;
        let rows = (max.y as i64 - min.y as i64 + 1) as u64;
        if columns > MAX_GRID_EXTENT || rows > MAX_GRID_EXTENT {
            return Err(GridLayoutError::TooLarge { columns, rows });
        }

        let mut layout = Self {
            min,
            max,
            columns: columns as u32,
            rows: rows as u32,
            occupied: Vec::with_capacity(positions.len()),
        };
        let mut occupied: Vec<(u32, u32)> = positions
            .iter()
            .map(|pos| layout.tile_index(*pos))
            .collect();
        occupied.sort_unstable_by_key(|&(tile_x, tile_y)| (tile_y, tile_x));
        if let Some(pair) = occupied.windows(2).find(|pair| pair[0] == pair[1]) {
            let (tile_x, tile_y) = pair[0];
            return Err(GridLayoutError::DuplicatePosition(
                layout.grid_pos(tile_x, tile_y),
            ));
        }
        layout.occupied = occupied;
        Ok(layout)
    }

    pub fn min(&self) -> GridPos {
        self.min
    }

    pub fn max(&self) -> GridPos {
        self.max
    }

    pub fn columns(&self) -> u32 {
        self.columns
    }

    pub fn rows(&self) -> u32 {
        self.rows
    }

    /// Cells of the bounding box, occupied or not.
    pub fn cell_count(&self) -> u64 {
        self.columns as u64 * self.rows as u64
    }

    pub fn occupied_count(&self) -> usize {
        self.occupied.len()
    }

    /// Tile index of a grid position, relative to the layout minimum.
    pub fn tile_index(&self, pos: GridPos) -> (u32, u32) {
        (
            (pos.x as i64 - self.min.x as i64) as u32,
            (pos.y as i64 - self.min.y as i64) as u32,
        )
    }

    pub fn grid_pos(&self, tile_x: u32, tile_y: u32) -> GridPos {
        GridPos {
            x: (self.min.x as i64 + tile_x as i64) as i32,
            y: (self.min.y as i64 + tile_y as i64) as i32,
        }
    }

    /// Row-major rank of an occupied cell, in `0..occupied_count()`.
    pub fn slot(&self, tile_x: i64, tile_y: i64) -> Option<usize> {
        if tile_x < 0 || tile_y < 0 {
            return None;
        }
        if tile_x >= self.columns as i64 || tile_y >= self.rows as i64 {
            return None;
        }
        let cell = (tile_y as u32, tile_x as u32);
        self.occupied
            .binary_search_by_key(&cell, |&(x, y)| (y, x))
            .ok()
    }

    pub fn contains(&self, tile_x: i64, tile_y: i64) -> bool {
        self.slot(tile_x, tile_y).is_some()
    }

    pub fn iter_occupied(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.occupied.iter().copied()
    }
}

/// Row-major positions for `count` tiles on a square-ish grid.
pub fn auto_grid_positions(count: usize) -> Vec<GridPos> {
    if count == 0 {
        return Vec::new();
    }
    let columns = (count as f64).sqrt().ceil() as usize;
    (0..count)
        .map(|index| GridPos {
            x: (index % columns) as i32,
            y: (index / columns) as i32,
        })
        .collect()
}
