use model::{GridLayout, GridPos, Voxel, VoxelInterval};

use crate::PyramidPlan;

/// Tile cell a stitched voxel falls into, plus the voxel inside that cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileLocation {
    pub tile_x: i64,
    pub tile_y: i64,
    pub local: Voxel,
}

/// Pure mapping between stitched voxel space and tile cells.
///
/// Stitching is two-dimensional: z passes through unchanged. Indices outside
/// the grid are returned as-is; callers check them against the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinateMapper {
    tile_dims: Vec<[u64; 3]>,
    min_grid: GridPos,
}

impl CoordinateMapper {
    pub fn new(plan: &PyramidPlan, min_grid: GridPos) -> Self {
        Self {
            tile_dims: plan.tile_dims(),
            min_grid,
        }
    }

    pub fn num_levels(&self) -> usize {
        self.tile_dims.len()
    }

    pub fn tile_dims(&self, level: usize) -> [u64; 3] {
        self.tile_dims[level]
    }

    pub fn to_tile_index(&self, global: Voxel, level: usize) -> TileLocation {
        let [width, height, _] = self.tile_dims[level].map(|extent| extent as i64);
        let tile_x = global[0].div_euclid(width);
        let tile_y = global[1].div_euclid(height);
        TileLocation {
            tile_x,
            tile_y,
            local: [
                global[0] - tile_x * width,
                global[1] - tile_y * height,
                global[2],
            ],
        }
    }

    pub fn grid_to_global_interval(&self, grid: GridPos, level: usize) -> VoxelInterval {
        let [width, height, depth] = self.tile_dims[level].map(|extent| extent as i64);
        let min = [
            (grid.x as i64 - self.min_grid.x as i64) * width,
            (grid.y as i64 - self.min_grid.y as i64) * height,
            0,
        ];
        VoxelInterval::new(min, [min[0] + width, min[1] + height, depth])
    }

    /// Stitched extent of a whole layout at `level`.
    pub fn global_interval(&self, layout: &GridLayout, level: usize) -> VoxelInterval {
        let [width, height, depth] = self.tile_dims[level];
        VoxelInterval::from_dimensions([
            layout.columns() as u64 * width,
            layout.rows() as u64 * height,
            depth,
        ])
    }
}
