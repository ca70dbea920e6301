use std::sync::Arc;

use model::{Voxel, VoxelInterval};
use source::{LevelView, Pixel, Volatile, VolatileLevelView};

/// Where a tile's native data sits inside its padded grid cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellPlacement {
    /// Padded cell extent, the interval the wrapped view answers for.
    pub cell: VoxelInterval,
    /// Integer part of the margin translation.
    pub offset: [i64; 3],
}

impl CellPlacement {
    pub fn new(cell_dims: [u64; 3], offset: [i64; 3]) -> Self {
        Self {
            cell: VoxelInterval::from_dimensions(cell_dims),
            offset,
        }
    }
}

/// A tile level moved into its grid cell.
///
/// The native interval is shifted to start at zero, translated by the
/// integer margin, and extended with the background value. Timepoints the
/// tile does not have read as background too.
pub struct TileLevelView<V: ?Sized> {
    inner: Arc<V>,
    native: VoxelInterval,
    timepoints: usize,
    placement: CellPlacement,
}

impl<V: ?Sized> TileLevelView<V> {
    pub fn new(
        inner: Arc<V>,
        native: VoxelInterval,
        timepoints: usize,
        placement: CellPlacement,
    ) -> Self {
        Self {
            inner,
            native,
            timepoints,
            placement,
        }
    }

    fn native_voxel(&self, t: usize, voxel: Voxel) -> Option<Voxel> {
        if t >= self.timepoints {
            return None;
        }
        let native: Voxel = std::array::from_fn(|d| {
            voxel[d] - self.placement.offset[d] + self.native.min[d]
        });
        self.native.contains(native).then_some(native)
    }
}

impl<T: Pixel> LevelView<T> for TileLevelView<dyn LevelView<T>> {
    fn interval(&self) -> VoxelInterval {
        self.placement.cell
    }

    fn get(&self, t: usize, voxel: Voxel) -> T {
        match self.native_voxel(t, voxel) {
            Some(native) => self.inner.get(t, native),
            None => T::default(),
        }
    }
}

impl<T: Pixel> VolatileLevelView<T> for TileLevelView<dyn VolatileLevelView<T>> {
    fn interval(&self) -> VoxelInterval {
        self.placement.cell
    }

    fn get(&self, t: usize, voxel: Voxel) -> Volatile<T> {
        match self.native_voxel(t, voxel) {
            Some(native) => self.inner.get(t, native),
            None => Volatile::background(),
        }
    }
}
