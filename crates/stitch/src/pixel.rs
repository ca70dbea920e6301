use std::sync::{Arc, OnceLock};

use glam::DAffine3;
use model::{Voxel, VoxelInterval};
use source::{LevelView, Pixel, SourceError, TileSource, Volatile, VolatileLevelView};

use crate::views::StitchContext;

/// Multi-level image as seen by a renderer: one voxel interval and one
/// voxel-to-world transform per level.
pub trait PixelSource<T>: Send + Sync {
    fn name(&self) -> &str;
    fn num_levels(&self) -> usize;
    fn num_timepoints(&self) -> usize;
    fn interval(&self, level: usize) -> VoxelInterval;
    fn source_transform(&self, level: usize) -> DAffine3;
    /// Blocks until the voxel is available. Voxels or timepoints outside the
    /// data read as background.
    fn sample(&self, level: usize, t: usize, voxel: Voxel) -> T;
}

/// Non-blocking counterpart of `PixelSource` sharing its coordinate system.
pub trait VolatilePixelSource<T>: Send + Sync {
    fn name(&self) -> &str;
    fn num_levels(&self) -> usize;
    fn num_timepoints(&self) -> usize;
    fn interval(&self, level: usize) -> VoxelInterval;
    fn source_transform(&self, level: usize) -> DAffine3;
    fn sample(&self, level: usize, t: usize, voxel: Voxel) -> Volatile<T>;
}

/// Precise and volatile source of the same image.
pub struct SourcePair<T> {
    pub source: Arc<dyn PixelSource<T>>,
    pub volatile: Arc<dyn VolatilePixelSource<T>>,
}

impl<T> Clone for SourcePair<T> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
            volatile: Arc::clone(&self.volatile),
        }
    }
}

pub(crate) struct StitchedSource<T> {
    pub(crate) context: Arc<StitchContext<T>>,
}

impl<T: Pixel> PixelSource<T> for StitchedSource<T> {
    fn name(&self) -> &str {
        &self.context.name
    }

    fn num_levels(&self) -> usize {
        self.context.mapper.num_levels()
    }

    fn num_timepoints(&self) -> usize {
        self.context.num_timepoints
    }

    fn interval(&self, level: usize) -> VoxelInterval {
        self.context.global_interval(level)
    }

    fn source_transform(&self, level: usize) -> DAffine3 {
        self.context.source_transform(level)
    }

    fn sample(&self, level: usize, t: usize, voxel: Voxel) -> T {
        crate::StitchedBlockingView::new(Arc::clone(&self.context), level).get(t, voxel)
    }
}

pub(crate) struct StitchedVolatileSource<T> {
    pub(crate) context: Arc<StitchContext<T>>,
}

impl<T: Pixel> VolatilePixelSource<T> for StitchedVolatileSource<T> {
    fn name(&self) -> &str {
        &self.context.name
    }

    fn num_levels(&self) -> usize {
        self.context.mapper.num_levels()
    }

    fn num_timepoints(&self) -> usize {
        self.context.num_timepoints
    }

    fn interval(&self, level: usize) -> VoxelInterval {
        self.context.global_interval(level)
    }

    fn source_transform(&self, level: usize) -> DAffine3 {
        self.context.source_transform(level)
    }

    fn sample(&self, level: usize, t: usize, voxel: Voxel) -> Volatile<T> {
        crate::StitchedVolatileView::new(Arc::clone(&self.context), level).get(t, voxel)
    }
}

/// Level views of a single tile, opened on first use and kept.
struct LazyLevels<V: ?Sized> {
    levels: Vec<OnceLock<Option<Arc<V>>>>,
}

impl<V: ?Sized> LazyLevels<V> {
    fn new(num_levels: usize) -> Self {
        Self {
            levels: (0..num_levels).map(|_| OnceLock::new()).collect(),
        }
    }

    fn get(
        &self,
        name: &str,
        level: usize,
        open: impl FnOnce() -> Result<Arc<V>, SourceError>,
    ) -> Option<&Arc<V>> {
        self.levels
            .get(level)?
            .get_or_init(|| match open() {
                Ok(view) => Some(view),
                Err(error) => {
                    log::warn!("{name}: level {level} unavailable: {error}");
                    None
                }
            })
            .as_ref()
    }
}

pub(crate) struct TilePixelSource<T> {
    tile: TileSource<T>,
    levels: LazyLevels<dyn LevelView<T>>,
}

impl<T: Pixel> TilePixelSource<T> {
    pub(crate) fn new(tile: TileSource<T>) -> Self {
        let levels = LazyLevels::new(tile.num_levels());
        Self { tile, levels }
    }
}

impl<T: Pixel> PixelSource<T> for TilePixelSource<T> {
    fn name(&self) -> &str {
        self.tile.name()
    }

    fn num_levels(&self) -> usize {
        self.tile.num_levels()
    }

    fn num_timepoints(&self) -> usize {
        self.tile.num_timepoints()
    }

    fn interval(&self, level: usize) -> VoxelInterval {
        VoxelInterval::from_dimensions(self.tile.level_dimensions(level))
    }

    fn source_transform(&self, level: usize) -> DAffine3 {
        self.tile.level_transform(level)
    }

    fn sample(&self, level: usize, t: usize, voxel: Voxel) -> T {
        if t >= self.tile.num_timepoints() {
            return T::default();
        }
        let view = self
            .levels
            .get(self.tile.name(), level, || self.tile.open_level(level));
        match view {
            Some(view) if view.interval().contains(voxel) => view.get(t, voxel),
            _ => T::default(),
        }
    }
}

pub(crate) struct TileVolatilePixelSource<T> {
    tile: TileSource<T>,
    levels: LazyLevels<dyn VolatileLevelView<T>>,
}

impl<T: Pixel> TileVolatilePixelSource<T> {
    pub(crate) fn new(tile: TileSource<T>) -> Self {
        let levels = LazyLevels::new(tile.num_levels());
        Self { tile, levels }
    }
}

impl<T: Pixel> VolatilePixelSource<T> for TileVolatilePixelSource<T> {
    fn name(&self) -> &str {
        self.tile.name()
    }

    fn num_levels(&self) -> usize {
        self.tile.num_levels()
    }

    fn num_timepoints(&self) -> usize {
        self.tile.num_timepoints()
    }

    fn interval(&self, level: usize) -> VoxelInterval {
        VoxelInterval::from_dimensions(self.tile.level_dimensions(level))
    }

    fn source_transform(&self, level: usize) -> DAffine3 {
        self.tile.level_transform(level)
    }

    fn sample(&self, level: usize, t: usize, voxel: Voxel) -> Volatile<T> {
        if t >= self.tile.num_timepoints() {
            return Volatile::background();
        }
        let view = self
            .levels
            .get(self.tile.name(), level, || self.tile.open_volatile_level(level));
        match view {
            Some(view) if view.interval().contains(voxel) => view.get(t, voxel),
            _ => Volatile::background(),
        }
    }
}
