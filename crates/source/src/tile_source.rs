use std::fmt;
use std::sync::Arc;

use glam::{DAffine3, DVec3};
use model::{RealBox, Voxel, VoxelInterval};

use crate::{ImageSource, LevelView, Pixel, SourceError, Volatile, VolatileLevelView};

/// A source that may be placed into a stitched grid.
///
/// There is no stitched variant: a stitched image can only be
/// re-used as a grid cell after being flattened into its original tiles.
pub enum TileSource<T> {
    Direct(Arc<dyn ImageSource<T>>),
    /// World transform prepended to every level transform of `inner`.
    Transformed {
        inner: Box<TileSource<T>>,
        transform: DAffine3,
    },
    /// Voxels whose world position falls outside `region` read as background.
    Masked {
        inner: Box<TileSource<T>>,
        region: RealBox,
    },
}

impl<T> Clone for TileSource<T> {
    fn clone(&self) -> Self {
        match self {
            TileSource::Direct(source) => TileSource::Direct(Arc::clone(source)),
            TileSource::Transformed { inner, transform } => TileSource::Transformed {
                inner: inner.clone(),
                transform: *transform,
            },
            TileSource::Masked { inner, region } => TileSource::Masked {
                inner: inner.clone(),
                region: *region,
            },
        }
    }
}

impl<T: Pixel> fmt::Debug for TileSource<T> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TileSource::Direct(source) => write!(formatter, "Direct({})", source.name()),
            TileSource::Transformed { inner, .. } => write!(formatter, "Transformed({inner:?})"),
            TileSource::Masked { inner, .. } => write!(formatter, "Masked({inner:?})"),
        }
    }
}

impl<T: Pixel> TileSource<T> {
    pub fn direct(source: Arc<dyn ImageSource<T>>) -> Self {
        TileSource::Direct(source)
    }

    pub fn transformed(self, transform: DAffine3) -> Self {
        TileSource::Transformed {
            inner: Box::new(self),
            transform,
        }
    }

    pub fn masked(self, region: RealBox) -> Self {
        TileSource::Masked {
            inner: Box::new(self),
            region,
        }
    }

    fn root(&self) -> &Arc<dyn ImageSource<T>> {
        match self {
            TileSource::Direct(source) => source,
            TileSource::Transformed { inner, .. } | TileSource::Masked { inner, .. } => {
                inner.root()
            }
        }
    }

    pub fn name(&self) -> &str {
        self.root().name()
    }

    pub fn num_levels(&self) -> usize {
        self.root().num_levels()
    }

    pub fn num_timepoints(&self) -> usize {
        self.root().num_timepoints()
    }

    pub fn level_dimensions(&self, level: usize) -> [u64; 3] {
        self.root().level_dimensions(level)
    }

    pub fn level_transform(&self, level: usize) -> DAffine3 {
        match self {
            TileSource::Direct(source) => source.level_transform(level),
            TileSource::Transformed { inner, transform } => {
                *transform * inner.level_transform(level)
            }
            TileSource::Masked { inner, .. } => inner.level_transform(level),
        }
    }

    pub fn mask(&self) -> RealBox {
        match self {
            TileSource::Direct(source) => source.mask(),
            TileSource::Transformed { inner, transform } => inner.mask().transformed(transform),
            TileSource::Masked { region, .. } => *region,
        }
    }

    pub fn open_level(&self, level: usize) -> Result<Arc<dyn LevelView<T>>, SourceError> {
        self.check_level(level)?;
        match self {
            TileSource::Direct(source) => source.open_level(level),
            TileSource::Transformed { inner, .. } => inner.open_level(level),
            TileSource::Masked { inner, region } => Ok(Arc::new(MaskedLevelView {
                inner: inner.open_level(level)?,
                to_world: inner.level_transform(level),
                region: *region,
            })),
        }
    }

    pub fn open_volatile_level(
        &self,
        level: usize,
    ) -> Result<Arc<dyn VolatileLevelView<T>>, SourceError> {
        self.check_level(level)?;
        match self {
            TileSource::Direct(source) => source.open_volatile_level(level),
            TileSource::Transformed { inner, .. } => inner.open_volatile_level(level),
            TileSource::Masked { inner, region } => Ok(Arc::new(MaskedVolatileLevelView {
                inner: inner.open_volatile_level(level)?,
                to_world: inner.level_transform(level),
                region: *region,
            })),
        }
    }

    fn check_level(&self, level: usize) -> Result<(), SourceError> {
        let levels = self.num_levels();
        if level >= levels {
            return Err(SourceError::LevelOutOfRange { level, levels });
        }
        Ok(())
    }
}

fn voxel_to_world(to_world: &DAffine3, voxel: Voxel) -> DVec3 {
    to_world.transform_point3(DVec3::new(
        voxel[0] as f64,
        voxel[1] as f64,
        voxel[2] as f64,
    ))
}

struct MaskedLevelView<T> {
    inner: Arc<dyn LevelView<T>>,
    to_world: DAffine3,
    region: RealBox,
}

impl<T: Pixel> LevelView<T> for MaskedLevelView<T> {
    fn interval(&self) -> VoxelInterval {
        self.inner.interval()
    }

    fn get(&self, t: usize, voxel: Voxel) -> T {
        if self.region.contains(voxel_to_world(&self.to_world, voxel)) {
            self.inner.get(t, voxel)
        } else {
            T::default()
        }
    }
}

struct MaskedVolatileLevelView<T> {
    inner: Arc<dyn VolatileLevelView<T>>,
    to_world: DAffine3,
    region: RealBox,
}

impl<T: Pixel> VolatileLevelView<T> for MaskedVolatileLevelView<T> {
    fn interval(&self) -> VoxelInterval {
        self.inner.interval()
    }

    fn get(&self, t: usize, voxel: Voxel) -> Volatile<T> {
        if self.region.contains(voxel_to_world(&self.to_world, voxel)) {
            self.inner.get(t, voxel)
        } else {
            Volatile::background()
        }
    }
}
