//! Source image abstraction consumed by the stitching cache.
//!
//! A source is a multi-resolution image: every level has its own voxel
//! interval and an affine transform into world space. Each level can be
//! opened twice, once as a precise view and once as a placeholder-aware
//! (volatile) view; both share one coordinate system.

use std::fmt;
use std::sync::Arc;

use glam::{DAffine3, DVec3};
use model::{RealBox, Voxel, VoxelInterval};

mod memory;
mod tile_source;

#[cfg(feature = "test-helpers")]
pub mod test_helpers;

pub use memory::MemorySource;
pub use tile_source::TileSource;

/// Pixel value carried by a source. `Default` is the background value.
pub trait Pixel: Copy + Default + PartialEq + fmt::Debug + Send + Sync + 'static {}

impl<T> Pixel for T where T: Copy + Default + PartialEq + fmt::Debug + Send + Sync + 'static {}

/// A value paired with a flag telling whether it is final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Volatile<T> {
    pub value: T,
    pub valid: bool,
}

impl<T: Pixel> Volatile<T> {
    pub fn valid(value: T) -> Self {
        Self { value, valid: true }
    }

    pub fn invalid() -> Self {
        Self {
            value: T::default(),
            valid: false,
        }
    }

    /// Background that the renderer may accept as final.
    pub fn background() -> Self {
        Self::valid(T::default())
    }
}

/// Precise view of one resolution level.
///
/// `get` may only be called with voxels inside `interval()`.
pub trait LevelView<T>: Send + Sync {
    fn interval(&self) -> VoxelInterval;
    fn get(&self, t: usize, voxel: Voxel) -> T;
}

/// Placeholder-aware view of one resolution level.
pub trait VolatileLevelView<T>: Send + Sync {
    fn interval(&self) -> VoxelInterval;
    fn get(&self, t: usize, voxel: Voxel) -> Volatile<T>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    #[error("level {level} is out of range, source has {levels} levels")]
    LevelOutOfRange { level: usize, levels: usize },
    #[error("source data unavailable: {0}")]
    Unavailable(String),
}

/// A multi-resolution image the stitching cache reads tiles from.
///
/// Metadata accessors are expected to be cheap; `open_*` may perform I/O.
pub trait ImageSource<T>: Send + Sync {
    fn name(&self) -> &str;
    fn num_levels(&self) -> usize;
    fn num_timepoints(&self) -> usize;
    fn level_transform(&self, level: usize) -> DAffine3;
    fn level_dimensions(&self, level: usize) -> [u64; 3];

    /// Real-space extent of level 0, voxel centers at integer coordinates.
    fn mask(&self) -> RealBox {
        let dims = self.level_dimensions(0);
        let max = DVec3::new(dims[0] as f64, dims[1] as f64, dims[2] as f64) - 0.5;
        RealBox::new(DVec3::splat(-0.5), max).transformed(&self.level_transform(0))
    }

    fn open_level(&self, level: usize) -> Result<Arc<dyn LevelView<T>>, SourceError>;
    fn open_volatile_level(
        &self,
        level: usize,
    ) -> Result<Arc<dyn VolatileLevelView<T>>, SourceError>;
}

/// Euclidean norm of each linear column, i.e. the voxel size per axis.
pub fn voxel_size(transform: &DAffine3) -> DVec3 {
    DVec3::new(
        transform.matrix3.x_axis.length(),
        transform.matrix3.y_axis.length(),
        transform.matrix3.z_axis.length(),
    )
}
