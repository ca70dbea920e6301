use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use glam::{DAffine3, DVec3};
use model::{Voxel, VoxelInterval};

use crate::{ImageSource, LevelView, Pixel, SourceError, Volatile, VolatileLevelView};

struct MemoryLevel<T> {
    transform: DAffine3,
    dimensions: [u64; 3],
    // t-major, then z, y, x
    voxels: Arc<[T]>,
}

/// Fully materialized multi-level image.
///
/// Counts how often each level view is opened so callers can observe load
/// behaviour. An injected failure makes every open return `Unavailable`.
pub struct MemorySource<T> {
    name: String,
    timepoints: usize,
    levels: Vec<MemoryLevel<T>>,
    failure: Option<String>,
    open_count: AtomicUsize,
    volatile_open_count: AtomicUsize,
}

impl<T: Pixel> MemorySource<T> {
    /// Builds a pyramid whose level `l` is level `l - 1` downsampled by
    /// `factors[l - 1]`, sampling `value(level, t, voxel)` for every voxel.
    ///
    /// Level transforms follow the usual mipmap convention: voxel size scales
    /// with the cumulative factor and level centers shift by half the factor.
    pub fn from_fn(
        name: impl Into<String>,
        dimensions: [u64; 3],
        voxel_size: DVec3,
        factors: &[[u64; 3]],
        timepoints: usize,
        value: impl Fn(usize, usize, Voxel) -> T,
    ) -> Self {
        assert!(timepoints > 0, "memory source needs at least one timepoint");
        let mut levels = Vec::with_capacity(factors.len() + 1);
        let mut level_dims = dimensions;
        let mut cumulative = DVec3::ONE;
        for level in 0..=factors.len() {
            if level > 0 {
                let factor = factors[level - 1];
                assert!(
                    factor.iter().all(|&f| f > 0),
                    "downsampling factors must be positive"
                );
                level_dims = std::array::from_fn(|d| level_dims[d].div_ceil(factor[d]));
                cumulative *= DVec3::new(factor[0] as f64, factor[1] as f64, factor[2] as f64);
            }
            let scale = voxel_size * cumulative;
            let shift = 0.5 * (cumulative - DVec3::ONE) * voxel_size;
            let transform =
                DAffine3::from_translation(shift) * DAffine3::from_scale(scale);

            let [sx, sy, sz] = level_dims;
            let mut voxels = Vec::with_capacity(timepoints * (sx * sy * sz) as usize);
            for t in 0..timepoints {
                for z in 0..sz as i64 {
                    for y in 0..sy as i64 {
                        for x in 0..sx as i64 {
                            voxels.push(value(level, t, [x, y, z]));
                        }
                    }
                }
            }
            levels.push(MemoryLevel {
                transform,
                dimensions: level_dims,
                voxels: voxels.into(),
            });
        }
        Self {
            name: name.into(),
            timepoints,
            levels,
            failure: None,
            open_count: AtomicUsize::new(0),
            volatile_open_count: AtomicUsize::new(0),
        }
    }

    /// Every subsequent open fails with `SourceError::Unavailable(reason)`.
    pub fn with_failure(mut self, reason: impl Into<String>) -> Self {
        self.failure = Some(reason.into());
        self
    }

    pub fn open_count(&self) -> usize {
        self.open_count.load(Ordering::SeqCst)
    }

    pub fn volatile_open_count(&self) -> usize {
        self.volatile_open_count.load(Ordering::SeqCst)
    }

    fn level_view(&self, level: usize) -> Result<MemoryLevelView<T>, SourceError> {
        log::trace!("{}: opening level {level}", self.name);
        if let Some(reason) = &self.failure {
            return Err(SourceError::Unavailable(reason.clone()));
        }
        let Some(data) = self.levels.get(level) else {
            return Err(SourceError::LevelOutOfRange {
                level,
                levels: self.levels.len(),
            });
        };
        Ok(MemoryLevelView {
            dimensions: data.dimensions,
            timepoints: self.timepoints,
            voxels: Arc::clone(&data.voxels),
        })
    }
}

impl<T: Pixel> ImageSource<T> for MemorySource<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn num_levels(&self) -> usize {
        self.levels.len()
    }

    fn num_timepoints(&self) -> usize {
        self.timepoints
    }

    fn level_transform(&self, level: usize) -> DAffine3 {
        self.levels[level].transform
    }

    fn level_dimensions(&self, level: usize) -> [u64; 3] {
        self.levels[level].dimensions
    }

    fn open_level(&self, level: usize) -> Result<Arc<dyn LevelView<T>>, SourceError> {
        self.open_count.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(self.level_view(level)?))
    }

    fn open_volatile_level(
        &self,
        level: usize,
    ) -> Result<Arc<dyn VolatileLevelView<T>>, SourceError> {
        self.volatile_open_count.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(self.level_view(level)?))
    }
}

struct MemoryLevelView<T> {
    dimensions: [u64; 3],
    timepoints: usize,
    voxels: Arc<[T]>,
}

impl<T: Pixel> MemoryLevelView<T> {
    fn index(&self, t: usize, voxel: Voxel) -> usize {
        let [sx, sy, sz] = self.dimensions.map(|extent| extent as usize);
        let [x, y, z] = voxel.map(|coordinate| coordinate as usize);
        ((t * sz + z) * sy + y) * sx + x
    }

    fn read(&self, t: usize, voxel: Voxel) -> T {
        assert!(
            t < self.timepoints,
            "timepoint {t} out of range for {} timepoints",
            self.timepoints
        );
        assert!(
            VoxelInterval::from_dimensions(self.dimensions).contains(voxel),
            "voxel {voxel:?} outside of level dimensions {:?}",
            self.dimensions
        );
        self.voxels[self.index(t, voxel)]
    }
}

impl<T: Pixel> LevelView<T> for MemoryLevelView<T> {
    fn interval(&self) -> VoxelInterval {
        VoxelInterval::from_dimensions(self.dimensions)
    }

    fn get(&self, t: usize, voxel: Voxel) -> T {
        self.read(t, voxel)
    }
}

impl<T: Pixel> VolatileLevelView<T> for MemoryLevelView<T> {
    fn interval(&self) -> VoxelInterval {
        VoxelInterval::from_dimensions(self.dimensions)
    }

    fn get(&self, t: usize, voxel: Voxel) -> Volatile<T> {
        Volatile::valid(self.read(t, voxel))
    }
}
