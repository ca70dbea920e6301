use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use arc_swap::ArcSwap;
use glam::DAffine3;
use model::{Voxel, VoxelInterval};
use pyramid::CoordinateMapper;
use source::{Pixel, Volatile};
use tiles::{TileKey, TileLoader, TileStatus};

/// State shared by a stitched image and every view or source handed out.
pub(crate) struct StitchContext<T> {
    pub(crate) name: String,
    pub(crate) loader: TileLoader<T>,
    pub(crate) mapper: CoordinateMapper,
    /// Timepoints of the metadata tile.
    pub(crate) num_timepoints: usize,
    /// Stitched voxel space to world space per level, grid origin included.
    pub(crate) base_transforms: Vec<DAffine3>,
    pub(crate) fixed_transform: ArcSwap<DAffine3>,
    warned_disposed: AtomicBool,
}

impl<T: Pixel> StitchContext<T> {
    pub(crate) fn new(
        name: String,
        loader: TileLoader<T>,
        mapper: CoordinateMapper,
        num_timepoints: usize,
        base_transforms: Vec<DAffine3>,
    ) -> Self {
        Self {
            name,
            loader,
            mapper,
            num_timepoints,
            base_transforms,
            fixed_transform: ArcSwap::from_pointee(DAffine3::IDENTITY),
            warned_disposed: AtomicBool::new(false),
        }
    }

    pub(crate) fn global_interval(&self, level: usize) -> VoxelInterval {
        self.mapper
            .global_interval(self.loader.cache().layout(), level)
    }

    pub(crate) fn source_transform(&self, level: usize) -> DAffine3 {
        **self.fixed_transform.load() * self.base_transforms[level]
    }

    /// Existing tile covering `voxel`, with the voxel inside that tile.
    /// Timepoints past the metadata tile cover nothing.
    fn locate(&self, level: usize, t: usize, voxel: Voxel) -> Option<(TileKey, Voxel)> {
        if t >= self.num_timepoints {
            return None;
        }
        let location = self.mapper.to_tile_index(voxel, level);
        self.loader
            .key(level, location.tile_x, location.tile_y)
            .map(|key| (key, location.local))
    }

    fn disposed(&self) -> bool {
        if !self.loader.is_disposed() {
            return false;
        }
        if !self.warned_disposed.swap(true, Ordering::Relaxed) {
            log::warn!("{}: queried after dispose, returning background", self.name);
        }
        true
    }
}

impl<T> Drop for StitchContext<T> {
    fn drop(&mut self) {
        // queued loads of an unreachable image are skipped
        self.loader.dispose();
    }
}

/// Result of a non-blocking lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe<T> {
    Ready(Volatile<T>),
    /// The covering tile is closed; nothing has been scheduled yet.
    NeedsLoad(TileKey),
}

/// One level of the stitched image. Loads missing tiles on the calling
/// thread.
pub struct StitchedBlockingView<T> {
    context: Arc<StitchContext<T>>,
    level: usize,
}

impl<T: Pixel> StitchedBlockingView<T> {
    pub(crate) fn new(context: Arc<StitchContext<T>>, level: usize) -> Self {
        assert!(
            level < context.mapper.num_levels(),
            "level {level} out of range"
        );
        Self { context, level }
    }

    pub fn level(&self) -> usize {
        self.level
    }

    pub fn interval(&self) -> VoxelInterval {
        self.context.global_interval(self.level)
    }

    pub fn get(&self, t: usize, voxel: Voxel) -> T {
        if self.context.disposed() {
            return T::default();
        }
        let Some((key, local)) = self.context.locate(self.level, t, voxel) else {
            return T::default();
        };
        if self.context.loader.open_blocking(key).is_err() {
            return T::default();
        }
        match self.context.loader.loaded_views(key) {
            Some(views) => views.blocking.get(t, local),
            None => T::default(),
        }
    }
}

/// One level of the stitched image that never blocks on I/O.
pub struct StitchedVolatileView<T> {
    context: Arc<StitchContext<T>>,
    level: usize,
}

impl<T: Pixel> StitchedVolatileView<T> {
    pub(crate) fn new(context: Arc<StitchContext<T>>, level: usize) -> Self {
        assert!(
            level < context.mapper.num_levels(),
            "level {level} out of range"
        );
        Self { context, level }
    }

    pub fn level(&self) -> usize {
        self.level
    }

    pub fn interval(&self) -> VoxelInterval {
        self.context.global_interval(self.level)
    }

    /// Reads the voxel if its tile is loaded. A closed tile is reported
    /// instead of scheduled, so the caller decides when to load.
    pub fn probe(&self, t: usize, voxel: Voxel) -> Probe<T> {
        if self.context.disposed() {
            return Probe::Ready(Volatile::invalid());
        }
        let Some((key, local)) = self.context.locate(self.level, t, voxel) else {
            return Probe::Ready(Volatile::background());
        };
        match self.context.loader.status(key) {
            TileStatus::Closed => Probe::NeedsLoad(key),
            TileStatus::Opening => Probe::Ready(Volatile::invalid()),
            // failed tiles read as final background
            TileStatus::Failed => Probe::Ready(Volatile::background()),
            TileStatus::Open => match self.context.loader.loaded_views(key) {
                Some(views) => Probe::Ready(views.volatile.get(t, local)),
                None => Probe::Ready(Volatile::invalid()),
            },
        }
    }

    /// Like `probe`, but schedules the load of a closed tile.
    pub fn get(&self, t: usize, voxel: Voxel) -> Volatile<T> {
        match self.probe(t, voxel) {
            Probe::Ready(value) => value,
            Probe::NeedsLoad(key) => {
                self.context.loader.open_async(key);
                Volatile::invalid()
            }
        }
    }
}
