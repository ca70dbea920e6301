use std::sync::Arc;

use model::{RealBox, Voxel};
use source::{Pixel, TileSource};

use crate::pixel::{SourcePair, TilePixelSource, TileVolatilePixelSource};
use crate::{StitchError, StitchedImage};

/// Any image the viewer can show: a plain tile source or a stitched grid.
pub enum Source<T> {
    Tile(TileSource<T>),
    Stitched(Arc<StitchedImage<T>>),
}

impl<T> Clone for Source<T> {
    fn clone(&self) -> Self {
        match self {
            Source::Tile(tile) => Source::Tile(tile.clone()),
            Source::Stitched(image) => Source::Stitched(Arc::clone(image)),
        }
    }
}

impl<T: Pixel> From<TileSource<T>> for Source<T> {
    fn from(tile: TileSource<T>) -> Self {
        Source::Tile(tile)
    }
}

impl<T: Pixel> From<Arc<StitchedImage<T>>> for Source<T> {
    fn from(image: Arc<StitchedImage<T>>) -> Self {
        Source::Stitched(image)
    }
}

impl<T: Pixel> TryFrom<Source<T>> for TileSource<T> {
    type Error = StitchError;

    fn try_from(source: Source<T>) -> Result<Self, Self::Error> {
        match source {
            Source::Tile(tile) => Ok(tile),
            Source::Stitched(image) => Err(StitchError::NestedStitching(image.name().to_owned())),
        }
    }
}

impl<T: Pixel> Source<T> {
    pub fn name(&self) -> &str {
        match self {
            Source::Tile(tile) => tile.name(),
            Source::Stitched(image) => image.name(),
        }
    }

    pub fn num_levels(&self) -> usize {
        match self {
            Source::Tile(tile) => tile.num_levels(),
            Source::Stitched(image) => image.num_levels(),
        }
    }

    pub fn num_timepoints(&self) -> usize {
        match self {
            Source::Tile(tile) => tile.num_timepoints(),
            Source::Stitched(image) => image.num_timepoints(),
        }
    }

    pub fn mask(&self) -> RealBox {
        match self {
            Source::Tile(tile) => tile.mask(),
            Source::Stitched(image) => image.mask(),
        }
    }

    pub fn source_pair(&self) -> SourcePair<T> {
        match self {
            Source::Tile(tile) => SourcePair {
                source: Arc::new(TilePixelSource::new(tile.clone())),
                volatile: Arc::new(TileVolatilePixelSource::new(tile.clone())),
            },
            Source::Stitched(image) => image.source_pair(),
        }
    }

    /// Reads one voxel, blocking on I/O. Unreadable voxels are background.
    pub fn sample(&self, level: usize, t: usize, voxel: Voxel) -> T {
        match self {
            Source::Tile(tile) if t >= tile.num_timepoints() => T::default(),
            Source::Tile(tile) => match tile.open_level(level) {
                Ok(view) if view.interval().contains(voxel) => view.get(t, voxel),
                Ok(_) => T::default(),
                Err(error) => {
                    log::warn!("{}: cannot sample level {level}: {error}", tile.name());
                    T::default()
                }
            },
            Source::Stitched(image) => image.blocking_view(level).get(t, voxel),
        }
    }
}

/// Expands stitched entries into their tiles, placed at their grid cells.
///
/// Stitched images only ever hold plain tiles, so one expansion step is
/// always enough.
pub fn flatten_into_tiles<T: Pixel>(
    sources: impl IntoIterator<Item = Source<T>>,
) -> Vec<TileSource<T>> {
    let mut tiles = Vec::new();
    for source in sources {
        match source {
            Source::Tile(tile) => tiles.push(tile),
            Source::Stitched(image) => tiles.extend(image.placed_tiles()),
        }
    }
    tiles
}
