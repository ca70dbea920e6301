use std::sync::Arc;

use engine::LoadScheduler;
use glam::{DAffine3, DVec2, DVec3};
use model::{GridLayout, GridPos, RealBox, VoxelInterval, auto_grid_positions};
use pyramid::{CoordinateMapper, PyramidInput, PyramidPlan};
use source::{Pixel, TileSource};
use tiles::{MAX_LEVELS, TileCache, TileLoader};

use crate::pixel::{SourcePair, StitchedSource, StitchedVolatileSource};
use crate::views::StitchContext;
use crate::{Source, StitchConfig, StitchError, StitchedBlockingView, StitchedVolatileView};

/// World placement of one tile inside the stitched grid.
#[derive(Debug, Clone, PartialEq)]
pub struct TilePlacement {
    pub name: String,
    pub grid: GridPos,
    /// Translation moving the tile into its grid cell, centered in the margin.
    pub translation: DVec3,
    /// Extent of the metadata tile moved to the origin, shared by all tiles.
    pub mask: RealBox,
}

pub struct StitchBuilder<T> {
    name: String,
    tiles: Vec<TileSource<T>>,
    positions: Option<Vec<GridPos>>,
    metadata_tile: Option<TileSource<T>>,
    config: StitchConfig,
    scheduler: Option<Arc<LoadScheduler>>,
}

impl<T: Pixel> StitchBuilder<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tiles: Vec::new(),
            positions: None,
            metadata_tile: None,
            config: StitchConfig::default(),
            scheduler: None,
        }
    }

    pub fn tiles(mut self, tiles: impl IntoIterator<Item = TileSource<T>>) -> Self {
        self.tiles.extend(tiles);
        self
    }

    /// Adds catalog entries, rejecting stitched images.
    pub fn sources(
        mut self,
        sources: impl IntoIterator<Item = Source<T>>,
    ) -> Result<Self, StitchError> {
        for source in sources {
            self.tiles.push(TileSource::try_from(source)?);
        }
        Ok(self)
    }

    /// Grid cell of every tile, in tile order. Without positions the tiles
    /// fill a square grid row by row.
    pub fn positions(mut self, positions: impl IntoIterator<Item = GridPos>) -> Self {
        self.positions = Some(positions.into_iter().collect());
        self
    }

    /// Tile whose metadata defines the geometry. Defaults to the first tile;
    /// it does not need to be part of the grid.
    pub fn metadata_tile(mut self, tile: TileSource<T>) -> Self {
        self.metadata_tile = Some(tile);
        self
    }

    pub fn config(mut self, config: StitchConfig) -> Self {
        self.config = config;
        self
    }

    /// Shares a worker pool between stitched images.
    pub fn scheduler(mut self, scheduler: Arc<LoadScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn build(self) -> Result<Arc<StitchedImage<T>>, StitchError> {
        let Self {
            name,
            tiles,
            positions,
            metadata_tile,
            config,
            scheduler,
        } = self;
        if tiles.is_empty() {
            return Err(StitchError::EmptyCatalog);
        }
        config.validate()?;
        let positions = positions.unwrap_or_else(|| auto_grid_positions(tiles.len()));
        if positions.len() != tiles.len() {
            return Err(StitchError::PositionCountMismatch {
                tiles: tiles.len(),
                positions: positions.len(),
            });
        }
        let layout = GridLayout::from_positions(&positions)?;

        let metadata = metadata_tile.unwrap_or_else(|| tiles[0].clone());
        let plan = PyramidPlan::plan(&PyramidInput::from_tile(&metadata), config.relative_margin)?;
        if plan.num_levels() > MAX_LEVELS {
            return Err(StitchError::TooManyLevels(plan.num_levels()));
        }
        let mapper = CoordinateMapper::new(&plan, layout.min());
        let tile_real_dims = plan.tile_real_dimensions();
        let grid_origin = DVec3::new(
            layout.min().x as f64 * tile_real_dims.x,
            layout.min().y as f64 * tile_real_dims.y,
            0.0,
        );
        let base_transforms = plan
            .levels()
            .iter()
            .map(|level| DAffine3::from_translation(grid_origin) * level.source_transform)
            .collect();

        let level_zero = plan.level(0);
        log::info!("{name}: stitching {} tiles", tiles.len());
        log::info!("{name}: metadata source {}", metadata.name());
        log::info!(
            "{name}: metadata transform {:?}",
            DAffine3::from_mat3(metadata.level_transform(0).matrix3)
        );
        log::info!("{name}: metadata dimensions {:?}", level_zero.original_dims);
        log::info!("{name}: min grid position {:?}", layout.min());
        log::info!("{name}: tile real dimensions {tile_real_dims:?}");

        let scheduler = match scheduler {
            Some(scheduler) => scheduler,
            None => Arc::new(LoadScheduler::new(&config.scheduler)?),
        };
        let cache = TileCache::new(
            layout.clone(),
            positions.iter().copied().zip(tiles.iter().cloned()),
            &plan,
        );
        let loader = TileLoader::new(Arc::new(cache), scheduler);
        let context = StitchContext::new(
            name.clone(),
            loader,
            mapper,
            metadata.num_timepoints(),
            base_transforms,
        );

        Ok(Arc::new(StitchedImage {
            name,
            tiles,
            positions,
            metadata_name: metadata.name().to_owned(),
            tile_mask: metadata.mask().at_origin(),
            plan,
            config,
            context: Arc::new(context),
        }))
    }
}

/// A grid of tiles presented as one lazily loaded multi-level image.
///
/// Construction reads only the metadata tile's level transforms and
/// dimensions. Tile data is opened per (level, tile) on first access.
pub struct StitchedImage<T> {
    name: String,
    tiles: Vec<TileSource<T>>,
    positions: Vec<GridPos>,
    metadata_name: String,
    tile_mask: RealBox,
    plan: PyramidPlan,
    config: StitchConfig,
    context: Arc<StitchContext<T>>,
}

impl<T: Pixel> StitchedImage<T> {
    pub fn builder(name: impl Into<String>) -> StitchBuilder<T> {
        StitchBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tiles(&self) -> &[TileSource<T>] {
        &self.tiles
    }

    pub fn positions(&self) -> &[GridPos] {
        &self.positions
    }

    pub fn metadata_name(&self) -> &str {
        &self.metadata_name
    }

    pub fn config(&self) -> &StitchConfig {
        &self.config
    }

    pub fn layout(&self) -> &GridLayout {
        self.context.loader.cache().layout()
    }

    pub fn plan(&self) -> &PyramidPlan {
        &self.plan
    }

    pub fn mapper(&self) -> &CoordinateMapper {
        &self.context.mapper
    }

    pub fn loader(&self) -> &TileLoader<T> {
        &self.context.loader
    }

    pub fn num_levels(&self) -> usize {
        self.plan.num_levels()
    }

    pub fn num_timepoints(&self) -> usize {
        self.context.num_timepoints
    }

    pub fn global_interval(&self, level: usize) -> VoxelInterval {
        self.context.global_interval(level)
    }

    pub fn blocking_view(&self, level: usize) -> StitchedBlockingView<T> {
        StitchedBlockingView::new(Arc::clone(&self.context), level)
    }

    pub fn volatile_view(&self, level: usize) -> StitchedVolatileView<T> {
        StitchedVolatileView::new(Arc::clone(&self.context), level)
    }

    /// Both sources follow later calls to `transform`.
    pub fn source_pair(&self) -> SourcePair<T> {
        SourcePair {
            source: Arc::new(StitchedSource {
                context: Arc::clone(&self.context),
            }),
            volatile: Arc::new(StitchedVolatileSource {
                context: Arc::clone(&self.context),
            }),
        }
    }

    /// World transform of stitched voxels at `level`, user transform included.
    pub fn source_transform(&self, level: usize) -> DAffine3 {
        self.context.source_transform(level)
    }

    /// World-space bounds of level 0.
    pub fn mask(&self) -> RealBox {
        let [width, height, depth] = self.global_interval(0).dimensions();
        let max = DVec3::new(width as f64, height as f64, depth as f64) - 0.5;
        RealBox::new(DVec3::splat(-0.5), max).transformed(&self.source_transform(0))
    }

    /// Prepends `transform` to the world transform of every level. Tile
    /// lookup is unaffected.
    pub fn transform(&self, transform: DAffine3) {
        self.context
            .fixed_transform
            .rcu(|current| transform * **current);
    }

    pub fn fixed_transform(&self) -> DAffine3 {
        **self.context.fixed_transform.load()
    }

    pub fn tile_real_dimensions(&self) -> DVec2 {
        self.plan.tile_real_dimensions()
    }

    pub fn tile_placements(&self) -> Vec<TilePlacement> {
        let tile_real_dims = self.plan.tile_real_dimensions();
        let image_real_dims = self.tile_mask.dimensions();
        let offset = 0.5 * (tile_real_dims - image_real_dims.truncate());
        self.tiles
            .iter()
            .zip(&self.positions)
            .map(|(tile, &grid)| TilePlacement {
                name: tile.name().to_owned(),
                grid,
                translation: DVec3::new(
                    grid.x as f64 * tile_real_dims.x + offset.x,
                    grid.y as f64 * tile_real_dims.y + offset.y,
                    0.0,
                ),
                mask: self.tile_mask,
            })
            .collect()
    }

    /// Tiles masked to the shared tile extent and moved into their cells.
    pub fn placed_tiles(&self) -> Vec<TileSource<T>> {
        self.tiles
            .iter()
            .zip(self.tile_placements())
            .map(|(tile, placement)| {
                tile.clone()
                    .masked(placement.mask)
                    .transformed(DAffine3::from_translation(placement.translation))
            })
            .collect()
    }

    /// Releases all loaded tiles. Later queries return background and never
    /// schedule loads.
    pub fn dispose(&self) {
        log::debug!("{}: disposing, {:?}", self.name, self.context.loader.stats());
        self.context.loader.dispose();
    }

    pub fn is_disposed(&self) -> bool {
        self.context.loader.is_disposed()
    }
}
