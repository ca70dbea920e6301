use std::sync::Arc;

use engine::LoadScheduler;
use source::{LevelView, Pixel, SourceError, VolatileLevelView};

use crate::{TileCache, TileKey, TileStats, TileStatus, TileViews};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TileLoadError {
    #[error("failed to open tile: {0}")]
    Source(#[from] SourceError),
    #[error("tile failed to load earlier")]
    Failed,
    #[error("tile cache was disposed")]
    Disposed,
}

/// Opens tiles on demand, at most once per key.
///
/// Blocking opens run on the calling thread; asynchronous opens are handed
/// to the shared `LoadScheduler` and never block.
pub struct TileLoader<T> {
    cache: Arc<TileCache<T>>,
    scheduler: Arc<LoadScheduler>,
}

impl<T: Pixel> TileLoader<T> {
    pub fn new(cache: Arc<TileCache<T>>, scheduler: Arc<LoadScheduler>) -> Self {
        Self { cache, scheduler }
    }

    pub fn cache(&self) -> &Arc<TileCache<T>> {
        &self.cache
    }

    pub fn scheduler(&self) -> &Arc<LoadScheduler> {
        &self.scheduler
    }

    pub fn key(&self, level: usize, tile_x: i64, tile_y: i64) -> Option<TileKey> {
        self.cache.key(level, tile_x, tile_y)
    }

    pub fn exists(&self, key: TileKey) -> bool {
        self.cache.exists(key)
    }

    /// Panics if `key` does not exist.
    pub fn status(&self, key: TileKey) -> TileStatus {
        self.cache.status(key)
    }

    /// Returns once the tile is open, loading it on this thread if nobody
    /// else has started. Waits if another thread is loading it.
    pub fn open_blocking(&self, key: TileKey) -> Result<(), TileLoadError> {
        if self.cache.is_disposed() {
            return Err(TileLoadError::Disposed);
        }
        match self.cache.status(key) {
            TileStatus::Open => Ok(()),
            TileStatus::Failed => Err(TileLoadError::Failed),
            TileStatus::Closed if self.cache.begin_open(key) => self.cache.load(key),
            TileStatus::Closed | TileStatus::Opening => self.cache.wait_settled(key),
        }
    }

    /// Schedules a background load if the tile is still closed. Returns
    /// whether this call scheduled it.
    pub fn open_async(&self, key: TileKey) -> bool {
        if !self.cache.begin_open(key) {
            return false;
        }
        let cache = Arc::clone(&self.cache);
        let submitted = self.scheduler.submit(move || {
            // failures are logged and recorded in the tile status
            let _ = cache.load(key);
        });
        match submitted {
            Ok(()) => true,
            Err(error) => {
                log::warn!("could not schedule tile {key}: {error}");
                self.cache.abort(key);
                false
            }
        }
    }

    /// Published views of an open tile, `None` otherwise.
    pub fn loaded_views(&self, key: TileKey) -> Option<Arc<TileViews<T>>> {
        if self.cache.is_disposed() {
            return None;
        }
        self.cache.views(key)
    }

    /// Panics unless the tile is open.
    pub fn blocking_view(&self, key: TileKey) -> Arc<dyn LevelView<T>> {
        match self.loaded_views(key) {
            Some(views) => Arc::clone(&views.blocking),
            None => panic!(
                "blocking view of tile {key} requested while {:?}",
                self.cache.status(key)
            ),
        }
    }

    /// Panics unless the tile is open.
    pub fn placeholder_view(&self, key: TileKey) -> Arc<dyn VolatileLevelView<T>> {
        match self.loaded_views(key) {
            Some(views) => Arc::clone(&views.volatile),
            None => panic!(
                "placeholder view of tile {key} requested while {:?}",
                self.cache.status(key)
            ),
        }
    }

    pub fn stats(&self) -> TileStats {
        self.cache.stats()
    }
}

impl<T> TileLoader<T> {
    /// Releases all views. Queued loads are skipped once they reach a worker.
    pub fn dispose(&self) {
        self.cache.dispose();
    }

    pub fn is_disposed(&self) -> bool {
        self.cache.is_disposed()
    }
}
