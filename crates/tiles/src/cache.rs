use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use arc_swap::ArcSwapOption;
use model::{GridLayout, GridPos};
use pyramid::PyramidPlan;
use source::{LevelView, Pixel, SourceError, TileSource, VolatileLevelView};

use crate::pipeline::{CellPlacement, TileLevelView};
use crate::{MAX_LEVELS, TileKey, TileLoadError};

/// Load state of one tile. Transitions only move forward:
/// `Closed -> Opening -> Open | Failed`.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TileStatus {
    Closed = 0,
    Opening = 1,
    Open = 2,
    Failed = 3,
}

impl TileStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => TileStatus::Closed,
            1 => TileStatus::Opening,
            2 => TileStatus::Open,
            3 => TileStatus::Failed,
            other => unreachable!("invalid tile status {other}"),
        }
    }
}

/// Both views of a loaded tile, placed in their padded grid cell.
pub struct TileViews<T> {
    pub blocking: Arc<dyn LevelView<T>>,
    pub volatile: Arc<dyn VolatileLevelView<T>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TileStats {
    pub loads_started: u64,
    pub loads_completed: u64,
    pub loads_failed: u64,
    /// Loads that finished after the cache was disposed.
    pub loads_discarded: u64,
}

#[derive(Default)]
struct TileCounters {
    started: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    discarded: AtomicU64,
}

struct TileEntry<T> {
    status: AtomicU8,
    views: ArcSwapOption<TileViews<T>>,
}

/// Per-tile load state for every level of every occupied grid cell.
///
/// Entries live in one arena indexed by `level * occupied_count + slot`,
/// where `slot` is the row-major rank of an occupied grid cell. The
/// status byte is the only thing a query touches before a tile is open;
/// views are published through one pointer swap once fully built.
pub struct TileCache<T> {
    layout: GridLayout,
    sources: Vec<Option<TileSource<T>>>,
    placements: Vec<CellPlacement>,
    entries: Box<[TileEntry<T>]>,
    waiters: Mutex<()>,
    ready: Condvar,
    disposed: AtomicBool,
    counters: TileCounters,
}

impl<T: Pixel> TileCache<T> {
    pub fn new(
        layout: GridLayout,
        tiles: impl IntoIterator<Item = (GridPos, TileSource<T>)>,
        plan: &PyramidPlan,
    ) -> Self {
        let num_levels = plan.num_levels();
        assert!(
            num_levels <= MAX_LEVELS,
            "{num_levels} levels exceed the {MAX_LEVELS} addressable by a tile key"
        );
        let mut sources: Vec<Option<TileSource<T>>> = vec![None; layout.occupied_count()];
        for (pos, tile) in tiles {
            let (tile_x, tile_y) = layout.tile_index(pos);
            let Some(slot) = layout.slot(tile_x as i64, tile_y as i64) else {
                panic!("grid position {pos:?} is not part of the layout");
            };
            sources[slot] = Some(tile);
        }
        let placements = plan
            .levels()
            .iter()
            .map(|level| CellPlacement::new(level.tile_dims, level.integer_margin()))
            .collect();
        let entries = (0..num_levels * layout.occupied_count())
            .map(|_| TileEntry {
                status: AtomicU8::new(TileStatus::Closed as u8),
                views: ArcSwapOption::empty(),
            })
            .collect();
        Self {
            layout,
            sources,
            placements,
            entries,
            waiters: Mutex::new(()),
            ready: Condvar::new(),
            disposed: AtomicBool::new(false),
            counters: TileCounters::default(),
        }
    }

    pub fn layout(&self) -> &GridLayout {
        &self.layout
    }

    pub fn num_levels(&self) -> usize {
        self.placements.len()
    }

    /// Key of the tile covering cell (`tile_x`, `tile_y`), if one exists.
    pub fn key(&self, level: usize, tile_x: i64, tile_y: i64) -> Option<TileKey> {
        if level >= self.num_levels() || self.slot(tile_x, tile_y).is_none() {
            return None;
        }
        Some(TileKey::new(level, tile_x as u32, tile_y as u32))
    }

    pub fn exists(&self, key: TileKey) -> bool {
        key.level() < self.num_levels()
            && self
                .slot(key.tile_x() as i64, key.tile_y() as i64)
                .is_some()
    }

    pub fn status(&self, key: TileKey) -> TileStatus {
        TileStatus::from_u8(self.entry(key).status.load(Ordering::Acquire))
    }

    /// Published views, present only while the tile is open and the cache
    /// has not been disposed.
    pub fn views(&self, key: TileKey) -> Option<Arc<TileViews<T>>> {
        self.entry(key).views.load_full()
    }

    pub fn tile_source(&self, key: TileKey) -> &TileSource<T> {
        let Some(slot) = self.slot(key.tile_x() as i64, key.tile_y() as i64) else {
            panic!("tile {key} does not exist");
        };
        match &self.sources[slot] {
            Some(source) => source,
            None => panic!("tile {key} has no source"),
        }
    }

    /// Claims the load of `key`. Only the caller that wins the
    /// `Closed -> Opening` exchange may run `load`.
    pub(crate) fn begin_open(&self, key: TileKey) -> bool {
        if self.is_disposed() {
            return false;
        }
        self.entry(key)
            .status
            .compare_exchange(
                TileStatus::Closed as u8,
                TileStatus::Opening as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    pub(crate) fn load(&self, key: TileKey) -> Result<(), TileLoadError> {
        let mut guard = LoadGuard {
            cache: self,
            key,
            settled: false,
        };
        if self.is_disposed() {
            log::debug!("skipping load of tile {key}: cache disposed");
            guard.settled = true;
            return Err(TileLoadError::Disposed);
        }

        self.counters.started.fetch_add(1, Ordering::Relaxed);
        let started = Instant::now();
        log::debug!("opening tile {key} ({})", self.tile_source(key).name());
        let result = self.open_views(key);
        guard.settled = true;

        match result {
            Ok(views) => {
                if self.is_disposed() {
                    self.counters.discarded.fetch_add(1, Ordering::Relaxed);
                    log::debug!("discarding tile {key}: cache disposed while loading");
                    return Err(TileLoadError::Disposed);
                }
                let entry = self.entry(key);
                entry.views.store(Some(Arc::new(views)));
                if self.is_disposed() {
                    entry.views.store(None);
                }
                self.settle(key, TileStatus::Open);
                self.counters.completed.fetch_add(1, Ordering::Relaxed);
                log::debug!("opened tile {key} in {:?}", started.elapsed());
                Ok(())
            }
            Err(error) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                log::warn!(
                    "failed to open tile {key} ({}): {error}",
                    self.tile_source(key).name()
                );
                self.settle(key, TileStatus::Failed);
                Err(TileLoadError::Source(error))
            }
        }
    }

    /// Marks a claimed tile as failed without loading it.
    pub(crate) fn abort(&self, key: TileKey) {
        self.counters.failed.fetch_add(1, Ordering::Relaxed);
        self.settle(key, TileStatus::Failed);
    }

    /// Blocks until the tile leaves `Opening` or the cache is disposed.
    pub(crate) fn wait_settled(&self, key: TileKey) -> Result<(), TileLoadError> {
        let mut lock = self.lock_waiters();
        loop {
            if self.is_disposed() {
                return Err(TileLoadError::Disposed);
            }
            match self.status(key) {
                TileStatus::Open => return Ok(()),
                TileStatus::Failed => return Err(TileLoadError::Failed),
                TileStatus::Closed | TileStatus::Opening => {
                    lock = self
                        .ready
                        .wait(lock)
                        .unwrap_or_else(PoisonError::into_inner);
                }
            }
        }
    }

    fn open_views(&self, key: TileKey) -> Result<TileViews<T>, SourceError> {
        let source = self.tile_source(key);
        let level = key.level();
        let placement = self.placements[level];
        let blocking = source.open_level(level)?;
        let volatile = source.open_volatile_level(level)?;
        let timepoints = source.num_timepoints();
        let blocking_native = blocking.interval();
        let volatile_native = volatile.interval();
        Ok(TileViews {
            blocking: Arc::new(TileLevelView::new(
                blocking,
                blocking_native,
                timepoints,
                placement,
            )),
            volatile: Arc::new(TileLevelView::new(
                volatile,
                volatile_native,
                timepoints,
                placement,
            )),
        })
    }

    fn settle(&self, key: TileKey, status: TileStatus) {
        self.entry(key).status.store(status as u8, Ordering::Release);
        self.notify_waiters();
    }

    fn slot(&self, tile_x: i64, tile_y: i64) -> Option<usize> {
        self.layout
            .slot(tile_x, tile_y)
            .filter(|&slot| self.sources[slot].is_some())
    }

    fn entry(&self, key: TileKey) -> &TileEntry<T> {
        let slot = match self.slot(key.tile_x() as i64, key.tile_y() as i64) {
            Some(slot) if key.level() < self.num_levels() => slot,
            _ => panic!("tile {key} does not exist"),
        };
        &self.entries[key.level() * self.layout.occupied_count() + slot]
    }
}

impl<T> TileCache<T> {
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> TileStats {
        TileStats {
            loads_started: self.counters.started.load(Ordering::Relaxed),
            loads_completed: self.counters.completed.load(Ordering::Relaxed),
            loads_failed: self.counters.failed.load(Ordering::Relaxed),
            loads_discarded: self.counters.discarded.load(Ordering::Relaxed),
        }
    }

    /// Releases every published view and wakes all waiters. Loads already
    /// running finish and are discarded; loads not yet started are skipped.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        for entry in self.entries.iter() {
            entry.views.store(None);
        }
        self.notify_waiters();
        log::debug!("tile cache disposed after {:?}", self.stats());
    }

    fn notify_waiters(&self) {
        let _lock = self.lock_waiters();
        self.ready.notify_all();
    }

    fn lock_waiters(&self) -> MutexGuard<'_, ()> {
        self.waiters.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Settles a claimed tile as failed if the load unwinds before finishing,
/// so blocked callers are released.
struct LoadGuard<'a, T: Pixel> {
    cache: &'a TileCache<T>,
    key: TileKey,
    settled: bool,
}

impl<T: Pixel> Drop for LoadGuard<'_, T> {
    fn drop(&mut self) {
        if !self.settled {
            log::error!("load of tile {} aborted", self.key);
            self.cache.abort(self.key);
        }
    }
}
