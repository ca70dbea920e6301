use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use engine::{LoadScheduler, LoadSchedulerConfig};
use glam::DAffine3;
use model::{GridLayout, GridPos};
use pyramid::{PyramidInput, PyramidPlan};
use source::{
    ImageSource, LevelView, MemorySource, SourceError, TileSource, VolatileLevelView,
    test_helpers,
};

use super::*;

const WAIT: Duration = Duration::from_secs(5);

/// Holds `open_level` calls until released.
#[derive(Default)]
struct Gate {
    released: Mutex<bool>,
    changed: Condvar,
    entered: AtomicUsize,
}

impl Gate {
    fn pass(&self) {
        self.entered.fetch_add(1, Ordering::SeqCst);
        let mut released = self.released.lock().unwrap();
        while !*released {
            released = self.changed.wait(released).unwrap();
        }
    }

    fn release(&self) {
        *self.released.lock().unwrap() = true;
        self.changed.notify_all();
    }

    fn wait_entered(&self, count: usize) {
        let deadline = Instant::now() + WAIT;
        while self.entered.load(Ordering::SeqCst) < count {
            assert!(Instant::now() < deadline, "gate was never entered");
            thread::sleep(Duration::from_millis(1));
        }
    }
}

struct GatedSource {
    inner: Arc<MemorySource<u32>>,
    gate: Arc<Gate>,
}

impl ImageSource<u32> for GatedSource {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn num_levels(&self) -> usize {
        self.inner.num_levels()
    }

    fn num_timepoints(&self) -> usize {
        self.inner.num_timepoints()
    }

    fn level_transform(&self, level: usize) -> DAffine3 {
        self.inner.level_transform(level)
    }

    fn level_dimensions(&self, level: usize) -> [u64; 3] {
        self.inner.level_dimensions(level)
    }

    fn open_level(&self, level: usize) -> Result<Arc<dyn LevelView<u32>>, SourceError> {
        self.gate.pass();
        self.inner.open_level(level)
    }

    fn open_volatile_level(
        &self,
        level: usize,
    ) -> Result<Arc<dyn VolatileLevelView<u32>>, SourceError> {
        self.inner.open_volatile_level(level)
    }
}

struct PanickingSource(Arc<MemorySource<u32>>);

impl ImageSource<u32> for PanickingSource {
    fn name(&self) -> &str {
        self.0.name()
    }

    fn num_levels(&self) -> usize {
        self.0.num_levels()
    }

    fn num_timepoints(&self) -> usize {
        self.0.num_timepoints()
    }

    fn level_transform(&self, level: usize) -> DAffine3 {
        self.0.level_transform(level)
    }

    fn level_dimensions(&self, level: usize) -> [u64; 3] {
        self.0.level_dimensions(level)
    }

    fn open_level(&self, _level: usize) -> Result<Arc<dyn LevelView<u32>>, SourceError> {
        panic!("corrupt tile header");
    }

    fn open_volatile_level(
        &self,
        level: usize,
    ) -> Result<Arc<dyn VolatileLevelView<u32>>, SourceError> {
        self.0.open_volatile_level(level)
    }
}

fn tile(source: Arc<dyn ImageSource<u32>>) -> TileSource<u32> {
    TileSource::direct(source)
}

fn gradient(tag: u32, size: u64, levels: usize) -> TileSource<u32> {
    tile(test_helpers::gradient_source(tag, size, size, levels))
}

fn gated(tag: u32, gate: &Arc<Gate>) -> TileSource<u32> {
    tile(Arc::new(GatedSource {
        inner: test_helpers::gradient_source(tag, 10, 10, 1),
        gate: Arc::clone(gate),
    }))
}

fn loader_for(
    tiles: Vec<(GridPos, TileSource<u32>)>,
    margin: f64,
    workers: usize,
) -> TileLoader<u32> {
    let positions: Vec<GridPos> = tiles.iter().map(|(pos, _)| *pos).collect();
    let layout = GridLayout::from_positions(&positions).expect("layout");
    let plan = PyramidPlan::plan(&PyramidInput::from_tile(&tiles[0].1), margin).expect("plan");
    let cache = Arc::new(TileCache::new(layout, tiles, &plan));
    let scheduler =
        LoadScheduler::new(&LoadSchedulerConfig::with_workers(workers)).expect("scheduler");
    TileLoader::new(cache, Arc::new(scheduler))
}

#[test]
fn sparse_grid_only_has_occupied_keys() {
    let loader = loader_for(
        vec![
            (GridPos::new(0, 0), gradient(1, 8, 2)),
            (GridPos::new(2, 2), gradient(2, 8, 2)),
        ],
        0.0,
        1,
    );

    assert!(loader.exists(TileKey::new(0, 0, 0)));
    assert!(loader.exists(TileKey::new(1, 2, 2)));
    assert!(!loader.exists(TileKey::new(0, 1, 0)));
    assert!(!loader.exists(TileKey::new(0, 1, 1)));
    assert!(!loader.exists(TileKey::new(2, 0, 0)));
    assert_eq!(loader.key(0, 1, 1), None);
    assert_eq!(loader.key(0, -1, 0), None);
    assert_eq!(loader.key(1, 2, 2), Some(TileKey::new(1, 2, 2)));
    assert_eq!(loader.status(TileKey::new(0, 2, 2)), TileStatus::Closed);
}

#[test]
#[should_panic(expected = "does not exist")]
fn status_of_missing_tile_panics() {
    let loader = loader_for(
        vec![
            (GridPos::new(0, 0), gradient(1, 8, 1)),
            (GridPos::new(2, 2), gradient(2, 8, 1)),
        ],
        0.0,
        1,
    );
    let _ = loader.status(TileKey::new(0, 1, 1));
}

#[test]
fn concurrent_blocking_opens_load_once() {
    let source = test_helpers::gradient_source(1, 10, 10, 1);
    let loader = loader_for(vec![(GridPos::new(0, 0), tile(source.clone()))], 0.0, 2);
    let key = TileKey::new(0, 0, 0);
    let barrier = Barrier::new(8);

    thread::scope(|scope| {
        for _ in 0..8 {
            scope.spawn(|| {
                barrier.wait();
                assert_eq!(loader.open_blocking(key), Ok(()));
            });
        }
    });

    assert_eq!(source.open_count(), 1);
    assert_eq!(source.volatile_open_count(), 1);
    assert_eq!(loader.status(key), TileStatus::Open);
    assert_eq!(loader.stats().loads_started, 1);
    assert_eq!(loader.stats().loads_completed, 1);
}

#[test]
fn concurrent_async_opens_schedule_once() {
    let source = test_helpers::gradient_source(1, 10, 10, 1);
    let loader = loader_for(vec![(GridPos::new(0, 0), tile(source.clone()))], 0.0, 4);
    let key = TileKey::new(0, 0, 0);
    let barrier = Barrier::new(8);
    let scheduled = AtomicUsize::new(0);

    thread::scope(|scope| {
        for _ in 0..8 {
            scope.spawn(|| {
                barrier.wait();
                if loader.open_async(key) {
                    scheduled.fetch_add(1, Ordering::SeqCst);
                }
            });
        }
    });

    assert_eq!(scheduled.load(Ordering::SeqCst), 1);
    assert!(loader.scheduler().wait_idle(WAIT));
    assert_eq!(loader.status(key), TileStatus::Open);
    assert_eq!(source.open_count(), 1);
    // an open tile is never scheduled again
    assert!(!loader.open_async(key));
}

#[test]
fn status_only_moves_forward() {
    let gate = Arc::new(Gate::default());
    let loader = loader_for(vec![(GridPos::new(0, 0), gated(1, &gate))], 0.0, 1);
    let key = TileKey::new(0, 0, 0);
    assert!(loader.open_async(key));

    thread::scope(|scope| {
        let observer = scope.spawn(|| {
            let mut seen = Vec::new();
            loop {
                let status = loader.status(key);
                seen.push(status);
                if status == TileStatus::Open {
                    return seen;
                }
                thread::yield_now();
            }
        });
        gate.wait_entered(1);
        gate.release();
        let seen = observer.join().expect("observer");
        assert_eq!(seen[0], TileStatus::Opening);
        assert!(seen.windows(2).all(|pair| pair[0] <= pair[1]));
    });
}

#[test]
fn blocking_open_waits_for_the_scheduled_load() {
    let gate = Arc::new(Gate::default());
    let loader = loader_for(vec![(GridPos::new(0, 0), gated(1, &gate))], 0.0, 1);
    let key = TileKey::new(0, 0, 0);
    assert!(loader.open_async(key));
    gate.wait_entered(1);

    thread::scope(|scope| {
        let waiter = scope.spawn(|| loader.open_blocking(key));
        thread::sleep(Duration::from_millis(20));
        assert_eq!(loader.status(key), TileStatus::Opening);
        gate.release();
        assert_eq!(waiter.join().expect("waiter"), Ok(()));
    });

    assert_eq!(gate.entered.load(Ordering::SeqCst), 1);
    assert_eq!(loader.stats().loads_started, 1);
}

#[test]
fn failed_load_is_terminal() {
    let broken: Arc<dyn ImageSource<u32>> = Arc::new(
        MemorySource::from_fn("broken", [10, 10, 1], glam::DVec3::ONE, &[], 1, |_, _, _| 1u32)
            .with_failure("disk gone"),
    );
    let loader = loader_for(vec![(GridPos::new(0, 0), tile(broken))], 0.0, 1);
    let key = TileKey::new(0, 0, 0);

    assert_eq!(
        loader.open_blocking(key),
        Err(TileLoadError::Source(SourceError::Unavailable(
            "disk gone".to_owned()
        )))
    );
    assert_eq!(loader.status(key), TileStatus::Failed);
    assert_eq!(loader.open_blocking(key), Err(TileLoadError::Failed));
    assert!(!loader.open_async(key));
    assert!(loader.loaded_views(key).is_none());
    assert_eq!(loader.stats().loads_failed, 1);
}

#[test]
fn panicking_load_settles_as_failed() {
    let broken: Arc<dyn ImageSource<u32>> = Arc::new(PanickingSource(
        test_helpers::gradient_source(1, 10, 10, 1),
    ));
    let loader = loader_for(vec![(GridPos::new(0, 0), tile(broken))], 0.0, 1);
    let key = TileKey::new(0, 0, 0);

    assert!(loader.open_async(key));
    assert!(loader.scheduler().wait_idle(WAIT));
    assert_eq!(loader.status(key), TileStatus::Failed);
    assert_eq!(loader.open_blocking(key), Err(TileLoadError::Failed));
    assert_eq!(loader.scheduler().stats().panicked, 1);
}

#[test]
fn rejected_submission_is_not_reported_as_scheduled() {
    let loader = loader_for(vec![(GridPos::new(0, 0), gradient(1, 10, 1))], 0.0, 1);
    let key = TileKey::new(0, 0, 0);
    loader.scheduler().close();

    assert!(!loader.open_async(key));
    assert_eq!(loader.status(key), TileStatus::Failed);
    assert_eq!(loader.stats().loads_failed, 1);
    assert_eq!(loader.stats().loads_started, 0);
}

#[test]
fn far_apart_tiles_only_get_entries_for_themselves() {
    let loader = loader_for(
        vec![
            (GridPos::new(0, 0), gradient(1, 10, 1)),
            (GridPos::new(100_000, 100_000), gradient(2, 10, 1)),
        ],
        0.0,
        1,
    );
    let far = TileKey::new(0, 100_000, 100_000);

    assert_eq!(loader.cache().layout().occupied_count(), 2);
    assert!(loader.exists(far));
    assert!(!loader.exists(TileKey::new(0, 50_000, 50_000)));
    assert_eq!(loader.open_blocking(far), Ok(()));
    assert_eq!(loader.status(TileKey::new(0, 0, 0)), TileStatus::Closed);
    assert_eq!(
        loader.blocking_view(far).get(0, [3, 4, 0]),
        test_helpers::gradient_value(2, 0, 3, 4)
    );
}

#[test]
fn open_views_place_the_tile_inside_its_padded_cell() {
    let loader = loader_for(
        vec![(GridPos::new(0, 0), gradient(3, 10, 1))],
        0.1,
        1,
    );
    let key = TileKey::new(0, 0, 0);
    loader.open_blocking(key).expect("open");

    let blocking = loader.blocking_view(key);
    assert_eq!(blocking.interval().dimensions(), [12, 12, 1]);
    assert_eq!(blocking.get(0, [0, 0, 0]), 0);
    assert_eq!(blocking.get(0, [1, 1, 0]), test_helpers::gradient_value(3, 0, 0, 0));
    assert_eq!(blocking.get(0, [10, 1, 0]), test_helpers::gradient_value(3, 0, 9, 0));
    assert_eq!(blocking.get(0, [11, 1, 0]), 0);

    let volatile = loader.placeholder_view(key).get(0, [1, 1, 0]);
    assert!(volatile.valid);
    assert_eq!(volatile.value, test_helpers::gradient_value(3, 0, 0, 0));
}

#[test]
#[should_panic(expected = "requested while Closed")]
fn placeholder_view_requires_an_open_tile() {
    let loader = loader_for(
        vec![(GridPos::new(0, 0), gradient(1, 10, 1))],
        0.0,
        1,
    );
    let _ = loader.placeholder_view(TileKey::new(0, 0, 0));
}

#[test]
fn dispose_releases_views_and_rejects_opens() {
    let loader = loader_for(
        vec![
            (GridPos::new(0, 0), gradient(1, 10, 1)),
            (GridPos::new(1, 0), gradient(2, 10, 1)),
        ],
        0.0,
        1,
    );
    let open = TileKey::new(0, 0, 0);
    let closed = TileKey::new(0, 1, 0);
    loader.open_blocking(open).expect("open");
    assert!(loader.loaded_views(open).is_some());

    loader.dispose();

    assert!(loader.is_disposed());
    assert!(loader.loaded_views(open).is_none());
    assert_eq!(loader.open_blocking(closed), Err(TileLoadError::Disposed));
    assert!(!loader.open_async(closed));
    assert_eq!(loader.status(closed), TileStatus::Closed);
}

#[test]
fn dispose_discards_running_loads_and_skips_queued_ones() {
    let gate = Arc::new(Gate::default());
    let queued = test_helpers::gradient_source(2, 10, 10, 1);
    let loader = loader_for(
        vec![
            (GridPos::new(0, 0), gated(1, &gate)),
            (GridPos::new(1, 0), tile(queued.clone())),
        ],
        0.0,
        1,
    );
    let running = TileKey::new(0, 0, 0);
    let waiting = TileKey::new(0, 1, 0);

    assert!(loader.open_async(running));
    gate.wait_entered(1);
    // the single worker is busy, so this one stays in the queue
    assert!(loader.open_async(waiting));

    thread::scope(|scope| {
        let blocked = scope.spawn(|| loader.open_blocking(running));
        thread::sleep(Duration::from_millis(10));
        loader.dispose();
        assert_eq!(blocked.join().expect("waiter"), Err(TileLoadError::Disposed));
    });
    gate.release();

    assert!(loader.scheduler().wait_idle(WAIT));
    assert_eq!(queued.open_count(), 0);
    assert!(loader.loaded_views(running).is_none());
    let stats = loader.stats();
    assert_eq!(stats.loads_started, 1);
    assert_eq!(stats.loads_discarded, 1);
    assert_eq!(stats.loads_completed, 0);
}
