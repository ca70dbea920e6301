//! Ready-made sources for tests in downstream crates.

use std::sync::Arc;

use glam::DVec3;

use crate::MemorySource;

/// Value encoding tile tag, level and voxel: never zero, so it can be told
/// apart from the background.
pub fn gradient_value(tag: u32, level: usize, x: i64, y: i64) -> u32 {
    tag * 10_000_000 + level as u32 * 1_000_000 + (y as u32 + 1) * 1000 + (x as u32 + 1)
}

/// Single-plane gradient with `levels` levels, each downsampled by 2 in x/y.
pub fn gradient_source(tag: u32, width: u64, height: u64, levels: usize) -> Arc<MemorySource<u32>> {
    assert!(width < 1000 && height < 1000, "gradient values overflow past 999");
    let factors = vec![[2, 2, 1]; levels.saturating_sub(1)];
    Arc::new(MemorySource::from_fn(
        format!("tile-{tag}"),
        [width, height, 1],
        DVec3::ONE,
        &factors,
        1,
        move |level, _, [x, y, _]| gradient_value(tag, level, x, y),
    ))
}

pub fn constant_source(name: &str, width: u64, height: u64, value: u16) -> Arc<MemorySource<u16>> {
    Arc::new(MemorySource::from_fn(
        name,
        [width, height, 1],
        DVec3::ONE,
        &[],
        1,
        move |_, _, _| value,
    ))
}
