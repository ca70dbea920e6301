//! Level geometry of a stitched image and the mapping between stitched
//! voxel space and per-tile voxel space.

mod mapper;
mod planner;

pub use mapper::{CoordinateMapper, TileLocation};
pub use planner::{GeometryError, LevelGeometry, PyramidInput, PyramidPlan};

#[cfg(test)]
mod tests;
