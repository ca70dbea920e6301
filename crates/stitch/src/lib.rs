//! Lazily loaded stitched images.
//!
//! A `StitchedImage` arranges many equally sized tiles on a 2D grid and
//! presents them as one multi-resolution image. Only the metadata tile is
//! inspected up front; tile data is opened the first time a voxel inside it
//! is requested, either on the caller's thread (`StitchedBlockingView`) or
//! in the background (`StitchedVolatileView`).

mod config;
mod dispatch;
mod error;
mod image;
mod pixel;
mod store;
mod views;

pub use config::StitchConfig;
pub use dispatch::{Source, flatten_into_tiles};
pub use error::StitchError;
pub use image::{StitchBuilder, StitchedImage, TilePlacement};
pub use pixel::{PixelSource, SourcePair, VolatilePixelSource};
pub use store::{StitchHandle, StitchStore};
pub use views::{Probe, StitchedBlockingView, StitchedVolatileView};
