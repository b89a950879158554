//! A tile-based content cache for zoomable, unbounded surfaces.
//!
//! The surface is partitioned into fixed-size tiles per scale; the
//! [`TileManager`] owns all tilings of a layer, mediates tile creation
//! against a storage budget, tracks invalidated regions, and borrows
//! already-rasterized content from a sibling tiling during scale
//! transitions. Pixel production and storage allocation stay behind the
//! [`ContentSource`] and [`ResourceProvider`] seams.

mod damage;
mod error;
mod grid;
mod manager;
mod pool;
mod source;
mod storage;
mod tile;
mod types;

pub use damage::{Damage, DamageTracker};
pub use error::{RasterError, ResourceExhausted};
pub use grid::Tiling;
pub use manager::{
    ReuseAlways, ReuseDownscaleOnly, ReusePolicy, TileManager, TileRequest, TilingId, UpdateStats,
};
pub use pool::{Buffer, BufferPool};
pub use source::{ContentSource, RasterJob, RasterPriority, ThreadedSource};
pub use storage::{Lease, ResourceProvider};
pub use tile::{Tile, TileId};
pub use types::{Bounds, Rect, Viewport};
