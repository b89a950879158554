//! A single unit of cached, rasterized content.

use nalgebra::{point, Point2};

use crate::storage::{Lease, ResourceProvider};
use crate::types::Bounds;

/// Coordinate of a tile within its grid.
///
/// Unbounded: tiles arbitrarily far from the origin, on either side, are
/// valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileId {
    pub x: i64,
    pub y: i64,
}

impl TileId {
    pub fn new(x: i64, y: i64) -> Self {
        Self { x, y }
    }

    pub fn point(&self) -> Point2<i64> {
        point![self.x, self.y]
    }
}

/// A cached tile: one rectangle of the content surface, rasterized at one
/// scale, backed by one storage lease.
///
/// The covered rectangle is fixed by the coordinate, the grid's tile size
/// and the scale; it never changes after creation. A tile whose content
/// became stale is not patched up but flagged, destroyed, and replaced by
/// a new tile carrying a greater generation stamp.
pub struct Tile<P: ResourceProvider, J> {
    id: TileId,

    /// Covered rectangle in content units.
    rect: Bounds<f64>,

    scale: f64,

    /// Creation stamp; strictly increasing across all tiles of a manager.
    generation: u64,

    storage: Lease<P>,

    /// Size of the backing storage in bytes, for budget accounting.
    pub(crate) bytes: usize,

    pub(crate) needs_raster: bool,

    /// Set when an invalidated region touched this tile. The tile keeps
    /// serving its stale pixels but is replaced on the next request for
    /// its coordinate.
    pub(crate) dirty: bool,

    /// In-flight rasterization, if any. Owned by the tile so that
    /// destroying the tile cancels the job and a late result can never be
    /// applied to a successor.
    pub(crate) pending: Option<J>,

    /// Synchronization frame of the last request, for LRU eviction.
    pub(crate) last_used: u64,
}

impl<P: ResourceProvider, J> Tile<P, J> {
    pub(crate) fn new(
        id: TileId,
        rect: Bounds<f64>,
        scale: f64,
        generation: u64,
        storage: Lease<P>,
        bytes: usize,
    ) -> Self {
        Self {
            id,
            rect,
            scale,
            generation,
            storage,
            bytes,
            needs_raster: true,
            dirty: false,
            pending: None,
            last_used: 0,
        }
    }

    pub fn id(&self) -> TileId {
        self.id
    }

    /// The covered rectangle in content units.
    pub fn rect(&self) -> &Bounds<f64> {
        &self.rect
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether this tile still waits for its content.
    ///
    /// Turns false only when a finished rasterization result is applied on
    /// the owning thread, or when the tile was created by sharing already
    /// rasterized content.
    pub fn needs_raster(&self) -> bool {
        self.needs_raster
    }

    /// Whether an invalidated region touched this tile.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn storage(&self) -> &P::Handle {
        self.storage.handle()
    }
}
