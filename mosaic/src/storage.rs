//! Resource provider seam and the RAII lease tying a tile to its storage.

use nalgebra::Vector2;

use crate::error::ResourceExhausted;

/// Allocates and releases the storage backing rasterized tiles.
///
/// Clones are expected to share one underlying pool, so that a lease can
/// carry its own provider reference and return the handle from wherever
/// the tile ends up being dropped.
pub trait ResourceProvider: Clone {
    type Handle;

    /// Allocate storage for a tile of the given pixel size.
    fn acquire(&self, size: Vector2<i64>) -> Result<Self::Handle, ResourceExhausted>;

    /// Return previously acquired storage.
    fn release(&self, handle: Self::Handle);
}

/// Owned storage of a single tile.
///
/// Releases the handle back to its provider exactly once, when the lease
/// is dropped, regardless of whether the tile was ever rasterized.
pub struct Lease<P: ResourceProvider> {
    provider: P,
    handle: Option<P::Handle>,
}

impl<P: ResourceProvider> Lease<P> {
    pub fn new(provider: P, handle: P::Handle) -> Self {
        Self {
            provider,
            handle: Some(handle),
        }
    }

    pub fn handle(&self) -> &P::Handle {
        self.handle.as_ref().expect("lease already released")
    }
}

impl<P: ResourceProvider> Drop for Lease<P> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.provider.release(handle);
        }
    }
}
