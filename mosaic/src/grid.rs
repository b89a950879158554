//! A sparse grid of tiles covering the content surface at one scale.

use std::collections::HashMap;

use nalgebra::{vector, Vector2};

use crate::manager::TilingId;
use crate::source::{RasterJob, RasterPriority};
use crate::storage::ResourceProvider;
use crate::tile::{Tile, TileId};
use crate::types::{Bounds, Rect};

/// One tiling of the surface: a partition into fixed-size tiles at a
/// single scale.
///
/// The grid is sparse; only requested coordinates are materialized. The
/// coordinate space is unbounded, so everything is keyed through an
/// associative map rather than an index range.
pub struct Tiling<P: ResourceProvider, J> {
    scale: f64,

    /// Tile size in pixels at this tiling's scale.
    tile_size: Vector2<i64>,

    tiles: HashMap<TileId, Tile<P, J>>,

    /// Sibling tiling at another scale, resolved through the manager.
    twin: Option<TilingId>,

    /// Content region of the last coverage request. Tiles intersecting it
    /// are pinned and exempt from eviction.
    visible: Option<Bounds<f64>>,
}

impl<P: ResourceProvider, J> Tiling<P, J> {
    pub(crate) fn new(scale: f64, tile_size: Vector2<i64>) -> Self {
        assert!(scale > 0.0, "tiling scale must be positive");
        assert!(
            tile_size.x > 0 && tile_size.y > 0,
            "tile size must be positive"
        );

        Self {
            scale,
            tile_size,
            tiles: HashMap::new(),
            twin: None,
            visible: None,
        }
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn tile_size(&self) -> Vector2<i64> {
        self.tile_size
    }

    /// The tiling this one may borrow already-rasterized content from, if
    /// linked.
    pub fn twin(&self) -> Option<TilingId> {
        self.twin
    }

    pub(crate) fn set_twin(&mut self, twin: Option<TilingId>) {
        self.twin = twin;
    }

    pub fn visible(&self) -> Option<&Bounds<f64>> {
        self.visible.as_ref()
    }

    pub(crate) fn set_visible(&mut self, rect: Bounds<f64>) {
        self.visible = Some(rect);
    }

    /// The box of tile coordinates covering the given content rect.
    ///
    /// A pure function of the rect, the scale, and the tile size.
    pub fn coords_for(&self, rect: &Bounds<f64>) -> Bounds<i64> {
        rect.scale(self.scale)
            .round_outwards()
            .cast_unchecked::<i64>()
            .tiled(&self.tile_size)
    }

    /// The content-space rectangle covered by the tile at `id`.
    pub fn content_rect(&self, id: TileId) -> Bounds<f64> {
        let size: Vector2<f64> = nalgebra::convert(self.tile_size);

        Bounds {
            x_min: id.x as f64 * size.x,
            y_min: id.y as f64 * size.y,
            x_max: (id.x + 1) as f64 * size.x,
            y_max: (id.y + 1) as f64 * size.y,
        }
        .scale(1.0 / self.scale)
    }

    /// The pixel rectangle of the tile at `id`, at this tiling's scale.
    pub fn pixel_rect(&self, id: TileId) -> Rect<i64> {
        let offs = vector![id.x, id.y].component_mul(&self.tile_size);

        Rect::new(offs.into(), self.tile_size)
    }

    /// Tile size to use for content of the given bounds.
    ///
    /// Deterministic: the configured tile size, clamped to the pixel size
    /// of the bounds so that tiny content does not round up to a full
    /// tile, and never below a single pixel.
    pub fn tile_size_for(&self, bounds: &Bounds<f64>) -> Vector2<i64> {
        let px = bounds.scale(self.scale).round_outwards().cast_unchecked::<i64>();
        let size = px.rect().size;

        vector![
            size.x.clamp(1, self.tile_size.x),
            size.y.clamp(1, self.tile_size.y)
        ]
    }

    pub fn tile(&self, id: TileId) -> Option<&Tile<P, J>> {
        self.tiles.get(&id)
    }

    pub(crate) fn tile_mut(&mut self, id: TileId) -> Option<&mut Tile<P, J>> {
        self.tiles.get_mut(&id)
    }

    pub fn tiles(&self) -> impl Iterator<Item = &Tile<P, J>> + '_ {
        self.tiles.values()
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    pub(crate) fn insert(&mut self, tile: Tile<P, J>) {
        let previous = self.tiles.insert(tile.id(), tile);
        debug_assert!(previous.is_none(), "coordinate occupied twice");
    }

    pub(crate) fn remove(&mut self, id: TileId) -> Option<Tile<P, J>> {
        self.tiles.remove(&id)
    }

    /// Flag every tile whose covered rectangle intersects `region`.
    ///
    /// Exact: tiles merely touching the region's edge are left alone, and
    /// every properly intersecting tile is flagged. Returns the number of
    /// newly flagged tiles.
    pub fn invalidate(&mut self, region: &Bounds<f64>) -> usize {
        let mut flagged = 0;

        for tile in self.tiles.values_mut() {
            if !tile.dirty && tile.rect().intersects(region) {
                tile.dirty = true;
                flagged += 1;
            }
        }

        if flagged > 0 {
            log::trace!(
                "invalidated {} tiles at scale {} for {:?}",
                flagged,
                self.scale,
                region
            );
        }

        flagged
    }

    /// Number of tiles still waiting for rasterized content.
    pub fn pending_raster_count(&self) -> usize {
        self.tiles.values().filter(|t| t.needs_raster).count()
    }

    /// All materialized tiles intersecting the given content rect.
    ///
    /// Lazy and restartable; recomputed from the map on every call.
    pub fn coverage<'a>(
        &'a self,
        rect: &Bounds<f64>,
    ) -> impl Iterator<Item = &'a Tile<P, J>> + 'a {
        self.coords_for(rect)
            .range_iter()
            .filter_map(move |(x, y)| self.tiles.get(&TileId::new(x, y)))
    }

    /// Tiles that may be evicted under budget pressure: everything not
    /// pinned by the current visible region.
    pub(crate) fn eviction_candidates(&self) -> impl Iterator<Item = &Tile<P, J>> + '_ {
        self.tiles.values().filter(move |tile| match &self.visible {
            Some(rect) => !tile.rect().intersects(rect),
            None => true,
        })
    }
}

impl<P: ResourceProvider, J: RasterJob> Tiling<P, J> {
    /// Apply finished rasterizations; must run on the owning thread.
    ///
    /// Results for flagged tiles are discarded, their jobs canceled: the
    /// tile is about to be replaced and a late result must never leak into
    /// its successor.
    pub(crate) fn poll_pending(&mut self) -> (usize, usize) {
        let mut applied = 0;
        let mut failed = 0;

        for tile in self.tiles.values_mut() {
            if tile.dirty {
                if tile.pending.take().is_some() {
                    log::trace!("canceled raster of invalidated tile {:?}", tile.id());
                }
                continue;
            }

            let finished = tile.pending.as_ref().map_or(false, RasterJob::is_finished);
            if !finished {
                continue;
            }

            match tile.pending.take().unwrap().join() {
                Ok(()) => {
                    tile.needs_raster = false;
                    applied += 1;
                }
                Err(err) => {
                    // tile stays needs-raster; the next request retries
                    log::warn!("tile {:?} at scale {}: {}", tile.id(), self.scale, err);
                    failed += 1;
                }
            }
        }

        (applied, failed)
    }

    /// Re-prioritize still-pending jobs intersecting `rect`.
    pub(crate) fn promote_pending(&self, rect: &Bounds<f64>, priority: RasterPriority) {
        for tile in self.tiles.values() {
            if let Some(job) = &tile.pending {
                if tile.rect().intersects(rect) {
                    job.set_priority(priority);
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use nalgebra::vector;

    use crate::storage::Lease;

    #[derive(Clone)]
    struct NullProvider;

    impl ResourceProvider for NullProvider {
        type Handle = ();

        fn acquire(&self, _size: Vector2<i64>) -> Result<(), crate::error::ResourceExhausted> {
            Ok(())
        }

        fn release(&self, _handle: ()) {}
    }

    fn tiling(scale: f64) -> Tiling<NullProvider, ()> {
        Tiling::new(scale, vector![256, 256])
    }

    fn insert_tile(tiling: &mut Tiling<NullProvider, ()>, id: TileId, generation: u64) {
        let rect = tiling.content_rect(id);
        let lease = Lease::new(NullProvider, ());
        tiling.insert(Tile::new(id, rect, tiling.scale(), generation, lease, 0));
    }

    fn bounds(x_min: f64, y_min: f64, x_max: f64, y_max: f64) -> Bounds<f64> {
        Bounds {
            x_min,
            y_min,
            x_max,
            y_max,
        }
    }

    #[test]
    fn coords_for_covers_content() {
        let tiling = tiling(1.0);
        let coords = tiling.coords_for(&bounds(0.0, 0.0, 1000.0, 1000.0));

        assert_eq!(coords.x_min, 0);
        assert_eq!(coords.y_min, 0);
        assert_eq!(coords.x_max, 4);
        assert_eq!(coords.y_max, 4);
    }

    #[test]
    fn coords_scale_with_the_tiling() {
        // at scale 2.0, the same content needs twice the tiles per axis
        let tiling = tiling(2.0);
        let coords = tiling.coords_for(&bounds(0.0, 0.0, 256.0, 256.0));

        assert_eq!(coords.x_max, 2);
        assert_eq!(coords.y_max, 2);
    }

    #[test]
    fn partition_is_disjoint_with_shared_edges() {
        let tiling = tiling(1.0);

        let a = tiling.content_rect(TileId::new(0, 0));
        let b = tiling.content_rect(TileId::new(1, 0));
        let c = tiling.content_rect(TileId::new(1, 1));

        assert!(!a.intersects(&b));
        assert!(!a.intersects(&c));
        assert!(!b.intersects(&c));

        // edges are shared exactly
        assert_eq!(a.x_max, b.x_min);
        assert_eq!(b.y_max, c.y_min);
    }

    #[test]
    fn content_rect_accounts_for_scale() {
        let tiling = tiling(2.0);
        let rect = tiling.content_rect(TileId::new(0, 0));

        // 256 pixels at scale 2.0 cover 128 content units
        assert_eq!(rect.x_max, 128.0);
        assert_eq!(rect.y_max, 128.0);
    }

    #[test]
    fn invalidate_is_spatially_exact() {
        let mut tiling = tiling(1.0);

        insert_tile(&mut tiling, TileId::new(0, 0), 1);
        insert_tile(&mut tiling, TileId::new(3, 3), 2);

        // disjoint region: nothing flagged
        assert_eq!(tiling.invalidate(&bounds(300.0, 300.0, 400.0, 400.0)), 0);
        assert!(!tiling.tile(TileId::new(0, 0)).unwrap().is_dirty());

        // a region merely touching the tile edge flags nothing either
        assert_eq!(tiling.invalidate(&bounds(256.0, 0.0, 300.0, 10.0)), 0);

        // covering region: exactly the intersecting tile is flagged
        assert_eq!(tiling.invalidate(&bounds(0.0, 0.0, 256.0, 256.0)), 1);
        assert!(tiling.tile(TileId::new(0, 0)).unwrap().is_dirty());
        assert!(!tiling.tile(TileId::new(3, 3)).unwrap().is_dirty());

        // flagging is idempotent
        assert_eq!(tiling.invalidate(&bounds(0.0, 0.0, 256.0, 256.0)), 0);
    }

    #[test]
    fn tile_size_for_is_deterministic_and_clamped() {
        let tiling = tiling(1.0);

        let small = bounds(0.0, 0.0, 100.0, 60.0);
        let size = tiling.tile_size_for(&small);
        assert_eq!(size, vector![100, 60]);
        assert_eq!(size, tiling.tile_size_for(&small));

        let large = bounds(0.0, 0.0, 10_000.0, 10_000.0);
        assert_eq!(tiling.tile_size_for(&large), vector![256, 256]);
    }

    #[test]
    fn coverage_is_restartable() {
        let mut tiling = tiling(1.0);

        insert_tile(&mut tiling, TileId::new(0, 0), 1);
        insert_tile(&mut tiling, TileId::new(1, 0), 2);
        insert_tile(&mut tiling, TileId::new(9, 9), 3);

        let view = bounds(0.0, 0.0, 512.0, 256.0);

        assert_eq!(tiling.coverage(&view).count(), 2);

        // no cursor state: a second pass sees the same tiles
        assert_eq!(tiling.coverage(&view).count(), 2);
    }

    #[test]
    fn far_away_coordinates_are_supported() {
        let mut tiling = tiling(1.0);

        let far = TileId::new(-1_000_000, 4_000_000);
        insert_tile(&mut tiling, far, 1);

        let rect = tiling.content_rect(far);
        assert_eq!(tiling.coverage(&rect).count(), 1);
    }
}
