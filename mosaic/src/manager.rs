//! The tile cache manager.
//!
//! Owns every tiling of a layer, the storage budget, and the collaborator
//! seams. All mutation is expected to happen on one logical thread (the
//! compositor's update thread); rasterization itself may run elsewhere,
//! but its results are only ever applied in [`synchronize`].
//!
//! [`synchronize`]: TileManager::synchronize

use std::collections::HashMap;

use nalgebra::Vector2;

use crate::damage::DamageTracker;
use crate::error::ResourceExhausted;
use crate::grid::Tiling;
use crate::source::{ContentSource, RasterPriority};
use crate::storage::{Lease, ResourceProvider};
use crate::tile::{Tile, TileId};
use crate::types::{Bounds, Viewport};

const BYTES_PER_PIXEL: usize = 4;

/// Key of a tiling within its manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TilingId(u64);

/// Result of a tile request.
pub enum TileRequest<'a, P: ResourceProvider, J> {
    /// The tile exists; it may still be waiting for rasterization.
    Ready(&'a Tile<P, J>),

    /// Tile creation is currently disabled; nothing was allocated. Not an
    /// error: existing tiles are unaffected and the caller renders with
    /// whatever coverage it has.
    Suppressed,
}

/// Outcome counts of one [`TileManager::update`] pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct UpdateStats {
    /// Tiles that exist after the pass, pre-existing or newly created.
    pub ready: usize,

    /// Requests skipped because creation is disabled.
    pub suppressed: usize,

    /// Requests dropped because the budget is spent and nothing more can
    /// be evicted.
    pub exhausted: usize,
}

/// Decides whether content cached by a twin tiling may stand in for a
/// fresh rasterization during a scale transition.
pub trait ReusePolicy {
    /// `source_scale` is the scale the cached content was rasterized at,
    /// `target_scale` the scale of the requesting tiling.
    fn should_share(&self, source_scale: f64, target_scale: f64) -> bool;
}

/// Share whenever the twin covers the content, accepting interpolation
/// artifacts when the content has to be scaled up.
#[derive(Debug, Default)]
pub struct ReuseAlways;

impl ReusePolicy for ReuseAlways {
    fn should_share(&self, _source_scale: f64, _target_scale: f64) -> bool {
        true
    }
}

/// Share only content rasterized at the target scale or above, so shared
/// pixels are never upscaled.
#[derive(Debug, Default)]
pub struct ReuseDownscaleOnly;

impl ReusePolicy for ReuseDownscaleOnly {
    fn should_share(&self, source_scale: f64, target_scale: f64) -> bool {
        source_scale >= target_scale
    }
}

struct Budget {
    limit: usize,
    used: usize,
}

/// Owns all tilings of one layer and mediates tile creation against a
/// storage budget.
///
/// Each manager instance carries its own budget accounting; independent
/// managers never interfere with each other.
pub struct TileManager<P: ResourceProvider, S: ContentSource> {
    tilings: HashMap<TilingId, Tiling<P, S::Job>>,

    damage: DamageTracker,

    provider: P,
    source: S,
    reuse: Box<dyn ReusePolicy>,

    budget: Budget,
    creation_enabled: bool,

    next_tiling: u64,

    /// Source of generation stamps; strictly increasing over the lifetime
    /// of the manager.
    next_generation: u64,

    /// Synchronization frame counter, the clock behind LRU eviction.
    frame: u64,
}

impl<P, S> TileManager<P, S>
where
    P: ResourceProvider,
    S: ContentSource,
{
    /// Create a manager with the given collaborators and budget (in bytes
    /// of tile storage).
    pub fn new(provider: P, source: S, budget: usize) -> Self {
        Self {
            tilings: HashMap::new(),
            damage: DamageTracker::new(),
            provider,
            source,
            reuse: Box::new(ReuseAlways),
            budget: Budget {
                limit: budget,
                used: 0,
            },
            creation_enabled: true,
            next_tiling: 0,
            next_generation: 0,
            frame: 0,
        }
    }

    /// Replace the twin-content reuse policy.
    pub fn set_reuse_policy<R: ReusePolicy + 'static>(&mut self, policy: R) {
        self.reuse = Box::new(policy);
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Add a tiling at the given scale.
    ///
    /// `tile_size` is the tile size in pixels at that scale.
    pub fn add_tiling(&mut self, scale: f64, tile_size: Vector2<i64>) -> TilingId {
        let id = TilingId(self.next_tiling);
        self.next_tiling += 1;

        self.tilings.insert(id, Tiling::new(scale, tile_size));

        log::debug!("added tiling {:?} at scale {}", id, scale);
        id
    }

    /// Remove a tiling, releasing the storage of all its tiles.
    ///
    /// Twin links pointing at the removed tiling are cleared.
    pub fn remove_tiling(&mut self, id: TilingId) {
        let tiling = self.tilings.remove(&id).expect("unknown tiling");

        self.budget.used -= tiling.tiles().map(|t| t.bytes).sum::<usize>();

        for other in self.tilings.values_mut() {
            if other.twin() == Some(id) {
                other.set_twin(None);
            }
        }

        log::debug!(
            "removed tiling {:?} at scale {} ({} tiles)",
            id,
            tiling.scale(),
            tiling.len()
        );

        // tile leases return their storage here
        drop(tiling);
    }

    /// Point `of` at `to` for twin-content lookups, or clear the link.
    pub fn set_twin(&mut self, of: TilingId, to: Option<TilingId>) {
        if let Some(to) = to {
            assert!(self.tilings.contains_key(&to), "unknown twin tiling");
            assert!(of != to, "tiling cannot twin itself");
        }

        self.tilings
            .get_mut(&of)
            .expect("unknown tiling")
            .set_twin(to);
    }

    /// Find a tiling with exactly the given scale, if one exists.
    pub fn find_tiling(&self, scale: f64) -> Option<TilingId> {
        self.tilings
            .iter()
            .find(|(_, tiling)| tiling.scale() == scale)
            .map(|(id, _)| *id)
    }

    pub fn tiling(&self, id: TilingId) -> &Tiling<P, S::Job> {
        self.tilings.get(&id).expect("unknown tiling")
    }

    pub fn tilings(&self) -> impl Iterator<Item = (TilingId, &Tiling<P, S::Job>)> + '_ {
        self.tilings.iter().map(|(id, tiling)| (*id, tiling))
    }

    /// Record an invalidated content region.
    ///
    /// Cheap; the region is only applied to tiles during the next
    /// [`synchronize`][Self::synchronize].
    pub fn invalidate(&mut self, region: Bounds<f64>) {
        self.damage.add(region);
    }

    /// The once-per-update-cycle pass, on the owning thread.
    ///
    /// Applies accumulated damage to every tiling, applies finished
    /// rasterizations (the only place a tile's needs-raster flag ever
    /// turns false), and advances the LRU clock.
    pub fn synchronize(&mut self) {
        let damage = self.damage.take();

        if !damage.is_empty() {
            for tiling in self.tilings.values_mut() {
                for rect in damage.rects() {
                    tiling.invalidate(rect);
                }
            }
        }

        for tiling in self.tilings.values_mut() {
            tiling.poll_pending();
        }

        self.frame += 1;
    }

    /// Enable or disable tile creation.
    ///
    /// While disabled, [`ensure_tile`][Self::ensure_tile] reports
    /// [`TileRequest::Suppressed`] instead of allocating. Existing tiles
    /// are unaffected.
    pub fn set_creation_enabled(&mut self, enabled: bool) {
        log::debug!("tile creation {}", if enabled { "enabled" } else { "disabled" });
        self.creation_enabled = enabled;
    }

    /// Get or create the tile at `id` within `tiling`.
    ///
    /// A live tile is returned as-is. A tile flagged by invalidation is
    /// destroyed and recreated as a distinct entity with a strictly
    /// greater generation stamp. Creation first makes room under the
    /// budget by evicting the least-recently-used non-visible tiles; if
    /// nothing evictable remains, `ResourceExhausted` is returned and no
    /// tile is created.
    pub fn ensure_tile(
        &mut self,
        tiling: TilingId,
        id: TileId,
    ) -> Result<TileRequest<'_, P, S::Job>, ResourceExhausted> {
        let frame = self.frame;

        // fast path: a live tile is touched and returned as-is; a live
        // tile without content and without an in-flight job gets a fresh
        // raster request (retry after a failed one)
        let (live, retry) = {
            let grid = self.tilings.get_mut(&tiling).expect("unknown tiling");

            match grid.tile_mut(id) {
                Some(tile) if !tile.dirty => {
                    tile.last_used = frame;
                    (true, tile.needs_raster && tile.pending.is_none())
                }
                _ => (false, false),
            }
        };

        if live {
            if retry && self.creation_enabled {
                let (px_rect, scale, priority) = self.raster_request(tiling, id);
                let job = self.source.rasterize(&px_rect, scale, priority);

                let grid = self.tilings.get_mut(&tiling).unwrap();
                grid.tile_mut(id).unwrap().pending = Some(job);
            }

            return Ok(TileRequest::Ready(self.tile_ref(tiling, id)));
        }

        // a flagged tile is replaced outright, never patched
        let stale = {
            let grid = self.tilings.get_mut(&tiling).unwrap();
            let dirty = grid.tile(id).map_or(false, |tile| tile.is_dirty());

            if dirty {
                grid.remove(id)
            } else {
                None
            }
        };

        if let Some(old) = stale {
            self.budget.used -= old.bytes;
            log::trace!(
                "recreating tile {:?} (was generation {})",
                id,
                old.generation()
            );
        }

        if !self.creation_enabled {
            log::debug!("tile creation disabled, suppressing {:?}", id);
            return Ok(TileRequest::Suppressed);
        }

        // gather creation parameters before any further mutation
        let (rect, scale, size, twin) = {
            let grid = self.tilings.get(&tiling).unwrap();
            (
                grid.content_rect(id),
                grid.scale(),
                grid.tile_size(),
                grid.twin(),
            )
        };

        let bytes = (size.x * size.y) as usize * BYTES_PER_PIXEL;

        // make room under the budget; the provider has the final say
        if !self.evict_for(bytes) {
            log::debug!("budget exhausted, cannot create tile {:?}", id);
            return Err(ResourceExhausted);
        }

        let handle = self.provider.acquire(size)?;
        let lease = Lease::new(self.provider.clone(), handle);

        let shared = twin
            .map(|twin| self.twin_covers(twin, &rect, scale))
            .unwrap_or(false);

        let generation = self.next_generation;
        self.next_generation += 1;

        let mut tile = Tile::new(id, rect, scale, generation, lease, bytes);
        tile.last_used = frame;

        if shared {
            // content gets copied over from the twin's storage by the
            // embedder; no content source round-trip
            tile.needs_raster = false;
            log::trace!("sharing twin content for tile {:?} at scale {}", id, scale);
        } else {
            let (px_rect, _, priority) = self.raster_request(tiling, id);
            tile.pending = Some(self.source.rasterize(&px_rect, scale, priority));
        }

        self.budget.used += bytes;
        self.tilings.get_mut(&tiling).unwrap().insert(tile);

        Ok(TileRequest::Ready(self.tile_ref(tiling, id)))
    }

    /// Destroy the tile at `id`, returning its storage.
    ///
    /// Returns whether a tile existed at that coordinate.
    pub fn destroy_tile(&mut self, tiling: TilingId, id: TileId) -> bool {
        let grid = self.tilings.get_mut(&tiling).expect("unknown tiling");

        match grid.remove(id) {
            Some(tile) => {
                // the lease returns the storage when the tile drops; an
                // in-flight job is canceled the same way
                self.budget.used -= tile.bytes;
                true
            }
            None => false,
        }
    }

    /// Ensure coverage of a viewport, degrading instead of failing.
    ///
    /// Records the viewport as the tiling's visible (eviction-pinned)
    /// region, requests every covering tile, and bumps the priority of
    /// still-pending jobs in view.
    pub fn update(&mut self, tiling: TilingId, vp: &Viewport) -> UpdateStats {
        let visible = vp.r.bounds();

        let coords = {
            let grid = self.tilings.get_mut(&tiling).expect("unknown tiling");
            grid.set_visible(visible);
            grid.coords_for(&visible)
        };

        let mut stats = UpdateStats::default();
        let mut exhausted = false;

        for (x, y) in coords.range_iter() {
            if exhausted {
                stats.exhausted += 1;
                continue;
            }

            match self.ensure_tile(tiling, TileId::new(x, y)) {
                Ok(TileRequest::Ready(_)) => stats.ready += 1,
                Ok(TileRequest::Suppressed) => stats.suppressed += 1,
                Err(ResourceExhausted) => {
                    // nothing will free up mid-pass; degrade and move on
                    stats.exhausted += 1;
                    exhausted = true;
                }
            }
        }

        self.tilings
            .get(&tiling)
            .unwrap()
            .promote_pending(&visible, RasterPriority::High);

        stats
    }

    /// All materialized tiles intersecting the viewport.
    ///
    /// Lazy, finite, and restartable; recomputed on every call.
    pub fn coverage<'a>(
        &'a self,
        tiling: TilingId,
        vp: &Viewport,
    ) -> impl Iterator<Item = &'a Tile<P, S::Job>> + 'a {
        let rect = vp.r.bounds();
        self.tiling(tiling).coverage(&rect)
    }

    /// Number of tiles in the tiling still waiting for content.
    pub fn pending_raster_count(&self, tiling: TilingId) -> usize {
        self.tiling(tiling).pending_raster_count()
    }

    pub fn budget_limit(&self) -> usize {
        self.budget.limit
    }

    pub fn budget_used(&self) -> usize {
        self.budget.used
    }

    fn tile_ref(&self, tiling: TilingId, id: TileId) -> &Tile<P, S::Job> {
        self.tilings
            .get(&tiling)
            .and_then(|grid| grid.tile(id))
            .expect("tile just ensured")
    }

    /// Pixel rect, scale, and priority hint for rasterizing `id`.
    fn raster_request(
        &self,
        tiling: TilingId,
        id: TileId,
    ) -> (crate::types::Rect<i64>, f64, RasterPriority) {
        let grid = self.tiling(tiling);

        let in_view = match grid.visible() {
            Some(rect) => grid.content_rect(id).intersects(rect),
            None => false,
        };

        let priority = if in_view {
            RasterPriority::High
        } else {
            RasterPriority::Low
        };

        (grid.pixel_rect(id), grid.scale(), priority)
    }

    /// Evict least-recently-used non-visible tiles until `bytes` more fit
    /// into the budget. Returns whether enough room could be made.
    fn evict_for(&mut self, bytes: usize) -> bool {
        while self.budget.used + bytes > self.budget.limit {
            let victim = self
                .tilings
                .iter()
                .flat_map(|(tid, grid)| {
                    grid.eviction_candidates()
                        .map(move |tile| (*tid, tile.id(), tile.last_used, tile.generation()))
                })
                .min_by_key(|&(_, _, last_used, generation)| (last_used, generation));

            match victim {
                Some((tid, id, ..)) => {
                    log::debug!("evicting tile {:?} from tiling {:?}", id, tid);
                    self.destroy_tile(tid, id);
                }
                None => return false,
            }
        }

        true
    }

    /// Whether the twin has live, rasterized tiles covering the whole of
    /// `rect`, and the reuse policy allows sharing them.
    fn twin_covers(&self, twin: TilingId, rect: &Bounds<f64>, target_scale: f64) -> bool {
        let grid = match self.tilings.get(&twin) {
            Some(grid) => grid,
            None => return false,
        };

        if !self.reuse.should_share(grid.scale(), target_scale) {
            return false;
        }

        let coords = grid.coords_for(rect);
        if coords.is_empty() {
            return false;
        }

        coords.range_iter().all(|(x, y)| {
            grid.tile(TileId::new(x, y))
                .map_or(false, |tile| !tile.is_dirty() && !tile.needs_raster())
        })
    }
}
