//! Accumulation of invalidated content regions.
//!
//! Damage is recorded as it arrives and drained once per synchronization
//! pass. The tracker never drops a region on its own; rects only leave the
//! set through [`DamageTracker::take`].

use crate::types::Bounds;

/// Collects content-space regions whose cached pixels have become stale.
#[derive(Debug, Default)]
pub struct DamageTracker {
    rects: Vec<Bounds<f64>>,
}

/// The regions drained from a [`DamageTracker`] by one synchronization
/// pass.
#[derive(Debug, Default)]
pub struct Damage {
    rects: Vec<Bounds<f64>>,
}

impl DamageTracker {
    pub fn new() -> Self {
        Self { rects: Vec::new() }
    }

    /// Record a damaged region.
    ///
    /// Rects already covered by a recorded region are dropped, and recorded
    /// regions covered by the new rect are replaced by it. Overlapping but
    /// not nested rects are kept side by side; the set stays spatially
    /// lossless either way.
    pub fn add(&mut self, rect: Bounds<f64>) {
        if rect.is_empty() {
            return;
        }

        if self.rects.iter().any(|r| r.contains(&rect)) {
            return;
        }

        self.rects.retain(|r| !rect.contains(r));
        self.rects.push(rect);
    }

    pub fn is_empty(&self) -> bool {
        self.rects.is_empty()
    }

    /// Drain the accumulated damage, leaving the tracker empty.
    pub fn take(&mut self) -> Damage {
        Damage {
            rects: std::mem::take(&mut self.rects),
        }
    }
}

impl Damage {
    pub fn is_empty(&self) -> bool {
        self.rects.is_empty()
    }

    pub fn rects(&self) -> &[Bounds<f64>] {
        &self.rects
    }

    /// Check whether any damaged region intersects the given box.
    pub fn intersects(&self, rect: &Bounds<f64>) -> bool {
        self.rects.iter().any(|r| r.intersects(rect))
    }
}
