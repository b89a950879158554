//! Content source seam: where tile pixels actually come from.

use executor::exec::priority::{DropHandle, Executor};
use executor::exec::Monitor;

use crate::error::RasterError;
use crate::types::Rect;

/// Produces the pixel content of tiles.
///
/// Rasterization may happen synchronously or on worker threads; either
/// way, the returned job is polled and joined by the cache on its owning
/// thread. The cache never looks at the produced pixels, it only tracks
/// completion.
pub trait ContentSource {
    type Job: RasterJob;

    /// Request rasterization of the given pixel region.
    ///
    /// # Arguments
    /// - `rect`: The region to rasterize, in pixels at the given scale.
    /// - `scale`: The scale mapping content units to pixels.
    /// - `priority`: A coarse scheduling hint; ordering is up to the
    ///   source.
    fn rasterize(&mut self, rect: &Rect<i64>, scale: f64, priority: RasterPriority)
        -> Self::Job;
}

/// An in-flight rasterization.
///
/// Dropping a job is a cancellation request; a job that never ran must
/// not deliver a result.
pub trait RasterJob {
    fn is_finished(&self) -> bool;
    fn set_priority(&self, priority: RasterPriority);
    fn join(self) -> Result<(), RasterError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum RasterPriority {
    Low,
    Medium,
    High,
}

impl executor::exec::priority::Priority for RasterPriority {
    fn count() -> u8 {
        3
    }

    fn from_value(value: u8) -> Option<Self> {
        match value {
            0 => Some(RasterPriority::Low),
            1 => Some(RasterPriority::Medium),
            2 => Some(RasterPriority::High),
            _ => None,
        }
    }

    fn as_value(&self) -> u8 {
        match self {
            RasterPriority::Low => 0,
            RasterPriority::Medium => 1,
            RasterPriority::High => 2,
        }
    }
}

impl RasterJob for DropHandle<RasterPriority, Result<(), RasterError>> {
    fn is_finished(&self) -> bool {
        DropHandle::is_finished(self)
    }

    fn set_priority(&self, priority: RasterPriority) {
        DropHandle::set_priority(self, priority)
    }

    fn join(self) -> Result<(), RasterError> {
        DropHandle::join(self)
    }
}

/// A [`ContentSource`] running a paint callback on a worker pool.
///
/// The callback receives the pixel region and scale of the requested tile
/// and is expected to write the pixels into whatever storage the embedder
/// shares with it.
pub struct ThreadedSource<F> {
    exec: Executor<RasterPriority>,
    paint: F,
}

impl<F> ThreadedSource<F>
where
    F: Fn(&Rect<i64>, f64) -> Result<(), RasterError> + Clone + Send + 'static,
{
    pub fn new(num_threads: u32, paint: F) -> Self {
        Self {
            exec: Executor::new(num_threads),
            paint,
        }
    }

    /// Stop the workers, waiting for in-flight jobs to finish.
    pub fn shutdown(&mut self) {
        self.exec.shutdown()
    }

    /// Submit a paint job with a completion monitor attached.
    ///
    /// Useful for waking the owning thread when a job finishes instead of
    /// polling every frame.
    pub fn rasterize_with<M>(
        &mut self,
        monitor: M,
        rect: &Rect<i64>,
        scale: f64,
        priority: RasterPriority,
    ) -> <Self as ContentSource>::Job
    where
        M: Monitor + Send + Sync + 'static,
    {
        let paint = self.paint.clone();
        let rect = *rect;

        self.exec
            .submit_with(monitor, priority, move || paint(&rect, scale))
            .cancel_on_drop()
    }
}

impl<F> ContentSource for ThreadedSource<F>
where
    F: Fn(&Rect<i64>, f64) -> Result<(), RasterError> + Clone + Send + 'static,
{
    type Job = DropHandle<RasterPriority, Result<(), RasterError>>;

    fn rasterize(&mut self, rect: &Rect<i64>, scale: f64, priority: RasterPriority) -> Self::Job {
        let paint = self.paint.clone();
        let rect = *rect;

        self.exec
            .submit(priority, move || paint(&rect, scale))
            .cancel_on_drop()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use nalgebra::{point, vector};

    #[test]
    fn paints_on_workers() {
        let painted = Arc::new(AtomicUsize::new(0));

        let counter = painted.clone();
        let mut source = ThreadedSource::new(2, move |rect: &Rect<i64>, scale| {
            assert_eq!(rect.size, vector![256, 256]);
            assert_eq!(scale, 1.0);
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let rect = Rect::new(point![0, 0], vector![256, 256]);
        let job = source.rasterize(&rect, 1.0, RasterPriority::High);

        let result = job
            .join_timeout(Duration::from_secs(5))
            .map_err(|_| ())
            .expect("job did not finish in time");

        assert_eq!(result, Ok(()));
        assert_eq!(painted.load(Ordering::SeqCst), 1);

        source.shutdown();
    }

    #[test]
    fn monitor_reports_completion() {
        struct NotifyOnComplete {
            completed: Arc<AtomicUsize>,
        }

        impl Monitor for NotifyOnComplete {
            fn on_complete(&self) {
                self.completed.fetch_add(1, Ordering::SeqCst);
            }
        }

        let completed = Arc::new(AtomicUsize::new(0));
        let mut source = ThreadedSource::new(1, |_rect: &Rect<i64>, _scale| Ok(()));

        let monitor = NotifyOnComplete {
            completed: completed.clone(),
        };

        let rect = Rect::new(point![0, 0], vector![16, 16]);
        let job = source.rasterize_with(monitor, &rect, 1.0, RasterPriority::Medium);

        job.join_timeout(Duration::from_secs(5))
            .map_err(|_| ())
            .expect("job did not finish in time")
            .unwrap();

        source.shutdown();

        assert_eq!(completed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropped_jobs_are_canceled() {
        let painted = Arc::new(AtomicUsize::new(0));

        let counter = painted.clone();
        // a single worker that is kept busy while we drop the second job
        let mut source = ThreadedSource::new(1, move |_rect: &Rect<i64>, _scale| {
            counter.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(50));
            Ok(())
        });

        let rect = Rect::new(point![0, 0], vector![16, 16]);
        let a = source.rasterize(&rect, 1.0, RasterPriority::High);
        let b = source.rasterize(&rect, 1.0, RasterPriority::Low);

        drop(b);

        a.join_timeout(Duration::from_secs(5))
            .map_err(|_| ())
            .expect("job did not finish in time")
            .unwrap();

        source.shutdown();

        assert_eq!(painted.load(Ordering::SeqCst), 1);
    }
}
