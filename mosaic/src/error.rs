use thiserror::Error;

/// Storage for a new tile could not be obtained.
///
/// Raised when the configured budget is spent and nothing evictable
/// remains, or when the resource provider itself fails to allocate. Never
/// retried internally; callers decide whether to degrade or re-request
/// later.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("tile storage exhausted")]
pub struct ResourceExhausted;

/// The content source failed to produce pixels for a tile.
///
/// The affected tile keeps its needs-raster flag, so a later coverage
/// request retries the job.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("rasterization failed: {0}")]
pub struct RasterError(pub String);
