//! A small thread-pool executor with cancellable, re-prioritizable tasks.
//!
//! Work items are pushed into per-priority queues and picked up by a fixed
//! set of worker threads. Each submission returns a remote handle that can
//! be used to poll, join, cancel, or re-prioritize the task.

pub mod exec;

mod task;
mod utils;
