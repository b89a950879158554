//! Shared state between a queued task and its remote handle.
//!
//! A task is a reference-counted cell holding the not-yet-executed closure,
//! the result once the closure has run, and the bookkeeping needed to
//! cancel or re-prioritize it. Workers drive the cell through [`execute`],
//! handles observe it from the outside.
//!
//! [`execute`]: Execute::execute

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::exec::Monitor;

/// Payload of a propagated worker panic.
type Panic = Box<dyn Any + Send + 'static>;

enum State<R> {
    /// Queued, closure not started yet.
    Pending(Box<dyn FnOnce() -> R + Send>),

    /// Closure is running on a worker thread.
    Running,

    /// Closure has run; result waits to be claimed by the handle.
    Finished(Option<Result<R, Panic>>),

    /// Canceled before the closure started.
    Canceled,
}

pub(crate) struct Core<R> {
    /// Queue-wide unique task identity, used to find this task in a queue.
    id: u64,

    state: Mutex<State<R>>,

    /// Signals state transitions to joining threads.
    signal: Condvar,

    /// Current priority value, mirrored here so handles can requeue the
    /// task without knowing the concrete priority type.
    priority: AtomicU8,

    monitor: Box<dyn Monitor + Send + Sync>,
}

/// Type-erased view of a task, as stored in the executor queues.
pub(crate) trait Execute: Send + Sync {
    fn task_id(&self) -> u64;
    fn execute(&self);
}

static NEXT_ID: AtomicU64 = AtomicU64::new(0);

impl<R> Core<R> {
    pub(crate) fn new<F, M>(closure: F, monitor: M, priority: u8) -> Self
    where
        F: FnOnce() -> R + Send + 'static,
        M: Monitor + Send + Sync + 'static,
    {
        Core {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            state: Mutex::new(State::Pending(Box::new(closure))),
            signal: Condvar::new(),
            priority: AtomicU8::new(priority),
            monitor: Box::new(monitor),
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn priority(&self) -> u8 {
        self.priority.load(Ordering::SeqCst)
    }

    pub(crate) fn swap_priority(&self, priority: u8) -> u8 {
        self.priority.swap(priority, Ordering::SeqCst)
    }

    pub(crate) fn is_finished(&self) -> bool {
        matches!(*self.state.lock().unwrap(), State::Finished(_))
    }

    /// Try to cancel the task. Succeeds only while the closure has not
    /// started executing.
    pub(crate) fn cancel(&self) -> bool {
        let mut state = self.state.lock().unwrap();

        match *state {
            State::Pending(_) => {
                *state = State::Canceled;
                self.signal.notify_all();
                drop(state);

                self.monitor.on_canceled();
                true
            }
            _ => false,
        }
    }

    /// Wait for the task to finish and claim its result.
    ///
    /// Panics if the task has been canceled or if its closure panicked.
    pub(crate) fn join(&self) -> R {
        let mut state = self.state.lock().unwrap();

        loop {
            if let State::Finished(result) = &mut *state {
                return claim(result);
            }

            if matches!(*state, State::Canceled) {
                panic!("tried to join a canceled task");
            }

            state = self.signal.wait(state).unwrap();
        }
    }

    /// Like [`join`][Self::join], but gives up after `duration`.
    pub(crate) fn join_timeout(&self, duration: Duration) -> Result<R, ()> {
        let deadline = Instant::now() + duration;
        let mut state = self.state.lock().unwrap();

        loop {
            if let State::Finished(result) = &mut *state {
                return Ok(claim(result));
            }

            if matches!(*state, State::Canceled) {
                panic!("tried to join a canceled task");
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(());
            }

            let (guard, _) = self.signal.wait_timeout(state, deadline - now).unwrap();
            state = guard;
        }
    }
}

fn claim<R>(result: &mut Option<Result<R, Panic>>) -> R {
    match result.take().expect("task result claimed twice") {
        Ok(value) => value,
        Err(payload) => panic::resume_unwind(payload),
    }
}

impl<R: Send> Execute for Core<R> {
    fn task_id(&self) -> u64 {
        self.id
    }

    fn execute(&self) {
        let closure = {
            let mut state = self.state.lock().unwrap();

            match std::mem::replace(&mut *state, State::Running) {
                State::Pending(closure) => closure,

                // canceled while still queued: nothing to run
                State::Canceled => {
                    *state = State::Canceled;
                    return;
                }

                other => {
                    *state = other;
                    return;
                }
            }
        };

        self.monitor.on_execute();

        let result = panic::catch_unwind(AssertUnwindSafe(closure));

        {
            let mut state = self.state.lock().unwrap();
            *state = State::Finished(Some(result));
            self.signal.notify_all();
        }

        self.monitor.on_complete();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn execute_and_claim() {
        let core = Core::new(|| 42, (), 0);

        assert!(!core.is_finished());
        core.execute();
        assert!(core.is_finished());
        assert_eq!(core.join(), 42);
    }

    #[test]
    fn cancel_before_execute() {
        let core: Core<i32> = Core::new(|| 42, (), 0);

        assert!(core.cancel());
        core.execute();

        // canceling twice has no effect
        assert!(!core.cancel());
        assert!(!core.is_finished());
    }

    #[test]
    fn cancel_after_execute_fails() {
        let core = Core::new(|| 42, (), 0);

        core.execute();
        assert!(!core.cancel());
        assert_eq!(core.join(), 42);
    }

    #[test]
    fn join_timeout_expires() {
        let core: Core<i32> = Core::new(|| 42, (), 0);

        let result = core.join_timeout(Duration::from_millis(10));
        assert!(result.is_err());
    }
}
