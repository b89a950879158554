//! A thread-pool based executor with support for task priorities.

use std::collections::VecDeque;
use std::marker::PhantomData;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::task::{Core, Execute};

use super::Monitor;

type TaskRef = Arc<dyn Execute>;

/// A priority enum.
///
/// Priority values are arranged from `0` (lowest, inclusively) to
/// `Self::count() - 1` (highest).
pub trait Priority: Sized + Copy {
    /// The maximum number of supported priorities.
    fn count() -> u8;

    /// Returns the priority instance for the given value.
    fn from_value(value: u8) -> Option<Self>;

    /// The priority value of this instance.
    fn as_value(&self) -> u8;
}

/// A basic thread-pool executor with a fixed number of threads and
/// cancellable tasks.
pub struct Executor<P> {
    inner: Arc<ExecutorStruct>,

    /// Handles to the execution threads
    threads: Vec<JoinHandle<()>>,

    /// Marker for priority.
    _marker: PhantomData<P>,
}

/// Remote handle for a task.
pub struct Handle<P, R> {
    core: Arc<Core<R>>,
    exec: Weak<ExecutorStruct>,
    _marker: PhantomData<P>,
}

/// Remote handle for a task, canceling the task when being dropped.
pub struct DropHandle<P, R> {
    inner: Option<Handle<P, R>>,
}

struct ExecutorStruct {
    /// Task queues, one per priority
    queues: Mutex<Vec<VecDeque<TaskRef>>>,

    /// Condition variable for signaling arrival of new work items
    signal: Condvar,

    /// Whether to keep the queue running
    running: AtomicBool,
}

impl<P: Priority> Executor<P> {
    pub fn new(num_threads: u32) -> Self {
        let queues = (0..P::count()).map(|_| VecDeque::new()).collect();

        let inner = ExecutorStruct {
            queues: Mutex::new(queues),
            signal: Condvar::new(),
            running: AtomicBool::new(true),
        };
        let inner = Arc::new(inner);

        let threads = (0..num_threads)
            .map(|_| {
                let exec = inner.clone();
                std::thread::spawn(move || exec.process())
            })
            .collect();

        Executor {
            inner,
            threads,
            _marker: PhantomData,
        }
    }

    pub fn submit<F, R>(&self, priority: P, closure: F) -> Handle<P, R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        self.submit_with((), priority, closure)
    }

    pub fn submit_with<F, R, M>(&self, monitor: M, priority: P, closure: F) -> Handle<P, R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
        M: Monitor + Send + Sync + 'static,
    {
        let core = Arc::new(Core::new(closure, monitor, priority.as_value()));

        self.inner.push(core.clone(), priority.as_value());

        Handle {
            core,
            exec: Arc::downgrade(&self.inner),
            _marker: PhantomData,
        }
    }

    pub fn shutdown(&mut self) {
        use std::sync::atomic::Ordering;

        // tell all threads to shut down
        self.inner.running.store(false, Ordering::SeqCst);
        self.inner.signal.notify_all();

        // wait for all threads to finish, ignore any panics
        let threads = std::mem::take(&mut self.threads);
        for handle in threads {
            let _ = handle.join();
        }
    }
}

impl<P> Drop for Executor<P> {
    fn drop(&mut self) {
        use std::sync::atomic::Ordering;

        // tell all threads to shut down
        self.inner.running.store(false, Ordering::Release);
        self.inner.signal.notify_all();
    }
}

impl ExecutorStruct {
    fn push(&self, task: TaskRef, priority: u8) {
        let mut queues = self.queues.lock().unwrap();

        queues[priority as usize].push_front(task);
        self.signal.notify_one();
    }

    /// Remove a queued task by identity, regardless of which queue it
    /// currently sits in. Returns the task if it was still queued.
    fn remove(&self, task_id: u64) -> Option<TaskRef> {
        let mut queues = self.queues.lock().unwrap();

        for queue in queues.iter_mut() {
            if let Some(index) = queue.iter().position(|t| t.task_id() == task_id) {
                return queue.remove(index);
            }
        }

        None
    }

    fn pop(&self) -> Option<TaskRef> {
        use std::sync::atomic::Ordering;

        let mut queues = self.queues.lock().unwrap();

        while self.running.load(Ordering::SeqCst) {
            // serve higher priorities first
            let task = queues.iter_mut().rev().find_map(VecDeque::pop_back);

            match task {
                Some(task) => return Some(task),
                None => queues = self.signal.wait(queues).unwrap(),
            }
        }

        None
    }

    fn process(&self) {
        while let Some(task) = self.pop() {
            task.execute()
        }
    }
}

impl<P, R> Handle<P, R> {
    /// Check if the associated task has been completed.
    pub fn is_finished(&self) -> bool {
        self.core.is_finished()
    }

    /// Cancel the associated task.
    ///
    /// Cancels the associated task. Returns `Ok(())` if the task has been
    /// canceled successfully, `Err(self)` if the task could not be canceled
    /// or has already been completed successfully.
    pub fn cancel(self) -> Result<(), Self> {
        if !self.core.cancel() {
            return Err(self);
        }

        // drop the queue entry so the workers never see the task
        if let Some(exec) = self.exec.upgrade() {
            exec.remove(self.core.id());
        }

        Ok(())
    }

    /// Transform into a handle that cancels the task when dropped.
    pub fn cancel_on_drop(self) -> DropHandle<P, R> {
        DropHandle { inner: Some(self) }
    }
}

impl<P: Priority, R> Handle<P, R> {
    /// Update the priority of this task.
    ///
    /// Re-queues the task under the new priority if it has not started
    /// executing yet; a running or completed task is left untouched.
    pub fn set_priority(&self, priority: P) {
        let priority = priority.as_value();

        let exec = match self.exec.upgrade() {
            Some(exec) => exec,
            None => {
                self.core.swap_priority(priority);
                return;
            }
        };

        let mut queues = exec.queues.lock().unwrap();

        // note: priority may only be updated while holding the queue lock
        let old_priority = self.core.swap_priority(priority);

        // try to move the task; this may fail in case the task is
        // executing or has been completed
        let id = self.core.id();
        if let Some(index) = queues[old_priority as usize]
            .iter()
            .position(|t| t.task_id() == id)
        {
            if let Some(task) = queues[old_priority as usize].remove(index) {
                queues[priority as usize].push_front(task);
                exec.signal.notify_one();
            }
        }
    }

    /// Returns the current priority of this task.
    pub fn priority(&self) -> P {
        P::from_value(self.core.priority()).unwrap()
    }
}

impl<P, R: Send> Handle<P, R> {
    /// Wait for the task to complete and return its result.
    ///
    /// This function will return immediately if the associated task has
    /// already been completed. Non-blocking operations are supported by
    /// checking [`is_finished()`][Self::is_finished()] and calling
    /// [`join()`][Self::join()] only if that returns `true`.
    ///
    /// # Panics
    ///
    /// This function will panic if the associated task function panicked
    /// during its execution or if the task has been canceled.
    pub fn join(self) -> R {
        self.core.join()
    }

    /// Wait for the task to complete with a timeout and return its result
    /// if successful.
    ///
    /// Returns `Ok(result)` if the task completed within the timeout,
    /// `Err(self)` if this operation timed out.
    ///
    /// # Panics
    ///
    /// This function will panic if the associated task function panicked
    /// during its execution.
    pub fn join_timeout(self, duration: Duration) -> Result<R, Self> {
        match self.core.join_timeout(duration) {
            Ok(result) => Ok(result),
            Err(()) => Err(self),
        }
    }
}

impl<P, R> DropHandle<P, R> {
    fn handle(&self) -> &Handle<P, R> {
        self.inner.as_ref().expect("handle already consumed")
    }

    /// Check if the associated task has been completed.
    pub fn is_finished(&self) -> bool {
        self.handle().is_finished()
    }

    /// Cancel the associated task.
    ///
    /// Cancels the associated task. Returns `Ok(())` if the task has been
    /// canceled successfully, `Err(self)` if the task could not be canceled
    /// or has already been completed successfully.
    pub fn cancel(mut self) -> Result<(), Self> {
        match self.inner.take().expect("handle already consumed").cancel() {
            Ok(()) => Ok(()),
            Err(handle) => {
                self.inner = Some(handle);
                Err(self)
            }
        }
    }
}

impl<P: Priority, R> DropHandle<P, R> {
    /// Update the priority of this task.
    pub fn set_priority(&self, priority: P) {
        self.handle().set_priority(priority)
    }

    /// Returns the current priority of this task.
    pub fn priority(&self) -> P {
        self.handle().priority()
    }
}

impl<P, R: Send> DropHandle<P, R> {
    /// Wait for the task to complete and return its result.
    ///
    /// # Panics
    ///
    /// This function will panic if the associated task function panicked
    /// during its execution or if the task has been canceled.
    pub fn join(mut self) -> R {
        self.inner.take().expect("handle already consumed").join()
    }

    /// Wait for the task to complete with a timeout and return its result
    /// if successful.
    ///
    /// Returns `Ok(result)` if the task completed within the timeout,
    /// `Err(self)` if this operation timed out.
    pub fn join_timeout(mut self, duration: Duration) -> Result<R, Self> {
        match self.inner.take().expect("handle already consumed").join_timeout(duration) {
            Ok(result) => Ok(result),
            Err(handle) => {
                self.inner = Some(handle);
                Err(self)
            }
        }
    }
}

impl<P, R> Drop for DropHandle<P, R> {
    fn drop(&mut self) {
        if let Some(handle) = self.inner.take() {
            let _ = handle.cancel();
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::utils::sync::Completion;

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    enum TaskPriority {
        Low,
        Medium,
        High,
    }

    impl Priority for TaskPriority {
        fn count() -> u8 {
            3
        }

        fn from_value(value: u8) -> Option<Self> {
            match value {
                0 => Some(Self::Low),
                1 => Some(Self::Medium),
                2 => Some(Self::High),
                _ => None,
            }
        }

        fn as_value(&self) -> u8 {
            match self {
                Self::Low => 0,
                Self::Medium => 1,
                Self::High => 2,
            }
        }
    }

    type Executor = super::Executor<TaskPriority>;

    #[test]
    fn basic() {
        use std::thread;
        use std::time::Duration;

        let mut exec = Executor::new(2);

        let val_a = 123;
        let a = exec.submit(TaskPriority::Low, move || {
            thread::sleep(Duration::from_millis(100));
            val_a
        });

        let val_b = 456;
        let b = exec.submit(TaskPriority::Medium, move || {
            thread::sleep(Duration::from_millis(50));
            val_b
        });

        let val_c = 789;
        let c = exec.submit(TaskPriority::High, move || {
            thread::sleep(Duration::from_millis(150));
            val_c
        });

        assert_eq!(a.join(), val_a);
        assert_eq!(b.join(), val_b);
        assert_eq!(c.join(), val_c);

        exec.shutdown();
    }

    #[test]
    fn priority() {
        let mut exec = Executor::new(1);

        let completion = Arc::new(Completion::new());
        let order = Arc::new(Mutex::new(Vec::new()));

        // Create a first task to block the worker thread until we have
        // finished submitting and modifying our tasks below.
        let compl = completion.clone();
        let a = exec.submit(TaskPriority::High, move || {
            compl.wait();
        });

        // Create a second task with a medium priority.
        let ord = order.clone();
        let b = exec.submit(TaskPriority::Medium, move || {
            ord.lock().unwrap().push(2);
        });

        // Create a third task with a low initial priority.
        let ord = order.clone();
        let c = exec.submit(TaskPriority::Low, move || {
            ord.lock().unwrap().push(3);
        });

        // Update the priority of the third task to "high". Since the worker
        // thread is blocked, the second task has not been started yet.
        // Therefore, the third task should be executed before the second
        // task.
        c.set_priority(TaskPriority::High);
        assert_eq!(c.priority(), TaskPriority::High);

        // Unblock the worker thread so that the remaining two tasks can run.
        completion.set_completed();

        // Wait for the threads to finish execution.
        a.join();
        b.join();
        c.join();

        // Verify the execution order.
        let order = order.lock().unwrap();
        assert_eq!(*order, [3, 2]);

        exec.shutdown();
    }

    #[test]
    fn cancel() {
        let mut exec = Executor::new(1);

        let completion = Arc::new(Completion::new());

        // block the worker thread
        let compl = completion.clone();
        let a = exec.submit(TaskPriority::High, move || {
            compl.wait();
        });

        let b = exec.submit(TaskPriority::Low, move || 42);

        // still queued: cancellation succeeds
        assert!(b.cancel().is_ok());

        completion.set_completed();
        a.join();

        exec.shutdown();
    }

    #[test]
    fn cancel_on_drop() {
        let mut exec = Executor::new(1);

        let completion = Arc::new(Completion::new());
        let ran = Arc::new(AtomicUsize::new(0));

        // block the worker thread
        let compl = completion.clone();
        let a = exec.submit(TaskPriority::High, move || {
            compl.wait();
        });

        let counter = ran.clone();
        let b = exec
            .submit(TaskPriority::Low, move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .cancel_on_drop();

        // dropping the handle cancels the still-queued task
        drop(b);

        completion.set_completed();
        a.join();
        exec.shutdown();

        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn monitor() {
        struct Counting {
            executed: Arc<AtomicUsize>,
            completed: Arc<AtomicUsize>,
            canceled: Arc<AtomicUsize>,
        }

        impl Monitor for Counting {
            fn on_execute(&self) {
                self.executed.fetch_add(1, Ordering::SeqCst);
            }

            fn on_complete(&self) {
                self.completed.fetch_add(1, Ordering::SeqCst);
            }

            fn on_canceled(&self) {
                self.canceled.fetch_add(1, Ordering::SeqCst);
            }
        }

        let executed = Arc::new(AtomicUsize::new(0));
        let completed = Arc::new(AtomicUsize::new(0));
        let canceled = Arc::new(AtomicUsize::new(0));

        let monitor = Counting {
            executed: executed.clone(),
            completed: completed.clone(),
            canceled: canceled.clone(),
        };

        let mut exec = Executor::new(1);

        let a = exec.submit_with(monitor, TaskPriority::Medium, || 17);
        assert_eq!(a.join(), 17);

        exec.shutdown();

        assert_eq!(executed.load(Ordering::SeqCst), 1);
        assert_eq!(completed.load(Ordering::SeqCst), 1);
        assert_eq!(canceled.load(Ordering::SeqCst), 0);
    }
}
