//! The event loop: ready queue, timer queue, virtual clock, drive cycle
//!
//! A single thread owns all scheduling. The drive cycle pops the next ready
//! task and polls it; when the ready queue is empty it advances the virtual
//! clock to the nearest timer deadline and wakes everything that came due.
//! Exactly one task executes at a time; concurrency exists only in the
//! interleaving of suspension points.

use crate::clock::VirtualClock;
use crate::error::{Failure, LoopError, LoopResult};
use crate::task::{ResultCell, Task, TaskHandle, TaskId, TaskState};
use crate::timer::TimerQueue;
use crossbeam_deque::{Injector, Steal};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::cell::{Cell, RefCell};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::Duration;

/// Loop state shared with task headers and handles.
///
/// This is the thread-safe side of the loop: wakers push ready tasks into
/// the injector from wherever a handle travelled, while the futures
/// themselves stay in loop-local storage and never leave the driving thread.
pub(crate) struct Shared {
    /// FIFO ready queue; tasks are pushed by wakers and popped by the loop
    pub(crate) injector: Injector<Arc<Task>>,

    /// Set once by close(); scheduling is refused afterwards
    closed: AtomicBool,

    /// Total tasks spawned on this loop
    tasks_spawned: AtomicU64,

    /// Total tasks that reached a terminal state
    tasks_completed: AtomicU64,
}

impl Shared {
    pub(crate) fn new() -> Self {
        Self {
            injector: Injector::new(),
            closed: AtomicBool::new(false),
            tasks_spawned: AtomicU64::new(0),
            tasks_completed: AtomicU64::new(0),
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Mark the loop closed; returns whether it was already closed
    pub(crate) fn close(&self) -> bool {
        self.closed.swap(true, Ordering::AcqRel)
    }
}

type BoxedTaskFuture = Pin<Box<dyn Future<Output = Result<(), Failure>>>>;

/// Loop-local state; lives on the driving thread and is never sent across
pub(crate) struct LoopInner {
    pub(crate) shared: Arc<Shared>,
    pub(crate) clock: VirtualClock,
    pub(crate) timers: RefCell<TimerQueue>,

    /// Boxed futures of live tasks, keyed by task id
    futures: RefCell<FxHashMap<TaskId, BoxedTaskFuture>>,

    /// Headers of live (non-terminal) tasks
    tasks: RefCell<FxHashMap<TaskId, Arc<Task>>>,

    /// Re-entrancy guard for the drive cycle
    running: Cell<bool>,
}

thread_local! {
    static CURRENT: RefCell<Option<Rc<LoopInner>>> = const { RefCell::new(None) };
}

/// Run `f` against the loop currently installed on this thread.
///
/// Panics when called outside a drive cycle; suspension primitives are only
/// meaningful inside a task polled by a loop.
pub(crate) fn with_current<R>(f: impl FnOnce(&Rc<LoopInner>) -> R) -> R {
    CURRENT.with(|current| {
        let current = current.borrow();
        let inner = current
            .as_ref()
            .expect("no event loop is current on this thread");
        f(inner)
    })
}

/// Counters describing a loop's lifetime activity
#[derive(Debug, Clone, Default)]
pub struct LoopStats {
    /// Total tasks spawned
    pub tasks_spawned: u64,

    /// Total tasks that reached a terminal state
    pub tasks_completed: u64,

    /// Currently live (non-terminal) tasks
    pub active_tasks: usize,
}

/// Single-threaded cooperative event loop
///
/// Owns the ready queue, the timer queue, and the virtual clock. Created
/// loops install themselves as the thread's current loop (first one wins)
/// so [`spawn`] and [`sleep`](crate::sleep) resolve without a handle; the
/// drive cycle re-installs the driving loop for its duration regardless.
///
/// Lifecycle: `new` → `run_until_complete` (repeatable) → `close`. After
/// `close()` every scheduling attempt fails with [`LoopError::Closed`].
pub struct EventLoop {
    inner: Rc<LoopInner>,
}

impl EventLoop {
    /// Create a new event loop and install it as the thread's current loop
    /// if none is installed yet.
    pub fn new() -> Self {
        let inner = Rc::new(LoopInner {
            shared: Arc::new(Shared::new()),
            clock: VirtualClock::new(),
            timers: RefCell::new(TimerQueue::new()),
            futures: RefCell::new(FxHashMap::default()),
            tasks: RefCell::new(FxHashMap::default()),
            running: Cell::new(false),
        });
        CURRENT.with(|current| {
            let mut current = current.borrow_mut();
            if current.is_none() {
                *current = Some(Rc::clone(&inner));
            }
        });
        Self { inner }
    }

    /// Spawn a task for `future`, scheduling it ready.
    ///
    /// The body reports failure by returning `Err`; the failure is captured
    /// in the task and re-raised on observation, never crashing the loop.
    pub fn spawn<F, T>(&self, future: F) -> LoopResult<TaskHandle<T>>
    where
        F: Future<Output = Result<T, Failure>> + 'static,
        T: 'static,
    {
        Self::spawn_inner(&self.inner, future)
    }

    fn spawn_inner<F, T>(inner: &Rc<LoopInner>, future: F) -> LoopResult<TaskHandle<T>>
    where
        F: Future<Output = Result<T, Failure>> + 'static,
        T: 'static,
    {
        if inner.shared.is_closed() {
            return Err(LoopError::Closed);
        }

        let task = Arc::new(Task::new(Arc::clone(&inner.shared)));
        let cell: ResultCell<T> = Arc::new(Mutex::new(None));
        let handle = TaskHandle::new(Arc::clone(&task), Arc::clone(&cell));

        // Type-erase the future: the typed outcome lands in the shared cell,
        // the loop only sees success or the cloned failure.
        let wrapped = {
            let cell = Arc::clone(&cell);
            async move {
                let outcome = future.await;
                let status = match &outcome {
                    Ok(_) => Ok(()),
                    Err(failure) => Err(failure.clone()),
                };
                *cell.lock() = Some(outcome);
                status
            }
        };

        inner.futures.borrow_mut().insert(task.id(), Box::pin(wrapped));
        inner.tasks.borrow_mut().insert(task.id(), Arc::clone(&task));
        inner.shared.tasks_spawned.fetch_add(1, Ordering::Relaxed);
        Task::schedule(&task);
        Ok(handle)
    }

    /// Drive the loop until the given task reaches a terminal state, then
    /// return its value or propagate its failure or cancellation.
    ///
    /// Callable repeatedly on the same loop; tasks left unfinished by one
    /// call keep their place and continue under the next. Re-entrant calls
    /// fail with [`LoopError::AlreadyRunning`]; a loop with no runnable
    /// task and no pending timer fails with [`LoopError::Stalled`] rather
    /// than hanging.
    pub fn run_until_complete<T: Clone>(&self, handle: &TaskHandle<T>) -> LoopResult<T> {
        if self.inner.shared.is_closed() {
            return Err(LoopError::Closed);
        }
        if self.inner.running.get() {
            return Err(LoopError::AlreadyRunning);
        }

        self.inner.running.set(true);
        let previous = CURRENT.with(|current| {
            current.borrow_mut().replace(Rc::clone(&self.inner))
        });
        let outcome = self.drive(handle.task_ref());
        CURRENT.with(|current| *current.borrow_mut() = previous);
        self.inner.running.set(false);

        outcome?;
        handle.result()
    }

    /// The drive cycle: pop ready tasks and resume them; once the ready
    /// queue is empty, advance virtual time to the nearest deadline.
    fn drive(&self, main: &Arc<Task>) -> LoopResult<()> {
        loop {
            if main.is_finished() {
                return Ok(());
            }
            match self.inner.shared.injector.steal() {
                Steal::Success(task) => self.poll_task(task),
                Steal::Retry => continue,
                Steal::Empty => {
                    if !self.fire_due_timers() {
                        return Err(LoopError::Stalled);
                    }
                }
            }
        }
    }

    /// Resume one task: honor a pending cancellation request, otherwise
    /// poll its future and route the outcome.
    fn poll_task(&self, task: Arc<Task>) {
        task.clear_scheduled();
        if task.state().is_terminal() {
            // Stale queue entry for an already-finished task.
            return;
        }
        if task.is_cancel_requested() {
            self.finish_cancelled(&task);
            return;
        }

        // Take the future out of the registry while polling, so the body
        // can spawn and cancel freely without re-entrant borrows.
        let mut future = match self.inner.futures.borrow_mut().remove(&task.id()) {
            Some(future) => future,
            None => return,
        };

        task.set_state(TaskState::Running);
        let waker = Waker::from(Arc::clone(&task));
        let mut cx = Context::from_waker(&waker);

        match future.as_mut().poll(&mut cx) {
            Poll::Ready(status) => {
                self.inner.tasks.borrow_mut().remove(&task.id());
                self.inner.shared.tasks_completed.fetch_add(1, Ordering::Relaxed);
                match status {
                    Ok(()) => task.finish(TaskState::Completed),
                    Err(failure) => {
                        task.set_failure(failure);
                        task.finish(TaskState::Failed);
                    }
                }
            }
            Poll::Pending => {
                if task.is_cancel_requested() {
                    // The request arrived during the poll; this suspension
                    // point is where it lands.
                    drop(future);
                    self.finish_cancelled(&task);
                } else {
                    task.set_state(TaskState::Suspended);
                    self.inner.futures.borrow_mut().insert(task.id(), future);
                }
            }
        }
    }

    /// Drop the task's future and mark it cancelled
    fn finish_cancelled(&self, task: &Arc<Task>) {
        let dropped = self.inner.futures.borrow_mut().remove(&task.id());
        drop(dropped);
        self.inner.tasks.borrow_mut().remove(&task.id());
        self.inner.shared.tasks_completed.fetch_add(1, Ordering::Relaxed);
        task.finish(TaskState::Cancelled);
    }

    /// Advance the clock to the nearest deadline and wake expired timers.
    /// Returns false when the timer queue is empty.
    fn fire_due_timers(&self) -> bool {
        let next = match self.inner.timers.borrow().next_deadline() {
            Some(deadline) => deadline,
            None => return false,
        };
        self.inner.clock.advance_to(next);
        let due = self.inner.timers.borrow_mut().pop_due(self.inner.clock.now());
        for waker in due {
            waker.wake();
        }
        true
    }

    /// Close the loop: cancel every live task, drop their futures, clear
    /// both queues, and uninstall from the thread-local slot. Idempotent;
    /// also runs on drop. Scheduling afterwards fails with
    /// [`LoopError::Closed`].
    pub fn close(&self) {
        if self.inner.shared.close() {
            return;
        }

        let live: Vec<Arc<Task>> = self.inner.tasks.borrow().values().cloned().collect();
        for task in live {
            if task.state().is_terminal() {
                continue;
            }
            let dropped = self.inner.futures.borrow_mut().remove(&task.id());
            drop(dropped);
            self.inner.shared.tasks_completed.fetch_add(1, Ordering::Relaxed);
            task.finish(TaskState::Cancelled);
        }

        self.inner.tasks.borrow_mut().clear();
        self.inner.futures.borrow_mut().clear();
        self.inner.timers.borrow_mut().clear();
        loop {
            match self.inner.shared.injector.steal() {
                Steal::Success(_) | Steal::Retry => continue,
                Steal::Empty => break,
            }
        }

        CURRENT.with(|current| {
            let mut current = current.borrow_mut();
            if current
                .as_ref()
                .map_or(false, |inner| Rc::ptr_eq(inner, &self.inner))
            {
                *current = None;
            }
        });
    }

    /// Whether the loop has been closed
    pub fn is_closed(&self) -> bool {
        self.inner.shared.is_closed()
    }

    /// Whether a drive cycle is currently active
    pub fn is_running(&self) -> bool {
        self.inner.running.get()
    }

    /// Current virtual time, starting at zero when the loop was created
    pub fn now(&self) -> Duration {
        self.inner.clock.now()
    }

    /// Number of live (non-terminal) tasks
    pub fn task_count(&self) -> usize {
        self.inner.tasks.borrow().len()
    }

    /// Get loop statistics
    pub fn stats(&self) -> LoopStats {
        LoopStats {
            tasks_spawned: self.inner.shared.tasks_spawned.load(Ordering::Relaxed),
            tasks_completed: self.inner.shared.tasks_completed.load(Ordering::Relaxed),
            active_tasks: self.inner.tasks.borrow().len(),
        }
    }
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        self.close();
    }
}

/// Spawn a task onto the thread's current loop.
///
/// Usable from inside task bodies; fails with [`LoopError::NoCurrentLoop`]
/// when no loop is installed on the calling thread.
pub fn spawn<F, T>(future: F) -> LoopResult<TaskHandle<T>>
where
    F: Future<Output = Result<T, Failure>> + 'static,
    T: 'static,
{
    CURRENT.with(|current| match &*current.borrow() {
        Some(inner) => EventLoop::spawn_inner(inner, future),
        None => Err(LoopError::NoCurrentLoop),
    })
}

/// Create a loop, run `future` to completion on it, and close the loop.
///
/// Fails with [`LoopError::AlreadyRunning`] when called from inside a task
/// that is itself being driven by a loop on this thread.
pub fn run<F, T>(future: F) -> LoopResult<T>
where
    F: Future<Output = Result<T, Failure>> + 'static,
    T: Clone + 'static,
{
    let nested = CURRENT.with(|current| {
        current
            .borrow()
            .as_ref()
            .map_or(false, |inner| inner.running.get())
    });
    if nested {
        return Err(LoopError::AlreadyRunning);
    }

    let event_loop = EventLoop::new();
    let handle = event_loop.spawn(future)?;
    let result = event_loop.run_until_complete(&handle);
    event_loop.close();
    result
}
