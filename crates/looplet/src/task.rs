//! Task headers, states, and typed handles
//!
//! A [`Task`] is the shared header of one scheduled computation: id, state
//! machine, cancellation and ready-queue flags, stored failure, and the
//! waiter/callback lists signalled on completion. The header doubles as the
//! task's waker: waking pushes it onto the loop's ready queue exactly once.
//! The typed result travels separately, in a slot shared between the spawned
//! future and the [`TaskHandle`] returned to the caller.

use crate::error::{Failure, LoopError, LoopResult};
use crate::event_loop::Shared;
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Wake, Waker};

/// Unique identifier for a task
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

impl TaskId {
    /// Generate a new unique TaskId
    pub fn new() -> Self {
        TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the numeric ID value
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

/// State of a task
///
/// `Pending → Running → (Suspended ⇄ Running)* → Completed | Failed | Cancelled`.
/// Terminal states are absorbing.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TaskState {
    /// Scheduled but not yet polled
    Pending,
    /// Currently executing on the loop
    Running,
    /// Parked at a suspension point, waiting to be woken
    Suspended,
    /// Completed with a result
    Completed,
    /// Failed with a stored [`Failure`]
    Failed,
    /// Cancelled before reaching completion
    Cancelled,
}

impl TaskState {
    /// Whether this state is terminal
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Cancelled
        )
    }
}

type DoneCallback = Box<dyn FnOnce(&Task) + Send>;

/// Shared header of a scheduled task
pub struct Task {
    /// Unique identifier
    id: TaskId,

    /// Current state
    state: Mutex<TaskState>,

    /// Cooperative cancellation request; honored at the next suspension point
    cancel_requested: AtomicBool,

    /// Whether the task currently sits in the ready queue
    scheduled: AtomicBool,

    /// Failure stored when the task body returns `Err`
    failure: Mutex<Option<Failure>>,

    /// Wakers of computations waiting for this task to terminate
    waiters: Mutex<Vec<Waker>>,

    /// Callbacks to invoke on the loop thread when the task terminates
    callbacks: Mutex<Vec<DoneCallback>>,

    /// Ready queue and lifecycle flags shared with the owning loop
    shared: Arc<Shared>,
}

impl Task {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self {
            id: TaskId::new(),
            state: Mutex::new(TaskState::Pending),
            cancel_requested: AtomicBool::new(false),
            scheduled: AtomicBool::new(false),
            failure: Mutex::new(None),
            waiters: Mutex::new(Vec::new()),
            callbacks: Mutex::new(Vec::new()),
            shared,
        }
    }

    /// Get the task's unique ID
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Get the current state
    pub fn state(&self) -> TaskState {
        *self.state.lock()
    }

    /// Whether the task has reached a terminal state
    pub fn is_finished(&self) -> bool {
        self.state().is_terminal()
    }

    pub(crate) fn set_state(&self, state: TaskState) {
        *self.state.lock() = state;
    }

    /// Enqueue the task in the ready queue, unless it is already queued,
    /// already terminal, or the loop has been closed.
    pub(crate) fn schedule(task: &Arc<Task>) {
        if task.shared.is_closed() {
            return;
        }
        if task.state().is_terminal() {
            return;
        }
        if task.scheduled.swap(true, Ordering::AcqRel) {
            return;
        }
        task.shared.injector.push(Arc::clone(task));
    }

    /// Clear the queued flag; called by the loop right after popping, so
    /// wakes arriving during the poll re-enqueue the task.
    pub(crate) fn clear_scheduled(&self) {
        self.scheduled.store(false, Ordering::Release);
    }

    pub(crate) fn set_cancel_requested(&self) {
        self.cancel_requested.store(true, Ordering::Release);
    }

    /// Whether cancellation has been requested
    pub fn is_cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::Acquire)
    }

    pub(crate) fn set_failure(&self, failure: Failure) {
        *self.failure.lock() = Some(failure);
    }

    /// The stored failure, if the task failed
    pub fn failure(&self) -> Option<Failure> {
        self.failure.lock().clone()
    }

    /// Register a waker to be invoked when the task terminates.
    ///
    /// Returns false if the task is already terminal, in which case the
    /// waiters were drained long ago and the caller must re-check instead.
    pub(crate) fn add_waiter(&self, waker: &Waker) -> bool {
        // The state lock is held across the push so a concurrent finish()
        // cannot drain the list between the check and the insert.
        let state = self.state.lock();
        if state.is_terminal() {
            return false;
        }
        let mut waiters = self.waiters.lock();
        if !waiters.iter().any(|w| w.will_wake(waker)) {
            waiters.push(waker.clone());
        }
        true
    }

    /// Register a completion callback; runs immediately if already terminal.
    pub(crate) fn add_callback(&self, callback: DoneCallback) {
        {
            let state = self.state.lock();
            if !state.is_terminal() {
                self.callbacks.lock().push(callback);
                return;
            }
        }
        callback(self);
    }

    /// Transition into a terminal state, then wake all waiters and run all
    /// completion callbacks. Called exactly once, on the loop thread.
    pub(crate) fn finish(&self, state: TaskState) {
        debug_assert!(state.is_terminal());
        {
            let mut current = self.state.lock();
            debug_assert!(!current.is_terminal());
            *current = state;
        }
        let waiters = std::mem::take(&mut *self.waiters.lock());
        for waker in waiters {
            waker.wake();
        }
        let callbacks = std::mem::take(&mut *self.callbacks.lock());
        for callback in callbacks {
            callback(self);
        }
    }
}

impl Wake for Task {
    fn wake(self: Arc<Self>) {
        Task::schedule(&self);
    }

    fn wake_by_ref(self: &Arc<Self>) {
        Task::schedule(self);
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}

/// Typed slot the spawned future writes its outcome into
pub(crate) type ResultCell<T> = Arc<Mutex<Option<Result<T, Failure>>>>;

/// Handle for observing and controlling a spawned task
///
/// Clonable; every clone observes the same task. The stored value is cloned
/// out on observation, so [`result`](TaskHandle::result) can be called any
/// number of times and combinators compose with handles the caller keeps.
pub struct TaskHandle<T> {
    task: Arc<Task>,
    cell: ResultCell<T>,
}

impl<T> TaskHandle<T> {
    pub(crate) fn new(task: Arc<Task>, cell: ResultCell<T>) -> Self {
        Self { task, cell }
    }

    /// Get the task ID
    pub fn id(&self) -> TaskId {
        self.task.id()
    }

    /// Get the current task state
    pub fn state(&self) -> TaskState {
        self.task.state()
    }

    /// Whether the task has reached a terminal state
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub(crate) fn task_ref(&self) -> &Arc<Task> {
        &self.task
    }

    /// Request cooperative cancellation.
    ///
    /// A task that has not started never executes its body. A running or
    /// suspended task is cancelled at its next suspension point; if it
    /// completes before the request is observed, completion wins. Returns
    /// false once the task is already terminal.
    pub fn cancel(&self) -> bool {
        if self.task.state().is_terminal() {
            return false;
        }
        self.task.set_cancel_requested();
        Task::schedule(&self.task);
        true
    }

    /// Register a callback invoked on the loop thread when the task reaches
    /// a terminal state. Runs immediately if the task already terminated.
    pub fn on_done(&self, callback: impl FnOnce(&Task) + Send + 'static) {
        self.task.add_callback(Box::new(callback));
    }

    /// The error a terminal, unsuccessful task resolves to; None while the
    /// task is unfinished or completed successfully.
    pub fn terminal_error(&self) -> Option<LoopError> {
        match self.task.state() {
            TaskState::Cancelled => Some(LoopError::Cancelled),
            TaskState::Failed => {
                let failure = self
                    .task
                    .failure()
                    .unwrap_or_else(|| Failure::new("task failed"));
                Some(LoopError::Failed(failure))
            }
            _ => None,
        }
    }
}

impl<T: Clone> TaskHandle<T> {
    /// Get the completed value, or re-raise the stored failure.
    ///
    /// Fails with [`LoopError::NotReady`] until the task reaches a terminal
    /// state, [`LoopError::Cancelled`] for cancelled tasks, and
    /// [`LoopError::Failed`] for failed ones.
    pub fn result(&self) -> LoopResult<T> {
        if !self.task.state().is_terminal() {
            return Err(LoopError::NotReady);
        }
        if let Some(err) = self.terminal_error() {
            return Err(err);
        }
        match &*self.cell.lock() {
            Some(Ok(value)) => Ok(value.clone()),
            _ => Err(LoopError::NotReady),
        }
    }
}

impl<T> Clone for TaskHandle<T> {
    fn clone(&self) -> Self {
        Self {
            task: Arc::clone(&self.task),
            cell: Arc::clone(&self.cell),
        }
    }
}

impl<T> std::fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id())
            .field("state", &self.state())
            .finish()
    }
}

/// Awaiting a handle suspends the caller until the task terminates, then
/// yields its result with the same semantics as [`TaskHandle::result`].
impl<T: Clone> Future for TaskHandle<T> {
    type Output = LoopResult<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if this.task.state().is_terminal() {
            return Poll::Ready(this.result());
        }
        if !this.task.add_waiter(cx.waker()) {
            // Terminated between the check and the registration; re-poll.
            cx.waker().wake_by_ref();
        }
        Poll::Pending
    }
}
