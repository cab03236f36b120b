//! Combinators over task handles: `gather` and `wait`
//!
//! All combinators suspend the caller by parking its waker in the waiter
//! list of every unfinished task, and re-examine the set each time one of
//! them terminates. Results always come back in input order, regardless of
//! the order in which tasks completed.

use crate::error::LoopResult;
use crate::task::{TaskHandle, TaskState};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll, Waker};

/// Park `waker` in every unfinished handle of `handles`.
fn register_waiters<T>(handles: &[TaskHandle<T>], waker: &Waker) {
    for handle in handles {
        if !handle.state().is_terminal() && !handle.task_ref().add_waiter(waker) {
            // Terminated between the check and the registration; re-poll.
            waker.wake_by_ref();
        }
    }
}

/// Run the given tasks concurrently and collect their values in input order.
///
/// Fails fast on the first observed failure or cancellation; the remaining
/// tasks keep running and can still be observed through their own handles.
/// An empty input resolves immediately to an empty vector.
pub fn gather<T>(handles: impl IntoIterator<Item = TaskHandle<T>>) -> Gather<T> {
    Gather {
        handles: handles.into_iter().collect(),
    }
}

/// Future returned by [`gather`]
pub struct Gather<T> {
    handles: Vec<TaskHandle<T>>,
}

impl<T: Clone> Future for Gather<T> {
    type Output = LoopResult<Vec<T>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        let mut all_done = true;
        for handle in &this.handles {
            if let Some(err) = handle.terminal_error() {
                return Poll::Ready(Err(err));
            }
            if !handle.state().is_terminal() {
                all_done = false;
            }
        }

        if all_done {
            let mut values = Vec::with_capacity(this.handles.len());
            for handle in &this.handles {
                match handle.result() {
                    Ok(value) => values.push(value),
                    Err(err) => return Poll::Ready(Err(err)),
                }
            }
            return Poll::Ready(Ok(values));
        }

        register_waiters(&this.handles, cx.waker());
        Poll::Pending
    }
}

/// Run the given tasks concurrently and collect every outcome in input
/// order, failures included.
///
/// The collect-all counterpart of [`gather`]: waits for every task to reach
/// a terminal state and reports each one's result, so a single failure does
/// not mask the others.
pub fn gather_results<T>(handles: impl IntoIterator<Item = TaskHandle<T>>) -> GatherResults<T> {
    GatherResults {
        handles: handles.into_iter().collect(),
    }
}

/// Future returned by [`gather_results`]
pub struct GatherResults<T> {
    handles: Vec<TaskHandle<T>>,
}

impl<T: Clone> Future for GatherResults<T> {
    type Output = Vec<LoopResult<T>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        if this.handles.iter().all(|handle| handle.is_finished()) {
            return Poll::Ready(this.handles.iter().map(TaskHandle::result).collect());
        }

        register_waiters(&this.handles, cx.waker());
        Poll::Pending
    }
}

/// When a [`wait`] call should return
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum WaitMode {
    /// Return once every task reached a terminal state
    AllCompleted,
    /// Return as soon as at least one task reached a terminal state
    FirstCompleted,
    /// Return as soon as any task failed, or once all are terminal
    FirstFailure,
}

/// Partition produced by [`wait`]: the input handles split into terminal
/// and unfinished sets. The sets are disjoint and their union is the input.
#[derive(Debug)]
pub struct WaitOutcome<T> {
    /// Handles whose tasks reached a terminal state
    pub completed: Vec<TaskHandle<T>>,
    /// Handles whose tasks are still pending, running, or suspended
    pub pending: Vec<TaskHandle<T>>,
}

/// Suspend the caller until the given tasks satisfy `mode`, then partition
/// the handles into completed and pending sets.
///
/// With [`WaitMode::AllCompleted`] the pending set is always empty.
/// Cancelled tasks count as completed for partitioning, but only failed
/// tasks trigger the [`WaitMode::FirstFailure`] early return.
pub fn wait<T>(handles: impl IntoIterator<Item = TaskHandle<T>>, mode: WaitMode) -> Wait<T> {
    Wait {
        handles: Some(handles.into_iter().collect()),
        mode,
    }
}

/// Future returned by [`wait`]
pub struct Wait<T> {
    handles: Option<Vec<TaskHandle<T>>>,
    mode: WaitMode,
}

impl<T> Future for Wait<T> {
    type Output = WaitOutcome<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let handles = this.handles.as_ref().expect("Wait polled after completion");

        let total = handles.len();
        let done = handles.iter().filter(|h| h.is_finished()).count();
        let failed = handles.iter().any(|h| h.state() == TaskState::Failed);

        let ready = match this.mode {
            WaitMode::AllCompleted => done == total,
            WaitMode::FirstCompleted => done >= 1 || total == 0,
            WaitMode::FirstFailure => failed || done == total,
        };

        if ready {
            let handles = this.handles.take().expect("Wait polled after completion");
            let (completed, pending) = handles
                .into_iter()
                .partition(|handle| handle.is_finished());
            return Poll::Ready(WaitOutcome { completed, pending });
        }

        register_waiters(handles, cx.waker());
        Poll::Pending
    }
}
