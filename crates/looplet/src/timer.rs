//! Timer queue and sleep primitives
//!
//! Sleeping tasks park a waker in a min-heap keyed by virtual deadline. The
//! loop advances the clock to the nearest deadline once the ready queue is
//! empty and wakes everything that came due; entries at the same deadline
//! fire in registration order.

use crate::event_loop;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll, Waker};
use std::time::Duration;

/// Entry in the timer heap
struct SleepEntry {
    /// Virtual deadline at which to wake
    deadline: Duration,
    /// Registration sequence number; breaks deadline ties FIFO
    seq: u64,
    /// Waker to invoke when the deadline is reached
    waker: Waker,
}

// Reverse ordering for a min-heap: earliest deadline first, then lowest
// sequence number.
impl Ord for SleepEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for SleepEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for SleepEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for SleepEntry {}

/// Min-heap of sleeping tasks, owned by the event loop
pub(crate) struct TimerQueue {
    entries: BinaryHeap<SleepEntry>,
    next_seq: u64,
}

impl TimerQueue {
    pub(crate) fn new() -> Self {
        Self {
            entries: BinaryHeap::new(),
            next_seq: 0,
        }
    }

    /// Register a waker to fire at `deadline`
    pub(crate) fn register(&mut self, deadline: Duration, waker: Waker) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.push(SleepEntry {
            deadline,
            seq,
            waker,
        });
    }

    /// Earliest registered deadline, if any
    pub(crate) fn next_deadline(&self) -> Option<Duration> {
        self.entries.peek().map(|entry| entry.deadline)
    }

    /// Pop every entry due at or before `now`, in deadline-then-FIFO order
    pub(crate) fn pop_due(&mut self, now: Duration) -> Vec<Waker> {
        let mut due = Vec::new();
        while let Some(entry) = self.entries.peek() {
            if entry.deadline > now {
                break;
            }
            if let Some(entry) = self.entries.pop() {
                due.push(entry.waker);
            }
        }
        due
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Suspend the calling task for `duration` of virtual time.
///
/// Always yields control at least once, even for a zero duration; the timer
/// entry is registered at `now + duration` on the first poll. Resumption is
/// guaranteed no earlier than the deadline, with no upper bound.
///
/// The returned future resolves the current loop at poll time and must be
/// awaited inside a task driven by an [`EventLoop`](crate::EventLoop).
pub fn sleep(duration: Duration) -> Sleep {
    Sleep {
        duration,
        deadline: None,
    }
}

/// Future returned by [`sleep`]
#[derive(Debug)]
pub struct Sleep {
    duration: Duration,
    deadline: Option<Duration>,
}

impl Future for Sleep {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        event_loop::with_current(|inner| {
            let now = inner.clock.now();
            match this.deadline {
                None => {
                    let deadline = now + this.duration;
                    this.deadline = Some(deadline);
                    inner.timers.borrow_mut().register(deadline, cx.waker().clone());
                    Poll::Pending
                }
                Some(deadline) if now >= deadline => Poll::Ready(()),
                Some(deadline) => {
                    // Spurious poll before the deadline; re-register. A
                    // duplicate entry is harmless: the extra wake is
                    // filtered by the ready-queue dedup flag.
                    inner.timers.borrow_mut().register(deadline, cx.waker().clone());
                    Poll::Pending
                }
            }
        })
    }
}

/// Yield control to the loop once, resuming on the next drive cycle.
///
/// A bare suspension point: useful for breaking up long computations and as
/// a place for cooperative cancellation to land.
pub fn yield_now() -> YieldNow {
    YieldNow { yielded: false }
}

/// Future returned by [`yield_now`]
#[derive(Debug)]
pub struct YieldNow {
    yielded: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if this.yielded {
            Poll::Ready(())
        } else {
            this.yielded = true;
            cx.waker().wake_by_ref();
            Poll::Pending
        }
    }
}
