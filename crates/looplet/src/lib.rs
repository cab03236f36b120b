//! looplet — a single-threaded cooperative task scheduler
//!
//! Exactly one task executes at a time; concurrency exists only in the
//! interleaving of suspension points. Tasks suspend by awaiting [`sleep`],
//! [`yield_now`], another task's [`TaskHandle`], or a combinator; everything
//! between suspension points runs atomically with respect to other tasks, so
//! no locking is needed in task bodies.
//!
//! Time is virtual: when no task is ready, the loop advances its clock to
//! the nearest timer deadline instead of blocking, so sleep-heavy workloads
//! finish deterministically and without wall-clock waiting. Tasks that
//! become ready at the same virtual time resume in FIFO order.
//!
//! ```no_run
//! use looplet::{gather, sleep, EventLoop};
//! use std::time::Duration;
//!
//! let event_loop = EventLoop::new();
//! let double = |n: u64| {
//!     looplet::spawn(async move {
//!         sleep(Duration::from_secs(n)).await;
//!         Ok(n * 2)
//!     })
//! };
//!
//! let first = double(2).unwrap();
//! let second = double(1).unwrap();
//! let main = event_loop
//!     .spawn(async move { Ok(gather([first, second]).await?) })
//!     .unwrap();
//!
//! assert_eq!(event_loop.run_until_complete(&main).unwrap(), vec![4, 2]);
//! event_loop.close();
//! ```
//!
//! Failures inside a task body (`Err` returns) are captured in the task and
//! re-raised only when observed: through [`TaskHandle::result`], by
//! awaiting the handle, or by a fail-fast [`gather`]. Cancellation is
//! cooperative: it lands at the task's next suspension point and never
//! interrupts code between suspension points.

mod clock;
mod combinator;
mod error;
mod event_loop;
mod task;
mod timer;

pub use combinator::{
    gather, gather_results, wait, Gather, GatherResults, Wait, WaitMode, WaitOutcome,
};
pub use error::{Failure, LoopError, LoopResult, TaskResult};
pub use event_loop::{run, spawn, EventLoop, LoopStats};
pub use task::{Task, TaskHandle, TaskId, TaskState};
pub use timer::{sleep, yield_now, Sleep, YieldNow};
