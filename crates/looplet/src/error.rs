//! Error types for the event loop and its tasks

use thiserror::Error;

/// Failure raised inside a task body.
///
/// When a task's future resolves to `Err`, the loop captures the failure in
/// the task instead of crashing. It is re-raised every time the task's result
/// is observed: through [`result`](crate::TaskHandle::result), by awaiting
/// the handle, or by a fail-fast combinator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct Failure {
    message: String,
}

impl Failure {
    /// Create a failure with the given message
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The failure message
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<&str> for Failure {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for Failure {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

/// Errors surfaced by the event loop and task handles
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoopError {
    /// Scheduling or driving after the loop was closed
    #[error("event loop is closed")]
    Closed,

    /// No event loop is installed on the calling thread
    #[error("no event loop is current on this thread")]
    NoCurrentLoop,

    /// Re-entrant drive attempt while the loop is already running
    #[error("event loop is already running")]
    AlreadyRunning,

    /// No ready task and no pending timer while the driven task is unfinished
    #[error("event loop stalled: no ready tasks and no pending timers")]
    Stalled,

    /// Task result read before the task reached a terminal state
    #[error("task result is not ready")]
    NotReady,

    /// Task was cancelled
    #[error("task was cancelled")]
    Cancelled,

    /// Task failed; the original failure is preserved
    #[error("task failed: {0}")]
    Failed(#[from] Failure),
}

// Lets task bodies propagate handle and combinator errors with `?`. A
// re-raised task failure unwraps back to the original payload instead of
// nesting "task failed:" prefixes.
impl From<LoopError> for Failure {
    fn from(err: LoopError) -> Self {
        match err {
            LoopError::Failed(failure) => failure,
            other => Failure::new(other.to_string()),
        }
    }
}

/// Result of loop and handle operations
pub type LoopResult<T> = Result<T, LoopError>;

/// Result produced by a task body
pub type TaskResult<T> = Result<T, Failure>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_message() {
        let failure = Failure::new("boom");
        assert_eq!(failure.message(), "boom");
        assert_eq!(failure.to_string(), "boom");
    }

    #[test]
    fn test_failure_from_str() {
        let failure: Failure = "broken".into();
        assert_eq!(failure, Failure::new("broken"));
    }

    #[test]
    fn test_loop_error_display() {
        assert_eq!(LoopError::Closed.to_string(), "event loop is closed");
        assert_eq!(LoopError::NotReady.to_string(), "task result is not ready");
        assert_eq!(
            LoopError::Failed(Failure::new("boom")).to_string(),
            "task failed: boom"
        );
    }

    #[test]
    fn test_failure_into_loop_error() {
        let err: LoopError = Failure::new("boom").into();
        assert_eq!(err, LoopError::Failed(Failure::new("boom")));
    }

    #[test]
    fn test_loop_error_back_into_failure() {
        let original = Failure::new("boom");
        let roundtrip: Failure = LoopError::Failed(original.clone()).into();
        assert_eq!(roundtrip, original);

        let cancelled: Failure = LoopError::Cancelled.into();
        assert_eq!(cancelled.message(), "task was cancelled");
    }
}
