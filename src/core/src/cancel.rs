//! Cancellation tokens for blocking scheduler operations.
//!
//! A [`CancelToken`] combines an explicit cancellation signal
//! ([`tokio_util::sync::CancellationToken`]) with an optional deadline. Every
//! blocking call in the crate (`wait_dequeue`, `wait_result`, `run_one`, `run`)
//! accepts one, and reports *why* it stopped through [`StopReason`].
//!
//! ```rust,ignore
//! let token = CancelToken::with_timeout(Duration::from_millis(500));
//! let child = token.child();      // inherits the deadline
//! child.cancel();                 // does not affect the parent
//! ```

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::SchedulerError;

/// Why a token fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The deadline passed
    DeadlineExceeded,
    /// `cancel()` was called on this token or an ancestor
    Cancelled,
}

impl StopReason {
    /// Map the reason to the error a blocking wait returns.
    pub fn into_error(self) -> SchedulerError {
        match self {
            Self::DeadlineExceeded => SchedulerError::timeout(),
            Self::Cancelled => SchedulerError::cancelled(),
        }
    }
}

/// Cloneable cancellation signal with an optional deadline.
#[derive(Debug, Clone)]
pub struct CancelToken {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    /// A token that only fires on explicit cancellation.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: None,
        }
    }

    /// A token that fires once `timeout` has elapsed.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    /// A token that fires at `deadline`.
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: Some(deadline),
        }
    }

    /// Derive a token that fires when this one does, and can additionally be
    /// cancelled on its own. The deadline is inherited.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    /// Derive a child whose deadline is the earlier of the inherited one and
    /// `now + timeout`.
    pub fn child_with_timeout(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        Self {
            token: self.token.child_token(),
            deadline: Some(match self.deadline {
                Some(existing) => existing.min(candidate),
                None => candidate,
            }),
        }
    }

    /// Cancel this token and all of its children.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// The deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Non-blocking check. Cancellation takes precedence over the deadline.
    pub fn stop_reason(&self) -> Option<StopReason> {
        if self.token.is_cancelled() {
            return Some(StopReason::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(StopReason::DeadlineExceeded),
            _ => None,
        }
    }

    /// Check whether the token has fired for any reason.
    pub fn is_stopped(&self) -> bool {
        self.stop_reason().is_some()
    }

    /// Resolve once the token fires.
    pub async fn stopped(&self) -> StopReason {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    biased;
                    _ = self.token.cancelled() => StopReason::Cancelled,
                    _ = tokio::time::sleep_until(deadline) => StopReason::DeadlineExceeded,
                }
            }
            None => {
                self.token.cancelled().await;
                StopReason::Cancelled
            }
        }
    }

    /// Borrow the underlying cancellation token, e.g. to hand to code that
    /// already speaks `tokio_util`.
    pub fn as_cancellation_token(&self) -> &CancellationToken {
        &self.token
    }
}
