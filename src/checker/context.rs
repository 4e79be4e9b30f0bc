//! Cancellation and deadline contract for a single check.

use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Why a check was abandoned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cancellation {
    Cancelled,
    DeadlineExceeded,
}

impl fmt::Display for Cancellation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Cancellation::Cancelled => "context canceled",
            Cancellation::DeadlineExceeded => "context deadline exceeded",
        })
    }
}

/// Caller-supplied cancellation token plus an optional deadline
#[derive(Debug, Clone, Default)]
pub struct CheckContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl CheckContext {
    /// A context that is never cancelled on its own
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    /// Tighten the deadline to at most `timeout` from now.
    /// A timeout too large to represent leaves the deadline unchanged.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.with_deadline(deadline),
            None => self,
        }
    }

    /// Tighten the deadline; an earlier existing deadline is kept
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(current) => current.min(deadline),
            None => deadline,
        });
        self
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Current state without waiting
    pub fn err(&self) -> Option<Cancellation> {
        if self.token.is_cancelled() {
            Some(Cancellation::Cancelled)
        } else if self.deadline.is_some_and(|d| Instant::now() >= d) {
            Some(Cancellation::DeadlineExceeded)
        } else {
            None
        }
    }

    /// Resolves once the token is cancelled or the deadline passes
    pub async fn done(&self) -> Cancellation {
        match self.deadline {
            Some(deadline) => tokio::select! {
                biased;
                _ = self.token.cancelled() => Cancellation::Cancelled,
                _ = tokio::time::sleep_until(deadline) => Cancellation::DeadlineExceeded,
            },
            None => {
                self.token.cancelled().await;
                Cancellation::Cancelled
            }
        }
    }
}

/// Run `work` until it completes or the context is done, whichever is first.
///
/// Cancellation wins ties. `work` is dropped unfinished when the context
/// fires; work running on another task keeps going in the background.
pub async fn race<F: Future>(ctx: &CheckContext, work: F) -> Result<F::Output, Cancellation> {
    tokio::select! {
        biased;
        cause = ctx.done() => Err(cause),
        output = work => Ok(output),
    }
}
