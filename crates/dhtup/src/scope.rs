//! Cancellation and deadlines for blocking operations
//!
//! A [`Scope`] pairs a [`CancellationToken`] with an optional deadline.
//!  Every suspension point (the DHT round trip, the manifest wait, stream
//!  reads) runs inside one, so callers can abandon an operation promptly
//!  either by cancelling or by letting time run out.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, thiserror::Error, Clone, Copy, PartialEq, Eq)]
pub enum ScopeError {
    #[error("operation cancelled")]
    Cancelled,
    #[error("deadline exceeded")]
    DeadlineExceeded,
}

#[derive(Debug, Clone, Default)]
pub struct Scope {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Scope {
    /// A scope with no deadline that only ends when cancelled
    pub fn new() -> Self {
        Self::default()
    }

    /// A fresh scope that expires after `timeout`
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::new().timeout(timeout)
    }

    /// Tighten the deadline to at most `timeout` from now
    ///
    /// A timeout too large to represent as an instant leaves the scope
    ///  unchanged.
    pub fn timeout(self, timeout: Duration) -> Self {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.deadline(deadline),
            None => self,
        }
    }

    /// Tighten the deadline to at most `deadline`
    pub fn deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(current) => current.min(deadline),
            None => deadline,
        });
        self
    }

    /// A scope cancelled along with this one, which can also be
    ///  cancelled on its own without affecting the parent
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn deadline_at(&self) -> Option<Instant> {
        self.deadline
    }

    /// Whether the scope has been cancelled or has run out of time
    pub fn check(&self) -> Result<(), ScopeError> {
        if self.token.is_cancelled() {
            return Err(ScopeError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(ScopeError::DeadlineExceeded),
            _ => Ok(()),
        }
    }

    /// Drive `fut` until it completes or the scope ends, whichever is first
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, ScopeError> {
        let deadline = self.deadline;
        let expired = async move {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(ScopeError::Cancelled),
            _ = expired => Err(ScopeError::DeadlineExceeded),
            out = fut => Ok(out),
        }
    }

    /// Sleep for `duration` unless the scope ends first
    pub async fn sleep(&self, duration: Duration) -> Result<(), ScopeError> {
        self.run(tokio::time::sleep(duration)).await
    }
}
