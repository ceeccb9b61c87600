//! Cooperative cancellation plus deadline, threaded through every run.
//!
//! A [`CancelScope`] is checked voluntarily at loop boundaries. Explicit
//! cancellation and deadline expiry are kept apart so callers can tell a
//! Cancelled run from a Timeout.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Debug)]
pub struct CancelScope {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Default for CancelScope {
    fn default() -> Self {
        Self::new(CancellationToken::new())
    }
}

impl CancelScope {
    /// Scope with no deadline.
    pub fn new(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Derive a child: cancelling `self` cancels the child (not the reverse),
    /// and the child's deadline is the earlier of the parent's and `now + timeout`.
    pub fn child(&self, timeout: Duration) -> Self {
        let own = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(parent) if parent < own => parent,
            _ => own,
        };
        Self {
            token: self.token.child_token(),
            deadline: Some(deadline),
        }
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

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }
}
