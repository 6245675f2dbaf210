// SPDX-License-Identifier: MIT OR Apache-2.0
//! Cooperative cancellation for simulated commands.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{Instant, sleep_until};

/// Why a cancel token fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// [`CancelToken::cancel`] was called explicitly.
    Canceled,
    /// The token's deadline elapsed.
    DeadlineExceeded,
}

impl CancelReason {
    /// Human-readable description, used verbatim as the wait error text.
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::Canceled => "command canceled",
            Self::DeadlineExceeded => "deadline exceeded",
        }
    }
}

/// A cloneable, cheaply-shareable token used to signal cancellation.
///
/// All clones share the same underlying state; cancelling one immediately
/// makes every clone observe `is_cancelled() == true`. A token may carry a
/// deadline, in which case it fires on its own when the deadline elapses.
/// Only the **first** reason is recorded.
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<TokenInner>,
}

struct TokenInner {
    cancelled: AtomicBool,
    reason: Mutex<Option<CancelReason>>,
    notify: Notify,
    deadline: Option<Instant>,
}

impl CancelToken {
    /// Create a token with no deadline. It fires only on [`cancel`](Self::cancel).
    #[must_use]
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Create a token that fires on its own at `deadline`.
    #[must_use]
    pub fn with_deadline(deadline: Instant) -> Self {
        Self::build(Some(deadline))
    }

    /// Create a token that fires on its own after `timeout`.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::build(Some(Instant::now() + timeout))
    }

    fn build(deadline: Option<Instant>) -> Self {
        Self {
            inner: Arc::new(TokenInner {
                cancelled: AtomicBool::new(false),
                reason: Mutex::new(None),
                notify: Notify::new(),
                deadline,
            }),
        }
    }

    /// Signal cancellation. Idempotent — later calls never overwrite the
    /// recorded reason.
    pub fn cancel(&self) {
        self.fire(CancelReason::Canceled);
    }

    fn fire(&self, reason: CancelReason) {
        {
            let mut guard = self.inner.reason.lock().expect("reason lock poisoned");
            if guard.is_none() {
                *guard = Some(reason);
            }
        }
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Returns `true` once the token has fired, observing an elapsed
    /// deadline even when nothing is awaiting [`cancelled`](Self::cancelled).
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        if self.inner.cancelled.load(Ordering::SeqCst) {
            return true;
        }
        match self.inner.deadline {
            Some(deadline) if Instant::now() >= deadline => {
                self.fire(CancelReason::DeadlineExceeded);
                true
            }
            _ => false,
        }
    }

    /// The recorded reason, if the token has fired.
    #[must_use]
    pub fn reason(&self) -> Option<CancelReason> {
        *self.inner.reason.lock().expect("reason lock poisoned")
    }

    /// Resolves with the reason once the token fires.
    ///
    /// If the token is already fired the future resolves immediately.
    pub async fn cancelled(&self) -> CancelReason {
        if self.is_cancelled() {
            return self.reason().unwrap_or(CancelReason::Canceled);
        }
        match self.inner.deadline {
            Some(deadline) => {
                tokio::select! {
                    () = sleep_until(deadline) => self.fire(CancelReason::DeadlineExceeded),
                    () = self.explicitly_cancelled() => {}
                }
            }
            None => self.explicitly_cancelled().await,
        }
        self.reason().unwrap_or(CancelReason::Canceled)
    }

    async fn explicitly_cancelled(&self) {
        loop {
            self.inner.notify.notified().await;
            if self.inner.cancelled.load(Ordering::SeqCst) {
                return;
            }
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.inner.cancelled.load(Ordering::SeqCst))
            .field("reason", &self.reason())
            .field("deadline", &self.inner.deadline)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_starts_not_cancelled() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        assert!(token.reason().is_none());
    }

    #[test]
    fn cancel_flips_state() {
        let token = CancelToken::new();
        token.cancel();
        assert!(token.is_cancelled());
        assert_eq!(token.reason(), Some(CancelReason::Canceled));
    }

    #[test]
    fn clone_shares_state() {
        let a = CancelToken::new();
        let b = a.clone();
        a.cancel();
        assert!(b.is_cancelled());
    }

    #[test]
    fn first_reason_wins() {
        let token = CancelToken::with_timeout(Duration::from_secs(3600));
        token.cancel();
        token.cancel();
        assert_eq!(token.reason(), Some(CancelReason::Canceled));
    }

    #[tokio::test]
    async fn elapsed_deadline_is_observed_without_waiters() {
        let token = CancelToken::with_deadline(Instant::now() - Duration::from_millis(1));
        assert!(token.is_cancelled());
        assert_eq!(token.reason(), Some(CancelReason::DeadlineExceeded));
    }

    #[tokio::test]
    async fn cancelled_resolves_on_deadline() {
        let token = CancelToken::with_timeout(Duration::from_millis(5));
        assert_eq!(token.cancelled().await, CancelReason::DeadlineExceeded);
    }

    #[tokio::test]
    async fn cancelled_resolves_on_explicit_cancel() {
        let token = CancelToken::new();
        let waiter = token.clone();
        let handle = tokio::spawn(async move { waiter.cancelled().await });
        tokio::time::sleep(Duration::from_millis(5)).await;
        token.cancel();
        assert_eq!(handle.await.unwrap(), CancelReason::Canceled);
    }

    #[tokio::test]
    async fn cancelled_resolves_immediately_when_already_fired() {
        let token = CancelToken::new();
        token.cancel();
        assert_eq!(token.cancelled().await, CancelReason::Canceled);
    }
}
