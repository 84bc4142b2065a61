//! Cancellation token for cooperative shutdown
//!
//! The process owns one root token. Every acceptor gets a child of it, every
//! connection a child of its acceptor's token. Cancelling a token is visible
//! to all its descendants, never to its ancestors.
//!
//! Threads blocked in a syscall do not observe the flag by themselves; the
//! owner of the blocking resource must also wake them (see the network
//! supervisor, which shuts sockets down after cancelling).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::error::{Result, ShorelineError};

/// Granularity of [`CancellationToken::sleep`]
const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Clone)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

struct Inner {
    cancelled: AtomicBool,
    parent: Option<CancellationToken>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                parent: None,
            }),
        }
    }

    /// Token that is cancelled together with `self`
    pub fn child(&self) -> Self {
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                parent: Some(self.clone()),
            }),
        }
    }

    /// True if this token or any ancestor was cancelled
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        let mut token = self;
        loop {
            if token.inner.cancelled.load(Ordering::Acquire) {
                return true;
            }
            match &token.inner.parent {
                Some(parent) => token = parent,
                None => return false,
            }
        }
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Release);
    }

    /// `Err(Cancelled)` once cancelled
    #[inline]
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(ShorelineError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Sleep for `duration` or until cancelled, whichever comes first.
    /// Returns true if cancelled.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_cancelled() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            thread::sleep((deadline - now).min(POLL_INTERVAL));
        }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_cancellation() {
        let token = CancellationToken::new();
        assert!(token.check().is_ok());

        token.cancel();
        assert!(token.is_cancelled());
        assert!(matches!(token.check(), Err(ShorelineError::Cancelled)));
    }

    #[test]
    fn test_hierarchy() {
        let root = CancellationToken::new();
        let acceptor = root.child();
        let connection = acceptor.child();

        connection.cancel();
        assert!(!acceptor.is_cancelled());
        assert!(!root.is_cancelled());

        let other = acceptor.child();
        root.cancel();
        assert!(acceptor.is_cancelled());
        assert!(other.is_cancelled());
    }

    #[test]
    fn test_clone_shares_state() {
        let a = CancellationToken::new();
        let b = a.clone();
        b.cancel();
        assert!(a.is_cancelled());
    }

    #[test]
    fn test_sleep_wakes_on_cancel() {
        let token = CancellationToken::new();
        assert!(!token.sleep(Duration::from_millis(5)));

        let child = token.child();
        let waiter = thread::spawn(move || {
            let start = Instant::now();
            (child.sleep(Duration::from_secs(30)), start.elapsed())
        });
        thread::sleep(Duration::from_millis(20));
        token.cancel();
        let (cancelled, elapsed) = waiter.join().unwrap();
        assert!(cancelled);
        assert!(elapsed < Duration::from_secs(5));
    }
}
