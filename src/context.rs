//! Cancellation composition.
//!
//! Every facade operation conceptually accepts a caller context; the
//! combined context used by workers is `caller ∧ manager-lifetime` (either
//! side cancelling cancels the combination). `CancelToken` is the hand-rolled
//! primitive this crate uses for that instead of an async-runtime
//! cancellation token, since the source-management core is synchronous.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

#[derive(Debug, Default)]
struct Inner {
    cancelled: AtomicBool,
    lock: Mutex<()>,
    condvar: Condvar,
}

/// A cancellable token. Cloning shares the same underlying flag; cancelling
/// any clone cancels all of them.
#[derive(Debug, Clone)]
pub struct CancelToken(Arc<Inner>);

impl Default for CancelToken {
    fn default() -> Self {
        CancelToken::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        CancelToken(Arc::new(Inner::default()))
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.cancelled.load(Ordering::SeqCst)
    }

    /// Cancels this token and wakes any thread blocked in [`Self::wait`].
    pub fn cancel(&self) {
        self.0.cancelled.store(true, Ordering::SeqCst);
        let _guard = self.0.lock.lock().unwrap();
        self.0.condvar.notify_all();
    }

    /// Blocks the calling thread until cancelled or `timeout` elapses.
    /// Returns `true` if cancellation occurred before the timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        if self.is_cancelled() {
            return true;
        }
        let guard = self.0.lock.lock().unwrap();
        let (_guard, _result) = self
            .0
            .condvar
            .wait_timeout_while(guard, timeout, |_| !self.is_cancelled())
            .unwrap();
        self.is_cancelled()
    }

    /// Combines two tokens into a new one that is cancelled as soon as
    /// either parent is. A small watcher thread forwards cancellation from
    /// whichever parent is shorter-lived; it holds only a [`Weak`] reference
    /// to the child, so once the caller drops the child (and no combined
    /// context is ever cancelled), the next poll fails to upgrade and the
    /// thread exits instead of running forever.
    pub fn combine(a: &CancelToken, b: &CancelToken) -> CancelToken {
        let child = CancelToken::new();
        if a.is_cancelled() || b.is_cancelled() {
            child.cancel();
            return child;
        }
        let (a, b, weak_child) = (a.clone(), b.clone(), Arc::downgrade(&child.0));
        std::thread::spawn(move || loop {
            let watched = match weak_child.upgrade() {
                Some(inner) => CancelToken(inner),
                None => return,
            };
            if watched.is_cancelled() {
                return;
            }
            drop(watched);
            if a.wait_timeout(Duration::from_millis(50)) || b.is_cancelled() {
                if let Some(inner) = weak_child.upgrade() {
                    CancelToken(inner).cancel();
                }
                return;
            }
        });
        child
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_is_observed() {
        let t = CancelToken::new();
        assert!(!t.is_cancelled());
        t.cancel();
        assert!(t.is_cancelled());
    }

    #[test]
    fn clone_shares_state() {
        let t = CancelToken::new();
        let clone = t.clone();
        clone.cancel();
        assert!(t.is_cancelled());
    }

    #[test]
    fn combine_cancels_when_either_parent_does() {
        let a = CancelToken::new();
        let b = CancelToken::new();
        let combined = CancelToken::combine(&a, &b);
        assert!(!combined.is_cancelled());
        b.cancel();
        assert!(combined.wait_timeout(Duration::from_secs(2)));
    }

    #[test]
    fn combine_is_immediately_cancelled_if_a_parent_already_is() {
        let a = CancelToken::new();
        a.cancel();
        let b = CancelToken::new();
        let combined = CancelToken::combine(&a, &b);
        assert!(combined.is_cancelled());
    }

    #[test]
    fn combine_watcher_thread_does_not_keep_a_dropped_child_alive() {
        let a = CancelToken::new();
        let b = CancelToken::new();
        let combined = CancelToken::combine(&a, &b);
        let weak = Arc::downgrade(&combined.0);
        drop(combined);
        assert!(
            weak.upgrade().is_none(),
            "watcher thread must hold only a Weak reference to the child"
        );
    }
}
