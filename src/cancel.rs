//! Cancellation of in-flight observations.
//!
//! A [`CancellationToken`] is shared between the code that blocks in
//! `observe` and whoever may want to abort it. Blocked scans register their
//! channel with the token, and `cancel` wakes those channels so the waiter
//! notices promptly instead of sleeping until its deadline.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

/// Something a cancelled token must wake.
pub(crate) trait CancelWaker: Send + Sync {
    fn wake(&self);
}

#[derive(Default)]
struct Inner {
    cancelled: AtomicBool,
    next_id: AtomicU64,
    wakers: Mutex<HashMap<u64, Weak<dyn CancelWaker>>>,
}

/// Cloneable cancellation handle.
#[derive(Clone, Default)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels every observation holding this token. Idempotent.
    pub fn cancel(&self) {
        if self.inner.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        // Wake outside the registry lock: a waker takes its channel lock.
        let wakers: Vec<Weak<dyn CancelWaker>> = self.inner.wakers.lock().values().cloned().collect();
        for waker in wakers.iter().filter_map(Weak::upgrade) {
            waker.wake();
        }
        tracing::debug!(woken = wakers.len(), "cancellation requested");
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    pub(crate) fn register(&self, waker: Weak<dyn CancelWaker>) -> Registration {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let mut wakers = self.inner.wakers.lock();
        wakers.retain(|_, w| w.strong_count() > 0);
        wakers.insert(id, waker);
        Registration {
            token: self.clone(),
            id,
        }
    }
}

/// Removes a waker from its token when dropped.
pub(crate) struct Registration {
    token: CancellationToken,
    id: u64,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.token.inner.wakers.lock().remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Counter(AtomicUsize);

    impl CancelWaker for Counter {
        fn wake(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_cancel_wakes_registered_once() {
        let token = CancellationToken::new();
        let counter = Arc::new(Counter::default());
        let weak: Weak<dyn CancelWaker> = Arc::downgrade(&counter) as Weak<dyn CancelWaker>;
        let _reg = token.register(weak);

        token.cancel();
        token.cancel();
        assert!(token.is_cancelled());
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dropped_registration_is_not_woken() {
        let token = CancellationToken::new();
        let counter = Arc::new(Counter::default());
        let weak: Weak<dyn CancelWaker> = Arc::downgrade(&counter) as Weak<dyn CancelWaker>;
        drop(token.register(weak));

        token.cancel();
        assert_eq!(counter.0.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_clones_share_state() {
        let token = CancellationToken::new();
        let other = token.clone();
        other.cancel();
        assert!(token.is_cancelled());
    }
}
