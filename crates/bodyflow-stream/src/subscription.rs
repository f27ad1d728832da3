//! Subscription handles and demand accounting.

use std::fmt;
use std::sync::Arc;

/// Demand value that is never decremented and absorbs overflow.
pub const UNBOUNDED: i64 = i64::MAX;

/// The consumer-facing side of a subscription.
///
/// Implemented by every realization. Both calls may arrive from any
/// thread, including from inside the subscriber's own callbacks.
pub trait SubscriptionHandle: Send + Sync {
    /// Authorize `n` more elements. `n <= 0` is a protocol violation.
    fn request(&self, n: i64);

    /// Stop delivery. Idempotent; delivers no terminal signal.
    fn cancel(&self);
}

/// A cloneable handle through which a consumer drives a stream.
#[derive(Clone)]
pub struct Subscription {
    handle: Arc<dyn SubscriptionHandle>,
}

impl Subscription {
    pub fn new(handle: impl SubscriptionHandle + 'static) -> Self {
        Self {
            handle: Arc::new(handle),
        }
    }

    /// A subscription that ignores every call.
    ///
    /// Handed to subscribers that are rejected before they could ever
    /// receive an element.
    pub fn noop() -> Self {
        Self::new(Noop)
    }

    pub fn request(&self, n: i64) {
        self.handle.request(n);
    }

    /// Request [`UNBOUNDED`] demand.
    pub fn request_unbounded(&self) {
        self.handle.request(UNBOUNDED);
    }

    pub fn cancel(&self) {
        self.handle.cancel();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}

struct Noop;

impl SubscriptionHandle for Noop {
    fn request(&self, _n: i64) {}
    fn cancel(&self) {}
}

/// Add `n` to outstanding demand, saturating at [`UNBOUNDED`].
pub(crate) fn add_demand(current: i64, n: i64) -> i64 {
    current.saturating_add(n)
}

/// Account for one delivered element.
pub(crate) fn consume_demand(current: i64) -> i64 {
    if current == UNBOUNDED {
        current
    } else {
        current.saturating_sub(1).max(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

    #[derive(Default)]
    struct Recording {
        requested: AtomicI64,
        cancels: AtomicUsize,
    }

    impl SubscriptionHandle for Arc<Recording> {
        fn request(&self, n: i64) {
            self.requested.fetch_add(n, Ordering::SeqCst);
        }

        fn cancel(&self) {
            self.cancels.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn add_demand_saturates() {
        assert_eq!(add_demand(3, 4), 7);
        assert_eq!(add_demand(UNBOUNDED - 1, 10), UNBOUNDED);
        assert_eq!(add_demand(UNBOUNDED, UNBOUNDED), UNBOUNDED);
    }

    #[test]
    fn consume_demand_keeps_unbounded() {
        assert_eq!(consume_demand(2), 1);
        assert_eq!(consume_demand(0), 0);
        assert_eq!(consume_demand(UNBOUNDED), UNBOUNDED);
    }

    #[test]
    fn subscription_forwards_to_handle() {
        let rec = Arc::new(Recording::default());
        let sub = Subscription::new(rec.clone());
        let clone = sub.clone();

        sub.request(2);
        clone.request(3);
        clone.cancel();

        assert_eq!(rec.requested.load(Ordering::SeqCst), 5);
        assert_eq!(rec.cancels.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn noop_subscription_ignores_calls() {
        let sub = Subscription::noop();
        sub.request(1);
        sub.request(-1);
        sub.cancel();
        sub.cancel();
    }
}
