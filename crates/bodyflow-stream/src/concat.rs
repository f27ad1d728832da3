//! Concatenation of independently owned streams.
//!
//! [`Concat`] presents N child publishers as one stream: child 0's
//! elements, then child 1's, and so on. At most one child is subscribed
//! at any time. Children ahead of the active one are never touched, and
//! children behind it have terminated.
//!
//! ```text
//! NotStarted ──request(n)──▶ Draining(0) ──child complete──▶ Draining(1) ─ … ─▶ Completed
//!      │                          │
//!      └──────── cancel ──────────┴──▶ Cancelled        child error ──▶ Failed
//! ```
//!
//! Subscribing to a `Concat` does not subscribe to child 0; the first
//! `request` does, so a child's side effects never run before a consumer
//! asks for data. Demand the downstream subscriber granted but a child did
//! not use (because it ran out of elements) carries over to the next
//! child.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{ProtocolViolation, StreamError};
use crate::outlet::Outlet;
use crate::publisher::{BoxPublisher, Publisher, Subscriber, reject_duplicate};
use crate::subscription::{Subscription, SubscriptionHandle, add_demand, consume_demand};

/// Lifecycle of one concat subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConcatPhase {
    NotStarted,
    /// The child at this index is subscribed (or being subscribed).
    Draining(usize),
    Completed,
    Failed,
    Cancelled,
}

impl ConcatPhase {
    fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// A stream that drains its children one after another.
pub struct Concat<T> {
    children: Mutex<Option<Vec<BoxPublisher<T>>>>,
}

impl<T: Send + 'static> Concat<T> {
    pub fn new(children: Vec<BoxPublisher<T>>) -> Self {
        Self {
            children: Mutex::new(Some(children)),
        }
    }
}

/// Concatenate `streams` in order.
pub fn concat<T, I>(streams: I) -> Concat<T>
where
    T: Send + 'static,
    I: IntoIterator<Item = BoxPublisher<T>>,
{
    Concat::new(streams.into_iter().collect())
}

impl<T: Send + 'static> Publisher<T> for Concat<T> {
    fn subscribe(&self, subscriber: Box<dyn Subscriber<T>>) {
        let Some(children) = self.children.lock().take() else {
            reject_duplicate(subscriber);
            return;
        };
        let empty = children.is_empty();
        let inner = Arc::new(ConcatInner {
            state: Mutex::new(ConcatState {
                phase: if empty {
                    ConcatPhase::Completed
                } else {
                    ConcatPhase::NotStarted
                },
                pending: children.into(),
                handoff: None,
                handing_off: false,
                current: None,
                active: None,
                demand: 0,
            }),
            outlet: Outlet::new(subscriber),
        });
        inner
            .outlet
            .subscribe(Subscription::new(ConcatHandle(inner.clone())));
        if empty {
            inner.outlet.complete();
        }
    }
}

struct ConcatState<T> {
    phase: ConcatPhase,
    /// Children not yet subscribed, in order.
    pending: VecDeque<BoxPublisher<T>>,
    /// Next child to subscribe, queued for the hand-off loop.
    handoff: Option<(usize, BoxPublisher<T>)>,
    handing_off: bool,
    /// The subscribed child publisher, kept alive while it drains.
    current: Option<BoxPublisher<T>>,
    /// The active child's subscription, once it arrived.
    active: Option<Subscription>,
    /// Downstream demand not yet satisfied by any child.
    demand: i64,
}

impl<T> ConcatState<T> {
    /// Enter a terminal phase, returning what must be released outside
    /// the lock.
    fn finish(&mut self, phase: ConcatPhase) -> Released<T> {
        self.phase = phase;
        self.pending.clear();
        Released {
            active: self.active.take(),
            _current: self.current.take(),
            _handoff: self.handoff.take(),
        }
    }

    /// Queue the next child for subscription, or complete when none is left.
    fn advance(&mut self, next_index: usize) -> bool {
        match self.pending.pop_front() {
            Some(child) => {
                self.phase = ConcatPhase::Draining(next_index);
                self.handoff = Some((next_index, child));
                true
            }
            None => {
                self.phase = ConcatPhase::Completed;
                self.current = None;
                false
            }
        }
    }
}

struct Released<T> {
    active: Option<Subscription>,
    _current: Option<BoxPublisher<T>>,
    _handoff: Option<(usize, BoxPublisher<T>)>,
}

struct ConcatInner<T> {
    state: Mutex<ConcatState<T>>,
    outlet: Outlet<T>,
}

impl<T: Send + 'static> ConcatInner<T> {
    fn request(self: &Arc<Self>, n: i64) {
        if n <= 0 {
            self.fail(ProtocolViolation::NonPositiveDemand(n).into());
            return;
        }
        let mut state = self.state.lock();
        match state.phase {
            ConcatPhase::Completed | ConcatPhase::Failed | ConcatPhase::Cancelled => {}
            ConcatPhase::NotStarted => {
                state.demand = add_demand(state.demand, n);
                if state.advance(0) {
                    drop(state);
                    self.hand_off();
                }
            }
            ConcatPhase::Draining(_) => {
                state.demand = add_demand(state.demand, n);
                // Without an active subscription yet, the child picks up
                // the accumulated demand in its on_subscribe.
                if let Some(active) = state.active.clone() {
                    drop(state);
                    active.request(n);
                }
            }
        }
    }

    /// Subscribe queued children. Re-entrant calls (a child completing
    /// synchronously inside `subscribe`) only queue; the outermost call
    /// loops, so the stack stays flat however many children finish
    /// immediately.
    fn hand_off(self: &Arc<Self>) {
        let mut state = self.state.lock();
        if state.handing_off {
            return;
        }
        state.handing_off = true;
        while let Some((index, child)) = state.handoff.take() {
            drop(state);
            tracing::debug!(index, "subscribing to concat child");
            child.subscribe(Box::new(ChildSubscriber {
                inner: self.clone(),
                index,
            }));
            state = self.state.lock();
            if state.phase == ConcatPhase::Draining(index) {
                state.current = Some(child);
            } else {
                // Already finished: release the child outside the lock.
                drop(state);
                drop(child);
                state = self.state.lock();
            }
        }
        state.handing_off = false;
    }

    fn fail(&self, error: StreamError) {
        let released = {
            let mut state = self.state.lock();
            if state.phase.is_terminal() {
                return;
            }
            state.finish(ConcatPhase::Failed)
        };
        if let Some(active) = &released.active {
            active.cancel();
        }
        drop(released);
        tracing::debug!(error = %error, "concat failed");
        self.outlet.error(error);
    }

    fn cancel(&self) {
        let released = {
            let mut state = self.state.lock();
            if state.phase.is_terminal() {
                None
            } else {
                Some(state.finish(ConcatPhase::Cancelled))
            }
        };
        if let Some(active) = released.as_ref().and_then(|r| r.active.as_ref()) {
            active.cancel();
        }
        drop(released);
        self.outlet.cancel();
    }
}

struct ConcatHandle<T>(Arc<ConcatInner<T>>);

impl<T: Send + 'static> SubscriptionHandle for ConcatHandle<T> {
    fn request(&self, n: i64) {
        self.0.request(n);
    }

    fn cancel(&self) {
        self.0.cancel();
    }
}

/// Receives the signals of the child at `index`.
struct ChildSubscriber<T> {
    inner: Arc<ConcatInner<T>>,
    index: usize,
}

impl<T: Send + 'static> ChildSubscriber<T> {
    fn is_current(&self, phase: ConcatPhase) -> bool {
        phase == ConcatPhase::Draining(self.index)
    }
}

impl<T: Send + 'static> Subscriber<T> for ChildSubscriber<T> {
    fn on_subscribe(&mut self, subscription: Subscription) {
        let carried = {
            let mut state = self.inner.state.lock();
            if !self.is_current(state.phase) || state.active.is_some() {
                drop(state);
                subscription.cancel();
                return;
            }
            state.active = Some(subscription.clone());
            state.demand
        };
        if carried > 0 {
            subscription.request(carried);
        }
    }

    fn on_next(&mut self, item: T) {
        {
            let mut state = self.inner.state.lock();
            if !self.is_current(state.phase) {
                return;
            }
            state.demand = consume_demand(state.demand);
        }
        self.inner.outlet.next(item);
    }

    fn on_error(&mut self, error: StreamError) {
        let released = {
            let mut state = self.inner.state.lock();
            if !self.is_current(state.phase) {
                return;
            }
            state.finish(ConcatPhase::Failed)
        };
        drop(released);
        tracing::debug!(index = self.index, error = %error, "concat child failed");
        self.inner.outlet.error(error);
    }

    fn on_complete(&mut self) {
        let more = {
            let mut state = self.inner.state.lock();
            if !self.is_current(state.phase) {
                return;
            }
            state.active = None;
            state.advance(self.index + 1)
        };
        if more {
            self.inner.hand_off();
        } else {
            tracing::debug!(children = self.index + 1, "concat completed");
            self.inner.outlet.complete();
        }
    }
}
