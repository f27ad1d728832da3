//! Streams over a pre-materialized, statically sized set of elements.
//!
//! The common body shapes (no body, one chunk, two chunks) get their own
//! variants that keep elements inline; everything else goes through
//! [`RegularFixed`]. [`FixedStream`] closes over the four and picks one
//! by element count.
//!
//! All variants share the same delivery rule: a `request(n)` delivers
//! `min(n, remaining)` elements in order, and if the last element goes
//! out during that call, `on_complete` follows in the same call. An empty
//! stream completes right after `on_subscribe`, without demand.

use std::marker::PhantomData;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{ProtocolViolation, StreamError};
use crate::outlet::Outlet;
use crate::publisher::{Publisher, Subscriber, reject_duplicate};
use crate::subscription::{Subscription, SubscriptionHandle, add_demand, consume_demand};

/// Element storage with a forward-only cursor.
trait Elements<T>: Send + 'static {
    fn remaining(&self) -> usize;

    fn take_next(&mut self) -> Option<T>;

    /// Drop undelivered elements.
    fn clear(&mut self);
}

struct NoElements;

impl<T> Elements<T> for NoElements {
    fn remaining(&self) -> usize {
        0
    }

    fn take_next(&mut self) -> Option<T> {
        None
    }

    fn clear(&mut self) {}
}

struct OneElement<T>(Option<T>);

impl<T: Send + 'static> Elements<T> for OneElement<T> {
    fn remaining(&self) -> usize {
        usize::from(self.0.is_some())
    }

    fn take_next(&mut self) -> Option<T> {
        self.0.take()
    }

    fn clear(&mut self) {
        self.0 = None;
    }
}

struct TwoElements<T> {
    first: Option<T>,
    second: Option<T>,
}

impl<T: Send + 'static> Elements<T> for TwoElements<T> {
    fn remaining(&self) -> usize {
        usize::from(self.first.is_some()) + usize::from(self.second.is_some())
    }

    fn take_next(&mut self) -> Option<T> {
        self.first.take().or_else(|| self.second.take())
    }

    fn clear(&mut self) {
        self.first = None;
        self.second = None;
    }
}

struct ManyElements<T> {
    cursor: std::vec::IntoIter<T>,
}

impl<T: Send + 'static> Elements<T> for ManyElements<T> {
    fn remaining(&self) -> usize {
        self.cursor.len()
    }

    fn take_next(&mut self) -> Option<T> {
        self.cursor.next()
    }

    fn clear(&mut self) {
        self.cursor = Vec::new().into_iter();
    }
}

/// Shared publisher half: holds the elements until the one subscriber
/// takes them.
struct FixedSource<T, E> {
    elements: Mutex<Option<E>>,
    _item: PhantomData<fn() -> T>,
}

impl<T: Send + 'static, E: Elements<T>> FixedSource<T, E> {
    fn new(elements: E) -> Self {
        Self {
            elements: Mutex::new(Some(elements)),
            _item: PhantomData,
        }
    }

    fn subscribe(&self, subscriber: Box<dyn Subscriber<T>>) {
        let Some(elements) = self.elements.lock().take() else {
            reject_duplicate(subscriber);
            return;
        };
        let empty = elements.remaining() == 0;
        let inner = Arc::new(FixedInner {
            state: Mutex::new(FixedState {
                elements,
                demand: 0,
                draining: false,
                done: empty,
            }),
            outlet: Outlet::new(subscriber),
        });
        inner.outlet.subscribe(Subscription::new(FixedHandle(inner.clone())));
        if empty {
            inner.outlet.complete();
        }
    }
}

struct FixedState<E> {
    elements: E,
    demand: i64,
    draining: bool,
    /// No further element or terminal signal will be produced.
    done: bool,
}

struct FixedInner<T, E> {
    state: Mutex<FixedState<E>>,
    outlet: Outlet<T>,
}

impl<T: Send + 'static, E: Elements<T>> FixedInner<T, E> {
    fn request(&self, n: i64) {
        if n <= 0 {
            self.fail(ProtocolViolation::NonPositiveDemand(n).into());
            return;
        }
        {
            let mut state = self.state.lock();
            if state.done {
                return;
            }
            state.demand = add_demand(state.demand, n);
            if state.draining {
                return;
            }
            state.draining = true;
        }
        self.drain();
    }

    /// Deliver while demand and elements remain. Only one caller drains at
    /// a time; requests that arrive meanwhile just raise demand.
    fn drain(&self) {
        loop {
            let mut state = self.state.lock();
            if state.done {
                state.draining = false;
                return;
            }
            if state.demand == 0 {
                state.draining = false;
                return;
            }
            let Some(item) = state.elements.take_next() else {
                state.done = true;
                state.draining = false;
                drop(state);
                self.outlet.complete();
                return;
            };
            state.demand = consume_demand(state.demand);
            let last = state.elements.remaining() == 0;
            if last {
                state.done = true;
                state.draining = false;
            }
            drop(state);

            self.outlet.next(item);
            if last {
                self.outlet.complete();
                return;
            }
        }
    }

    fn fail(&self, error: StreamError) {
        {
            let mut state = self.state.lock();
            if state.done {
                return;
            }
            state.done = true;
            state.elements.clear();
        }
        tracing::debug!(error = %error, "fixed stream failed");
        self.outlet.error(error);
    }

    fn cancel(&self) {
        {
            let mut state = self.state.lock();
            state.done = true;
            state.elements.clear();
        }
        self.outlet.cancel();
    }
}

struct FixedHandle<T, E>(Arc<FixedInner<T, E>>);

impl<T: Send + 'static, E: Elements<T>> SubscriptionHandle for FixedHandle<T, E> {
    fn request(&self, n: i64) {
        self.0.request(n);
    }

    fn cancel(&self) {
        self.0.cancel();
    }
}

/// A stream with no elements.
pub struct EmptyFixed<T>(FixedSource<T, NoElements>);

impl<T: Send + 'static> EmptyFixed<T> {
    pub fn new() -> Self {
        Self(FixedSource::new(NoElements))
    }
}

impl<T: Send + 'static> Default for EmptyFixed<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + 'static> Publisher<T> for EmptyFixed<T> {
    fn subscribe(&self, subscriber: Box<dyn Subscriber<T>>) {
        self.0.subscribe(subscriber);
    }
}

/// A stream with exactly one element, held inline.
pub struct OneElementFixed<T>(FixedSource<T, OneElement<T>>);

impl<T: Send + 'static> OneElementFixed<T> {
    pub fn new(item: T) -> Self {
        Self(FixedSource::new(OneElement(Some(item))))
    }
}

impl<T: Send + 'static> Publisher<T> for OneElementFixed<T> {
    fn subscribe(&self, subscriber: Box<dyn Subscriber<T>>) {
        self.0.subscribe(subscriber);
    }
}

/// A stream with exactly two elements, held inline.
pub struct TwoElementFixed<T>(FixedSource<T, TwoElements<T>>);

impl<T: Send + 'static> TwoElementFixed<T> {
    pub fn new(first: T, second: T) -> Self {
        Self(FixedSource::new(TwoElements {
            first: Some(first),
            second: Some(second),
        }))
    }
}

impl<T: Send + 'static> Publisher<T> for TwoElementFixed<T> {
    fn subscribe(&self, subscriber: Box<dyn Subscriber<T>>) {
        self.0.subscribe(subscriber);
    }
}

/// A stream over any number of elements.
pub struct RegularFixed<T>(FixedSource<T, ManyElements<T>>);

impl<T: Send + 'static> RegularFixed<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self(FixedSource::new(ManyElements {
            cursor: items.into_iter(),
        }))
    }
}

impl<T: Send + 'static> Publisher<T> for RegularFixed<T> {
    fn subscribe(&self, subscriber: Box<dyn Subscriber<T>>) {
        self.0.subscribe(subscriber);
    }
}

/// A fixed stream whose variant was chosen by element count.
pub enum FixedStream<T> {
    Empty(EmptyFixed<T>),
    One(OneElementFixed<T>),
    Two(TwoElementFixed<T>),
    Regular(RegularFixed<T>),
}

impl<T: Send + 'static> FixedStream<T> {
    pub fn from_vec(mut items: Vec<T>) -> Self {
        match items.len() {
            0 => Self::Empty(EmptyFixed::new()),
            1 => match items.pop() {
                Some(item) => Self::One(OneElementFixed::new(item)),
                None => Self::Empty(EmptyFixed::new()),
            },
            2 => {
                let mut it = items.into_iter();
                match (it.next(), it.next()) {
                    (Some(first), Some(second)) => Self::Two(TwoElementFixed::new(first, second)),
                    _ => Self::Empty(EmptyFixed::new()),
                }
            }
            _ => Self::Regular(RegularFixed::new(items)),
        }
    }
}

impl<T: Send + 'static> From<Vec<T>> for FixedStream<T> {
    fn from(items: Vec<T>) -> Self {
        Self::from_vec(items)
    }
}

impl<T: Send + 'static> Publisher<T> for FixedStream<T> {
    fn subscribe(&self, subscriber: Box<dyn Subscriber<T>>) {
        match self {
            Self::Empty(s) => s.subscribe(subscriber),
            Self::One(s) => s.subscribe(subscriber),
            Self::Two(s) => s.subscribe(subscriber),
            Self::Regular(s) => s.subscribe(subscriber),
        }
    }
}

/// Build a fixed stream over `items`, specialized by count.
pub fn of<T: Send + 'static>(items: Vec<T>) -> FixedStream<T> {
    FixedStream::from_vec(items)
}
