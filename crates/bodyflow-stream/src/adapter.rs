//! Interop with pull-based `futures_core::Stream`s.
//!
//! [`StreamSource`] publishes the items of a `Stream` under the demand
//! protocol. It needs no executor: the stream is polled only while demand
//! is outstanding, and a pending stream is resumed from whichever thread
//! fires its waker.
//!
//! [`SubscriberStream`] goes the other way and exposes any publisher as a
//! `Stream`, keeping a bounded window of demand open upstream.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Wake, Waker};

use futures_core::Stream;
use parking_lot::Mutex;

use crate::error::{ProtocolViolation, StreamError};
use crate::outlet::Outlet;
use crate::publisher::{Publisher, Subscriber, reject_duplicate};
use crate::subscription::{Subscription, SubscriptionHandle, add_demand, consume_demand};

type BoxStream<T, E> = Pin<Box<dyn Stream<Item = Result<T, E>> + Send>>;

/// A publisher over the items of a fallible `Stream`.
///
/// `Ok` items become elements, the first `Err` becomes an upstream
/// failure, and the end of the stream completes the subscription.
/// Cancelling drops the stream.
pub struct StreamSource<T, E> {
    stream: Mutex<Option<BoxStream<T, E>>>,
}

impl<T, E> StreamSource<T, E>
where
    T: Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    pub fn new(stream: impl Stream<Item = Result<T, E>> + Send + 'static) -> Self {
        Self {
            stream: Mutex::new(Some(Box::pin(stream))),
        }
    }
}

impl<T, E> Publisher<T> for StreamSource<T, E>
where
    T: Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    fn subscribe(&self, subscriber: Box<dyn Subscriber<T>>) {
        let Some(stream) = self.stream.lock().take() else {
            reject_duplicate(subscriber);
            return;
        };
        let pump = Arc::new(Pump {
            stream: Mutex::new(Some(stream)),
            state: Mutex::new(PumpState {
                demand: 0,
                polling: false,
                repoll: false,
                done: false,
            }),
            outlet: Outlet::new(subscriber),
        });
        pump.outlet.subscribe(Subscription::new(PumpHandle(pump.clone())));
    }
}

struct PumpState {
    demand: i64,
    polling: bool,
    /// A wake-up or new demand arrived while a poll was in progress.
    repoll: bool,
    done: bool,
}

struct Pump<T, E> {
    stream: Mutex<Option<BoxStream<T, E>>>,
    state: Mutex<PumpState>,
    outlet: Outlet<T>,
}

impl<T, E> Pump<T, E>
where
    T: Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    fn request(self: &Arc<Self>, n: i64) {
        if n <= 0 {
            if self.finish() {
                self.outlet
                    .error(ProtocolViolation::NonPositiveDemand(n).into());
            }
            return;
        }
        {
            let mut state = self.state.lock();
            if state.done {
                return;
            }
            state.demand = add_demand(state.demand, n);
        }
        self.drive();
    }

    fn cancel(&self) {
        self.finish();
        self.outlet.cancel();
    }

    /// Mark done and drop the stream. Returns `false` if already done.
    fn finish(&self) -> bool {
        self.close(false)
    }

    /// Like [`finish`](Self::finish), called by the poller on a terminal
    /// item. Leaving the polling role and marking done happen under one
    /// lock, so no other caller can start a poll in between.
    fn finish_polling(&self) -> bool {
        self.close(true)
    }

    fn close(&self, poller: bool) -> bool {
        {
            let mut state = self.state.lock();
            if poller {
                state.polling = false;
            }
            if state.done {
                return false;
            }
            state.done = true;
        }
        // A concurrent poll holds the stream lock; it observes `done`
        // and drops the stream itself.
        if let Some(mut slot) = self.stream.try_lock() {
            slot.take();
        }
        true
    }

    /// Poll while demand is outstanding. Only one caller polls at a time;
    /// others set `repoll` and leave.
    fn drive(self: &Arc<Self>) {
        {
            let mut state = self.state.lock();
            if state.done {
                return;
            }
            if state.polling {
                state.repoll = true;
                return;
            }
            state.polling = true;
        }

        let waker = Waker::from(self.clone());
        let mut cx = Context::from_waker(&waker);
        loop {
            {
                let mut state = self.state.lock();
                if state.done || state.demand == 0 {
                    state.polling = false;
                    drop(state);
                    self.drop_stream_if_done();
                    return;
                }
                state.repoll = false;
            }

            let polled = {
                let mut slot = self.stream.lock();
                match slot.as_mut() {
                    Some(stream) => stream.as_mut().poll_next(&mut cx),
                    None => Poll::Ready(None),
                }
            };

            match polled {
                Poll::Ready(Some(Ok(item))) => {
                    {
                        let mut state = self.state.lock();
                        if state.done {
                            continue;
                        }
                        state.demand = consume_demand(state.demand);
                    }
                    self.outlet.next(item);
                }
                Poll::Ready(Some(Err(err))) => {
                    if self.finish_polling() {
                        tracing::debug!(error = %err, "stream source failed");
                        self.outlet.error(StreamError::upstream(err));
                    }
                    self.drop_stream_if_done();
                    return;
                }
                Poll::Ready(None) => {
                    if self.finish_polling() {
                        self.outlet.complete();
                    }
                    self.drop_stream_if_done();
                    return;
                }
                Poll::Pending => {
                    let mut state = self.state.lock();
                    if state.repoll && !state.done {
                        continue;
                    }
                    state.polling = false;
                    drop(state);
                    self.drop_stream_if_done();
                    return;
                }
            }
        }
    }

    fn drop_stream_if_done(&self) {
        if self.state.lock().done {
            self.stream.lock().take();
        }
    }
}

impl<T, E> Wake for Pump<T, E>
where
    T: Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    fn wake(self: Arc<Self>) {
        self.drive();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.drive();
    }
}

struct PumpHandle<T, E>(Arc<Pump<T, E>>);

impl<T, E> SubscriptionHandle for PumpHandle<T, E>
where
    T: Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    fn request(&self, n: i64) {
        self.0.request(n);
    }

    fn cancel(&self) {
        self.0.cancel();
    }
}

/// Default number of elements [`into_stream`] keeps requested upstream.
pub const DEFAULT_PREFETCH: i64 = 16;

/// Consume `publisher` as a `Stream` of results.
///
/// `prefetch` elements are requested up front; consumed elements are
/// replenished in batches of half the window. The first error ends the
/// stream after being yielded. Dropping the stream cancels the
/// subscription.
pub fn into_stream<T, P>(publisher: &P, prefetch: i64) -> SubscriberStream<T>
where
    T: Send + 'static,
    P: Publisher<T> + ?Sized,
{
    let prefetch = prefetch.max(1);
    let shared = Arc::new(Mutex::new(Inbox {
        queue: VecDeque::new(),
        finished: false,
        waker: None,
        subscription: None,
    }));
    publisher.subscribe(Box::new(InboxSubscriber {
        shared: shared.clone(),
        prefetch,
    }));
    SubscriberStream {
        shared,
        prefetch,
        consumed: 0,
    }
}

struct Inbox<T> {
    queue: VecDeque<Result<T, StreamError>>,
    finished: bool,
    waker: Option<Waker>,
    subscription: Option<Subscription>,
}

struct InboxSubscriber<T> {
    shared: Arc<Mutex<Inbox<T>>>,
    prefetch: i64,
}

impl<T> InboxSubscriber<T> {
    fn push(&self, entry: Option<Result<T, StreamError>>) {
        let waker = {
            let mut inbox = self.shared.lock();
            match entry {
                Some(entry) => inbox.queue.push_back(entry),
                None => inbox.finished = true,
            }
            inbox.waker.take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
    }
}

impl<T: Send + 'static> Subscriber<T> for InboxSubscriber<T> {
    fn on_subscribe(&mut self, subscription: Subscription) {
        self.shared.lock().subscription = Some(subscription.clone());
        subscription.request(self.prefetch);
    }

    fn on_next(&mut self, item: T) {
        self.push(Some(Ok(item)));
    }

    fn on_error(&mut self, error: StreamError) {
        {
            let mut inbox = self.shared.lock();
            inbox.queue.push_back(Err(error));
        }
        self.push(None);
    }

    fn on_complete(&mut self) {
        self.push(None);
    }
}

/// A `Stream` fed by a subscription. Created by [`into_stream`].
pub struct SubscriberStream<T> {
    shared: Arc<Mutex<Inbox<T>>>,
    prefetch: i64,
    consumed: i64,
}

impl<T> Stream for SubscriberStream<T> {
    type Item = Result<T, StreamError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let mut inbox = this.shared.lock();
        match inbox.queue.pop_front() {
            Some(Ok(item)) => {
                this.consumed += 1;
                let refill = if this.consumed >= (this.prefetch / 2).max(1) && !inbox.finished {
                    let n = std::mem::take(&mut this.consumed);
                    inbox.subscription.clone().map(|sub| (sub, n))
                } else {
                    None
                };
                drop(inbox);
                if let Some((sub, n)) = refill {
                    sub.request(n);
                }
                Poll::Ready(Some(Ok(item)))
            }
            Some(Err(err)) => {
                inbox.finished = true;
                inbox.queue.clear();
                Poll::Ready(Some(Err(err)))
            }
            None if inbox.finished => Poll::Ready(None),
            None => {
                inbox.waker = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}

impl<T> Drop for SubscriberStream<T> {
    fn drop(&mut self) {
        let subscription = {
            let mut inbox = self.shared.lock();
            if inbox.finished {
                None
            } else {
                inbox.finished = true;
                inbox.subscription.take()
            }
        };
        if let Some(sub) = subscription {
            sub.cancel();
        }
    }
}
