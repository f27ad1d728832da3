//! Bridge for externally implemented publishers.
//!
//! [`PublisherBased`] wraps a publisher that lives outside this crate so
//! that callers see the same single-subscriber contract as every other
//! realization. Calls and signals pass through unchanged; the bridge only
//! polices the boundary: one subscriber, positive demand, no elements
//! beyond demand, nothing after a terminal signal.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{ProtocolViolation, StreamError};
use crate::outlet::Outlet;
use crate::publisher::{BoxPublisher, Publisher, Subscriber, reject_duplicate};
use crate::subscription::{Subscription, SubscriptionHandle, add_demand, consume_demand};

/// A publisher backed by an opaque, externally owned source.
pub struct PublisherBased<T> {
    source: Mutex<Option<BoxPublisher<T>>>,
}

impl<T: Send + 'static> PublisherBased<T> {
    pub fn new(source: impl Publisher<T> + 'static) -> Self {
        Self {
            source: Mutex::new(Some(Box::new(source))),
        }
    }
}

impl<T: Send + 'static> Publisher<T> for PublisherBased<T> {
    fn subscribe(&self, subscriber: Box<dyn Subscriber<T>>) {
        let Some(source) = self.source.lock().take() else {
            reject_duplicate(subscriber);
            return;
        };
        let link = Arc::new(Link {
            state: Mutex::new(LinkState {
                upstream: None,
                source: None,
                demand: 0,
                done: false,
            }),
            outlet: Outlet::new(subscriber),
        });
        source.subscribe(Box::new(LinkSubscriber { link: link.clone() }));

        // Keep the source alive for as long as the subscription runs.
        let mut state = link.state.lock();
        if !state.done {
            state.source = Some(source);
        }
    }
}

struct LinkState<T> {
    upstream: Option<Subscription>,
    source: Option<BoxPublisher<T>>,
    /// Outstanding demand granted by the downstream subscriber.
    demand: i64,
    done: bool,
}

impl<T> LinkState<T> {
    /// Mark the link finished and hand back what must be released
    /// outside the lock.
    fn finish(&mut self) -> (Option<Subscription>, Option<BoxPublisher<T>>) {
        self.done = true;
        (self.upstream.take(), self.source.take())
    }
}

struct Link<T> {
    state: Mutex<LinkState<T>>,
    outlet: Outlet<T>,
}

impl<T: Send + 'static> Link<T> {
    fn request(&self, n: i64) {
        if n <= 0 {
            let released = {
                let mut state = self.state.lock();
                if state.done {
                    return;
                }
                state.finish()
            };
            if let (Some(up), _) = &released {
                up.cancel();
            }
            self.outlet.error(ProtocolViolation::NonPositiveDemand(n).into());
            return;
        }
        let upstream = {
            let mut state = self.state.lock();
            if state.done {
                return;
            }
            state.demand = add_demand(state.demand, n);
            state.upstream.clone()
        };
        if let Some(up) = upstream {
            up.request(n);
        }
    }

    fn cancel(&self) {
        let released = {
            let mut state = self.state.lock();
            if state.done {
                None
            } else {
                Some(state.finish())
            }
        };
        if let Some((Some(up), _)) = &released {
            up.cancel();
        }
        self.outlet.cancel();
    }
}

struct LinkHandle<T>(Arc<Link<T>>);

impl<T: Send + 'static> SubscriptionHandle for LinkHandle<T> {
    fn request(&self, n: i64) {
        self.0.request(n);
    }

    fn cancel(&self) {
        self.0.cancel();
    }
}

/// Subscribed to the external source; forwards into the link's outlet.
struct LinkSubscriber<T> {
    link: Arc<Link<T>>,
}

impl<T: Send + 'static> LinkSubscriber<T> {
    /// The downstream subscriber must see `on_subscribe` before a terminal
    /// signal, even when the source skipped its own.
    fn subscribe_if_missing(&self, unsubscribed: bool) {
        if unsubscribed {
            tracing::warn!("source terminated without on_subscribe");
            self.link.outlet.subscribe(Subscription::noop());
        }
    }
}

impl<T: Send + 'static> Subscriber<T> for LinkSubscriber<T> {
    fn on_subscribe(&mut self, subscription: Subscription) {
        {
            let mut state = self.link.state.lock();
            if state.done || state.upstream.is_some() {
                drop(state);
                tracing::warn!(
                    "source signalled on_subscribe twice, cancelling the extra subscription"
                );
                subscription.cancel();
                return;
            }
            state.upstream = Some(subscription);
        }
        tracing::debug!("external source subscribed");
        self.link
            .outlet
            .subscribe(Subscription::new(LinkHandle(self.link.clone())));
    }

    fn on_next(&mut self, item: T) {
        let overflow = {
            let mut state = self.link.state.lock();
            if state.done {
                tracing::warn!(
                    violation = %ProtocolViolation::SignalAfterTerminal("next"),
                    "dropping element from external source"
                );
                return;
            }
            if state.demand == 0 {
                let unsubscribed = state.upstream.is_none();
                Some((state.finish(), unsubscribed))
            } else {
                state.demand = consume_demand(state.demand);
                None
            }
        };
        match overflow {
            None => {
                self.link.outlet.next(item);
            }
            Some(((upstream, _source), unsubscribed)) => {
                tracing::warn!("external source exceeded outstanding demand");
                if let Some(up) = upstream {
                    up.cancel();
                }
                self.subscribe_if_missing(unsubscribed);
                self.link
                    .outlet
                    .error(ProtocolViolation::DemandExceeded.into());
            }
        }
    }

    fn on_error(&mut self, error: StreamError) {
        let released = {
            let mut state = self.link.state.lock();
            if state.done {
                tracing::warn!(
                    violation = %ProtocolViolation::SignalAfterTerminal("error"),
                    "dropping error from external source"
                );
                return;
            }
            let unsubscribed = state.upstream.is_none();
            (state.finish(), unsubscribed)
        };
        drop(released.0);
        self.subscribe_if_missing(released.1);
        self.link.outlet.error(error);
    }

    fn on_complete(&mut self) {
        let released = {
            let mut state = self.link.state.lock();
            if state.done {
                tracing::warn!(
                    violation = %ProtocolViolation::SignalAfterTerminal("complete"),
                    "dropping completion from external source"
                );
                return;
            }
            let unsubscribed = state.upstream.is_none();
            (state.finish(), unsubscribed)
        };
        drop(released.0);
        self.subscribe_if_missing(released.1);
        self.link.outlet.complete();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixed::{RegularFixed, of};
    use crate::testing::{Event, Recorder};
    use crate::subscription::UNBOUNDED;

    /// A hand-written source that ignores demand entirely and keeps
    /// signalling after completion.
    struct Firehose {
        items: Vec<u32>,
    }

    impl Publisher<u32> for Firehose {
        fn subscribe(&self, mut subscriber: Box<dyn Subscriber<u32>>) {
            subscriber.on_subscribe(Subscription::noop());
            for item in self.items.iter().copied() {
                subscriber.on_next(item);
            }
            subscriber.on_complete();
            subscriber.on_complete();
        }
    }

    #[test]
    fn forwards_elements_and_completion_unchanged() {
        let recorder = Recorder::new();
        PublisherBased::new(RegularFixed::new(vec![1u32, 2, 3])).subscribe(recorder.subscriber());

        recorder.request(2);
        assert_eq!(recorder.items(), vec![1, 2]);
        recorder.request(1);
        assert_eq!(
            recorder.events(),
            vec![
                Event::Subscribed,
                Event::Next(1),
                Event::Next(2),
                Event::Next(3),
                Event::Complete
            ]
        );
    }

    #[test]
    fn matches_the_wrapped_fixed_stream() {
        let direct = Recorder::new();
        of(vec![10u32, 20, 30]).subscribe(direct.subscriber());
        direct.request(UNBOUNDED);

        let bridged = Recorder::new();
        PublisherBased::new(of(vec![10u32, 20, 30])).subscribe(bridged.subscriber());
        bridged.request(UNBOUNDED);

        assert_eq!(direct.events(), bridged.events());
    }

    #[test]
    fn enforces_single_subscription_at_its_own_boundary() {
        let bridge = PublisherBased::new(of(vec![1u32]));
        let first = Recorder::new();
        let second = Recorder::new();

        bridge.subscribe(first.subscriber());
        bridge.subscribe(second.subscriber());
        first.request(1);

        assert_eq!(first.items(), vec![1]);
        assert_eq!(first.completions(), 1);
        assert_eq!(second.errors().len(), 1);
        assert!(second.errors()[0].contains("already has a subscriber"));
    }

    #[test]
    fn rejects_non_positive_demand_locally() {
        let recorder = Recorder::new();
        PublisherBased::new(of(vec![1u32, 2])).subscribe(recorder.subscriber());

        recorder.request(0);
        recorder.request(1);

        assert!(recorder.items().is_empty());
        assert_eq!(
            recorder.errors(),
            vec![StreamError::from(ProtocolViolation::NonPositiveDemand(0)).to_string()]
        );
    }

    #[test]
    fn source_exceeding_demand_is_cut_off() {
        let recorder = Recorder::new();
        PublisherBased::new(Firehose {
            items: vec![1, 2, 3],
        })
        .subscribe(recorder.subscriber());

        assert_eq!(
            recorder.events(),
            vec![
                Event::Subscribed,
                Event::Error(StreamError::from(ProtocolViolation::DemandExceeded).to_string())
            ]
        );
    }

    /// Terminates straight away without ever calling `on_subscribe`.
    enum Abrupt {
        Complete,
        Fail,
        Push,
    }

    impl Publisher<u32> for Abrupt {
        fn subscribe(&self, mut subscriber: Box<dyn Subscriber<u32>>) {
            match self {
                Abrupt::Complete => subscriber.on_complete(),
                Abrupt::Fail => subscriber.on_error(StreamError::Cancelled),
                Abrupt::Push => subscriber.on_next(7),
            }
        }
    }

    #[test]
    fn on_subscribe_precedes_terminal_from_a_source_that_skipped_it() {
        let completed = Recorder::new();
        PublisherBased::new(Abrupt::Complete).subscribe(completed.subscriber());
        assert_eq!(completed.events(), vec![Event::Subscribed, Event::Complete]);

        let failed = Recorder::new();
        PublisherBased::new(Abrupt::Fail).subscribe(failed.subscriber());
        assert_eq!(
            failed.events(),
            vec![
                Event::Subscribed,
                Event::Error(StreamError::Cancelled.to_string())
            ]
        );

        let pushed = Recorder::new();
        PublisherBased::new(Abrupt::Push).subscribe(pushed.subscriber());
        assert_eq!(
            pushed.events(),
            vec![
                Event::Subscribed,
                Event::Error(StreamError::from(ProtocolViolation::DemandExceeded).to_string())
            ]
        );
    }

    #[test]
    fn cancel_reaches_the_source() {
        let recorder = Recorder::new();
        PublisherBased::new(of(vec![1u32, 2, 3])).subscribe(recorder.subscriber());

        recorder.request(1);
        recorder.cancel();
        recorder.request(5);

        assert_eq!(recorder.items(), vec![1]);
        assert!(!recorder.is_terminated());
    }
}
