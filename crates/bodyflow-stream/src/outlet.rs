//! Serialized signal delivery to a single subscriber.
//!
//! Every realization owns one [`Outlet`] per subscription and routes all
//! downstream signals through it. Whichever caller finds the outlet idle
//! becomes the emitter and drains the queue; callers that arrive while a
//! delivery is in progress (another thread, or the subscriber re-entering
//! through `request` from inside `on_next`) only enqueue. No lock is held
//! while the subscriber runs.

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::error::StreamError;
use crate::publisher::Subscriber;
use crate::subscription::Subscription;

enum Signal<T> {
    Subscribe(Subscription),
    Next(T),
    Error(StreamError),
    Complete,
}

impl<T> Signal<T> {
    fn is_terminal(&self) -> bool {
        matches!(self, Signal::Error(_) | Signal::Complete)
    }

    fn name(&self) -> &'static str {
        match self {
            Signal::Subscribe(_) => "subscribe",
            Signal::Next(_) => "next",
            Signal::Error(_) => "error",
            Signal::Complete => "complete",
        }
    }
}

struct OutletState<T> {
    /// `None` while an emitter is running the subscriber, and after release.
    subscriber: Option<Box<dyn Subscriber<T>>>,
    queue: VecDeque<Signal<T>>,
    emitting: bool,
    /// A terminal signal has been accepted, or the subscription was cancelled.
    closed: bool,
    cancelled: bool,
}

pub(crate) struct Outlet<T> {
    state: Mutex<OutletState<T>>,
}

impl<T: Send + 'static> Outlet<T> {
    pub(crate) fn new(subscriber: Box<dyn Subscriber<T>>) -> Self {
        Self {
            state: Mutex::new(OutletState {
                subscriber: Some(subscriber),
                queue: VecDeque::new(),
                emitting: false,
                closed: false,
                cancelled: false,
            }),
        }
    }

    pub(crate) fn subscribe(&self, subscription: Subscription) -> bool {
        self.emit(Signal::Subscribe(subscription))
    }

    pub(crate) fn next(&self, item: T) -> bool {
        self.emit(Signal::Next(item))
    }

    pub(crate) fn error(&self, error: StreamError) -> bool {
        self.emit(Signal::Error(error))
    }

    pub(crate) fn complete(&self) -> bool {
        self.emit(Signal::Complete)
    }

    /// Discard undelivered signals and release the subscriber.
    ///
    /// A delivery already in progress finishes; nothing is delivered
    /// after it.
    pub(crate) fn cancel(&self) {
        let released = {
            let mut state = self.state.lock();
            if state.cancelled {
                return;
            }
            state.cancelled = true;
            state.closed = true;
            state.queue.clear();
            state.subscriber.take()
        };
        drop(released);
    }

    /// Returns `false` when the signal was dropped because the outlet is
    /// already closed.
    fn emit(&self, signal: Signal<T>) -> bool {
        let mut state = self.state.lock();
        if state.closed {
            tracing::trace!(signal = signal.name(), "dropping signal on closed outlet");
            return false;
        }
        if signal.is_terminal() {
            state.closed = true;
        }
        state.queue.push_back(signal);
        if state.emitting {
            return true;
        }
        let Some(mut subscriber) = state.subscriber.take() else {
            state.queue.clear();
            return true;
        };
        state.emitting = true;

        loop {
            let Some(signal) = state.queue.pop_front() else {
                state.subscriber = Some(subscriber);
                state.emitting = false;
                return true;
            };
            drop(state);

            let terminal = signal.is_terminal();
            match signal {
                Signal::Subscribe(subscription) => subscriber.on_subscribe(subscription),
                Signal::Next(item) => subscriber.on_next(item),
                Signal::Error(error) => subscriber.on_error(error),
                Signal::Complete => subscriber.on_complete(),
            }

            state = self.state.lock();
            if terminal || state.cancelled {
                state.queue.clear();
                state.emitting = false;
                drop(state);
                drop(subscriber);
                return true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        Subscribed,
        Next(u32),
        Error(String),
        Complete,
    }

    struct Recorder {
        events: Arc<Mutex<Vec<Event>>>,
        on_next: Option<Box<dyn FnMut(u32) + Send>>,
    }

    impl Subscriber<u32> for Recorder {
        fn on_subscribe(&mut self, _subscription: Subscription) {
            self.events.lock().push(Event::Subscribed);
        }

        fn on_next(&mut self, item: u32) {
            self.events.lock().push(Event::Next(item));
            if let Some(hook) = self.on_next.as_mut() {
                hook(item);
            }
        }

        fn on_error(&mut self, error: StreamError) {
            self.events.lock().push(Event::Error(error.to_string()));
        }

        fn on_complete(&mut self) {
            self.events.lock().push(Event::Complete);
        }
    }

    fn recorder() -> (Box<Recorder>, Arc<Mutex<Vec<Event>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let rec = Recorder {
            events: events.clone(),
            on_next: None,
        };
        (Box::new(rec), events)
    }

    #[test]
    fn delivers_in_order_and_drops_after_terminal() {
        let (rec, events) = recorder();
        let outlet = Outlet::new(rec);

        assert!(outlet.subscribe(Subscription::noop()));
        assert!(outlet.next(1));
        assert!(outlet.complete());
        assert!(!outlet.next(2));
        assert!(!outlet.error(StreamError::Cancelled));

        assert_eq!(
            *events.lock(),
            vec![Event::Subscribed, Event::Next(1), Event::Complete]
        );
    }

    #[test]
    fn reentrant_emission_is_queued_not_nested() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let outlet: Arc<Outlet<u32>> = Arc::new_cyclic(|weak: &std::sync::Weak<Outlet<u32>>| {
            let weak = weak.clone();
            let hook = move |item: u32| {
                if let Some(outlet) = weak.upgrade() {
                    if item < 3 {
                        outlet.next(item + 1);
                    }
                }
            };
            Outlet::new(Box::new(Recorder {
                events: events.clone(),
                on_next: Some(Box::new(hook)),
            }))
        });

        outlet.next(1);
        outlet.complete();

        assert_eq!(
            *events.lock(),
            vec![Event::Next(1), Event::Next(2), Event::Next(3), Event::Complete]
        );
    }

    #[test]
    fn cancel_releases_subscriber_and_drops_later_signals() {
        let (rec, events) = recorder();
        let outlet = Outlet::new(rec);

        outlet.subscribe(Subscription::noop());
        outlet.cancel();
        outlet.cancel();

        assert!(!outlet.next(1));
        assert!(!outlet.complete());
        assert_eq!(*events.lock(), vec![Event::Subscribed]);
    }

    #[test]
    fn concurrent_emitters_never_overlap() {
        let (rec, events) = recorder();
        let outlet = Arc::new(Outlet::new(rec));
        outlet.subscribe(Subscription::noop());

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let outlet = outlet.clone();
                std::thread::spawn(move || {
                    for i in 0..250 {
                        outlet.next(t * 1000 + i);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        outlet.complete();

        let events = events.lock();
        assert_eq!(events.len(), 1 + 1000 + 1);
        assert_eq!(events.last(), Some(&Event::Complete));
        // Per-thread order is preserved.
        for t in 0..4u32 {
            let seen: Vec<u32> = events
                .iter()
                .filter_map(|e| match e {
                    Event::Next(v) if v / 1000 == t => Some(*v),
                    _ => None,
                })
                .collect();
            assert_eq!(seen, (0..250).map(|i| t * 1000 + i).collect::<Vec<_>>());
        }
    }
}
