//! Recording subscriber shared by the unit tests.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::StreamError;
use crate::publisher::Subscriber;
use crate::subscription::Subscription;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Event {
    Subscribed,
    Next(u32),
    Error(String),
    Complete,
}

#[derive(Default)]
struct RecorderState {
    events: Vec<Event>,
    subscription: Option<Subscription>,
}

/// Records every signal and exposes the subscription it was handed.
#[derive(Clone, Default)]
pub(crate) struct Recorder {
    state: Arc<Mutex<RecorderState>>,
    request_on_next: i64,
}

impl Recorder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Request `n` more from inside every `on_next`.
    pub(crate) fn request_on_next(mut self, n: i64) -> Self {
        self.request_on_next = n;
        self
    }

    pub(crate) fn subscriber(&self) -> Box<dyn Subscriber<u32>> {
        Box::new(self.clone())
    }

    fn subscription(&self) -> Option<Subscription> {
        self.state.lock().subscription.clone()
    }

    pub(crate) fn request(&self, n: i64) {
        if let Some(sub) = self.subscription() {
            sub.request(n);
        }
    }

    pub(crate) fn cancel(&self) {
        if let Some(sub) = self.subscription() {
            sub.cancel();
        }
    }

    pub(crate) fn events(&self) -> Vec<Event> {
        self.state.lock().events.clone()
    }

    pub(crate) fn items(&self) -> Vec<u32> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Next(v) => Some(v),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn errors(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Error(msg) => Some(msg),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn completions(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, Event::Complete))
            .count()
    }

    pub(crate) fn is_terminated(&self) -> bool {
        self.events()
            .iter()
            .any(|e| matches!(e, Event::Complete | Event::Error(_)))
    }
}

impl Subscriber<u32> for Recorder {
    fn on_subscribe(&mut self, subscription: Subscription) {
        let mut state = self.state.lock();
        state.events.push(Event::Subscribed);
        state.subscription = Some(subscription);
    }

    fn on_next(&mut self, item: u32) {
        let sub = {
            let mut state = self.state.lock();
            state.events.push(Event::Next(item));
            state.subscription.clone()
        };
        if self.request_on_next > 0 {
            if let Some(sub) = sub {
                sub.request(self.request_on_next);
            }
        }
    }

    fn on_error(&mut self, error: StreamError) {
        self.state.lock().events.push(Event::Error(error.to_string()));
    }

    fn on_complete(&mut self) {
        self.state.lock().events.push(Event::Complete);
    }
}
