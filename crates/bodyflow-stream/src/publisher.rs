//! The demand-driven stream contract.
//!
//! A [`Publisher`] accepts exactly one [`Subscriber`] for its lifetime.
//! The subscriber first receives a [`Subscription`] through
//! [`Subscriber::on_subscribe`], then at most as many
//! [`on_next`](Subscriber::on_next) calls as it has requested, then at
//! most one terminal signal: [`on_complete`](Subscriber::on_complete) or
//! [`on_error`](Subscriber::on_error). Cancelling the subscription is
//! the third way a subscription ends; it delivers nothing back.
//!
//! Signals to one subscriber never overlap, even when they are produced
//! on different threads.

use std::sync::Arc;

use crate::error::{ProtocolViolation, StreamError};
use crate::subscription::Subscription;

/// Receives the signals of one subscription.
pub trait Subscriber<T>: Send + 'static {
    fn on_subscribe(&mut self, subscription: Subscription);

    fn on_next(&mut self, item: T);

    fn on_error(&mut self, error: StreamError);

    fn on_complete(&mut self);
}

/// A lazily produced, single-subscriber sequence of elements.
pub trait Publisher<T>: Send + Sync {
    /// Attach `subscriber`.
    ///
    /// A publisher that already has a subscriber rejects the newcomer
    /// with `on_subscribe` followed by a
    /// [`DuplicateSubscription`](ProtocolViolation::DuplicateSubscription)
    /// error. The existing subscription is unaffected.
    fn subscribe(&self, subscriber: Box<dyn Subscriber<T>>);

    /// Erase the concrete publisher type.
    fn boxed(self) -> BoxPublisher<T>
    where
        Self: Sized + 'static,
    {
        Box::new(self)
    }
}

/// A type-erased publisher.
pub type BoxPublisher<T> = Box<dyn Publisher<T>>;

impl<T, P: Publisher<T> + ?Sized> Publisher<T> for Box<P> {
    fn subscribe(&self, subscriber: Box<dyn Subscriber<T>>) {
        (**self).subscribe(subscriber);
    }
}

impl<T, P: Publisher<T> + ?Sized> Publisher<T> for Arc<P> {
    fn subscribe(&self, subscriber: Box<dyn Subscriber<T>>) {
        (**self).subscribe(subscriber);
    }
}

/// Turn away a subscriber that arrived after the publisher's single
/// subscription was taken.
pub(crate) fn reject_duplicate<T: 'static>(subscriber: Box<dyn Subscriber<T>>) {
    tracing::debug!("rejecting duplicate subscription");
    reject(subscriber, ProtocolViolation::DuplicateSubscription.into());
}

/// Deliver `on_subscribe` with an inert subscription, then `error`.
pub fn reject<T: 'static>(mut subscriber: Box<dyn Subscriber<T>>, error: StreamError) {
    subscriber.on_subscribe(Subscription::noop());
    subscriber.on_error(error);
}
