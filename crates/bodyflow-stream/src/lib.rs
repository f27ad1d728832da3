//! Demand-driven streaming messages.
//!
//! A stream here is a single-subscriber sequence of elements delivered
//! under backpressure: the subscriber grants demand with
//! [`Subscription::request`], receives at most that many elements, and
//! then exactly one terminal signal, unless it cancels first.
//!
//! # Realizations
//!
//! - [`FixedStream`] and its variants ([`EmptyFixed`], [`OneElementFixed`],
//!   [`TwoElementFixed`], [`RegularFixed`]) over pre-built elements.
//! - [`PublisherBased`] over an externally implemented [`Publisher`].
//! - [`StreamSource`] over a `futures_core::Stream`.
//! - [`Concat`] over an ordered list of other streams.
//!
//! # Threading
//!
//! Signals may be produced on any thread and `request`/`cancel` may be
//! called from any thread, including from inside a subscriber callback.
//! Delivery to one subscriber is always serialized, and no lock is held
//! while subscriber code runs.
//!
//! ```text
//! producer ──▶ Publisher::subscribe(subscriber)
//!                 │
//!                 ▼
//!           on_subscribe(Subscription) ──▶ request(n) / cancel()
//!                 │
//!                 ▼
//!           on_next × ≤ demand ──▶ on_complete | on_error
//! ```

pub mod adapter;
pub mod bridge;
pub mod concat;
pub mod error;
pub mod fixed;
mod outlet;
pub mod publisher;
pub mod subscription;

#[cfg(test)]
pub(crate) mod testing;

pub use adapter::{DEFAULT_PREFETCH, StreamSource, SubscriberStream, into_stream};
pub use bridge::PublisherBased;
pub use concat::{Concat, concat};
pub use error::{ProtocolViolation, StreamError, StreamResult};
pub use fixed::{EmptyFixed, FixedStream, OneElementFixed, RegularFixed, TwoElementFixed, of};
pub use publisher::{BoxPublisher, Publisher, Subscriber, reject};
pub use subscription::{Subscription, SubscriptionHandle, UNBOUNDED};
