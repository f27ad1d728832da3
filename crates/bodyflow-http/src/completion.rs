//! Completion signalling for request bodies.
//!
//! A [`CompletionFuture`] resolves exactly once, when the body behind it
//! terminates: successfully after the subscriber has seen `on_complete`,
//! or with the cause after it has seen `on_error`. A consumer `cancel()`
//! resolves it with [`StreamError::Cancelled`].
//!
//! [`CompletionSubscriber`] is the bridge that observes a body on behalf
//! of the future. It sits between the body and the real consumer and
//! forwards every signal untouched.

use std::future::{Future, IntoFuture};
use std::pin::{Pin, pin};
use std::sync::{Arc, OnceLock};

use bodyflow_stream::{StreamError, Subscriber, Subscription, SubscriptionHandle};
use tokio::sync::Notify;

/// Observable state of a [`CompletionFuture`].
#[derive(Debug, Clone)]
pub enum CompletionState {
    Pending,
    Succeeded,
    Failed(StreamError),
}

impl CompletionState {
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }
}

struct CompletionCell {
    outcome: OnceLock<Result<(), StreamError>>,
    notify: Notify,
}

/// Single-resolution outcome of a request body.
///
/// Cheap to clone; every clone observes the same outcome. Await it
/// directly or through [`wait`](Self::wait).
#[derive(Clone)]
pub struct CompletionFuture {
    cell: Arc<CompletionCell>,
}

impl Default for CompletionFuture {
    fn default() -> Self {
        Self::new()
    }
}

impl CompletionFuture {
    pub fn new() -> Self {
        Self {
            cell: Arc::new(CompletionCell {
                outcome: OnceLock::new(),
                notify: Notify::new(),
            }),
        }
    }

    pub fn state(&self) -> CompletionState {
        match self.cell.outcome.get() {
            None => CompletionState::Pending,
            Some(Ok(())) => CompletionState::Succeeded,
            Some(Err(e)) => CompletionState::Failed(e.clone()),
        }
    }

    pub fn is_done(&self) -> bool {
        self.cell.outcome.get().is_some()
    }

    /// Wait for the body to terminate.
    pub async fn wait(&self) -> Result<(), StreamError> {
        loop {
            let mut notified = pin!(self.cell.notify.notified());
            notified.as_mut().enable();
            if let Some(outcome) = self.cell.outcome.get() {
                return outcome.clone();
            }
            notified.await;
        }
    }

    /// Record the outcome. Only the first call has any effect; returns
    /// whether this call was it.
    pub(crate) fn resolve(&self, outcome: Result<(), StreamError>) -> bool {
        let succeeded = outcome.is_ok();
        if self.cell.outcome.set(outcome).is_err() {
            tracing::trace!("completion already resolved");
            return false;
        }
        tracing::debug!(succeeded, "body completion resolved");
        self.cell.notify.notify_waiters();
        true
    }
}

impl std::fmt::Debug for CompletionFuture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionFuture")
            .field("state", &self.state())
            .finish()
    }
}

impl IntoFuture for CompletionFuture {
    type Output = Result<(), StreamError>;
    type IntoFuture = Pin<Box<dyn Future<Output = Self::Output> + Send>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(async move { self.wait().await })
    }
}

/// Forwards a body to `inner` and resolves `completion` once the body
/// terminates.
pub struct CompletionSubscriber<T> {
    inner: Box<dyn Subscriber<T>>,
    completion: CompletionFuture,
}

impl<T: Send + 'static> CompletionSubscriber<T> {
    pub fn new(inner: Box<dyn Subscriber<T>>, completion: CompletionFuture) -> Self {
        Self { inner, completion }
    }
}

impl<T: Send + 'static> Subscriber<T> for CompletionSubscriber<T> {
    fn on_subscribe(&mut self, subscription: Subscription) {
        self.inner.on_subscribe(Subscription::new(CancelResolves {
            upstream: subscription,
            completion: self.completion.clone(),
        }));
    }

    fn on_next(&mut self, item: T) {
        self.inner.on_next(item);
    }

    fn on_error(&mut self, error: StreamError) {
        self.inner.on_error(error.clone());
        self.completion.resolve(Err(error));
    }

    fn on_complete(&mut self) {
        self.inner.on_complete();
        self.completion.resolve(Ok(()));
    }
}

/// The subscription handed to the consumer.
struct CancelResolves {
    upstream: Subscription,
    completion: CompletionFuture,
}

impl SubscriptionHandle for CancelResolves {
    fn request(&self, n: i64) {
        self.upstream.request(n);
    }

    fn cancel(&self) {
        self.upstream.cancel();
        self.completion.resolve(Err(StreamError::Cancelled));
    }
}
