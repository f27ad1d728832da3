//! Request entity with a single-subscriber streaming body.
//!
//! A [`Request`] hands its body to one subscriber and reports through its
//! [`CompletionFuture`] when that subscriber has seen the end of it. A
//! request that is aborted, or dropped before anything subscribed,
//! resolves the future with [`StreamError::Cancelled`].

use std::sync::Arc;

use bodyflow_stream::{
    BoxPublisher, EmptyFixed, FixedStream, OneElementFixed, ProtocolViolation, Publisher,
    PublisherBased, StreamError, StreamSource, Subscriber, SubscriberStream, Subscription,
    UNBOUNDED, into_stream, reject,
};
use bytes::{Bytes, BytesMut};
use futures_core::Stream;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::completion::{CompletionFuture, CompletionSubscriber};
use crate::config::BodyConfig;
use crate::error::{BodyError, BodyResult};
use crate::header::RequestHeaders;

#[derive(Default)]
struct RequestState {
    subscribed: bool,
    aborted: bool,
    /// Upstream side of the body subscription, once it is established.
    active: Option<Subscription>,
}

/// An HTTP request whose body is a demand-driven stream of chunks.
///
/// The body may be subscribed to once. The subscriber is observed by the
/// request's [`CompletionFuture`], which resolves when the body has been
/// fully consumed, has failed, or was cancelled. A transport typically
/// drains the body and waits on [`completion`](Request::completion) before
/// it treats the request as finished.
pub struct Request {
    headers: RequestHeaders,
    body: BoxPublisher<Bytes>,
    completion: CompletionFuture,
    state: Arc<Mutex<RequestState>>,
}

impl Request {
    pub fn new(headers: RequestHeaders, body: BoxPublisher<Bytes>) -> Self {
        Self {
            headers,
            body,
            completion: CompletionFuture::new(),
            state: Arc::new(Mutex::new(RequestState::default())),
        }
    }

    /// Create a request with a body of pre-built chunks.
    ///
    /// The fixed realization is chosen by chunk count.
    pub fn fixed(headers: RequestHeaders, chunks: Vec<Bytes>) -> Self {
        Self::new(headers, FixedStream::from_vec(chunks).boxed())
    }

    /// Create a request with a single-chunk body.
    pub fn of(headers: RequestHeaders, chunk: impl Into<Bytes>) -> Self {
        Self::new(headers, OneElementFixed::new(chunk.into()).boxed())
    }

    /// Create a request with an empty body.
    pub fn empty(headers: RequestHeaders) -> Self {
        Self::new(headers, EmptyFixed::new().boxed())
    }

    /// Create a request whose body is produced by an external publisher.
    pub fn from_publisher(
        headers: RequestHeaders,
        publisher: impl Publisher<Bytes> + 'static,
    ) -> Self {
        Self::new(headers, PublisherBased::new(publisher).boxed())
    }

    /// Create a request whose body is read from a fallible chunk stream.
    pub fn from_stream<S, E>(headers: RequestHeaders, stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::new(headers, StreamSource::new(stream).boxed())
    }

    /// Create a request whose body is `bodies` played back to back.
    pub fn concat<I>(headers: RequestHeaders, bodies: I) -> Self
    where
        I: IntoIterator<Item = BoxPublisher<Bytes>>,
    {
        Self::new(headers, bodyflow_stream::concat(bodies).boxed())
    }

    pub fn headers(&self) -> &RequestHeaders {
        &self.headers
    }

    pub fn method(&self) -> &str {
        self.headers.method()
    }

    pub fn path(&self) -> &str {
        self.headers.path()
    }

    /// The future that resolves when the body terminates.
    pub fn completion(&self) -> CompletionFuture {
        self.completion.clone()
    }

    /// Abandon the body.
    ///
    /// Cancels the body subscription if there is one, resolves the
    /// completion future with [`StreamError::Cancelled`] unless it already
    /// resolved, and turns away any later subscriber with the same error.
    pub fn abort(&self) {
        let active = {
            let mut state = self.state.lock();
            if state.aborted {
                return;
            }
            state.aborted = true;
            state.active.take()
        };
        tracing::debug!(method = self.method(), path = self.path(), "aborting request body");
        if let Some(subscription) = active {
            subscription.cancel();
        }
        self.completion.resolve(Err(StreamError::Cancelled));
    }

    /// Consume the body as a `Stream` of chunks.
    pub fn body_stream(&self, prefetch: i64) -> SubscriberStream<Bytes> {
        into_stream(self, prefetch)
    }

    /// Drain the whole body into one buffer.
    ///
    /// Demand follows `config.request_batch` (everything at once when
    /// unset). When the body grows past `config.max_content_length` it is
    /// cancelled and [`BodyError::TooLarge`] is returned.
    pub async fn aggregate(&self, config: &BodyConfig) -> BodyResult<Bytes> {
        let (tx, rx) = oneshot::channel();
        self.subscribe(Box::new(Aggregator {
            batch: config.request_batch.map(|b| i64::from(b.get())),
            limit: config.max_content_length,
            outstanding: 0,
            chunks: Vec::new(),
            len: 0,
            subscription: None,
            reply: Some(tx),
        }));
        rx.await.unwrap_or(Err(BodyError::Abandoned))
    }
}

impl Drop for Request {
    fn drop(&mut self) {
        // A subscribed body runs on without the request and resolves the
        // future itself.
        if !self.state.lock().subscribed {
            self.completion.resolve(Err(StreamError::Cancelled));
        }
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("headers", &self.headers)
            .field("completion", &self.completion)
            .finish_non_exhaustive()
    }
}

impl Publisher<Bytes> for Request {
    fn subscribe(&self, subscriber: Box<dyn Subscriber<Bytes>>) {
        {
            let mut state = self.state.lock();
            if state.aborted {
                drop(state);
                reject(subscriber, StreamError::Cancelled);
                return;
            }
            if state.subscribed {
                drop(state);
                tracing::debug!(path = self.path(), "request body already subscribed");
                reject(subscriber, ProtocolViolation::DuplicateSubscription.into());
                return;
            }
            state.subscribed = true;
        }
        tracing::debug!(method = self.method(), path = self.path(), "subscribing to request body");
        self.body.subscribe(Box::new(Tracked {
            state: self.state.clone(),
            inner: CompletionSubscriber::new(subscriber, self.completion.clone()),
        }));
    }
}

/// Records the body subscription so [`Request::abort`] can reach it.
struct Tracked {
    state: Arc<Mutex<RequestState>>,
    inner: CompletionSubscriber<Bytes>,
}

impl Tracked {
    fn release(&self) {
        self.state.lock().active = None;
    }
}

impl Subscriber<Bytes> for Tracked {
    fn on_subscribe(&mut self, subscription: Subscription) {
        let aborted = {
            let mut state = self.state.lock();
            if !state.aborted {
                state.active = Some(subscription.clone());
            }
            state.aborted
        };
        if aborted {
            subscription.cancel();
        }
        self.inner.on_subscribe(subscription);
    }

    fn on_next(&mut self, chunk: Bytes) {
        tracing::trace!(len = chunk.len(), "request body chunk");
        self.inner.on_next(chunk);
    }

    fn on_error(&mut self, error: StreamError) {
        self.release();
        self.inner.on_error(error);
    }

    fn on_complete(&mut self) {
        self.release();
        self.inner.on_complete();
    }
}

/// Collects body chunks for [`Request::aggregate`].
struct Aggregator {
    batch: Option<i64>,
    limit: Option<usize>,
    /// Elements left in the current batch.
    outstanding: i64,
    chunks: Vec<Bytes>,
    len: usize,
    subscription: Option<Subscription>,
    reply: Option<oneshot::Sender<BodyResult<Bytes>>>,
}

impl Aggregator {
    fn finish(&mut self, result: BodyResult<Bytes>) {
        if let Some(reply) = self.reply.take() {
            // The caller may have stopped waiting.
            let _ = reply.send(result);
        }
    }

    fn joined(&mut self) -> Bytes {
        let mut chunks = std::mem::take(&mut self.chunks);
        if chunks.len() == 1 {
            return chunks.pop().unwrap_or_default();
        }
        let mut buf = BytesMut::with_capacity(self.len);
        for chunk in chunks {
            buf.extend_from_slice(&chunk);
        }
        buf.freeze()
    }
}

impl Subscriber<Bytes> for Aggregator {
    fn on_subscribe(&mut self, subscription: Subscription) {
        let demand = self.batch.unwrap_or(UNBOUNDED);
        self.outstanding = demand;
        self.subscription = Some(subscription.clone());
        subscription.request(demand);
    }

    fn on_next(&mut self, chunk: Bytes) {
        if self.reply.is_none() {
            return;
        }
        self.len += chunk.len();
        if let Some(limit) = self.limit {
            if self.len > limit {
                tracing::warn!(limit, received = self.len, "request body too large");
                if let Some(subscription) = self.subscription.take() {
                    subscription.cancel();
                }
                self.chunks.clear();
                self.finish(Err(BodyError::TooLarge { limit }));
                return;
            }
        }
        self.chunks.push(chunk);

        if let Some(batch) = self.batch {
            self.outstanding -= 1;
            if self.outstanding == 0 {
                self.outstanding = batch;
                if let Some(subscription) = &self.subscription {
                    subscription.request(batch);
                }
            }
        }
    }

    fn on_error(&mut self, error: StreamError) {
        self.chunks.clear();
        self.finish(Err(error.into()));
    }

    fn on_complete(&mut self) {
        let body = self.joined();
        tracing::debug!(len = body.len(), "request body aggregated");
        self.finish(Ok(body));
    }
}
