//! Request entities with streaming bodies.
//!
//! A [`Request`] pairs [`RequestHeaders`] with a body built on
//! `bodyflow-stream`. The body is consumed by exactly one subscriber,
//! typically a transport writing it out, and the request's
//! [`CompletionFuture`] reports when that consumption has finished.
//!
//! ```text
//! Request::subscribe(transport)
//!     │
//!     ▼
//! body ──▶ CompletionSubscriber ──▶ transport
//!               │
//!               └──▶ CompletionFuture (resolved after the terminal signal)
//! ```

pub mod completion;
pub mod config;
pub mod error;
pub mod header;
pub mod request;

pub use completion::{CompletionFuture, CompletionState, CompletionSubscriber};
pub use config::BodyConfig;
pub use error::{BodyError, BodyResult};
pub use header::{Header, RequestHeaders};
pub use request::Request;
