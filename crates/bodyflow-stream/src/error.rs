//! Stream error types.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// Result type alias for stream operations.
pub type StreamResult<T> = Result<T, StreamError>;

/// A breach of the subscription protocol.
///
/// Violations are surfaced only to the offending subscriber (or logged,
/// when the offender is an upstream source) and never disturb the state
/// of a valid, existing subscription.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolViolation {
    #[error("stream already has a subscriber")]
    DuplicateSubscription,

    #[error("demand must be positive, got {0}")]
    NonPositiveDemand(i64),

    #[error("{0} signal received after the subscription terminated")]
    SignalAfterTerminal(&'static str),

    #[error("source delivered an element without outstanding demand")]
    DemandExceeded,
}

/// The cause carried by an `Error` terminal signal.
///
/// Cloneable so that one failure can reach both the subscriber and any
/// completion future observing the same stream. Upstream causes are
/// shared behind an `Arc` and forwarded verbatim.
#[derive(Clone, Error)]
pub enum StreamError {
    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolViolation),

    #[error("upstream failure: {0}")]
    Upstream(Arc<dyn std::error::Error + Send + Sync>),

    #[error("stream was cancelled")]
    Cancelled,
}

impl StreamError {
    /// Wrap an error raised by a source as an upstream failure.
    pub fn upstream(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Upstream(Arc::new(err))
    }

    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, Self::Protocol(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// The protocol violation behind this error, if any.
    pub fn violation(&self) -> Option<&ProtocolViolation> {
        match self {
            Self::Protocol(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Debug for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Protocol(v) => f.debug_tuple("Protocol").field(v).finish(),
            Self::Upstream(e) => f.debug_tuple("Upstream").field(&e.to_string()).finish(),
            Self::Cancelled => f.write_str("Cancelled"),
        }
    }
}
