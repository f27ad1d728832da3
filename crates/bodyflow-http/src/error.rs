//! Request body error types.

use bodyflow_stream::StreamError;
use thiserror::Error;

/// Errors surfaced while consuming a request body.
#[derive(Debug, Clone, Error)]
pub enum BodyError {
    #[error("body stream failed: {0}")]
    Stream(#[from] StreamError),

    #[error("body exceeds the maximum content length of {limit} bytes")]
    TooLarge { limit: usize },

    #[error("body ended without a terminal signal")]
    Abandoned,
}

pub type BodyResult<T> = Result<T, BodyError>;
