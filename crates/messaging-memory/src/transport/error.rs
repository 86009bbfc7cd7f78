use proven_messaging::TransportError;
use thiserror::Error;

/// Errors that can occur in an in-memory transport.
#[derive(Clone, Debug, Error)]
pub enum Error {
    /// Broker error.
    #[error(transparent)]
    Broker(#[from] crate::broker::Error),

    /// The transport has been shut down.
    #[error("transport is closed")]
    Closed,

    /// The pattern cannot be used as a queue name.
    #[error("invalid pattern `{0}` - must be non-empty and must not contain whitespace, '*', or '>'")]
    InvalidPattern(String),
}

impl TransportError for Error {}
