//! Error types for the RPC queue.

use crate::envelope::RemoteError;

use std::error::Error as StdError;
use std::sync::Arc;
use std::time::Duration;

use proven_messaging::DeliveryHandlerError;
use thiserror::Error;

/// Result type alias for queue operations.
pub type Result<T> = std::result::Result<T, Error>;

/// A shareable, type-erased error coming from the transport or the codec.
pub type BoxError = Arc<dyn StdError + Send + Sync + 'static>;

/// Main error type for queue operations.
///
/// Cloneable so a single reply-channel setup failure can be handed to every
/// request waiting on it.
#[derive(Clone, Debug, Error)]
pub enum Error {
    /// The reply channel could not be established.
    #[error("failed to set up reply channel: {0}")]
    Setup(#[source] BoxError),

    /// The transport failed to send the request.
    #[error("failed to publish request: {0}")]
    Publish(#[source] BoxError),

    /// No reply arrived within the configured window.
    #[error("request timed out")]
    Timeout {
        /// How long the request waited.
        after: Duration,
    },

    /// The remote handler reported a failure.
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// A payload could not be serialized.
    #[error("failed to serialize payload: {0}")]
    Serialize(#[source] BoxError),

    /// A payload could not be deserialized.
    #[error("failed to deserialize payload: {0}")]
    Deserialize(#[source] BoxError),

    /// Subscribing a request handler failed.
    #[error("failed to subscribe to `{pattern}`: {source}")]
    Subscribe {
        /// The pattern that could not be subscribed.
        pattern: String,
        /// The underlying transport error.
        #[source]
        source: BoxError,
    },

    /// The transport failed to shut down.
    #[error("failed to shut down transport: {0}")]
    Shutdown(#[source] BoxError),

    /// The transport reported a fault not tied to any request.
    #[error("transport fault: {0}")]
    Transport(#[source] BoxError),

    /// The queue was closed before the request could complete.
    #[error("queue is closed")]
    Closed,

    /// The request was abandoned before an outcome was recorded.
    #[error("request abandoned before completion")]
    Abandoned,
}

impl DeliveryHandlerError for Error {}

impl Error {
    pub(crate) fn setup<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::Setup(Arc::new(error))
    }

    pub(crate) fn publish<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::Publish(Arc::new(error))
    }

    pub(crate) fn serialize(error: serde_json::Error) -> Self {
        Self::Serialize(Arc::new(error))
    }

    pub(crate) fn deserialize(error: serde_json::Error) -> Self {
        Self::Deserialize(Arc::new(error))
    }

    /// Returns `true` if the request timed out.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Returns the remote error if the handler reported one.
    #[must_use]
    pub const fn as_remote(&self) -> Option<&RemoteError> {
        match self {
            Self::Remote(remote) => Some(remote),
            _ => None,
        }
    }
}
