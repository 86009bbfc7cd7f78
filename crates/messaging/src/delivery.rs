use std::collections::HashMap;
use std::fmt::{self, Debug};

use bytes::Bytes;

/// Routing metadata carried alongside a payload.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Properties {
    /// Identifier echoed back on replies so a requester can match them.
    pub correlation_id: Option<String>,

    /// Pattern the receiver should publish its reply to.
    pub reply_to: Option<String>,

    /// Arbitrary transport passthrough headers.
    pub headers: HashMap<String, String>,
}

impl Properties {
    /// Returns the value of a passthrough header.
    #[must_use]
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }
}

/// A message handed to a subscriber.
#[derive(Clone, Debug)]
pub struct Delivery {
    /// The pattern the message was published to.
    pub pattern: String,

    /// The raw payload.
    pub payload: Bytes,

    /// Routing metadata.
    pub properties: Properties,
}

type AckFn = Box<dyn FnOnce() + Send + 'static>;

/// Acknowledgement token for a single delivery.
///
/// Consuming the token with [`Ack::ack`] tells the transport the delivery has
/// been fully processed. Dropping it without acking leaves the delivery
/// unacknowledged.
pub struct Ack {
    on_ack: Option<AckFn>,
}

impl Ack {
    /// Creates an ack token which runs `on_ack` when acknowledged.
    #[must_use]
    pub fn new<F>(on_ack: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            on_ack: Some(Box::new(on_ack)),
        }
    }

    /// Creates an ack token with no side effect.
    #[must_use]
    pub fn noop() -> Self {
        Self { on_ack: None }
    }

    /// Acknowledges the delivery.
    pub fn ack(mut self) {
        if let Some(on_ack) = self.on_ack.take() {
            on_ack();
        }
    }
}

impl Debug for Ack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ack")
            .field("pending", &self.on_ack.is_some())
            .finish()
    }
}
