use crate::delivery::Properties;
use crate::delivery_handler::DeliveryHandler;

use std::collections::HashMap;
use std::error::Error;
use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::broadcast;

/// Marker trait for transport errors
pub trait TransportError: Error + Send + Sync + 'static {}

/// A transport-level fault not tied to any particular call.
pub type Fault = Arc<dyn Error + Send + Sync + 'static>;

/// Options for a single publish.
#[derive(Clone, Debug, Default)]
pub struct PublishOptions {
    /// Correlation identifier to attach to the message.
    pub correlation_id: Option<String>,

    /// Pattern the receiver should reply to.
    pub reply_to: Option<String>,

    /// Arbitrary passthrough headers.
    pub headers: HashMap<String, String>,
}

impl PublishOptions {
    /// Sets the correlation identifier.
    #[must_use]
    pub fn correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Sets the reply pattern.
    #[must_use]
    pub fn reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }

    /// Adds a passthrough header.
    #[must_use]
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }
}

impl From<PublishOptions> for Properties {
    fn from(options: PublishOptions) -> Self {
        Self {
            correlation_id: options.correlation_id,
            reply_to: options.reply_to,
            headers: options.headers,
        }
    }
}

/// Options for a subscription.
#[derive(Clone, Debug, Default)]
pub struct SubscribeOptions {
    /// Only this subscriber may consume from the pattern.
    pub exclusive: bool,

    /// Maximum number of unacknowledged deliveries handed to the handler at
    /// once. `None` means unbounded.
    pub prefetch: Option<usize>,
}

impl SubscribeOptions {
    /// Options for an exclusive subscription.
    #[must_use]
    pub const fn exclusive() -> Self {
        Self {
            exclusive: true,
            prefetch: None,
        }
    }

    /// Limits the number of in-flight deliveries.
    #[must_use]
    pub const fn prefetch(mut self, prefetch: usize) -> Self {
        self.prefetch = Some(prefetch);
        self
    }
}

/// A fire-and-forget publish/subscribe transport.
#[async_trait]
pub trait Transport
where
    Self: Clone + Debug + Send + Sync + 'static,
{
    /// The error type for the transport.
    type Error: TransportError;

    /// Publishes a payload to a pattern. Resolves once the transport has
    /// accepted the message.
    async fn publish(
        &self,
        pattern: &str,
        payload: Bytes,
        options: PublishOptions,
    ) -> Result<(), Self::Error>;

    /// Subscribes a handler to a pattern. Resolves once the subscription is
    /// active.
    async fn subscribe<X>(
        &self,
        pattern: &str,
        handler: X,
        options: SubscribeOptions,
    ) -> Result<(), Self::Error>
    where
        X: DeliveryHandler;

    /// Shuts the transport down, stopping all of its subscriptions.
    async fn shutdown(&self) -> Result<(), Self::Error>;

    /// Returns a receiver for asynchronous transport faults.
    fn faults(&self) -> broadcast::Receiver<Fault>;
}
