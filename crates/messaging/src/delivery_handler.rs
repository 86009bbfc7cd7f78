use std::error::Error;

use async_trait::async_trait;

use crate::delivery::{Ack, Delivery};

/// Marker trait for delivery handler errors
pub trait DeliveryHandlerError: Error + Send + Sync + 'static {}

/// A trait representing a consumer of deliveries on a pattern.
#[async_trait]
pub trait DeliveryHandler
where
    Self: Clone + Send + Sync + 'static,
{
    /// The error type for the handler.
    type Error: DeliveryHandlerError;

    /// Handles the given delivery. Implementations must consume `ack` exactly
    /// once when processing is complete.
    async fn handle(&self, delivery: Delivery, ack: Ack) -> Result<(), Self::Error>;
}
