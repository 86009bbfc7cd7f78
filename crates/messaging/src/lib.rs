//! Abstract interface for fire-and-forget publish/subscribe transports.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Deliveries are messages handed to subscribers, together with their ack.
pub mod delivery;

/// Delivery handlers process messages for subscriptions.
pub mod delivery_handler;

/// Transports publish to and subscribe on named patterns.
pub mod transport;

pub use delivery::{Ack, Delivery, Properties};
pub use delivery_handler::{DeliveryHandler, DeliveryHandlerError};
pub use transport::{Fault, PublishOptions, SubscribeOptions, Transport, TransportError};
