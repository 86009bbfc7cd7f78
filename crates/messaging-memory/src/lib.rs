//! In-memory implementation of the messaging crate.
//!
//! A [`MemoryBroker`] holds named queues shared by every [`MemoryTransport`]
//! connected to it. Each pattern behaves like a work queue: subscribers on the
//! same pattern compete for deliveries round-robin, and messages published
//! while nobody is subscribed are buffered until the first subscriber
//! arrives.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// The broker holds queues shared between transports.
pub mod broker;

/// Transports are per-connection handles onto a broker.
pub mod transport;

pub use broker::MemoryBroker;
pub use transport::{MemoryTransport, MemoryTransportOptions};

/// Checks that a pattern can be used as a queue name.
///
/// # Errors
/// Returns an error if the pattern is empty or contains whitespace, '*' or '>'
fn validate_pattern(pattern: &str) -> Result<(), transport::Error> {
    if pattern.is_empty()
        || pattern.contains('*')
        || pattern.contains('>')
        || pattern.chars().any(char::is_whitespace)
    {
        return Err(transport::Error::InvalidPattern(pattern.to_string()));
    }

    Ok(())
}
