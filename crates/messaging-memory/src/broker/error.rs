use thiserror::Error;

/// Errors that can occur when attaching to a queue.
#[derive(Clone, Debug, Error)]
pub enum Error {
    /// The queue is held exclusively by another consumer.
    #[error("queue `{0}` already has an exclusive consumer")]
    ExclusiveConsumer(String),
}
