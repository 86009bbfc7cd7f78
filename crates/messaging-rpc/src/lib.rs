//! Request/reply on top of fire-and-forget publish/subscribe.
//!
//! A [`Queue`] lets a caller [`push`](Queue::push) a request to a pattern and
//! await the correlated reply, while a responder registered with
//! [`pull`](Queue::pull) answers it. The transport underneath only needs to
//! publish, subscribe and shut down.
//!
//! Each request carries a random correlation id and the caller's private
//! reply pattern. Replies are matched back to their request through a
//! registry which completes every request exactly once: with the reply, with
//! the remote handler's error, with a publish failure, or with a timeout.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod correlation;
mod emitter;
mod envelope;
mod error;
mod options;
mod queue;
mod registry;
mod reply_channel;
mod responder;

pub use correlation::{CORRELATION_ID_LEN, CorrelationId};
pub use emitter::ErrorEmitter;
pub use envelope::{ERROR_FLAG, Empty, RemoteError};
pub use error::{BoxError, Error, Result};
pub use options::{DEFAULT_TIMEOUT, PushOptions, QueueOptions};
pub use queue::Queue;
pub use registry::{CorrelationRegistry, Outcome};
pub use reply_channel::{ReplyChannel, ReplyHandler};
pub use responder::{
    DESERIALIZATION_ERROR, MetadataRequestHandler, RequestHandler, Responder,
    SERIALIZATION_ERROR, UsedResponder,
};
