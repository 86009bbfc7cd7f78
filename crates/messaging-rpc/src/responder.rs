use crate::envelope::{Empty, RemoteError, encode, encode_error};
use crate::error::{Error, Result};

use std::error::Error as StdError;
use std::fmt::Debug;

use async_trait::async_trait;
use bytes::Bytes;
use proven_messaging::{Ack, Delivery, DeliveryHandler, Properties, PublishOptions, Transport};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

/// Name carried by the error reply sent when a request cannot be decoded.
pub const DESERIALIZATION_ERROR: &str = "DeserializationError";

/// Name carried by the error reply sent when reply data cannot be encoded.
pub const SERIALIZATION_ERROR: &str = "SerializationError";

#[derive(Debug)]
enum Reply {
    Data(Bytes),
    Failure(RemoteError),
    Silent,
}

/// One-shot handle a request handler uses to answer the caller.
///
/// Every method consumes the responder and returns the [`UsedResponder`] the
/// handler must hand back, so a request is answered exactly once.
#[derive(Debug)]
#[must_use = "a responder must be used to answer the request"]
pub struct Responder {
    _private: (),
}

/// Proof that a request has been answered.
#[derive(Debug)]
#[must_use = "return this from the request handler"]
pub struct UsedResponder {
    reply: Reply,
}

impl Responder {
    const fn new() -> Self {
        Self { _private: () }
    }

    /// Replies with data.
    ///
    /// If the data cannot be serialized the caller receives a
    /// `SerializationError` instead.
    pub fn reply<T>(self, data: &T) -> UsedResponder
    where
        T: Serialize + ?Sized,
    {
        let reply = match encode(data) {
            Ok(payload) => Reply::Data(payload),
            Err(e) => Reply::Failure(RemoteError::new(SERIALIZATION_ERROR, e.to_string())),
        };

        UsedResponder { reply }
    }

    /// Replies with an empty object.
    pub fn reply_empty(self) -> UsedResponder {
        self.reply(&Empty {})
    }

    /// Replies with a local error, carried to the caller as a [`RemoteError`].
    pub fn fail<E>(self, error: &E) -> UsedResponder
    where
        E: StdError,
    {
        self.fail_remote(RemoteError::from_error(error))
    }

    /// Replies with an explicitly named error.
    pub fn fail_remote(self, error: RemoteError) -> UsedResponder {
        UsedResponder {
            reply: Reply::Failure(error),
        }
    }

    /// Replies with either outcome of a fallible computation.
    pub fn respond<T, E>(self, result: std::result::Result<T, E>) -> UsedResponder
    where
        T: Serialize,
        E: StdError,
    {
        match result {
            Ok(data) => self.reply(&data),
            Err(error) => self.fail(&error),
        }
    }

    /// Acknowledges the request without replying. The caller will time out.
    pub const fn no_reply(self) -> UsedResponder {
        UsedResponder {
            reply: Reply::Silent,
        }
    }
}

/// Handles requests on a pattern.
#[async_trait]
pub trait RequestHandler
where
    Self: Clone + Send + Sync + 'static,
{
    /// The decoded request type.
    type Request: DeserializeOwned + Send;

    /// Handles a request, answering through `responder`.
    async fn handle(&self, request: Self::Request, responder: Responder) -> UsedResponder;
}

/// Handles requests on a pattern with access to their routing metadata.
#[async_trait]
pub trait MetadataRequestHandler
where
    Self: Clone + Send + Sync + 'static,
{
    /// The decoded request type.
    type Request: DeserializeOwned + Send;

    /// Handles a request, answering through `responder`.
    async fn handle(
        &self,
        request: Self::Request,
        properties: &Properties,
        responder: Responder,
    ) -> UsedResponder;
}

/// Decodes a request and runs the user handler on it.
#[async_trait]
pub(crate) trait Invoke
where
    Self: Clone + Send + Sync + 'static,
{
    async fn invoke(&self, payload: &[u8], properties: &Properties) -> UsedResponder;
}

#[derive(Clone)]
pub(crate) struct Plain<H>(pub H);

#[derive(Clone)]
pub(crate) struct WithMetadata<H>(pub H);

fn decode_request<R>(payload: &[u8]) -> std::result::Result<R, UsedResponder>
where
    R: DeserializeOwned,
{
    serde_json::from_slice(payload).map_err(|e| {
        debug!("failed to decode request: {}", e);
        Responder::new().fail_remote(RemoteError::new(DESERIALIZATION_ERROR, e.to_string()))
    })
}

#[async_trait]
impl<H> Invoke for Plain<H>
where
    H: RequestHandler,
{
    async fn invoke(&self, payload: &[u8], _properties: &Properties) -> UsedResponder {
        match decode_request(payload) {
            Ok(request) => self.0.handle(request, Responder::new()).await,
            Err(used) => used,
        }
    }
}

#[async_trait]
impl<H> Invoke for WithMetadata<H>
where
    H: MetadataRequestHandler,
{
    async fn invoke(&self, payload: &[u8], properties: &Properties) -> UsedResponder {
        match decode_request(payload) {
            Ok(request) => self.0.handle(request, properties, Responder::new()).await,
            Err(used) => used,
        }
    }
}

/// Subscribes a request handler and publishes its answers back to callers.
#[derive(Clone)]
pub(crate) struct ResponderAdapter<T, I> {
    transport: T,
    invoke: I,
}

impl<T, I> ResponderAdapter<T, I>
where
    T: Transport,
    I: Invoke,
{
    pub(crate) const fn new(transport: T, invoke: I) -> Self {
        Self { transport, invoke }
    }

    async fn publish_reply(
        &self,
        reply_to: &str,
        correlation_id: &str,
        reply: Reply,
    ) -> Result<()> {
        let payload = match reply {
            Reply::Data(payload) => payload,
            Reply::Failure(error) => encode_error(&error)?,
            Reply::Silent => {
                debug!("request {} left unanswered", correlation_id);
                return Ok(());
            }
        };

        self.transport
            .publish(
                reply_to,
                payload,
                PublishOptions::default().correlation_id(correlation_id),
            )
            .await
            .map_err(Error::publish)
    }
}

impl<T, I> Debug for ResponderAdapter<T, I>
where
    T: Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponderAdapter")
            .field("transport", &self.transport)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<T, I> DeliveryHandler for ResponderAdapter<T, I>
where
    T: Transport,
    I: Invoke,
{
    type Error = Error;

    async fn handle(&self, delivery: Delivery, ack: Ack) -> Result<()> {
        let (Some(correlation_id), Some(reply_to)) = (
            delivery.properties.correlation_id.as_deref(),
            delivery.properties.reply_to.as_deref(),
        ) else {
            debug!(
                "dropping message on {} without correlation metadata",
                delivery.pattern
            );
            ack.ack();
            return Ok(());
        };

        let used = self
            .invoke
            .invoke(&delivery.payload, &delivery.properties)
            .await;

        let result = self
            .publish_reply(reply_to, correlation_id, used.reply)
            .await;

        ack.ack();

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::{Value, json};

    #[derive(Debug, thiserror::Error)]
    #[error("x")]
    struct TypeError;

    fn payload(used: UsedResponder) -> Value {
        match used.reply {
            Reply::Data(payload) => serde_json::from_slice(&payload).unwrap(),
            other => panic!("expected data, got {other:?}"),
        }
    }

    fn failure(used: UsedResponder) -> RemoteError {
        match used.reply {
            Reply::Failure(error) => error,
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn test_reply_encodes_data() {
        let used = Responder::new().reply(&json!({ "ok": 3 }));

        assert_eq!(payload(used), json!({ "ok": 3 }));
    }

    #[test]
    fn test_reply_empty_is_object() {
        assert_eq!(payload(Responder::new().reply_empty()), json!({}));
    }

    #[test]
    fn test_fail_uses_type_name() {
        let error = failure(Responder::new().fail(&TypeError));

        assert_eq!(error.name, "TypeError");
        assert_eq!(error.message, "x");
    }

    #[test]
    fn test_respond_maps_both_arms() {
        let ok: std::result::Result<u32, TypeError> = Ok(4);
        let err: std::result::Result<u32, TypeError> = Err(TypeError);

        assert_eq!(payload(Responder::new().respond(ok)), json!(4));
        assert_eq!(failure(Responder::new().respond(err)).name, "TypeError");
    }

    #[test]
    fn test_undecodable_request_becomes_error_reply() {
        let used = decode_request::<u32>(b"\"not a number\"").unwrap_err();

        assert_eq!(failure(used).name, DESERIALIZATION_ERROR);
    }

    #[test]
    fn test_no_reply_is_silent() {
        assert!(matches!(Responder::new().no_reply().reply, Reply::Silent));
    }
}
