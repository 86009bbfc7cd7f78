//! Wire encoding of replies.
//!
//! The transport only moves plain data, so application failures travel as an
//! ordinary JSON object carrying a reserved flag:
//!
//! ```json
//! { "__error__": true, "name": "TypeError", "message": "x", "stack": "..." }
//! ```
//!
//! Any reply without the flag is success data.

use crate::error::Error;

use std::backtrace::Backtrace;
use std::error::Error as StdError;
use std::fmt::{self, Write};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Reserved payload key marking a reply as an error envelope.
pub const ERROR_FLAG: &str = "__error__";

/// An application error raised by a remote handler.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
    /// The error's kind, e.g. `TypeError`.
    pub name: String,

    /// Human readable description.
    pub message: String,

    /// Trace captured where the error was raised.
    pub stack: String,
}

impl RemoteError {
    /// Creates an error with the given name and message, capturing a trace at
    /// the call site.
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        let name = name.into();
        let message = message.into();
        let stack = format!("{name}: {message}\n{}", Backtrace::force_capture());

        Self {
            name,
            message,
            stack,
        }
    }

    /// Builds a remote error from any local error. The name is the error's
    /// unqualified type name and the stack lists its source chain followed by
    /// a trace captured at the call site.
    pub fn from_error<E>(error: &E) -> Self
    where
        E: StdError,
    {
        let name = short_type_name::<E>();
        let message = error.to_string();

        let mut stack = format!("{name}: {message}");
        let mut source = error.source();
        while let Some(cause) = source {
            let _ = write!(stack, "\nCaused by: {cause}");
            source = cause.source();
        }
        let _ = write!(stack, "\n{}", Backtrace::force_capture());

        Self {
            name,
            message,
            stack,
        }
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

impl StdError for RemoteError {}

/// Reply payload for handlers that complete without data. Encodes as `{}`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Empty {}

#[derive(Debug, Serialize, Deserialize)]
struct ErrorEnvelope {
    #[serde(rename = "__error__")]
    flag: bool,
    #[serde(default)]
    name: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    stack: String,
}

impl From<&RemoteError> for ErrorEnvelope {
    fn from(error: &RemoteError) -> Self {
        Self {
            flag: true,
            name: error.name.clone(),
            message: error.message.clone(),
            stack: error.stack.clone(),
        }
    }
}

impl From<ErrorEnvelope> for RemoteError {
    fn from(envelope: ErrorEnvelope) -> Self {
        Self {
            name: envelope.name,
            message: envelope.message,
            stack: envelope.stack,
        }
    }
}

fn short_type_name<E>() -> String {
    let full = std::any::type_name::<E>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base).to_string()
}

/// Encodes a value as a JSON payload.
pub(crate) fn encode<T>(value: &T) -> Result<Bytes, Error>
where
    T: Serialize + ?Sized,
{
    serde_json::to_vec(value)
        .map(Bytes::from)
        .map_err(Error::serialize)
}

/// Encodes an application error as the reserved error envelope.
pub(crate) fn encode_error(error: &RemoteError) -> Result<Bytes, Error> {
    encode(&ErrorEnvelope::from(error))
}

/// Decodes a reply payload, turning error envelopes into [`Error::Remote`].
pub(crate) fn decode_reply(payload: &[u8]) -> Result<Value, Error> {
    let value: Value = serde_json::from_slice(payload).map_err(Error::deserialize)?;

    if value.get(ERROR_FLAG).and_then(Value::as_bool) == Some(true) {
        let envelope: ErrorEnvelope = serde_json::from_value(value).map_err(Error::deserialize)?;
        return Err(Error::Remote(envelope.into()));
    }

    Ok(value)
}
