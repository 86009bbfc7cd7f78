use crate::envelope::decode_reply;
use crate::error::{Error, Result};
use crate::registry::CorrelationRegistry;

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use proven_messaging::{Ack, Delivery, DeliveryHandler};
use tracing::{debug, trace};

type SetupFuture = Shared<BoxFuture<'static, Result<()>>>;

#[derive(Default)]
enum State {
    #[default]
    Idle,
    InFlight {
        generation: u64,
        future: SetupFuture,
    },
    Ready,
}

#[derive(Default)]
struct Inner {
    state: State,
    generation: u64,
}

/// Lazily establishes the subscription a queue receives its replies on.
///
/// The first caller starts the setup and every caller arriving while it is
/// running waits on the same attempt. Success is remembered. A failure is
/// handed to every waiter and the next call starts a fresh attempt.
#[derive(Default)]
pub struct ReplyChannel {
    inner: Mutex<Inner>,
}

impl fmt::Debug for ReplyChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplyChannel")
            .field("ready", &self.is_ready())
            .finish_non_exhaustive()
    }
}

impl ReplyChannel {
    /// Creates a channel that has not been set up yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` once setup has succeeded.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self.inner.lock().state, State::Ready)
    }

    /// Waits until the channel is ready, running `setup` if no attempt is
    /// under way.
    ///
    /// # Errors
    /// Returns the setup error shared by every caller waiting on the failed
    /// attempt.
    pub async fn ensure_ready<F, Fut>(&self, setup: F) -> Result<()>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let (generation, future) = {
            let mut inner = self.inner.lock();
            let attached = match &inner.state {
                State::Ready => return Ok(()),
                State::InFlight { generation, future } => Some((*generation, future.clone())),
                State::Idle => None,
            };

            match attached {
                Some(attached) => attached,
                None => {
                    inner.generation += 1;
                    let generation = inner.generation;
                    let future = setup().boxed().shared();

                    debug!("setting up reply channel (attempt {})", generation);
                    inner.state = State::InFlight {
                        generation,
                        future: future.clone(),
                    };

                    (generation, future)
                }
            }
        };

        let result = future.await;

        // A stale waiter must not clobber a retry started after its attempt.
        let mut inner = self.inner.lock();
        let current = match &inner.state {
            State::InFlight { generation, .. } => Some(*generation),
            State::Idle | State::Ready => None,
        };
        if current == Some(generation) {
            inner.state = if result.is_ok() {
                State::Ready
            } else {
                State::Idle
            };
        }

        result
    }
}

/// Routes replies arriving on the reply channel to their pending requests.
#[derive(Clone, Debug)]
pub struct ReplyHandler {
    registry: Arc<CorrelationRegistry>,
}

impl ReplyHandler {
    /// Creates a handler resolving requests in the given registry.
    #[must_use]
    pub const fn new(registry: Arc<CorrelationRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl DeliveryHandler for ReplyHandler {
    type Error = Error;

    async fn handle(&self, delivery: Delivery, ack: Ack) -> Result<()> {
        let Some(correlation_id) = delivery.properties.correlation_id else {
            debug!("dropping reply without correlation id");
            ack.ack();
            return Ok(());
        };

        let outcome = decode_reply(&delivery.payload);
        if !self.registry.resolve(&correlation_id, outcome) {
            trace!("dropping late or unknown reply {}", correlation_id);
        }

        ack.ack();

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use bytes::Bytes;
    use proven_messaging::Properties;
    use serde_json::json;

    use crate::correlation::CorrelationId;
    use crate::envelope::{RemoteError, encode, encode_error};

    #[tokio::test]
    async fn test_concurrent_callers_share_one_setup() {
        let channel = Arc::new(ReplyChannel::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let channel = channel.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                channel
                    .ensure_ready(|| async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok(())
                    })
                    .await
            }));
        }

        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(channel.is_ready());
    }

    #[tokio::test]
    async fn test_success_is_memoized() {
        let channel = ReplyChannel::new();

        channel.ensure_ready(|| async { Ok(()) }).await.unwrap();
        channel
            .ensure_ready(|| async { Err(Error::Abandoned) })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_failure_is_retryable() {
        let channel = ReplyChannel::new();

        let result = channel
            .ensure_ready(|| async { Err(Error::setup(std::io::Error::other("unavailable"))) })
            .await;
        assert!(matches!(result, Err(Error::Setup(_))));
        assert!(!channel.is_ready());

        channel.ensure_ready(|| async { Ok(()) }).await.unwrap();
        assert!(channel.is_ready());
    }

    #[tokio::test]
    async fn test_reply_handler_resolves_pending_request() {
        let registry = Arc::new(CorrelationRegistry::new());
        let handler = ReplyHandler::new(registry.clone());
        let id = CorrelationId::generate();
        let receiver = registry.register(&id, Duration::from_secs(60));

        handler
            .handle(
                Delivery {
                    pattern: "replies".to_string(),
                    payload: encode(&json!({ "ok": 3 })).unwrap(),
                    properties: Properties {
                        correlation_id: Some(id.to_string()),
                        ..Properties::default()
                    },
                },
                Ack::noop(),
            )
            .await
            .unwrap();

        assert_eq!(receiver.await.unwrap().unwrap(), json!({ "ok": 3 }));
    }

    #[tokio::test]
    async fn test_reply_handler_decodes_error_envelope() {
        let registry = Arc::new(CorrelationRegistry::new());
        let handler = ReplyHandler::new(registry.clone());
        let id = CorrelationId::generate();
        let receiver = registry.register(&id, Duration::from_secs(60));

        handler
            .handle(
                Delivery {
                    pattern: "replies".to_string(),
                    payload: encode_error(&RemoteError::new("TypeError", "x")).unwrap(),
                    properties: Properties {
                        correlation_id: Some(id.to_string()),
                        ..Properties::default()
                    },
                },
                Ack::noop(),
            )
            .await
            .unwrap();

        let error = receiver.await.unwrap().unwrap_err();
        assert_eq!(
            error.as_remote().map(|remote| remote.name.as_str()),
            Some("TypeError")
        );
    }

    #[tokio::test]
    async fn test_reply_without_correlation_id_is_acked() {
        let registry = Arc::new(CorrelationRegistry::new());
        let handler = ReplyHandler::new(registry);
        let acked = Arc::new(AtomicUsize::new(0));

        let ack = {
            let acked = acked.clone();
            Ack::new(move || {
                acked.fetch_add(1, Ordering::SeqCst);
            })
        };

        handler
            .handle(
                Delivery {
                    pattern: "replies".to_string(),
                    payload: Bytes::from_static(b"{}"),
                    properties: Properties::default(),
                },
                ack,
            )
            .await
            .unwrap();

        assert_eq!(acked.load(Ordering::SeqCst), 1);
    }
}
