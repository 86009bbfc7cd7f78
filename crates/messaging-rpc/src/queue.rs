use crate::correlation::{CorrelationId, reply_destination};
use crate::emitter::ErrorEmitter;
use crate::envelope::encode;
use crate::error::{Error, Result};
use crate::options::{PushOptions, QueueOptions};
use crate::registry::CorrelationRegistry;
use crate::reply_channel::{ReplyChannel, ReplyHandler};
use crate::responder::{
    Invoke, MetadataRequestHandler, Plain, RequestHandler, ResponderAdapter, WithMetadata,
};

use std::sync::Arc;

use proven_messaging::{Fault, PublishOptions, SubscribeOptions, Transport};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, instrument, warn};

#[derive(Debug)]
struct QueueInner<T>
where
    T: Transport,
{
    emitter: ErrorEmitter,
    options: QueueOptions,
    registry: Arc<CorrelationRegistry>,
    reply_channel: ReplyChannel,
    reply_to: String,
    shutdown_token: CancellationToken,
    task_tracker: TaskTracker,
    transport: T,
}

impl<T> Drop for QueueInner<T>
where
    T: Transport,
{
    fn drop(&mut self) {
        self.shutdown_token.cancel();
    }
}

/// Removes a request from the registry if the caller stops waiting for it.
struct PendingGuard<'a> {
    registry: &'a CorrelationRegistry,
    id: &'a CorrelationId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.registry.cancel(self.id.as_str()) {
            debug!("request {} abandoned by caller", self.id);
        }
    }
}

/// Request/reply on top of a fire-and-forget transport.
///
/// Each queue listens for replies on a private pattern of its own, set up the
/// first time a request is pushed. Cloning a queue yields another handle onto
/// the same instance.
#[derive(Debug)]
pub struct Queue<T>
where
    T: Transport,
{
    inner: Arc<QueueInner<T>>,
}

impl<T> Clone for Queue<T>
where
    T: Transport,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Queue<T>
where
    T: Transport,
{
    /// Creates a queue over the given transport.
    ///
    /// Must be called from within a Tokio runtime. Transport faults are
    /// escalated from this point on.
    pub fn new(transport: T, options: QueueOptions) -> Self {
        let emitter = ErrorEmitter::new();
        let shutdown_token = CancellationToken::new();
        let task_tracker = TaskTracker::new();

        task_tracker.spawn(Self::forward_faults(
            transport.faults(),
            emitter.clone(),
            shutdown_token.clone(),
        ));

        let reply_to = reply_destination();
        debug!("queue listening for replies on {}", reply_to);

        Self {
            inner: Arc::new(QueueInner {
                emitter,
                options,
                registry: Arc::new(CorrelationRegistry::new()),
                reply_channel: ReplyChannel::new(),
                reply_to,
                shutdown_token,
                task_tracker,
                transport,
            }),
        }
    }

    async fn forward_faults(
        mut faults: broadcast::Receiver<Fault>,
        emitter: ErrorEmitter,
        shutdown_token: CancellationToken,
    ) {
        loop {
            tokio::select! {
                biased;
                () = shutdown_token.cancelled() => {
                    debug!("shutdown token cancelled, no longer watching transport faults");
                    break;
                }
                fault = faults.recv() => match fault {
                    Ok(fault) => {
                        emitter.emit(Error::Transport(fault));
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("missed {} transport faults", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    }

    /// Returns the pattern this queue receives replies on.
    #[must_use]
    pub fn reply_to(&self) -> &str {
        &self.inner.reply_to
    }

    /// Returns the number of requests awaiting a reply.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.registry.len()
    }

    /// Returns the transport this queue runs over.
    #[must_use]
    pub fn transport(&self) -> &T {
        &self.inner.transport
    }

    async fn ensure_reply_channel(&self) -> Result<()> {
        let transport = self.inner.transport.clone();
        let reply_to = self.inner.reply_to.clone();
        let handler = ReplyHandler::new(self.inner.registry.clone());

        self.inner
            .reply_channel
            .ensure_ready(move || async move {
                transport
                    .subscribe(&reply_to, handler, SubscribeOptions::exclusive())
                    .await
                    .map_err(Error::setup)
            })
            .await
    }

    /// Sends a request to `pattern` and waits for its reply.
    ///
    /// # Errors
    /// Returns the first of: a reply channel setup failure, a serialization or
    /// publish failure, the remote handler's error, or [`Error::Timeout`].
    #[instrument(skip(self, payload, options))]
    pub async fn push<Req, Resp>(
        &self,
        pattern: &str,
        payload: &Req,
        options: PushOptions,
    ) -> Result<Resp>
    where
        Req: Serialize + Sync + ?Sized,
        Resp: DeserializeOwned,
    {
        let id = CorrelationId::generate();

        self.ensure_reply_channel().await?;

        let after = options
            .timeout
            .unwrap_or(self.inner.options.default_timeout);
        let completion = self.inner.registry.register(&id, after);
        let _guard = PendingGuard {
            registry: &self.inner.registry,
            id: &id,
        };

        let publish_options = PublishOptions {
            correlation_id: Some(id.to_string()),
            reply_to: Some(self.inner.reply_to.clone()),
            headers: options.headers,
        };

        let published = match encode(payload) {
            Ok(bytes) => self
                .inner
                .transport
                .publish(pattern, bytes, publish_options)
                .await
                .map_err(Error::publish),
            Err(e) => Err(e),
        };

        if let Err(e) = published {
            debug!("request {} failed before sending: {}", id, e);
            self.inner.registry.resolve(id.as_str(), Err(e));
        }

        let reply = completion.await.map_err(|_| Error::Abandoned)??;

        serde_json::from_value(reply).map_err(Error::deserialize)
    }

    /// Sends a request without waiting for its reply.
    ///
    /// The reply is discarded. Any error is escalated to [`Queue::failure`]
    /// since no caller is left to receive it, including [`Error::Closed`] if
    /// the queue is closed before the request completes.
    pub fn push_detached<Req>(&self, pattern: &str, payload: &Req, options: PushOptions)
    where
        Req: Serialize + ?Sized,
    {
        if self.inner.shutdown_token.is_cancelled() {
            self.inner.emitter.emit(Error::Closed);
            return;
        }

        let payload = match serde_json::to_value(payload) {
            Ok(payload) => payload,
            Err(e) => {
                self.inner.emitter.emit(Error::serialize(e));
                return;
            }
        };

        let queue = self.clone();
        let pattern = pattern.to_string();
        let shutdown_token = self.inner.shutdown_token.clone();

        self.inner.task_tracker.spawn(async move {
            tokio::select! {
                biased;
                () = shutdown_token.cancelled() => {
                    queue.inner.emitter.emit(Error::Closed);
                }
                result = queue.push::<Value, Value>(&pattern, &payload, options) => {
                    if let Err(e) = result {
                        queue.inner.emitter.emit(e);
                    }
                }
            }
        });
    }

    /// Answers requests on `pattern` with `handler`.
    ///
    /// # Errors
    /// Returns [`Error::Subscribe`] if the subscription cannot be set up.
    pub async fn pull<H>(&self, pattern: &str, handler: H) -> Result<()>
    where
        H: RequestHandler,
    {
        self.subscribe_responder(pattern, Plain(handler)).await
    }

    /// Answers requests on `pattern` with a handler that also receives each
    /// request's routing metadata.
    ///
    /// # Errors
    /// Returns [`Error::Subscribe`] if the subscription cannot be set up.
    pub async fn pull_with_metadata<H>(&self, pattern: &str, handler: H) -> Result<()>
    where
        H: MetadataRequestHandler,
    {
        self.subscribe_responder(pattern, WithMetadata(handler))
            .await
    }

    async fn subscribe_responder<I>(&self, pattern: &str, invoke: I) -> Result<()>
    where
        I: Invoke,
    {
        let adapter = ResponderAdapter::new(self.inner.transport.clone(), invoke);

        let mut options = SubscribeOptions::default();
        if let Some(prefetch) = self.inner.options.prefetch {
            options = options.prefetch(prefetch);
        }

        self.inner
            .transport
            .subscribe(pattern, adapter, options)
            .await
            .map_err(|e| Error::Subscribe {
                pattern: pattern.to_string(),
                source: Arc::new(e),
            })?;

        debug!("answering requests on {}", pattern);

        Ok(())
    }

    /// Stops background work and shuts the transport down.
    ///
    /// # Errors
    /// Returns [`Error::Shutdown`] if the transport fails to shut down.
    pub async fn close(&self) -> Result<()> {
        debug!("closing queue");

        self.inner.shutdown_token.cancel();
        self.inner.task_tracker.close();
        self.inner.task_tracker.wait().await;

        self.inner
            .transport
            .shutdown()
            .await
            .map_err(|e| Error::Shutdown(Arc::new(e)))
    }

    /// Returns the error escalated on this queue, if any.
    ///
    /// Only errors no caller could receive are escalated: transport faults and
    /// failures of [`Queue::push_detached`]. The first one is kept.
    #[must_use]
    pub fn escalated(&self) -> Option<Error> {
        self.inner.emitter.current()
    }

    /// Waits until an error is escalated on this queue.
    pub async fn failure(&self) -> Error {
        self.inner.emitter.wait().await
    }
}
