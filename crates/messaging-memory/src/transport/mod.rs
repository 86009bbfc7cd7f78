mod error;

use crate::broker::MemoryBroker;
use crate::validate_pattern;
pub use error::Error;

use std::error::Error as StdError;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use proven_messaging::{
    Ack, Delivery, DeliveryHandler, Fault, PublishOptions, SubscribeOptions, Transport,
};
use tokio::sync::{Semaphore, broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Options for the in-memory transport.
#[derive(Clone, Debug, Default)]
pub struct MemoryTransportOptions {
    /// Prefix applied to every pattern used through this transport.
    pub namespace: Option<String>,
}

impl MemoryTransportOptions {
    /// Scopes every pattern under the given namespace.
    #[must_use]
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }
}

#[derive(Debug)]
struct MemoryTransportInner {
    broker: MemoryBroker,
    consumers: Mutex<Vec<(String, Uuid)>>,
    faults: broadcast::Sender<Fault>,
    namespace: Option<String>,
    shutdown_token: CancellationToken,
    task_tracker: TaskTracker,
    unacked: Arc<AtomicUsize>,
}

impl Drop for MemoryTransportInner {
    fn drop(&mut self) {
        self.shutdown_token.cancel();
    }
}

/// A connection onto a [`MemoryBroker`].
#[derive(Clone, Debug)]
pub struct MemoryTransport {
    inner: Arc<MemoryTransportInner>,
}

impl MemoryTransport {
    /// Creates a new transport connected to the given broker.
    #[must_use]
    pub fn new(broker: MemoryBroker, options: MemoryTransportOptions) -> Self {
        let (faults, _) = broadcast::channel(16);

        Self {
            inner: Arc::new(MemoryTransportInner {
                broker,
                consumers: Mutex::new(Vec::new()),
                faults,
                namespace: options.namespace,
                shutdown_token: CancellationToken::new(),
                task_tracker: TaskTracker::new(),
                unacked: Arc::new(AtomicUsize::new(0)),
            }),
        }
    }

    /// Returns the broker this transport is connected to.
    #[must_use]
    pub fn broker(&self) -> &MemoryBroker {
        &self.inner.broker
    }

    /// Returns whether the transport has been shut down.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.shutdown_token.is_cancelled()
    }

    /// Returns the number of deliveries handed out but not yet acknowledged.
    #[must_use]
    pub fn unacked(&self) -> usize {
        self.inner.unacked.load(Ordering::SeqCst)
    }

    /// Reports a transport-level fault to everyone observing [`Transport::faults`].
    pub fn report_fault<E>(&self, fault: E)
    where
        E: StdError + Send + Sync + 'static,
    {
        if self.inner.faults.send(Arc::new(fault)).is_err() {
            warn!("transport fault reported with no observers");
        }
    }

    fn qualify(&self, pattern: &str) -> String {
        match &self.inner.namespace {
            Some(namespace) => format!("{namespace}.{pattern}"),
            None => pattern.to_string(),
        }
    }

    async fn consume<X>(
        mut receiver: mpsc::UnboundedReceiver<Delivery>,
        handler: X,
        prefetch: Option<Arc<Semaphore>>,
        unacked: Arc<AtomicUsize>,
        shutdown_token: CancellationToken,
        task_tracker: TaskTracker,
    ) where
        X: DeliveryHandler,
    {
        loop {
            tokio::select! {
                biased;
                () = shutdown_token.cancelled() => {
                    debug!("shutdown token cancelled, exiting consume loop");
                    break;
                }
                delivery = receiver.recv() => {
                    let Some(delivery) = delivery else {
                        debug!("queue detached, exiting consume loop");
                        break;
                    };

                    let permit = match &prefetch {
                        Some(semaphore) => match semaphore.clone().acquire_owned().await {
                            Ok(permit) => Some(permit),
                            Err(_) => break,
                        },
                        None => None,
                    };

                    unacked.fetch_add(1, Ordering::SeqCst);
                    let ack = {
                        let unacked = unacked.clone();
                        Ack::new(move || {
                            unacked.fetch_sub(1, Ordering::SeqCst);
                            drop(permit);
                        })
                    };

                    let handler = handler.clone();
                    let shutdown_token = shutdown_token.clone();
                    task_tracker.spawn(async move {
                        tokio::select! {
                            biased;
                            () = shutdown_token.cancelled() => {}
                            result = handler.handle(delivery, ack) => {
                                if let Err(e) = result {
                                    error!("error handling delivery: {}", e);
                                }
                            }
                        }
                    });
                }
            }
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    type Error = Error;

    async fn publish(
        &self,
        pattern: &str,
        payload: Bytes,
        options: PublishOptions,
    ) -> Result<(), Self::Error> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        validate_pattern(pattern)?;

        debug!(
            "publishing {} bytes to {} (correlation id: {:?})",
            payload.len(),
            pattern,
            options.correlation_id
        );

        self.inner.broker.enqueue(
            &self.qualify(pattern),
            Delivery {
                pattern: pattern.to_string(),
                payload,
                properties: options.into(),
            },
        );

        Ok(())
    }

    async fn subscribe<X>(
        &self,
        pattern: &str,
        handler: X,
        options: SubscribeOptions,
    ) -> Result<(), Self::Error>
    where
        X: DeliveryHandler,
    {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        validate_pattern(pattern)?;

        let queue = self.qualify(pattern);
        let (consumer_id, receiver) = self.inner.broker.attach(&queue, options.exclusive)?;
        self.inner.consumers.lock().push((queue, consumer_id));

        debug!("subscribed to {} (exclusive: {})", pattern, options.exclusive);

        let prefetch = options
            .prefetch
            .map(|prefetch| Arc::new(Semaphore::new(prefetch.max(1))));

        self.inner.task_tracker.spawn(Self::consume(
            receiver,
            handler,
            prefetch,
            self.inner.unacked.clone(),
            self.inner.shutdown_token.clone(),
            self.inner.task_tracker.clone(),
        ));

        Ok(())
    }

    async fn shutdown(&self) -> Result<(), Self::Error> {
        if self.is_closed() {
            return Ok(());
        }

        debug!("shutting down in-memory transport");

        self.inner.shutdown_token.cancel();

        let consumers = std::mem::take(&mut *self.inner.consumers.lock());
        for (queue, consumer_id) in consumers {
            self.inner.broker.detach(&queue, consumer_id);
        }

        self.inner.task_tracker.close();
        self.inner.task_tracker.wait().await;

        Ok(())
    }

    fn faults(&self) -> broadcast::Receiver<Fault> {
        self.inner.faults.subscribe()
    }
}
