#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use proven_messaging::{
    DeliveryHandler, Fault, Properties, PublishOptions, SubscribeOptions, Transport,
    TransportError,
};
use proven_messaging_memory::{MemoryBroker, MemoryTransport, MemoryTransportOptions};
use proven_messaging_rpc::{
    MetadataRequestHandler, RemoteError, RequestHandler, Responder, UsedResponder,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Notify, broadcast};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

pub fn memory_transport(broker: &MemoryBroker) -> MemoryTransport {
    MemoryTransport::new(broker.clone(), MemoryTransportOptions::default())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counter {
    pub ok: i64,
}

/// Replies with the request's counter plus two.
#[derive(Clone, Debug, Default)]
pub struct AddTwo {
    pub calls: Arc<AtomicUsize>,
}

impl AddTwo {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RequestHandler for AddTwo {
    type Request = Counter;

    async fn handle(&self, request: Counter, responder: Responder) -> UsedResponder {
        self.calls.fetch_add(1, Ordering::SeqCst);
        responder.reply(&Counter { ok: request.ok + 2 })
    }
}

#[derive(Debug, Error)]
#[error("x")]
pub struct TypeError;

/// Always fails with a `TypeError`.
#[derive(Clone, Debug)]
pub struct AlwaysFails;

#[async_trait]
impl RequestHandler for AlwaysFails {
    type Request = serde_json::Value;

    async fn handle(&self, _request: serde_json::Value, responder: Responder) -> UsedResponder {
        responder.fail(&TypeError)
    }
}

/// Fails with an explicitly named error.
#[derive(Clone, Debug)]
pub struct NamedFailure;

#[async_trait]
impl RequestHandler for NamedFailure {
    type Request = serde_json::Value;

    async fn handle(&self, _request: serde_json::Value, responder: Responder) -> UsedResponder {
        responder.fail_remote(RemoteError::new("RangeError", "out of range"))
    }
}

/// Never answers.
#[derive(Clone, Debug, Default)]
pub struct Silent {
    pub calls: Arc<AtomicUsize>,
}

#[async_trait]
impl RequestHandler for Silent {
    type Request = serde_json::Value;

    async fn handle(&self, _request: serde_json::Value, responder: Responder) -> UsedResponder {
        self.calls.fetch_add(1, Ordering::SeqCst);
        responder.no_reply()
    }
}

/// Replies with the request's counter plus two once released.
#[derive(Clone, Debug, Default)]
pub struct Gated {
    pub entered: Arc<Notify>,
    pub release: Arc<Notify>,
}

#[async_trait]
impl RequestHandler for Gated {
    type Request = Counter;

    async fn handle(&self, request: Counter, responder: Responder) -> UsedResponder {
        self.entered.notify_one();
        self.release.notified().await;
        responder.reply(&Counter { ok: request.ok + 2 })
    }
}

/// Completes without data.
#[derive(Clone, Debug)]
pub struct Nothing;

#[async_trait]
impl RequestHandler for Nothing {
    type Request = serde_json::Value;

    async fn handle(&self, _request: serde_json::Value, responder: Responder) -> UsedResponder {
        responder.reply_empty()
    }
}

/// Replies with the request's `tenant` header.
#[derive(Clone, Debug)]
pub struct EchoTenant;

#[async_trait]
impl MetadataRequestHandler for EchoTenant {
    type Request = serde_json::Value;

    async fn handle(
        &self,
        _request: serde_json::Value,
        properties: &Properties,
        responder: Responder,
    ) -> UsedResponder {
        responder.reply(&properties.header("tenant"))
    }
}

#[derive(Debug, Error)]
pub enum FlakyError {
    #[error("injected subscribe failure")]
    Injected,

    #[error(transparent)]
    Memory(#[from] proven_messaging_memory::transport::Error),
}

impl TransportError for FlakyError {}

/// Memory transport that counts reply-channel subscriptions and can be told
/// to fail some of them.
#[derive(Clone, Debug)]
pub struct FlakyTransport {
    inner: MemoryTransport,
    delay: Duration,
    failures: Arc<AtomicUsize>,
    reply_subscriptions: Arc<AtomicUsize>,
}

impl FlakyTransport {
    pub fn new(inner: MemoryTransport, delay: Duration, failures: usize) -> Self {
        Self {
            inner,
            delay,
            failures: Arc::new(AtomicUsize::new(failures)),
            reply_subscriptions: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn reply_subscriptions(&self) -> usize {
        self.reply_subscriptions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for FlakyTransport {
    type Error = FlakyError;

    async fn publish(
        &self,
        pattern: &str,
        payload: Bytes,
        options: PublishOptions,
    ) -> Result<(), Self::Error> {
        Ok(self.inner.publish(pattern, payload, options).await?)
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
        if options.exclusive {
            self.reply_subscriptions.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;

            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(FlakyError::Injected);
            }
        }

        Ok(self.inner.subscribe(pattern, handler, options).await?)
    }

    async fn shutdown(&self) -> Result<(), Self::Error> {
        Ok(self.inner.shutdown().await?)
    }

    fn faults(&self) -> broadcast::Receiver<Fault> {
        self.inner.faults()
    }
}
