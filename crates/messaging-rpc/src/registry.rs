use crate::correlation::CorrelationId;
use crate::error::Error;

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tracing::{debug, trace};

/// Outcome delivered to a waiting request.
pub type Outcome = Result<Value, Error>;

/// An outstanding request awaiting its reply.
#[derive(Debug)]
pub(crate) struct PendingRequest {
    timer: AbortHandle,
    sender: oneshot::Sender<Outcome>,
}

/// Tracks outstanding requests by correlation id.
///
/// Every path that can complete a request (reply, timeout, publish failure)
/// goes through [`CorrelationRegistry::resolve`], which removes the entry
/// before delivering. Whichever path gets there first wins and the others
/// find nothing to do.
#[derive(Debug, Default)]
pub struct CorrelationRegistry {
    pending: Mutex<HashMap<String, PendingRequest>>,
}

impl CorrelationRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a request and arms its timeout.
    ///
    /// The returned receiver yields the request's outcome: a reply, an error,
    /// or [`Error::Timeout`] once `after` elapses. Must be called from within
    /// a Tokio runtime.
    pub fn register(
        self: &Arc<Self>,
        id: &CorrelationId,
        after: Duration,
    ) -> oneshot::Receiver<Outcome> {
        let (sender, receiver) = oneshot::channel();

        // The lock is held while the timer is spawned so it can never fire
        // ahead of the insert.
        let mut pending = self.pending.lock();

        let registry = Arc::downgrade(self);
        let timer_id = id.to_string();
        let timer = tokio::spawn(Self::expire(registry, timer_id, after)).abort_handle();

        if let Some(previous) = pending.insert(id.to_string(), PendingRequest { timer, sender }) {
            previous.timer.abort();
            debug!("correlation id {} reused, abandoning earlier request", id);
        }

        trace!("registered request {} (timeout: {:?})", id, after);

        receiver
    }

    async fn expire(registry: Weak<Self>, id: String, after: Duration) {
        tokio::time::sleep(after).await;

        let Some(registry) = registry.upgrade() else {
            return;
        };

        if registry.resolve(&id, Err(Error::Timeout { after })) {
            debug!("request {} timed out after {:?}", id, after);
        }
    }

    /// Completes a request with the given outcome.
    ///
    /// Returns `false` if no request with this id is outstanding, in which case
    /// nothing is delivered.
    pub fn resolve(&self, id: &str, outcome: Outcome) -> bool {
        let Some(request) = self.pending.lock().remove(id) else {
            trace!("no outstanding request for {}", id);
            return false;
        };

        request.timer.abort();

        // The caller may have stopped waiting; the entry is gone either way.
        let _ = request.sender.send(outcome);

        true
    }

    /// Removes a request without delivering anything. Used when the caller
    /// stops waiting.
    pub fn cancel(&self, id: &str) -> bool {
        self.pending.lock().remove(id).is_some_and(|request| {
            request.timer.abort();
            true
        })
    }

    /// Returns the number of outstanding requests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Returns `true` if no request is outstanding.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}
