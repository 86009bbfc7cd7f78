mod error;

pub use error::Error;

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use proven_messaging::Delivery;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Default)]
struct BrokerState {
    queues: HashMap<String, QueueState>,
    // Exclusive queues whose consumer has gone. Messages sent to them are
    // dropped instead of piling up in a backlog nobody will drain.
    released: HashSet<String>,
}

#[derive(Debug)]
struct Consumer {
    id: Uuid,
    sender: mpsc::UnboundedSender<Delivery>,
}

#[derive(Debug, Default)]
struct QueueState {
    backlog: VecDeque<Delivery>,
    consumers: Vec<Consumer>,
    exclusive: bool,
    next: usize,
}

/// An in-memory message broker holding named queues.
///
/// Cloning a broker yields a handle onto the same queues.
#[derive(Clone, Debug, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl MemoryBroker {
    /// Creates a new, empty broker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of messages buffered on a queue with no consumers.
    #[must_use]
    pub fn depth(&self, queue: &str) -> usize {
        self.state
            .lock()
            .queues
            .get(queue)
            .map_or(0, |state| state.backlog.len())
    }

    /// Returns the number of consumers attached to a queue.
    #[must_use]
    pub fn consumer_count(&self, queue: &str) -> usize {
        self.state
            .lock()
            .queues
            .get(queue)
            .map_or(0, |state| state.consumers.len())
    }

    pub(crate) fn enqueue(&self, queue: &str, delivery: Delivery) {
        let mut broker = self.state.lock();
        if broker.released.contains(queue) {
            debug!("dropping message for released exclusive queue {}", queue);
            return;
        }

        let state = broker.queues.entry(queue.to_string()).or_default();

        let mut delivery = delivery;
        while !state.consumers.is_empty() {
            let index = state.next % state.consumers.len();
            match state.consumers[index].sender.send(delivery) {
                Ok(()) => {
                    state.next = index + 1;
                    return;
                }
                Err(mpsc::error::SendError(returned)) => {
                    debug!("dropping closed consumer on queue {}", queue);
                    state.consumers.remove(index);
                    delivery = returned;
                }
            }
        }

        if state.exclusive {
            debug!("exclusive consumer on {} is gone, releasing queue", queue);
            broker.queues.remove(queue);
            broker.released.insert(queue.to_string());
            return;
        }

        state.backlog.push_back(delivery);
    }

    pub(crate) fn attach(
        &self,
        queue: &str,
        exclusive: bool,
    ) -> Result<(Uuid, mpsc::UnboundedReceiver<Delivery>), Error> {
        let mut broker = self.state.lock();
        broker.released.remove(queue);
        let state = broker.queues.entry(queue.to_string()).or_default();

        state.consumers.retain(|consumer| !consumer.sender.is_closed());

        if !state.consumers.is_empty() && (state.exclusive || exclusive) {
            return Err(Error::ExclusiveConsumer(queue.to_string()));
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        while let Some(delivery) = state.backlog.pop_front() {
            // The receiver is held right here so this cannot fail.
            let _ = sender.send(delivery);
        }

        let id = Uuid::new_v4();
        state.consumers.push(Consumer { id, sender });
        state.exclusive = exclusive;

        Ok((id, receiver))
    }

    pub(crate) fn detach(&self, queue: &str, id: Uuid) {
        let mut broker = self.state.lock();
        let Some(state) = broker.queues.get_mut(queue) else {
            return;
        };

        state.consumers.retain(|consumer| consumer.id != id);
        if !state.consumers.is_empty() {
            return;
        }

        if state.exclusive {
            broker.queues.remove(queue);
            broker.released.insert(queue.to_string());
        } else if state.backlog.is_empty() {
            broker.queues.remove(queue);
        }
    }
}
