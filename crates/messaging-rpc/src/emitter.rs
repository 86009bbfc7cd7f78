use crate::error::Error;

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, error};

/// Instance-wide notification for errors no caller can receive.
///
/// Fires at most once: the first escalated error is kept and every later one
/// is logged and discarded.
#[derive(Clone, Debug)]
pub struct ErrorEmitter {
    slot: Arc<watch::Sender<Option<Error>>>,
}

impl Default for ErrorEmitter {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorEmitter {
    /// Creates an emitter that has not fired.
    #[must_use]
    pub fn new() -> Self {
        let (slot, _) = watch::channel(None);

        Self {
            slot: Arc::new(slot),
        }
    }

    /// Escalates an error. Returns `true` if this was the first one.
    pub fn emit(&self, escalated: Error) -> bool {
        let mut suppressed = None;
        let fired = self.slot.send_if_modified(|slot| {
            if slot.is_some() {
                suppressed = Some(escalated);
                return false;
            }

            error!("unhandled queue error: {}", escalated);
            *slot = Some(escalated);
            true
        });

        if let Some(suppressed) = suppressed {
            debug!("suppressing repeated queue error: {}", suppressed);
        }

        fired
    }

    /// Returns the escalated error, if any.
    #[must_use]
    pub fn current(&self) -> Option<Error> {
        self.slot.borrow().clone()
    }

    /// Waits until an error has been escalated.
    pub async fn wait(&self) -> Error {
        let mut receiver = self.slot.subscribe();

        let escalated = match receiver.wait_for(Option::is_some).await {
            Ok(slot) => slot.clone(),
            Err(_) => None,
        };

        match escalated {
            Some(escalated) => escalated,
            // The sender lives as long as `self`, so the channel cannot close.
            None => std::future::pending().await,
        }
    }
}
