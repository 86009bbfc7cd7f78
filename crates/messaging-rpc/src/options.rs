use std::collections::HashMap;
use std::time::Duration;

/// Timeout applied to requests that do not set their own.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Options for a [`Queue`](crate::Queue).
#[derive(Clone, Debug)]
pub struct QueueOptions {
    /// Timeout for requests that do not set one.
    pub default_timeout: Duration,

    /// Maximum number of requests each `pull` handler works on at once.
    /// `None` means unbounded.
    pub prefetch: Option<usize>,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            default_timeout: DEFAULT_TIMEOUT,
            prefetch: None,
        }
    }
}

impl QueueOptions {
    /// Sets the default request timeout.
    #[must_use]
    pub const fn default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Limits how many requests each `pull` handler works on at once.
    #[must_use]
    pub const fn prefetch(mut self, prefetch: usize) -> Self {
        self.prefetch = Some(prefetch);
        self
    }
}

/// Options for a single [`push`](crate::Queue::push).
///
/// The reply pattern and correlation id are always chosen by the queue.
#[derive(Clone, Debug, Default)]
pub struct PushOptions {
    /// Overrides the queue's default timeout.
    pub timeout: Option<Duration>,

    /// Headers passed through to the transport.
    pub headers: HashMap<String, String>,
}

impl PushOptions {
    /// Sets the request timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Adds a passthrough header.
    #[must_use]
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }
}
