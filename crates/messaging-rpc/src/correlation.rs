use std::fmt;

use rand::Rng;
use rand::distributions::Alphanumeric;
use tracing::warn;

/// Length of a generated correlation id.
pub const CORRELATION_ID_LEN: usize = 32;

const REPLY_SUFFIX_LEN: usize = 8;

/// Opaque token linking a request to its reply.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Generates a fresh random id of [`CORRELATION_ID_LEN`] alphanumeric
    /// characters.
    #[must_use]
    pub fn generate() -> Self {
        Self(random_alphanumeric(CORRELATION_ID_LEN))
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn random_alphanumeric(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Builds the pattern a queue listens on for its replies:
/// `{hostname}.{pid}.{8 random alphanumerics}`.
pub(crate) fn reply_destination() -> String {
    let hostname = match nix::unistd::gethostname() {
        Ok(hostname) => hostname.to_string_lossy().into_owned(),
        Err(e) => {
            warn!("failed to read hostname, using localhost: {}", e);
            "localhost".to_string()
        }
    };

    format!(
        "{}.{}.{}",
        hostname,
        std::process::id(),
        random_alphanumeric(REPLY_SUFFIX_LEN)
    )
}
