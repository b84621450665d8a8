//! Configuration for the client session

use schemebus::DEFAULT_SCHEME;
use std::time::Duration;
use uuid::Uuid;

/// Configuration for a client session
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Scheme the hub answers on
    pub scheme: String,

    /// This session's identity, stamped as `source` on everything it sends
    pub name: String,

    /// Whether to open the long-lived event stream from the hub
    pub stream_from_main: bool,

    /// Initial delay before retrying a failed event stream
    pub reconnect_delay: Duration,

    /// Maximum delay between retries of a failed event stream
    pub max_reconnect_delay: Duration,
}

impl ClientConfig {
    /// Defaults: default scheme, a fresh random name, no event stream
    pub fn new() -> Self {
        Self {
            scheme: DEFAULT_SCHEME.to_string(),
            name: Uuid::new_v4().to_string(),
            stream_from_main: false,
            reconnect_delay: Duration::from_millis(100),
            max_reconnect_delay: Duration::from_secs(5),
        }
    }

    pub fn scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into();
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Opt into hub-to-client events
    pub fn stream_from_main(mut self) -> Self {
        self.stream_from_main = true;
        self
    }

    /// Set the retry delay range used after stream failures
    ///
    /// A stream that ends cleanly is always reopened immediately.
    pub fn reconnect_delay(mut self, initial: Duration, max: Duration) -> Self {
        self.reconnect_delay = initial;
        self.max_reconnect_delay = max;
        self
    }

    /// Delay before retry number `attempt` (starting at 0)
    pub fn backoff(&self, attempt: u32) -> Duration {
        std::cmp::min(
            self.reconnect_delay
                .saturating_mul(2u32.saturating_pow(attempt)),
            self.max_reconnect_delay,
        )
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new()
    }
}
