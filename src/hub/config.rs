//! Configuration for the hub

use crate::protocol::DEFAULT_SCHEME;
use crate::transport::ProtocolSession;
use std::fmt;
use std::sync::Arc;

/// Supplies the host contexts the hub serves, evaluated once the host is ready
pub type SessionProvider = Arc<dyn Fn() -> Vec<Arc<dyn ProtocolSession>> + Send + Sync>;

/// Hub configuration
#[derive(Clone)]
pub struct HubConfig {
    /// Scheme the hub answers on
    pub scheme: String,

    /// Contexts to serve; `None` means the host's default context
    pub get_sessions: Option<SessionProvider>,

    /// Warn when publishing while no client is subscribed
    pub warn_no_renderers: bool,
}

impl HubConfig {
    pub fn new() -> Self {
        Self {
            scheme: DEFAULT_SCHEME.to_string(),
            get_sessions: None,
            warn_no_renderers: true,
        }
    }

    /// Answer on a different scheme
    pub fn scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into();
        self
    }

    /// Serve the contexts returned by `provider` instead of the default one
    pub fn sessions<F>(mut self, provider: F) -> Self
    where
        F: Fn() -> Vec<Arc<dyn ProtocolSession>> + Send + Sync + 'static,
    {
        self.get_sessions = Some(Arc::new(provider));
        self
    }

    /// Enable or disable the no-subscriber warning
    pub fn warn_no_renderers(mut self, warn: bool) -> Self {
        self.warn_no_renderers = warn;
        self
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for HubConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HubConfig")
            .field("scheme", &self.scheme)
            .field("get_sessions", &self.get_sessions.as_ref().map(|_| "<provider>"))
            .field("warn_no_renderers", &self.warn_no_renderers)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = HubConfig::new();

        assert_eq!(config.scheme, DEFAULT_SCHEME);
        assert!(config.get_sessions.is_none());
        assert!(config.warn_no_renderers);
    }

    #[test]
    fn test_config_builder_chain() {
        let config = HubConfig::new()
            .scheme("custom-ipc")
            .sessions(Vec::new)
            .warn_no_renderers(false);

        assert_eq!(config.scheme, "custom-ipc");
        assert!(config.get_sessions.is_some());
        assert!(!config.warn_no_renderers);
    }

    #[test]
    fn test_config_debug_hides_provider() {
        let config = HubConfig::new().sessions(Vec::new);
        let debug = format!("{:?}", config);
        assert!(debug.contains("<provider>"));
        assert!(debug.contains(DEFAULT_SCHEME));
    }
}
