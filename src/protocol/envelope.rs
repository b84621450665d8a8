//! The addressed message unit

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Scheme used when none is configured
pub const DEFAULT_SCHEME: &str = "schemebus-ipc";

/// Well-known identity of the hub itself
pub const MAIN_ID: &str = "main";

/// One message on the bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Logical topic or method name
    pub channel: String,
    /// Self-declared sender identity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Addressed recipient; `None` means broadcast
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    /// Positional arguments, opaque to the bus
    #[serde(default)]
    pub values: Vec<Value>,
}

impl Envelope {
    pub fn new(channel: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            channel: channel.into(),
            source: None,
            destination: None,
            values,
        }
    }

    pub fn from_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn to_destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = Some(destination.into());
        self
    }

    /// Whether a subscriber registered as `source_id` should receive this envelope
    pub fn is_for(&self, source_id: Option<&str>) -> bool {
        match self.destination.as_deref() {
            None => true,
            Some(dest) => source_id == Some(dest),
        }
    }

    /// Whether the hub's own listeners should see this envelope
    pub fn is_for_main(&self) -> bool {
        self.destination.as_deref().map_or(true, |dest| dest == MAIN_ID)
    }
}

/// Body of a `stream-from-main` request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Registration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}
