//! Schemebus - a message bus between one hub and many peers
//!
//! The bus rides on a host-supplied request/stream transport addressed by a
//! custom URL scheme and offers three patterns over it:
//! - fire-and-forget events from peers to the hub (optionally relayed to one peer)
//! - hub-originated events streamed to subscribed peers as newline-delimited JSON
//! - request/response invocation of hub handlers

pub mod error;
pub mod events;
pub mod hub;
pub mod protocol;
pub mod transport;

pub use error::{BusError, Result};
pub use events::{Event, EventEmitter, ListenerId};
pub use hub::{HubConfig, IpcHub};
pub use protocol::{Envelope, Route, DEFAULT_SCHEME, MAIN_ID};
pub use transport::{LocalHost, LocalSession, ProtocolHost, ProtocolSession, Transport};
