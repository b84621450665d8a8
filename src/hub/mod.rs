//! Hub side of the bus
//!
//! Owns the subscriber registry and handler table, and answers the three
//! request routes on behalf of the host.

mod config;
mod handlers;
mod registry;
mod router;

pub use config::{HubConfig, SessionProvider};
pub use handlers::{Handler, HandlerTable};
pub use registry::{Subscriber, SubscriberRegistry, SubscriberStream};
pub use router::IpcHub;
