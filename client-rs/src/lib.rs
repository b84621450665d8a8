//! Schemebus Rust Client
//!
//! The peer side of the schemebus message bus: fire-and-forget events to the
//! hub or another peer, request/response invocation of hub handlers, and an
//! auto-reconnecting event stream from the hub.
//!
//! # Example
//!
//! ```no_run
//! use schemebus::{HubConfig, IpcHub, LocalHost};
//! use schemebus_client::{ClientConfig, IpcClient};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let host = LocalHost::new();
//!     let hub = IpcHub::new(&host, HubConfig::new())?;
//!     host.set_ready();
//!
//!     hub.handle("host-info", |_| async { Ok(json!({"os": std::env::consts::OS})) });
//!
//!     let client = IpcClient::new(host.session(), ClientConfig::new().name("first").stream_from_main());
//!
//!     // Events pushed by the hub
//!     client.on("metrics", |event| {
//!         println!("metrics from {:?}: {:?}", event.source, event.values);
//!     });
//!
//!     // Fire-and-forget to another peer
//!     client.send_to("random-numbers", Some("second"), vec![json!(4)]).await?;
//!
//!     // Request/response
//!     let info: serde_json::Value = client.invoke("host-info", vec![]).await?;
//!     println!("{}", info);
//!
//!     client.disconnect().await;
//!     Ok(())
//! }
//! ```

mod client;
mod config;

pub use client::{ConnectionState, IpcClient};
pub use config::ClientConfig;
pub use schemebus::{BusError, Event, ListenerId, Result};
