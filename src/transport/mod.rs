//! Transport contract between the bus core and its host
//!
//! The bus never opens sockets itself. A host supplies:
//! - a way to mark the scheme privileged before it becomes ready ([`ProtocolHost`])
//! - per-context request dispatch ([`ProtocolSession`]) calling a [`ProtocolHandler`]
//! - a client-side [`Transport`] that turns a request into a streamed response
//!
//! [`local`] provides an in-process implementation of all three.

pub mod local;

pub use local::{LocalHost, LocalSession};

use crate::error::{BusError, Result};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::stream::{self, BoxStream, StreamExt};
use std::fmt;
use std::sync::Arc;

pub const STATUS_OK: u16 = 200;
pub const STATUS_BAD_REQUEST: u16 = 400;
pub const STATUS_NOT_FOUND: u16 = 404;
pub const STATUS_INTERNAL_ERROR: u16 = 500;

/// A response body: chunks of bytes until the stream ends
pub type BodyStream = BoxStream<'static, Result<Bytes>>;

/// An inbound request addressed by URL
#[derive(Debug, Clone)]
pub struct ProtocolRequest {
    pub url: String,
    pub body: Option<Bytes>,
}

impl ProtocolRequest {
    pub fn new(url: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            url: url.into(),
            body: Some(body.into()),
        }
    }

    /// Scheme part of the URL, if it has one
    pub fn scheme(&self) -> Option<&str> {
        self.url.split_once("://").map(|(scheme, _)| scheme)
    }
}

/// A status plus a (possibly never-ending) body
pub struct ProtocolResponse {
    pub status: u16,
    pub body: BodyStream,
}

impl ProtocolResponse {
    /// Status with an already-terminated body
    pub fn empty(status: u16) -> Self {
        Self {
            status,
            body: stream::empty().boxed(),
        }
    }

    /// Status with a single-chunk body
    pub fn full(status: u16, body: impl Into<Bytes>) -> Self {
        let chunk: Bytes = body.into();
        Self {
            status,
            body: stream::once(async move { Ok(chunk) }).boxed(),
        }
    }

    /// Status with an open-ended body
    pub fn streaming(status: u16, body: BodyStream) -> Self {
        Self { status, body }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Collect the whole body; only meaningful for bodies that end
    pub async fn into_bytes(mut self) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = self.body.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }
}

impl fmt::Debug for ProtocolResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtocolResponse")
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

/// Privileges requested for a custom scheme
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemePrivileges {
    pub scheme: String,
    pub bypass_csp: bool,
    pub support_fetch_api: bool,
}

impl SchemePrivileges {
    /// The privileges the bus needs: fetchable and exempt from content policy
    pub fn fetchable(scheme: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
            bypass_csp: true,
            support_fetch_api: true,
        }
    }
}

/// Answers requests for one scheme
#[async_trait]
pub trait ProtocolHandler: Send + Sync {
    async fn handle(&self, request: ProtocolRequest) -> ProtocolResponse;
}

/// A host context that can serve a custom scheme
pub trait ProtocolSession: Send + Sync {
    /// Route every request for `scheme` in this context to `handler`
    fn register_stream_protocol(&self, scheme: &str, handler: Arc<dyn ProtocolHandler>) -> Result<()>;
}

/// Callback run once the host is ready
pub type ReadyCallback = Box<dyn FnOnce() + Send>;

/// The host process lifecycle as seen by the hub
pub trait ProtocolHost: Send + Sync {
    /// Whether the host already signalled readiness
    fn is_ready(&self) -> bool;

    /// Must be called before the host is ready
    fn register_schemes_as_privileged(&self, schemes: &[SchemePrivileges]) -> Result<()>;

    /// Run `callback` when the host becomes ready (immediately if it already is)
    fn when_ready(&self, callback: ReadyCallback);

    /// The context used when no explicit set of sessions is configured
    fn default_session(&self) -> Arc<dyn ProtocolSession>;
}

/// Client-side request primitive
#[async_trait]
pub trait Transport: Send + Sync {
    async fn fetch(&self, request: ProtocolRequest) -> Result<ProtocolResponse>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn fetch(&self, request: ProtocolRequest) -> Result<ProtocolResponse> {
        (**self).fetch(request).await
    }
}

pub(crate) fn refused(reason: impl fmt::Display) -> BusError {
    BusError::Transport(reason.to_string())
}
