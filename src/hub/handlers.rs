//! Handler table for request/response invocation

use crate::error::{BusError, Result};
use dashmap::DashMap;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

/// An asynchronous responder: argument list in, one value out
pub type Handler = Arc<dyn Fn(Vec<Value>) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync>;

/// At most one handler per channel
#[derive(Clone, Default)]
pub struct HandlerTable {
    handlers: Arc<DashMap<String, Handler>>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `channel`, replacing any existing one
    pub fn handle<F, Fut>(&self, channel: &str, handler: F)
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |args| handler(args).boxed());
        if self.handlers.insert(channel.to_string(), handler).is_some() {
            debug!(channel = channel, "Replaced existing handler");
        }
    }

    /// Remove the handler for `channel` if present
    pub fn un_handle(&self, channel: &str) -> bool {
        self.handlers.remove(channel).is_some()
    }

    pub fn contains(&self, channel: &str) -> bool {
        self.handlers.contains_key(channel)
    }

    pub fn count(&self) -> usize {
        self.handlers.len()
    }

    /// Run the handler for `channel`
    ///
    /// A missing handler is `HandlerNotFound`; a handler that fails is
    /// `Invocation`. The two are never conflated with a successful `null`.
    pub async fn invoke(&self, channel: &str, args: Vec<Value>) -> Result<Value> {
        // Clone out of the map so no shard lock is held across the await
        let handler = self
            .handlers
            .get(channel)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| BusError::HandlerNotFound(channel.to_string()))?;

        handler(args)
            .await
            .map_err(|e| BusError::Invocation(format!("{:#}", e)))
    }
}
