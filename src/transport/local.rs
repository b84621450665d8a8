//! In-process host: hub and clients share one address space
//!
//! `LocalHost` models the host lifecycle (privileged schemes are declared
//! before `set_ready`), and each `LocalSession` is both a context the hub can
//! serve and a [`Transport`] clients fetch through.

use crate::error::{BusError, Result};
use crate::transport::{
    refused, ProtocolHandler, ProtocolHost, ProtocolRequest, ProtocolResponse, ProtocolSession,
    ReadyCallback, SchemePrivileges, Transport,
};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Default)]
struct HostState {
    ready: bool,
    privileged: HashMap<String, SchemePrivileges>,
    callbacks: Vec<ReadyCallback>,
}

/// An in-memory host process
pub struct LocalHost {
    state: Arc<Mutex<HostState>>,
    default_session: Arc<LocalSession>,
}

impl LocalHost {
    pub fn new() -> Self {
        let state = Arc::new(Mutex::new(HostState::default()));
        let default_session = Arc::new(LocalSession::new(state.clone()));

        Self {
            state,
            default_session,
        }
    }

    /// The default context, typed for use as a client transport
    pub fn session(&self) -> Arc<LocalSession> {
        self.default_session.clone()
    }

    /// Create an additional, independent context
    pub fn new_session(&self) -> Arc<LocalSession> {
        Arc::new(LocalSession::new(self.state.clone()))
    }

    /// Mark the host ready and run the queued callbacks in registration order
    pub fn set_ready(&self) {
        let callbacks = {
            let mut state = self.state.lock();
            if state.ready {
                return;
            }
            state.ready = true;
            std::mem::take(&mut state.callbacks)
        };

        info!(callbacks = callbacks.len(), "Host ready");

        for callback in callbacks {
            callback();
        }
    }

    /// Privileges registered for a scheme
    pub fn privileges(&self, scheme: &str) -> Option<SchemePrivileges> {
        self.state.lock().privileged.get(scheme).cloned()
    }
}

impl Default for LocalHost {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolHost for LocalHost {
    fn is_ready(&self) -> bool {
        self.state.lock().ready
    }

    fn register_schemes_as_privileged(&self, schemes: &[SchemePrivileges]) -> Result<()> {
        let mut state = self.state.lock();
        if state.ready {
            return Err(BusError::SetupOrder);
        }
        for privileges in schemes {
            debug!(scheme = %privileges.scheme, "Registering privileged scheme");
            state
                .privileged
                .insert(privileges.scheme.clone(), privileges.clone());
        }
        Ok(())
    }

    fn when_ready(&self, callback: ReadyCallback) {
        {
            let mut state = self.state.lock();
            if !state.ready {
                state.callbacks.push(callback);
                return;
            }
        }
        callback();
    }

    fn default_session(&self) -> Arc<dyn ProtocolSession> {
        self.default_session.clone()
    }
}

/// One host context with its own scheme handlers
pub struct LocalSession {
    id: Uuid,
    host: Arc<Mutex<HostState>>,
    handlers: DashMap<String, Arc<dyn ProtocolHandler>>,
}

impl LocalSession {
    fn new(host: Arc<Mutex<HostState>>) -> Self {
        Self {
            id: Uuid::new_v4(),
            host,
            handlers: DashMap::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Whether a handler is registered for `scheme` in this context
    pub fn is_protocol_registered(&self, scheme: &str) -> bool {
        self.handlers.contains_key(scheme)
    }
}

impl ProtocolSession for LocalSession {
    fn register_stream_protocol(&self, scheme: &str, handler: Arc<dyn ProtocolHandler>) -> Result<()> {
        if self.handlers.contains_key(scheme) {
            return Err(refused(format!(
                "scheme '{}' already has a handler in session {}",
                scheme, self.id
            )));
        }
        debug!(session = %self.id, scheme = scheme, "Registering stream protocol");
        self.handlers.insert(scheme.to_string(), handler);
        Ok(())
    }
}

#[async_trait]
impl Transport for LocalSession {
    async fn fetch(&self, request: ProtocolRequest) -> Result<ProtocolResponse> {
        let scheme = request
            .scheme()
            .ok_or_else(|| refused(format!("request URL has no scheme: {}", request.url)))?
            .to_string();

        {
            let host = self.host.lock();
            if !host.ready {
                return Err(refused("host is not ready"));
            }
            if !host.privileged.contains_key(&scheme) {
                return Err(refused(format!("scheme '{}' is not privileged", scheme)));
            }
        }

        let handler = self
            .handlers
            .get(&scheme)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| refused(format!("no protocol handler for scheme '{}'", scheme)))?;

        debug!(session = %self.id, url = %request.url, "Dispatching request");
        Ok(handler.handle(request).await)
    }
}
