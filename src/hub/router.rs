//! Hub message router
//!
//! Interprets each inbound request by its route and drives the subscriber
//! registry, the handler table and the hub's own event interface.

use crate::error::{BusError, Result};
use crate::events::{Event, EventEmitter, ListenerId};
use crate::hub::config::HubConfig;
use crate::hub::handlers::HandlerTable;
use crate::hub::registry::SubscriberRegistry;
use crate::protocol::{Envelope, Registration, Route};
use crate::transport::{
    ProtocolHandler, ProtocolHost, ProtocolRequest, ProtocolResponse, ProtocolSession,
    SchemePrivileges, STATUS_BAD_REQUEST, STATUS_INTERNAL_ERROR, STATUS_NOT_FOUND, STATUS_OK,
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

struct HubInner {
    config: HubConfig,
    registry: SubscriberRegistry,
    handlers: HandlerTable,
    events: EventEmitter,
}

/// The coordinating endpoint of the bus
///
/// Cheaply cloneable; every clone shares one registry and handler table.
#[derive(Clone)]
pub struct IpcHub {
    inner: Arc<HubInner>,
}

impl IpcHub {
    /// Create the hub and register its scheme with the host
    ///
    /// Must run before the host is ready, otherwise returns
    /// [`BusError::SetupOrder`]. The request handler is attached to each
    /// configured session once the host signals readiness.
    pub fn new<H>(host: &H, config: HubConfig) -> Result<Self>
    where
        H: ProtocolHost + ?Sized,
    {
        if host.is_ready() {
            return Err(BusError::SetupOrder);
        }

        host.register_schemes_as_privileged(&[SchemePrivileges::fetchable(config.scheme.clone())])?;

        let hub = Self {
            inner: Arc::new(HubInner {
                config,
                registry: SubscriberRegistry::new(),
                handlers: HandlerTable::new(),
                events: EventEmitter::new(),
            }),
        };

        let default_session = host.default_session();
        let attaching = hub.clone();
        host.when_ready(Box::new(move || attaching.attach(default_session)));

        Ok(hub)
    }

    fn attach(&self, default_session: Arc<dyn ProtocolSession>) {
        let sessions = match &self.inner.config.get_sessions {
            Some(provider) => provider(),
            None => vec![default_session],
        };

        let scheme = &self.inner.config.scheme;
        let handler: Arc<dyn ProtocolHandler> = Arc::new(self.clone());

        for session in &sessions {
            if let Err(e) = session.register_stream_protocol(scheme, handler.clone()) {
                warn!(scheme = %scheme, error = %e, "Failed to register protocol on session");
            }
        }

        info!(scheme = %scheme, sessions = sessions.len(), "Hub attached");
    }

    pub fn scheme(&self) -> &str {
        &self.inner.config.scheme
    }

    /// Broadcast an event to every subscribed client
    pub fn send(&self, channel: &str, values: Vec<Value>) -> Result<usize> {
        self.publish(Envelope::new(channel, values))
    }

    /// Send an event to the clients registered as `destination`
    pub fn send_to(&self, channel: &str, destination: &str, values: Vec<Value>) -> Result<usize> {
        self.publish(Envelope::new(channel, values).to_destination(destination))
    }

    fn publish(&self, envelope: Envelope) -> Result<usize> {
        if self.inner.config.warn_no_renderers && !self.inner.registry.has_listeners() {
            warn!(
                channel = %envelope.channel,
                "No clients are listening. Hub-to-client events need a client with \
                 stream_from_main enabled; disable this warning with \
                 HubConfig::warn_no_renderers(false)"
            );
        }

        self.inner.registry.dispatch(&envelope)
    }

    /// Listen for client events addressed to the hub
    pub fn on<F>(&self, channel: &str, listener: F) -> ListenerId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.inner.events.on(channel, listener)
    }

    pub fn once<F>(&self, channel: &str, listener: F) -> ListenerId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.inner.events.once(channel, listener)
    }

    pub fn off(&self, channel: &str, id: ListenerId) -> bool {
        self.inner.events.off(channel, id)
    }

    /// Answer `invoke` calls on `channel`, replacing any existing handler
    pub fn handle<F, Fut>(&self, channel: &str, handler: F)
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        self.inner.handlers.handle(channel, handler);
    }

    pub fn remove_handle(&self, channel: &str) -> bool {
        self.inner.handlers.un_handle(channel)
    }

    /// End every stream registered under `source`; the clients reconnect on their own
    pub fn disconnect(&self, source: &str) -> usize {
        let closed = self.inner.registry.close_source(source);
        info!(source = source, closed = closed, "Disconnected subscriber streams");
        closed
    }

    /// End every subscriber stream
    pub fn disconnect_all(&self) -> usize {
        self.inner.registry.clear()
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.registry.count()
    }

    pub fn has_listeners(&self) -> bool {
        self.inner.registry.has_listeners()
    }

    /// Answer one request; the entry point used by the transport
    pub async fn handle_request(&self, request: ProtocolRequest) -> ProtocolResponse {
        let Some(route) = Route::from_url(&self.inner.config.scheme, &request.url) else {
            warn!(url = %request.url, "Request for unknown route");
            return ProtocolResponse::empty(STATUS_NOT_FOUND);
        };

        debug!(route = %route, "Handling request");

        match route {
            Route::SendToMain => self.on_send(request.body),
            Route::InvokeOnMain => self.on_invoke(request.body).await,
            Route::StreamFromMain => self.on_stream(request.body),
        }
    }

    fn on_send(&self, body: Option<Bytes>) -> ProtocolResponse {
        let Some(envelope) = parse_envelope(Route::SendToMain, body) else {
            return ProtocolResponse::empty(STATUS_BAD_REQUEST);
        };

        if envelope.destination.is_some() {
            if let Err(e) = self.inner.registry.dispatch(&envelope) {
                warn!(channel = %envelope.channel, error = %e, "Failed to relay envelope");
            }
        }

        if envelope.is_for_main() {
            let event = Event::new(envelope.channel, envelope.source, envelope.values);
            if !self.inner.events.emit(&event) {
                debug!(channel = %event.channel, "No hub listeners for event");
            }
        }

        ProtocolResponse::empty(STATUS_OK)
    }

    async fn on_invoke(&self, body: Option<Bytes>) -> ProtocolResponse {
        let Some(envelope) = parse_envelope(Route::InvokeOnMain, body) else {
            return ProtocolResponse::empty(STATUS_BAD_REQUEST);
        };

        match self
            .inner
            .handlers
            .invoke(&envelope.channel, envelope.values)
            .await
        {
            Ok(value) => match serde_json::to_vec(&value) {
                Ok(json) => ProtocolResponse::full(STATUS_OK, json),
                Err(e) => {
                    warn!(channel = %envelope.channel, error = %e, "Failed to serialize handler result");
                    ProtocolResponse::full(STATUS_INTERNAL_ERROR, e.to_string())
                }
            },
            Err(BusError::HandlerNotFound(channel)) => {
                debug!(channel = %channel, "No handler for invoke");
                ProtocolResponse::empty(STATUS_NOT_FOUND)
            }
            Err(e) => {
                warn!(channel = %envelope.channel, error = %e, "Handler failed");
                ProtocolResponse::full(STATUS_INTERNAL_ERROR, e.to_string())
            }
        }
    }

    fn on_stream(&self, body: Option<Bytes>) -> ProtocolResponse {
        let registration = match body.as_deref() {
            None | Some([]) => Registration::default(),
            Some(bytes) => match serde_json::from_slice::<Registration>(bytes) {
                Ok(registration) => registration,
                Err(e) => {
                    warn!(error = %e, "Malformed stream registration");
                    return ProtocolResponse::empty(STATUS_BAD_REQUEST);
                }
            },
        };

        info!(source = ?registration.source, "Client subscribed");

        let stream = self.inner.registry.add(registration.source);
        ProtocolResponse::streaming(STATUS_OK, stream.boxed())
    }
}

fn parse_envelope(route: Route, body: Option<Bytes>) -> Option<Envelope> {
    let Some(body) = body.filter(|b| !b.is_empty()) else {
        warn!(route = %route, "Request without body");
        return None;
    };

    match serde_json::from_slice(&body) {
        Ok(envelope) => Some(envelope),
        Err(e) => {
            warn!(route = %route, error = %e, "Malformed envelope");
            None
        }
    }
}

#[async_trait]
impl ProtocolHandler for IpcHub {
    async fn handle(&self, request: ProtocolRequest) -> ProtocolResponse {
        self.handle_request(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::decode;
    use crate::transport::{LocalHost, Transport};
    use parking_lot::Mutex;
    use serde_json::json;

    const SCHEME: &str = "test-ipc";

    fn ready_hub() -> (LocalHost, IpcHub) {
        let host = LocalHost::new();
        let hub = IpcHub::new(&host, HubConfig::new().scheme(SCHEME).warn_no_renderers(false))
            .unwrap();
        host.set_ready();
        (host, hub)
    }

    fn request(route: Route, body: &str) -> ProtocolRequest {
        ProtocolRequest::new(route.url(SCHEME), body.to_string())
    }

    fn record(hub: &IpcHub, channel: &str) -> Arc<Mutex<Vec<Event>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        hub.on(channel, move |e| seen_clone.lock().push(e.clone()));
        seen
    }

    #[test]
    fn test_new_after_ready_is_setup_error() {
        let host = LocalHost::new();
        host.set_ready();

        let result = IpcHub::new(&host, HubConfig::new());
        assert!(matches!(result, Err(BusError::SetupOrder)));
    }

    #[test]
    fn test_new_registers_scheme_and_attaches_on_ready() {
        let host = LocalHost::new();
        let _hub = IpcHub::new(&host, HubConfig::new().scheme(SCHEME)).unwrap();

        let privileges = host.privileges(SCHEME).unwrap();
        assert!(privileges.support_fetch_api);
        assert!(privileges.bypass_csp);
        assert!(!host.session().is_protocol_registered(SCHEME));

        host.set_ready();
        assert!(host.session().is_protocol_registered(SCHEME));
    }

    #[test]
    fn test_custom_sessions() {
        let host = LocalHost::new();
        let extra = host.new_session();
        let extra_clone = extra.clone();

        let config = HubConfig::new()
            .scheme(SCHEME)
            .sessions(move || vec![extra_clone.clone() as Arc<dyn ProtocolSession>]);
        let _hub = IpcHub::new(&host, config).unwrap();
        host.set_ready();

        assert!(extra.is_protocol_registered(SCHEME));
        assert!(!host.session().is_protocol_registered(SCHEME));
    }

    #[tokio::test]
    async fn test_send_emits_locally() {
        let (_host, hub) = ready_hub();
        let seen = record(&hub, "media-devices");

        let resp = hub
            .handle_request(request(
                Route::SendToMain,
                r#"{"channel":"media-devices","source":"first","values":[["cam"]]}"#,
            ))
            .await;

        assert_eq!(resp.status, STATUS_OK);
        assert!(resp.into_bytes().await.unwrap().is_empty());

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].source.as_deref(), Some("first"));
        assert_eq!(seen[0].values, vec![json!(["cam"])]);
    }

    #[tokio::test]
    async fn test_send_addressed_to_main_emits_locally() {
        let (_host, hub) = ready_hub();
        let seen = record(&hub, "c");

        hub.handle_request(request(
            Route::SendToMain,
            r#"{"channel":"c","destination":"main","values":[]}"#,
        ))
        .await;

        assert_eq!(seen.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_send_addressed_to_peer_is_relayed_not_emitted() {
        let (_host, hub) = ready_hub();
        let seen = record(&hub, "random-numbers");

        let body = hub
            .handle_request(request(Route::StreamFromMain, r#"{"source":"second"}"#))
            .await
            .body;

        hub.handle_request(request(
            Route::SendToMain,
            r#"{"channel":"random-numbers","source":"first","destination":"second","values":[0.5]}"#,
        ))
        .await;

        assert!(seen.lock().is_empty());

        let mut frames = decode(body);
        let env = frames.next().await.unwrap().unwrap();
        assert_eq!(env.channel, "random-numbers");
        assert_eq!(env.source.as_deref(), Some("first"));
        assert_eq!(env.values, vec![json!(0.5)]);
    }

    #[tokio::test]
    async fn test_send_malformed_is_bad_request() {
        let (_host, hub) = ready_hub();

        let resp = hub.handle_request(request(Route::SendToMain, "{oops")).await;
        assert_eq!(resp.status, STATUS_BAD_REQUEST);

        let resp = hub.handle_request(request(Route::SendToMain, "")).await;
        assert_eq!(resp.status, STATUS_BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unknown_route_is_not_found() {
        let (_host, hub) = ready_hub();
        let resp = hub
            .handle_request(ProtocolRequest::new(format!("{}://to-main", SCHEME), "{}"))
            .await;
        assert_eq!(resp.status, STATUS_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_invoke_statuses() {
        let (_host, hub) = ready_hub();
        hub.handle("echo", |args| async move { Ok(args.into_iter().next().unwrap_or(Value::Null)) });
        hub.handle("fail", |_| async { Err(anyhow::anyhow!("nope")) });

        let ok = hub
            .handle_request(request(Route::InvokeOnMain, r#"{"channel":"echo","values":[42]}"#))
            .await;
        assert_eq!(ok.status, STATUS_OK);
        assert_eq!(&ok.into_bytes().await.unwrap()[..], b"42");

        let missing = hub
            .handle_request(request(Route::InvokeOnMain, r#"{"channel":"ping","values":[]}"#))
            .await;
        assert_eq!(missing.status, STATUS_NOT_FOUND);
        assert!(missing.into_bytes().await.unwrap().is_empty());

        let failed = hub
            .handle_request(request(Route::InvokeOnMain, r#"{"channel":"fail","values":[]}"#))
            .await;
        assert_eq!(failed.status, STATUS_INTERNAL_ERROR);
        let message = failed.into_bytes().await.unwrap();
        assert!(String::from_utf8_lossy(&message).contains("nope"));
    }

    #[tokio::test]
    async fn test_stream_registration() {
        let (_host, hub) = ready_hub();

        let anon = hub.handle_request(request(Route::StreamFromMain, "")).await;
        assert_eq!(anon.status, STATUS_OK);
        let named = hub
            .handle_request(request(Route::StreamFromMain, r#"{"source":"a"}"#))
            .await;
        assert_eq!(hub.subscriber_count(), 2);

        let bad = hub.handle_request(request(Route::StreamFromMain, "[")).await;
        assert_eq!(bad.status, STATUS_BAD_REQUEST);
        assert_eq!(hub.subscriber_count(), 2);

        drop(anon);
        drop(named);
        assert_eq!(hub.subscriber_count(), 0);
        assert!(!hub.has_listeners());
    }

    #[tokio::test]
    async fn test_hub_send_to() {
        let (_host, hub) = ready_hub();
        let a = hub
            .handle_request(request(Route::StreamFromMain, r#"{"source":"a"}"#))
            .await;
        let b = hub
            .handle_request(request(Route::StreamFromMain, r#"{"source":"b"}"#))
            .await;

        assert_eq!(hub.send_to("topic", "b", vec![json!("x")]).unwrap(), 1);
        assert_eq!(hub.send("all", vec![]).unwrap(), 2);
        hub.disconnect_all();

        let a: Vec<String> = decode(a.body).map(|f| f.unwrap().channel).collect().await;
        let b: Vec<String> = decode(b.body).map(|f| f.unwrap().channel).collect().await;
        assert_eq!(a, vec!["all"]);
        assert_eq!(b, vec!["topic", "all"]);
    }

    #[tokio::test]
    async fn test_requests_through_transport() {
        let (host, hub) = ready_hub();
        hub.handle("answer", |_| async { Ok(json!({"value": 42})) });

        let resp = host
            .session()
            .fetch(request(Route::InvokeOnMain, r#"{"channel":"answer","values":[]}"#))
            .await
            .unwrap();
        let value: Value = serde_json::from_slice(&resp.into_bytes().await.unwrap()).unwrap();
        assert_eq!(value, json!({"value": 42}));
    }

    #[test]
    fn test_disconnect_by_source() {
        let host = LocalHost::new();
        let hub = IpcHub::new(&host, HubConfig::new()).unwrap();

        let _a1 = hub.inner.registry.add(Some("a".into()));
        let _a2 = hub.inner.registry.add(Some("a".into()));
        let _b = hub.inner.registry.add(Some("b".into()));

        assert_eq!(hub.disconnect("a"), 2);
        assert_eq!(hub.disconnect("a"), 0);
        assert_eq!(hub.subscriber_count(), 1);
    }
}
