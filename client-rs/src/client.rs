//! Client session implementation

use crate::config::ClientConfig;

use futures::StreamExt;
use parking_lot::Mutex;
use schemebus::events::{Event, EventEmitter, ListenerId};
use schemebus::protocol::{decode, Envelope, Registration, Route};
use schemebus::transport::{
    ProtocolRequest, ProtocolResponse, Transport, STATUS_INTERNAL_ERROR, STATUS_NOT_FOUND,
};
use schemebus::{BusError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// State of the inbound event stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No event stream (not enabled, or stopped)
    Disconnected,
    /// Opening the first event stream
    Connecting,
    /// Event stream open and being read
    Connected,
    /// Reopening the event stream after it ended or failed
    Reconnecting,
}

/// Internal client state
struct ClientInner {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    events: EventEmitter,
    state: watch::Sender<ConnectionState>,
    state_rx: watch::Receiver<ConnectionState>,
    shutdown: watch::Sender<bool>,
    stream_task: Mutex<Option<JoinHandle<()>>>,
    reconnects: AtomicU64,
}

/// A peer session on the bus
///
/// Sends events to the hub, invokes hub handlers, and (when enabled) keeps an
/// event stream from the hub open for as long as the session lives. Cheaply
/// cloneable as it uses an internal Arc.
#[derive(Clone)]
pub struct IpcClient {
    inner: Arc<ClientInner>,
}

impl IpcClient {
    /// Create a session over `transport`
    ///
    /// With `stream_from_main` enabled the event stream is opened right away,
    /// which requires a running Tokio runtime.
    pub fn new(transport: Arc<dyn Transport>, config: ClientConfig) -> Self {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (shutdown, _) = watch::channel(false);
        let stream_from_main = config.stream_from_main;

        let client = Self {
            inner: Arc::new(ClientInner {
                config,
                transport,
                events: EventEmitter::new(),
                state: state_tx,
                state_rx,
                shutdown,
                stream_task: Mutex::new(None),
                reconnects: AtomicU64::new(0),
            }),
        };

        if stream_from_main {
            client.stream_from_main();
        }

        client
    }

    /// This session's identity
    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.inner.state_rx.borrow()
    }

    /// Get a receiver for connection state changes
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_rx.clone()
    }

    /// How many times the event stream has been reopened
    pub fn reconnect_count(&self) -> u64 {
        self.inner.reconnects.load(Ordering::SeqCst)
    }

    /// Broadcast an event through the hub
    pub async fn send(&self, channel: &str, values: Vec<Value>) -> Result<()> {
        self.send_to(channel, None, values).await
    }

    /// Send an event to the peer registered as `destination` (or the hub for `None`)
    pub async fn send_to(
        &self,
        channel: &str,
        destination: Option<&str>,
        values: Vec<Value>,
    ) -> Result<()> {
        let mut envelope = self.envelope(channel, values);
        envelope.destination = destination.map(str::to_string);

        let response = self.inner.post(Route::SendToMain, &envelope).await?;
        if !response.is_success() {
            return Err(BusError::Transport(format!(
                "{} answered status {}",
                Route::SendToMain,
                response.status
            )));
        }

        response.into_bytes().await?;
        Ok(())
    }

    /// Call the hub handler for `channel` and deserialize its result
    pub async fn invoke<T: DeserializeOwned>(&self, channel: &str, values: Vec<Value>) -> Result<T> {
        let envelope = self.envelope(channel, values);
        let response = self.inner.post(Route::InvokeOnMain, &envelope).await?;
        let status = response.status;

        if response.is_success() {
            let body = response.into_bytes().await?;
            return serde_json::from_slice(&body).map_err(BusError::Serialization);
        }

        match status {
            STATUS_NOT_FOUND => Err(BusError::HandlerNotFound(channel.to_string())),
            STATUS_INTERNAL_ERROR => {
                let body = response.into_bytes().await?;
                Err(BusError::Invocation(String::from_utf8_lossy(&body).into_owned()))
            }
            _ => Err(BusError::Transport(format!(
                "{} answered status {}",
                Route::InvokeOnMain,
                status
            ))),
        }
    }

    /// Listen for events on `channel` from the hub's stream
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

    /// Start the event stream if it is not already running
    pub fn stream_from_main(&self) {
        let mut task = self.inner.stream_task.lock();
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }

        self.inner.shutdown.send_replace(false);
        let shutdown = self.inner.shutdown.subscribe();
        *task = Some(tokio::spawn(stream_loop(self.inner.clone(), shutdown)));
    }

    /// Stop the event stream and wait for the loop to exit
    pub async fn disconnect(&self) {
        self.inner.shutdown.send_replace(true);

        let task = self.inner.stream_task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }

        self.inner.set_state(ConnectionState::Disconnected);
    }

    fn envelope(&self, channel: &str, values: Vec<Value>) -> Envelope {
        Envelope::new(channel, values).from_source(self.inner.config.name.clone())
    }
}

impl ClientInner {
    fn set_state(&self, state: ConnectionState) {
        let _ = self.state.send_replace(state);
    }

    async fn post<B: Serialize>(&self, route: Route, body: &B) -> Result<ProtocolResponse> {
        let body = serde_json::to_vec(body)?;
        let request = ProtocolRequest::new(route.url(&self.config.scheme), body);
        self.transport.fetch(request).await
    }

    /// Open one event stream and read it until it ends
    async fn pump_stream(&self) -> Result<()> {
        let registration = Registration {
            source: Some(self.config.name.clone()),
        };

        let response = self.post(Route::StreamFromMain, &registration).await?;
        if !response.is_success() {
            return Err(BusError::Transport(format!(
                "{} answered status {}",
                Route::StreamFromMain,
                response.status
            )));
        }

        self.set_state(ConnectionState::Connected);
        info!(name = %self.config.name, "Event stream open");

        let mut frames = decode(response.body);
        while let Some(frame) = frames.next().await {
            let envelope = frame?;
            let event = Event::new(envelope.channel, envelope.source, envelope.values);
            if !self.events.emit(&event) {
                debug!(channel = %event.channel, "No listeners for event");
            }
        }

        Ok(())
    }
}

/// Keep the event stream open until shutdown
///
/// A stream that ends cleanly is reopened at once; a failed one is retried
/// with exponential backoff.
async fn stream_loop(inner: Arc<ClientInner>, mut shutdown: watch::Receiver<bool>) {
    let mut attempt = 0u32;
    inner.set_state(ConnectionState::Connecting);

    loop {
        if *shutdown.borrow() {
            break;
        }

        let outcome = tokio::select! {
            outcome = inner.pump_stream() => outcome,
            _ = shutdown.changed() => break,
        };

        match outcome {
            Ok(()) => {
                debug!(name = %inner.config.name, "Event stream ended, reopening");
                attempt = 0;
                tokio::task::yield_now().await;
            }
            Err(e) => {
                let delay = inner.config.backoff(attempt);
                if e.is_retryable() {
                    warn!(
                        name = %inner.config.name,
                        error = %e,
                        attempt = attempt + 1,
                        "Event stream failed, retrying in {:?}",
                        delay
                    );
                } else {
                    error!(
                        name = %inner.config.name,
                        error = %e,
                        attempt = attempt + 1,
                        "Unexpected event stream error, retrying in {:?}",
                        delay
                    );
                }
                attempt = attempt.saturating_add(1);
                inner.set_state(ConnectionState::Reconnecting);

                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown.changed() => break,
                }
            }
        }

        inner.reconnects.fetch_add(1, Ordering::SeqCst);
        inner.set_state(ConnectionState::Reconnecting);
    }

    inner.set_state(ConnectionState::Disconnected);
    debug!(name = %inner.config.name, "Event stream stopped");
}
