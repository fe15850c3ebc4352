use std::sync::Arc;

use futures::{future, SinkExt, Stream, StreamExt};
use shared::protocol::{ClientFrame, GatewayEvent};
use tokio::{
    sync::{broadcast, mpsc, watch, Mutex},
    task::JoinHandle,
    time::{sleep, Duration},
};
use tokio_stream::wrappers::BroadcastStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::protocol::{frame::coding::CloseCode, CloseFrame},
    tungstenite::Message,
};
use tracing::{debug, info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 1024;
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting(u32),
}

/// Owns the single push-event connection of one host and fans the parsed
/// frames out to any number of subscribers.
///
/// Transport failures never surface to callers: the run task silently retries
/// with capped exponential backoff until `disconnect` is called. Subscribers
/// hold independent cursors into the broadcast queue.
pub struct GatewayClient {
    endpoint: String,
    events: broadcast::Sender<GatewayEvent>,
    state: Arc<watch::Sender<ConnectionState>>,
    inner: Mutex<GatewayInner>,
}

#[derive(Default)]
struct GatewayInner {
    token: Option<String>,
    outbound: Option<mpsc::UnboundedSender<ClientFrame>>,
    shutdown: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
}

impl GatewayClient {
    /// `base_url` is the host's normalized http(s) origin; the event stream
    /// lives on the matching ws(s) scheme under `/events`.
    pub fn new(base_url: &str) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            endpoint: event_stream_endpoint(base_url),
            events,
            state: Arc::new(state),
            inner: Mutex::new(GatewayInner::default()),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Opens (or re-opens) the connection, identifying with `token`.
    ///
    /// A no-op while a run task with the identical token is alive. Never
    /// fails: transport errors feed the reconnect loop. The teardown of a
    /// previous connection and the spawn with the new token happen under one
    /// lock, so a credential swap cannot race a stale connect.
    pub async fn connect(&self, token: &str) {
        let mut inner = self.inner.lock().await;
        let running = inner.task.as_ref().is_some_and(|task| !task.is_finished());
        if running && inner.token.as_deref() == Some(token) {
            debug!(endpoint = %self.endpoint, "gateway: already connected with this credential");
            return;
        }
        Self::shutdown_locked(&mut inner).await;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        inner.token = Some(token.to_string());
        inner.shutdown = Some(shutdown_tx);
        inner.outbound = Some(outbound_tx);
        inner.task = Some(tokio::spawn(run(
            self.endpoint.clone(),
            token.to_string(),
            self.events.clone(),
            Arc::clone(&self.state),
            outbound_rx,
            shutdown_rx,
        )));
    }

    /// Closes the transport with a normal-closure code and cancels any
    /// pending reconnect in the same step. Safe to call repeatedly; no
    /// reconnect fires afterwards until `connect` is called again.
    pub async fn disconnect(&self) {
        let mut inner = self.inner.lock().await;
        inner.token = None;
        Self::shutdown_locked(&mut inner).await;
        let _ = self.state.send(ConnectionState::Disconnected);
    }

    async fn shutdown_locked(inner: &mut GatewayInner) {
        if let Some(shutdown) = inner.shutdown.take() {
            let _ = shutdown.send(true);
        }
        inner.outbound = None;
        if let Some(task) = inner.task.take() {
            // The run task selects on the shutdown signal at every await
            // point, so this resolves promptly.
            let _ = task.await;
        }
    }

    /// Best-effort write; the frame is dropped silently when not connected.
    pub async fn send(&self, frame: ClientFrame) {
        let inner = self.inner.lock().await;
        match (&inner.outbound, self.is_connected()) {
            (Some(outbound), true) => {
                let _ = outbound.send(frame);
            }
            _ => debug!(endpoint = %self.endpoint, "gateway: dropping frame, not connected"),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.events.subscribe()
    }

    /// The event sequence as a stream; re-subscribable, each call getting its
    /// own cursor. Lagged gaps are skipped.
    pub fn stream(&self) -> impl Stream<Item = GatewayEvent> + Unpin {
        BroadcastStream::new(self.events.subscribe())
            .filter_map(|event| future::ready(event.ok()))
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.state(), ConnectionState::Connected)
    }

    /// Whether a run task is alive, connected or mid-reconnect.
    pub async fn is_active(&self) -> bool {
        let inner = self.inner.lock().await;
        inner.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

fn event_stream_endpoint(base_url: &str) -> String {
    let base = if let Some(rest) = base_url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base_url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base_url.to_string()
    };
    format!("{}/events", base.trim_end_matches('/'))
}

/// `1, 2, 4, 8, 16, 30, 30, …` seconds for attempt `1, 2, 3, …`.
fn reconnect_delay(attempt: u32) -> Duration {
    let doubling = Duration::from_secs(1u64 << attempt.saturating_sub(1).min(5));
    doubling.min(MAX_RECONNECT_DELAY)
}

async fn run(
    endpoint: String,
    token: String,
    events: broadcast::Sender<GatewayEvent>,
    state: Arc<watch::Sender<ConnectionState>>,
    mut outbound: mpsc::UnboundedReceiver<ClientFrame>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut attempt: u32 = 0;
    loop {
        if attempt > 0 {
            let delay = reconnect_delay(attempt);
            let _ = state.send(ConnectionState::Reconnecting(attempt));
            info!(
                endpoint = %endpoint,
                attempt,
                delay_secs = delay.as_secs(),
                "gateway: reconnect scheduled"
            );
            tokio::select! {
                _ = shutdown.changed() => {
                    let _ = state.send(ConnectionState::Disconnected);
                    return;
                }
                _ = sleep(delay) => {}
            }
        }

        let _ = state.send(ConnectionState::Connecting);
        let stream = tokio::select! {
            _ = shutdown.changed() => {
                let _ = state.send(ConnectionState::Disconnected);
                return;
            }
            connected = connect_async(endpoint.as_str()) => match connected {
                Ok((stream, _response)) => stream,
                Err(err) => {
                    warn!(endpoint = %endpoint, error = %err, "gateway: connect failed");
                    attempt += 1;
                    continue;
                }
            }
        };
        let (mut writer, mut reader) = stream.split();

        // Identify must be the first frame on the wire.
        let identify = ClientFrame::Identify {
            token: token.clone(),
        };
        match serde_json::to_string(&identify) {
            Ok(text) => {
                if let Err(err) = writer.send(Message::Text(text)).await {
                    warn!(endpoint = %endpoint, error = %err, "gateway: identify failed");
                    attempt += 1;
                    continue;
                }
            }
            Err(err) => {
                warn!(endpoint = %endpoint, error = %err, "gateway: identify frame unserializable");
                attempt += 1;
                continue;
            }
        }
        let _ = state.send(ConnectionState::Connected);
        info!(endpoint = %endpoint, "gateway: connected");

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    let close = CloseFrame {
                        code: CloseCode::Normal,
                        reason: "client disconnect".into(),
                    };
                    let _ = writer.send(Message::Close(Some(close))).await;
                    let _ = state.send(ConnectionState::Disconnected);
                    return;
                }
                frame = outbound.recv() => match frame {
                    Some(frame) => match serde_json::to_string(&frame) {
                        Ok(text) => {
                            // Best-effort: a write failure surfaces as a read
                            // failure shortly after and drives the reconnect.
                            let _ = writer.send(Message::Text(text)).await;
                        }
                        Err(err) => {
                            warn!(endpoint = %endpoint, error = %err, "gateway: dropping unserializable frame");
                        }
                    },
                    // The client itself was torn down or dropped.
                    None => {
                        let close = CloseFrame {
                            code: CloseCode::Normal,
                            reason: "client disconnect".into(),
                        };
                        let _ = writer.send(Message::Close(Some(close))).await;
                        let _ = state.send(ConnectionState::Disconnected);
                        return;
                    }
                },
                message = reader.next() => match message {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<GatewayEvent>(&text) {
                            Ok(event) => {
                                attempt = 0;
                                let _ = events.send(event);
                            }
                            Err(err) => {
                                warn!(endpoint = %endpoint, error = %err, "gateway: dropping malformed frame");
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!(endpoint = %endpoint, "gateway: connection closed by host");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        warn!(endpoint = %endpoint, error = %err, "gateway: read failed");
                        break;
                    }
                }
            }
        }
        attempt += 1;
    }
}

#[cfg(test)]
#[path = "tests/gateway_tests.rs"]
mod tests;
