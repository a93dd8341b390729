//! WebSocket connection manager.
//!
//! One background task owns the socket. It forwards every inbound Text or
//! Binary frame to a single unbounded queue that outlives individual
//! sockets, drains the per-connection outbound queue, pings on a fixed
//! interval, and on loss runs the reconnect loop until it either gets a new
//! socket, hits a fatal error, or is cancelled.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::{ChannelConfig, Credentials};
use crate::errors::ChannelError;
use crate::frame::RawFrame;
use crate::heartbeat::{HeartbeatResult, Liveness};
use crate::state::{ConnectionState, ConnectionStatus};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Receiving half of the inbound frame queue.
pub type FrameReceiver = mpsc::UnboundedReceiver<RawFrame>;

/// How long `disconnect` waits for the task to close the socket politely.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// State shared between the manager handle and its connection task.
struct Shared {
    state: watch::Sender<ConnectionState>,
    outbound: Mutex<Option<mpsc::Sender<String>>>,
    frames_tx: mpsc::UnboundedSender<RawFrame>,
}

impl Shared {
    fn publish(&self, update: impl FnOnce(&mut ConnectionState)) {
        self.state.send_modify(update);
    }

    /// Install a fresh outbound queue and mark the channel connected.
    fn attach(&self, buffer: usize) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        *self.outbound.lock() = Some(tx);
        self.publish(|s| {
            s.status = ConnectionStatus::Connected;
            s.last_heartbeat_at = Some(Utc::now());
            s.retry_attempt = 0;
            s.last_error = None;
        });
        rx
    }

    fn detach(&self) {
        *self.outbound.lock() = None;
    }
}

struct RunHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Owns the lifecycle of the duplex result channel.
pub struct ConnectionManager {
    config: ChannelConfig,
    shared: Arc<Shared>,
    frames_rx: Mutex<Option<FrameReceiver>>,
    run: Mutex<Option<RunHandle>>,
}

impl ConnectionManager {
    /// Create a disconnected manager.
    pub fn new(config: ChannelConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::default());
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        Self {
            config,
            shared: Arc::new(Shared {
                state,
                outbound: Mutex::new(None),
                frames_tx,
            }),
            frames_rx: Mutex::new(Some(frames_rx)),
            run: Mutex::new(None),
        }
    }

    /// Channel configuration.
    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// Open the channel and start the connection task.
    ///
    /// Waits for the first handshake only. Calling this while connected or
    /// reconnecting is a logged no-op.
    pub async fn connect(&self, credentials: Credentials) -> Result<(), ChannelError> {
        if self.config.url.trim().is_empty() {
            let err = ChannelError::InvalidUrl {
                message: "no WebSocket URL configured".into(),
            };
            self.shared.publish(|s| {
                if !s.is_active() {
                    s.last_error = Some(err.to_string());
                }
            });
            return Err(err);
        }

        let claimed = self.shared.state.send_if_modified(|s| {
            if s.is_active() {
                false
            } else {
                s.status = ConnectionStatus::Connecting;
                s.retry_attempt = 0;
                s.last_error = None;
                true
            }
        });
        if !claimed {
            warn!(status = %self.state().status, "connect requested while channel is active, ignoring");
            return Ok(());
        }

        info!(url = %self.config.url, "opening result channel");
        let ws = match open_socket(&self.config, &credentials).await {
            Ok(ws) => ws,
            Err(e) => {
                warn!(error = %e, "result channel handshake failed");
                self.shared.publish(|s| {
                    s.status = ConnectionStatus::Disconnected;
                    s.last_error = Some(e.to_string());
                });
                return Err(e);
            }
        };

        let outbound_rx = self.shared.attach(self.config.outbound_buffer);
        info!("result channel connected");

        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_connection(
            ws,
            outbound_rx,
            self.config.clone(),
            credentials,
            Arc::clone(&self.shared),
            cancel.clone(),
        ));
        if let Some(previous) = self.run.lock().replace(RunHandle { cancel, task }) {
            previous.cancel.cancel();
        }
        Ok(())
    }

    /// Queue a text frame on the current connection.
    pub fn send(&self, text: impl Into<String>) -> Result<(), ChannelError> {
        let outbound = self.shared.outbound.lock();
        let Some(tx) = outbound.as_ref() else {
            return Err(ChannelError::NotConnected);
        };
        tx.try_send(text.into()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => ChannelError::OutboundFull,
            mpsc::error::TrySendError::Closed(_) => ChannelError::NotConnected,
        })
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.shared.state.borrow().clone()
    }

    /// Watch every state transition.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Take the inbound frame receiver. Returns `None` after the first call.
    pub fn take_frames(&self) -> Option<FrameReceiver> {
        self.frames_rx.lock().take()
    }

    /// Stop the connection task and close the socket.
    pub async fn disconnect(&self) {
        let run = self.run.lock().take();
        if let Some(RunHandle { cancel, mut task }) = run {
            cancel.cancel();
            if time::timeout(SHUTDOWN_GRACE, &mut task).await.is_err() {
                warn!("connection task did not stop in time, aborting");
                task.abort();
            }
        }
        self.shared.detach();
        self.shared.publish(|s| {
            s.status = ConnectionStatus::Disconnected;
            s.retry_attempt = 0;
            s.last_error = None;
        });
        info!("result channel disconnected");
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(run) = self.run.get_mut().take() {
            run.cancel.cancel();
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Handshake
// ─────────────────────────────────────────────────────────────────────────────

async fn open_socket(
    config: &ChannelConfig,
    credentials: &Credentials,
) -> Result<WsStream, ChannelError> {
    let mut request = config
        .url
        .as_str()
        .into_client_request()
        .map_err(|e| ChannelError::InvalidUrl {
            message: e.to_string(),
        })?;
    if let Some(key) = &credentials.api_key {
        let value = HeaderValue::from_str(key).map_err(|e| ChannelError::Auth {
            message: format!("API key is not a valid header value: {e}"),
        })?;
        let _ = request.headers_mut().insert("x-api-key", value);
    }

    let (ws, _response) = time::timeout(config.connect_timeout, connect_async(request))
        .await
        .map_err(|_| ChannelError::Network {
            message: format!(
                "handshake timed out after {}ms",
                config.connect_timeout.as_millis()
            ),
        })?
        .map_err(classify_handshake_error)?;
    Ok(ws)
}

fn classify_handshake_error(error: WsError) -> ChannelError {
    match error {
        WsError::Http(response) => {
            let status = response.status();
            if matches!(status.as_u16(), 401 | 403) {
                ChannelError::Auth {
                    message: format!("server rejected credentials (HTTP {status})"),
                }
            } else {
                ChannelError::Network {
                    message: format!("upgrade refused (HTTP {status})"),
                }
            }
        }
        WsError::Url(e) => ChannelError::InvalidUrl {
            message: e.to_string(),
        },
        other => ChannelError::Network {
            message: other.to_string(),
        },
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Connection task
// ─────────────────────────────────────────────────────────────────────────────

/// Why a socket stopped being driven.
#[derive(Debug)]
enum SocketExit {
    Cancelled,
    Lost(String),
}

#[instrument(skip_all, fields(url = %config.url))]
async fn run_connection(
    mut ws: WsStream,
    mut outbound_rx: mpsc::Receiver<String>,
    config: ChannelConfig,
    credentials: Credentials,
    shared: Arc<Shared>,
    cancel: CancellationToken,
) {
    loop {
        let exit = drive_socket(ws, outbound_rx, &config, &shared, &cancel).await;
        shared.detach();
        match exit {
            SocketExit::Cancelled => {
                debug!("connection task cancelled");
                return;
            }
            SocketExit::Lost(reason) => {
                warn!(reason = %reason, "result channel lost, reconnecting");
                shared.publish(|s| s.last_error = Some(reason));
            }
        }

        let Some(socket) = reconnect(&config, &credentials, &shared, &cancel).await else {
            return;
        };
        ws = socket;
        outbound_rx = shared.attach(config.outbound_buffer);
        info!("result channel reconnected");
    }
}

async fn drive_socket(
    ws: WsStream,
    mut outbound_rx: mpsc::Receiver<String>,
    config: &ChannelConfig,
    shared: &Shared,
    cancel: &CancellationToken,
) -> SocketExit {
    let (mut sink, mut stream) = ws.split();
    let mut liveness = Liveness::new(config.liveness_timeout());
    let period = config.ping_interval();
    let mut ping = time::interval_at(Instant::now() + period, period);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                return SocketExit::Cancelled;
            }
            Some(text) = outbound_rx.recv() => {
                if let Err(e) = sink.send(Message::text(text)).await {
                    return SocketExit::Lost(format!("send failed: {e}"));
                }
            }
            inbound = stream.next() => {
                let message = match inbound {
                    Some(Ok(message)) => message,
                    Some(Err(e)) => return SocketExit::Lost(e.to_string()),
                    None => return SocketExit::Lost("stream ended".into()),
                };
                liveness.mark_alive();
                shared.publish(|s| s.last_heartbeat_at = Some(Utc::now()));
                let frame = match message {
                    Message::Text(text) => RawFrame::Text(text.as_str().to_owned()),
                    Message::Binary(bytes) => RawFrame::Binary(bytes.to_vec()),
                    Message::Close(close) => {
                        let reason = close.map_or_else(
                            || "closed by peer".to_string(),
                            |c| format!("closed by peer ({}): {}", c.code, &*c.reason),
                        );
                        return SocketExit::Lost(reason);
                    }
                    Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
                };
                debug!(frame = %frame.preview(), "inbound frame");
                if shared.frames_tx.send(frame).is_err() {
                    debug!("frame receiver dropped, discarding frame");
                }
            }
            _ = ping.tick() => {
                if liveness.check() == HeartbeatResult::TimedOut {
                    return SocketExit::Lost(format!(
                        "no traffic for {}ms",
                        liveness.silence().as_millis()
                    ));
                }
                if let Err(e) = sink.send(Message::Ping(Vec::new().into())).await {
                    return SocketExit::Lost(format!("ping failed: {e}"));
                }
            }
        }
    }
}

/// Backoff loop. Returns a new socket, or `None` when cancelled or when the
/// error can never be fixed by retrying.
async fn reconnect(
    config: &ChannelConfig,
    credentials: &Credentials,
    shared: &Shared,
    cancel: &CancellationToken,
) -> Option<WsStream> {
    let mut attempt: u32 = 0;
    loop {
        let delay = config.backoff.delay(attempt, rand::random::<f64>());
        attempt = attempt.saturating_add(1);
        shared.publish(|s| {
            s.status = ConnectionStatus::Reconnecting;
            s.retry_attempt = attempt;
        });
        debug!(attempt, delay_ms = delay.as_millis(), "waiting before reconnect");

        tokio::select! {
            () = cancel.cancelled() => return None,
            () = time::sleep(delay) => {}
        }

        let result = tokio::select! {
            () = cancel.cancelled() => return None,
            result = open_socket(config, credentials) => result,
        };
        match result {
            Ok(ws) => return Some(ws),
            Err(e) if e.is_fatal() => {
                error!(error = %e, attempt, "reconnect failed permanently");
                shared.publish(|s| {
                    s.status = ConnectionStatus::Disconnected;
                    s.retry_attempt = 0;
                    s.last_error = Some(e.to_string());
                });
                return None;
            }
            Err(e) => {
                warn!(error = %e, attempt, "reconnect attempt failed");
                shared.publish(|s| s.last_error = Some(e.to_string()));
            }
        }
    }
}
