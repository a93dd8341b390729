//! Connection manager tests against a real local WebSocket server.

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use beacon_channel::{
    ChannelConfig, ChannelError, ConnectionManager, ConnectionStatus, Credentials, RawFrame,
};
use beacon_core::BackoffConfig;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::{WebSocketStream, accept_hdr_async};

const TIMEOUT: Duration = Duration::from_secs(5);

type ServerSocket = WebSocketStream<TcpStream>;

/// Accept connections forever, rejecting any upgrade that does not present
/// `expected_key` (when set). Accepted sockets are handed to the test.
async fn start_server(
    expected_key: Option<&'static str>,
) -> (String, mpsc::UnboundedReceiver<ServerSocket>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    drop(tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let tx = tx.clone();
            drop(tokio::spawn(async move {
                let check = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                    let presented = req
                        .headers()
                        .get("x-api-key")
                        .and_then(|v| v.to_str().ok());
                    match expected_key {
                        Some(key) if presented != Some(key) => Err(
                            tokio_tungstenite::tungstenite::http::Response::builder()
                                .status(StatusCode::UNAUTHORIZED)
                                .body(None)
                                .unwrap(),
                        ),
                        _ => Ok(resp),
                    }
                };
                if let Ok(ws) = accept_hdr_async(stream, check).await {
                    let _ = tx.send(ws);
                }
            }));
        }
    }));

    (format!("ws://{addr}"), rx)
}

fn fast_config(url: &str) -> ChannelConfig {
    ChannelConfig {
        connect_timeout: Duration::from_secs(2),
        backoff: BackoffConfig {
            base_delay_ms: 100,
            max_delay_ms: 400,
            jitter_factor: 0.0,
        },
        ..ChannelConfig::new(url)
    }
}

async fn next_socket(rx: &mut mpsc::UnboundedReceiver<ServerSocket>) -> ServerSocket {
    timeout(TIMEOUT, rx.recv())
        .await
        .expect("timeout waiting for client connection")
        .expect("server stopped")
}

async fn next_text(ws: &mut ServerSocket) -> String {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("timeout waiting for message")
            .expect("stream closed")
            .expect("ws error");
        if let Message::Text(text) = msg {
            return text.as_str().to_owned();
        }
    }
}

#[tokio::test]
async fn connect_forwards_inbound_frames() {
    let (url, mut sockets) = start_server(Some("secret")).await;
    let manager = ConnectionManager::new(fast_config(&url));
    let mut frames = manager.take_frames().unwrap();

    manager.connect(Credentials::api_key("secret")).await.unwrap();
    let state = manager.state();
    assert_eq!(state.status, ConnectionStatus::Connected);
    assert!(state.last_heartbeat_at.is_some());

    let mut server = next_socket(&mut sockets).await;
    server
        .send(Message::text(r#"{"correlationId":"abc123","status":"ok"}"#))
        .await
        .unwrap();
    server.send(Message::binary(b"bin".to_vec())).await.unwrap();

    let first = timeout(TIMEOUT, frames.recv()).await.unwrap().unwrap();
    assert_eq!(
        first,
        RawFrame::Text(r#"{"correlationId":"abc123","status":"ok"}"#.into())
    );
    let second = timeout(TIMEOUT, frames.recv()).await.unwrap().unwrap();
    assert_eq!(second, RawFrame::Binary(b"bin".to_vec()));

    manager.disconnect().await;
}

#[tokio::test]
async fn send_reaches_server() {
    let (url, mut sockets) = start_server(None).await;
    let manager = ConnectionManager::new(fast_config(&url));
    manager.connect(Credentials::default()).await.unwrap();
    let mut server = next_socket(&mut sockets).await;

    manager.send(r#"{"action":"search"}"#).unwrap();
    assert_eq!(next_text(&mut server).await, r#"{"action":"search"}"#);

    manager.disconnect().await;
}

#[tokio::test]
async fn zero_heartbeat_interval_keeps_connection_alive() {
    let (url, mut sockets) = start_server(None).await;
    let config = ChannelConfig {
        heartbeat_interval: Duration::ZERO,
        ..fast_config(&url)
    };
    let manager = ConnectionManager::new(config);
    manager.connect(Credentials::default()).await.unwrap();

    // Keep reading so pings are answered; hand text frames to the test.
    let mut server = next_socket(&mut sockets).await;
    let (text_tx, mut text_rx) = mpsc::unbounded_channel();
    drop(tokio::spawn(async move {
        while let Some(Ok(msg)) = server.next().await {
            if let Message::Text(text) = msg {
                let _ = text_tx.send(text.as_str().to_owned());
            }
        }
    }));

    // Several clamped ping periods.
    tokio::time::sleep(Duration::from_millis(300)).await;

    let state = manager.state();
    assert_eq!(state.status, ConnectionStatus::Connected);
    assert_eq!(state.retry_attempt, 0);
    manager.send("still here").unwrap();
    let received = timeout(TIMEOUT, text_rx.recv()).await.unwrap().unwrap();
    assert_eq!(received, "still here");

    manager.disconnect().await;
}

#[tokio::test]
async fn wrong_key_is_auth_error() {
    let (url, _sockets) = start_server(Some("secret")).await;
    let manager = ConnectionManager::new(fast_config(&url));

    let err = manager
        .connect(Credentials::api_key("wrong"))
        .await
        .unwrap_err();
    assert_matches!(err, ChannelError::Auth { .. });
    assert!(err.is_fatal());

    let state = manager.state();
    assert_eq!(state.status, ConnectionStatus::Disconnected);
    assert!(state.last_error.unwrap().contains("401"));
}

#[tokio::test]
async fn connect_while_connected_is_noop() {
    let (url, mut sockets) = start_server(None).await;
    let manager = ConnectionManager::new(fast_config(&url));
    manager.connect(Credentials::default()).await.unwrap();
    let _server = next_socket(&mut sockets).await;

    manager.connect(Credentials::default()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(sockets.try_recv().is_err());
    assert_eq!(manager.state().status, ConnectionStatus::Connected);

    manager.disconnect().await;
}

#[tokio::test]
async fn reconnects_after_server_close_and_keeps_frame_stream() {
    let (url, mut sockets) = start_server(None).await;
    let manager = ConnectionManager::new(fast_config(&url));
    let mut frames = manager.take_frames().unwrap();
    manager.connect(Credentials::default()).await.unwrap();
    let mut first = next_socket(&mut sockets).await;

    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut states = manager.subscribe();
    let recorder = {
        let seen = Arc::clone(&seen);
        tokio::spawn(async move {
            while states.changed().await.is_ok() {
                let status = states.borrow_and_update().status;
                seen.lock().push(status);
            }
        })
    };

    first.close(None).await.unwrap();
    drop(first);

    let mut second = next_socket(&mut sockets).await;
    let mut watcher = manager.subscribe();
    let _ = timeout(TIMEOUT, watcher.wait_for(|s| s.is_connected()))
        .await
        .unwrap()
        .unwrap();

    {
        let seen = seen.lock();
        let reconnecting = seen
            .iter()
            .position(|s| *s == ConnectionStatus::Reconnecting)
            .expect("never reported Reconnecting");
        assert!(seen[reconnecting..].contains(&ConnectionStatus::Connected));
    }
    assert_eq!(manager.state().retry_attempt, 0);

    second
        .send(Message::text("after-reconnect"))
        .await
        .unwrap();
    let frame = timeout(TIMEOUT, frames.recv()).await.unwrap().unwrap();
    assert_eq!(frame, RawFrame::Text("after-reconnect".into()));

    manager.send("ping-from-client").unwrap();
    assert_eq!(next_text(&mut second).await, "ping-from-client");

    manager.disconnect().await;
    recorder.abort();
}

#[tokio::test]
async fn silent_peer_forces_reconnect() {
    let (url, mut sockets) = start_server(None).await;
    let config = ChannelConfig {
        heartbeat_interval: Duration::from_millis(50),
        heartbeat_grace: 2,
        ..fast_config(&url)
    };
    let manager = ConnectionManager::new(config);
    manager.connect(Credentials::default()).await.unwrap();

    // Never polled, so pings go unanswered.
    let _silent = next_socket(&mut sockets).await;
    let _second = next_socket(&mut sockets).await;

    manager.disconnect().await;
}

#[tokio::test]
async fn disconnect_closes_socket_and_rejects_sends() {
    let (url, mut sockets) = start_server(None).await;
    let manager = ConnectionManager::new(fast_config(&url));
    manager.connect(Credentials::default()).await.unwrap();
    let mut server = next_socket(&mut sockets).await;

    manager.disconnect().await;
    let state = manager.state();
    assert_eq!(state.status, ConnectionStatus::Disconnected);
    assert_matches!(manager.send("late"), Err(ChannelError::NotConnected));

    let closed = timeout(TIMEOUT, async {
        loop {
            match server.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    assert!(closed.is_ok());

    // No reconnect after an explicit disconnect.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(sockets.try_recv().is_err());
}

#[tokio::test]
async fn connect_again_after_disconnect() {
    let (url, mut sockets) = start_server(None).await;
    let manager = ConnectionManager::new(fast_config(&url));
    manager.connect(Credentials::default()).await.unwrap();
    let _first = next_socket(&mut sockets).await;
    manager.disconnect().await;

    manager.connect(Credentials::default()).await.unwrap();
    let _second = next_socket(&mut sockets).await;
    assert!(manager.state().is_connected());
    manager.disconnect().await;
}
