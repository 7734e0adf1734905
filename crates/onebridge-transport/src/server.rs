//! WebSocket server transport.
//!
//! A single axum route accepts reverse connections from a OneBot
//! implementation:
//!
//! ```text
//! host:port
//! └── GET <path>  → token check → upgrade → Connection on `incoming`
//!                                         └ rejected: close frame (policy)
//! ```
//!
//! The token is checked from the handshake request, before upgrading. A
//! rejected peer is still upgraded and then closed with a policy-violation
//! close frame instead of a bare HTTP error.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::{
        ConnectInfo, State, WebSocketUpgrade,
        ws::{CloseFrame, Message, WebSocket, close_code},
    },
    http::{HeaderMap, Uri, header::AUTHORIZATION},
    response::IntoResponse,
    routing::get,
};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use onebridge_core::{
    Connection, ConnectionHandle, ConnectionInfo, TokenGuard, TransportError, TransportResult,
};

use crate::{INBOUND_QUEUE, OUTBOUND_QUEUE, frame_stream};

/// Settings for [`listen`].
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Bind host.
    pub host: String,
    /// Bind port; `0` picks an ephemeral port.
    pub port: u16,
    /// Route path accepting upgrades.
    pub path: String,
    /// Delay between bind attempts while the port is taken.
    pub retry_interval: Duration,
    /// Token check for connecting peers.
    pub guard: TokenGuard,
}

impl ServerOptions {
    /// The `host:port` string to bind.
    pub fn bind_addr(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// The route path, always with a leading `/`.
    pub fn route_path(&self) -> String {
        if self.path.starts_with('/') {
            self.path.clone()
        } else {
            format!("/{}", self.path)
        }
    }
}

/// Handle to a running listener.
///
/// Dropping this handle stops the listener.
#[derive(Debug)]
pub struct ListenerHandle {
    local_addr: SocketAddr,
    shutdown_token: CancellationToken,
}

impl ListenerHandle {
    /// The address the OS actually bound.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops accepting connections and closes the ones this listener opened.
    pub fn stop(&self) {
        self.shutdown_token.cancel();
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.shutdown_token.cancel();
    }
}

/// Binds `addr`, retrying every `interval` while the address is in use.
///
/// Returns [`TransportError::Cancelled`] if `cancel` fires while waiting, and
/// [`TransportError::BindFailed`] for any error other than a port conflict.
pub async fn bind_with_retry(
    addr: &str,
    interval: Duration,
    cancel: &CancellationToken,
) -> TransportResult<TcpListener> {
    loop {
        match TcpListener::bind(addr).await {
            Ok(listener) => return Ok(listener),
            Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
                warn!(addr = %addr, retry_in = ?interval, "Address already in use, retrying");
                tokio::select! {
                    () = cancel.cancelled() => return Err(TransportError::Cancelled),
                    () = tokio::time::sleep(interval) => {}
                }
            }
            Err(e) => {
                return Err(TransportError::BindFailed {
                    addr: addr.to_string(),
                    reason: e.to_string(),
                });
            }
        }
    }
}

struct ServerState {
    guard: TokenGuard,
    incoming: mpsc::Sender<Connection>,
    shutdown_token: CancellationToken,
}

/// Binds the listener and starts serving upgrades on `options.path`.
///
/// Every accepted peer is delivered on `incoming`. The listener runs until the
/// returned handle is stopped or dropped, or `cancel` fires.
pub async fn listen(
    options: ServerOptions,
    incoming: mpsc::Sender<Connection>,
    cancel: &CancellationToken,
) -> TransportResult<ListenerHandle> {
    let addr = options.bind_addr();
    let path = options.route_path();
    let listener = bind_with_retry(&addr, options.retry_interval, cancel).await?;
    let local_addr = listener.local_addr()?;

    let shutdown_token = cancel.child_token();
    let state = Arc::new(ServerState {
        guard: options.guard,
        incoming,
        shutdown_token: shutdown_token.clone(),
    });
    let router = Router::new()
        .route(&path, get(ws_handler))
        .with_state(state);

    info!(addr = %local_addr, path = %path, "WebSocket server listening");

    let serve_token = shutdown_token.clone();
    tokio::spawn(async move {
        let server = axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        );
        tokio::select! {
            result = server => {
                if let Err(e) = result {
                    error!(error = %e, "WebSocket server error");
                }
            }
            () = serve_token.cancelled() => {
                info!(addr = %local_addr, "WebSocket server shutting down");
            }
        }
    });

    Ok(ListenerHandle {
        local_addr,
        shutdown_token,
    })
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<ServerState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    uri: Uri,
    headers: HeaderMap,
) -> impl IntoResponse {
    let authorization = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());
    let accepted = state.guard.validate_request(authorization, uri.query());

    // Collect headers as a plain map (lowercase keys) before the move.
    let metadata: HashMap<String, String> = headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_lowercase(), v.to_string()))
        })
        .collect();

    debug!(remote_addr = %addr, path = %uri.path(), "New WebSocket connection request");
    ws.on_upgrade(move |socket| async move {
        state.accept(addr, metadata, accepted, socket).await;
    })
}

impl ServerState {
    async fn accept(
        &self,
        addr: SocketAddr,
        metadata: HashMap<String, String>,
        accepted: bool,
        mut socket: WebSocket,
    ) {
        if !accepted {
            warn!(remote_addr = %addr, "Rejected connection with invalid access token");
            let _ = socket
                .send(Message::Close(Some(CloseFrame {
                    code: close_code::POLICY,
                    reason: "invalid access token".into(),
                })))
                .await;
            return;
        }

        let mut info = ConnectionInfo::new("ws-server").with_remote_addr(addr.to_string());
        for (key, value) in metadata {
            info = info.with_metadata(key, value);
        }

        info!(remote_addr = %addr, "WebSocket connection established");
        let connection = spawn_pump(socket, info, self.shutdown_token.clone());
        if let Err(mpsc::error::SendError(connection)) = self.incoming.send(connection).await {
            debug!(remote_addr = %addr, "No consumer for connection, closing");
            connection.handle.close();
        }
    }
}

/// Spawns the task that moves frames between the socket and the channels.
fn spawn_pump(socket: WebSocket, info: ConnectionInfo, server_token: CancellationToken) -> Connection {
    let (message_tx, mut message_rx) = mpsc::channel::<String>(OUTBOUND_QUEUE);
    let (inbound_tx, inbound_rx) = mpsc::channel::<TransportResult<String>>(INBOUND_QUEUE);
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let handle = ConnectionHandle::new(message_tx, shutdown_tx);
    let (mut ws_tx, mut ws_rx) = socket.split();
    let peer = info.remote_addr.clone().unwrap_or_default();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        debug!(remote_addr = %peer, "Closing WebSocket connection");
                        let _ = ws_tx.close().await;
                        break;
                    }
                }

                () = server_token.cancelled() => {
                    let _ = ws_tx.close().await;
                    break;
                }

                Some(text) = message_rx.recv() => {
                    if let Err(e) = ws_tx.send(Message::Text(text.into())).await {
                        warn!(remote_addr = %peer, error = %e, "Failed to send message, connection closed");
                        let _ = inbound_tx
                            .send(Err(TransportError::SendFailed(e.to_string())))
                            .await;
                        break;
                    }
                }

                msg = ws_rx.next() => {
                    let frame = match msg {
                        Some(Ok(Message::Text(text))) => Ok(text.as_str().to_owned()),
                        Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                            Ok(text) => Ok(text),
                            Err(_) => {
                                debug!(remote_addr = %peer, len = data.len(), "Dropping non-UTF-8 binary frame");
                                continue;
                            }
                        },
                        Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                            trace!(remote_addr = %peer, "Received ping/pong");
                            continue;
                        }
                        Some(Ok(Message::Close(_))) => {
                            info!(remote_addr = %peer, "WebSocket connection closed by client");
                            break;
                        }
                        Some(Err(e)) => Err(TransportError::ConnectionClosed {
                            reason: e.to_string(),
                        }),
                        None => break,
                    };

                    let fatal = frame.is_err();
                    if inbound_tx.send(frame).await.is_err() || fatal {
                        break;
                    }
                }
            }
        }
        trace!(remote_addr = %peer, "WebSocket server pump stopped");
    });

    Connection {
        handle,
        frames: frame_stream(inbound_rx),
        info,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_tungstenite::tungstenite::client::IntoClientRequest;
    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

    fn options(port: u16, token: Option<&str>) -> ServerOptions {
        ServerOptions {
            host: "127.0.0.1".to_string(),
            port,
            path: "onebot".to_string(),
            retry_interval: Duration::from_millis(20),
            guard: TokenGuard::new(token.map(str::to_string)),
        }
    }

    #[test]
    fn test_route_path_and_bind_addr() {
        let opts = options(8080, None);
        assert_eq!(opts.route_path(), "/onebot");
        assert_eq!(opts.bind_addr(), "127.0.0.1:8080");

        let v6 = ServerOptions {
            host: "::1".to_string(),
            ..opts
        };
        assert_eq!(v6.bind_addr(), "[::1]:8080");
    }

    #[tokio::test]
    async fn test_bind_retries_until_port_is_free() {
        let holder = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = holder.local_addr().unwrap().to_string();
        let cancel = CancellationToken::new();

        let release = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            drop(holder);
        });

        let listener = bind_with_retry(&addr, Duration::from_millis(20), &cancel)
            .await
            .unwrap();
        assert_eq!(listener.local_addr().unwrap().to_string(), addr);
        release.await.unwrap();
    }

    #[tokio::test]
    async fn test_bind_retry_stops_on_cancel() {
        let holder = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = holder.local_addr().unwrap().to_string();
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        assert!(matches!(
            bind_with_retry(&addr, Duration::from_millis(20), &cancel).await,
            Err(TransportError::Cancelled)
        ));
    }

    #[tokio::test]
    async fn test_accepted_peer_exchanges_frames() {
        let (tx, mut rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let handle = listen(options(0, Some("s3cret")), tx, &cancel).await.unwrap();
        let port = handle.local_addr().port();

        let url = format!("ws://127.0.0.1:{port}/onebot?token=s3cret");
        let (mut peer, _) = tokio_tungstenite::connect_async(url).await.unwrap();

        let mut conn = rx.recv().await.unwrap();
        assert_eq!(conn.info.protocol, "ws-server");

        peer.send(tokio_tungstenite::tungstenite::Message::Text(
            r#"{"post_type":"meta_event"}"#.into(),
        ))
        .await
        .unwrap();
        let frame = conn.frames.next().await.unwrap().unwrap();
        assert_eq!(frame, r#"{"post_type":"meta_event"}"#);

        conn.handle.send_text("hello".into()).await.unwrap();
        let reply = peer.next().await.unwrap().unwrap();
        assert_eq!(reply.into_text().unwrap().as_str(), "hello");
    }

    #[tokio::test]
    async fn test_rejected_peer_gets_policy_close() {
        let (tx, mut rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let handle = listen(options(0, Some("s3cret")), tx, &cancel).await.unwrap();
        let port = handle.local_addr().port();

        let mut request = format!("ws://127.0.0.1:{port}/onebot")
            .into_client_request()
            .unwrap();
        request
            .headers_mut()
            .insert("Authorization", "Bearer wrong".parse().unwrap());
        let (mut peer, _) = tokio_tungstenite::connect_async(request).await.unwrap();

        match peer.next().await {
            Some(Ok(tokio_tungstenite::tungstenite::Message::Close(Some(frame)))) => {
                assert_eq!(frame.code, CloseCode::Policy);
            }
            other => panic!("expected policy close, got {other:?}"),
        }
        assert!(rx.try_recv().is_err());
    }
}
