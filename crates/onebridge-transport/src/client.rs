//! WebSocket client transport.
//!
//! [`connect`] makes exactly one attempt; retry and reconnect policy belong
//! to the caller.

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, trace, warn};

use onebridge_core::{
    Connection, ConnectionHandle, ConnectionInfo, TransportError, TransportResult,
};

use crate::{INBOUND_QUEUE, OUTBOUND_QUEUE, frame_stream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connects to a WebSocket endpoint.
///
/// A non-empty `token` is sent as `Authorization: Bearer <token>`.
pub async fn connect(url: &str, token: Option<&str>) -> TransportResult<Connection> {
    let mut request = url
        .into_client_request()
        .map_err(|e| TransportError::InvalidConfig(format!("invalid url '{url}': {e}")))?;

    if let Some(token) = token.filter(|t| !t.is_empty()) {
        let value = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|e| TransportError::InvalidConfig(format!("invalid access token: {e}")))?;
        request.headers_mut().insert(AUTHORIZATION, value);
    }

    debug!(url = %url, "Connecting to WebSocket server");
    let (ws_stream, _response) =
        connect_async(request)
            .await
            .map_err(|e| TransportError::ConnectionFailed {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
    info!(url = %url, "WebSocket client connected");

    let info = ConnectionInfo::new("ws-client").with_metadata("url", url);
    Ok(spawn_pump(ws_stream, info))
}

/// Spawns the task that moves frames between the socket and the channels.
fn spawn_pump(stream: WsStream, info: ConnectionInfo) -> Connection {
    let (message_tx, mut message_rx) = mpsc::channel::<String>(OUTBOUND_QUEUE);
    let (inbound_tx, inbound_rx) = mpsc::channel::<TransportResult<String>>(INBOUND_QUEUE);
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let handle = ConnectionHandle::new(message_tx, shutdown_tx);
    let (mut ws_tx, mut ws_rx) = stream.split();
    let url = info.metadata.get("url").cloned().unwrap_or_default();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        debug!(url = %url, "Closing WebSocket client");
                        let _ = ws_tx.close().await;
                        break;
                    }
                }

                Some(text) = message_rx.recv() => {
                    if let Err(e) = ws_tx.send(Message::Text(text.into())).await {
                        warn!(url = %url, error = %e, "Failed to send message");
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
                                debug!(url = %url, len = data.len(), "Dropping non-UTF-8 binary frame");
                                continue;
                            }
                        },
                        Some(Ok(Message::Ping(data))) => {
                            trace!(url = %url, "Received ping, sending pong");
                            let _ = ws_tx.send(Message::Pong(data)).await;
                            continue;
                        }
                        Some(Ok(Message::Pong(_) | Message::Frame(_))) => continue,
                        Some(Ok(Message::Close(frame))) => {
                            info!(url = %url, frame = ?frame, "Server closed connection");
                            break;
                        }
                        Some(Err(e)) => Err(TransportError::ConnectionClosed {
                            reason: e.to_string(),
                        }),
                        None => {
                            info!(url = %url, "WebSocket stream ended");
                            break;
                        }
                    };

                    let fatal = frame.is_err();
                    if inbound_tx.send(frame).await.is_err() || fatal {
                        break;
                    }
                }
            }
        }
        trace!(url = %url, "WebSocket client pump stopped");
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

    #[tokio::test]
    async fn test_invalid_url_is_config_error() {
        assert!(matches!(
            connect("not a url", None).await,
            Err(TransportError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_refused_connection() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        match connect(&format!("ws://{addr}/"), Some("t")).await {
            Err(TransportError::ConnectionFailed { url, .. }) => {
                assert_eq!(url, format!("ws://{addr}/"));
            }
            other => panic!("expected connection failure, got {other:?}"),
        }
    }
}
