//! Client-mode tests against a mock OneBot implementation.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

use onebridge_adapter_onebot::{
    LinkState, ManagerState, Mode, OneBotAdapter, OneBotConfig, StopReason, Target,
};
use onebridge_core::{ApiError, EventCategory, trigger_fn};

type Peer = WebSocketStream<TcpStream>;

/// Accepts WebSocket connections, reporting each with its Authorization header.
async fn mock_server() -> (String, mpsc::Receiver<(Peer, Option<String>)>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/", listener.local_addr().unwrap());
    let (tx, rx) = mpsc::channel(4);

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let mut auth = None;
            let callback = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                auth = req
                    .headers()
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                Ok(resp)
            };
            let ws = tokio_tungstenite::accept_hdr_async(stream, callback)
                .await
                .unwrap();
            if tx.send((ws, auth)).await.is_err() {
                break;
            }
        }
    });

    (url, rx)
}

fn client_config(url: &str, token: &str) -> OneBotConfig {
    let mut config = OneBotConfig::default();
    config.mode = Mode::Client;
    config.client.url = url.to_string();
    config.client.token = token.to_string();
    config.retry_interval_secs = 1;
    config.api_timeout_secs = 5;
    config
}

async fn next_request(peer: &mut Peer) -> Value {
    loop {
        match peer.next().await.unwrap().unwrap() {
            Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            _ => continue,
        }
    }
}

async fn reply(peer: &mut Peer, echo: &Value, data: Value) {
    let frame = json!({"status": "ok", "retcode": 0, "data": data, "echo": echo});
    peer.send(Message::Text(frame.to_string().into())).await.unwrap();
}

#[tokio::test]
async fn test_send_msg_round_trip() {
    let (url, mut accepted) = mock_server().await;
    let adapter = OneBotAdapter::from_config(client_config(&url, "s3cret"));
    adapter.start().await.unwrap();
    assert_eq!(adapter.state(), ManagerState::Running);

    let (mut peer, auth) = accepted.recv().await.unwrap();
    assert_eq!(auth.as_deref(), Some("Bearer s3cret"));

    let sent = adapter.send_to(Target::Group(123456)).text("hello");

    let request = next_request(&mut peer).await;
    assert_eq!(request["action"], "send_msg");
    assert_eq!(
        request["params"],
        json!({"message_type": "group", "group_id": 123456, "message": "hello"})
    );
    reply(&mut peer, &request["echo"], json!({"message_id": 42})).await;

    assert_eq!(sent.await.unwrap().unwrap(), json!({"message_id": 42}));
    assert_eq!(adapter.manager().pending_calls(), 0);

    adapter.shutdown().await;
    assert_eq!(adapter.state(), ManagerState::Stopped);
}

#[tokio::test]
async fn test_failed_reply_surfaces_retcode() {
    let (url, mut accepted) = mock_server().await;
    let adapter = OneBotAdapter::from_config(client_config(&url, ""));
    adapter.start().await.unwrap();
    let (mut peer, auth) = accepted.recv().await.unwrap();
    assert_eq!(auth, None);

    let bot = adapter.bot();
    let call = tokio::spawn(async move { bot.call_api("delete_msg", json!({"message_id": 1})).await });

    let request = next_request(&mut peer).await;
    let frame = json!({
        "status": "failed",
        "retcode": 100,
        "message": "message not found",
        "data": null,
        "echo": request["echo"],
    });
    peer.send(Message::Text(frame.to_string().into())).await.unwrap();

    match call.await.unwrap() {
        Err(ApiError::ApiFailed { retcode, message }) => {
            assert_eq!(retcode, 100);
            assert_eq!(message, "message not found");
        }
        other => panic!("expected API failure, got {other:?}"),
    }
    adapter.shutdown().await;
}

#[tokio::test]
async fn test_events_reach_triggers_by_category() {
    let (url, mut accepted) = mock_server().await;
    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();

    let adapter = OneBotAdapter::builder()
        .config(client_config(&url, ""))
        .on(
            [EventCategory::Notice, EventCategory::Unknown],
            trigger_fn(move |event, _bot| {
                let seen_tx = seen_tx.clone();
                async move {
                    let _ = seen_tx.send(event.category());
                    Ok(())
                }
            }),
        )
        .build();
    adapter.start().await.unwrap();
    let (mut peer, _) = accepted.recv().await.unwrap();

    for frame in [
        r#"{"post_type":"meta_event","meta_event_type":"heartbeat"}"#,
        r#"not json at all"#,
        r#"{"post_type":"notice","notice_type":"group_increase"}"#,
        r#"{"post_type":"message_sent"}"#,
    ] {
        peer.send(Message::Text(frame.into())).await.unwrap();
    }

    assert_eq!(seen_rx.recv().await, Some(EventCategory::Notice));
    assert_eq!(seen_rx.recv().await, Some(EventCategory::Unknown));
    adapter.shutdown().await;
}

#[tokio::test]
async fn test_auth_failure_stops_adapter() {
    let (url, mut accepted) = mock_server().await;
    let adapter = OneBotAdapter::from_config(client_config(&url, "wrong"));
    adapter.start().await.unwrap();
    let (mut peer, _) = accepted.recv().await.unwrap();

    let frame = json!({"status": "failed", "retcode": 1403, "message": "token verification failed", "data": null});
    peer.send(Message::Text(frame.to_string().into())).await.unwrap();

    let reason = tokio::time::timeout(Duration::from_secs(5), adapter.stopped())
        .await
        .unwrap();
    assert_eq!(
        reason,
        StopReason::AuthRejected {
            retcode: 1403,
            message: "token verification failed".to_string()
        }
    );

    let mut state = adapter.subscribe_state();
    tokio::time::timeout(
        Duration::from_secs(5),
        state.wait_for(|s| *s == ManagerState::Stopped),
    )
    .await
    .unwrap()
    .unwrap();
    assert!(reason.into_result().is_err());
}

#[tokio::test]
async fn test_reconnects_after_link_drops() {
    let (url, mut accepted) = mock_server().await;
    let adapter = OneBotAdapter::from_config(client_config(&url, ""));
    adapter.start().await.unwrap();

    let (mut first, _) = accepted.recv().await.unwrap();
    first.close(None).await.unwrap();
    drop(first);

    let (mut second, _) = tokio::time::timeout(Duration::from_secs(5), accepted.recv())
        .await
        .unwrap()
        .unwrap();

    let mut link = adapter.subscribe_link();
    tokio::time::timeout(
        Duration::from_secs(5),
        link.wait_for(|l| *l == LinkState::Connected),
    )
    .await
    .unwrap()
    .unwrap();

    let bot = adapter.bot();
    let call = tokio::spawn(async move { bot.call_api("get_status", Value::Null).await });
    let request = next_request(&mut second).await;
    assert_eq!(request["action"], "get_status");
    assert_eq!(request["params"], json!({}));
    reply(&mut second, &request["echo"], json!({"online": true})).await;

    assert_eq!(call.await.unwrap().unwrap(), json!({"online": true}));
    adapter.shutdown().await;
}
