//! End-to-end tests over real WebSocket connections.

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Map, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use wsrpc_server::router::BINARY_ACK;
use wsrpc_server::{NotificationBroadcaster, Server, ServerConfig, SettingsStore};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestServer {
    server: Arc<Server>,
    addr: SocketAddr,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.server.shutdown();
    }
}

async fn start_server() -> TestServer {
    start_server_with(|_| {}).await
}

async fn start_server_with(configure: impl FnOnce(&mut ServerConfig)) -> TestServer {
    let mut properties = Map::new();
    properties.insert("brightness".to_string(), json!(50));
    let store = Arc::new(SettingsStore::with_properties(properties, 16));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let mut config = ServerConfig::new(addr);
    configure(&mut config);
    let server = Arc::new(Server::new(config, store.clone()));
    let broadcaster = Arc::new(NotificationBroadcaster::new(server.transport()));
    broadcaster.attach(store.as_ref());

    let serving = server.clone();
    tokio::spawn(async move {
        // Keeps the store alive for as long as the server runs
        let _store = store;
        let _ = serving.serve(listener).await;
    });

    TestServer { server, addr }
}

async fn connect(addr: SocketAddr) -> Client {
    let (ws, _) = connect_async(format!("ws://{}/api/v1", addr))
        .await
        .unwrap();
    ws
}

async fn send(ws: &mut Client, body: &str) {
    ws.send(Message::text(body.to_string())).await.unwrap();
}

async fn next_message(ws: &mut Client) -> Message {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for a message")
            .expect("connection closed")
            .unwrap();
        match message {
            Message::Ping(_) | Message::Pong(_) => continue,
            other => return other,
        }
    }
}

async fn next_json(ws: &mut Client) -> Value {
    match next_message(ws).await {
        Message::Text(text) => serde_json::from_str(text.as_str()).unwrap(),
        other => panic!("expected text message, got {:?}", other),
    }
}

#[tokio::test]
async fn test_ping_round_trip() {
    let server = start_server().await;
    let mut ws = connect(server.addr).await;

    send(&mut ws, r#"{"jsonrpc":"2.0","method":"ping","id":1}"#).await;
    match next_message(&mut ws).await {
        Message::Text(text) => {
            assert_eq!(text.as_str(), r#"{"jsonrpc":"2.0","id":1,"result":"pong"}"#)
        }
        other => panic!("unexpected message {:?}", other),
    }
}

#[tokio::test]
async fn test_malformed_request_is_ignored() {
    let server = start_server().await;
    let mut ws = connect(server.addr).await;

    send(&mut ws, "{not json").await;
    send(&mut ws, r#"{"jsonrpc":"1.0","method":"ping","id":1}"#).await;
    send(&mut ws, r#"{"jsonrpc":"2.0","method":"ping"}"#).await;
    send(&mut ws, r#"{"jsonrpc":"2.0","method":"ping","id":"after"}"#).await;

    // The first reply on the wire belongs to the last request
    let reply = next_json(&mut ws).await;
    assert_eq!(reply["id"], json!("after"));
    assert_eq!(reply["result"], json!("pong"));
}

#[tokio::test]
async fn test_unknown_method_error() {
    let server = start_server().await;
    let mut ws = connect(server.addr).await;

    send(&mut ws, r#"{"jsonrpc":"2.0","method":"bogus","id":"a"}"#).await;
    let reply = next_json(&mut ws).await;
    assert_eq!(reply["id"], json!("a"));
    assert_eq!(reply["error"]["code"], json!(-32601));
    assert_eq!(reply["error"]["message"], json!("unknown method"));
    assert!(reply.get("result").is_none());
}

#[tokio::test]
async fn test_binary_message_acknowledged() {
    let server = start_server().await;
    let mut ws = connect(server.addr).await;

    ws.send(Message::binary(vec![1u8, 2, 3])).await.unwrap();
    match next_message(&mut ws).await {
        Message::Binary(data) => assert_eq!(data.as_ref(), BINARY_ACK),
        other => panic!("expected binary ack, got {:?}", other),
    }
}

#[tokio::test]
async fn test_change_is_broadcast_to_every_peer() {
    let server = start_server().await;
    let mut a = connect(server.addr).await;
    let mut b = connect(server.addr).await;

    // A round trip on each peer guarantees both are registered
    for ws in [&mut a, &mut b] {
        send(ws, r#"{"jsonrpc":"2.0","method":"ping","id":0}"#).await;
        next_json(ws).await;
    }

    send(
        &mut a,
        r#"{"jsonrpc":"2.0","method":"set","params":{"brightness":90},"id":5}"#,
    )
    .await;

    // The response and the update may arrive in either order
    let mut seen = vec![next_json(&mut a).await, next_json(&mut a).await];
    seen.sort_by_key(|v| v.get("id").is_some());
    let (update, response) = (&seen[0], &seen[1]);

    assert_eq!(response["id"], json!(5));
    assert_eq!(response["result"], json!({"brightness": 90}));
    assert_eq!(update["method"], json!("update"));
    assert_eq!(update["params"], json!({"brightness": 90}));
    assert!(update.get("id").is_none());

    let update_b = next_json(&mut b).await;
    assert_eq!(&update_b, update);
}

#[tokio::test]
async fn test_wrong_path_rejected() {
    let server = start_server().await;
    let result = connect_async(format!("ws://{}/other", server.addr)).await;
    assert!(result.is_err());

    // The server keeps accepting on the right path
    let mut ws = connect(server.addr).await;
    send(&mut ws, r#"{"jsonrpc":"2.0","method":"ping","id":1}"#).await;
    assert_eq!(next_json(&mut ws).await["result"], json!("pong"));
}

#[tokio::test]
async fn test_disconnect_releases_session() {
    let server = start_server().await;
    let mut ws = connect(server.addr).await;
    send(&mut ws, r#"{"jsonrpc":"2.0","method":"ping","id":1}"#).await;
    next_json(&mut ws).await;
    assert_eq!(server.server.router().session_count(), 1);

    ws.close(None).await.unwrap();
    drop(ws);

    for _ in 0..100 {
        if server.server.router().session_count() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(server.server.router().session_count(), 0);
    assert_eq!(server.server.transport().connection_count(), 0);
}

#[tokio::test]
async fn test_oversized_message_closes_connection() {
    let server = start_server_with(|config| config.max_message_size = 1024).await;
    let mut ws = connect(server.addr).await;

    let oversized = format!(
        r#"{{"jsonrpc":"2.0","method":"ping","id":1,"pad":"{}"}}"#,
        "x".repeat(64 * 1024)
    );
    // The server may close before the write completes
    let _ = ws.send(Message::text(oversized)).await;
    let _ = ws
        .send(Message::text(r#"{"jsonrpc":"2.0","method":"ping","id":2}"#))
        .await;

    loop {
        let next = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for the connection to close");
        match next {
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
            Some(Ok(other)) => panic!("expected the connection to close, got {:?}", other),
        }
    }

    // Connections within the limit are still served
    let mut ws = connect(server.addr).await;
    send(&mut ws, r#"{"jsonrpc":"2.0","method":"ping","id":3}"#).await;
    assert_eq!(next_json(&mut ws).await["result"], json!("pong"));
}
