//! End-to-end tests against a local WebSocket server.
//!
//! The server acks subscriptions, answers `get-config` and (optionally)
//! pings, records every client frame, and forwards anything the test
//! pushes to all live connections.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use inbox_core::{
    ApiError, DatasetFilter, FetchQuery, InboxApi, LoadOptions, Message, MessagePage,
    MutationRequest,
};
use inbox_sync::{
    ConnectionConfig, InboxSession, PushClient, SessionConfig, SocketEvent, SocketState,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use time::macros::datetime;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{timeout, Duration};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;

/// Pushed through the broadcast channel to make the server close with 1011.
const CLOSE_COMMAND: &str = "__close__";

struct TestServer {
    port: u16,
    connections: AtomicUsize,
    received: Mutex<Vec<Value>>,
    push: broadcast::Sender<String>,
    answer_pings: bool,
    config: Value,
}

impl TestServer {
    fn url(&self) -> String {
        format!("ws://127.0.0.1:{}", self.port)
    }

    fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    fn push(&self, frame: Value) {
        let _ = self.push.send(frame.to_string());
    }

    fn received_actions(&self, action: &str) -> Vec<Value> {
        self.received
            .lock()
            .iter()
            .filter(|f| f["action"] == action)
            .cloned()
            .collect()
    }
}

async fn start_test_server(answer_pings: bool, config: Value) -> Arc<TestServer> {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (push, _) = broadcast::channel(64);
    let server = Arc::new(TestServer {
        port,
        connections: AtomicUsize::new(0),
        received: Mutex::new(Vec::new()),
        push,
        answer_pings,
        config,
    });

    let accepting = server.clone();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let server = accepting.clone();
            let push_rx = server.push.subscribe();
            tokio::spawn(async move {
                let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
                    return;
                };
                server.connections.fetch_add(1, Ordering::SeqCst);
                serve(ws, server, push_rx).await;
            });
        }
    });
    port_ready().await;
    server
}

async fn port_ready() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}

async fn serve(
    ws: tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>,
    server: Arc<TestServer>,
    mut push_rx: broadcast::Receiver<String>,
) {
    let (mut write, mut read) = ws.split();
    loop {
        tokio::select! {
            frame = read.next() => {
                let text = match frame {
                    Some(Ok(WsMessage::Text(text))) => text,
                    Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => continue,
                };
                let Ok(request) = serde_json::from_str::<Value>(text.as_str()) else {
                    continue;
                };
                server.received.lock().push(request.clone());

                let tid = request["tid"].clone();
                let reply = match request["action"].as_str() {
                    Some("subscribe") => Some(json!({"tid": tid, "response": "ack"})),
                    Some("get-config") => {
                        Some(json!({"tid": tid, "response": "config", "data": server.config}))
                    }
                    Some("ping") if server.answer_pings => {
                        Some(json!({"tid": tid, "response": "pong"}))
                    }
                    _ => None,
                };
                if let Some(reply) = reply {
                    if write.send(WsMessage::Text(reply.to_string().into())).await.is_err() {
                        break;
                    }
                }
            }
            pushed = push_rx.recv() => {
                let Ok(text) = pushed else { break };
                if text == CLOSE_COMMAND {
                    let frame = CloseFrame {
                        code: CloseCode::from(1011),
                        reason: "restart".into(),
                    };
                    let _ = write.send(WsMessage::Close(Some(frame))).await;
                    break;
                }
                if write.send(WsMessage::Text(text.into())).await.is_err() {
                    break;
                }
            }
        }
    }
}

fn default_config() -> Value {
    json!({"pingInterval": 30, "maxOutstandingPings": 3})
}

async fn eventually(check: impl Fn() -> bool) -> bool {
    for _ in 0..500 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

fn lifecycle_channel(client: &PushClient) -> mpsc::UnboundedReceiver<SocketEvent> {
    let (tx, rx) = mpsc::unbounded_channel();
    // Kept registered for the life of the client.
    let _ = client.on_lifecycle(move |event| {
        let _ = tx.send(event.clone());
    });
    rx
}

async fn next_matching(
    rx: &mut mpsc::UnboundedReceiver<SocketEvent>,
    want: impl Fn(&SocketEvent) -> bool,
) -> SocketEvent {
    timeout(Duration::from_secs(5), async {
        loop {
            match rx.recv().await {
                Some(event) if want(&event) => return event,
                Some(_) => continue,
                None => panic!("lifecycle channel closed"),
            }
        }
    })
    .await
    .expect("event within timeout")
}

async fn open_client(server: &TestServer) -> (PushClient, mpsc::UnboundedReceiver<SocketEvent>) {
    let client = PushClient::spawn(ConnectionConfig::for_testing(server.url(), "user-1")).unwrap();
    let mut events = lifecycle_channel(&client);
    client.connect().unwrap();
    next_matching(&mut events, |e| matches!(e, SocketEvent::Opened)).await;
    (client, events)
}

#[tokio::test]
async fn test_client_subscribes_on_open() {
    let server = start_test_server(true, default_config()).await;
    let (client, _events) = open_client(&server).await;

    assert!(client.is_open());
    assert!(eventually(|| !server.received_actions("get-config").is_empty()).await);

    let subscribes = server.received_actions("subscribe");
    assert_eq!(subscribes.len(), 1);
    assert_eq!(subscribes[0]["data"]["channel"], "user-1");
    assert_eq!(subscribes[0]["data"]["event"], "*");

    client.shutdown().await;
}

#[tokio::test]
async fn test_socket_url_carries_identity() {
    let server = start_test_server(true, default_config()).await;
    let config = ConnectionConfig::for_testing(server.url(), "user-1").with_auth("secret");
    let url = config.socket_url().unwrap();

    let client = PushClient::spawn(config).unwrap();
    let mut events = lifecycle_channel(&client);
    client.connect().unwrap();
    next_matching(&mut events, |e| matches!(e, SocketEvent::Opened)).await;

    assert!(url.query().unwrap().contains("userId=user-1"));
    assert!(url.query().unwrap().contains("iwpv=v1"));
    client.shutdown().await;
}

#[tokio::test]
async fn test_message_events_reach_listeners() {
    let server = start_test_server(true, default_config()).await;
    let (client, _events) = open_client(&server).await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let _sub = client.on_message(move |event| {
        let _ = tx.send(event.clone());
    });

    server.push(json!({"event": "read", "messageId": "m1"}));
    let event = timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
    assert_eq!(event.message_id.as_deref(), Some("m1"));

    client.shutdown().await;
}

#[tokio::test]
async fn test_server_ping_is_answered() {
    let server = start_test_server(true, default_config()).await;
    let (client, _events) = open_client(&server).await;

    server.push(json!({"tid": "srv-ping-1", "action": "ping"}));
    assert!(eventually(|| server
        .received_actions("pong")
        .iter()
        .any(|f| f["tid"] == "srv-ping-1"))
    .await);

    client.shutdown().await;
}

#[tokio::test]
async fn test_reconnect_directive_reconnects_once() {
    let server = start_test_server(true, default_config()).await;
    let (client, mut events) = open_client(&server).await;

    server.push(json!({"event": "reconnect", "message": "rolling", "retryAfter": 0.2, "code": 1012}));

    let closed = next_matching(&mut events, |e| matches!(e, SocketEvent::Closed { .. })).await;
    assert_eq!(
        closed,
        SocketEvent::Closed {
            code: 1000,
            reason: "rolling".into()
        }
    );
    next_matching(&mut events, |e| matches!(e, SocketEvent::Opened)).await;
    assert!(eventually(|| server.connections() == 2).await);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(server.connections(), 2);
    client.shutdown().await;
}

#[tokio::test]
async fn test_unanswered_pings_force_reconnect() {
    let config = json!({"pingInterval": 0.1, "maxOutstandingPings": 1});
    let server = start_test_server(false, config).await;
    let (client, mut events) = open_client(&server).await;

    let closed = next_matching(&mut events, |e| matches!(e, SocketEvent::Closed { .. })).await;
    assert_eq!(
        closed,
        SocketEvent::Closed {
            code: 4000,
            reason: "ping timeout".into()
        }
    );
    assert!(!server.received_actions("ping").is_empty());

    next_matching(&mut events, |e| matches!(e, SocketEvent::Opened)).await;
    assert!(eventually(|| server.connections() >= 2).await);
    client.shutdown().await;
}

#[tokio::test]
async fn test_answered_pings_keep_connection() {
    let config = json!({"pingInterval": 0.05, "maxOutstandingPings": 1});
    let server = start_test_server(true, config).await;
    let (client, _events) = open_client(&server).await;

    assert!(eventually(|| server.received_actions("ping").len() >= 4).await);
    assert!(client.is_open());
    assert_eq!(server.connections(), 1);
    client.shutdown().await;
}

#[tokio::test]
async fn test_server_close_triggers_backoff_reconnect() {
    let server = start_test_server(true, default_config()).await;
    let (client, mut events) = open_client(&server).await;

    let _ = server.push.send(CLOSE_COMMAND.to_string());
    let closed = next_matching(&mut events, |e| matches!(e, SocketEvent::Closed { .. })).await;
    assert!(matches!(closed, SocketEvent::Closed { code: 1011, .. }));

    next_matching(&mut events, |e| matches!(e, SocketEvent::Opened)).await;
    assert!(eventually(|| server.received_actions("subscribe").len() == 2).await);
    assert_eq!(server.connections(), 2);
    client.shutdown().await;
}

#[tokio::test]
async fn test_application_close_is_final() {
    let server = start_test_server(true, default_config()).await;
    let (client, mut events) = open_client(&server).await;

    client.close(1000, "bye").unwrap();
    next_matching(&mut events, |e| matches!(e, SocketEvent::Closed { .. })).await;
    assert_eq!(client.state(), SocketState::Idle);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(server.connections(), 1);
    assert!(!client.is_open());
    client.shutdown().await;
}

struct FixedApi {
    messages: Vec<Message>,
    fetches: AtomicUsize,
}

#[async_trait]
impl InboxApi for FixedApi {
    async fn fetch_messages(&self, query: FetchQuery) -> Result<MessagePage, ApiError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(MessagePage {
            messages: self
                .messages
                .iter()
                .filter(|m| query.filter.qualifies(m))
                .cloned()
                .collect(),
            ..MessagePage::default()
        })
    }

    async fn mutate(&self, _request: MutationRequest) -> Result<(), ApiError> {
        Ok(())
    }
}

#[tokio::test]
async fn test_session_applies_pushes_to_datastore() {
    let server = start_test_server(true, default_config()).await;
    let api = Arc::new(FixedApi {
        messages: vec![Message::new("m1", datetime!(2024-05-01 10:00 UTC))],
        fetches: AtomicUsize::new(0),
    });
    let config = SessionConfig::new(ConnectionConfig::for_testing(server.url(), "user-1"));
    let session = InboxSession::sign_in(config, api.clone()).unwrap();
    session.register_feeds([("inbox", DatasetFilter::inbox())]);
    session.load(LoadOptions::refresh()).await.unwrap();

    let datastore = session.datastore().clone();
    assert_eq!(datastore.total_unread_count(), 1);
    let client = session.client().unwrap();
    assert!(eventually(|| client.is_open()).await);

    server.push(json!({"event": "read", "messageId": "m1"}));
    assert!(eventually(|| datastore.total_unread_count() == 0).await);

    server.push(json!({
        "event": "message",
        "data": {"messageId": "m2", "created": "2024-05-02T10:00:00Z"}
    }));
    assert!(eventually(|| datastore.dataset("inbox").map(|d| d.messages.len()) == Some(2)).await);
    let inbox = datastore.dataset("inbox").unwrap();
    assert_eq!(inbox.messages[0].message_id, "m2");
    assert_eq!(inbox.unread_count, 1);

    session.sign_out().await;
    assert!(session.client().is_none());
    assert!(datastore.dataset_ids().is_empty());
}

#[tokio::test]
async fn test_session_reconciles_after_reconnect() {
    let server = start_test_server(true, default_config()).await;
    let api = Arc::new(FixedApi {
        messages: vec![Message::new("m1", datetime!(2024-05-01 10:00 UTC))],
        fetches: AtomicUsize::new(0),
    });
    let config = SessionConfig::new(ConnectionConfig::for_testing(server.url(), "user-1"));
    let session = InboxSession::sign_in(config, api.clone()).unwrap();
    session.register_feeds([("inbox", DatasetFilter::inbox())]);
    session.load(LoadOptions::refresh()).await.unwrap();
    assert_eq!(api.fetches.load(Ordering::SeqCst), 1);

    let client = session.client().unwrap();
    assert!(eventually(|| client.is_open()).await);

    let _ = server.push.send(CLOSE_COMMAND.to_string());
    assert!(eventually(|| server.connections() == 2).await);
    assert!(eventually(|| api.fetches.load(Ordering::SeqCst) == 2).await);

    session.sign_out().await;
}
