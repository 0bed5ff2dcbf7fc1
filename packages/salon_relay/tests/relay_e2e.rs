//! End-to-end: a real relay on an ephemeral port, driven by WebSocket clients
//! and a fake messaging provider receiving replies over the webhook.

use axum::{Json, Router, extract::State, routing::post};
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

use salon_relay::config::ServerConfig;
use salon_relay::delivery::WebhookChannel;
use salon_relay::persistence::NullSink;
use salon_relay::relay::ConversationStore;
use salon_relay::{AppState, build_router};

const TIMEOUT: Duration = Duration::from_secs(3);

struct Relay {
    addr: SocketAddr,
    webhook_rx: mpsc::UnboundedReceiver<Value>,
}

impl Relay {
    async fn start() -> Self {
        // Fake messaging provider
        let (hook_tx, webhook_rx) = mpsc::unbounded_channel::<Value>();
        let provider = Router::new()
            .route(
                "/send",
                post(
                    |State(tx): State<mpsc::UnboundedSender<Value>>, Json(body): Json<Value>| async move {
                        let _ = tx.send(body);
                        Json(json!({ "ok": true }))
                    },
                ),
            )
            .with_state(hook_tx);
        let provider_listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let provider_addr = provider_listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(provider_listener, provider).await.unwrap() });

        let channel = WebhookChannel::new(
            format!("http://{provider_addr}/send"),
            Duration::from_secs(2),
        )
        .unwrap();
        let (state, _worker) = AppState::new(
            ServerConfig::default(),
            Arc::new(ConversationStore::new()),
            Arc::new(NullSink),
            Arc::new(channel),
            None,
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = build_router(state);
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        Self { addr, webhook_rx }
    }

    async fn connect(&self) -> Client {
        let (ws, _) = connect_async(format!("ws://{}/api/ws", self.addr))
            .await
            .unwrap();
        Client { ws }
    }

    async fn operator(&self, operator_id: &str) -> (Client, Value) {
        let mut client = self.connect().await;
        client
            .send(json!({ "type": "operator-identify", "operator_id": operator_id }))
            .await;
        let snapshot = client.expect("snapshot").await;
        (client, snapshot)
    }

    async fn next_webhook(&mut self) -> Value {
        tokio::time::timeout(TIMEOUT, self.webhook_rx.recv())
            .await
            .expect("webhook call")
            .unwrap()
    }

    fn http(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

struct Client {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl Client {
    async fn send(&mut self, frame: Value) {
        self.ws
            .send(Message::Text(frame.to_string().into()))
            .await
            .unwrap();
    }

    async fn recv(&mut self) -> Option<Value> {
        loop {
            match tokio::time::timeout(TIMEOUT, self.ws.next()).await {
                Ok(Some(Ok(Message::Text(text)))) => {
                    return Some(serde_json::from_str(text.as_str()).unwrap());
                }
                Ok(Some(Ok(_))) => continue,
                _ => return None,
            }
        }
    }

    /// Next frame, which must be of type `kind`.
    async fn expect(&mut self, kind: &str) -> Value {
        let frame = self.recv().await.unwrap_or_else(|| panic!("expected {kind}"));
        assert_eq!(frame["type"], kind, "unexpected frame: {frame}");
        frame
    }

    /// Nothing arrives within a short window.
    async fn expect_silence(&mut self) {
        match tokio::time::timeout(Duration::from_millis(200), self.ws.next()).await {
            Err(_) => {}
            Ok(Some(Ok(Message::Text(text)))) => panic!("unexpected frame: {text}"),
            Ok(other) => panic!("unexpected socket event: {other:?}"),
        }
    }

    async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }
}

#[tokio::test]
async fn customer_operator_round_trip() {
    let mut relay = Relay::start().await;

    // Both operators start with an empty view
    let (mut ana, snap) = relay.operator("ana@x.com").await;
    assert_eq!(snap["conversations"], json!([]));
    let (mut luis, _) = relay.operator("luis@x.com").await;

    // 1. First contact reaches every operator
    let mut adapter = relay.connect().await;
    adapter
        .send(json!({
            "type": "customer-message",
            "customer_address": "+56911112222",
            "text": "Hola"
        }))
        .await;

    let mut conversation_id = String::new();
    for client in [&mut ana, &mut luis] {
        let new = client.expect("new-conversation").await;
        assert_eq!(new["customer_address"], "+56911112222");
        assert_eq!(new["text"], "Hola");
        conversation_id = new["conversation_id"].as_str().unwrap().to_string();

        let msg = client.expect("message").await;
        assert_eq!(msg["message"]["id"], 1);
        assert_eq!(msg["message"]["direction"], "incoming");
        assert!(msg.get("assigned_operator").is_none());
    }

    // 2. First reply claims the conversation
    ana.send(json!({
        "type": "operator-message",
        "conversation_id": conversation_id,
        "operator_id": "ana@x.com",
        "text": "Hola, ¿en qué te ayudo?",
        "client_id": "tmp-1"
    }))
    .await;
    let ack = ana.expect("ack").await;
    assert_eq!(ack["client_id"], "tmp-1");
    assert_eq!(ack["claimed"], true);
    assert_eq!(ack["message"]["id"], 2);

    let assigned = luis.expect("conversation-assigned").await;
    assert_eq!(assigned["conversation_id"], conversation_id.as_str());
    assert_eq!(assigned["operator_id"], "ana@x.com");

    let hook = relay.next_webhook().await;
    assert_eq!(hook["to"], "+56911112222");
    assert_eq!(hook["text"], "Hola, ¿en qué te ayudo?");
    assert_eq!(hook["message_id"], 2);

    // 3. The losing operator's reply is stored but the owner is unchanged
    luis.send(json!({
        "type": "operator-message",
        "conversation_id": conversation_id,
        "operator_id": "luis@x.com",
        "text": "Yo también te ayudo"
    }))
    .await;
    let ack = luis.expect("ack").await;
    assert_eq!(ack["claimed"], false);
    assert_eq!(ack["assigned_operator"], "ana@x.com");
    let echoed = ana.expect("message").await;
    assert_eq!(echoed["message"]["sender"], "luis@x.com");
    relay.next_webhook().await;

    // 4. Later customer messages go only to the owner
    let resp = reqwest::Client::new()
        .post(relay.http("/api/inbound"))
        .json(&json!({ "customer_address": "+56911112222", "text": "Quiero una hora" }))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());

    let msg = ana.expect("message").await;
    assert_eq!(msg["message"]["text"], "Quiero una hora");
    assert_eq!(msg["assigned_operator"], "ana@x.com");
    luis.expect_silence().await;

    // 5. A new tab gets the full history; other operators no longer see it
    let (ana2, snap) = relay.operator("ana@x.com").await;
    let conversations = snap["conversations"].as_array().unwrap();
    assert_eq!(conversations.len(), 1);
    assert_eq!(conversations[0]["messages"].as_array().unwrap().len(), 4);
    assert_eq!(conversations[0]["unread_count"], 1);

    luis.send(json!({ "type": "operator-request-snapshot", "operator_id": "luis@x.com" }))
        .await;
    let snap = luis.expect("snapshot").await;
    assert_eq!(snap["conversations"], json!([]));

    // Administrative release reopens it for everyone
    let resp = reqwest::Client::new()
        .post(relay.http(&format!("/api/conversations/{conversation_id}/release")))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());
    for client in [&mut ana, &mut luis] {
        let released = client.expect("conversation-released").await;
        assert_eq!(released["conversation"]["id"], conversation_id.as_str());
        assert!(released["conversation"]["assigned_operator"].is_null());
    }

    ana2.close().await;
    adapter.close().await;
}

#[tokio::test]
async fn protocol_errors_are_reported_not_fatal() {
    let relay = Relay::start().await;
    let mut client = relay.connect().await;

    client.send(json!({ "type": "bogus" })).await;
    let err = client.expect("error").await;
    assert!(err["message"].as_str().unwrap().contains("bad message"));

    client
        .send(json!({
            "type": "operator-message",
            "conversation_id": "c-1",
            "operator_id": "ana@x.com",
            "text": "hola"
        }))
        .await;
    let err = client.expect("error").await;
    assert_eq!(err["conversation_id"], "c-1");

    // Still usable afterwards
    client
        .send(json!({ "type": "operator-identify", "operator_id": "ana@x.com" }))
        .await;
    client.expect("snapshot").await;

    client
        .send(json!({
            "type": "operator-message",
            "conversation_id": "missing",
            "operator_id": "ana@x.com",
            "text": "hola"
        }))
        .await;
    let err = client.expect("error").await;
    assert!(err["message"].as_str().unwrap().contains("not found"));
}

#[tokio::test]
async fn disconnect_unregisters_operator() {
    let relay = Relay::start().await;
    let http = reqwest::Client::new();

    let (ana, _) = relay.operator("ana@x.com").await;
    let health: Value = http
        .get(relay.http("/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["operators_online"], 1);

    ana.close().await;

    // Unregister runs when the handler notices the close
    let mut online = 1;
    for _ in 0..50 {
        let health: Value = http
            .get(relay.http("/health"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        online = health["operators_online"].as_u64().unwrap();
        if online == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(online, 0);
}
