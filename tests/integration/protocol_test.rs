//! Protocol session tests against an in-process WebSocket venue

use blitz_trader::protocol::{AuthChain, ProtocolClient, ProtocolError, StaticToken};
use blitz_trader::transport::TransportConfig;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

const GOOD_TOKEN: &str = "good-ssid";

/// Venue stand-in: authenticates one token, echoes requests, never answers
/// `hang`, rejects `reject`, and lets the test push frames or drop the
/// current connection.
struct MockVenueServer {
    addr: SocketAddr,
    received: Arc<Mutex<Vec<Value>>>,
    current: Arc<Mutex<Option<mpsc::UnboundedSender<Message>>>>,
    handle: JoinHandle<()>,
}

impl MockVenueServer {
    async fn spawn() -> Self {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let received = Arc::new(Mutex::new(Vec::new()));
        let current = Arc::new(Mutex::new(None));

        let handle = {
            let received = received.clone();
            let current = current.clone();
            tokio::spawn(async move {
                while let Ok((stream, _peer)) = listener.accept().await {
                    let received = received.clone();
                    let current = current.clone();
                    tokio::spawn(async move {
                        handle_socket(stream, received, current).await;
                    });
                }
            })
        };

        Self {
            addr,
            received,
            current,
            handle,
        }
    }

    fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    fn push(&self, name: &str, msg: Value) {
        let frame = json!({ "name": name, "msg": msg }).to_string();
        if let Some(tx) = self.current.lock().unwrap().as_ref() {
            let _ = tx.send(Message::Text(frame));
        }
    }

    /// Close the live connection from the venue side
    fn drop_connection(&self) {
        if let Some(tx) = self.current.lock().unwrap().take() {
            let _ = tx.send(Message::Close(None));
        }
    }

    fn frames_named(&self, name: &str) -> Vec<Value> {
        self.received
            .lock()
            .unwrap()
            .iter()
            .filter(|f| f["name"] == name)
            .cloned()
            .collect()
    }
}

impl Drop for MockVenueServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn handle_socket(
    stream: TcpStream,
    received: Arc<Mutex<Vec<Value>>>,
    current: Arc<Mutex<Option<mpsc::UnboundedSender<Message>>>>,
) {
    let Ok(ws) = accept_async(stream).await else {
        return;
    };
    let (mut sink, mut source) = ws.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    *current.lock().unwrap() = Some(tx.clone());

    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if sink.send(msg).await.is_err() || closing {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = source.next().await {
        let Message::Text(text) = msg else {
            continue;
        };
        let Ok(frame) = serde_json::from_str::<Value>(&text) else {
            continue;
        };
        received.lock().unwrap().push(frame.clone());

        let request_id = frame["request_id"].clone();
        let reply = match frame["name"].as_str() {
            Some("authenticate") => Some(json!({
                "name": "authenticated",
                "request_id": request_id,
                "msg": frame["msg"]["ssid"] == GOOD_TOKEN,
            })),
            Some("sendMessage") => match frame["msg"]["name"].as_str() {
                Some("hang") => None,
                Some("reject") => Some(json!({
                    "name": "result",
                    "request_id": request_id,
                    "status": 4100,
                    "msg": { "message": "not allowed" },
                })),
                _ => Some(json!({
                    "name": "result",
                    "request_id": request_id,
                    "status": 2000,
                    "msg": { "echo": frame["msg"]["body"] },
                })),
            },
            _ => None,
        };
        if let Some(reply) = reply {
            let _ = tx.send(Message::Text(reply.to_string()));
        }
    }
    writer.abort();
}

fn transport(url: String) -> TransportConfig {
    TransportConfig::new(url)
        .initial_delay(Duration::from_millis(20))
        .max_delay(Duration::from_millis(100))
}

fn token(value: &str) -> AuthChain {
    AuthChain::new(vec![Box::new(StaticToken::new(value))])
}

async fn eventually(check: impl Fn() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

#[tokio::test]
async fn test_request_round_trip_over_websocket() {
    let server = MockVenueServer::spawn().await;
    let client = ProtocolClient::connect(
        transport(server.url()),
        Duration::from_secs(2),
        token(GOOD_TOKEN),
    )
    .await
    .unwrap();

    let reply = client
        .send("get-profile", "1.0", json!({ "x": 1 }))
        .await
        .unwrap();
    assert_eq!(reply["echo"]["x"], 1);

    let rejected = client.send("reject", "1.0", json!({})).await;
    assert_eq!(
        rejected,
        Err(ProtocolError::Rejected {
            status: Some(4100),
            message: "not allowed".to_string(),
        })
    );
    assert_eq!(client.pending_count().await, 0);
}

#[tokio::test]
async fn test_refused_token_fails_the_session() {
    let server = MockVenueServer::spawn().await;
    let result = ProtocolClient::connect(
        transport(server.url()),
        Duration::from_secs(2),
        token("stale"),
    )
    .await;
    assert!(matches!(result, Err(ProtocolError::Auth(_))));
}

#[tokio::test]
async fn test_unanswered_request_times_out() {
    let server = MockVenueServer::spawn().await;
    let client = ProtocolClient::connect(
        transport(server.url()),
        Duration::from_millis(200),
        token(GOOD_TOKEN),
    )
    .await
    .unwrap();

    let result = client.send("hang", "1.0", json!({})).await;
    assert_eq!(result, Err(ProtocolError::Timeout(Duration::from_millis(200))));
    assert_eq!(client.pending_count().await, 0);
}

#[tokio::test]
async fn test_subscriptions_survive_reconnect() {
    let server = MockVenueServer::spawn().await;
    let client = ProtocolClient::connect(
        transport(server.url()),
        Duration::from_secs(2),
        token(GOOD_TOKEN),
    )
    .await
    .unwrap();
    let mut reconnects = client.reconnects();
    let mut candles = client.events("candle-generated").await;

    let params = json!({ "active_id": 76, "size": 60 });
    let key = client
        .subscribe("candle-generated", "1.0", params.clone())
        .await
        .unwrap();
    let again = client
        .subscribe("candle-generated", "1.0", params)
        .await
        .unwrap();
    assert_eq!(key, again);
    eventually(|| server.frames_named("subscribeMessage").len() == 1).await;

    server.push("candle-generated", json!({ "active_id": 76, "close": 1.1 }));
    let first = tokio::time::timeout(Duration::from_secs(2), candles.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.msg["active_id"], 76);

    server.drop_connection();
    let notice = tokio::time::timeout(Duration::from_secs(5), reconnects.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(notice.generation, 2);
    assert_eq!(notice.resubscribed, 1);
    eventually(|| server.frames_named("subscribeMessage").len() == 2).await;
    assert_eq!(server.frames_named("authenticate").len(), 2);

    server.push("candle-generated", json!({ "active_id": 76, "close": 1.2 }));
    let second = tokio::time::timeout(Duration::from_secs(2), candles.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(second.msg["close"], 1.2);

    assert!(client.unsubscribe(&key).await);
    eventually(|| server.frames_named("unsubscribeMessage").len() == 1).await;
}
