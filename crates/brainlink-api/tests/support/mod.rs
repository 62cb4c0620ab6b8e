// Scripted fake controller for integration tests.
//
// Listens on an ephemeral localhost port, answers the handshake and login
// the way the script says, replays a fixed list of frames after
// `subscribe`, and then forwards whatever the test pushes. Every frame the
// client sends is recorded.

#![allow(dead_code, clippy::unwrap_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, OwnedMutexGuard, mpsc};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;

// ── Script ──────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum Login {
    Accept { device_id: Option<String> },
    Reject(String),
    /// A `login_result` frame missing its mandatory fields.
    Malformed,
    /// Never answer the login.
    Silent,
}

#[derive(Debug, Clone)]
pub struct Script {
    pub echo_nonce: bool,
    pub login: Login,
    /// Login answer per connection, in accept order; `login` once exhausted.
    pub logins: Vec<Login>,
    /// Sent right after `subscribe`.
    pub frames: Vec<Value>,
    /// Close the socket once `frames` have been sent.
    pub close_after_frames: bool,
    /// Answer `navigate` / `edit` with an ack automatically.
    pub auto_ack: bool,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            echo_nonce: true,
            login: Login::Accept {
                device_id: Some("brain-0042".into()),
            },
            logins: Vec::new(),
            frames: Vec::new(),
            close_after_frames: false,
            auto_ack: true,
        }
    }
}

// ── Frame builders ──────────────────────────────────────────────────

pub fn screen(screen_key: u32, title: &str) -> Value {
    json!({ "type": "screen", "screen_key": screen_key, "title": title })
}

pub fn update(key: (u32, u32, Option<u32>), entry: Value) -> Value {
    json!({ "type": "update", "key": [key.0, key.1, key.2], "entry": entry })
}

pub fn ack(id: u64) -> Value {
    json!({ "type": "ack", "id": id })
}

pub fn heartbeat(clock: &str) -> Value {
    update((317, 1, None), json!({ "value": clock, "_screen_key": 317 }))
}

// ── Device ──────────────────────────────────────────────────────────

pub struct FakeDevice {
    pub url: String,
    received: mpsc::UnboundedReceiver<Value>,
    push: mpsc::UnboundedSender<Value>,
    connections: Arc<AtomicUsize>,
}

impl FakeDevice {
    pub async fn start(script: Script) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (received_tx, received) = mpsc::unbounded_channel();
        let (push, push_rx) = mpsc::unbounded_channel();
        let push_rx = Arc::new(Mutex::new(push_rx));
        let connections = Arc::new(AtomicUsize::new(0));
        let script = Arc::new(script);

        {
            let connections = Arc::clone(&connections);
            tokio::spawn(async move {
                while let Ok((tcp, _)) = listener.accept().await {
                    let index = connections.fetch_add(1, Ordering::SeqCst);
                    tokio::spawn(serve(
                        tcp,
                        index,
                        Arc::clone(&script),
                        received_tx.clone(),
                        Arc::clone(&push_rx),
                    ));
                }
            });
        }

        Self {
            url: format!("ws://{addr}"),
            received,
            push,
            connections,
        }
    }

    /// `host:port`, without a scheme.
    pub fn host(&self) -> String {
        self.url.trim_start_matches("ws://").to_owned()
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Send a frame to the currently subscribed client.
    pub fn push(&self, frame: Value) {
        self.push.send(frame).unwrap();
    }

    /// Next frame of the given `type` sent by the client.
    pub async fn expect_frame(&mut self, kind: &str) -> Value {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let frame = self.received.recv().await.unwrap();
                if frame["type"] == kind {
                    return frame;
                }
            }
        })
        .await
        .unwrap_or_else(|_| panic!("no '{kind}' frame within 5s"))
    }

    /// Any frame already received and not yet consumed, without waiting.
    pub fn try_frame(&mut self) -> Option<Value> {
        self.received.try_recv().ok()
    }
}

async fn serve(
    tcp: TcpStream,
    index: usize,
    script: Arc<Script>,
    received: mpsc::UnboundedSender<Value>,
    push: Arc<Mutex<mpsc::UnboundedReceiver<Value>>>,
) {
    let Ok(mut ws) = tokio_tungstenite::accept_async(tcp).await else {
        return;
    };
    let mut pushed: Option<OwnedMutexGuard<mpsc::UnboundedReceiver<Value>>> = None;

    loop {
        let incoming = match pushed.as_mut() {
            Some(push_rx) => {
                tokio::select! {
                    frame = ws.next() => frame,
                    Some(extra) = push_rx.recv() => {
                        if send(&mut ws, &extra).await.is_err() {
                            return;
                        }
                        continue;
                    }
                }
            }
            None => ws.next().await,
        };

        let text = match incoming {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Close(_)) | Err(_)) | None => return,
            Some(Ok(_)) => continue,
        };
        let frame: Value = serde_json::from_str(text.as_str()).unwrap();
        let _ = received.send(frame.clone());

        let reply = match frame["type"].as_str() {
            Some("handshake") => {
                let nonce = if script.echo_nonce {
                    frame["nonce"].clone()
                } else {
                    json!("bogus")
                };
                vec![json!({ "type": "handshake_ack", "nonce": nonce, "session_id": "session-1" })]
            }
            Some("login") => match script.logins.get(index).unwrap_or(&script.login) {
                Login::Accept { device_id } => {
                    vec![json!({ "type": "login_result", "success": true, "device_id": device_id })]
                }
                Login::Reject(message) => {
                    vec![json!({ "type": "login_result", "success": false, "message": message })]
                }
                Login::Malformed => vec![json!({ "type": "login_result" })],
                Login::Silent => Vec::new(),
            },
            Some("subscribe") => {
                for f in &script.frames {
                    if send(&mut ws, f).await.is_err() {
                        return;
                    }
                }
                if script.close_after_frames {
                    let _ = ws.close(None).await;
                    return;
                }
                pushed = Some(Arc::clone(&push).lock_owned().await);
                Vec::new()
            }
            Some("navigate" | "edit") if script.auto_ack => {
                vec![ack(frame["id"].as_u64().unwrap())]
            }
            _ => Vec::new(),
        };

        for r in &reply {
            if send(&mut ws, r).await.is_err() {
                return;
            }
        }
    }
}

async fn send(ws: &mut WebSocketStream<TcpStream>, frame: &Value) -> Result<(), ()> {
    ws.send(Message::Text(frame.to_string().into()))
        .await
        .map_err(|_| ())
}
