//! Session transport: one WebSocket connection to a brain controller.
//!
//! A session walks through four stages, each a separate call so the
//! caller can observe (and report) exactly where it failed:
//!
//! 1. [`Connection::connect`] opens the socket.
//! 2. [`Connection::secure_handshake`] exchanges a nonce with the device.
//! 3. [`Connection::authenticate`] submits credentials.
//! 4. [`Connection::subscribe`] starts the update stream and splits the
//!    socket into a reader task and a writer task.
//!
//! After `subscribe`, updates arrive through [`Connection::next_update`]
//! or [`Connection::consume_updates`], and commands go out through the
//! session's [`AckCorrelator`].

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use secrecy::SecretString;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use url::Url;
use uuid::Uuid;

use crate::correlator::AckCorrelator;
use crate::error::Error;
use crate::wire::{ClientMessage, Command, DeviceMessage, Entry, Key, KeyClass};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const OUTBOUND_CAPACITY: usize = 64;
const UPDATE_CAPACITY: usize = 1024;

/// Upper bound on sending the close frame during shutdown.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

// ── Options ──────────────────────────────────────────────────────────

/// Tunables for a single session.
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// Bound on each of connect, secure handshake and authentication.
    pub timeout: Duration,
    /// Ask the controller to walk every screen so all values are pushed.
    pub traverse_screens: bool,
    /// Identifies this client in the handshake.
    pub client_name: String,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            traverse_screens: true,
            client_name: concat!("brainlink/", env!("CARGO_PKG_VERSION")).to_owned(),
        }
    }
}

// ── Update ───────────────────────────────────────────────────────────

/// A value update that survived filtering.
#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    pub key: Key,
    pub entry: Entry,
    /// `true` the first time this key is seen in the current session.
    pub is_new: bool,
    /// Title of the screen the value lives on, if it was announced.
    pub screen_title: Option<String>,
}

// ── Connection ───────────────────────────────────────────────────────

/// A single controller session.
///
/// Dropping a `Connection` stops its background tasks; call
/// [`close`](Self::close) to also send a close frame and wait for them.
pub struct Connection {
    options: ConnectionOptions,
    socket: Option<WsStream>,
    link: Option<Link>,
    authenticated: bool,
    session_id: Option<String>,
    device_id: Option<String>,
}

/// Live half of a subscribed session.
struct Link {
    correlator: AckCorrelator,
    updates: mpsc::Receiver<Update>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Connection {
    pub fn new(options: ConnectionOptions) -> Self {
        Self {
            options,
            socket: None,
            link: None,
            authenticated: false,
            session_id: None,
            device_id: None,
        }
    }

    /// Open the WebSocket.
    pub async fn connect(&mut self, url: &Url) -> Result<(), Error> {
        self.close().await;
        tracing::info!(url = %url, "connecting to controller");

        let (socket, _response) =
            tokio::time::timeout(self.options.timeout, tokio_tungstenite::connect_async(url.as_str()))
                .await
                .map_err(|_| self.timeout_error("connect"))?
                .map_err(|e| Error::Communication(e.to_string()))?;

        tracing::debug!("socket open");
        self.socket = Some(socket);
        Ok(())
    }

    /// Exchange a nonce with the controller. Any failure is a
    /// communication failure.
    pub async fn secure_handshake(&mut self) -> Result<(), Error> {
        let timeout = self.options.timeout;
        let client = self.options.client_name.clone();
        let socket = self.socket.as_mut().ok_or(Error::NotConnected)?;
        let nonce = Uuid::new_v4().to_string();

        let exchange = async {
            send_frame(
                socket,
                &ClientMessage::Handshake {
                    client,
                    nonce: nonce.clone(),
                },
            )
            .await?;

            match next_reply(socket).await? {
                DeviceMessage::HandshakeAck {
                    nonce: echoed,
                    session_id,
                } if echoed == nonce => Ok(session_id),
                DeviceMessage::HandshakeAck { .. } => {
                    Err(Error::Communication("handshake nonce mismatch".into()))
                }
                other => Err(Error::Communication(format!(
                    "unexpected {} frame during handshake",
                    other.tag()
                ))),
            }
        };

        let session_id = tokio::time::timeout(timeout, exchange)
            .await
            .map_err(|_| timeout_error("secure handshake", timeout))?
            .map_err(Error::into_communication)?;

        tracing::debug!(session_id, "secure handshake complete");
        self.session_id = Some(session_id);
        Ok(())
    }

    /// Submit credentials.
    ///
    /// A refusal by the controller is [`Error::Authentication`]; anything
    /// else that goes wrong on the way is a client error.
    pub async fn authenticate(&mut self, username: &str, password: &SecretString) -> Result<(), Error> {
        let timeout = self.options.timeout;
        if self.session_id.is_none() {
            return Err(Error::NotConnected);
        }
        let socket = self.socket.as_mut().ok_or(Error::NotConnected)?;

        let exchange = async {
            send_frame(
                socket,
                &ClientMessage::Login {
                    username: username.to_owned(),
                    password: password.clone(),
                },
            )
            .await?;

            match next_reply(socket).await? {
                DeviceMessage::LoginResult {
                    success: true,
                    device_id,
                    ..
                } => Ok(device_id),
                DeviceMessage::LoginResult { message, .. } => Err(Error::Authentication {
                    message: message.unwrap_or_else(|| "credentials rejected".into()),
                }),
                other => Err(Error::Client(format!(
                    "unexpected {} frame during authentication",
                    other.tag()
                ))),
            }
        };

        let device_id = tokio::time::timeout(timeout, exchange)
            .await
            .map_err(|_| timeout_error("authentication", timeout).into_client())?
            .map_err(Error::into_client)?;

        tracing::info!(username, device_id = device_id.as_deref().unwrap_or("-"), "authenticated");
        self.device_id = device_id;
        self.authenticated = true;
        Ok(())
    }

    /// Start the update stream.
    ///
    /// Splits the socket into a writer task fed by the correlator and a
    /// reader task that filters frames, routes acks and forwards updates.
    pub async fn subscribe(&mut self) -> Result<(), Error> {
        if !self.authenticated {
            return Err(Error::NotConnected);
        }
        let mut socket = self.socket.take().ok_or(Error::NotConnected)?;

        send_frame(
            &mut socket,
            &ClientMessage::Subscribe {
                traverse_screens: self.options.traverse_screens,
            },
        )
        .await?;

        let (sink, stream) = socket.split();
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let (update_tx, update_rx) = mpsc::channel(UPDATE_CAPACITY);
        let cancel = CancellationToken::new();
        let correlator = AckCorrelator::new(outbound_tx);

        let writer = tokio::spawn(write_loop(sink, outbound_rx, cancel.clone()));
        let reader = tokio::spawn(read_loop(stream, update_tx, correlator.clone(), cancel.clone()));

        tracing::debug!(traverse_screens = self.options.traverse_screens, "subscribed");
        self.link = Some(Link {
            correlator,
            updates: update_rx,
            cancel,
            tasks: vec![reader, writer],
        });
        Ok(())
    }

    /// Handle for sending acknowledged commands, once subscribed.
    pub fn correlator(&self) -> Option<AckCorrelator> {
        self.link.as_ref().map(|link| link.correlator.clone())
    }

    /// Send a command and wait for its ack.
    pub async fn send_and_await_ack(&self, command: Command) -> Result<(), Error> {
        let correlator = self.correlator().ok_or(Error::NotConnected)?;
        correlator.send_and_await_ack(command).await
    }

    /// Next filtered update, or `None` once the stream has ended.
    pub async fn next_update(&mut self) -> Option<Update> {
        self.link.as_mut()?.updates.recv().await
    }

    /// Feed every update to `on_update` until the stream ends.
    ///
    /// Always returns the reason the stream stopped; a clean end is
    /// [`Error::ConnectionClosed`].
    pub async fn consume_updates<F>(&mut self, mut on_update: F) -> Error
    where
        F: FnMut(Update),
    {
        let Some(link) = self.link.as_mut() else {
            return Error::NotConnected;
        };
        while let Some(update) = link.updates.recv().await {
            on_update(update);
        }
        Error::ConnectionClosed
    }

    /// Release the socket and stop background tasks. Safe to call any
    /// number of times.
    pub async fn close(&mut self) {
        if let Some(mut socket) = self.socket.take() {
            let _ = tokio::time::timeout(CLOSE_GRACE, socket.close(None)).await;
            tracing::debug!("socket closed");
        }
        if let Some(link) = self.link.take() {
            link.cancel.cancel();
            link.correlator.fail_all();
            for task in link.tasks {
                if let Err(e) = task.await {
                    tracing::warn!(error = %e, "session task panicked");
                }
            }
            tracing::debug!("session stopped");
        }
        self.authenticated = false;
        self.session_id = None;
    }

    /// Device identifier reported at login, if any.
    pub fn device_id(&self) -> Option<&str> {
        self.device_id.as_deref()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn is_open(&self) -> bool {
        self.socket.is_some() || self.link.is_some()
    }

    fn timeout_error(&self, stage: &'static str) -> Error {
        timeout_error(stage, self.options.timeout)
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(link) = &self.link {
            link.cancel.cancel();
            link.correlator.fail_all();
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("open", &self.is_open())
            .field("authenticated", &self.authenticated)
            .field("session_id", &self.session_id)
            .field("device_id", &self.device_id)
            .finish_non_exhaustive()
    }
}

/// Turn a configured host into a WebSocket URL.
///
/// A bare `host[:port]` gets `ws://`; `ws://` and `wss://` URLs pass
/// through unchanged.
pub fn normalize_host(host: &str) -> Result<Url, Error> {
    let host = host.trim();
    if host.starts_with("ws://") || host.starts_with("wss://") {
        return Ok(Url::parse(host)?);
    }
    if let Some((scheme, _)) = host.split_once("://") {
        return Err(Error::Client(format!("unsupported URL scheme '{scheme}'")));
    }
    Ok(Url::parse(&format!("ws://{host}"))?)
}

fn timeout_error(stage: &'static str, timeout: Duration) -> Error {
    Error::Timeout {
        stage,
        timeout,
    }
}

// ── Framing ──────────────────────────────────────────────────────────

async fn send_frame(socket: &mut WsStream, msg: &ClientMessage) -> Result<(), Error> {
    let text = serde_json::to_string(msg).map_err(|e| Error::Client(e.to_string()))?;
    socket
        .send(Message::Text(text.into()))
        .await
        .map_err(|e| Error::Communication(e.to_string()))
}

/// Next meaningful frame during the handshake stages. Keep-alives and
/// unknown frame types are skipped.
async fn next_reply(socket: &mut WsStream) -> Result<DeviceMessage, Error> {
    loop {
        let text = match socket.next().await {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Close(_))) | None => return Err(Error::ConnectionClosed),
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(Error::Communication(e.to_string())),
        };

        match decode(text.as_str())? {
            DeviceMessage::Ping | DeviceMessage::Unknown => {}
            msg => return Ok(msg),
        }
    }
}

fn decode(text: &str) -> Result<DeviceMessage, Error> {
    serde_json::from_str(text).map_err(|e| Error::Deserialization {
        message: e.to_string(),
        body: text.to_owned(),
    })
}

// ── Background tasks ─────────────────────────────────────────────────

async fn write_loop(
    mut sink: SplitSink<WsStream, Message>,
    mut outbound: mpsc::Receiver<ClientMessage>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            msg = outbound.recv() => {
                let Some(msg) = msg else { break };
                let text = match serde_json::to_string(&msg) {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::error!(error = %e, "failed to encode outbound frame");
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::Text(text.into())).await {
                    tracing::warn!(error = %e, "write failed");
                    break;
                }
            }
        }
    }

    cancel.cancel();
    let _ = tokio::time::timeout(CLOSE_GRACE, async {
        let _ = sink.send(Message::Close(None)).await;
        let _ = sink.close().await;
    })
    .await;
    tracing::debug!("writer exiting");
}

async fn read_loop(
    mut stream: SplitStream<WsStream>,
    updates: mpsc::Sender<Update>,
    correlator: AckCorrelator,
    cancel: CancellationToken,
) {
    let mut inbox = Inbox::default();

    loop {
        let frame = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            frame = stream.next() => frame,
        };

        let text = match frame {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Ping(_))) => {
                tracing::trace!("websocket ping");
                continue;
            }
            Some(Ok(Message::Close(frame))) => {
                match frame {
                    Some(cf) => tracing::info!(code = %cf.code, reason = %cf.reason, "controller closed the session"),
                    None => tracing::info!("controller closed the session"),
                }
                break;
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                tracing::warn!(error = %e, "read failed");
                break;
            }
            None => {
                tracing::info!("update stream ended");
                break;
            }
        };

        let msg = match decode(text.as_str()) {
            Ok(msg) => msg,
            Err(Error::Deserialization { message, body }) => {
                tracing::warn!(error = %message, body = %body, "dropping undecodable frame");
                continue;
            }
            Err(e) => {
                tracing::warn!(error = %e, "dropping frame");
                continue;
            }
        };

        match inbox.accept(msg) {
            Inbound::Update(update) => {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    sent = updates.send(update) => {
                        if sent.is_err() {
                            tracing::debug!("update receiver dropped");
                            break;
                        }
                    }
                }
            }
            Inbound::Ack(id) => {
                if !correlator.resolve(id) {
                    tracing::debug!(id, "ack for unknown command");
                }
            }
            Inbound::Ignore => {}
        }
    }

    correlator.fail_all();
    cancel.cancel();
    tracing::debug!("reader exiting");
}

// ── Inbound routing ──────────────────────────────────────────────────

/// Per-session bookkeeping for the reader: screen titles and the keys
/// already delivered.
#[derive(Debug, Default)]
struct Inbox {
    screens: HashMap<u32, String>,
    seen: HashSet<Key>,
}

#[derive(Debug, PartialEq)]
enum Inbound {
    Update(Update),
    Ack(u64),
    Ignore,
}

impl Inbox {
    fn accept(&mut self, msg: DeviceMessage) -> Inbound {
        match msg {
            DeviceMessage::Update { key, entry } => match key.classify() {
                KeyClass::Heartbeat | KeyClass::Navigation => Inbound::Ignore,
                KeyClass::FaultIndicator => {
                    tracing::warn!(key = %key, value = %entry.value, "controller reports a fault; value ignored");
                    Inbound::Ignore
                }
                KeyClass::Value => {
                    let is_new = self.seen.insert(key);
                    let screen_title = self.screens.get(&entry.screen_key).cloned();
                    Inbound::Update(Update {
                        key,
                        entry,
                        is_new,
                        screen_title,
                    })
                }
            },
            DeviceMessage::Screen(screen) => {
                tracing::trace!(screen = screen.screen_key, title = %screen.title, "screen");
                self.screens.insert(screen.screen_key, screen.title);
                Inbound::Ignore
            }
            DeviceMessage::Ack { id } => Inbound::Ack(id),
            DeviceMessage::Ping | DeviceMessage::Unknown => Inbound::Ignore,
            other => {
                tracing::debug!(frame = other.tag(), "unexpected frame while streaming");
                Inbound::Ignore
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn update(key: [Option<u32>; 3], value: serde_json::Value) -> DeviceMessage {
        serde_json::from_value(json!({
            "type": "update",
            "key": key,
            "entry": { "value": value, "_screen_key": key[0] }
        }))
        .unwrap()
    }

    #[test]
    fn normalize_bare_host() {
        let url = normalize_host("192.168.1.40:8080").unwrap();
        assert_eq!(url.as_str(), "ws://192.168.1.40:8080/");
    }

    #[test]
    fn normalize_keeps_websocket_urls() {
        assert_eq!(normalize_host("wss://brain.local/ws").unwrap().as_str(), "wss://brain.local/ws");
        assert_eq!(normalize_host(" ws://brain.local ").unwrap().scheme(), "ws");
    }

    #[test]
    fn normalize_rejects_other_schemes() {
        let err = normalize_host("http://brain.local").unwrap_err();
        assert!(matches!(err, Error::Client(_)));
    }

    #[test]
    fn inbox_filters_reserved_keys() {
        let mut inbox = Inbox::default();
        assert_eq!(inbox.accept(update([Some(317), Some(1), None], json!("12:00"))), Inbound::Ignore);
        assert_eq!(inbox.accept(update([Some(318), Some(2), None], json!(1))), Inbound::Ignore);
        assert_eq!(inbox.accept(update([Some(12), Some(0), None], json!(0))), Inbound::Ignore);
        assert!(inbox.seen.is_empty());
    }

    #[test]
    fn inbox_marks_first_sighting() {
        let mut inbox = Inbox::default();
        inbox.accept(DeviceMessage::Screen(crate::wire::Screen {
            screen_key: 12,
            title: "Living room".into(),
        }));

        let Inbound::Update(first) = inbox.accept(update([Some(12), Some(3), None], json!(21))) else {
            panic!("expected update");
        };
        assert!(first.is_new);
        assert_eq!(first.screen_title.as_deref(), Some("Living room"));

        let Inbound::Update(second) = inbox.accept(update([Some(12), Some(3), None], json!(22))) else {
            panic!("expected update");
        };
        assert!(!second.is_new);
        assert_eq!(second.entry.value, json!(22));
    }

    #[test]
    fn inbox_routes_acks() {
        let mut inbox = Inbox::default();
        assert_eq!(inbox.accept(DeviceMessage::Ack { id: 7 }), Inbound::Ack(7));
        assert_eq!(inbox.accept(DeviceMessage::Ping), Inbound::Ignore);
    }

    #[tokio::test]
    async fn stages_require_previous_stage() {
        let mut conn = Connection::new(ConnectionOptions::default());
        assert!(matches!(conn.secure_handshake().await, Err(Error::NotConnected)));
        assert!(matches!(
            conn.authenticate("admin", &SecretString::from("x".to_string())).await,
            Err(Error::NotConnected)
        ));
        assert!(matches!(conn.subscribe().await, Err(Error::NotConnected)));
        assert!(conn.next_update().await.is_none());
        conn.close().await;
        conn.close().await;
        assert!(!conn.is_open());
    }
}
