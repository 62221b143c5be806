//! [`Connection`] backed by the platform sidecar over a local WebSocket.
//!
//! Frames are JSON objects:
//! - request  `{"type":"req","id":..,"method":..,"params":{..}}`
//! - response `{"type":"res","id":..,"ok":bool,"payload":..,"error":".."}`
//! - event    `{"type":"event","event":..,"payload":{..}}`
//!
//! Responses are matched to requests by id; events are fanned out to the
//! platform event stream or the active pairing listener.

use std::{
    sync::{
        Arc, Mutex as StdMutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use {
    async_trait::async_trait,
    base64::{Engine, engine::general_purpose::STANDARD},
    dashmap::DashMap,
    futures::{SinkExt, StreamExt},
    serde::{Deserialize, Serialize, de::DeserializeOwned},
    serde_json::{Value, json},
    tokio::sync::{Mutex, mpsc, oneshot},
    tokio_tungstenite::{connect_async, tungstenite::Message},
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
    wabridge_protocol::MediaKind,
};

use crate::{
    connection::Connection,
    error::{Error, Result},
    types::{
        DownloadRequest, Identity, Jid, OutgoingMessage, PairingEvent, PlatformEvent, Presence,
        UploadDescriptor,
    },
};

pub const DEFAULT_SIDECAR_PORT: u16 = 3710;
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const PAIRING_BUFFER: usize = 16;
const CONNECT_RETRY_DELAY: Duration = Duration::from_secs(1);

type Reply = std::result::Result<Value, String>;

#[derive(Serialize)]
struct RequestFrame<'a> {
    r#type: &'static str,
    id: &'a str,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum IncomingFrame {
    Res {
        id: String,
        ok: bool,
        #[serde(default)]
        payload: Value,
        #[serde(default)]
        error: Option<String>,
    },
    Event {
        event: String,
        #[serde(default)]
        payload: Value,
    },
}

#[derive(Debug, PartialEq)]
enum SidecarEvent {
    Platform(PlatformEvent),
    Pairing(PairingEvent),
}

fn decode_event(name: &str, payload: Value) -> Result<SidecarEvent> {
    let str_field = |key: &str| payload.get(key).and_then(Value::as_str).map(str::to_owned);

    let event = match name {
        "message" => SidecarEvent::Platform(PlatformEvent::Message(Box::new(
            serde_json::from_value(payload)?,
        ))),
        "connected" => SidecarEvent::Platform(PlatformEvent::Connected),
        "disconnected" => SidecarEvent::Platform(PlatformEvent::Disconnected {
            reason: str_field("reason"),
        }),
        "history_sync" => SidecarEvent::Platform(PlatformEvent::HistorySync {
            conversations: payload
                .get("conversations")
                .and_then(Value::as_u64)
                .unwrap_or(0),
        }),
        "logged_out" => SidecarEvent::Platform(PlatformEvent::LoggedOut),
        "qr" => {
            let code = str_field("code").ok_or_else(|| Error::message("qr event without code"))?;
            SidecarEvent::Pairing(PairingEvent::Code(code))
        },
        "pair_success" => SidecarEvent::Pairing(PairingEvent::Success),
        "qr_timeout" => SidecarEvent::Pairing(PairingEvent::Timeout),
        other => SidecarEvent::Platform(PlatformEvent::Other(other.to_owned())),
    };
    Ok(event)
}

fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State shared with the link reader task.
struct Shared {
    /// In-flight requests, tagged with the generation of the link they went out on.
    pending: DashMap<String, (u64, oneshot::Sender<Reply>)>,
    /// Generation of the most recently opened link.
    generation: AtomicU64,
    events: mpsc::UnboundedSender<PlatformEvent>,
    pairing: StdMutex<Option<mpsc::Sender<PairingEvent>>>,
}

impl Shared {
    fn dispatch(&self, text: &str) {
        let frame: IncomingFrame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "ignoring malformed sidecar frame");
                return;
            },
        };

        match frame {
            IncomingFrame::Res {
                id,
                ok,
                payload,
                error,
            } => {
                let Some((_, (_, tx))) = self.pending.remove(&id) else {
                    debug!(id = %id, "response for unknown or expired request");
                    return;
                };
                let reply = if ok {
                    Ok(payload)
                } else {
                    Err(error.unwrap_or_else(|| "unspecified sidecar error".into()))
                };
                let _ = tx.send(reply);
            },
            IncomingFrame::Event { event, payload } => match decode_event(&event, payload) {
                Ok(SidecarEvent::Platform(event)) => {
                    if self.events.send(event).is_err() {
                        debug!("platform event receiver dropped");
                    }
                },
                Ok(SidecarEvent::Pairing(event)) => self.forward_pairing(event),
                Err(e) => warn!(event = %event, error = %e, "ignoring undecodable sidecar event"),
            },
        }
    }

    fn forward_pairing(&self, event: PairingEvent) {
        match lock(&self.pairing).as_ref() {
            Some(tx) => {
                if tx.try_send(event).is_err() {
                    warn!("pairing listener is gone or full, dropping pairing event");
                }
            },
            None => debug!(?event, "pairing event without a listener"),
        }
    }

    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Fail the requests sent on link `generation`. Requests on a newer link
    /// are left alone, and only the loss of the newest link is reported.
    fn link_closed(&self, generation: u64) {
        // Dropping a sender fails its request.
        self.pending.retain(|_, (owner, _)| *owner != generation);
        if self.generation.load(Ordering::SeqCst) != generation {
            debug!(generation, "stale sidecar link closed");
            return;
        }
        let _ = self.events.send(PlatformEvent::Disconnected {
            reason: Some("sidecar link closed".into()),
        });
    }
}

/// One open WebSocket to the sidecar.
struct Link {
    generation: u64,
    tx: mpsc::UnboundedSender<Message>,
    /// Cancelled by the reader task once the socket is gone.
    closed: CancellationToken,
}

impl Link {
    fn is_open(&self) -> bool {
        !self.closed.is_cancelled() && !self.tx.is_closed()
    }
}

/// Connection to a platform sidecar.
pub struct SidecarConnection {
    url: String,
    link: Mutex<Option<Link>>,
    shared: Arc<Shared>,
    events_rx: StdMutex<Option<mpsc::UnboundedReceiver<PlatformEvent>>>,
    request_timeout: Duration,
}

impl SidecarConnection {
    pub fn new(url: impl Into<String>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            url: url.into(),
            link: Mutex::new(None),
            shared: Arc::new(Shared {
                pending: DashMap::new(),
                generation: AtomicU64::new(0),
                events: events_tx,
                pairing: StdMutex::new(None),
            }),
            events_rx: StdMutex::new(Some(events_rx)),
            request_timeout: REQUEST_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Open the link, retrying once a second while the sidecar boots.
    pub async fn connect_with_retry(url: impl Into<String>, attempts: u32) -> Result<Self> {
        let connection = Self::new(url);
        let attempts = attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            match connection.writer().await {
                Ok(_) => {
                    info!(url = %connection.url, attempt, "connected to platform sidecar");
                    return Ok(connection);
                },
                Err(e) => {
                    debug!(attempt, error = %e, "platform sidecar not reachable yet");
                    last_error = Some(e);
                    if attempt < attempts {
                        tokio::time::sleep(CONNECT_RETRY_DELAY).await;
                    }
                },
            }
        }
        Err(last_error.unwrap_or(Error::NotConnected))
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Generation and writer half of the link, reopening it if the previous
    /// one died.
    async fn writer(&self) -> Result<(u64, mpsc::UnboundedSender<Message>)> {
        let mut link = self.link.lock().await;
        if let Some(open) = link.as_ref().filter(|l| l.is_open()) {
            return Ok((open.generation, open.tx.clone()));
        }
        let fresh = open_link(&self.url, Arc::clone(&self.shared)).await?;
        let writer = (fresh.generation, fresh.tx.clone());
        *link = Some(fresh);
        Ok(writer)
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let (generation, writer) = self.writer().await?;
        let id = uuid::Uuid::new_v4().to_string();
        let frame = serde_json::to_string(&RequestFrame {
            r#type: "req",
            id: &id,
            method,
            params,
        })?;

        let (tx, rx) = oneshot::channel();
        self.shared.pending.insert(id.clone(), (generation, tx));
        if writer.send(Message::Text(frame.into())).is_err() {
            self.shared.pending.remove(&id);
            return Err(Error::NotConnected);
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(Ok(payload))) => Ok(payload),
            Ok(Ok(Err(message))) => Err(Error::Rejected {
                method: method.to_owned(),
                message,
            }),
            Ok(Err(_)) => Err(Error::NotConnected),
            Err(_) => {
                self.shared.pending.remove(&id);
                Err(Error::Timeout {
                    method: method.to_owned(),
                })
            },
        }
    }

    async fn request<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        let payload = self.call(method, params).await?;
        Ok(serde_json::from_value(payload)?)
    }

    async fn close_link(&self) {
        if let Some(link) = self.link.lock().await.take() {
            let _ = link.tx.send(Message::Close(None));
        }
    }
}

async fn open_link(url: &str, shared: Arc<Shared>) -> Result<Link> {
    let (stream, _response) = connect_async(url).await?;
    let (mut sink, mut reader) = stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let closing = matches!(message, Message::Close(_));
            if let Err(e) = sink.send(message).await {
                warn!(error = %e, "sidecar link write failed");
                break;
            }
            if closing {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let generation = shared.next_generation();
    let control = tx.clone();
    let closed = CancellationToken::new();
    let reader_closed = closed.clone();
    tokio::spawn(async move {
        while let Some(frame) = reader.next().await {
            match frame {
                Ok(Message::Text(text)) => shared.dispatch(&text),
                Ok(Message::Ping(data)) => {
                    let _ = control.send(Message::Pong(data));
                },
                Ok(Message::Close(_)) => break,
                Ok(_) => {},
                Err(e) => {
                    warn!(error = %e, "sidecar link read failed");
                    break;
                },
            }
        }
        debug!("sidecar link closed");
        reader_closed.cancel();
        let _ = control.send(Message::Close(None));
        shared.link_closed(generation);
    });

    Ok(Link {
        generation,
        tx,
        closed,
    })
}

#[derive(Deserialize)]
struct SentMessage {
    id: String,
}

#[derive(Deserialize)]
struct DownloadedMedia {
    data: String,
}

#[async_trait]
impl Connection for SidecarConnection {
    async fn identity(&self) -> Result<Option<Identity>> {
        let payload = self.call("identity", json!({})).await?;
        if payload.get("jid").is_none_or(Value::is_null) {
            return Ok(None);
        }
        Ok(Some(serde_json::from_value(payload)?))
    }

    async fn connect(&self) -> Result<()> {
        self.call("connect", json!({})).await.map(drop)
    }

    async fn disconnect(&self) -> Result<()> {
        let result = self.call("disconnect", json!({})).await.map(drop);
        self.close_link().await;
        result
    }

    async fn pairing_events(&self) -> Result<mpsc::Receiver<PairingEvent>> {
        let (tx, rx) = mpsc::channel(PAIRING_BUFFER);
        *lock(&self.shared.pairing) = Some(tx);
        Ok(rx)
    }

    async fn send_message(&self, to: &Jid, message: OutgoingMessage) -> Result<String> {
        let sent: SentMessage = self
            .request("send", json!({ "to": to, "message": message }))
            .await?;
        Ok(sent.id)
    }

    async fn upload(&self, data: &[u8], kind: MediaKind) -> Result<UploadDescriptor> {
        self.request(
            "upload",
            json!({ "kind": kind.as_str(), "data": STANDARD.encode(data) }),
        )
        .await
    }

    async fn download_media(&self, request: &DownloadRequest) -> Result<Vec<u8>> {
        let media: DownloadedMedia = self.request("download", serde_json::to_value(request)?).await?;
        STANDARD
            .decode(media.data)
            .map_err(|e| Error::external("sidecar returned invalid media payload", e))
    }

    async fn send_presence(&self, presence: Presence) -> Result<()> {
        self.call("presence", json!({ "presence": presence }))
            .await
            .map(drop)
    }

    async fn set_push_name(&self, name: &str) -> Result<()> {
        self.call("set_push_name", json!({ "name": name }))
            .await
            .map(drop)
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<PlatformEvent>> {
        lock(&self.events_rx).take()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, tokio::net::TcpListener};

    type Handler = fn(&str, &str, &Value) -> Vec<Value>;

    /// Minimal sidecar: answers each request with the frames the handler
    /// returns. A bare `"close"` string drops the socket.
    async fn spawn_sidecar(handler: Handler) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
                    'outer: while let Some(Ok(message)) = ws.next().await {
                        let Message::Text(text) = message else {
                            continue;
                        };
                        let req: Value = serde_json::from_str(&text).unwrap();
                        let frames = handler(
                            req["id"].as_str().unwrap(),
                            req["method"].as_str().unwrap(),
                            &req["params"],
                        );
                        for frame in frames {
                            if frame == json!("close") {
                                break 'outer;
                            }
                            ws.send(Message::Text(frame.to_string().into())).await.unwrap();
                        }
                    }
                });
            }
        });
        format!("ws://{addr}")
    }

    fn ok(id: &str, payload: Value) -> Value {
        json!({"type": "res", "id": id, "ok": true, "payload": payload})
    }

    #[tokio::test]
    async fn correlates_responses_with_requests() {
        let url = spawn_sidecar(|id, method, params| match method {
            "identity" => vec![ok(id, json!({"jid": "123@s.whatsapp.net", "pushName": "Awara"}))],
            "send" => {
                assert_eq!(params["to"], "456@s.whatsapp.net");
                assert_eq!(params["message"]["type"], "text");
                vec![ok(id, json!({"id": "3EB0ABC"}))]
            },
            _ => vec![ok(id, Value::Null)],
        })
        .await;

        let conn = SidecarConnection::connect_with_retry(url, 3).await.unwrap();
        let identity = conn.identity().await.unwrap().unwrap();
        assert_eq!(identity.jid.user, "123");
        assert_eq!(identity.push_name, "Awara");
        assert!(conn.has_identity().await.unwrap());

        let to: Jid = "456@s.whatsapp.net".parse().unwrap();
        let id = conn
            .send_message(&to, OutgoingMessage::Text { text: "hi".into() })
            .await
            .unwrap();
        assert_eq!(id, "3EB0ABC");
    }

    #[tokio::test]
    async fn unpaired_store_has_no_identity() {
        let url = spawn_sidecar(|id, _, _| vec![ok(id, json!({"jid": null}))]).await;
        let conn = SidecarConnection::connect_with_retry(url, 1).await.unwrap();
        assert_eq!(conn.identity().await.unwrap(), None);
    }

    #[tokio::test]
    async fn rejected_request_carries_sidecar_message() {
        let url = spawn_sidecar(|id, _, _| {
            vec![json!({"type": "res", "id": id, "ok": false, "error": "store locked"})]
        })
        .await;
        let conn = SidecarConnection::connect_with_retry(url, 1).await.unwrap();
        let err = conn.connect().await.unwrap_err();
        assert!(matches!(err, Error::Rejected { ref message, .. } if message == "store locked"));
    }

    #[tokio::test]
    async fn unanswered_request_times_out() {
        let url = spawn_sidecar(|_, _, _| Vec::new()).await;
        let conn = SidecarConnection::connect_with_retry(url, 1)
            .await
            .unwrap()
            .with_request_timeout(Duration::from_millis(50));
        let err = conn.send_presence(Presence::Available).await.unwrap_err();
        assert!(matches!(err, Error::Timeout { ref method } if method == "presence"));
        assert!(conn.shared.pending.is_empty());
    }

    #[tokio::test]
    async fn events_reach_the_right_listener() {
        let url = spawn_sidecar(|id, method, _| match method {
            "connect" => vec![
                json!({"type": "event", "event": "qr", "payload": {"code": "2@abc"}}),
                json!({"type": "event", "event": "pair_success"}),
                json!({"type": "event", "event": "connected"}),
                json!({"type": "event", "event": "history_sync", "payload": {"conversations": 7}}),
                json!({"type": "event", "event": "message", "payload": {
                    "info": {"id": "M1", "chat": "1@s.whatsapp.net", "sender": "1@s.whatsapp.net"},
                    "message": {"conversation": "hello"}
                }}),
                ok(id, Value::Null),
            ],
            _ => vec![ok(id, Value::Null)],
        })
        .await;

        let conn = SidecarConnection::connect_with_retry(url, 1).await.unwrap();
        let mut events = conn.take_events().unwrap();
        assert!(conn.take_events().is_none());
        let mut pairing = conn.pairing_events().await.unwrap();
        conn.connect().await.unwrap();

        assert_eq!(pairing.recv().await, Some(PairingEvent::Code("2@abc".into())));
        assert_eq!(pairing.recv().await, Some(PairingEvent::Success));
        assert_eq!(events.recv().await, Some(PlatformEvent::Connected));
        assert_eq!(
            events.recv().await,
            Some(PlatformEvent::HistorySync { conversations: 7 })
        );
        let Some(PlatformEvent::Message(message)) = events.recv().await else {
            panic!("expected message event");
        };
        assert_eq!(message.message.text(), "hello");
    }

    #[tokio::test]
    async fn closed_link_fails_pending_and_reports_disconnect() {
        let url = spawn_sidecar(|id, method, _| match method {
            "connect" => vec![json!("close")],
            _ => vec![ok(id, Value::Null)],
        })
        .await;
        let conn = SidecarConnection::connect_with_retry(url, 1).await.unwrap();
        let mut events = conn.take_events().unwrap();

        let err = conn.connect().await.unwrap_err();
        assert!(matches!(err, Error::NotConnected));
        assert!(matches!(
            events.recv().await,
            Some(PlatformEvent::Disconnected { reason: Some(_) })
        ));

        // The next request transparently reopens the link.
        conn.send_presence(Presence::Available).await.unwrap();
    }

    #[test]
    fn stale_link_close_keeps_newer_requests() {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let shared = Shared {
            pending: DashMap::new(),
            generation: AtomicU64::new(0),
            events: events_tx,
            pairing: StdMutex::new(None),
        };
        let old = shared.next_generation();
        let (old_tx, mut old_rx) = oneshot::channel();
        shared.pending.insert("old".into(), (old, old_tx));
        let new = shared.next_generation();
        let (new_tx, mut new_rx) = oneshot::channel();
        shared.pending.insert("new".into(), (new, new_tx));

        shared.link_closed(old);
        assert!(old_rx.try_recv().is_err());
        assert!(shared.pending.contains_key("new"));
        assert!(events_rx.try_recv().is_err());

        let reply = json!({"type": "res", "id": "new", "ok": true, "payload": 1});
        shared.dispatch(&reply.to_string());
        assert_eq!(new_rx.try_recv().unwrap(), Ok(json!(1)));

        shared.link_closed(new);
        assert!(matches!(
            events_rx.try_recv(),
            Ok(PlatformEvent::Disconnected { .. })
        ));
    }

    #[tokio::test]
    async fn unreachable_sidecar_gives_up_after_attempts() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let result = SidecarConnection::connect_with_retry(format!("ws://{addr}"), 1).await;
        assert!(matches!(result, Err(Error::WebSocket(_))));
    }

    #[test]
    fn unknown_events_are_kept_as_other() {
        assert_eq!(
            decode_event("call_offer", Value::Null).unwrap(),
            SidecarEvent::Platform(PlatformEvent::Other("call_offer".into()))
        );
        assert!(decode_event("qr", json!({})).is_err());
    }
}
