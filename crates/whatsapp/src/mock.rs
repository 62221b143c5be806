//! In-memory [`Connection`] and [`EventSink`] for tests.

use std::sync::{
    Mutex, PoisonError,
    atomic::{AtomicU64, Ordering},
};

use {
    async_trait::async_trait,
    tokio::sync::mpsc,
    wabridge_protocol::{EventSink, MediaKind, OutboundEvent, OutputLine},
};

use crate::{
    connection::Connection,
    error::{Error, Result},
    types::{
        DownloadRequest, Identity, Jid, OutgoingMessage, PairingEvent, PlatformEvent, Presence,
        UploadDescriptor,
    },
};

/// One recorded call against a [`MockConnection`].
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Identity,
    Connect,
    Disconnect,
    PairingEvents,
    Send { to: Jid, message: OutgoingMessage },
    Upload { kind: MediaKind, len: usize },
    Download(DownloadRequest),
    Presence(Presence),
    SetPushName(String),
}

#[derive(Default)]
struct Script {
    identity: Option<Identity>,
    identity_fails: bool,
    failing_connects: u32,
    emit_connected: bool,
    pairing: Vec<PairingEvent>,
    upload_fails: bool,
    send_fails: bool,
    presence_fails: bool,
    download: Option<Vec<u8>>,
}

pub struct MockConnection {
    calls: Mutex<Vec<Call>>,
    script: Mutex<Script>,
    events_tx: mpsc::UnboundedSender<PlatformEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<PlatformEvent>>>,
    next_id: AtomicU64,
}

impl Default for MockConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl MockConnection {
    pub fn new() -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            calls: Mutex::new(Vec::new()),
            script: Mutex::new(Script::default()),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            next_id: AtomicU64::new(1),
        }
    }

    fn script(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, call: Call) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
    }

    pub fn set_identity(&self, identity: Option<Identity>) {
        self.script().identity = identity;
    }

    pub fn fail_identity(&self) {
        self.script().identity_fails = true;
    }

    /// Fail the next `n` connect calls; `u32::MAX` fails every call.
    pub fn fail_connects(&self, n: u32) {
        self.script().failing_connects = n;
    }

    /// Push a [`PlatformEvent::Connected`] whenever a connect succeeds.
    pub fn emit_connected_on_connect(&self, enabled: bool) {
        self.script().emit_connected = enabled;
    }

    pub fn script_pairing(&self, events: Vec<PairingEvent>) {
        self.script().pairing = events;
    }

    pub fn fail_upload(&self, fails: bool) {
        self.script().upload_fails = fails;
    }

    pub fn fail_send(&self, fails: bool) {
        self.script().send_fails = fails;
    }

    pub fn fail_presence(&self, fails: bool) {
        self.script().presence_fails = fails;
    }

    /// Bytes returned by `download_media`; `None` makes it fail.
    pub fn set_download(&self, data: Option<Vec<u8>>) {
        self.script().download = data;
    }

    pub fn push_event(&self, event: PlatformEvent) {
        let _ = self.events_tx.send(event);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn count(&self, matches: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|call| matches(call)).count()
    }

    pub fn sent(&self) -> Vec<(Jid, OutgoingMessage)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Send { to, message } => Some((to, message)),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl Connection for MockConnection {
    async fn identity(&self) -> Result<Option<Identity>> {
        self.record(Call::Identity);
        let script = self.script();
        if script.identity_fails {
            return Err(Error::message("session store unreadable"));
        }
        Ok(script.identity.clone())
    }

    async fn connect(&self) -> Result<()> {
        self.record(Call::Connect);
        let emit = {
            let mut script = self.script();
            if script.failing_connects > 0 {
                if script.failing_connects != u32::MAX {
                    script.failing_connects -= 1;
                }
                return Err(Error::message("connect refused"));
            }
            script.emit_connected
        };
        if emit {
            self.push_event(PlatformEvent::Connected);
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.record(Call::Disconnect);
        Ok(())
    }

    async fn pairing_events(&self) -> Result<mpsc::Receiver<PairingEvent>> {
        self.record(Call::PairingEvents);
        let events = std::mem::take(&mut self.script().pairing);
        let (tx, rx) = mpsc::channel(events.len().max(1));
        for event in events {
            let _ = tx.try_send(event);
        }
        Ok(rx)
    }

    async fn send_message(&self, to: &Jid, message: OutgoingMessage) -> Result<String> {
        self.record(Call::Send {
            to: to.clone(),
            message,
        });
        if self.script().send_fails {
            return Err(Error::Rejected {
                method: "send".into(),
                message: "recipient not reachable".into(),
            });
        }
        Ok(format!("MOCK{}", self.next_id.fetch_add(1, Ordering::SeqCst)))
    }

    async fn upload(&self, data: &[u8], kind: MediaKind) -> Result<UploadDescriptor> {
        self.record(Call::Upload {
            kind,
            len: data.len(),
        });
        if self.script().upload_fails {
            return Err(Error::message("upload failed"));
        }
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(UploadDescriptor {
            url: format!("https://mmg.whatsapp.net/mock/{n}"),
            direct_path: format!("/mock/{n}"),
            media_key: vec![1; 32],
            file_enc_sha256: vec![2; 32],
            file_sha256: vec![3; 32],
            file_length: data.len() as u64,
        })
    }

    async fn download_media(&self, request: &DownloadRequest) -> Result<Vec<u8>> {
        self.record(Call::Download(request.clone()));
        self.script()
            .download
            .clone()
            .ok_or_else(|| Error::message("message not found"))
    }

    async fn send_presence(&self, presence: Presence) -> Result<()> {
        self.record(Call::Presence(presence));
        if self.script().presence_fails {
            return Err(Error::message("presence rejected"));
        }
        Ok(())
    }

    async fn set_push_name(&self, name: &str) -> Result<()> {
        self.record(Call::SetPushName(name.to_owned()));
        Ok(())
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<PlatformEvent>> {
        self.events_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

/// Sink that keeps every emitted line.
#[derive(Default)]
pub struct RecordingSink {
    lines: Mutex<Vec<OutputLine>>,
}

impl RecordingSink {
    pub fn lines(&self) -> Vec<OutputLine> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Only the [`OutputLine::Event`] lines.
    pub fn events(&self) -> Vec<OutboundEvent> {
        self.lines()
            .into_iter()
            .filter_map(|line| match line {
                OutputLine::Event(event) => Some(event),
                _ => None,
            })
            .collect()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, line: OutputLine) {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(line);
    }
}
