use {async_trait::async_trait, tokio::sync::mpsc, wabridge_protocol::MediaKind};

use crate::{
    error::Result,
    types::{
        DownloadRequest, Identity, Jid, OutgoingMessage, PairingEvent, PlatformEvent, Presence,
        UploadDescriptor,
    },
};

/// A connected messaging session.
///
/// The wire protocol, end-to-end crypto and session persistence live behind
/// this trait. Every method may be called concurrently from many tasks.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Identity from the session store, `None` when the account was never
    /// paired. An error means the store itself could not be read.
    async fn identity(&self) -> Result<Option<Identity>>;

    async fn has_identity(&self) -> Result<bool> {
        Ok(self.identity().await?.is_some())
    }

    async fn connect(&self) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;

    /// Start listening for pairing codes. Must be called before
    /// [`Connection::connect`] on an unpaired session.
    async fn pairing_events(&self) -> Result<mpsc::Receiver<PairingEvent>>;

    /// Send a message, returning the platform-assigned message id.
    async fn send_message(&self, to: &Jid, message: OutgoingMessage) -> Result<String>;

    async fn upload(&self, data: &[u8], kind: MediaKind) -> Result<UploadDescriptor>;

    /// Fetch and decrypt the media referenced by an earlier message.
    async fn download_media(&self, request: &DownloadRequest) -> Result<Vec<u8>>;

    async fn send_presence(&self, presence: Presence) -> Result<()>;

    async fn set_push_name(&self, name: &str) -> Result<()>;

    /// Inbound event stream. Yields `Some` exactly once.
    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<PlatformEvent>>;
}
