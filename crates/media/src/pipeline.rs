use std::sync::Arc;

use {
    tracing::{debug, info},
    wabridge_config::MediaConfig,
    wabridge_protocol::{MediaKind, MediaSource},
    wabridge_whatsapp::{Connection, Jid, MediaMessage, OutgoingMessage},
};

use crate::{
    error::{Error, Result},
    mime,
    probe::DurationProbe,
    source::MediaFetcher,
};

/// Resolve, type, upload and send one media message.
#[derive(Clone)]
pub struct MediaPipeline {
    fetcher: MediaFetcher,
    probe: Arc<DurationProbe>,
}

impl MediaPipeline {
    pub fn new(config: &MediaConfig) -> Result<Self> {
        Ok(Self::from_parts(
            MediaFetcher::new(config.http_timeout())?,
            DurationProbe::new(config.ffprobe_path.as_deref()),
        ))
    }

    pub fn from_parts(fetcher: MediaFetcher, probe: DurationProbe) -> Self {
        Self {
            fetcher,
            probe: Arc::new(probe),
        }
    }

    pub fn fetcher(&self) -> &MediaFetcher {
        &self.fetcher
    }

    /// Upload `data` and build the outgoing message around the descriptor.
    ///
    /// Captions are kept for images and videos only; audio gets a probed
    /// duration when one is available.
    pub async fn package(
        &self,
        connection: &dyn Connection,
        data: &[u8],
        kind: MediaKind,
        caption: Option<String>,
    ) -> Result<OutgoingMessage> {
        let mimetype = mime::content_type(kind, data);
        let (caption, seconds) = match kind {
            MediaKind::Audio => (None, self.probe.probe(data).await),
            MediaKind::Image | MediaKind::Video => {
                (caption.filter(|caption| !caption.is_empty()), None)
            },
        };

        let upload = connection.upload(data, kind).await.map_err(Error::Upload)?;
        debug!(%kind, mimetype, bytes = data.len(), "media uploaded");

        Ok(OutgoingMessage::media(kind, MediaMessage {
            caption,
            mimetype: mimetype.to_owned(),
            upload,
            seconds,
        }))
    }

    /// Full path for one `SEND_*` command. Returns the sent message id.
    pub async fn send(
        &self,
        connection: &dyn Connection,
        to: &Jid,
        source: &MediaSource,
        kind: MediaKind,
        caption: Option<String>,
    ) -> Result<String> {
        let data = self.fetcher.resolve(source).await?;
        let message = self.package(connection, &data, kind, caption).await?;
        let id = connection
            .send_message(to, message)
            .await
            .map_err(Error::Send)?;
        info!(%kind, to = %to, id, "media sent");
        Ok(id)
    }
}
