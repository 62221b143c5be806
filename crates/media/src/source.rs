use std::time::Duration;

use {
    base64::{Engine, engine::general_purpose::STANDARD},
    tracing::debug,
    wabridge_protocol::MediaSource,
};

use crate::error::{Error, Result};

/// Decode an inline standard-base64 payload.
pub fn decode_inline(payload: &str) -> Result<Vec<u8>> {
    Ok(STANDARD.decode(payload.trim())?)
}

/// HTTP fetcher for `SEND_URL_*` payloads.
#[derive(Clone)]
pub struct MediaFetcher {
    client: reqwest::Client,
}

impl MediaFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::external("failed to build http client", e))?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// GET `url` and return the body. Only `http`-prefixed URLs are accepted.
    pub async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        if !url.starts_with("http") {
            return Err(Error::NotHttp { url: url.to_owned() });
        }

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::external(format!("fetching {url}"), e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Status {
                url: url.to_owned(),
                status: status.as_u16(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| Error::external(format!("reading body of {url}"), e))?;
        debug!(url, bytes = body.len(), "fetched media");
        Ok(body.to_vec())
    }

    pub async fn resolve(&self, source: &MediaSource) -> Result<Vec<u8>> {
        match source {
            MediaSource::Inline(payload) => decode_inline(payload),
            MediaSource::Url(url) => self.fetch(url).await,
        }
    }
}
