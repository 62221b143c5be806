use std::fmt;

use {
    async_trait::async_trait,
    reqwest::{
        Client, header,
        multipart::{Form, Part},
    },
    tracing::debug,
};

use crate::{
    ImageEnhancer, base_url,
    error::{Error, Result},
    send,
};

const USER_AGENT: &str = "okhttp/4.9.3";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EnhanceAction {
    #[default]
    Enhance,
    Recolor,
    Dehaze,
}

impl EnhanceAction {
    /// Unknown names fall back to [`EnhanceAction::Enhance`].
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name {
            "recolor" => Self::Recolor,
            "dehaze" => Self::Dehaze,
            _ => Self::Enhance,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Enhance => "enhance",
            Self::Recolor => "recolor",
            Self::Dehaze => "dehaze",
        }
    }
}

impl fmt::Display for EnhanceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Vyro inference engine image filters.
#[derive(Clone)]
pub struct VyroEnhancer {
    client: Client,
    base_url: String,
}

impl VyroEnhancer {
    pub fn new(client: Client, url: &str) -> Self {
        Self {
            client,
            base_url: base_url(url),
        }
    }
}

#[async_trait]
impl ImageEnhancer for VyroEnhancer {
    async fn enhance(&self, image: &[u8], action: EnhanceAction) -> Result<Vec<u8>> {
        let file = Part::bytes(image.to_vec())
            .file_name("enhance_image.jpg")
            .mime_str("image/jpeg")
            .map_err(|e| Error::external("invalid mime type", e))?;
        let form = Form::new().text("model_version", "1").part("image", file);

        let request = self
            .client
            .post(format!("{}/{action}", self.base_url))
            .header(header::USER_AGENT, USER_AGENT)
            .multipart(form);
        let body = send(request)
            .await?
            .bytes()
            .await
            .map_err(|e| Error::external("failed to read response", e))?;
        debug!(%action, input = image.len(), output = body.len(), "image processed");
        Ok(body.to_vec())
    }
}
