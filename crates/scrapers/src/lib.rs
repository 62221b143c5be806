//! Clients for the external download, image enhancement and chat services.

pub mod error;
pub mod gpt;
pub mod tiktok;
pub mod vyro;
pub mod youtube;

use std::{collections::HashMap, sync::Arc, time::Duration};

use {async_trait::async_trait, serde_json::Value, wabridge_config::ScrapersConfig};

pub use {
    error::{Error, Result},
    gpt::{ChatMessage, GptChat},
    tiktok::TikTokScraper,
    vyro::{EnhanceAction, VyroEnhancer},
    youtube::{VideoInfo, YouTubeScraper, extract_video_id},
};

/// Resolves a public post URL into direct media links.
#[async_trait]
pub trait MediaDownloader: Send + Sync {
    /// Service name used in `DOWNLOAD:` commands.
    fn service(&self) -> &'static str;

    /// `format` is service specific; `None` picks the service default.
    async fn download(&self, url: &str, format: Option<&str>) -> Result<Value>;
}

#[async_trait]
pub trait ImageEnhancer: Send + Sync {
    /// Returns the processed image bytes.
    async fn enhance(&self, image: &[u8], action: EnhanceAction) -> Result<Vec<u8>>;
}

#[async_trait]
pub trait ChatCompletion: Send + Sync {
    /// Run one completion over `history` followed by `prompt` as the user
    /// turn. An empty `model` selects the default model.
    async fn chat(&self, prompt: &str, history: Vec<ChatMessage>, model: &str) -> Result<String>;
}

/// The external services the command handlers talk to.
#[derive(Clone)]
pub struct Services {
    downloaders: HashMap<&'static str, Arc<dyn MediaDownloader>>,
    enhancer: Arc<dyn ImageEnhancer>,
    chat: Arc<dyn ChatCompletion>,
}

impl Services {
    pub fn new(enhancer: Arc<dyn ImageEnhancer>, chat: Arc<dyn ChatCompletion>) -> Self {
        Self {
            downloaders: HashMap::new(),
            enhancer,
            chat,
        }
    }

    /// The public endpoints, or whatever the config points them at.
    pub fn from_config(config: &ScrapersConfig) -> Result<Self> {
        let client = http_client(config.request_timeout())?;
        Ok(Self::new(
            Arc::new(VyroEnhancer::new(client.clone(), &config.vyro_url)),
            Arc::new(GptChat::new(
                client.clone(),
                &config.gpt_url,
                &config.chat_system_prompt,
                &config.default_chat_model,
            )),
        )
        .with_downloader(Arc::new(TikTokScraper::new(
            client.clone(),
            &config.tikwm_url,
        )))
        .with_downloader(Arc::new(YouTubeScraper::new(
            client,
            &config.ytb2mp4_url,
            &config.savetube_url,
        ))))
    }

    #[must_use]
    pub fn with_downloader(mut self, downloader: Arc<dyn MediaDownloader>) -> Self {
        self.downloaders.insert(downloader.service(), downloader);
        self
    }

    pub fn downloader(&self, service: &str) -> Option<&Arc<dyn MediaDownloader>> {
        self.downloaders.get(service)
    }

    pub async fn download(&self, service: &str, url: &str, format: Option<&str>) -> Result<Value> {
        let downloader = self
            .downloader(service)
            .ok_or_else(|| Error::UnsupportedService {
                service: service.to_owned(),
            })?;
        downloader.download(url, format).await
    }

    pub fn enhancer(&self) -> &dyn ImageEnhancer {
        self.enhancer.as_ref()
    }

    pub fn chat(&self) -> &dyn ChatCompletion {
        self.chat.as_ref()
    }
}

pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| Error::external("failed to build http client", e))
}

pub(crate) fn base_url(url: &str) -> String {
    url.trim_end_matches('/').to_owned()
}

/// Send a request and fail on a non-2xx status.
pub(crate) async fn send(request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
    let response = request
        .send()
        .await
        .map_err(|e| Error::external("API request failed", e))?;
    let status = response.status();
    if !status.is_success() {
        return Err(Error::Status {
            status: status.as_u16(),
        });
    }
    Ok(response)
}

pub(crate) async fn send_json<T: serde::de::DeserializeOwned>(
    request: reqwest::RequestBuilder,
) -> Result<T> {
    let body = send(request)
        .await?
        .bytes()
        .await
        .map_err(|e| Error::external("failed to read response", e))?;
    Ok(serde_json::from_slice(&body)?)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, serde_json::json};

    struct Fixed(&'static str);

    #[async_trait]
    impl MediaDownloader for Fixed {
        fn service(&self) -> &'static str {
            self.0
        }

        async fn download(&self, url: &str, format: Option<&str>) -> Result<Value> {
            Ok(json!({"service": self.0, "url": url, "format": format}))
        }
    }

    struct Unused;

    #[async_trait]
    impl ImageEnhancer for Unused {
        async fn enhance(&self, _image: &[u8], _action: EnhanceAction) -> Result<Vec<u8>> {
            Ok(Vec::new())
        }
    }

    #[async_trait]
    impl ChatCompletion for Unused {
        async fn chat(&self, _: &str, _: Vec<ChatMessage>, _: &str) -> Result<String> {
            Ok(String::new())
        }
    }

    fn services() -> Services {
        Services::new(Arc::new(Unused), Arc::new(Unused)).with_downloader(Arc::new(Fixed("tiktok")))
    }

    #[tokio::test]
    async fn routes_by_service_name() {
        let value = services()
            .download("tiktok", "https://vt.tiktok.com/x", Some("hd"))
            .await
            .unwrap();
        assert_eq!(value["format"], "hd");
    }

    #[tokio::test]
    async fn unknown_service_is_unsupported() {
        let err = services()
            .download("vimeo", "https://vimeo.com/1", None)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "unsupported service");
    }

    #[test]
    fn config_registers_both_downloaders() {
        let services = Services::from_config(&ScrapersConfig::default()).unwrap();
        assert!(services.downloader("tiktok").is_some());
        assert!(services.downloader("youtube").is_some());
    }
}
