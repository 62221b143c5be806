//! TikTok links through the tikwm API.

use {
    async_trait::async_trait,
    reqwest::{Client, header},
    serde::Deserialize,
    serde_json::{Value, json},
    tracing::debug,
};

use crate::{
    MediaDownloader, base_url,
    error::{Error, Result},
    send_json,
};

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/104.0.0.0 Safari/537.36";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TikwmResponse {
    code: i64,
    msg: String,
    data: Option<TikwmData>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TikwmData {
    play: String,
    wmplay: String,
    music: String,
    images: Vec<String>,
}

#[derive(Clone)]
pub struct TikTokScraper {
    client: Client,
    base_url: String,
}

impl TikTokScraper {
    pub fn new(client: Client, url: &str) -> Self {
        Self {
            client,
            base_url: base_url(url),
        }
    }
}

#[async_trait]
impl MediaDownloader for TikTokScraper {
    fn service(&self) -> &'static str {
        "tiktok"
    }

    async fn download(&self, url: &str, _format: Option<&str>) -> Result<Value> {
        let request = self
            .client
            .post(format!("{}/api/", self.base_url))
            .header(header::ACCEPT, "application/json")
            .header(header::USER_AGENT, USER_AGENT)
            .form(&[
                ("url", url),
                ("count", "12"),
                ("cursor", "0"),
                ("web", "1"),
                ("hd", "1"),
            ]);
        let response: TikwmResponse = send_json(request).await?;

        if response.code != 0 {
            return Err(Error::Remote(if response.msg.is_empty() {
                format!("tikwm error code {}", response.code)
            } else {
                response.msg
            }));
        }
        let data = response
            .data
            .ok_or_else(|| Error::unexpected("tikwm response has no data"))?;
        debug!(url, images = data.images.len(), "tiktok post resolved");

        let origin = &self.base_url;
        let mut result = json!({
            "status": true,
            "wm": format!("{origin}{}", data.wmplay),
            "music": format!("{origin}{}", data.music),
            "video": format!("{origin}{}", data.play),
        });
        if !data.images.is_empty() {
            result["images"] = json!(data.images);
        }
        Ok(result)
    }
}
