//! YouTube metadata from ytb2mp4 and download links from savetube.
//!
//! Savetube hands out a random CDN host, returns the video info encrypted
//! with a fixed AES-128-CBC key (IV prefixed to the ciphertext), and the
//! `key` field inside that payload unlocks the final download link.

use std::sync::LazyLock;

use {
    aes::cipher::{BlockDecryptMut, KeyIvInit, block_padding::Pkcs7},
    async_trait::async_trait,
    base64::{Engine, engine::general_purpose::STANDARD},
    regex::Regex,
    reqwest::{Client, RequestBuilder, header},
    serde::Deserialize,
    serde_json::{Value, json},
    tracing::{debug, info},
};

use crate::{
    MediaDownloader, base_url,
    error::{Error, Result},
    send_json,
};

type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

const SAVETUBE_KEY: &str = "C5D58EF67A7584E4A29F6C35BBC4EB12";
const SAVETUBE_ORIGIN: &str = "https://yt.savetube.me";
const SAVETUBE_AGENT: &str = "Postify/1.0.0";
const INFO_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";
const AUDIO_QUALITY: &str = "128";
const VIDEO_QUALITY: &str = "720";

#[allow(clippy::expect_used)]
static VIDEO_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:youtu\.be/|youtube\.com/(?:watch\?v=|embed/|v/|shorts/))([a-zA-Z0-9_-]{11})")
        .expect("valid video id regex")
});

/// The 11-character video id from a watch, short, embed or `youtu.be` link.
pub fn extract_video_id(url: &str) -> Result<&str> {
    VIDEO_ID
        .captures(url)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .ok_or(Error::InvalidVideoUrl)
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct VideoInfo {
    pub title: String,
    /// Seconds.
    pub duration: f64,
    pub thumbnail: String,
    pub author: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct InfoResponse {
    data: VideoInfo,
}

#[derive(Debug, Deserialize)]
struct CdnResponse {
    cdn: String,
}

#[derive(Debug, Deserialize)]
struct EncryptedResponse {
    data: String,
}

#[derive(Debug, Deserialize)]
struct DecryptedInfo {
    key: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DownloadData {
    download_url: String,
}

#[derive(Debug, Deserialize)]
struct DownloadResponse {
    data: Option<DownloadData>,
    #[serde(default)]
    message: Option<String>,
}

/// Decode and decrypt a savetube info payload.
pub(crate) fn decrypt_payload(encoded: &str) -> Result<Value> {
    let key = hex::decode(SAVETUBE_KEY).map_err(|e| Error::decrypt(e.to_string()))?;
    let data = STANDARD
        .decode(encoded.trim())
        .map_err(|e| Error::decrypt(e.to_string()))?;
    if data.len() < 32 {
        return Err(Error::decrypt("payload too short"));
    }

    let (iv, ciphertext) = data.split_at(16);
    let plaintext = Aes128CbcDec::new_from_slices(&key, iv)
        .map_err(|_| Error::decrypt("invalid key or iv length"))?
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| Error::decrypt("invalid padding"))?;
    Ok(serde_json::from_slice(&plaintext)?)
}

/// Whole seconds render as integers.
fn duration_value(seconds: f64) -> Value {
    if seconds.fract() == 0.0 && (0.0..=u32::MAX as f64).contains(&seconds) {
        json!(seconds as u64)
    } else {
        json!(seconds)
    }
}

#[derive(Clone)]
pub struct YouTubeScraper {
    client: Client,
    info_base: String,
    savetube_base: String,
}

impl YouTubeScraper {
    pub fn new(client: Client, info_url: &str, savetube_url: &str) -> Self {
        Self {
            client,
            info_base: base_url(info_url),
            savetube_base: base_url(savetube_url),
        }
    }

    pub async fn info(&self, url: &str) -> Result<VideoInfo> {
        let request = self
            .client
            .post(format!("{}/api/youtube-video-info", self.info_base))
            .header(header::ACCEPT, "application/json")
            .header(header::REFERER, format!("{}/", self.info_base))
            .header(header::USER_AGENT, INFO_AGENT)
            .json(&json!({"url": url, "platform": "youtube"}));
        let response: InfoResponse = send_json(request).await?;
        Ok(response.data)
    }

    fn savetube(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header(header::ACCEPT, "*/*")
            .header(header::ORIGIN, SAVETUBE_ORIGIN)
            .header(header::REFERER, format!("{SAVETUBE_ORIGIN}/"))
            .header(header::USER_AGENT, SAVETUBE_AGENT)
    }

    /// Direct download link. `audio` selects the 128k audio track, otherwise
    /// the 720p video.
    pub async fn download_url(&self, url: &str, audio: bool) -> Result<String> {
        let id = extract_video_id(url)?;

        let cdn: CdnResponse = send_json(
            self.savetube(self.client.get(format!("{}/random-cdn", self.savetube_base))),
        )
        .await?;
        let cdn = if cdn.cdn.contains("://") {
            base_url(&cdn.cdn)
        } else {
            format!("https://{}", cdn.cdn)
        };
        debug!(%cdn, id, "savetube cdn selected");

        let encrypted: EncryptedResponse = send_json(
            self.savetube(self.client.post(format!("{cdn}/v2/info")))
                .json(&json!({"url": format!("https://www.youtube.com/watch?v={id}")})),
        )
        .await?;
        let info: DecryptedInfo = serde_json::from_value(decrypt_payload(&encrypted.data)?)?;

        let (kind, quality) = if audio {
            ("audio", AUDIO_QUALITY)
        } else {
            ("video", VIDEO_QUALITY)
        };
        let response: DownloadResponse = send_json(
            self.savetube(self.client.post(format!("{cdn}/download")))
                .json(&json!({
                    "id": id,
                    "downloadType": kind,
                    "quality": quality,
                    "key": info.key,
                })),
        )
        .await?;

        response.data.map(|data| data.download_url).ok_or_else(|| {
            Error::unexpected(
                response
                    .message
                    .unwrap_or_else(|| "download link missing".to_owned()),
            )
        })
    }
}

#[async_trait]
impl MediaDownloader for YouTubeScraper {
    fn service(&self) -> &'static str {
        "youtube"
    }

    async fn download(&self, url: &str, format: Option<&str>) -> Result<Value> {
        let audio = format == Some("mp3");
        let info = self.info(url).await?;
        let link = self.download_url(url, audio).await?;
        info!(title = %info.title, audio, "youtube link resolved");

        let mut result = json!({
            "status": true,
            "url": link,
            "title": info.title,
            "duration": duration_value(info.duration),
        });
        if audio {
            result["thumbnail"] = json!(info.thumbnail);
        }
        Ok(result)
    }
}
