//! Platform-side data types exchanged with the connection.

use std::{fmt, str::FromStr};

use {
    serde::{Deserialize, Deserializer, Serialize, Serializer},
    wabridge_protocol::MediaKind,
};

use crate::error::{Error, Result};

pub const DEFAULT_USER_SERVER: &str = "s.whatsapp.net";
pub const GROUP_SERVER: &str = "g.us";

// ── Addresses ────────────────────────────────────────────────────────────────

/// Platform address: `user[.agent][:device]@server`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Jid {
    pub user: String,
    pub agent: u8,
    pub device: u16,
    pub server: String,
}

impl Jid {
    #[must_use]
    pub fn new(user: impl Into<String>, server: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            server: server.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn is_group(&self) -> bool {
        self.server == GROUP_SERVER
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.user.is_empty() && self.server.is_empty()
    }
}

impl FromStr for Jid {
    type Err = Error;

    fn from_str(input: &str) -> Result<Self> {
        let input = input.trim();
        if input.is_empty() {
            return Err(Error::invalid_jid(input, "empty address"));
        }
        let Some((local, server)) = input.split_once('@') else {
            return Ok(Self::new("", input));
        };
        if server.contains('@') {
            return Err(Error::invalid_jid(input, "more than one '@'"));
        }

        let mut jid = Self::new("", server);
        if let Some((user, rest)) = local.split_once('.') {
            let (agent, device) = match rest.split_once(':') {
                Some((agent, device)) => (agent, Some(device)),
                None => (rest, None),
            };
            jid.user = user.to_owned();
            jid.agent = agent
                .parse()
                .map_err(|_| Error::invalid_jid(input, "agent is not a small integer"))?;
            if let Some(device) = device {
                jid.device = device
                    .parse()
                    .map_err(|_| Error::invalid_jid(input, "device is not an integer"))?;
            }
        } else if let Some((user, device)) = local.split_once(':') {
            jid.user = user.to_owned();
            jid.device = device
                .parse()
                .map_err(|_| Error::invalid_jid(input, "device is not an integer"))?;
        } else {
            jid.user = local.to_owned();
        }
        Ok(jid)
    }
}

impl fmt::Display for Jid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.user.is_empty() {
            return f.write_str(&self.server);
        }
        f.write_str(&self.user)?;
        if self.agent > 0 {
            write!(f, ".{}", self.agent)?;
        }
        if self.device > 0 {
            write!(f, ":{}", self.device)?;
        }
        write!(f, "@{}", self.server)
    }
}

impl Serialize for Jid {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Jid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        if raw.is_empty() {
            return Ok(Self::default());
        }
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// ── Outgoing messages ────────────────────────────────────────────────────────

/// Remote locator and key material returned by an upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadDescriptor {
    pub url: String,
    pub direct_path: String,
    #[serde(with = "base64_bytes")]
    pub media_key: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub file_enc_sha256: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub file_sha256: Vec<u8>,
    pub file_length: u64,
}

/// Media message body; the upload descriptor is copied in verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    pub mimetype: String,
    #[serde(flatten)]
    pub upload: UploadDescriptor,
    /// Playback length, audio only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seconds: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutgoingMessage {
    Text {
        text: String,
    },
    #[serde(rename_all = "camelCase")]
    Reaction {
        chat: Jid,
        sender: Jid,
        message_id: String,
        emoji: String,
    },
    Image(MediaMessage),
    Video(MediaMessage),
    Audio(MediaMessage),
}

impl OutgoingMessage {
    #[must_use]
    pub fn media(kind: MediaKind, body: MediaMessage) -> Self {
        match kind {
            MediaKind::Image => Self::Image(body),
            MediaKind::Video => Self::Video(body),
            MediaKind::Audio => Self::Audio(body),
        }
    }

    #[must_use]
    pub fn as_media(&self) -> Option<&MediaMessage> {
        match self {
            Self::Image(body) | Self::Video(body) | Self::Audio(body) => Some(body),
            Self::Text { .. } | Self::Reaction { .. } => None,
        }
    }
}

// ── Inbound messages ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MessageInfo {
    pub id: String,
    pub chat: Jid,
    pub sender: Jid,
    pub push_name: String,
    pub is_group: bool,
    pub is_from_me: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MediaInfo {
    pub caption: Option<String>,
    pub mimetype: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ContextInfo {
    /// Id of the quoted message.
    pub stanza_id: Option<String>,
    /// Author of the quoted message.
    pub participant: Option<String>,
    pub quoted_message: Option<Box<MessageContent>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ExtendedText {
    pub text: Option<String>,
    pub context_info: Option<ContextInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MessageContent {
    pub conversation: Option<String>,
    pub extended_text: Option<ExtendedText>,
    pub image: Option<MediaInfo>,
    pub video: Option<MediaInfo>,
    pub audio: Option<MediaInfo>,
}

impl MessageContent {
    /// Body text: the plain conversation, else the extended-text body.
    #[must_use]
    pub fn text(&self) -> &str {
        self.conversation
            .as_deref()
            .filter(|text| !text.is_empty())
            .or_else(|| self.extended_text.as_ref()?.text.as_deref())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn context_info(&self) -> Option<&ContextInfo> {
        self.extended_text.as_ref()?.context_info.as_ref()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InboundMessage {
    pub info: MessageInfo,
    pub message: MessageContent,
}

// ── Events and requests ──────────────────────────────────────────────────────

/// Inbound platform events delivered outside the command loop.
#[derive(Debug, Clone, PartialEq)]
pub enum PlatformEvent {
    Message(Box<InboundMessage>),
    Connected,
    Disconnected { reason: Option<String> },
    HistorySync { conversations: u64 },
    LoggedOut,
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingEvent {
    /// A fresh code to render as QR.
    Code(String),
    Success,
    Timeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Presence {
    Available,
    Unavailable,
}

/// Account identity persisted in the session store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Identity {
    pub jid: Jid,
    pub push_name: String,
}

/// Where a media message to download is located.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaContext {
    /// The message itself carries the media.
    Direct,
    /// The media is in the message quoted by the referenced one.
    Quoted,
}

impl FromStr for MediaContext {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "direct" => Ok(Self::Direct),
            "quoted" => Ok(Self::Quoted),
            other => Err(Error::message(format!("unknown context type: {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadRequest {
    pub message_id: String,
    pub chat: Jid,
    pub context: MediaContext,
}

mod base64_bytes {
    use {
        base64::{Engine, engine::general_purpose::STANDARD},
        serde::{Deserialize, Deserializer, Serializer},
    };

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        STANDARD.decode(raw).map_err(serde::de::Error::custom)
    }
}
