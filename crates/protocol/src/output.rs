//! Rendering of output lines and stream routing.

use {
    serde::{Deserialize, Serialize},
    serde_json::{Value, json},
};

use crate::{
    MEDIA_DATA_PREFIX, RESULT_PREFIX, SENTINEL,
    error::Result,
    event::{EventType, OutboundEvent},
};

/// JSON-escaped form of the sentinel. Decodes back to the same text, but can
/// never be mistaken for a frame terminator by a reader scanning raw bytes.
const ESCAPED_SENTINEL: &str = "MESSAGE\\u005fEND";

/// Destination stream of a rendered line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    /// Standard output.
    Primary,
    /// Standard error.
    Secondary,
}

/// How plain event lines are split between the two output streams.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Routing {
    /// Every line goes to the primary stream.
    #[default]
    Single,
    /// `message` events go to the primary stream, other events to the
    /// secondary one. Framed results always stay on the primary stream.
    Split,
}

impl std::str::FromStr for Routing {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "single" => Ok(Self::Single),
            "split" => Ok(Self::Split),
            other => Err(format!("unknown routing policy '{other}' (expected single or split)")),
        }
    }
}

/// One line of output.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputLine {
    /// Plain `{"type":..,"content":..}` line.
    Event(OutboundEvent),
    /// `DOWNLOAD_RESULT:<json>MESSAGE_END`.
    Framed(Value),
    /// `MEDIA_DATA:<base64>MESSAGE_END`, or the error marker when `None`.
    MediaData(Option<String>),
}

impl OutputLine {
    /// Successful download/enhance result.
    #[must_use]
    pub fn download_success(result: Value) -> Self {
        Self::Framed(json!({
            "type": EventType::DownloadResult,
            "status": true,
            "result": result,
        }))
    }

    /// Failed download/enhance result.
    #[must_use]
    pub fn download_failure(error: impl std::fmt::Display) -> Self {
        Self::Framed(json!({
            "type": EventType::DownloadResult,
            "status": false,
            "error": error.to_string(),
        }))
    }

    /// Structured event delivered inside a result frame.
    pub fn framed_event(event: OutboundEvent) -> Result<Self> {
        Ok(Self::Framed(serde_json::to_value(event)?))
    }

    /// Render the line without its trailing newline.
    pub fn render(&self) -> Result<String> {
        let line = match self {
            Self::Event(event) => escape_sentinel(&serde_json::to_string(event)?),
            Self::Framed(value) => format!(
                "{RESULT_PREFIX}{}{SENTINEL}",
                escape_sentinel(&serde_json::to_string(value)?)
            ),
            Self::MediaData(Some(data)) => format!("{MEDIA_DATA_PREFIX}{data}{SENTINEL}"),
            Self::MediaData(None) => format!("{MEDIA_DATA_PREFIX}error{SENTINEL}"),
        };
        Ok(line)
    }

    #[must_use]
    pub fn stream(&self, routing: Routing) -> Stream {
        match (routing, self) {
            (Routing::Split, Self::Event(event)) if event.kind != EventType::Message => {
                Stream::Secondary
            },
            _ => Stream::Primary,
        }
    }
}

/// Replace every sentinel occurrence in serialized JSON with its escaped form.
///
/// The sentinel only ever appears inside JSON strings, where `\u005f` is a
/// valid escape for `_`.
#[must_use]
pub fn escape_sentinel(json: &str) -> String {
    json.replace(SENTINEL, ESCAPED_SENTINEL)
}
