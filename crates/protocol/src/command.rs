//! Verb table and argument splitting for input frames.

use std::fmt;

use crate::{
    FIELD_SEPARATOR,
    error::{Error, Result},
    expand_newlines,
};

/// Kind of media carried by a `SEND_*` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Image,
    Video,
    Audio,
}

impl MediaKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the bytes of an outgoing media message come from.
#[derive(Clone, PartialEq, Eq)]
pub enum MediaSource {
    /// Standard base64 payload carried in the frame itself.
    Inline(String),
    /// Remote resource fetched over HTTP.
    Url(String),
}

impl fmt::Debug for MediaSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inline(payload) => write!(f, "Inline({} chars)", payload.len()),
            Self::Url(url) => f.debug_tuple("Url").field(url).finish(),
        }
    }
}

/// A fully parsed input command.
///
/// Addresses are kept as raw text; resolving them into platform addresses
/// is the handler's job so a bad address fails only that command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    SendText {
        to: String,
        text: String,
    },
    React {
        chat: String,
        message_id: String,
        emoji: String,
        sender: String,
    },
    SendMedia {
        to: String,
        kind: MediaKind,
        source: MediaSource,
        caption: Option<String>,
    },
    DownloadMedia {
        message_id: String,
        chat: String,
        context: String,
    },
    Download {
        service: String,
        url: String,
        format: Option<String>,
    },
    Enhance {
        action: String,
        image: String,
        is_url: bool,
    },
    Chatbot {
        chat: String,
        prompt: String,
        model: String,
        history: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verb {
    Send,
    React,
    Media { kind: MediaKind, from_url: bool },
    DownloadMedia,
    Download,
    Enhance,
    Chatbot,
}

struct VerbEntry {
    prefix: &'static str,
    verb: Verb,
    min: usize,
    max: usize,
}

const fn entry(prefix: &'static str, verb: Verb, min: usize, max: usize) -> VerbEntry {
    VerbEntry {
        prefix,
        verb,
        min,
        max,
    }
}

/// Ordered so that a prefix is always tried before any shorter prefix it
/// extends (`DOWNLOAD_MEDIA:` before `DOWNLOAD:`).
const VERBS: &[VerbEntry] = &[
    entry("DOWNLOAD_MEDIA:", Verb::DownloadMedia, 3, 3),
    entry("SEND_URL_IMAGE:", Verb::Media { kind: MediaKind::Image, from_url: true }, 2, 3),
    entry("SEND_URL_VIDEO:", Verb::Media { kind: MediaKind::Video, from_url: true }, 2, 3),
    entry("SEND_URL_AUDIO:", Verb::Media { kind: MediaKind::Audio, from_url: true }, 2, 2),
    entry("SEND_IMAGE:", Verb::Media { kind: MediaKind::Image, from_url: false }, 2, 3),
    entry("SEND_VIDEO:", Verb::Media { kind: MediaKind::Video, from_url: false }, 2, 3),
    entry("SEND_AUDIO:", Verb::Media { kind: MediaKind::Audio, from_url: false }, 2, 2),
    entry("DOWNLOAD:", Verb::Download, 2, 3),
    entry("CHATBOT:", Verb::Chatbot, 4, 4),
    entry("ENHANCE:", Verb::Enhance, 3, 3),
    entry("REACT:", Verb::React, 4, 4),
    entry("SEND:", Verb::Send, 2, 2),
];

impl Command {
    /// Parse a trimmed frame.
    ///
    /// The remainder after the verb prefix is split on `|` into at most the
    /// verb's maximum number of fields, so the last field keeps any further
    /// separators verbatim.
    pub fn parse(frame: &str) -> Result<Self> {
        let entry = VERBS
            .iter()
            .find(|entry| frame.starts_with(entry.prefix))
            .ok_or_else(|| Error::unknown_verb(frame))?;

        let rest = &frame[entry.prefix.len()..];
        let fields: Vec<&str> = rest.splitn(entry.max, FIELD_SEPARATOR).collect();
        if fields.len() < entry.min {
            return Err(Error::MissingFields {
                verb: entry.prefix.trim_end_matches(':'),
                expected: entry.min,
                found: fields.len(),
            });
        }

        let field = |i: usize| fields.get(i).map(|s| (*s).to_owned()).unwrap_or_default();
        let optional = |i: usize| fields.get(i).map(|s| (*s).to_owned());

        let command = match entry.verb {
            Verb::Send => Self::SendText {
                to: field(0),
                text: expand_newlines(&field(1)),
            },
            Verb::React => Self::React {
                chat: field(0),
                message_id: field(1),
                emoji: field(2),
                sender: field(3),
            },
            Verb::Media { kind, from_url } => {
                let payload = field(1);
                Self::SendMedia {
                    to: field(0),
                    kind,
                    source: if from_url {
                        MediaSource::Url(payload)
                    } else {
                        MediaSource::Inline(payload)
                    },
                    caption: fields.get(2).map(|c| expand_newlines(c)),
                }
            },
            Verb::DownloadMedia => Self::DownloadMedia {
                message_id: field(0),
                chat: field(1),
                context: field(2),
            },
            Verb::Download => Self::Download {
                service: field(0),
                url: field(1),
                format: optional(2).filter(|f| !f.is_empty()),
            },
            Verb::Enhance => Self::Enhance {
                action: field(0),
                image: field(1),
                is_url: field(2) == "1",
            },
            Verb::Chatbot => Self::Chatbot {
                chat: field(0),
                prompt: field(1),
                model: field(2),
                history: field(3),
            },
        };
        Ok(command)
    }

    /// Short label used in logs and the task registry.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::SendText { .. } => "send",
            Self::React { .. } => "react",
            Self::SendMedia {
                kind: MediaKind::Image,
                ..
            } => "send_image",
            Self::SendMedia {
                kind: MediaKind::Video,
                ..
            } => "send_video",
            Self::SendMedia {
                kind: MediaKind::Audio,
                ..
            } => "send_audio",
            Self::DownloadMedia { .. } => "download_media",
            Self::Download { .. } => "download",
            Self::Enhance { .. } => "enhance",
            Self::Chatbot { .. } => "chatbot",
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    #[test]
    fn send_keeps_separators_in_text() {
        let cmd = Command::parse("SEND:123@x|Hello|World").unwrap();
        assert_eq!(cmd, Command::SendText {
            to: "123@x".into(),
            text: "Hello|World".into(),
        });
    }

    #[test]
    fn send_expands_newline_escape() {
        let cmd = Command::parse("SEND:1@s.whatsapp.net|line one{{NL}}line two").unwrap();
        assert_eq!(cmd, Command::SendText {
            to: "1@s.whatsapp.net".into(),
            text: "line one\nline two".into(),
        });
    }

    #[test]
    fn react_with_all_fields() {
        let cmd = Command::parse("REACT:123@x|MSGID|👍|456@x").unwrap();
        assert_eq!(cmd, Command::React {
            chat: "123@x".into(),
            message_id: "MSGID".into(),
            emoji: "👍".into(),
            sender: "456@x".into(),
        });
    }

    #[rstest]
    #[case("REACT:123@x|MSGID|👍", "REACT", 4, 3)]
    #[case("SEND:123@x", "SEND", 2, 1)]
    #[case("DOWNLOAD_MEDIA:ID|1@s.whatsapp.net", "DOWNLOAD_MEDIA", 3, 2)]
    #[case("CHATBOT:1@x|hi|GPT-4", "CHATBOT", 4, 3)]
    #[case("ENHANCE:enhance|abc", "ENHANCE", 3, 2)]
    #[case("DOWNLOAD:tiktok", "DOWNLOAD", 2, 1)]
    #[case("SEND_IMAGE:1@x", "SEND_IMAGE", 2, 1)]
    fn too_few_fields_is_rejected(
        #[case] frame: &str,
        #[case] verb: &str,
        #[case] expected: usize,
        #[case] found: usize,
    ) {
        match Command::parse(frame).unwrap_err() {
            Error::MissingFields {
                verb: v,
                expected: e,
                found: f,
            } => {
                assert_eq!((v, e, f), (verb, expected, found));
            },
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn download_media_wins_over_download() {
        let cmd = Command::parse("DOWNLOAD_MEDIA:ABC|1@s.whatsapp.net|quoted").unwrap();
        assert_eq!(cmd, Command::DownloadMedia {
            message_id: "ABC".into(),
            chat: "1@s.whatsapp.net".into(),
            context: "quoted".into(),
        });
    }

    #[rstest]
    #[case("DOWNLOAD:youtube|https://youtu.be/x|mp3", Some("mp3"))]
    #[case("DOWNLOAD:youtube|https://youtu.be/x|", None)]
    #[case("DOWNLOAD:youtube|https://youtu.be/x", None)]
    fn download_format_is_optional(#[case] frame: &str, #[case] format: Option<&str>) {
        let cmd = Command::parse(frame).unwrap();
        assert_eq!(cmd, Command::Download {
            service: "youtube".into(),
            url: "https://youtu.be/x".into(),
            format: format.map(str::to_owned),
        });
    }

    #[rstest]
    #[case("SEND_IMAGE:1@x|aGk=|nice{{NL}}pic", MediaKind::Image, false, Some("nice\npic"))]
    #[case("SEND_URL_IMAGE:1@x|http://h/a.png", MediaKind::Image, true, None)]
    #[case("SEND_VIDEO:1@x|aGk=|clip", MediaKind::Video, false, Some("clip"))]
    #[case("SEND_URL_VIDEO:1@x|https://h/v.mp4|a|b", MediaKind::Video, true, Some("a|b"))]
    #[case("SEND_AUDIO:1@x|aGk=", MediaKind::Audio, false, None)]
    #[case("SEND_URL_AUDIO:1@x|https://h/a.mp3", MediaKind::Audio, true, None)]
    fn media_variants(
        #[case] frame: &str,
        #[case] kind: MediaKind,
        #[case] from_url: bool,
        #[case] caption: Option<&str>,
    ) {
        let Command::SendMedia {
            to,
            kind: parsed_kind,
            source,
            caption: parsed_caption,
        } = Command::parse(frame).unwrap()
        else {
            panic!("expected media command");
        };
        assert_eq!(to, "1@x");
        assert_eq!(parsed_kind, kind);
        assert_eq!(matches!(source, MediaSource::Url(_)), from_url);
        assert_eq!(parsed_caption.as_deref(), caption);
    }

    #[test]
    fn audio_payload_keeps_trailing_separators() {
        let cmd = Command::parse("SEND_AUDIO:1@x|aGk=|ignored").unwrap();
        assert!(matches!(
            cmd,
            Command::SendMedia { source: MediaSource::Inline(ref p), caption: None, .. } if p == "aGk=|ignored"
        ));
    }

    #[rstest]
    #[case("ENHANCE:recolor|https://h/i.jpg|1", true)]
    #[case("ENHANCE:recolor|aGk=|0", false)]
    #[case("ENHANCE:recolor|aGk=|yes", false)]
    fn enhance_url_flag(#[case] frame: &str, #[case] is_url: bool) {
        let Command::Enhance { is_url: flag, .. } = Command::parse(frame).unwrap() else {
            panic!("expected enhance command");
        };
        assert_eq!(flag, is_url);
    }

    #[test]
    fn chatbot_history_keeps_separators() {
        let cmd = Command::parse(r#"CHATBOT:1@x|hello|GPT-4|[{"role":"user","content":"a|b"}]"#).unwrap();
        assert_eq!(cmd, Command::Chatbot {
            chat: "1@x".into(),
            prompt: "hello".into(),
            model: "GPT-4".into(),
            history: r#"[{"role":"user","content":"a|b"}]"#.into(),
        });
    }

    #[rstest]
    #[case("HELLO:world")]
    #[case("send:1@x|lowercase")]
    #[case("")]
    fn unknown_verbs(#[case] frame: &str) {
        assert!(matches!(Command::parse(frame), Err(Error::UnknownVerb { .. })));
    }
}
