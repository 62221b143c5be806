//! Content typing by magic number.

use wabridge_protocol::MediaKind;

pub const OCTET_STREAM: &str = "application/octet-stream";
pub const AUDIO_MPEG: &str = "audio/mpeg";

/// MIME type for an outgoing media message. Audio is always `audio/mpeg`.
#[must_use]
pub fn content_type(kind: MediaKind, data: &[u8]) -> &'static str {
    match kind {
        MediaKind::Audio => AUDIO_MPEG,
        MediaKind::Image | MediaKind::Video => sniff(data),
    }
}

/// Detect a MIME type from the leading bytes.
#[must_use]
pub fn sniff(data: &[u8]) -> &'static str {
    if let Ok(format) = image::guess_format(data) {
        return format.to_mime_type();
    }
    sniff_container(data).unwrap_or(OCTET_STREAM)
}

fn sniff_container(data: &[u8]) -> Option<&'static str> {
    match data {
        [_, _, _, _, b'f', b't', b'y', b'p', ..] => Some("video/mp4"),
        [0x1A, 0x45, 0xDF, 0xA3, ..] => Some("video/webm"),
        [b'R', b'I', b'F', b'F', _, _, _, _, b'A', b'V', b'I', b' ', ..] => Some("video/avi"),
        [b'O', b'g', b'g', b'S', ..] => Some("application/ogg"),
        [b'I', b'D', b'3', ..] => Some(AUDIO_MPEG),
        _ => None,
    }
}
