//! Text protocol spoken with the controlling process.
//!
//! Input is a byte stream of commands, each terminated by the [`SENTINEL`]
//! token (which may appear anywhere, not only at line ends). Output is one
//! JSON object per line for platform events, plus sentinel-framed result
//! lines for asynchronous tasks.
//!
//! - [`frame`]   — sentinel framing of the input stream
//! - [`command`] — verb table and argument splitting
//! - [`event`]   — structured events emitted to the orchestrator
//! - [`output`]  — rendering of output lines
//! - [`sink`]    — the emission seam shared by every producer

pub mod command;
pub mod error;
pub mod event;
pub mod frame;
pub mod output;
pub mod sink;

pub use {
    command::{Command, MediaKind, MediaSource},
    error::{Error, Result},
    event::{EventType, OutboundEvent},
    frame::{FrameReader, SentinelCodec},
    output::{OutputLine, Routing, Stream, escape_sentinel},
    sink::EventSink,
};

// ── Constants ────────────────────────────────────────────────────────────────

/// Terminates every command on input and every framed result on output.
pub const SENTINEL: &str = "MESSAGE_END";

/// Escape for a literal newline inside free-text fields.
pub const NEWLINE_ESCAPE: &str = "{{NL}}";

/// Separator between command arguments.
pub const FIELD_SEPARATOR: char = '|';

/// Prefix of download/enhance/chatbot result lines.
pub const RESULT_PREFIX: &str = "DOWNLOAD_RESULT:";

/// Prefix of DOWNLOAD_MEDIA result lines.
pub const MEDIA_DATA_PREFIX: &str = "MEDIA_DATA:";

/// Instruction shown next to every pairing code.
pub const PAIRING_INSTRUCTION: &str = "Scan QR code with your phone";

/// Expand `{{NL}}` escapes into real newlines.
#[must_use]
pub fn expand_newlines(text: &str) -> String {
    text.replace(NEWLINE_ESCAPE, "\n")
}
